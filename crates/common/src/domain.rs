mod end_device;
pub mod field_mask;
mod ids;
mod link;
mod messages;
mod package;
mod pubsub;
mod result;
mod serde_bytes;
mod webhook;

pub use end_device::*;
pub use ids::*;
pub use link::*;
pub use messages::*;
pub use package::*;
pub use pubsub::*;
pub use result::*;
pub use webhook::*;
