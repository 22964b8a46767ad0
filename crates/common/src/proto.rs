mod convert;
mod end_device;
mod identifiers;
mod package;
mod pubsub;
mod services;
mod traffic;
mod webhook;

pub use convert::*;
pub use end_device::*;
pub use identifiers::*;
pub use package::*;
pub use pubsub::*;
pub use services::*;
pub use traffic::*;
pub use webhook::*;
