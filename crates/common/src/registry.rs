mod device;
mod link;
mod location;
mod package;
mod pubsub;
mod store;
mod uplink;
mod webhook;

pub use device::*;
pub use link::*;
pub use location::*;
pub use package::*;
pub use pubsub::*;
pub use store::*;
pub use uplink::*;
pub use webhook::*;

use crate::domain::DomainResult;

/// Synchronous mutator used by registries whose transactions do no I/O.
pub type Mutator<T> = Box<dyn FnOnce(Option<T>) -> DomainResult<Mutation<T>> + Send>;
