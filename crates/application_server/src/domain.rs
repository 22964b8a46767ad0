mod activation;
mod cluster_distributor;
mod device_service;
mod distributor;
mod downlink_queue;
mod entity_registry;
mod formatter;
mod join_server;
mod last_seen;
mod link_service;
mod local_distributor;
mod location_fetcher;
mod message_format;
mod network_server;
mod package_service;
mod session;
mod upstream;

pub use activation::*;
pub use cluster_distributor::*;
pub use device_service::*;
pub use distributor::*;
pub use downlink_queue::*;
pub use entity_registry::*;
pub use formatter::*;
pub use join_server::*;
pub use last_seen::*;
pub use link_service::*;
pub use local_distributor::*;
pub use location_fetcher::*;
pub use message_format::*;
pub use network_server::*;
pub use package_service::*;
pub use session::*;
pub use upstream::*;
