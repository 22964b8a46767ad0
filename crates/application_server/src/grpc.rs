mod app_as_handler;
mod as_handler;
mod device_registry_handler;
mod entity_registry_client;
mod join_server_client;
mod network_server_client;
mod ns_as_handler;
mod package_handler;
mod routes;

pub use app_as_handler::*;
pub use as_handler::*;
pub use device_registry_handler::*;
pub use entity_registry_client::*;
pub use join_server_client::*;
pub use network_server_client::{peer_channel, GrpcNetworkServer};
pub use ns_as_handler::*;
pub use package_handler::*;
pub use routes::*;
