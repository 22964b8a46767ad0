pub mod application_server;
pub mod domain;
pub mod grpc;
pub mod http;
pub mod nats;

pub use application_server::*;
pub use domain::*;
pub use grpc::*;
pub use http::*;
pub use nats::*;

#[cfg(any(test, feature = "testing"))]
pub mod testing;
