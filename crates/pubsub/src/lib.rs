pub mod domain;
pub mod grpc;
pub mod provider;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use domain::*;
pub use grpc::*;
pub use provider::*;
