pub mod domain;
pub mod grpc;
pub mod http;

pub use domain::*;
pub use grpc::*;
pub use http::*;
