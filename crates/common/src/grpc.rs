mod error;
mod logging;
mod otel_tracing;
mod path;
mod rights;
mod server;

pub use error::*;
pub use logging::*;
pub use otel_tracing::*;
pub use path::RpcPath;
pub use rights::*;
pub use server::*;
