mod client;
mod consumer;
mod protobuf;
mod trace_context;
mod traits;

pub use client::*;
pub use consumer::*;
pub use protobuf::*;
pub use trace_context::*;
pub use traits::*;
