mod interop_client;

pub use interop_client::*;
