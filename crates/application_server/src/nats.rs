mod uplink_stream;

pub use uplink_stream::*;
