mod pubsub_handler;

pub use pubsub_handler::*;
