pub mod auth;
pub mod clock;
pub mod crypto;
pub mod domain;
pub mod grpc;
pub mod metrics;
pub mod nats;
pub mod proto;
pub mod registry;
pub mod telemetry;
pub mod workerpool;
