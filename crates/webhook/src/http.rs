mod downlink_ingress;

pub use downlink_ingress::*;
