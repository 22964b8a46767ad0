//! gRPC services generated by `build.rs` over the messages in this module.

/// Alias for `()` so `build.rs` can name the unit message as a path.
pub(crate) type Unit = ();

include!(concat!(env!("OUT_DIR"), "/ttn.lorawan.v3.As.rs"));
include!(concat!(env!("OUT_DIR"), "/ttn.lorawan.v3.NsAs.rs"));
include!(concat!(env!("OUT_DIR"), "/ttn.lorawan.v3.AsEndDeviceRegistry.rs"));
include!(concat!(env!("OUT_DIR"), "/ttn.lorawan.v3.AppAs.rs"));
include!(concat!(env!("OUT_DIR"), "/ttn.lorawan.v3.ApplicationWebhookRegistry.rs"));
include!(concat!(
    env!("OUT_DIR"),
    "/ttn.lorawan.v3.ApplicationWebhookTemplateRegistry.rs"
));
include!(concat!(env!("OUT_DIR"), "/ttn.lorawan.v3.ApplicationPubSubRegistry.rs"));
include!(concat!(env!("OUT_DIR"), "/ttn.lorawan.v3.ApplicationPackageRegistry.rs"));
include!(concat!(env!("OUT_DIR"), "/ttn.lorawan.v3.AsNs.rs"));
include!(concat!(env!("OUT_DIR"), "/ttn.lorawan.v3.AsJs.rs"));
include!(concat!(env!("OUT_DIR"), "/ttn.lorawan.v3.EndDeviceRegistry.rs"));
include!(concat!(env!("OUT_DIR"), "/ttn.lorawan.v3.EndDeviceBatchRegistry.rs"));
