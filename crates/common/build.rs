use tonic_build::manual::{Builder, Method, Service};

const PACKAGE: &str = "ttn.lorawan.v3";

struct Rpc {
    name: &'static str,
    input: &'static str,
    output: &'static str,
    server_streaming: bool,
}

const fn rpc(name: &'static str, input: &'static str, output: &'static str) -> Rpc {
    Rpc {
        name,
        input,
        output,
        server_streaming: false,
    }
}

const fn stream(name: &'static str, input: &'static str, output: &'static str) -> Rpc {
    Rpc {
        name,
        input,
        output,
        server_streaming: true,
    }
}

fn snake_case(name: &str) -> String {
    let mut out = String::new();
    for (i, c) in name.chars().enumerate() {
        if c.is_ascii_uppercase() {
            if i > 0 {
                out.push('_');
            }
            out.push(c.to_ascii_lowercase());
        } else {
            out.push(c);
        }
    }
    out
}

fn message_path(name: &str) -> String {
    if name == "()" {
        // tonic-build's manual builder only accepts paths, so the unit
        // message goes through an alias for `()`.
        "crate::proto::services::Unit".to_string()
    } else {
        format!("crate::proto::{}", name)
    }
}

fn service(name: &str, rpcs: &[Rpc]) -> Service {
    let mut builder = Service::builder().name(name).package(PACKAGE);
    for rpc in rpcs {
        let mut method = Method::builder()
            .name(snake_case(rpc.name))
            .route_name(rpc.name)
            .input_type(message_path(rpc.input))
            .output_type(message_path(rpc.output))
            .codec_path("tonic::codec::ProstCodec");
        if rpc.server_streaming {
            method = method.server_streaming();
        }
        builder = builder.method(method.build());
    }
    builder.build()
}

fn main() {
    let services = [
        service(
            "As",
            &[
                rpc("GetLink", "GetApplicationLinkRequest", "ApplicationLink"),
                rpc("SetLink", "SetApplicationLinkRequest", "ApplicationLink"),
                rpc("DeleteLink", "ApplicationIdentifiers", "()"),
                rpc(
                    "GetConfiguration",
                    "GetAsConfigurationRequest",
                    "GetAsConfigurationResponse",
                ),
            ],
        ),
        service(
            "NsAs",
            &[rpc("HandleUplink", "NsAsHandleUplinkRequest", "()")],
        ),
        service(
            "AsEndDeviceRegistry",
            &[
                rpc("Get", "GetEndDeviceRequest", "EndDevice"),
                rpc("Set", "SetEndDeviceRequest", "EndDevice"),
                rpc("Delete", "EndDeviceIdentifiers", "()"),
            ],
        ),
        service(
            "AppAs",
            &[
                stream("Subscribe", "ApplicationIdentifiers", "ApplicationUp"),
                rpc("DownlinkQueuePush", "DownlinkQueueRequest", "()"),
                rpc("DownlinkQueueReplace", "DownlinkQueueRequest", "()"),
                rpc(
                    "DownlinkQueueList",
                    "EndDeviceIdentifiers",
                    "ApplicationDownlinks",
                ),
            ],
        ),
        service(
            "ApplicationWebhookRegistry",
            &[
                rpc("GetFormats", "()", "ApplicationWebhookFormats"),
                rpc("Get", "GetApplicationWebhookRequest", "ApplicationWebhook"),
                rpc("List", "ListApplicationWebhooksRequest", "ApplicationWebhooks"),
                rpc("Set", "SetApplicationWebhookRequest", "ApplicationWebhook"),
                rpc("Delete", "ApplicationWebhookIdentifiers", "()"),
            ],
        ),
        service(
            "ApplicationWebhookTemplateRegistry",
            &[
                rpc(
                    "Get",
                    "GetApplicationWebhookTemplateRequest",
                    "ApplicationWebhookTemplate",
                ),
                rpc(
                    "List",
                    "ListApplicationWebhookTemplatesRequest",
                    "ApplicationWebhookTemplates",
                ),
            ],
        ),
        service(
            "ApplicationPubSubRegistry",
            &[
                rpc("GetFormats", "()", "ApplicationPubSubFormats"),
                rpc("Get", "GetApplicationPubSubRequest", "ApplicationPubSub"),
                rpc("List", "ListApplicationPubSubsRequest", "ApplicationPubSubs"),
                rpc("Set", "SetApplicationPubSubRequest", "ApplicationPubSub"),
                rpc("Delete", "ApplicationPubSubIdentifiers", "()"),
            ],
        ),
        service(
            "ApplicationPackageRegistry",
            &[
                rpc("List", "EndDeviceIdentifiers", "ApplicationPackages"),
                rpc(
                    "GetAssociation",
                    "GetApplicationPackageAssociationRequest",
                    "ApplicationPackageAssociation",
                ),
                rpc(
                    "ListAssociations",
                    "ListApplicationPackageAssociationRequest",
                    "ApplicationPackageAssociations",
                ),
                rpc(
                    "SetAssociation",
                    "SetApplicationPackageAssociationRequest",
                    "ApplicationPackageAssociation",
                ),
                rpc(
                    "DeleteAssociation",
                    "ApplicationPackageAssociationIdentifiers",
                    "()",
                ),
                rpc(
                    "GetDefaultAssociation",
                    "GetApplicationPackageDefaultAssociationRequest",
                    "ApplicationPackageDefaultAssociation",
                ),
                rpc(
                    "ListDefaultAssociations",
                    "ListApplicationPackageDefaultAssociationRequest",
                    "ApplicationPackageDefaultAssociations",
                ),
                rpc(
                    "SetDefaultAssociation",
                    "SetApplicationPackageDefaultAssociationRequest",
                    "ApplicationPackageDefaultAssociation",
                ),
                rpc(
                    "DeleteDefaultAssociation",
                    "ApplicationPackageDefaultAssociationIdentifiers",
                    "()",
                ),
            ],
        ),
        // Peers called by the Application Server.
        service(
            "AsNs",
            &[
                rpc("DownlinkQueuePush", "DownlinkQueueRequest", "()"),
                rpc("DownlinkQueueReplace", "DownlinkQueueRequest", "()"),
                rpc(
                    "DownlinkQueueList",
                    "EndDeviceIdentifiers",
                    "ApplicationDownlinks",
                ),
            ],
        ),
        service(
            "AsJs",
            &[rpc("GetAppSKey", "SessionKeyRequest", "AppSKeyResponse")],
        ),
        service(
            "EndDeviceRegistry",
            &[
                rpc("Get", "GetEndDeviceRequest", "EndDevice"),
                rpc("Update", "SetEndDeviceRequest", "EndDevice"),
            ],
        ),
        service(
            "EndDeviceBatchRegistry",
            &[rpc(
                "UpdateLastSeen",
                "BatchUpdateEndDeviceLastSeenRequest",
                "()",
            )],
        ),
    ];

    Builder::new().compile(&services);
}
