use super::convert::{dev_addr_from_bytes, dev_addr_to_bytes, eui_from_bytes, eui_to_bytes};
use crate::domain::{self, DomainError, DomainResult};

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ApplicationIdentifiers {
    #[prost(string, tag = "1")]
    pub application_id: String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct EndDeviceIdentifiers {
    #[prost(string, tag = "1")]
    pub device_id: String,
    #[prost(message, optional, tag = "2")]
    pub application_ids: Option<ApplicationIdentifiers>,
    #[prost(bytes = "vec", tag = "4")]
    pub dev_eui: Vec<u8>,
    #[prost(bytes = "vec", tag = "5")]
    pub join_eui: Vec<u8>,
    #[prost(bytes = "vec", tag = "6")]
    pub dev_addr: Vec<u8>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ApplicationWebhookIdentifiers {
    #[prost(message, optional, tag = "1")]
    pub application_ids: Option<ApplicationIdentifiers>,
    #[prost(string, tag = "2")]
    pub webhook_id: String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ApplicationPubSubIdentifiers {
    #[prost(message, optional, tag = "1")]
    pub application_ids: Option<ApplicationIdentifiers>,
    #[prost(string, tag = "2")]
    pub pub_sub_id: String,
}

pub fn to_proto_application_ids(ids: domain::ApplicationIdentifiers) -> ApplicationIdentifiers {
    ApplicationIdentifiers {
        application_id: ids.application_id,
    }
}

pub fn from_proto_application_ids(
    ids: Option<ApplicationIdentifiers>,
) -> DomainResult<domain::ApplicationIdentifiers> {
    let ids = ids.ok_or_else(|| {
        DomainError::InvalidArgument("missing application identifiers".to_string())
    })?;
    let ids = domain::ApplicationIdentifiers::new(ids.application_id);
    ids.validate()?;
    Ok(ids)
}

pub fn to_proto_end_device_ids(ids: domain::EndDeviceIdentifiers) -> EndDeviceIdentifiers {
    EndDeviceIdentifiers {
        device_id: ids.device_id,
        application_ids: Some(to_proto_application_ids(ids.application_ids)),
        dev_eui: eui_to_bytes(ids.dev_eui),
        join_eui: eui_to_bytes(ids.join_eui),
        dev_addr: dev_addr_to_bytes(ids.dev_addr),
    }
}

/// Converts and validates end device identifiers.
pub fn from_proto_end_device_ids(
    ids: Option<EndDeviceIdentifiers>,
) -> DomainResult<domain::EndDeviceIdentifiers> {
    let ids = ids.ok_or_else(|| {
        DomainError::InvalidArgument("missing end device identifiers".to_string())
    })?;
    let out = domain::EndDeviceIdentifiers {
        device_id: ids.device_id,
        application_ids: from_proto_application_ids(ids.application_ids)?,
        dev_eui: eui_from_bytes(&ids.dev_eui)?,
        join_eui: eui_from_bytes(&ids.join_eui)?,
        dev_addr: dev_addr_from_bytes(&ids.dev_addr)?,
    };
    out.validate()?;
    Ok(out)
}

pub fn to_proto_webhook_ids(ids: domain::ApplicationWebhookIdentifiers) -> ApplicationWebhookIdentifiers {
    ApplicationWebhookIdentifiers {
        application_ids: Some(to_proto_application_ids(ids.application_ids)),
        webhook_id: ids.webhook_id,
    }
}

pub fn from_proto_webhook_ids(
    ids: Option<ApplicationWebhookIdentifiers>,
) -> DomainResult<domain::ApplicationWebhookIdentifiers> {
    let ids = ids.ok_or_else(|| {
        DomainError::InvalidArgument("missing webhook identifiers".to_string())
    })?;
    let out = domain::ApplicationWebhookIdentifiers {
        application_ids: from_proto_application_ids(ids.application_ids)?,
        webhook_id: ids.webhook_id,
    };
    out.validate()?;
    Ok(out)
}

pub fn to_proto_pubsub_ids(ids: domain::ApplicationPubSubIdentifiers) -> ApplicationPubSubIdentifiers {
    ApplicationPubSubIdentifiers {
        application_ids: Some(to_proto_application_ids(ids.application_ids)),
        pub_sub_id: ids.pub_sub_id,
    }
}

pub fn from_proto_pubsub_ids(
    ids: Option<ApplicationPubSubIdentifiers>,
) -> DomainResult<domain::ApplicationPubSubIdentifiers> {
    let ids = ids.ok_or_else(|| {
        DomainError::InvalidArgument("missing pub/sub identifiers".to_string())
    })?;
    let out = domain::ApplicationPubSubIdentifiers {
        application_ids: from_proto_application_ids(ids.application_ids)?,
        pub_sub_id: ids.pub_sub_id,
    };
    out.validate()?;
    Ok(out)
}
