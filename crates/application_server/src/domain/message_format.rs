use common::domain::{
    field_mask, ApplicationDownlink, ApplicationDownlinks, ApplicationUp, DomainError,
    DomainResult, WebhookFormat,
};
use common::proto::{self, from_proto_downlinks, to_proto_application_up};
use prost::Message;
use std::collections::HashMap;

/// Paths always kept when a field mask filters an upstream message.
const ENVELOPE_PATHS: &[&str] = &["end_device_ids", "correlation_ids", "received_at"];

/// Wire format integrations use for upstream messages and downlink bodies.
pub trait MessageFormat: Send + Sync {
    fn name(&self) -> &'static str;

    fn content_type(&self) -> &'static str;

    /// Encodes an upstream message, keeping only `mask` when it is set.
    fn from_up(&self, up: &ApplicationUp, mask: &[String]) -> DomainResult<Vec<u8>>;

    fn to_downlinks(&self, body: &[u8]) -> DomainResult<Vec<ApplicationDownlink>>;
}

pub struct JsonFormat;

impl MessageFormat for JsonFormat {
    fn name(&self) -> &'static str {
        "JSON"
    }

    fn content_type(&self) -> &'static str {
        "application/json"
    }

    fn from_up(&self, up: &ApplicationUp, mask: &[String]) -> DomainResult<Vec<u8>> {
        let value = serde_json::to_value(up).map_err(|e| DomainError::Internal(e.into()))?;
        let value = if mask.is_empty() {
            value
        } else {
            let paths = field_mask::add_paths(mask.to_vec(), ENVELOPE_PATHS);
            field_mask::filter_json(&value, &paths)
        };
        serde_json::to_vec(&value).map_err(|e| DomainError::Internal(e.into()))
    }

    fn to_downlinks(&self, body: &[u8]) -> DomainResult<Vec<ApplicationDownlink>> {
        let parsed: ApplicationDownlinks = serde_json::from_slice(body)
            .map_err(|e| DomainError::InvalidArgument(format!("invalid downlinks body: {}", e)))?;
        Ok(parsed.downlinks)
    }
}

/// Protobuf format. Field masks are not applied to protobuf bodies; the
/// full message is sent.
pub struct ProtobufFormat;

impl MessageFormat for ProtobufFormat {
    fn name(&self) -> &'static str {
        "Protocol Buffers"
    }

    fn content_type(&self) -> &'static str {
        "application/octet-stream"
    }

    fn from_up(&self, up: &ApplicationUp, _mask: &[String]) -> DomainResult<Vec<u8>> {
        Ok(to_proto_application_up(up.clone()).encode_to_vec())
    }

    fn to_downlinks(&self, body: &[u8]) -> DomainResult<Vec<ApplicationDownlink>> {
        let parsed = proto::ApplicationDownlinks::decode(body)
            .map_err(|e| DomainError::InvalidArgument(format!("invalid downlinks body: {}", e)))?;
        from_proto_downlinks(parsed.downlinks)
    }
}

pub fn message_format(format: WebhookFormat) -> &'static dyn MessageFormat {
    match format {
        WebhookFormat::Json => &JsonFormat,
        WebhookFormat::Protobuf => &ProtobufFormat,
    }
}

/// Looks a format up by its configuration key.
pub fn message_format_by_key(key: &str) -> DomainResult<&'static dyn MessageFormat> {
    WebhookFormat::parse(key)
        .map(message_format)
        .ok_or_else(|| DomainError::InvalidArgument(format!("unknown format `{}`", key)))
}

/// Format keys mapped to display names, as returned by `GetFormats`.
pub fn message_formats() -> HashMap<String, String> {
    [WebhookFormat::Json, WebhookFormat::Protobuf]
        .into_iter()
        .map(|f| (f.as_str().to_string(), message_format(f).name().to_string()))
        .collect()
}
