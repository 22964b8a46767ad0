use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;

use super::{DevAddr, EndDeviceIdentifiers, KeyEnvelope, Location, VersionIdentifiers};

pub type Struct = Map<String, Value>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TxSchedulePriority {
    Lowest,
    Low,
    BelowNormal,
    #[default]
    Normal,
    AboveNormal,
    High,
    Highest,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ApplicationDownlink {
    #[serde(
        default,
        with = "super::serde_bytes",
        skip_serializing_if = "super::serde_bytes::is_empty"
    )]
    pub session_key_id: Vec<u8>,
    pub f_port: u32,
    #[serde(default)]
    pub f_cnt: u32,
    #[serde(
        default,
        with = "super::serde_bytes",
        skip_serializing_if = "super::serde_bytes::is_empty"
    )]
    pub frm_payload: Vec<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub decoded_payload: Option<Struct>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub decoded_payload_warnings: Vec<String>,
    #[serde(default)]
    pub confirmed: bool,
    #[serde(default)]
    pub priority: TxSchedulePriority,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub correlation_ids: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ApplicationDownlinks {
    #[serde(default)]
    pub downlinks: Vec<ApplicationDownlink>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ApplicationUplink {
    #[serde(default, with = "super::serde_bytes")]
    pub session_key_id: Vec<u8>,
    #[serde(default)]
    pub f_port: u32,
    #[serde(default)]
    pub f_cnt: u32,
    #[serde(default, with = "super::serde_bytes")]
    pub frm_payload: Vec<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub decoded_payload: Option<Struct>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub decoded_payload_warnings: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub normalized_payload: Vec<Struct>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub normalized_payload_warnings: Vec<String>,
    #[serde(default)]
    pub confirmed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub received_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub locations: HashMap<String, Location>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version_ids: Option<VersionIdentifiers>,
    /// Wrapped AppSKey forwarded when payload crypto is skipped.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub app_s_key: Option<KeyEnvelope>,
    #[serde(default)]
    pub last_a_f_cnt_down: u32,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ApplicationUplinkNormalized {
    #[serde(default, with = "super::serde_bytes")]
    pub session_key_id: Vec<u8>,
    #[serde(default)]
    pub f_port: u32,
    #[serde(default)]
    pub f_cnt: u32,
    #[serde(default, with = "super::serde_bytes")]
    pub frm_payload: Vec<u8>,
    #[serde(default)]
    pub normalized_payload: Struct,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub normalized_payload_warnings: Vec<String>,
    #[serde(default)]
    pub confirmed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub received_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub locations: HashMap<String, Location>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ApplicationJoinAccept {
    #[serde(default, with = "super::serde_bytes")]
    pub session_key_id: Vec<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub app_s_key: Option<KeyEnvelope>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub invalidated_downlinks: Vec<ApplicationDownlink>,
    #[serde(default)]
    pub pending_session: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub received_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ErrorDetails {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub namespace: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub message_format: String,
    #[serde(default)]
    pub code: u32,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ApplicationDownlinkFailed {
    pub downlink: ApplicationDownlink,
    pub error: ErrorDetails,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ApplicationInvalidatedDownlinks {
    #[serde(default)]
    pub downlinks: Vec<ApplicationDownlink>,
    #[serde(default)]
    pub last_f_cnt_down: u32,
    #[serde(default, with = "super::serde_bytes")]
    pub session_key_id: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ApplicationLocation {
    pub service: String,
    pub location: Location,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub attributes: HashMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ApplicationServiceData {
    pub service: String,
    #[serde(default)]
    pub data: Struct,
}

/// Message kind carried by an [`ApplicationUp`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Up {
    UplinkMessage(ApplicationUplink),
    UplinkNormalized(ApplicationUplinkNormalized),
    JoinAccept(ApplicationJoinAccept),
    DownlinkAck(ApplicationDownlink),
    DownlinkNack(ApplicationDownlink),
    DownlinkSent(ApplicationDownlink),
    DownlinkFailed(ApplicationDownlinkFailed),
    DownlinkQueued(ApplicationDownlink),
    DownlinkQueueInvalidated(ApplicationInvalidatedDownlinks),
    LocationSolved(ApplicationLocation),
    ServiceData(ApplicationServiceData),
}

impl Up {
    /// Field name of the variant, used in field masks and topic/path lookups.
    pub fn name(&self) -> &'static str {
        match self {
            Up::UplinkMessage(_) => "uplink_message",
            Up::UplinkNormalized(_) => "uplink_normalized",
            Up::JoinAccept(_) => "join_accept",
            Up::DownlinkAck(_) => "downlink_ack",
            Up::DownlinkNack(_) => "downlink_nack",
            Up::DownlinkSent(_) => "downlink_sent",
            Up::DownlinkFailed(_) => "downlink_failed",
            Up::DownlinkQueued(_) => "downlink_queued",
            Up::DownlinkQueueInvalidated(_) => "downlink_queue_invalidated",
            Up::LocationSolved(_) => "location_solved",
            Up::ServiceData(_) => "service_data",
        }
    }
}

/// Upstream event for one end device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApplicationUp {
    pub end_device_ids: EndDeviceIdentifiers,
    #[serde(default)]
    pub correlation_ids: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub received_at: Option<DateTime<Utc>>,
    #[serde(flatten)]
    pub up: Up,
}

impl ApplicationUp {
    pub fn new(end_device_ids: EndDeviceIdentifiers, up: Up) -> Self {
        Self {
            end_device_ids,
            correlation_ids: Vec::new(),
            received_at: None,
            up,
        }
    }

    pub fn application_id(&self) -> &str {
        &self.end_device_ids.application_ids.application_id
    }
}

/// Session state the Network Server expects after rejecting a downlink queue
/// operation. `None` on either side means the NS holds no such session.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct DownlinkQueueOperationErrorDetails {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current: Option<SessionErrorDetails>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pending: Option<SessionErrorDetails>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SessionErrorDetails {
    #[serde(default, with = "super::serde_bytes")]
    pub session_key_id: Vec<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dev_addr: Option<DevAddr>,
    #[serde(default)]
    pub min_f_cnt_down: u32,
}
