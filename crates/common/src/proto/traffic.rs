use prost_types::{Struct as ProtoStruct, Timestamp};
use std::collections::HashMap;

use super::convert::{
    datetime_to_timestamp, dev_addr_from_bytes, dev_addr_to_bytes, optional_struct_from_proto,
    optional_struct_to_proto, struct_from_proto, struct_to_proto, timestamp_to_datetime,
    unknown_enum,
};
use super::end_device::{
    from_proto_key_envelope, from_proto_location, from_proto_locations, from_proto_version_ids,
    to_proto_key_envelope, to_proto_location, to_proto_locations, to_proto_version_ids,
    KeyEnvelope, Location, VersionIdentifiers,
};
use super::identifiers::{from_proto_end_device_ids, to_proto_end_device_ids, EndDeviceIdentifiers};
use crate::domain::{self, DomainError, DomainResult};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
#[repr(i32)]
pub enum TxSchedulePriority {
    Lowest = 0,
    Low = 1,
    BelowNormal = 2,
    Normal = 3,
    AboveNormal = 4,
    High = 5,
    Highest = 6,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ApplicationDownlink {
    #[prost(bytes = "vec", tag = "1")]
    pub session_key_id: Vec<u8>,
    #[prost(uint32, tag = "2")]
    pub f_port: u32,
    #[prost(uint32, tag = "3")]
    pub f_cnt: u32,
    #[prost(bytes = "vec", tag = "4")]
    pub frm_payload: Vec<u8>,
    #[prost(message, optional, tag = "5")]
    pub decoded_payload: Option<ProtoStruct>,
    #[prost(string, repeated, tag = "6")]
    pub decoded_payload_warnings: Vec<String>,
    #[prost(bool, tag = "7")]
    pub confirmed: bool,
    #[prost(enumeration = "TxSchedulePriority", tag = "8")]
    pub priority: i32,
    #[prost(string, repeated, tag = "9")]
    pub correlation_ids: Vec<String>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ApplicationDownlinks {
    #[prost(message, repeated, tag = "1")]
    pub downlinks: Vec<ApplicationDownlink>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct DownlinkQueueRequest {
    #[prost(message, optional, tag = "1")]
    pub end_device_ids: Option<EndDeviceIdentifiers>,
    #[prost(message, repeated, tag = "2")]
    pub downlinks: Vec<ApplicationDownlink>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ApplicationUplink {
    #[prost(bytes = "vec", tag = "1")]
    pub session_key_id: Vec<u8>,
    #[prost(uint32, tag = "2")]
    pub f_port: u32,
    #[prost(uint32, tag = "3")]
    pub f_cnt: u32,
    #[prost(bytes = "vec", tag = "4")]
    pub frm_payload: Vec<u8>,
    #[prost(message, optional, tag = "5")]
    pub decoded_payload: Option<ProtoStruct>,
    #[prost(string, repeated, tag = "6")]
    pub decoded_payload_warnings: Vec<String>,
    #[prost(message, repeated, tag = "7")]
    pub normalized_payload: Vec<ProtoStruct>,
    #[prost(string, repeated, tag = "8")]
    pub normalized_payload_warnings: Vec<String>,
    #[prost(bool, tag = "9")]
    pub confirmed: bool,
    #[prost(message, optional, tag = "10")]
    pub received_at: Option<Timestamp>,
    #[prost(map = "string, message", tag = "11")]
    pub locations: HashMap<String, Location>,
    #[prost(message, optional, tag = "12")]
    pub version_ids: Option<VersionIdentifiers>,
    #[prost(message, optional, tag = "13")]
    pub app_s_key: Option<KeyEnvelope>,
    #[prost(uint32, tag = "14")]
    pub last_a_f_cnt_down: u32,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ApplicationUplinkNormalized {
    #[prost(bytes = "vec", tag = "1")]
    pub session_key_id: Vec<u8>,
    #[prost(uint32, tag = "2")]
    pub f_port: u32,
    #[prost(uint32, tag = "3")]
    pub f_cnt: u32,
    #[prost(bytes = "vec", tag = "4")]
    pub frm_payload: Vec<u8>,
    #[prost(message, optional, tag = "5")]
    pub normalized_payload: Option<ProtoStruct>,
    #[prost(string, repeated, tag = "6")]
    pub normalized_payload_warnings: Vec<String>,
    #[prost(bool, tag = "7")]
    pub confirmed: bool,
    #[prost(message, optional, tag = "8")]
    pub received_at: Option<Timestamp>,
    #[prost(map = "string, message", tag = "9")]
    pub locations: HashMap<String, Location>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ApplicationJoinAccept {
    #[prost(bytes = "vec", tag = "1")]
    pub session_key_id: Vec<u8>,
    #[prost(message, optional, tag = "2")]
    pub app_s_key: Option<KeyEnvelope>,
    #[prost(message, repeated, tag = "3")]
    pub invalidated_downlinks: Vec<ApplicationDownlink>,
    #[prost(bool, tag = "4")]
    pub pending_session: bool,
    #[prost(message, optional, tag = "5")]
    pub received_at: Option<Timestamp>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ErrorDetails {
    #[prost(string, tag = "1")]
    pub namespace: String,
    #[prost(string, tag = "2")]
    pub name: String,
    #[prost(string, tag = "3")]
    pub message_format: String,
    #[prost(uint32, tag = "4")]
    pub code: u32,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ApplicationDownlinkFailed {
    #[prost(message, optional, tag = "1")]
    pub downlink: Option<ApplicationDownlink>,
    #[prost(message, optional, tag = "2")]
    pub error: Option<ErrorDetails>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ApplicationInvalidatedDownlinks {
    #[prost(message, repeated, tag = "1")]
    pub downlinks: Vec<ApplicationDownlink>,
    #[prost(uint32, tag = "2")]
    pub last_f_cnt_down: u32,
    #[prost(bytes = "vec", tag = "3")]
    pub session_key_id: Vec<u8>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ApplicationLocation {
    #[prost(string, tag = "1")]
    pub service: String,
    #[prost(message, optional, tag = "2")]
    pub location: Option<Location>,
    #[prost(map = "string, string", tag = "3")]
    pub attributes: HashMap<String, String>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ApplicationServiceData {
    #[prost(string, tag = "1")]
    pub service: String,
    #[prost(message, optional, tag = "2")]
    pub data: Option<ProtoStruct>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ApplicationUp {
    #[prost(message, optional, tag = "1")]
    pub end_device_ids: Option<EndDeviceIdentifiers>,
    #[prost(string, repeated, tag = "2")]
    pub correlation_ids: Vec<String>,
    #[prost(message, optional, tag = "3")]
    pub received_at: Option<Timestamp>,
    #[prost(oneof = "application_up::Up", tags = "4, 5, 6, 7, 8, 9, 10, 11, 12, 13, 14")]
    pub up: Option<application_up::Up>,
}

pub mod application_up {
    #[derive(Clone, PartialEq, ::prost::Oneof)]
    pub enum Up {
        #[prost(message, tag = "4")]
        UplinkMessage(super::ApplicationUplink),
        #[prost(message, tag = "5")]
        UplinkNormalized(super::ApplicationUplinkNormalized),
        #[prost(message, tag = "6")]
        JoinAccept(super::ApplicationJoinAccept),
        #[prost(message, tag = "7")]
        DownlinkAck(super::ApplicationDownlink),
        #[prost(message, tag = "8")]
        DownlinkNack(super::ApplicationDownlink),
        #[prost(message, tag = "9")]
        DownlinkSent(super::ApplicationDownlink),
        #[prost(message, tag = "10")]
        DownlinkFailed(super::ApplicationDownlinkFailed),
        #[prost(message, tag = "11")]
        DownlinkQueued(super::ApplicationDownlink),
        #[prost(message, tag = "12")]
        DownlinkQueueInvalidated(super::ApplicationInvalidatedDownlinks),
        #[prost(message, tag = "13")]
        LocationSolved(super::ApplicationLocation),
        #[prost(message, tag = "14")]
        ServiceData(super::ApplicationServiceData),
    }
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct NsAsHandleUplinkRequest {
    #[prost(message, repeated, tag = "1")]
    pub application_ups: Vec<ApplicationUp>,
}

/// Error details attached by the Network Server to a rejected downlink
/// queue operation. Empty session key id and address mean no session.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct DownlinkQueueOperationErrorDetails {
    #[prost(bytes = "vec", tag = "1")]
    pub session_key_id: Vec<u8>,
    #[prost(bytes = "vec", tag = "2")]
    pub dev_addr: Vec<u8>,
    #[prost(uint32, tag = "3")]
    pub min_f_cnt_down: u32,
    #[prost(bytes = "vec", tag = "4")]
    pub pending_session_key_id: Vec<u8>,
    #[prost(bytes = "vec", tag = "5")]
    pub pending_dev_addr: Vec<u8>,
    #[prost(uint32, tag = "6")]
    pub pending_min_f_cnt_down: u32,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct SessionKeyRequest {
    #[prost(bytes = "vec", tag = "1")]
    pub session_key_id: Vec<u8>,
    #[prost(bytes = "vec", tag = "2")]
    pub dev_eui: Vec<u8>,
    #[prost(bytes = "vec", tag = "3")]
    pub join_eui: Vec<u8>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct AppSKeyResponse {
    #[prost(message, optional, tag = "1")]
    pub app_s_key: Option<KeyEnvelope>,
}

fn to_proto_priority(p: domain::TxSchedulePriority) -> TxSchedulePriority {
    match p {
        domain::TxSchedulePriority::Lowest => TxSchedulePriority::Lowest,
        domain::TxSchedulePriority::Low => TxSchedulePriority::Low,
        domain::TxSchedulePriority::BelowNormal => TxSchedulePriority::BelowNormal,
        domain::TxSchedulePriority::Normal => TxSchedulePriority::Normal,
        domain::TxSchedulePriority::AboveNormal => TxSchedulePriority::AboveNormal,
        domain::TxSchedulePriority::High => TxSchedulePriority::High,
        domain::TxSchedulePriority::Highest => TxSchedulePriority::Highest,
    }
}

fn from_proto_priority(value: i32) -> DomainResult<domain::TxSchedulePriority> {
    Ok(match TxSchedulePriority::try_from(value) {
        Ok(TxSchedulePriority::Lowest) => domain::TxSchedulePriority::Lowest,
        Ok(TxSchedulePriority::Low) => domain::TxSchedulePriority::Low,
        Ok(TxSchedulePriority::BelowNormal) => domain::TxSchedulePriority::BelowNormal,
        Ok(TxSchedulePriority::Normal) => domain::TxSchedulePriority::Normal,
        Ok(TxSchedulePriority::AboveNormal) => domain::TxSchedulePriority::AboveNormal,
        Ok(TxSchedulePriority::High) => domain::TxSchedulePriority::High,
        Ok(TxSchedulePriority::Highest) => domain::TxSchedulePriority::Highest,
        Err(_) => return Err(unknown_enum("priority", value)),
    })
}

pub fn to_proto_downlink(d: domain::ApplicationDownlink) -> ApplicationDownlink {
    ApplicationDownlink {
        session_key_id: d.session_key_id,
        f_port: d.f_port,
        f_cnt: d.f_cnt,
        frm_payload: d.frm_payload,
        decoded_payload: optional_struct_to_proto(d.decoded_payload),
        decoded_payload_warnings: d.decoded_payload_warnings,
        confirmed: d.confirmed,
        priority: to_proto_priority(d.priority) as i32,
        correlation_ids: d.correlation_ids,
    }
}

pub fn from_proto_downlink(d: ApplicationDownlink) -> DomainResult<domain::ApplicationDownlink> {
    Ok(domain::ApplicationDownlink {
        session_key_id: d.session_key_id,
        f_port: d.f_port,
        f_cnt: d.f_cnt,
        frm_payload: d.frm_payload,
        decoded_payload: optional_struct_from_proto(d.decoded_payload),
        decoded_payload_warnings: d.decoded_payload_warnings,
        confirmed: d.confirmed,
        priority: from_proto_priority(d.priority)?,
        correlation_ids: d.correlation_ids,
    })
}

pub fn to_proto_downlinks(items: Vec<domain::ApplicationDownlink>) -> Vec<ApplicationDownlink> {
    items.into_iter().map(to_proto_downlink).collect()
}

pub fn from_proto_downlinks(
    items: Vec<ApplicationDownlink>,
) -> DomainResult<Vec<domain::ApplicationDownlink>> {
    items.into_iter().map(from_proto_downlink).collect()
}

fn to_proto_error_details(e: domain::ErrorDetails) -> ErrorDetails {
    ErrorDetails {
        namespace: e.namespace,
        name: e.name,
        message_format: e.message_format,
        code: e.code,
    }
}

fn from_proto_error_details(e: ErrorDetails) -> domain::ErrorDetails {
    domain::ErrorDetails {
        namespace: e.namespace,
        name: e.name,
        message_format: e.message_format,
        code: e.code,
    }
}

fn to_proto_uplink(u: domain::ApplicationUplink) -> ApplicationUplink {
    ApplicationUplink {
        session_key_id: u.session_key_id,
        f_port: u.f_port,
        f_cnt: u.f_cnt,
        frm_payload: u.frm_payload,
        decoded_payload: optional_struct_to_proto(u.decoded_payload),
        decoded_payload_warnings: u.decoded_payload_warnings,
        normalized_payload: u.normalized_payload.into_iter().map(struct_to_proto).collect(),
        normalized_payload_warnings: u.normalized_payload_warnings,
        confirmed: u.confirmed,
        received_at: datetime_to_timestamp(u.received_at),
        locations: to_proto_locations(u.locations),
        version_ids: u.version_ids.map(to_proto_version_ids),
        app_s_key: u.app_s_key.map(to_proto_key_envelope),
        last_a_f_cnt_down: u.last_a_f_cnt_down,
    }
}

fn from_proto_uplink(u: ApplicationUplink) -> DomainResult<domain::ApplicationUplink> {
    Ok(domain::ApplicationUplink {
        session_key_id: u.session_key_id,
        f_port: u.f_port,
        f_cnt: u.f_cnt,
        frm_payload: u.frm_payload,
        decoded_payload: optional_struct_from_proto(u.decoded_payload),
        decoded_payload_warnings: u.decoded_payload_warnings,
        normalized_payload: u.normalized_payload.into_iter().map(struct_from_proto).collect(),
        normalized_payload_warnings: u.normalized_payload_warnings,
        confirmed: u.confirmed,
        received_at: timestamp_to_datetime(u.received_at),
        locations: from_proto_locations(u.locations),
        version_ids: u.version_ids.map(from_proto_version_ids),
        app_s_key: u.app_s_key.map(from_proto_key_envelope).transpose()?,
        last_a_f_cnt_down: u.last_a_f_cnt_down,
    })
}

fn to_proto_up(up: domain::Up) -> application_up::Up {
    use application_up::Up as P;
    match up {
        domain::Up::UplinkMessage(u) => P::UplinkMessage(to_proto_uplink(u)),
        domain::Up::UplinkNormalized(u) => P::UplinkNormalized(ApplicationUplinkNormalized {
            session_key_id: u.session_key_id,
            f_port: u.f_port,
            f_cnt: u.f_cnt,
            frm_payload: u.frm_payload,
            normalized_payload: Some(struct_to_proto(u.normalized_payload)),
            normalized_payload_warnings: u.normalized_payload_warnings,
            confirmed: u.confirmed,
            received_at: datetime_to_timestamp(u.received_at),
            locations: to_proto_locations(u.locations),
        }),
        domain::Up::JoinAccept(j) => P::JoinAccept(ApplicationJoinAccept {
            session_key_id: j.session_key_id,
            app_s_key: j.app_s_key.map(to_proto_key_envelope),
            invalidated_downlinks: to_proto_downlinks(j.invalidated_downlinks),
            pending_session: j.pending_session,
            received_at: datetime_to_timestamp(j.received_at),
        }),
        domain::Up::DownlinkAck(d) => P::DownlinkAck(to_proto_downlink(d)),
        domain::Up::DownlinkNack(d) => P::DownlinkNack(to_proto_downlink(d)),
        domain::Up::DownlinkSent(d) => P::DownlinkSent(to_proto_downlink(d)),
        domain::Up::DownlinkFailed(f) => P::DownlinkFailed(ApplicationDownlinkFailed {
            downlink: Some(to_proto_downlink(f.downlink)),
            error: Some(to_proto_error_details(f.error)),
        }),
        domain::Up::DownlinkQueued(d) => P::DownlinkQueued(to_proto_downlink(d)),
        domain::Up::DownlinkQueueInvalidated(i) => {
            P::DownlinkQueueInvalidated(ApplicationInvalidatedDownlinks {
                downlinks: to_proto_downlinks(i.downlinks),
                last_f_cnt_down: i.last_f_cnt_down,
                session_key_id: i.session_key_id,
            })
        }
        domain::Up::LocationSolved(l) => P::LocationSolved(ApplicationLocation {
            service: l.service,
            location: Some(to_proto_location(l.location)),
            attributes: l.attributes,
        }),
        domain::Up::ServiceData(s) => P::ServiceData(ApplicationServiceData {
            service: s.service,
            data: Some(struct_to_proto(s.data)),
        }),
    }
}

fn from_proto_up(up: application_up::Up) -> DomainResult<domain::Up> {
    use application_up::Up as P;
    Ok(match up {
        P::UplinkMessage(u) => domain::Up::UplinkMessage(from_proto_uplink(u)?),
        P::UplinkNormalized(u) => domain::Up::UplinkNormalized(domain::ApplicationUplinkNormalized {
            session_key_id: u.session_key_id,
            f_port: u.f_port,
            f_cnt: u.f_cnt,
            frm_payload: u.frm_payload,
            normalized_payload: u.normalized_payload.map(struct_from_proto).unwrap_or_default(),
            normalized_payload_warnings: u.normalized_payload_warnings,
            confirmed: u.confirmed,
            received_at: timestamp_to_datetime(u.received_at),
            locations: from_proto_locations(u.locations),
        }),
        P::JoinAccept(j) => domain::Up::JoinAccept(domain::ApplicationJoinAccept {
            session_key_id: j.session_key_id,
            app_s_key: j.app_s_key.map(from_proto_key_envelope).transpose()?,
            invalidated_downlinks: from_proto_downlinks(j.invalidated_downlinks)?,
            pending_session: j.pending_session,
            received_at: timestamp_to_datetime(j.received_at),
        }),
        P::DownlinkAck(d) => domain::Up::DownlinkAck(from_proto_downlink(d)?),
        P::DownlinkNack(d) => domain::Up::DownlinkNack(from_proto_downlink(d)?),
        P::DownlinkSent(d) => domain::Up::DownlinkSent(from_proto_downlink(d)?),
        P::DownlinkFailed(f) => domain::Up::DownlinkFailed(domain::ApplicationDownlinkFailed {
            downlink: from_proto_downlink(f.downlink.unwrap_or_default())?,
            error: f.error.map(from_proto_error_details).unwrap_or_default(),
        }),
        P::DownlinkQueued(d) => domain::Up::DownlinkQueued(from_proto_downlink(d)?),
        P::DownlinkQueueInvalidated(i) => {
            domain::Up::DownlinkQueueInvalidated(domain::ApplicationInvalidatedDownlinks {
                downlinks: from_proto_downlinks(i.downlinks)?,
                last_f_cnt_down: i.last_f_cnt_down,
                session_key_id: i.session_key_id,
            })
        }
        P::LocationSolved(l) => domain::Up::LocationSolved(domain::ApplicationLocation {
            service: l.service,
            location: l.location.map(from_proto_location).unwrap_or_default(),
            attributes: l.attributes,
        }),
        P::ServiceData(s) => domain::Up::ServiceData(domain::ApplicationServiceData {
            service: s.service,
            data: s.data.map(struct_from_proto).unwrap_or_default(),
        }),
    })
}

pub fn to_proto_application_up(up: domain::ApplicationUp) -> ApplicationUp {
    ApplicationUp {
        end_device_ids: Some(to_proto_end_device_ids(up.end_device_ids)),
        correlation_ids: up.correlation_ids,
        received_at: datetime_to_timestamp(up.received_at),
        up: Some(to_proto_up(up.up)),
    }
}

pub fn from_proto_application_up(up: ApplicationUp) -> DomainResult<domain::ApplicationUp> {
    let inner = up
        .up
        .ok_or_else(|| DomainError::InvalidArgument("application up without message".to_string()))?;
    Ok(domain::ApplicationUp {
        end_device_ids: from_proto_end_device_ids(up.end_device_ids)?,
        correlation_ids: up.correlation_ids,
        received_at: timestamp_to_datetime(up.received_at),
        up: from_proto_up(inner)?,
    })
}

fn session_details_to_proto(
    details: Option<domain::SessionErrorDetails>,
) -> (Vec<u8>, Vec<u8>, u32) {
    match details {
        Some(d) => (d.session_key_id, dev_addr_to_bytes(d.dev_addr), d.min_f_cnt_down),
        None => (Vec::new(), Vec::new(), 0),
    }
}

fn session_details_from_proto(
    session_key_id: Vec<u8>,
    dev_addr: &[u8],
    min_f_cnt_down: u32,
) -> DomainResult<Option<domain::SessionErrorDetails>> {
    if session_key_id.is_empty() && dev_addr.is_empty() {
        return Ok(None);
    }
    Ok(Some(domain::SessionErrorDetails {
        session_key_id,
        dev_addr: dev_addr_from_bytes(dev_addr)?,
        min_f_cnt_down,
    }))
}

pub fn to_proto_queue_error_details(
    details: domain::DownlinkQueueOperationErrorDetails,
) -> DownlinkQueueOperationErrorDetails {
    let (session_key_id, dev_addr, min_f_cnt_down) = session_details_to_proto(details.current);
    let (pending_session_key_id, pending_dev_addr, pending_min_f_cnt_down) =
        session_details_to_proto(details.pending);
    DownlinkQueueOperationErrorDetails {
        session_key_id,
        dev_addr,
        min_f_cnt_down,
        pending_session_key_id,
        pending_dev_addr,
        pending_min_f_cnt_down,
    }
}

pub fn from_proto_queue_error_details(
    details: DownlinkQueueOperationErrorDetails,
) -> DomainResult<domain::DownlinkQueueOperationErrorDetails> {
    Ok(domain::DownlinkQueueOperationErrorDetails {
        current: session_details_from_proto(
            details.session_key_id,
            &details.dev_addr,
            details.min_f_cnt_down,
        )?,
        pending: session_details_from_proto(
            details.pending_session_key_id,
            &details.pending_dev_addr,
            details.pending_min_f_cnt_down,
        )?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::DevAddr;
    use prost::Message;
    use serde_json::json;

    #[test]
    fn test_application_up_wire_shape() {
        let serde_json::Value::Object(decoded) = json!({"sum": 193}) else {
            unreachable!()
        };
        let up = domain::ApplicationUp {
            end_device_ids: domain::EndDeviceIdentifiers::new("foo-app", "foo-device"),
            correlation_ids: vec!["as:up:1".to_string()],
            received_at: None,
            up: domain::Up::UplinkMessage(domain::ApplicationUplink {
                session_key_id: vec![0x22],
                f_port: 22,
                f_cnt: 22,
                frm_payload: vec![0xc1],
                decoded_payload: Some(decoded),
                ..Default::default()
            }),
        };

        let bytes = to_proto_application_up(up.clone()).encode_to_vec();
        let back =
            from_proto_application_up(ApplicationUp::decode(bytes.as_slice()).unwrap()).unwrap();

        assert_eq!(back, up);
    }

    #[test]
    fn test_queue_error_details_presence() {
        let details = domain::DownlinkQueueOperationErrorDetails {
            current: Some(domain::SessionErrorDetails {
                session_key_id: vec![0x11],
                dev_addr: Some(DevAddr([0x11; 4])),
                min_f_cnt_down: 5,
            }),
            pending: None,
        };

        let back = from_proto_queue_error_details(to_proto_queue_error_details(details.clone()))
            .unwrap();

        assert_eq!(back, details);
    }

    #[test]
    fn test_up_without_message_rejected() {
        let up = ApplicationUp {
            end_device_ids: Some(to_proto_end_device_ids(domain::EndDeviceIdentifiers::new(
                "foo-app",
                "foo-device",
            ))),
            ..Default::default()
        };

        assert!(from_proto_application_up(up).is_err());
    }
}
