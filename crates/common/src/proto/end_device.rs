use prost_types::{FieldMask, Timestamp};
use std::collections::HashMap;

use super::convert::{
    aes_key_from_bytes, datetime_to_timestamp, dev_addr_from_bytes, timestamp_to_datetime,
    unknown_enum,
};
use super::identifiers::{
    from_proto_end_device_ids, to_proto_end_device_ids, ApplicationIdentifiers,
    EndDeviceIdentifiers,
};
use crate::domain::{self, DevAddr, DomainResult};

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct KeyEnvelope {
    #[prost(bytes = "vec", tag = "1")]
    pub key: Vec<u8>,
    #[prost(string, tag = "2")]
    pub kek_label: String,
    #[prost(bytes = "vec", tag = "3")]
    pub encrypted_key: Vec<u8>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct SessionKeys {
    #[prost(bytes = "vec", tag = "1")]
    pub session_key_id: Vec<u8>,
    #[prost(message, optional, tag = "2")]
    pub app_s_key: Option<KeyEnvelope>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Session {
    #[prost(bytes = "vec", tag = "1")]
    pub dev_addr: Vec<u8>,
    #[prost(message, optional, tag = "2")]
    pub keys: Option<SessionKeys>,
    #[prost(uint32, tag = "3")]
    pub last_a_f_cnt_down: u32,
    #[prost(message, optional, tag = "4")]
    pub started_at: Option<Timestamp>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
#[repr(i32)]
pub enum PayloadFormatter {
    FormatterNone = 0,
    FormatterRepository = 1,
    FormatterJavascript = 3,
    FormatterCayennelpp = 4,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct MessagePayloadFormatters {
    #[prost(enumeration = "PayloadFormatter", tag = "1")]
    pub up_formatter: i32,
    #[prost(string, tag = "2")]
    pub up_formatter_parameter: String,
    #[prost(enumeration = "PayloadFormatter", tag = "3")]
    pub down_formatter: i32,
    #[prost(string, tag = "4")]
    pub down_formatter_parameter: String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct VersionIdentifiers {
    #[prost(string, tag = "1")]
    pub brand_id: String,
    #[prost(string, tag = "2")]
    pub model_id: String,
    #[prost(string, tag = "3")]
    pub hardware_version: String,
    #[prost(string, tag = "4")]
    pub firmware_version: String,
    #[prost(string, tag = "5")]
    pub band_id: String,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
#[repr(i32)]
pub enum LocationSource {
    SourceUnknown = 0,
    SourceGps = 1,
    SourceRegistry = 3,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Location {
    #[prost(double, tag = "1")]
    pub latitude: f64,
    #[prost(double, tag = "2")]
    pub longitude: f64,
    #[prost(int32, tag = "3")]
    pub altitude: i32,
    #[prost(int32, tag = "4")]
    pub accuracy: i32,
    #[prost(enumeration = "LocationSource", tag = "5")]
    pub source: i32,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct EndDevice {
    #[prost(message, optional, tag = "1")]
    pub ids: Option<EndDeviceIdentifiers>,
    #[prost(message, optional, tag = "2")]
    pub version_ids: Option<VersionIdentifiers>,
    #[prost(message, optional, tag = "3")]
    pub formatters: Option<MessagePayloadFormatters>,
    #[prost(message, optional, tag = "4")]
    pub session: Option<Session>,
    #[prost(message, optional, tag = "5")]
    pub pending_session: Option<Session>,
    #[prost(message, optional, tag = "6")]
    pub skip_payload_crypto_override: Option<bool>,
    #[prost(message, optional, tag = "7")]
    pub activated_at: Option<Timestamp>,
    #[prost(map = "string, message", tag = "8")]
    pub locations: HashMap<String, Location>,
    #[prost(message, optional, tag = "9")]
    pub last_seen_at: Option<Timestamp>,
    #[prost(message, optional, tag = "10")]
    pub created_at: Option<Timestamp>,
    #[prost(message, optional, tag = "11")]
    pub updated_at: Option<Timestamp>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct GetEndDeviceRequest {
    #[prost(message, optional, tag = "1")]
    pub end_device_ids: Option<EndDeviceIdentifiers>,
    #[prost(message, optional, tag = "2")]
    pub field_mask: Option<FieldMask>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct SetEndDeviceRequest {
    #[prost(message, optional, tag = "1")]
    pub end_device: Option<EndDevice>,
    #[prost(message, optional, tag = "2")]
    pub field_mask: Option<FieldMask>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct EndDeviceLastSeenUpdate {
    #[prost(message, optional, tag = "1")]
    pub ids: Option<EndDeviceIdentifiers>,
    #[prost(message, optional, tag = "2")]
    pub last_seen_at: Option<Timestamp>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct BatchUpdateEndDeviceLastSeenRequest {
    #[prost(message, repeated, tag = "1")]
    pub updates: Vec<EndDeviceLastSeenUpdate>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ApplicationLink {
    #[prost(message, optional, tag = "1")]
    pub default_formatters: Option<MessagePayloadFormatters>,
    #[prost(message, optional, tag = "2")]
    pub skip_payload_crypto: Option<bool>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct GetApplicationLinkRequest {
    #[prost(message, optional, tag = "1")]
    pub application_ids: Option<ApplicationIdentifiers>,
    #[prost(message, optional, tag = "2")]
    pub field_mask: Option<FieldMask>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct SetApplicationLinkRequest {
    #[prost(message, optional, tag = "1")]
    pub application_ids: Option<ApplicationIdentifiers>,
    #[prost(message, optional, tag = "2")]
    pub link: Option<ApplicationLink>,
    #[prost(message, optional, tag = "3")]
    pub field_mask: Option<FieldMask>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct GetAsConfigurationRequest {}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct AsConfiguration {
    #[prost(uint32, tag = "1")]
    pub formatter_max_parameter_length: u32,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct GetAsConfigurationResponse {
    #[prost(message, optional, tag = "1")]
    pub configuration: Option<AsConfiguration>,
}

pub fn to_proto_key_envelope(env: domain::KeyEnvelope) -> KeyEnvelope {
    KeyEnvelope {
        key: env.key.map(|k| k.0.to_vec()).unwrap_or_default(),
        kek_label: env.kek_label,
        encrypted_key: env.encrypted_key,
    }
}

pub fn from_proto_key_envelope(env: KeyEnvelope) -> DomainResult<domain::KeyEnvelope> {
    Ok(domain::KeyEnvelope {
        key: aes_key_from_bytes(&env.key)?,
        kek_label: env.kek_label,
        encrypted_key: env.encrypted_key,
    })
}

pub fn to_proto_session(session: domain::Session) -> Session {
    Session {
        dev_addr: session.dev_addr.0.to_vec(),
        keys: Some(SessionKeys {
            session_key_id: session.keys.session_key_id,
            app_s_key: session.keys.app_s_key.map(to_proto_key_envelope),
        }),
        last_a_f_cnt_down: session.last_a_f_cnt_down,
        started_at: datetime_to_timestamp(session.started_at),
    }
}

pub fn from_proto_session(session: Session) -> DomainResult<domain::Session> {
    let keys = session.keys.unwrap_or_default();
    Ok(domain::Session {
        dev_addr: dev_addr_from_bytes(&session.dev_addr)?.unwrap_or(DevAddr([0; 4])),
        keys: domain::SessionKeys {
            session_key_id: keys.session_key_id,
            app_s_key: keys.app_s_key.map(from_proto_key_envelope).transpose()?,
        },
        last_a_f_cnt_down: session.last_a_f_cnt_down,
        started_at: timestamp_to_datetime(session.started_at),
    })
}

pub fn to_proto_formatter(formatter: domain::PayloadFormatter) -> PayloadFormatter {
    match formatter {
        domain::PayloadFormatter::None => PayloadFormatter::FormatterNone,
        domain::PayloadFormatter::Repository => PayloadFormatter::FormatterRepository,
        domain::PayloadFormatter::Javascript => PayloadFormatter::FormatterJavascript,
        domain::PayloadFormatter::CayenneLpp => PayloadFormatter::FormatterCayennelpp,
    }
}

pub fn from_proto_formatter(value: i32) -> DomainResult<domain::PayloadFormatter> {
    match PayloadFormatter::try_from(value) {
        Ok(PayloadFormatter::FormatterNone) => Ok(domain::PayloadFormatter::None),
        Ok(PayloadFormatter::FormatterRepository) => Ok(domain::PayloadFormatter::Repository),
        Ok(PayloadFormatter::FormatterJavascript) => Ok(domain::PayloadFormatter::Javascript),
        Ok(PayloadFormatter::FormatterCayennelpp) => Ok(domain::PayloadFormatter::CayenneLpp),
        Err(_) => Err(unknown_enum("payload formatter", value)),
    }
}

pub fn to_proto_formatters(f: domain::MessagePayloadFormatters) -> MessagePayloadFormatters {
    MessagePayloadFormatters {
        up_formatter: to_proto_formatter(f.up_formatter) as i32,
        up_formatter_parameter: f.up_formatter_parameter,
        down_formatter: to_proto_formatter(f.down_formatter) as i32,
        down_formatter_parameter: f.down_formatter_parameter,
    }
}

pub fn from_proto_formatters(
    f: MessagePayloadFormatters,
) -> DomainResult<domain::MessagePayloadFormatters> {
    Ok(domain::MessagePayloadFormatters {
        up_formatter: from_proto_formatter(f.up_formatter)?,
        up_formatter_parameter: f.up_formatter_parameter,
        down_formatter: from_proto_formatter(f.down_formatter)?,
        down_formatter_parameter: f.down_formatter_parameter,
    })
}

pub fn to_proto_version_ids(v: domain::VersionIdentifiers) -> VersionIdentifiers {
    VersionIdentifiers {
        brand_id: v.brand_id,
        model_id: v.model_id,
        hardware_version: v.hardware_version,
        firmware_version: v.firmware_version,
        band_id: v.band_id,
    }
}

pub fn from_proto_version_ids(v: VersionIdentifiers) -> domain::VersionIdentifiers {
    domain::VersionIdentifiers {
        brand_id: v.brand_id,
        model_id: v.model_id,
        hardware_version: v.hardware_version,
        firmware_version: v.firmware_version,
        band_id: v.band_id,
    }
}

pub fn to_proto_location(l: domain::Location) -> Location {
    let source = match l.source {
        domain::LocationSource::SourceUnknown => LocationSource::SourceUnknown,
        domain::LocationSource::SourceGps => LocationSource::SourceGps,
        domain::LocationSource::SourceRegistry => LocationSource::SourceRegistry,
    };
    Location {
        latitude: l.latitude,
        longitude: l.longitude,
        altitude: l.altitude,
        accuracy: l.accuracy,
        source: source as i32,
    }
}

pub fn from_proto_location(l: Location) -> domain::Location {
    let source = match LocationSource::try_from(l.source) {
        Ok(LocationSource::SourceGps) => domain::LocationSource::SourceGps,
        Ok(LocationSource::SourceRegistry) => domain::LocationSource::SourceRegistry,
        _ => domain::LocationSource::SourceUnknown,
    };
    domain::Location {
        latitude: l.latitude,
        longitude: l.longitude,
        altitude: l.altitude,
        accuracy: l.accuracy,
        source,
    }
}

pub fn to_proto_locations(
    locations: HashMap<String, domain::Location>,
) -> HashMap<String, Location> {
    locations
        .into_iter()
        .map(|(k, v)| (k, to_proto_location(v)))
        .collect()
}

pub fn from_proto_locations(
    locations: HashMap<String, Location>,
) -> HashMap<String, domain::Location> {
    locations
        .into_iter()
        .map(|(k, v)| (k, from_proto_location(v)))
        .collect()
}

pub fn to_proto_end_device(dev: domain::EndDevice) -> EndDevice {
    EndDevice {
        ids: Some(to_proto_end_device_ids(dev.ids)),
        version_ids: dev.version_ids.map(to_proto_version_ids),
        formatters: dev.formatters.map(to_proto_formatters),
        session: dev.session.map(to_proto_session),
        pending_session: dev.pending_session.map(to_proto_session),
        skip_payload_crypto_override: dev.skip_payload_crypto_override,
        activated_at: datetime_to_timestamp(dev.activated_at),
        locations: to_proto_locations(dev.locations),
        last_seen_at: datetime_to_timestamp(dev.last_seen_at),
        created_at: datetime_to_timestamp(dev.created_at),
        updated_at: datetime_to_timestamp(dev.updated_at),
    }
}

pub fn from_proto_end_device(dev: EndDevice) -> DomainResult<domain::EndDevice> {
    Ok(domain::EndDevice {
        ids: from_proto_end_device_ids(dev.ids)?,
        version_ids: dev.version_ids.map(from_proto_version_ids),
        formatters: dev.formatters.map(from_proto_formatters).transpose()?,
        session: dev.session.map(from_proto_session).transpose()?,
        pending_session: dev.pending_session.map(from_proto_session).transpose()?,
        skip_payload_crypto_override: dev.skip_payload_crypto_override,
        activated_at: timestamp_to_datetime(dev.activated_at),
        locations: from_proto_locations(dev.locations),
        last_seen_at: timestamp_to_datetime(dev.last_seen_at),
        created_at: timestamp_to_datetime(dev.created_at),
        updated_at: timestamp_to_datetime(dev.updated_at),
    })
}

pub fn to_proto_link(link: domain::ApplicationLink) -> ApplicationLink {
    ApplicationLink {
        default_formatters: link.default_formatters.map(to_proto_formatters),
        skip_payload_crypto: link.skip_payload_crypto,
    }
}

pub fn from_proto_link(link: ApplicationLink) -> DomainResult<domain::ApplicationLink> {
    Ok(domain::ApplicationLink {
        default_formatters: link.default_formatters.map(from_proto_formatters).transpose()?,
        skip_payload_crypto: link.skip_payload_crypto,
    })
}
