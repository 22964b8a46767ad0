use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use super::{field_mask, AesKey, DevAddr, EndDeviceIdentifiers};

/// Possibly wrapped AES key.
///
/// Exactly one of `key` (cleartext) or `encrypted_key` is expected. A wrapped
/// key names the KEK that wrapped it via `kek_label`.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct KeyEnvelope {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<AesKey>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub kek_label: String,
    #[serde(
        default,
        with = "super::serde_bytes",
        skip_serializing_if = "super::serde_bytes::is_empty"
    )]
    pub encrypted_key: Vec<u8>,
}

impl KeyEnvelope {
    pub fn plain(key: AesKey) -> Self {
        Self {
            key: Some(key),
            ..Default::default()
        }
    }

    pub fn wrapped(kek_label: impl Into<String>, encrypted_key: Vec<u8>) -> Self {
        Self {
            key: None,
            kek_label: kek_label.into(),
            encrypted_key,
        }
    }

    pub fn is_wrapped(&self) -> bool {
        self.key.is_none() && !self.encrypted_key.is_empty()
    }

    pub fn is_empty(&self) -> bool {
        self.key.is_none() && self.encrypted_key.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SessionKeys {
    #[serde(with = "super::serde_bytes")]
    pub session_key_id: Vec<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub app_s_key: Option<KeyEnvelope>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Session {
    pub dev_addr: DevAddr,
    pub keys: SessionKeys,
    #[serde(default)]
    pub last_a_f_cnt_down: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
}

impl Session {
    pub fn new(dev_addr: DevAddr, session_key_id: Vec<u8>, app_s_key: KeyEnvelope) -> Self {
        Self {
            dev_addr,
            keys: SessionKeys {
                session_key_id,
                app_s_key: Some(app_s_key),
            },
            last_a_f_cnt_down: 0,
            started_at: Some(Utc::now()),
        }
    }

    pub fn session_key_id(&self) -> &[u8] {
        &self.keys.session_key_id
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PayloadFormatter {
    #[default]
    #[serde(alias = "FORMATTER_NONE")]
    None,
    #[serde(alias = "FORMATTER_REPOSITORY")]
    Repository,
    /// Scripted formatter. Scripts are CEL expressions.
    #[serde(alias = "FORMATTER_JAVASCRIPT")]
    Javascript,
    #[serde(alias = "FORMATTER_CAYENNELPP")]
    CayenneLpp,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct MessagePayloadFormatters {
    #[serde(default)]
    pub up_formatter: PayloadFormatter,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub up_formatter_parameter: String,
    #[serde(default)]
    pub down_formatter: PayloadFormatter,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub down_formatter_parameter: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct VersionIdentifiers {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub brand_id: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub model_id: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub hardware_version: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub firmware_version: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub band_id: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LocationSource {
    #[default]
    SourceUnknown,
    SourceGps,
    SourceRegistry,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Location {
    pub latitude: f64,
    pub longitude: f64,
    #[serde(default)]
    pub altitude: i32,
    #[serde(default)]
    pub accuracy: i32,
    #[serde(default)]
    pub source: LocationSource,
}

/// Application Server view of an end device.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct EndDevice {
    pub ids: EndDeviceIdentifiers,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version_ids: Option<VersionIdentifiers>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub formatters: Option<MessagePayloadFormatters>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session: Option<Session>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pending_session: Option<Session>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skip_payload_crypto_override: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub activated_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub locations: HashMap<String, Location>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_seen_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

/// Field paths of [`EndDevice`] understood by the registry.
pub const END_DEVICE_FIELD_PATHS: &[&str] = &[
    "ids",
    "ids.dev_eui",
    "ids.join_eui",
    "ids.dev_addr",
    "version_ids",
    "formatters",
    "session",
    "session.dev_addr",
    "session.keys",
    "session.last_a_f_cnt_down",
    "pending_session",
    "pending_session.dev_addr",
    "pending_session.keys",
    "pending_session.last_a_f_cnt_down",
    "skip_payload_crypto_override",
    "activated_at",
    "locations",
    "last_seen_at",
];

impl EndDevice {
    pub fn new(ids: EndDeviceIdentifiers) -> Self {
        Self {
            ids,
            ..Default::default()
        }
    }

    /// Returns a copy holding only the requested paths. Identifiers are
    /// always kept.
    pub fn masked(&self, paths: &[String]) -> EndDevice {
        if paths.is_empty() {
            return self.clone();
        }
        let mut out = EndDevice::new(self.ids.clone());
        out.set_fields(self, paths);
        out.created_at = self.created_at;
        out.updated_at = self.updated_at;
        out
    }

    /// Copies the given paths from `src` into `self`.
    pub fn set_fields(&mut self, src: &EndDevice, paths: &[String]) {
        let has = |p: &str| field_mask::has_path(paths, p);

        if field_mask::contains_exact(paths, "ids") {
            self.ids = src.ids.clone();
        } else {
            if has("ids.dev_eui") {
                self.ids.dev_eui = src.ids.dev_eui;
            }
            if has("ids.join_eui") {
                self.ids.join_eui = src.ids.join_eui;
            }
            if has("ids.dev_addr") {
                self.ids.dev_addr = src.ids.dev_addr;
            }
        }
        if has("version_ids") {
            self.version_ids = src.version_ids.clone();
        }
        if has("formatters") {
            self.formatters = src.formatters.clone();
        }
        set_session_fields(&mut self.session, &src.session, "session", paths);
        set_session_fields(
            &mut self.pending_session,
            &src.pending_session,
            "pending_session",
            paths,
        );
        if has("skip_payload_crypto_override") {
            self.skip_payload_crypto_override = src.skip_payload_crypto_override;
        }
        if has("activated_at") {
            self.activated_at = src.activated_at;
        }
        if has("locations") {
            self.locations = src.locations.clone();
        }
        if has("last_seen_at") {
            self.last_seen_at = src.last_seen_at;
        }
    }
}

fn set_session_fields(
    dst: &mut Option<Session>,
    src: &Option<Session>,
    prefix: &str,
    paths: &[String],
) {
    if field_mask::contains_exact(paths, prefix) {
        *dst = src.clone();
        return;
    }
    let sub: Vec<&str> = ["dev_addr", "keys", "last_a_f_cnt_down"]
        .into_iter()
        .filter(|f| field_mask::has_path(paths, &format!("{}.{}", prefix, f)))
        .collect();
    if sub.is_empty() {
        return;
    }
    let Some(src) = src else {
        *dst = None;
        return;
    };
    let target = dst.get_or_insert_with(Session::default);
    for field in sub {
        match field {
            "dev_addr" => target.dev_addr = src.dev_addr,
            "keys" => target.keys = src.keys.clone(),
            "last_a_f_cnt_down" => target.last_a_f_cnt_down = src.last_a_f_cnt_down,
            _ => {}
        }
    }
    if target.started_at.is_none() {
        target.started_at = src.started_at;
    }
}
