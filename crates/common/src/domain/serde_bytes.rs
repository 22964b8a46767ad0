//! Serde helpers rendering byte fields as base64 strings, matching the JSON
//! shape integrations expect.

use base64::{engine::general_purpose::STANDARD, Engine};
use serde::{Deserialize, Deserializer, Serializer};

pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&STANDARD.encode(bytes))
}

pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
    let s = Option::<String>::deserialize(deserializer)?.unwrap_or_default();
    STANDARD.decode(s).map_err(serde::de::Error::custom)
}

pub fn is_empty(bytes: &[u8]) -> bool {
    bytes.is_empty()
}
