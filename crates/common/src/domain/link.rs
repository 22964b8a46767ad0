use serde::{Deserialize, Serialize};

use super::{field_mask, MessagePayloadFormatters};

/// Per-application settings consulted when a device carries no override.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ApplicationLink {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_formatters: Option<MessagePayloadFormatters>,
    /// Three-state: unset, explicitly false, explicitly true.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skip_payload_crypto: Option<bool>,
}

pub const LINK_FIELD_PATHS: &[&str] = &["default_formatters", "skip_payload_crypto"];

impl ApplicationLink {
    pub fn masked(&self, paths: &[String]) -> ApplicationLink {
        if paths.is_empty() {
            return self.clone();
        }
        let mut out = ApplicationLink::default();
        out.set_fields(self, paths);
        out
    }

    pub fn set_fields(&mut self, src: &ApplicationLink, paths: &[String]) {
        if field_mask::has_path(paths, "default_formatters") {
            self.default_formatters = src.default_formatters.clone();
        }
        if field_mask::has_path(paths, "skip_payload_crypto") {
            self.skip_payload_crypto = src.skip_payload_crypto;
        }
    }
}

/// Resolves whether payload crypto should be skipped for a device whose
/// AppSKey cannot be unwrapped: the device override wins when present,
/// otherwise the link value applies.
pub fn skip_payload_crypto(device_override: Option<bool>, link: &ApplicationLink) -> bool {
    match device_override {
        Some(value) => value,
        None => link.skip_payload_crypto.unwrap_or(false),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_skip_payload_crypto_precedence() {
        let skip_link = ApplicationLink {
            skip_payload_crypto: Some(true),
            ..Default::default()
        };
        let unset_link = ApplicationLink::default();

        assert!(skip_payload_crypto(None, &skip_link));
        assert!(!skip_payload_crypto(Some(false), &skip_link));
        assert!(skip_payload_crypto(Some(true), &unset_link));
        assert!(!skip_payload_crypto(None, &unset_link));
    }

    #[test]
    fn test_masked() {
        let link = ApplicationLink {
            default_formatters: Some(MessagePayloadFormatters::default()),
            skip_payload_crypto: Some(true),
        };

        let masked = link.masked(&["skip_payload_crypto".to_string()]);
        assert_eq!(masked.skip_payload_crypto, Some(true));
        assert!(masked.default_formatters.is_none());
    }
}
