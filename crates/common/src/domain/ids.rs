use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

use super::{DomainError, DomainResult};

macro_rules! hex_array_type {
    ($(#[$meta:meta])* $name:ident, $len:expr) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, PartialOrd, Ord)]
        pub struct $name(pub [u8; $len]);

        impl $name {
            pub fn is_zero(&self) -> bool {
                self.0.iter().all(|b| *b == 0)
            }

            pub fn from_slice(bytes: &[u8]) -> DomainResult<Self> {
                let array: [u8; $len] = bytes.try_into().map_err(|_| {
                    DomainError::InvalidArgument(format!(
                        "{} must be {} bytes, got {}",
                        stringify!($name),
                        $len,
                        bytes.len()
                    ))
                })?;
                Ok(Self(array))
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", hex::encode_upper(self.0))
            }
        }

        impl FromStr for $name {
            type Err = DomainError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                let bytes = hex::decode(s).map_err(|e| {
                    DomainError::InvalidArgument(format!("invalid {}: {}", stringify!($name), e))
                })?;
                Self::from_slice(&bytes)
            }
        }

        impl Serialize for $name {
            fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                serializer.serialize_str(&self.to_string())
            }
        }

        impl<'de> Deserialize<'de> for $name {
            fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                let s = String::deserialize(deserializer)?;
                s.parse().map_err(serde::de::Error::custom)
            }
        }
    };
}

hex_array_type!(
    /// 64-bit extended unique identifier (DevEUI, JoinEUI).
    Eui64,
    8
);
hex_array_type!(
    /// 32-bit device address assigned per session.
    DevAddr,
    4
);
hex_array_type!(
    /// AES-128 key.
    AesKey,
    16
);

/// Validates an entity identifier: 2 to 36 lowercase alphanumerics, single
/// dashes allowed between characters.
pub fn validate_id(kind: &str, id: &str) -> DomainResult<()> {
    let valid_len = (2..=36).contains(&id.len());
    let valid_chars = id
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-');
    let valid_dashes = !id.starts_with('-') && !id.ends_with('-') && !id.contains("--");

    if valid_len && valid_chars && valid_dashes {
        Ok(())
    } else {
        Err(DomainError::InvalidArgument(format!(
            "invalid {}: `{}`",
            kind, id
        )))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct ApplicationIdentifiers {
    pub application_id: String,
}

impl ApplicationIdentifiers {
    pub fn new(application_id: impl Into<String>) -> Self {
        Self {
            application_id: application_id.into(),
        }
    }

    pub fn validate(&self) -> DomainResult<()> {
        validate_id("application_id", &self.application_id)
    }

    pub fn unique_id(&self) -> String {
        self.application_id.clone()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct EndDeviceIdentifiers {
    pub device_id: String,
    pub application_ids: ApplicationIdentifiers,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dev_eui: Option<Eui64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub join_eui: Option<Eui64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dev_addr: Option<DevAddr>,
}

impl EndDeviceIdentifiers {
    pub fn new(application_id: impl Into<String>, device_id: impl Into<String>) -> Self {
        Self {
            device_id: device_id.into(),
            application_ids: ApplicationIdentifiers::new(application_id),
            ..Default::default()
        }
    }

    pub fn validate(&self) -> DomainResult<()> {
        self.application_ids.validate()?;
        validate_id("device_id", &self.device_id)
    }

    /// Registry key: `application_id.device_id`.
    pub fn unique_id(&self) -> String {
        format!("{}.{}", self.application_ids.application_id, self.device_id)
    }

    /// Identifiers without the session-dependent and EUI fields.
    pub fn key(&self) -> EndDeviceIdentifiers {
        EndDeviceIdentifiers::new(self.application_ids.application_id.clone(), self.device_id.clone())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct ApplicationWebhookIdentifiers {
    pub application_ids: ApplicationIdentifiers,
    pub webhook_id: String,
}

impl ApplicationWebhookIdentifiers {
    pub fn new(application_id: impl Into<String>, webhook_id: impl Into<String>) -> Self {
        Self {
            application_ids: ApplicationIdentifiers::new(application_id),
            webhook_id: webhook_id.into(),
        }
    }

    pub fn validate(&self) -> DomainResult<()> {
        self.application_ids.validate()?;
        validate_id("webhook_id", &self.webhook_id)
    }

    pub fn unique_id(&self) -> String {
        format!("{}.{}", self.application_ids.application_id, self.webhook_id)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct ApplicationPubSubIdentifiers {
    pub application_ids: ApplicationIdentifiers,
    pub pub_sub_id: String,
}

impl ApplicationPubSubIdentifiers {
    pub fn new(application_id: impl Into<String>, pub_sub_id: impl Into<String>) -> Self {
        Self {
            application_ids: ApplicationIdentifiers::new(application_id),
            pub_sub_id: pub_sub_id.into(),
        }
    }

    pub fn validate(&self) -> DomainResult<()> {
        self.application_ids.validate()?;
        validate_id("pub_sub_id", &self.pub_sub_id)
    }

    pub fn unique_id(&self) -> String {
        format!("{}.{}", self.application_ids.application_id, self.pub_sub_id)
    }
}
