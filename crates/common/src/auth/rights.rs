use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

use crate::domain::{DomainError, DomainResult};

/// Application rights checked at the RPC and HTTP boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Right {
    ApplicationInfo,
    ApplicationLink,
    ApplicationSettingsBasic,
    ApplicationSettingsPackages,
    ApplicationDevicesRead,
    ApplicationDevicesWrite,
    ApplicationDevicesReadKeys,
    ApplicationDevicesWriteKeys,
    ApplicationTrafficRead,
    ApplicationTrafficDownWrite,
    /// Grants every application right.
    ApplicationAll,
}

impl Right {
    pub fn as_str(&self) -> &'static str {
        match self {
            Right::ApplicationInfo => "application_info",
            Right::ApplicationLink => "application_link",
            Right::ApplicationSettingsBasic => "application_settings_basic",
            Right::ApplicationSettingsPackages => "application_settings_packages",
            Right::ApplicationDevicesRead => "application_devices_read",
            Right::ApplicationDevicesWrite => "application_devices_write",
            Right::ApplicationDevicesReadKeys => "application_devices_read_keys",
            Right::ApplicationDevicesWriteKeys => "application_devices_write_keys",
            Right::ApplicationTrafficRead => "application_traffic_read",
            Right::ApplicationTrafficDownWrite => "application_traffic_down_write",
            Right::ApplicationAll => "application_all",
        }
    }
}

impl fmt::Display for Right {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Right {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase();
        let normalized = normalized.strip_prefix("right_").unwrap_or(&normalized);
        match normalized {
            "application_info" => Ok(Right::ApplicationInfo),
            "application_link" => Ok(Right::ApplicationLink),
            "application_settings_basic" => Ok(Right::ApplicationSettingsBasic),
            "application_settings_packages" => Ok(Right::ApplicationSettingsPackages),
            "application_devices_read" => Ok(Right::ApplicationDevicesRead),
            "application_devices_write" => Ok(Right::ApplicationDevicesWrite),
            "application_devices_read_keys" => Ok(Right::ApplicationDevicesReadKeys),
            "application_devices_write_keys" => Ok(Right::ApplicationDevicesWriteKeys),
            "application_traffic_read" => Ok(Right::ApplicationTrafficRead),
            "application_traffic_down_write" => Ok(Right::ApplicationTrafficDownWrite),
            "application_all" => Ok(Right::ApplicationAll),
            other => Err(DomainError::InvalidArgument(format!("unknown right `{}`", other))),
        }
    }
}

/// Identity and rights resolved from a caller's credentials.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AuthInfo {
    /// Stable identifier of the credential, used for rate limiting.
    pub token_id: String,
    pub rights: HashSet<Right>,
}

impl AuthInfo {
    pub fn has(&self, right: Right) -> bool {
        self.rights.contains(&Right::ApplicationAll) || self.rights.contains(&right)
    }

    /// `PermissionDenied` unless every right in `required` is held.
    pub fn require(&self, required: &[Right]) -> DomainResult<()> {
        match required.iter().find(|r| !self.has(**r)) {
            Some(missing) => Err(DomainError::PermissionDenied(format!(
                "missing right `{}`",
                missing
            ))),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_right_with_prefix() {
        assert_eq!(
            "RIGHT_APPLICATION_TRAFFIC_READ".parse::<Right>().unwrap(),
            Right::ApplicationTrafficRead
        );
        assert!("right_gateway_all".parse::<Right>().is_err());
    }

    #[test]
    fn test_require() {
        let info = AuthInfo {
            token_id: "key-1".to_string(),
            rights: HashSet::from([Right::ApplicationTrafficRead]),
        };

        assert!(info.require(&[Right::ApplicationTrafficRead]).is_ok());
        assert!(matches!(
            info.require(&[Right::ApplicationTrafficDownWrite]),
            Err(DomainError::PermissionDenied(_))
        ));

        let all = AuthInfo {
            token_id: "admin".to_string(),
            rights: HashSet::from([Right::ApplicationAll]),
        };
        assert!(all.require(&[Right::ApplicationLink]).is_ok());
    }
}
