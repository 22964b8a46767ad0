use tonic::metadata::MetadataMap;

use super::{AuthInfo, Right, RightsFetcher};
use crate::domain::{ApplicationIdentifiers, DomainError, DomainResult};

/// Extracts the token of an `Authorization: <scheme> <token>` header value.
pub fn parse_authorization(value: Option<&str>, scheme: &str) -> DomainResult<String> {
    let value = value
        .ok_or_else(|| DomainError::Unauthenticated("missing authorization header".to_string()))?;
    let (given, token) = value
        .split_once(' ')
        .ok_or_else(|| DomainError::Unauthenticated("invalid authorization header".to_string()))?;
    if !given.eq_ignore_ascii_case(scheme) || token.trim().is_empty() {
        return Err(DomainError::Unauthenticated(format!(
            "invalid authorization format, expected '{} <token>'",
            scheme
        )));
    }
    Ok(token.trim().to_string())
}

pub fn metadata_authorization(metadata: &MetadataMap) -> Option<&str> {
    metadata
        .get("authorization")
        .and_then(|value| value.to_str().ok())
}

/// Resolves the caller's rights on an application and checks `required`.
pub async fn authorize_application(
    fetcher: &dyn RightsFetcher,
    authorization: Option<&str>,
    ids: &ApplicationIdentifiers,
    required: &[Right],
) -> DomainResult<AuthInfo> {
    let api_key = parse_authorization(authorization, "Bearer")?;
    let info = fetcher.application_rights(&api_key, ids).await?;
    info.require(required)?;
    Ok(info)
}

/// Cluster peer authentication with `Authorization: ClusterKey <hex>`.
#[derive(Debug, Clone, Default)]
pub struct ClusterAuth {
    keys: Vec<Vec<u8>>,
}

impl ClusterAuth {
    pub fn new(keys: Vec<Vec<u8>>) -> Self {
        Self { keys }
    }

    /// Parses comma separated hex keys.
    pub fn from_hex_list(raw: &str) -> DomainResult<Self> {
        let keys = raw
            .split(',')
            .map(str::trim)
            .filter(|k| !k.is_empty())
            .map(|k| {
                hex::decode(k)
                    .map_err(|e| DomainError::InvalidArgument(format!("invalid cluster key: {}", e)))
            })
            .collect::<DomainResult<Vec<_>>>()?;
        Ok(Self { keys })
    }

    /// Without configured keys every peer is accepted.
    pub fn verify(&self, authorization: Option<&str>) -> DomainResult<()> {
        if self.keys.is_empty() {
            return Ok(());
        }
        let token = parse_authorization(authorization, "ClusterKey")?;
        let key = hex::decode(&token)
            .map_err(|_| DomainError::Unauthenticated("invalid cluster key".to_string()))?;
        if self.keys.iter().any(|k| *k == key) {
            Ok(())
        } else {
            Err(DomainError::PermissionDenied("unknown cluster key".to_string()))
        }
    }

    pub fn header(&self) -> Option<String> {
        self.keys
            .first()
            .map(|k| format!("ClusterKey {}", hex::encode(k)))
    }
}
