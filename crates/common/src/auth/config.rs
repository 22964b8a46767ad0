use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use tracing::debug;

use super::{AuthInfo, Right, RightsFetcher};
use crate::domain::{ApplicationIdentifiers, DomainError, DomainResult};

/// Rights granted to one API key.
#[derive(Debug, Clone, PartialEq)]
pub struct ApiKeyGrant {
    pub token_id: String,
    /// Application id the grant applies to, `*` for every application.
    pub application_id: String,
    pub rights: HashSet<Right>,
}

/// Parses API key grants from `key=token_id:application_id:right+right`
/// entries separated by commas.
pub fn parse_api_keys(raw: &str) -> DomainResult<HashMap<String, ApiKeyGrant>> {
    let mut keys = HashMap::new();
    for entry in raw.split(',').map(str::trim).filter(|e| !e.is_empty()) {
        let invalid = || DomainError::InvalidArgument(format!("invalid api key entry `{}`", entry));
        let (key, grant) = entry.split_once('=').ok_or_else(invalid)?;
        let mut parts = grant.splitn(3, ':');
        let (Some(token_id), Some(application_id), Some(rights)) =
            (parts.next(), parts.next(), parts.next())
        else {
            return Err(invalid());
        };
        let rights = rights
            .split('+')
            .filter(|r| !r.is_empty())
            .map(str::parse)
            .collect::<DomainResult<HashSet<Right>>>()?;
        keys.insert(
            key.to_string(),
            ApiKeyGrant {
                token_id: token_id.to_string(),
                application_id: application_id.to_string(),
                rights,
            },
        );
    }
    Ok(keys)
}

/// Rights fetcher backed by a static API key table.
#[derive(Debug, Clone, Default)]
pub struct StaticRightsFetcher {
    keys: HashMap<String, ApiKeyGrant>,
}

impl StaticRightsFetcher {
    pub fn new(keys: HashMap<String, ApiKeyGrant>) -> Self {
        Self { keys }
    }
}

#[async_trait]
impl RightsFetcher for StaticRightsFetcher {
    async fn application_rights(
        &self,
        api_key: &str,
        ids: &ApplicationIdentifiers,
    ) -> DomainResult<AuthInfo> {
        let Some(grant) = self.keys.get(api_key) else {
            debug!(application_id = %ids.application_id, "unknown api key");
            return Ok(AuthInfo::default());
        };
        if grant.application_id != "*" && grant.application_id != ids.application_id {
            return Ok(AuthInfo {
                token_id: grant.token_id.clone(),
                rights: HashSet::new(),
            });
        }
        Ok(AuthInfo {
            token_id: grant.token_id.clone(),
            rights: grant.rights.clone(),
        })
    }
}
