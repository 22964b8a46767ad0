use async_trait::async_trait;

use super::AuthInfo;
use crate::domain::{ApplicationIdentifiers, DomainResult};

/// Resolves the rights an API key holds on an application.
///
/// Unknown keys resolve to an [`AuthInfo`] without rights so callers fail
/// their right checks with `PermissionDenied`.
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait RightsFetcher: Send + Sync {
    async fn application_rights(
        &self,
        api_key: &str,
        ids: &ApplicationIdentifiers,
    ) -> DomainResult<AuthInfo>;
}
