use async_trait::async_trait;
use std::time::Duration;
use tracing::instrument;

use super::{InMemoryStore, Mutation, Mutator};
use crate::domain::{ApplicationIdentifiers, ApplicationLink, DomainError, DomainResult};

/// Per-application link settings.
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait LinkRegistry: Send + Sync {
    /// `NotFound` if the application has no link.
    async fn get(&self, ids: &ApplicationIdentifiers, paths: &[String])
        -> DomainResult<ApplicationLink>;

    async fn set(
        &self,
        ids: &ApplicationIdentifiers,
        paths: &[String],
        mutator: Mutator<ApplicationLink>,
    ) -> DomainResult<Option<ApplicationLink>>;

    async fn range(
        &self,
        paths: &[String],
    ) -> DomainResult<Vec<(ApplicationIdentifiers, ApplicationLink)>>;
}

pub struct InMemoryLinkRegistry {
    store: InMemoryStore<ApplicationLink>,
}

impl InMemoryLinkRegistry {
    pub fn new(lock_ttl: Duration) -> Self {
        Self {
            store: InMemoryStore::new(lock_ttl),
        }
    }
}

impl Default for InMemoryLinkRegistry {
    fn default() -> Self {
        Self::new(Duration::from_secs(10))
    }
}

#[async_trait]
impl LinkRegistry for InMemoryLinkRegistry {
    async fn get(
        &self,
        ids: &ApplicationIdentifiers,
        paths: &[String],
    ) -> DomainResult<ApplicationLink> {
        self.store
            .get(&ids.unique_id(), paths)
            .await
            .ok_or_else(|| DomainError::NotFound(format!("link `{}`", ids.unique_id())))
    }

    #[instrument(skip(self, paths, mutator), fields(application_id = %ids.application_id))]
    async fn set(
        &self,
        ids: &ApplicationIdentifiers,
        paths: &[String],
        mutator: Mutator<ApplicationLink>,
    ) -> DomainResult<Option<ApplicationLink>> {
        self.store
            .set(&ids.unique_id(), paths, |stored| async move { mutator(stored) })
            .await
    }

    async fn range(
        &self,
        paths: &[String],
    ) -> DomainResult<Vec<(ApplicationIdentifiers, ApplicationLink)>> {
        Ok(self
            .store
            .range("", paths)
            .await
            .into_iter()
            .map(|(key, link)| (ApplicationIdentifiers::new(key), link))
            .collect())
    }
}

/// Reads the link of an application, falling back to `default` when none
/// is stored.
pub async fn get_link_or_default(
    registry: &dyn LinkRegistry,
    ids: &ApplicationIdentifiers,
    default: &ApplicationLink,
) -> DomainResult<ApplicationLink> {
    match registry.get(ids, &[]).await {
        Ok(link) => Ok(link),
        Err(DomainError::NotFound(_)) => Ok(default.clone()),
        Err(e) => Err(e),
    }
}

/// Convenience for writes that replace `paths` with `link`.
pub fn write_link(link: ApplicationLink, paths: Vec<String>) -> Mutator<ApplicationLink> {
    Box::new(move |_| Ok(Mutation::Write { value: link, paths }))
}
