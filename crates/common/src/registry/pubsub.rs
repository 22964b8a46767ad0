use async_trait::async_trait;
use std::time::Duration;
use tracing::instrument;

use super::{InMemoryStore, Mutator};
use crate::domain::{
    ApplicationIdentifiers, ApplicationPubSub, ApplicationPubSubIdentifiers, DomainError,
    DomainResult,
};

#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait PubSubRegistry: Send + Sync {
    async fn get(
        &self,
        ids: &ApplicationPubSubIdentifiers,
        paths: &[String],
    ) -> DomainResult<ApplicationPubSub>;

    async fn list(
        &self,
        ids: &ApplicationIdentifiers,
        paths: &[String],
    ) -> DomainResult<Vec<ApplicationPubSub>>;

    /// Every pub/sub of every application, used to start integrations.
    async fn range(&self, paths: &[String]) -> DomainResult<Vec<ApplicationPubSub>>;

    async fn set(
        &self,
        ids: &ApplicationPubSubIdentifiers,
        paths: &[String],
        mutator: Mutator<ApplicationPubSub>,
    ) -> DomainResult<Option<ApplicationPubSub>>;
}

pub struct InMemoryPubSubRegistry {
    store: InMemoryStore<ApplicationPubSub>,
}

impl InMemoryPubSubRegistry {
    pub fn new(lock_ttl: Duration) -> Self {
        Self {
            store: InMemoryStore::new(lock_ttl),
        }
    }
}

impl Default for InMemoryPubSubRegistry {
    fn default() -> Self {
        Self::new(Duration::from_secs(10))
    }
}

#[async_trait]
impl PubSubRegistry for InMemoryPubSubRegistry {
    async fn get(
        &self,
        ids: &ApplicationPubSubIdentifiers,
        paths: &[String],
    ) -> DomainResult<ApplicationPubSub> {
        self.store
            .get(&ids.unique_id(), paths)
            .await
            .ok_or_else(|| DomainError::NotFound(format!("pub/sub `{}`", ids.unique_id())))
    }

    async fn list(
        &self,
        ids: &ApplicationIdentifiers,
        paths: &[String],
    ) -> DomainResult<Vec<ApplicationPubSub>> {
        Ok(self
            .store
            .range(&format!("{}.", ids.unique_id()), paths)
            .await
            .into_iter()
            .map(|(_, ps)| ps)
            .collect())
    }

    async fn range(&self, paths: &[String]) -> DomainResult<Vec<ApplicationPubSub>> {
        Ok(self
            .store
            .range("", paths)
            .await
            .into_iter()
            .map(|(_, ps)| ps)
            .collect())
    }

    #[instrument(skip(self, paths, mutator), fields(pub_sub = %ids.unique_id()))]
    async fn set(
        &self,
        ids: &ApplicationPubSubIdentifiers,
        paths: &[String],
        mutator: Mutator<ApplicationPubSub>,
    ) -> DomainResult<Option<ApplicationPubSub>> {
        self.store
            .set(&ids.unique_id(), paths, |stored| async move { mutator(stored) })
            .await
    }
}
