use async_trait::async_trait;
use std::time::Duration;
use tracing::instrument;

use super::{InMemoryStore, Mutator};
use crate::domain::{
    ApplicationIdentifiers, ApplicationWebhookIdentifiers, DomainError, DomainResult, Webhook,
};

#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait WebhookRegistry: Send + Sync {
    async fn get(&self, ids: &ApplicationWebhookIdentifiers, paths: &[String])
        -> DomainResult<Webhook>;

    async fn list(&self, ids: &ApplicationIdentifiers, paths: &[String])
        -> DomainResult<Vec<Webhook>>;

    async fn set(
        &self,
        ids: &ApplicationWebhookIdentifiers,
        paths: &[String],
        mutator: Mutator<Webhook>,
    ) -> DomainResult<Option<Webhook>>;
}

pub struct InMemoryWebhookRegistry {
    store: InMemoryStore<Webhook>,
}

impl InMemoryWebhookRegistry {
    pub fn new(lock_ttl: Duration) -> Self {
        Self {
            store: InMemoryStore::new(lock_ttl),
        }
    }
}

impl Default for InMemoryWebhookRegistry {
    fn default() -> Self {
        Self::new(Duration::from_secs(10))
    }
}

#[async_trait]
impl WebhookRegistry for InMemoryWebhookRegistry {
    async fn get(
        &self,
        ids: &ApplicationWebhookIdentifiers,
        paths: &[String],
    ) -> DomainResult<Webhook> {
        self.store
            .get(&ids.unique_id(), paths)
            .await
            .ok_or_else(|| DomainError::NotFound(format!("webhook `{}`", ids.unique_id())))
    }

    async fn list(
        &self,
        ids: &ApplicationIdentifiers,
        paths: &[String],
    ) -> DomainResult<Vec<Webhook>> {
        Ok(self
            .store
            .range(&format!("{}.", ids.unique_id()), paths)
            .await
            .into_iter()
            .map(|(_, webhook)| webhook)
            .collect())
    }

    #[instrument(skip(self, paths, mutator), fields(webhook = %ids.unique_id()))]
    async fn set(
        &self,
        ids: &ApplicationWebhookIdentifiers,
        paths: &[String],
        mutator: Mutator<Webhook>,
    ) -> DomainResult<Option<Webhook>> {
        self.store
            .set(&ids.unique_id(), paths, |stored| async move { mutator(stored) })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::Mutation;

    fn webhook(app: &str, id: &str) -> Webhook {
        Webhook {
            ids: ApplicationWebhookIdentifiers::new(app, id),
            base_url: "https://example.com".to_string(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_list_is_scoped_to_application() {
        let registry = InMemoryWebhookRegistry::default();
        for (app, id) in [("app-a", "hook-1"), ("app-a", "hook-2"), ("app-ab", "hook-1")] {
            let hook = webhook(app, id);
            let ids = hook.ids.clone();
            registry
                .set(
                    &ids,
                    &[],
                    Box::new(move |_| {
                        Ok(Mutation::Write {
                            value: hook,
                            paths: vec!["base_url".to_string()],
                        })
                    }),
                )
                .await
                .unwrap();
        }

        let hooks = registry
            .list(&ApplicationIdentifiers::new("app-a"), &[])
            .await
            .unwrap();

        assert_eq!(hooks.len(), 2);
        assert!(hooks.iter().all(|h| h.ids.application_ids.application_id == "app-a"));
    }

    #[tokio::test]
    async fn test_get_missing() {
        let registry = InMemoryWebhookRegistry::default();

        let result = registry
            .get(&ApplicationWebhookIdentifiers::new("app", "hook"), &[])
            .await;

        assert!(matches!(result, Err(DomainError::NotFound(_))));
    }
}
