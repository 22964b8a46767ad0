use async_trait::async_trait;
use common::domain::{ApplicationWebhookIdentifiers, DomainResult, HealthStatus, Webhook};
use common::registry::{Mutation, WebhookRegistry};
use std::sync::Arc;
use std::time::Duration;

const HEALTH_STATUS_PATH: &str = "health_status";

/// Computes the next health status from the stored one. `None` keeps the
/// stored status.
pub type HealthUpdate = Box<dyn FnOnce(Option<HealthStatus>) -> Option<HealthStatus> + Send>;

/// Storage of the health status of webhooks.
#[async_trait]
pub trait HealthStatusRegistry: Send + Sync {
    async fn get(&self, ids: &ApplicationWebhookIdentifiers) -> DomainResult<Option<HealthStatus>>;

    /// Applies `update` to the stored status atomically, so concurrent
    /// deliveries to the same webhook never lose an outcome.
    async fn update(&self, ids: &ApplicationWebhookIdentifiers, update: HealthUpdate)
        -> DomainResult<()>;
}

/// Health status stored on the webhook entity itself, so it is removed
/// together with the webhook.
pub struct WebhookHealthRegistry {
    webhooks: Arc<dyn WebhookRegistry>,
}

impl WebhookHealthRegistry {
    pub fn new(webhooks: Arc<dyn WebhookRegistry>) -> Self {
        Self { webhooks }
    }
}

#[async_trait]
impl HealthStatusRegistry for WebhookHealthRegistry {
    async fn get(&self, ids: &ApplicationWebhookIdentifiers) -> DomainResult<Option<HealthStatus>> {
        let webhook = self
            .webhooks
            .get(ids, &[HEALTH_STATUS_PATH.to_string()])
            .await?;
        Ok(webhook.health_status)
    }

    async fn update(
        &self,
        ids: &ApplicationWebhookIdentifiers,
        update: HealthUpdate,
    ) -> DomainResult<()> {
        self.webhooks
            .set(
                ids,
                &[HEALTH_STATUS_PATH.to_string()],
                Box::new(move |stored| {
                    // Never recreate a webhook that was deleted meanwhile.
                    let Some(stored) = stored else {
                        return Ok(Mutation::Keep);
                    };
                    match update(stored.health_status) {
                        Some(next) => Ok(Mutation::Write {
                            value: Webhook {
                                health_status: Some(next),
                                ..Default::default()
                            },
                            paths: vec![HEALTH_STATUS_PATH.to_string()],
                        }),
                        None => Ok(Mutation::Keep),
                    }
                }),
            )
            .await?;
        Ok(())
    }
}

/// Breaker settings. A zero threshold or interval keeps the breaker in
/// monitor-only mode.
#[derive(Debug, Clone, Copy)]
pub struct HealthCheckConfig {
    pub threshold: u64,
    pub retry_interval: Duration,
}

impl HealthCheckConfig {
    pub fn monitor_only(&self) -> bool {
        self.threshold == 0 || self.retry_interval.is_zero()
    }
}

impl Default for HealthCheckConfig {
    fn default() -> Self {
        Self {
            threshold: 16,
            retry_interval: Duration::from_secs(60),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use common::registry::InMemoryWebhookRegistry;

    fn ids() -> ApplicationWebhookIdentifiers {
        ApplicationWebhookIdentifiers::new("foo-app", "foo-hook")
    }

    async fn store_webhook(registry: &InMemoryWebhookRegistry) {
        registry
            .set(
                &ids(),
                &[],
                Box::new(|_| {
                    Ok(Mutation::Write {
                        value: Webhook {
                            ids: ids(),
                            base_url: "https://example.com".to_string(),
                            ..Default::default()
                        },
                        paths: vec!["ids".to_string(), "base_url".to_string()],
                    })
                }),
            )
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_set_and_get_health_status() {
        // Arrange
        let webhooks = Arc::new(InMemoryWebhookRegistry::default());
        store_webhook(&webhooks).await;
        let registry = WebhookHealthRegistry::new(webhooks.clone());
        let status = HealthStatus::Unhealthy {
            failed_attempts: 3,
            last_failed_at: Utc::now(),
            last_error: None,
        };

        // Act
        let next = status.clone();
        registry
            .update(&ids(), Box::new(move |_| Some(next)))
            .await
            .unwrap();

        // Assert
        assert_eq!(registry.get(&ids()).await.unwrap(), Some(status));
        let webhook = webhooks.get(&ids(), &[]).await.unwrap();
        assert_eq!(webhook.base_url, "https://example.com");
    }

    #[tokio::test]
    async fn test_set_does_not_recreate_deleted_webhook() {
        let webhooks = Arc::new(InMemoryWebhookRegistry::default());
        let registry = WebhookHealthRegistry::new(webhooks.clone());

        registry
            .update(&ids(), Box::new(|_| Some(HealthStatus::Healthy)))
            .await
            .unwrap();

        assert!(webhooks.get(&ids(), &[]).await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_update_sees_previous_updates() {
        let webhooks = Arc::new(InMemoryWebhookRegistry::default());
        store_webhook(&webhooks).await;
        let registry = Arc::new(WebhookHealthRegistry::new(webhooks));
        let now = Utc::now();

        let updates = (0..4).map(|_| {
            let registry = registry.clone();
            tokio::spawn(async move {
                registry
                    .update(
                        &ids(),
                        Box::new(move |current| {
                            let failed_attempts = match current {
                                Some(HealthStatus::Unhealthy { failed_attempts, .. }) => {
                                    failed_attempts + 1
                                }
                                _ => 1,
                            };
                            Some(HealthStatus::Unhealthy {
                                failed_attempts,
                                last_failed_at: now,
                                last_error: None,
                            })
                        }),
                    )
                    .await
            })
        });
        for update in futures::future::join_all(updates).await {
            update.unwrap().unwrap();
        }

        assert!(matches!(
            registry.get(&ids()).await.unwrap(),
            Some(HealthStatus::Unhealthy { failed_attempts: 4, .. })
        ));
    }

    #[tokio::test]
    async fn test_update_returning_none_keeps_status() {
        let webhooks = Arc::new(InMemoryWebhookRegistry::default());
        store_webhook(&webhooks).await;
        let registry = WebhookHealthRegistry::new(webhooks);
        registry
            .update(&ids(), Box::new(|_| Some(HealthStatus::Healthy)))
            .await
            .unwrap();

        registry.update(&ids(), Box::new(|_| None)).await.unwrap();

        assert_eq!(
            registry.get(&ids()).await.unwrap(),
            Some(HealthStatus::Healthy)
        );
    }

    #[test]
    fn test_monitor_only() {
        let config = HealthCheckConfig {
            threshold: 0,
            retry_interval: Duration::from_secs(1),
        };
        assert!(config.monitor_only());
        assert!(!HealthCheckConfig::default().monitor_only());
    }
}
