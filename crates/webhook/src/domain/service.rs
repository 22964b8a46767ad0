use application_server::domain::message_formats;
use common::domain::{
    field_mask, ApplicationIdentifiers, ApplicationWebhookIdentifiers, DomainError, DomainResult,
    Webhook, WEBHOOK_FIELD_PATHS,
};
use common::registry::{Mutation, WebhookRegistry};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, instrument};

/// Paths every webhook write reads back.
const IMPLICIT_PATHS: &[&str] = &["ids", "base_url", "format"];

/// CRUD of application webhooks.
pub struct WebhookService {
    registry: Arc<dyn WebhookRegistry>,
}

impl WebhookService {
    pub fn new(registry: Arc<dyn WebhookRegistry>) -> Self {
        Self { registry }
    }

    /// Format keys mapped to display names.
    pub fn formats(&self) -> HashMap<String, String> {
        message_formats()
    }

    pub async fn get(
        &self,
        ids: &ApplicationWebhookIdentifiers,
        paths: &[String],
    ) -> DomainResult<Webhook> {
        ids.validate()?;
        field_mask::validate_paths(paths, WEBHOOK_FIELD_PATHS)?;
        self.registry.get(ids, paths).await
    }

    pub async fn list(
        &self,
        ids: &ApplicationIdentifiers,
        paths: &[String],
    ) -> DomainResult<Vec<Webhook>> {
        ids.validate()?;
        field_mask::validate_paths(paths, WEBHOOK_FIELD_PATHS)?;
        self.registry.list(ids, paths).await
    }

    /// Creates or updates `paths` of the webhook. A changed base URL
    /// resets the health status, since it describes another target.
    #[instrument(skip(self, webhook, paths), fields(webhook = %webhook.ids.unique_id()))]
    pub async fn set(&self, webhook: Webhook, paths: &[String]) -> DomainResult<Webhook> {
        webhook.ids.validate()?;
        if paths.is_empty() {
            return Err(DomainError::InvalidArgument(
                "field mask must not be empty".to_string(),
            ));
        }
        field_mask::validate_paths(paths, WEBHOOK_FIELD_PATHS)?;
        if field_mask::has_path(paths, "base_url") {
            validate_base_url(&webhook.base_url)?;
        }

        let ids = webhook.ids.clone();
        let read_paths = field_mask::add_paths(paths.to_vec(), IMPLICIT_PATHS);
        let write_paths = paths.to_vec();
        let stored = self
            .registry
            .set(
                &ids,
                &read_paths,
                Box::new(move |stored| {
                    let mut value = webhook;
                    let mut paths = write_paths;
                    match stored {
                        None => {
                            if !field_mask::has_path(&paths, "base_url") {
                                return Err(DomainError::InvalidArgument(
                                    "base_url is required".to_string(),
                                ));
                            }
                            paths = field_mask::add_paths(paths, &["ids", "format"]);
                        }
                        Some(stored) => {
                            if field_mask::has_path(&paths, "base_url")
                                && stored.base_url != value.base_url
                            {
                                debug!("base URL changed, health status reset");
                                value.health_status = None;
                                paths = field_mask::add_paths(paths, &["health_status"]);
                            }
                        }
                    }
                    Ok(Mutation::Write { value, paths })
                }),
            )
            .await?
            .ok_or_else(|| DomainError::Internal(anyhow::anyhow!("webhook write returned nothing")))?;

        info!("webhook set");
        Ok(stored.masked(paths))
    }

    #[instrument(skip(self), fields(webhook = %ids.unique_id()))]
    pub async fn delete(&self, ids: &ApplicationWebhookIdentifiers) -> DomainResult<()> {
        ids.validate()?;
        self.registry
            .set(ids, &[], Box::new(|_| Ok(Mutation::Delete)))
            .await?;
        info!("webhook deleted");
        Ok(())
    }
}

fn validate_base_url(base_url: &str) -> DomainResult<()> {
    if base_url.starts_with("http://") || base_url.starts_with("https://") {
        Ok(())
    } else {
        Err(DomainError::InvalidArgument(format!(
            "invalid base_url `{}`",
            base_url
        )))
    }
}
