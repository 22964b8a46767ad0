use application_server::domain::{message_format_by_key, message_formats};
use common::domain::{
    field_mask, ApplicationIdentifiers, ApplicationPubSub, ApplicationPubSubIdentifiers,
    DomainError, DomainResult, PubSubProvider, PUBSUB_FIELD_PATHS,
};
use common::registry::{Mutation, PubSubRegistry};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, instrument};

use super::IntegrationController;

/// Paths every pub/sub write reads back.
const IMPLICIT_PATHS: &[&str] = &["ids", "format", "provider", "base_topic"];

/// CRUD of application pub/subs. Writes restart the affected integration.
pub struct PubSubService {
    registry: Arc<dyn PubSubRegistry>,
    integrations: Arc<dyn IntegrationController>,
}

impl PubSubService {
    pub fn new(
        registry: Arc<dyn PubSubRegistry>,
        integrations: Arc<dyn IntegrationController>,
    ) -> Self {
        Self {
            registry,
            integrations,
        }
    }

    pub fn formats(&self) -> HashMap<String, String> {
        message_formats()
    }

    pub async fn get(
        &self,
        ids: &ApplicationPubSubIdentifiers,
        paths: &[String],
    ) -> DomainResult<ApplicationPubSub> {
        ids.validate()?;
        field_mask::validate_paths(paths, PUBSUB_FIELD_PATHS)?;
        self.registry.get(ids, paths).await
    }

    pub async fn list(
        &self,
        ids: &ApplicationIdentifiers,
        paths: &[String],
    ) -> DomainResult<Vec<ApplicationPubSub>> {
        ids.validate()?;
        field_mask::validate_paths(paths, PUBSUB_FIELD_PATHS)?;
        self.registry.list(ids, paths).await
    }

    #[instrument(skip(self, pubsub, paths), fields(pub_sub = %pubsub.ids.unique_id()))]
    pub async fn set(
        &self,
        pubsub: ApplicationPubSub,
        paths: &[String],
    ) -> DomainResult<ApplicationPubSub> {
        pubsub.ids.validate()?;
        if paths.is_empty() {
            return Err(DomainError::InvalidArgument(
                "field mask must not be empty".to_string(),
            ));
        }
        field_mask::validate_paths(paths, PUBSUB_FIELD_PATHS)?;
        if field_mask::has_path(paths, "format") {
            message_format_by_key(&pubsub.format)?;
        }
        if field_mask::has_path(paths, "provider") {
            validate_provider(&pubsub.provider)?;
        }

        let ids = pubsub.ids.clone();
        let read_paths = field_mask::add_paths(paths.to_vec(), IMPLICIT_PATHS);
        let write_paths = paths.to_vec();
        let stored = self
            .registry
            .set(
                &ids,
                &read_paths,
                Box::new(move |stored| {
                    let mut paths = write_paths;
                    if stored.is_none() {
                        for required in ["format", "provider"] {
                            if !field_mask::has_path(&paths, required) {
                                return Err(DomainError::InvalidArgument(format!(
                                    "{} is required",
                                    required
                                )));
                            }
                        }
                        paths = field_mask::add_paths(paths, &["ids"]);
                    }
                    Ok(Mutation::Write {
                        value: pubsub,
                        paths,
                    })
                }),
            )
            .await?
            .ok_or_else(|| DomainError::Internal(anyhow::anyhow!("pub/sub write returned nothing")))?;

        info!("pub/sub set");
        self.integrations.restart(&ids).await;
        Ok(stored.masked(paths))
    }

    #[instrument(skip(self), fields(pub_sub = %ids.unique_id()))]
    pub async fn delete(&self, ids: &ApplicationPubSubIdentifiers) -> DomainResult<()> {
        ids.validate()?;
        self.registry
            .set(ids, &[], Box::new(|_| Ok(Mutation::Delete)))
            .await?;
        info!("pub/sub deleted");
        self.integrations.stop(ids).await;
        Ok(())
    }
}

fn validate_provider(provider: &PubSubProvider) -> DomainResult<()> {
    let server_url = match provider {
        PubSubProvider::Nats { server_url } => server_url,
        PubSubProvider::Mqtt { server_url, .. } => server_url,
    };
    if server_url.is_empty() {
        return Err(DomainError::InvalidArgument(
            "provider server_url is required".to_string(),
        ));
    }
    Ok(())
}
