use async_trait::async_trait;
use common::domain::{ApplicationPubSub, ApplicationPubSubIdentifiers, DomainResult};
use common::registry::PubSubRegistry;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use super::{IntegrationDeps, PubSubIntegration};
use crate::provider::Providers;

/// Reacts to registry writes by restarting or stopping the integration of
/// a pub/sub.
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait IntegrationController: Send + Sync {
    async fn restart(&self, ids: &ApplicationPubSubIdentifiers);

    async fn stop(&self, ids: &ApplicationPubSubIdentifiers);
}

#[derive(Debug, Clone)]
pub struct PubSubManagerConfig {
    pub retry_delay: Duration,
    /// Consecutive failed connections after which an integration gives up.
    /// Zero retries forever.
    pub max_retry_attempts: u32,
}

impl Default for PubSubManagerConfig {
    fn default() -> Self {
        Self {
            retry_delay: Duration::from_secs(5),
            max_retry_attempts: 0,
        }
    }
}

struct RunningIntegration {
    token: CancellationToken,
    task: JoinHandle<()>,
}

/// Runs one integration task per registered pub/sub.
pub struct PubSubManager {
    registry: Arc<dyn PubSubRegistry>,
    providers: Providers,
    deps: IntegrationDeps,
    config: PubSubManagerConfig,
    token: CancellationToken,
    running: DashMap<String, RunningIntegration>,
}

impl PubSubManager {
    pub fn new(
        registry: Arc<dyn PubSubRegistry>,
        providers: Providers,
        deps: IntegrationDeps,
        config: PubSubManagerConfig,
        token: CancellationToken,
    ) -> Self {
        Self {
            registry,
            providers,
            deps,
            config,
            token,
            running: DashMap::new(),
        }
    }

    /// Starts the integrations of every registered pub/sub.
    pub async fn start_all(&self) -> DomainResult<()> {
        let pubsubs = self.registry.range(&[]).await?;
        info!(count = pubsubs.len(), "starting pub/sub integrations");
        for pubsub in pubsubs {
            self.start(pubsub).await;
        }
        Ok(())
    }

    pub fn running(&self) -> usize {
        self.running.len()
    }

    async fn start(&self, pubsub: ApplicationPubSub) {
        let key = pubsub.ids.unique_id();
        let token = self.token.child_token();
        let task = tokio::spawn(supervise(
            pubsub,
            self.providers.clone(),
            self.deps.clone(),
            self.config.clone(),
            token.clone(),
        ));
        if let Some(previous) = self.running.insert(key, RunningIntegration { token, task }) {
            previous.token.cancel();
            let _ = previous.task.await;
        }
    }

    /// Stops every integration and waits for them to exit.
    pub async fn shutdown(&self) {
        let keys: Vec<String> = self.running.iter().map(|e| e.key().clone()).collect();
        for key in keys {
            if let Some((_, running)) = self.running.remove(&key) {
                running.token.cancel();
                let _ = running.task.await;
            }
        }
        info!("pub/sub integrations stopped");
    }
}

#[async_trait]
impl IntegrationController for PubSubManager {
    #[instrument(skip(self), fields(pub_sub = %ids.unique_id()))]
    async fn restart(&self, ids: &ApplicationPubSubIdentifiers) {
        self.stop(ids).await;
        match self.registry.get(ids, &[]).await {
            Ok(pubsub) => self.start(pubsub).await,
            Err(e) if e.is_not_found() => debug!("pub/sub deleted, not restarted"),
            Err(e) => warn!(error = %e, "failed to load pub/sub for restart"),
        }
    }

    #[instrument(skip(self), fields(pub_sub = %ids.unique_id()))]
    async fn stop(&self, ids: &ApplicationPubSubIdentifiers) {
        if let Some((_, running)) = self.running.remove(&ids.unique_id()) {
            running.token.cancel();
            let _ = running.task.await;
            debug!("pub/sub integration stopped");
        }
    }
}

/// Connects and runs one integration, reconnecting on failure.
#[instrument(name = "pubsub_integration", skip_all, fields(pub_sub = %pubsub.ids.unique_id()))]
async fn supervise(
    pubsub: ApplicationPubSub,
    providers: Providers,
    deps: IntegrationDeps,
    config: PubSubManagerConfig,
    token: CancellationToken,
) {
    let integration = match PubSubIntegration::new(pubsub, deps) {
        Ok(integration) => integration,
        Err(e) => {
            error!(error = %e, "invalid pub/sub, integration not started");
            return;
        }
    };

    let mut retry_count = 0;
    loop {
        if token.is_cancelled() {
            break;
        }

        let connected = tokio::select! {
            _ = token.cancelled() => break,
            connected = providers.connect(integration.pubsub()) => connected,
        };
        match connected {
            Ok(connection) => {
                retry_count = 0;
                info!("pub/sub connected");
                let result = integration.run(connection.clone(), token.clone()).await;
                connection.close().await;
                match result {
                    Ok(()) => break,
                    Err(e) => error!(error = %e, "pub/sub integration failed"),
                }
            }
            Err(e) => error!(error = %e, "pub/sub connection failed"),
        }

        retry_count += 1;
        if config.max_retry_attempts > 0 && retry_count >= config.max_retry_attempts {
            error!(
                max_retries = config.max_retry_attempts,
                "max retry attempts reached, stopping pub/sub integration"
            );
            break;
        }
        warn!(attempt = retry_count, "retrying pub/sub connection");
        tokio::select! {
            _ = token.cancelled() => break,
            _ = tokio::time::sleep(config.retry_delay) => {}
        }
    }
    info!("pub/sub integration stopped");
}
