use application_server::domain::{Distributor, Subscription};
use common::domain::{ApplicationUp, DomainResult, MESSAGE_KINDS};
use common::metrics::{DropCause, SharedMetrics};
use common::registry::WebhookRegistry;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use super::{build_request, DownlinkAnnouncement, Sink};

pub const WEBHOOK_PROTOCOL: &str = "webhook";

const RESUBSCRIBE_DELAY: Duration = Duration::from_secs(1);

/// Webhook fields needed to deliver upstream messages.
fn fan_out_paths() -> Vec<String> {
    let mut paths: Vec<String> = [
        "ids",
        "base_url",
        "format",
        "headers",
        "health_status",
        "paused",
        "field_mask",
        "downlink_api_key",
    ]
    .iter()
    .map(|p| p.to_string())
    .collect();
    paths.extend(MESSAGE_KINDS.iter().map(|k| k.to_string()));
    paths
}

/// Delivers every upstream message of an application to the webhooks of
/// that application.
pub struct WebhookIntegration {
    webhooks: Arc<dyn WebhookRegistry>,
    sink: Arc<dyn Sink>,
    announcement: DownlinkAnnouncement,
    metrics: SharedMetrics,
    paths: Vec<String>,
}

impl WebhookIntegration {
    pub fn new(
        webhooks: Arc<dyn WebhookRegistry>,
        sink: Arc<dyn Sink>,
        announcement: DownlinkAnnouncement,
        metrics: SharedMetrics,
    ) -> Self {
        Self {
            webhooks,
            sink,
            announcement,
            metrics,
            paths: fan_out_paths(),
        }
    }

    /// Subscribes to all applications and handles messages until `token`
    /// is cancelled. A subscription closed by the distributor, e.g. after a
    /// buffer overflow, is replaced by a new one.
    pub async fn run(
        self: Arc<Self>,
        distributor: Arc<dyn Distributor>,
        token: CancellationToken,
    ) -> DomainResult<()> {
        info!("webhook integration started");
        loop {
            let subscribed = tokio::select! {
                _ = token.cancelled() => break,
                subscribed = distributor.subscribe(WEBHOOK_PROTOCOL, None) => subscribed,
            };
            match subscribed {
                Ok(mut subscription) => {
                    if self.consume(&mut subscription, &token).await {
                        break;
                    }
                    warn!("webhook subscription closed, resubscribing");
                }
                Err(e) => {
                    warn!(error = %e, "failed to subscribe webhook integration");
                    tokio::select! {
                        _ = token.cancelled() => break,
                        _ = tokio::time::sleep(RESUBSCRIBE_DELAY) => {}
                    }
                }
            }
        }
        info!("webhook integration stopped");
        Ok(())
    }

    /// Returns `true` once `token` is cancelled, `false` when the
    /// subscription closed.
    async fn consume(&self, subscription: &mut Subscription, token: &CancellationToken) -> bool {
        loop {
            let up = tokio::select! {
                _ = token.cancelled() => return true,
                up = subscription.recv() => up,
            };
            let Some(up) = up else {
                return false;
            };
            if let Err(e) = self.handle_up(&up).await {
                warn!(error = %e, "failed to deliver upstream message to webhooks");
            }
        }
    }

    /// Hands one request per matching webhook to the sink.
    #[instrument(skip(self, up), fields(device = %up.end_device_ids.unique_id(), kind = up.up.name()))]
    pub async fn handle_up(&self, up: &ApplicationUp) -> DomainResult<()> {
        let webhooks = self
            .webhooks
            .list(&up.end_device_ids.application_ids, &self.paths)
            .await?;

        for webhook in webhooks.iter().filter(|w| !w.paused) {
            let request = match build_request(webhook, up, &self.announcement) {
                Ok(Some(request)) => request,
                Ok(None) => continue,
                Err(e) => {
                    self.metrics.record_drop(
                        DropCause::EncodeFail,
                        &format!("{}: {}", webhook.ids.unique_id(), e),
                    );
                    continue;
                }
            };
            debug!(webhook = %webhook.ids.webhook_id, url = %request.url, "webhook request queued");
            if let Err(e) = self.sink.process(request).await {
                self.metrics.record_drop(
                    DropCause::PoolFull,
                    &format!("{}: {}", webhook.ids.unique_id(), e),
                );
            }
        }
        Ok(())
    }
}
