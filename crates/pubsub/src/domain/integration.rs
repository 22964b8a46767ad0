use application_server::domain::{
    message_format_by_key, Distributor, DownlinkQueueService, MessageFormat,
};
use bytes::Bytes;
use common::domain::{
    join_topic, ApplicationPubSub, ApplicationUp, DomainError, DomainResult, EndDeviceIdentifiers,
};
use common::metrics::{DropCause, SharedMetrics};
use futures::stream::{self, BoxStream};
use futures::StreamExt;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};

use crate::provider::{device_id_of, Connection, ProviderMessage};

pub const PUBSUB_PROTOCOL: &str = "pubsub";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DownlinkOperation {
    Push,
    Replace,
}

/// Collaborators shared by every pub/sub integration.
#[derive(Clone)]
pub struct IntegrationDeps {
    pub distributor: Arc<dyn Distributor>,
    pub queue: DownlinkQueueService,
    pub metrics: SharedMetrics,
}

struct DownlinkMessage {
    operation: DownlinkOperation,
    prefix: String,
    message: ProviderMessage,
}

/// Bridges one pub/sub to its provider: upstream messages of the
/// application are published, downlinks received on the push and replace
/// topics are queued.
pub struct PubSubIntegration {
    pubsub: ApplicationPubSub,
    format: &'static dyn MessageFormat,
    deps: IntegrationDeps,
}

impl PubSubIntegration {
    pub fn new(pubsub: ApplicationPubSub, deps: IntegrationDeps) -> DomainResult<Self> {
        let format = message_format_by_key(&pubsub.format)?;
        Ok(Self {
            pubsub,
            format,
            deps,
        })
    }

    pub fn pubsub(&self) -> &ApplicationPubSub {
        &self.pubsub
    }

    /// Runs until `token` is cancelled. Returns an error when one of the
    /// subscriptions ends, so the caller can reconnect.
    #[instrument(skip_all, fields(pub_sub = %self.pubsub.ids.unique_id()))]
    pub async fn run(
        &self,
        connection: Arc<dyn Connection>,
        token: CancellationToken,
    ) -> DomainResult<()> {
        let mut ups = self
            .deps
            .distributor
            .subscribe(PUBSUB_PROTOCOL, Some(self.pubsub.ids.application_ids.clone()))
            .await?;
        let mut downlinks = self.downlink_messages(connection.as_ref()).await?;
        debug!(format = self.format.name(), "pub/sub integration running");

        loop {
            tokio::select! {
                _ = token.cancelled() => return Ok(()),
                up = ups.recv() => match up {
                    Some(up) => self.publish_up(connection.as_ref(), &up).await,
                    None => {
                        return Err(DomainError::Unavailable(
                            "upstream subscription closed".to_string(),
                        ))
                    }
                },
                downlink = downlinks.next() => match downlink {
                    Some(downlink) => self.handle_downlink(downlink).await,
                    None => {
                        return Err(DomainError::Unavailable(
                            "provider subscription closed".to_string(),
                        ))
                    }
                },
            }
        }
    }

    async fn downlink_messages(
        &self,
        connection: &dyn Connection,
    ) -> DomainResult<BoxStream<'static, DownlinkMessage>> {
        let topics = [
            (DownlinkOperation::Push, &self.pubsub.downlink_push),
            (DownlinkOperation::Replace, &self.pubsub.downlink_replace),
        ];
        let mut streams = Vec::new();
        for (operation, message) in topics {
            let Some(message) = message else {
                continue;
            };
            let prefix = join_topic(&self.pubsub.base_topic, &message.topic);
            let messages = connection.subscribe(&format!("{}/+", prefix)).await?;
            streams.push(
                messages
                    .map(move |message| DownlinkMessage {
                        operation,
                        prefix: prefix.clone(),
                        message,
                    })
                    .boxed(),
            );
        }
        if streams.is_empty() {
            return Ok(stream::pending().boxed());
        }
        Ok(stream::select_all(streams).boxed())
    }

    async fn publish_up(&self, connection: &dyn Connection, up: &ApplicationUp) {
        let Some(topic) = self.pubsub.up_topic(up.up.name()) else {
            return;
        };
        let payload = match self.format.from_up(up, &[]) {
            Ok(payload) => payload,
            Err(e) => {
                self.deps.metrics.record_drop(
                    DropCause::EncodeFail,
                    &format!("{}: {}", self.pubsub.ids.unique_id(), e),
                );
                return;
            }
        };
        if let Err(e) = connection.publish(&topic, Bytes::from(payload)).await {
            warn!(topic = %topic, error = %e, "failed to publish upstream message");
        }
    }

    async fn handle_downlink(&self, downlink: DownlinkMessage) {
        let topic = &downlink.message.topic;
        let Some(device_id) = device_id_of(&downlink.prefix, topic) else {
            warn!(topic = %topic, "downlink topic without device");
            return;
        };
        let ids = EndDeviceIdentifiers::new(
            self.pubsub.ids.application_ids.application_id.clone(),
            device_id,
        );
        if let Err(e) = ids.validate() {
            warn!(topic = %topic, error = %e, "invalid device in downlink topic");
            return;
        }
        let downlinks = match self.format.to_downlinks(&downlink.message.payload) {
            Ok(downlinks) => downlinks,
            Err(e) => {
                self.deps
                    .metrics
                    .record_drop(DropCause::DecodeFail, &format!("{}: {}", topic, e));
                return;
            }
        };

        let result = match downlink.operation {
            DownlinkOperation::Push => self.deps.queue.push(&ids, downlinks).await,
            DownlinkOperation::Replace => self.deps.queue.replace(&ids, downlinks).await,
        };
        match result {
            Ok(()) => debug!(
                device = %ids.unique_id(),
                operation = ?downlink.operation,
                "downlinks received from pub/sub"
            ),
            Err(e) => warn!(
                device = %ids.unique_id(),
                operation = ?downlink.operation,
                error = %e,
                "failed to queue pub/sub downlinks"
            ),
        }
    }
}
