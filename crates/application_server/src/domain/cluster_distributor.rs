use async_trait::async_trait;
use bytes::Bytes;
use common::domain::{ApplicationIdentifiers, ApplicationUp, DomainError, DomainResult};
use common::metrics::SharedMetrics;
use common::nats::{set_parent_from_headers, BusMessage, MessageBus};
use common::proto::{from_proto_application_up, to_proto_application_up, ApplicationUp as ProtoUp};
use futures::stream::BoxStream;
use futures::StreamExt;
use prost::Message;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info_span, instrument, warn, Instrument};

use super::{Distributor, SetKey, SubscriberSet, Subscription};

#[derive(Debug, Clone)]
pub struct ClusterDistributorConfig {
    /// Subjects are `<prefix>.<application_id>`.
    pub subject_prefix: String,
    pub buffer_size: usize,
    pub blocking: bool,
    /// How long a bus subscription survives without local subscribers.
    pub timeout: Duration,
}

impl Default for ClusterDistributorConfig {
    fn default() -> Self {
        Self {
            subject_prefix: "as.up".to_string(),
            buffer_size: 32,
            blocking: false,
            timeout: Duration::from_secs(60),
        }
    }
}

/// Distributor spanning all Application Server instances through the
/// message bus. One bus subscription per subscribed application is shared
/// by the local subscribers of that application and torn down after the
/// set stays empty for `timeout`.
pub struct ClusterDistributor {
    bus: Arc<dyn MessageBus>,
    subscribers: Arc<SubscriberSet>,
    consumers: Arc<Mutex<HashMap<SetKey, CancellationToken>>>,
    config: ClusterDistributorConfig,
    token: CancellationToken,
}

impl ClusterDistributor {
    pub fn new(
        bus: Arc<dyn MessageBus>,
        config: ClusterDistributorConfig,
        metrics: SharedMetrics,
        token: CancellationToken,
    ) -> Self {
        Self {
            bus,
            subscribers: SubscriberSet::new(config.buffer_size, config.blocking, metrics),
            consumers: Arc::new(Mutex::new(HashMap::new())),
            config,
            token,
        }
    }

    fn subject(&self, key: &SetKey) -> String {
        match key {
            Some(application_id) => format!("{}.{}", self.config.subject_prefix, application_id),
            None => format!("{}.*", self.config.subject_prefix),
        }
    }

    async fn ensure_consumer(&self, key: SetKey) -> DomainResult<()> {
        let mut consumers = self.consumers.lock().await;
        if consumers.contains_key(&key) {
            return Ok(());
        }
        let subject = self.subject(&key);
        let messages = self
            .bus
            .subscribe(subject.clone())
            .await
            .map_err(|e| DomainError::Unavailable(format!("subscribe to {}: {}", subject, e)))?;
        let token = self.token.child_token();
        consumers.insert(key.clone(), token.clone());

        let consumer = BusConsumer {
            key,
            subscribers: self.subscribers.clone(),
            consumers: self.consumers.clone(),
            timeout: self.config.timeout,
        };
        tokio::spawn(
            consumer
                .run(messages, token)
                .instrument(info_span!("cluster_distributor_consumer", subject = %subject)),
        );
        Ok(())
    }
}

#[async_trait]
impl Distributor for ClusterDistributor {
    #[instrument(skip_all, fields(application_id = %up.application_id(), kind = up.up.name()))]
    async fn publish(&self, up: &ApplicationUp) -> DomainResult<()> {
        let subject = self.subject(&Some(up.application_id().to_string()));
        let payload = to_proto_application_up(up.clone()).encode_to_vec();
        self.bus
            .publish(subject, Bytes::from(payload))
            .await
            .map_err(|e| DomainError::Unavailable(format!("publish upstream event: {}", e)))
    }

    async fn subscribe(
        &self,
        protocol: &str,
        ids: Option<ApplicationIdentifiers>,
    ) -> DomainResult<Subscription> {
        let key = ids.as_ref().map(|ids| ids.application_id.clone());
        let subscription = self.subscribers.subscribe(protocol, ids);
        self.ensure_consumer(key).await?;
        Ok(subscription)
    }
}

struct BusConsumer {
    key: SetKey,
    subscribers: Arc<SubscriberSet>,
    consumers: Arc<Mutex<HashMap<SetKey, CancellationToken>>>,
    timeout: Duration,
}

impl BusConsumer {
    async fn run(self, mut messages: BoxStream<'static, BusMessage>, token: CancellationToken) {
        let mut check = tokio::time::interval((self.timeout / 4).max(Duration::from_millis(10)));
        let mut empty_since: Option<Instant> = None;

        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                message = messages.next() => match message {
                    Some(message) => self.deliver(message).await,
                    None => {
                        debug!("bus subscription closed");
                        break;
                    }
                },
                _ = check.tick() => {
                    if self.subscribers.len(&self.key) > 0 {
                        empty_since = None;
                        continue;
                    }
                    let since = *empty_since.get_or_insert_with(Instant::now);
                    if since.elapsed() >= self.timeout && self.retire().await {
                        debug!("no subscribers left, bus subscription closed");
                        return;
                    }
                }
            }
        }
        self.consumers.lock().await.remove(&self.key);
    }

    /// Removes this consumer unless a subscriber arrived meanwhile.
    async fn retire(&self) -> bool {
        let mut consumers = self.consumers.lock().await;
        if self.subscribers.len(&self.key) > 0 {
            return false;
        }
        consumers.remove(&self.key);
        true
    }

    async fn deliver(&self, message: BusMessage) {
        let span = info_span!("cluster_up", subject = %message.subject);
        set_parent_from_headers(&span, message.headers.as_ref());
        let up = ProtoUp::decode(message.payload.as_ref())
            .map_err(|e| DomainError::InvalidArgument(e.to_string()))
            .and_then(from_proto_application_up);
        match up {
            Ok(up) => self.subscribers.deliver(&self.key, &up).instrument(span).await,
            Err(e) => warn!(subject = %message.subject, error = %e, "dropping undecodable upstream event"),
        }
    }
}
