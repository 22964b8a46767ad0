use async_trait::async_trait;
use bytes::Bytes;
use common::domain::{ApplicationPubSub, DomainError, DomainResult, PubSubProvider};
use common::nats::{MessageBus, NatsClient};
use futures::stream::BoxStream;
use futures::StreamExt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::debug;

use super::{from_nats_subject, to_nats_subject, Connection, Provider, ProviderMessage};

/// Connects pub/subs to NATS servers. Topic levels become subject tokens.
pub struct NatsProvider {
    connect_timeout: Duration,
}

impl NatsProvider {
    pub fn new(connect_timeout: Duration) -> Self {
        Self { connect_timeout }
    }
}

#[async_trait]
impl Provider for NatsProvider {
    async fn connect(&self, pubsub: &ApplicationPubSub) -> DomainResult<Arc<dyn Connection>> {
        let PubSubProvider::Nats { server_url } = &pubsub.provider else {
            return Err(DomainError::InvalidArgument(
                "pub/sub is not a NATS pub/sub".to_string(),
            ));
        };
        let client = NatsClient::connect(server_url, self.connect_timeout)
            .await
            .map_err(|e| DomainError::Unavailable(format!("{:#}", e)))?;
        Ok(Arc::new(NatsConnection {
            bus: client.message_bus(),
            client: Mutex::new(Some(client)),
        }))
    }
}

pub struct NatsConnection {
    bus: Arc<dyn MessageBus>,
    client: Mutex<Option<NatsClient>>,
}

#[async_trait]
impl Connection for NatsConnection {
    async fn publish(&self, topic: &str, payload: Bytes) -> DomainResult<()> {
        self.bus
            .publish(to_nats_subject(topic), payload)
            .await
            .map_err(|e| DomainError::Unavailable(format!("{:#}", e)))
    }

    async fn subscribe(&self, filter: &str) -> DomainResult<BoxStream<'static, ProviderMessage>> {
        let subject = to_nats_subject(filter);
        debug!(subject = %subject, "subscribing to NATS subject");
        let messages = self
            .bus
            .subscribe(subject)
            .await
            .map_err(|e| DomainError::Unavailable(format!("{:#}", e)))?;
        Ok(messages
            .map(|msg| ProviderMessage {
                topic: from_nats_subject(&msg.subject),
                payload: msg.payload,
            })
            .boxed())
    }

    async fn close(&self) {
        if let Some(client) = self.client.lock().await.take() {
            client.close().await;
        }
    }
}
