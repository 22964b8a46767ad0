mod mqtt;
mod nats;
mod topic;

pub use mqtt::*;
pub use nats::*;
pub use topic::*;

use async_trait::async_trait;
use bytes::Bytes;
use common::domain::{ApplicationPubSub, DomainResult, PubSubProvider};
use futures::stream::BoxStream;
use std::sync::Arc;

/// Message received from a provider subscription. Topics use `/` as the
/// level separator whatever the provider.
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderMessage {
    pub topic: String,
    pub payload: Bytes,
}

/// Open connection to a pub/sub server.
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait Connection: Send + Sync {
    async fn publish(&self, topic: &str, payload: Bytes) -> DomainResult<()>;

    /// Subscribes to an MQTT style filter (`+` matches one level, `#` the
    /// remaining levels).
    async fn subscribe(&self, filter: &str) -> DomainResult<BoxStream<'static, ProviderMessage>>;

    async fn close(&self);
}

/// Opens connections for one provider kind.
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait Provider: Send + Sync {
    async fn connect(&self, pubsub: &ApplicationPubSub) -> DomainResult<Arc<dyn Connection>>;
}

/// Provider per kind of [`PubSubProvider`].
#[derive(Clone)]
pub struct Providers {
    pub nats: Arc<dyn Provider>,
    pub mqtt: Arc<dyn Provider>,
}

impl Providers {
    pub fn new(config: ProviderConfig) -> Self {
        Self {
            nats: Arc::new(NatsProvider::new(config.connect_timeout)),
            mqtt: Arc::new(MqttProvider::new(config.connect_timeout)),
        }
    }

    pub async fn connect(&self, pubsub: &ApplicationPubSub) -> DomainResult<Arc<dyn Connection>> {
        match &pubsub.provider {
            PubSubProvider::Nats { .. } => self.nats.connect(pubsub).await,
            PubSubProvider::Mqtt { .. } => self.mqtt.connect(pubsub).await,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ProviderConfig {
    pub connect_timeout: std::time::Duration,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            connect_timeout: std::time::Duration::from_secs(10),
        }
    }
}
