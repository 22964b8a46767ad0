use anyhow::Result;
use async_nats::{jetstream, HeaderMap};
use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;

/// Creates durable pull consumers on a JetStream stream.
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait JetStreamConsumer: Send + Sync {
    async fn create_consumer(
        &self,
        config: jetstream::consumer::pull::Config,
        stream_name: &str,
    ) -> Result<Box<dyn PullConsumer>>;
}

/// Fetches batches from a pull consumer.
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait PullConsumer: Send + Sync {
    /// Returns up to `max_messages`, waiting at most `expires`.
    async fn fetch_messages(
        &self,
        max_messages: usize,
        expires: std::time::Duration,
    ) -> Result<Vec<jetstream::Message>>;
}

/// Message received from a core NATS subscription.
#[derive(Debug, Clone)]
pub struct BusMessage {
    pub subject: String,
    pub payload: Bytes,
    pub headers: Option<HeaderMap>,
}

/// Core NATS publish/subscribe used for cluster fan-out and pub/sub
/// integrations. Delivery follows core NATS semantics.
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait MessageBus: Send + Sync {
    /// Publishes with the current trace context in the headers.
    async fn publish(&self, subject: String, payload: Bytes) -> Result<()>;

    /// Subscribes to `subject` (wildcards allowed). Dropping the stream
    /// unsubscribes.
    async fn subscribe(&self, subject: String) -> Result<BoxStream<'static, BusMessage>>;
}
