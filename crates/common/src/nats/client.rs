use crate::nats::trace_context::headers_with_trace_context;
use crate::nats::traits::{BusMessage, JetStreamConsumer, MessageBus, PullConsumer};
use anyhow::{Context, Result};
use async_nats::jetstream::{self, stream::Config as StreamConfig};
use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use futures::StreamExt;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

pub struct NatsClient {
    client: async_nats::Client,
    jetstream: jetstream::Context,
}

impl NatsClient {
    pub async fn connect(url: &str, timeout: std::time::Duration) -> Result<Self> {
        info!(url = %url, timeout_ms = timeout.as_millis(), "connecting to NATS");

        let client = async_nats::ConnectOptions::new()
            .connection_timeout(timeout)
            .connect(url)
            .await
            .with_context(|| format!("failed to connect to NATS at {}", url))?;
        let jetstream = jetstream::new(client.clone());

        info!("connected to NATS");
        Ok(Self { client, jetstream })
    }

    /// Creates the stream with the given subjects unless it already exists.
    pub async fn ensure_stream(&self, stream_name: &str, subjects: Vec<String>) -> Result<()> {
        if self.jetstream.get_stream(stream_name).await.is_ok() {
            debug!(stream = %stream_name, "stream already exists");
            return Ok(());
        }

        self.jetstream
            .create_stream(StreamConfig {
                name: stream_name.to_string(),
                subjects,
                description: Some("Application Server traffic".to_string()),
                ..Default::default()
            })
            .await
            .with_context(|| format!("failed to create stream {}", stream_name))?;
        info!(stream = %stream_name, "created stream");
        Ok(())
    }

    pub fn create_consumer_client(&self) -> Arc<dyn JetStreamConsumer> {
        Arc::new(NatsJetStreamConsumer {
            context: self.jetstream.clone(),
        })
    }

    pub fn message_bus(&self) -> Arc<dyn MessageBus> {
        Arc::new(NatsMessageBus {
            client: self.client.clone(),
        })
    }

    /// Flushes pending publishes before the connection is dropped.
    pub async fn close(self) {
        if let Err(e) = self.client.flush().await {
            warn!(error = %e, "failed to flush NATS connection");
        }
        info!("NATS connection closed");
    }
}

pub struct NatsJetStreamConsumer {
    context: jetstream::Context,
}

#[async_trait]
impl JetStreamConsumer for NatsJetStreamConsumer {
    async fn create_consumer(
        &self,
        config: jetstream::consumer::pull::Config,
        stream_name: &str,
    ) -> Result<Box<dyn PullConsumer>> {
        let consumer = self
            .context
            .create_consumer_on_stream(config, stream_name)
            .await
            .context("failed to create consumer")?;

        Ok(Box::new(NatsPullConsumer { consumer }))
    }
}

pub struct NatsPullConsumer {
    consumer: jetstream::consumer::PullConsumer,
}

#[async_trait]
impl PullConsumer for NatsPullConsumer {
    async fn fetch_messages(
        &self,
        max_messages: usize,
        expires: std::time::Duration,
    ) -> Result<Vec<jetstream::Message>> {
        let mut messages = self
            .consumer
            .fetch()
            .max_messages(max_messages)
            .expires(expires)
            .messages()
            .await
            .context("failed to fetch messages")?;

        let mut result = Vec::new();
        while let Some(msg) = messages.next().await {
            match msg {
                Ok(message) => result.push(message),
                Err(e) => warn!(error = %e, "error receiving message from batch"),
            }
        }
        Ok(result)
    }
}

pub struct NatsMessageBus {
    client: async_nats::Client,
}

#[async_trait]
impl MessageBus for NatsMessageBus {
    #[instrument(skip(self, payload), fields(subject = %subject, payload_size = payload.len()))]
    async fn publish(&self, subject: String, payload: Bytes) -> Result<()> {
        self.client
            .publish_with_headers(subject, headers_with_trace_context(), payload)
            .await
            .context("failed to publish message")?;
        Ok(())
    }

    async fn subscribe(&self, subject: String) -> Result<BoxStream<'static, BusMessage>> {
        let subscriber = self
            .client
            .subscribe(subject.clone())
            .await
            .with_context(|| format!("failed to subscribe to {}", subject))?;
        debug!(subject = %subject, "subscribed");

        Ok(subscriber
            .map(|msg| BusMessage {
                subject: msg.subject.to_string(),
                payload: msg.payload,
                headers: msg.headers,
            })
            .boxed())
    }
}
