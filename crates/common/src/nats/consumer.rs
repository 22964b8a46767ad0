use crate::nats::{JetStreamConsumer, PullConsumer};
use anyhow::{Context, Result};
use async_nats::jetstream;
use async_nats::HeaderMap;
use bytes::Bytes;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tower::{Service, ServiceExt};
use tracing::{debug, error, info, warn};

/// Owned copy of a JetStream message handed to a consumer service.
#[derive(Debug, Clone)]
pub struct ConsumeRequest {
    pub subject: String,
    pub payload: Bytes,
    pub headers: Option<HeaderMap>,
}

impl ConsumeRequest {
    pub fn new(subject: impl Into<String>, payload: Bytes, headers: Option<HeaderMap>) -> Self {
        Self {
            subject: subject.into(),
            payload,
            headers,
        }
    }
}

/// Acknowledgement decision for one message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsumeResponse {
    Ack,
    /// Redeliver, with a reason for the logs.
    Nak(String),
}

impl ConsumeResponse {
    pub fn nak(reason: impl Into<String>) -> Self {
        Self::Nak(reason.into())
    }
}

/// Settings of a durable pull consumer.
#[derive(Debug, Clone)]
pub struct ConsumerConfig {
    pub stream_name: String,
    pub consumer_name: String,
    pub subject_filter: String,
    pub batch_size: usize,
    pub max_wait: Duration,
}

/// Durable JetStream consumer feeding messages one at a time through a
/// tower service. Messages of a batch are handled in order.
pub struct StreamConsumer<S> {
    consumer: Box<dyn PullConsumer>,
    config: ConsumerConfig,
    service: S,
}

impl<S> StreamConsumer<S>
where
    S: Service<ConsumeRequest, Response = ConsumeResponse, Error = anyhow::Error>
        + Send
        + 'static,
    S::Future: Send + 'static,
{
    pub async fn new(
        jetstream: Arc<dyn JetStreamConsumer>,
        config: ConsumerConfig,
        service: S,
    ) -> Result<Self> {
        debug!(
            stream = %config.stream_name,
            consumer = %config.consumer_name,
            filter_subject = %config.subject_filter,
            "creating stream consumer"
        );

        let consumer = jetstream
            .create_consumer(
                jetstream::consumer::pull::Config {
                    name: Some(config.consumer_name.clone()),
                    durable_name: Some(config.consumer_name.clone()),
                    filter_subject: config.subject_filter.clone(),
                    ack_policy: jetstream::consumer::AckPolicy::Explicit,
                    ..Default::default()
                },
                &config.stream_name,
            )
            .await
            .context("failed to create consumer")?;

        Ok(Self {
            consumer,
            config,
            service,
        })
    }

    pub async fn run(mut self, ctx: CancellationToken) -> Result<()> {
        info!(
            stream = %self.config.stream_name,
            consumer = %self.config.consumer_name,
            "starting stream consumer"
        );

        loop {
            tokio::select! {
                _ = ctx.cancelled() => break,
                result = self.fetch_and_process_batch() => {
                    if let Err(e) = result {
                        error!(
                            stream = %self.config.stream_name,
                            consumer = %self.config.consumer_name,
                            error = %e,
                            "error processing batch"
                        );
                        tokio::time::sleep(Duration::from_secs(1)).await;
                    }
                }
            }
        }

        info!(consumer = %self.config.consumer_name, "stream consumer stopped");
        Ok(())
    }

    /// Returns the decisions taken for the fetched batch.
    async fn fetch_and_process_batch(&mut self) -> Result<Vec<ConsumeResponse>> {
        let messages = self
            .consumer
            .fetch_messages(self.config.batch_size, self.config.max_wait)
            .await?;
        if messages.is_empty() {
            return Ok(Vec::new());
        }
        debug!(message_count = messages.len(), "received message batch");

        let mut decisions = Vec::with_capacity(messages.len());
        for msg in &messages {
            let request = ConsumeRequest::new(
                msg.subject.to_string(),
                msg.payload.clone(),
                msg.headers.clone(),
            );
            let response = match self.service.ready().await {
                Ok(service) => service.call(request).await,
                Err(e) => Err(e),
            }
            .unwrap_or_else(|e| ConsumeResponse::nak(e.to_string()));

            let acked = match &response {
                ConsumeResponse::Ack => msg.ack().await,
                ConsumeResponse::Nak(reason) => {
                    warn!(subject = %msg.subject, reason = %reason, "rejecting message");
                    msg.ack_with(jetstream::AckKind::Nak(None)).await
                }
            };
            if let Err(e) = acked {
                error!(subject = %msg.subject, error = %e, "failed to settle message");
            }
            decisions.push(response);
        }
        Ok(decisions)
    }
}
