//! In-memory provider used by integration tests.

use async_trait::async_trait;
use bytes::Bytes;
use common::domain::{ApplicationPubSub, DomainResult};
use futures::stream::BoxStream;
use futures::StreamExt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;

use crate::provider::{topic_matches, Connection, Provider, ProviderMessage};

/// Broker shared by every connection the provider opens.
pub struct InMemoryBroker {
    tx: broadcast::Sender<ProviderMessage>,
    published: Mutex<Vec<ProviderMessage>>,
    connections: AtomicUsize,
    closed: AtomicUsize,
}

impl InMemoryBroker {
    pub fn new() -> Arc<Self> {
        let (tx, _) = broadcast::channel(256);
        Arc::new(Self {
            tx,
            published: Mutex::new(Vec::new()),
            connections: AtomicUsize::new(0),
            closed: AtomicUsize::new(0),
        })
    }

    /// Messages published through any connection, in order.
    pub fn published(&self) -> Vec<ProviderMessage> {
        self.published
            .lock()
            .map(|p| p.clone())
            .unwrap_or_default()
    }

    /// Publishes as an external client would.
    pub fn inject(&self, topic: &str, payload: impl Into<Bytes>) {
        let _ = self.tx.send(ProviderMessage {
            topic: topic.to_string(),
            payload: payload.into(),
        });
    }

    /// Number of active subscriptions.
    pub fn subscriptions(&self) -> usize {
        self.tx.receiver_count()
    }

    pub fn connections(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }

    pub fn closed(&self) -> usize {
        self.closed.load(Ordering::SeqCst)
    }
}

pub struct InMemoryProvider {
    broker: Arc<InMemoryBroker>,
}

impl InMemoryProvider {
    pub fn new(broker: Arc<InMemoryBroker>) -> Self {
        Self { broker }
    }
}

#[async_trait]
impl Provider for InMemoryProvider {
    async fn connect(&self, _pubsub: &ApplicationPubSub) -> DomainResult<Arc<dyn Connection>> {
        self.broker.connections.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(InMemoryConnection {
            broker: self.broker.clone(),
        }))
    }
}

struct InMemoryConnection {
    broker: Arc<InMemoryBroker>,
}

#[async_trait]
impl Connection for InMemoryConnection {
    async fn publish(&self, topic: &str, payload: Bytes) -> DomainResult<()> {
        let message = ProviderMessage {
            topic: topic.to_string(),
            payload,
        };
        if let Ok(mut published) = self.broker.published.lock() {
            published.push(message.clone());
        }
        let _ = self.broker.tx.send(message);
        Ok(())
    }

    async fn subscribe(&self, filter: &str) -> DomainResult<BoxStream<'static, ProviderMessage>> {
        let filter = filter.to_string();
        Ok(BroadcastStream::new(self.broker.tx.subscribe())
            .filter_map(move |message| {
                let matched = message.ok().filter(|m| topic_matches(&filter, &m.topic));
                async move { matched }
            })
            .boxed())
    }

    async fn close(&self) {
        self.broker.closed.fetch_add(1, Ordering::SeqCst);
    }
}
