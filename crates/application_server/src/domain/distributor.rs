use async_trait::async_trait;
use common::domain::{ApplicationIdentifiers, ApplicationUp, DomainResult};
use common::metrics::{DropCause, SharedMetrics};
use dashmap::DashMap;
use futures::stream::{self, BoxStream};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Fans application upstream events out to subscribers.
#[async_trait]
pub trait Distributor: Send + Sync {
    async fn publish(&self, up: &ApplicationUp) -> DomainResult<()>;

    /// Subscribes to one application, or to all applications when `ids` is
    /// `None`. Dropping the subscription unsubscribes.
    async fn subscribe(
        &self,
        protocol: &str,
        ids: Option<ApplicationIdentifiers>,
    ) -> DomainResult<Subscription>;
}

/// Subscriber set key: the application ID, `None` for all applications.
pub(crate) type SetKey = Option<String>;

struct Subscriber {
    id: u64,
    protocol: String,
    tx: mpsc::Sender<ApplicationUp>,
}

/// Subscribers grouped by application.
pub(crate) struct SubscriberSet {
    next_id: AtomicU64,
    sets: DashMap<SetKey, Vec<Subscriber>>,
    buffer_size: usize,
    blocking: bool,
    metrics: SharedMetrics,
}

impl SubscriberSet {
    pub(crate) fn new(buffer_size: usize, blocking: bool, metrics: SharedMetrics) -> Arc<Self> {
        Arc::new(Self {
            next_id: AtomicU64::new(1),
            sets: DashMap::new(),
            buffer_size: buffer_size.max(1),
            blocking,
            metrics,
        })
    }

    pub(crate) fn subscribe(
        self: &Arc<Self>,
        protocol: &str,
        ids: Option<ApplicationIdentifiers>,
    ) -> Subscription {
        let key = ids.as_ref().map(|ids| ids.application_id.clone());
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::channel(self.buffer_size);
        self.sets.entry(key.clone()).or_default().push(Subscriber {
            id,
            protocol: protocol.to_string(),
            tx,
        });
        debug!(protocol = %protocol, application_id = ?key, "subscribed");
        Subscription {
            protocol: protocol.to_string(),
            ids,
            rx,
            _guard: SubscriptionGuard {
                set: self.clone(),
                key,
                id,
            },
        }
    }

    pub(crate) fn len(&self, key: &SetKey) -> usize {
        self.sets.get(key).map_or(0, |s| s.len())
    }

    fn remove(&self, key: &SetKey, id: u64) {
        if let Some(mut subscribers) = self.sets.get_mut(key) {
            subscribers.retain(|s| s.id != id);
        }
        self.sets.remove_if(key, |_, subscribers| subscribers.is_empty());
    }

    /// Delivers to the subscribers under `key`. A non-blocking set drops
    /// subscribers whose buffer is full.
    pub(crate) async fn deliver(&self, key: &SetKey, up: &ApplicationUp) {
        let targets: Vec<(u64, String, mpsc::Sender<ApplicationUp>)> = match self.sets.get(key) {
            Some(subscribers) => subscribers
                .iter()
                .map(|s| (s.id, s.protocol.clone(), s.tx.clone()))
                .collect(),
            None => return,
        };

        for (id, protocol, tx) in targets {
            let delivered = if self.blocking {
                tx.send(up.clone()).await.is_ok()
            } else {
                match tx.try_send(up.clone()) {
                    Ok(()) => true,
                    Err(mpsc::error::TrySendError::Full(_)) => {
                        warn!(protocol = %protocol, application_id = ?key, "subscriber buffer full, dropping subscriber");
                        self.metrics
                            .record_drop(DropCause::SubscriberOverflow, &protocol);
                        false
                    }
                    Err(mpsc::error::TrySendError::Closed(_)) => false,
                }
            };
            if !delivered {
                self.remove(key, id);
            }
        }
    }
}

struct SubscriptionGuard {
    set: Arc<SubscriberSet>,
    key: SetKey,
    id: u64,
}

impl Drop for SubscriptionGuard {
    fn drop(&mut self) {
        self.set.remove(&self.key, self.id);
    }
}

/// Stream of upstream events for one subscriber.
pub struct Subscription {
    protocol: String,
    ids: Option<ApplicationIdentifiers>,
    rx: mpsc::Receiver<ApplicationUp>,
    _guard: SubscriptionGuard,
}

impl Subscription {
    pub fn protocol(&self) -> &str {
        &self.protocol
    }

    pub fn application_ids(&self) -> Option<&ApplicationIdentifiers> {
        self.ids.as_ref()
    }

    /// Next event. `None` once the subscriber was dropped by its
    /// distributor.
    pub async fn recv(&mut self) -> Option<ApplicationUp> {
        self.rx.recv().await
    }

    pub fn into_stream(self) -> BoxStream<'static, ApplicationUp> {
        Box::pin(stream::unfold(self, |mut subscription| async move {
            subscription.recv().await.map(|up| (up, subscription))
        }))
    }
}
