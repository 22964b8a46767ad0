//! Elastic worker pool with a rendezvous fast path and a bounded backing
//! queue.
//!
//! `publish` hands an item to an idle worker if one is waiting, otherwise
//! enqueues it, otherwise spawns a new worker (up to `max_workers`) and hands
//! the item to it. When all of that fails the item is dropped and
//! `ResourceExhausted` is returned.

use futures::future::BoxFuture;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, trace};

use crate::domain::{DomainError, DomainResult};

pub type WorkerHandler<T> = Arc<dyn Fn(T) -> BoxFuture<'static, ()> + Send + Sync>;

#[derive(Debug, Clone)]
pub struct WorkerPoolConfig {
    pub name: String,
    pub min_workers: usize,
    pub max_workers: usize,
    pub queue_size: usize,
    pub idle_timeout: Duration,
}

impl Default for WorkerPoolConfig {
    fn default() -> Self {
        Self {
            name: "worker_pool".to_string(),
            min_workers: 0,
            max_workers: 1024,
            queue_size: 64,
            idle_timeout: Duration::from_secs(15),
        }
    }
}

struct Receivers<T> {
    handoff: mpsc::Receiver<T>,
    queue: Option<mpsc::Receiver<T>>,
}

struct Inner<T> {
    config: WorkerPoolConfig,
    handler: WorkerHandler<T>,
    handoff_tx: mpsc::Sender<T>,
    queue_tx: Option<mpsc::Sender<T>>,
    receivers: Mutex<Receivers<T>>,
    workers: AtomicUsize,
    idle: AtomicUsize,
    token: CancellationToken,
    tracker: TaskTracker,
}

pub struct WorkerPool<T> {
    inner: Arc<Inner<T>>,
}

impl<T> Clone for WorkerPool<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

/// Releases the worker slot on every exit path, including handler panics.
struct WorkerSlot<T: Send + 'static> {
    inner: Arc<Inner<T>>,
    retired: bool,
}

impl<T: Send + 'static> Drop for WorkerSlot<T> {
    fn drop(&mut self) {
        if !self.retired {
            self.inner.workers.fetch_sub(1, Ordering::SeqCst);
        }
    }
}

impl<T: Send + 'static> WorkerPool<T> {
    /// Creates the pool and starts `min_workers` workers. Workers stop when
    /// `token` is cancelled.
    pub fn new(config: WorkerPoolConfig, handler: WorkerHandler<T>, token: CancellationToken) -> Self {
        let (handoff_tx, handoff_rx) = mpsc::channel(1);
        let (queue_tx, queue_rx) = if config.queue_size > 0 {
            let (tx, rx) = mpsc::channel(config.queue_size);
            (Some(tx), Some(rx))
        } else {
            (None, None)
        };
        let min_workers = config.min_workers.min(config.max_workers);

        let pool = Self {
            inner: Arc::new(Inner {
                config,
                handler,
                handoff_tx,
                queue_tx,
                receivers: Mutex::new(Receivers {
                    handoff: handoff_rx,
                    queue: queue_rx,
                }),
                workers: AtomicUsize::new(0),
                idle: AtomicUsize::new(0),
                token,
                tracker: TaskTracker::new(),
            }),
        };

        for _ in 0..min_workers {
            if pool.reserve_worker() {
                pool.spawn_worker(None);
            }
        }
        pool
    }

    /// Convenience constructor for async closures.
    pub fn from_fn<F, Fut>(config: WorkerPoolConfig, token: CancellationToken, f: F) -> Self
    where
        F: Fn(T) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = ()> + Send + 'static,
    {
        let handler: WorkerHandler<T> = Arc::new(move |item| Box::pin(f(item)));
        Self::new(config, handler, token)
    }

    pub fn publish(&self, item: T) -> DomainResult<()> {
        let inner = &self.inner;
        if inner.token.is_cancelled() {
            return Err(DomainError::Unavailable(format!(
                "{}: context cancelled",
                inner.config.name
            )));
        }

        let item = if inner.idle.load(Ordering::SeqCst) > 0 {
            match inner.handoff_tx.try_send(item) {
                Ok(()) => {
                    trace!(pool = %inner.config.name, "handed off to idle worker");
                    // The idle worker may have retired in the meantime.
                    if inner.workers.load(Ordering::SeqCst) == 0 && self.reserve_worker() {
                        self.spawn_worker(None);
                    }
                    return Ok(());
                }
                Err(mpsc::error::TrySendError::Full(item))
                | Err(mpsc::error::TrySendError::Closed(item)) => item,
            }
        } else {
            item
        };

        let item = match &inner.queue_tx {
            Some(queue) => match queue.try_send(item) {
                Ok(()) => {
                    if inner.workers.load(Ordering::SeqCst) == 0 && self.reserve_worker() {
                        self.spawn_worker(None);
                    }
                    return Ok(());
                }
                Err(mpsc::error::TrySendError::Full(item))
                | Err(mpsc::error::TrySendError::Closed(item)) => item,
            },
            None => item,
        };

        if self.reserve_worker() {
            self.spawn_worker(Some(item));
            return Ok(());
        }

        debug!(pool = %inner.config.name, "worker pool saturated, dropping item");
        Err(DomainError::ResourceExhausted(format!(
            "{}: worker pool full",
            inner.config.name
        )))
    }

    pub fn worker_count(&self) -> usize {
        self.inner.workers.load(Ordering::SeqCst)
    }

    /// Cancels the pool and waits for running handlers to finish.
    pub async fn shutdown(&self) {
        self.inner.token.cancel();
        self.inner.tracker.close();
        self.inner.tracker.wait().await;
    }

    fn reserve_worker(&self) -> bool {
        Self::try_reserve(&self.inner)
    }

    fn try_reserve(inner: &Inner<T>) -> bool {
        let max = inner.config.max_workers;
        inner
            .workers
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| {
                if n < max {
                    Some(n + 1)
                } else {
                    None
                }
            })
            .is_ok()
    }

    fn try_retire(inner: &Inner<T>) -> bool {
        let min = inner.config.min_workers;
        inner
            .workers
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| {
                if n > min {
                    Some(n - 1)
                } else {
                    None
                }
            })
            .is_ok()
    }

    fn spawn_worker(&self, first: Option<T>) {
        let inner = self.inner.clone();
        self.inner.tracker.spawn(async move {
            let mut slot = WorkerSlot {
                inner: inner.clone(),
                retired: false,
            };
            if let Some(item) = first {
                (inner.handler)(item).await;
            }

            loop {
                inner.idle.fetch_add(1, Ordering::SeqCst);
                let next = tokio::select! {
                    _ = inner.token.cancelled() => None,
                    next = tokio::time::timeout(inner.config.idle_timeout, Self::next_item(&inner)) => Some(next),
                };
                inner.idle.fetch_sub(1, Ordering::SeqCst);

                match next {
                    None => break,
                    Some(Ok(Some(item))) => (inner.handler)(item).await,
                    Some(Ok(None)) => break,
                    Some(Err(_elapsed)) => {
                        if Self::try_retire(&inner) {
                            // An item handed off while this worker was timing
                            // out has no other idle worker to take it.
                            if Self::handoff_pending(&inner).await && Self::try_reserve(&inner) {
                                trace!(pool = %inner.config.name, "retiring worker took late hand-off");
                                continue;
                            }
                            slot.retired = true;
                            trace!(pool = %inner.config.name, "idle worker retired");
                            break;
                        }
                    }
                }
            }
        });
    }

    async fn handoff_pending(inner: &Inner<T>) -> bool {
        !inner.receivers.lock().await.handoff.is_empty()
    }

    async fn next_item(inner: &Inner<T>) -> Option<T> {
        let mut guard = inner.receivers.lock().await;
        let Receivers { handoff, queue } = &mut *guard;
        tokio::select! {
            biased;
            item = handoff.recv() => item,
            Some(item) = recv_optional(queue) => Some(item),
        }
    }
}

async fn recv_optional<T>(rx: &mut Option<mpsc::Receiver<T>>) -> Option<T> {
    match rx {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}
