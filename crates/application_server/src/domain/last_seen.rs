use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::domain::{DomainResult, EndDeviceIdentifiers};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::{EntityRegistry, LastSeenUpdate};

/// Reports when devices were last heard from.
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait LastSeenProvider: Send + Sync {
    async fn push(&self, ids: &EndDeviceIdentifiers, last_seen_at: DateTime<Utc>)
        -> DomainResult<()>;
}

#[derive(Debug, Clone)]
pub struct LastSeenConfig {
    /// Devices buffered before a batch is sent. Zero sends every update
    /// right away.
    pub batch_size: usize,
    /// Zero disables last-seen reporting.
    pub flush_interval: Duration,
}

impl Default for LastSeenConfig {
    fn default() -> Self {
        Self {
            batch_size: 1000,
            flush_interval: Duration::from_secs(10),
        }
    }
}

/// Picks the provider matching the configuration.
pub fn last_seen_provider(
    registry: Arc<dyn EntityRegistry>,
    config: LastSeenConfig,
    token: CancellationToken,
) -> Arc<dyn LastSeenProvider> {
    if config.flush_interval.is_zero() {
        return Arc::new(NoopLastSeen);
    }
    if config.batch_size == 0 {
        return Arc::new(DirectLastSeen { registry });
    }
    BatchLastSeen::start(registry, config, token)
}

pub struct NoopLastSeen;

#[async_trait]
impl LastSeenProvider for NoopLastSeen {
    async fn push(&self, _ids: &EndDeviceIdentifiers, _last_seen_at: DateTime<Utc>) -> DomainResult<()> {
        Ok(())
    }
}

pub struct DirectLastSeen {
    registry: Arc<dyn EntityRegistry>,
}

#[async_trait]
impl LastSeenProvider for DirectLastSeen {
    async fn push(&self, ids: &EndDeviceIdentifiers, last_seen_at: DateTime<Utc>) -> DomainResult<()> {
        self.registry
            .update_last_seen(vec![LastSeenUpdate {
                ids: ids.clone(),
                last_seen_at,
            }])
            .await
    }
}

/// Buffers the latest timestamp per device and sends them in batches, when
/// the buffer is full and on every tick of the flush interval.
pub struct BatchLastSeen {
    registry: Arc<dyn EntityRegistry>,
    batch_size: usize,
    buffer: Mutex<HashMap<String, LastSeenUpdate>>,
}

impl BatchLastSeen {
    pub fn start(
        registry: Arc<dyn EntityRegistry>,
        config: LastSeenConfig,
        token: CancellationToken,
    ) -> Arc<Self> {
        let batcher = Arc::new(Self {
            registry,
            batch_size: config.batch_size,
            buffer: Mutex::new(HashMap::new()),
        });

        let ticker = batcher.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(config.flush_interval);
            interval.tick().await;
            loop {
                tokio::select! {
                    _ = token.cancelled() => {
                        ticker.flush().await;
                        break;
                    }
                    _ = interval.tick() => ticker.flush().await,
                }
            }
            debug!("last seen batcher stopped");
        });

        batcher
    }

    pub async fn flush(&self) {
        let batch: Vec<LastSeenUpdate> = {
            let mut buffer = self.buffer.lock().await;
            buffer.drain().map(|(_, update)| update).collect()
        };
        if batch.is_empty() {
            return;
        }
        debug!(count = batch.len(), "flushing last seen batch");
        if let Err(e) = self.registry.update_last_seen(batch.clone()).await {
            warn!(error = %e, "failed to update last seen");
            self.restore(batch).await;
        }
    }

    /// Puts a batch that failed to send back into the buffer, keeping newer
    /// timestamps pushed in the meantime. Entries beyond the batch size are
    /// dropped.
    async fn restore(&self, batch: Vec<LastSeenUpdate>) {
        let mut buffer = self.buffer.lock().await;
        let mut dropped = 0usize;
        for update in batch {
            let key = update.ids.unique_id();
            if let Some(existing) = buffer.get_mut(&key) {
                if update.last_seen_at > existing.last_seen_at {
                    existing.last_seen_at = update.last_seen_at;
                }
            } else if buffer.len() < self.batch_size {
                buffer.insert(key, update);
            } else {
                dropped += 1;
            }
        }
        if dropped > 0 {
            warn!(dropped, "last seen buffer full, dropping updates");
        }
    }
}

#[async_trait]
impl LastSeenProvider for BatchLastSeen {
    async fn push(&self, ids: &EndDeviceIdentifiers, last_seen_at: DateTime<Utc>) -> DomainResult<()> {
        let full = {
            let mut buffer = self.buffer.lock().await;
            let key = ids.unique_id();
            if let Some(existing) = buffer.get_mut(&key) {
                if last_seen_at > existing.last_seen_at {
                    existing.last_seen_at = last_seen_at;
                }
                return Ok(());
            }
            let full = (buffer.len() >= self.batch_size)
                .then(|| buffer.drain().map(|(_, update)| update).collect::<Vec<_>>());
            buffer.insert(
                key,
                LastSeenUpdate {
                    ids: ids.clone(),
                    last_seen_at,
                },
            );
            full
        };

        if let Some(batch) = full {
            debug!(count = batch.len(), "last seen buffer full, flushing");
            if let Err(e) = self.registry.update_last_seen(batch.clone()).await {
                self.restore(batch).await;
                return Err(e);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{InMemoryEntityRegistry, MockEntityRegistry};
    use chrono::Duration as ChronoDuration;
    use common::domain::DomainError;

    fn ids(device_id: &str) -> EndDeviceIdentifiers {
        EndDeviceIdentifiers::new("foo-app", device_id)
    }

    #[tokio::test]
    async fn test_full_buffer_flushes_before_insert() {
        // Arrange
        let mut registry = MockEntityRegistry::new();
        registry
            .expect_update_last_seen()
            .withf(|updates: &Vec<LastSeenUpdate>| updates.len() == 2)
            .times(1)
            .returning(|_| Ok(()));
        let token = CancellationToken::new();
        let batcher = BatchLastSeen::start(
            Arc::new(registry),
            LastSeenConfig {
                batch_size: 2,
                flush_interval: Duration::from_secs(3600),
            },
            token.clone(),
        );
        let now = Utc::now();

        // Act
        batcher.push(&ids("foo-device"), now).await.unwrap();
        batcher.push(&ids("bar-device"), now).await.unwrap();
        batcher.push(&ids("baz-device"), now).await.unwrap();

        // Assert
        assert_eq!(batcher.buffer.lock().await.len(), 1);
    }

    #[tokio::test]
    async fn test_failed_flush_keeps_updates() {
        // Arrange
        let now = Utc::now();
        let mut registry = MockEntityRegistry::new();
        let mut seq = mockall::Sequence::new();
        registry
            .expect_update_last_seen()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Err(DomainError::Unavailable("registry down".to_string())));
        registry
            .expect_update_last_seen()
            .withf(move |updates: &Vec<LastSeenUpdate>| {
                updates.len() == 1
                    && updates[0].ids.device_id == "foo-device"
                    && updates[0].last_seen_at == now
            })
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(()));
        let batcher = BatchLastSeen::start(
            Arc::new(registry),
            LastSeenConfig {
                batch_size: 10,
                flush_interval: Duration::from_secs(3600),
            },
            CancellationToken::new(),
        );
        batcher.push(&ids("foo-device"), now).await.unwrap();

        // Act
        batcher.flush().await;
        let kept = batcher.buffer.lock().await.len();
        batcher.flush().await;

        // Assert
        assert_eq!(kept, 1);
        assert!(batcher.buffer.lock().await.is_empty());
    }

    #[tokio::test]
    async fn test_older_timestamp_is_discarded() {
        let registry = Arc::new(InMemoryEntityRegistry::new());
        let batcher = BatchLastSeen::start(
            registry.clone(),
            LastSeenConfig {
                batch_size: 10,
                flush_interval: Duration::from_secs(3600),
            },
            CancellationToken::new(),
        );
        let now = Utc::now();

        batcher.push(&ids("foo-device"), now).await.unwrap();
        batcher
            .push(&ids("foo-device"), now - ChronoDuration::seconds(10))
            .await
            .unwrap();
        batcher.flush().await;

        assert_eq!(registry.last_seen_at(&ids("foo-device")), Some(now));
    }

    #[tokio::test(start_paused = true)]
    async fn test_ticker_flushes_buffer() {
        let registry = Arc::new(InMemoryEntityRegistry::new());
        let provider = last_seen_provider(
            registry.clone(),
            LastSeenConfig {
                batch_size: 10,
                flush_interval: Duration::from_secs(5),
            },
            CancellationToken::new(),
        );
        let now = Utc::now();

        provider.push(&ids("foo-device"), now).await.unwrap();
        assert_eq!(registry.last_seen_at(&ids("foo-device")), None);
        tokio::time::sleep(Duration::from_secs(6)).await;

        assert_eq!(registry.last_seen_at(&ids("foo-device")), Some(now));
    }

    #[tokio::test]
    async fn test_zero_batch_size_updates_directly() {
        let registry = Arc::new(InMemoryEntityRegistry::new());
        let provider = last_seen_provider(
            registry.clone(),
            LastSeenConfig {
                batch_size: 0,
                flush_interval: Duration::from_secs(5),
            },
            CancellationToken::new(),
        );
        let now = Utc::now();

        provider.push(&ids("foo-device"), now).await.unwrap();

        assert_eq!(registry.last_seen_at(&ids("foo-device")), Some(now));
    }

    #[tokio::test]
    async fn test_zero_interval_is_noop() {
        let mut registry = MockEntityRegistry::new();
        registry.expect_update_last_seen().times(0);
        let provider = last_seen_provider(
            Arc::new(registry),
            LastSeenConfig {
                batch_size: 0,
                flush_interval: Duration::ZERO,
            },
            CancellationToken::new(),
        );

        provider.push(&ids("foo-device"), Utc::now()).await.unwrap();
    }
}
