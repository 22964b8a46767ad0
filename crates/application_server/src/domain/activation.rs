use chrono::{DateTime, Utc};
use common::domain::{DomainResult, EndDeviceIdentifiers};
use common::metrics::{DropCause, SharedMetrics};
use common::registry::{DeviceRegistry, Mutation};
use common::workerpool::{WorkerPool, WorkerPoolConfig};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::EntityRegistry;

#[derive(Debug, Clone)]
pub struct ActivationTask {
    pub ids: EndDeviceIdentifiers,
    pub activated_at: DateTime<Utc>,
}

/// Records the first uplink of a device in both the entity registry and
/// the Application Server registry, off the uplink path.
#[derive(Clone)]
pub struct ActivationPool {
    pool: WorkerPool<ActivationTask>,
    metrics: SharedMetrics,
}

impl ActivationPool {
    pub fn new(
        config: WorkerPoolConfig,
        devices: Arc<dyn DeviceRegistry>,
        entities: Arc<dyn EntityRegistry>,
        metrics: SharedMetrics,
        token: CancellationToken,
    ) -> Self {
        let pool = WorkerPool::from_fn(config, token, move |task: ActivationTask| {
            let devices = devices.clone();
            let entities = entities.clone();
            async move {
                if let Err(e) = activate(devices.as_ref(), entities.as_ref(), &task).await {
                    warn!(device = %task.ids.unique_id(), error = %e, "failed to record activation");
                }
            }
        });
        Self { pool, metrics }
    }

    /// Never blocks; the task is dropped when the pool is saturated.
    pub fn enqueue(&self, ids: EndDeviceIdentifiers, activated_at: DateTime<Utc>) {
        if let Err(e) = self.pool.publish(ActivationTask { ids, activated_at }) {
            self.metrics.record_drop(DropCause::PoolFull, &e.name());
        }
    }

    pub async fn shutdown(&self) {
        self.pool.shutdown().await;
    }
}

async fn activate(
    devices: &dyn DeviceRegistry,
    entities: &dyn EntityRegistry,
    task: &ActivationTask,
) -> DomainResult<()> {
    entities.set_activated_at(&task.ids, task.activated_at).await?;

    let activated_at = task.activated_at;
    devices
        .set(
            &task.ids,
            &["activated_at".to_string()],
            Box::new(move |stored| {
                Box::pin(async move {
                    match stored {
                        Some(mut device) if device.activated_at.is_none() => {
                            device.activated_at = Some(activated_at);
                            Ok(Mutation::Write {
                                value: device,
                                paths: vec!["activated_at".to_string()],
                            })
                        }
                        _ => Ok(Mutation::Keep),
                    }
                })
            }),
        )
        .await?;
    debug!(device = %task.ids.unique_id(), "end device activated");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::InMemoryEntityRegistry;
    use common::domain::EndDevice;
    use common::metrics::AsMetrics;
    use common::registry::InMemoryDeviceRegistry;
    use std::time::Duration;

    #[tokio::test]
    async fn test_activation_written_to_both_registries() {
        // Arrange
        let ids = EndDeviceIdentifiers::new("foo-app", "foo-device");
        let devices = Arc::new(InMemoryDeviceRegistry::default());
        let stored = EndDevice::new(ids.clone());
        devices
            .set(
                &ids,
                &[],
                Box::new(move |_| {
                    Box::pin(async move {
                        Ok(Mutation::Write {
                            value: stored,
                            paths: vec!["ids".to_string()],
                        })
                    })
                }),
            )
            .await
            .unwrap();
        let entities = Arc::new(InMemoryEntityRegistry::new());
        let pool = ActivationPool::new(
            WorkerPoolConfig {
                name: "activation".to_string(),
                ..Default::default()
            },
            devices.clone(),
            entities.clone(),
            AsMetrics::shared(),
            CancellationToken::new(),
        );
        let now = Utc::now();

        // Act
        pool.enqueue(ids.clone(), now);
        let mut device = devices.get(&ids, &[]).await.unwrap();
        for _ in 0..100 {
            if device.activated_at.is_some() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
            device = devices.get(&ids, &[]).await.unwrap();
        }

        // Assert
        assert_eq!(entities.activated_at(&ids), Some(now));
        assert_eq!(device.activated_at, Some(now));
        pool.shutdown().await;
    }

    #[tokio::test]
    async fn test_saturated_pool_records_drop() {
        let metrics = AsMetrics::shared();
        let token = CancellationToken::new();
        let pool = ActivationPool::new(
            WorkerPoolConfig {
                name: "activation".to_string(),
                min_workers: 0,
                max_workers: 0,
                queue_size: 0,
                idle_timeout: Duration::from_secs(1),
            },
            Arc::new(InMemoryDeviceRegistry::default()),
            Arc::new(InMemoryEntityRegistry::new()),
            metrics.clone(),
            token.clone(),
        );

        pool.enqueue(EndDeviceIdentifiers::new("foo-app", "foo-device"), Utc::now());

        assert_eq!(metrics.drops(DropCause::PoolFull), 1);
        token.cancel();
    }
}
