use async_trait::async_trait;
use common::domain::{ApplicationIdentifiers, ApplicationUp, DomainResult};
use common::metrics::SharedMetrics;
use std::sync::Arc;
use tracing::instrument;

use super::{Distributor, SubscriberSet, Subscription};

#[derive(Debug, Clone)]
pub struct LocalDistributorConfig {
    /// Events buffered per subscriber.
    pub buffer_size: usize,
    /// Wait for slow subscribers instead of dropping them.
    pub blocking: bool,
}

impl Default for LocalDistributorConfig {
    fn default() -> Self {
        Self {
            buffer_size: 32,
            blocking: false,
        }
    }
}

/// In-process distributor. Each event goes to the subscribers of its
/// application, then to the subscribers of all applications.
pub struct LocalDistributor {
    subscribers: Arc<SubscriberSet>,
}

impl LocalDistributor {
    pub fn new(config: LocalDistributorConfig, metrics: SharedMetrics) -> Self {
        Self {
            subscribers: SubscriberSet::new(config.buffer_size, config.blocking, metrics),
        }
    }
}

#[async_trait]
impl Distributor for LocalDistributor {
    #[instrument(skip_all, fields(application_id = %up.application_id(), kind = up.up.name()))]
    async fn publish(&self, up: &ApplicationUp) -> DomainResult<()> {
        self.subscribers
            .deliver(&Some(up.application_id().to_string()), up)
            .await;
        self.subscribers.deliver(&None, up).await;
        Ok(())
    }

    async fn subscribe(
        &self,
        protocol: &str,
        ids: Option<ApplicationIdentifiers>,
    ) -> DomainResult<Subscription> {
        Ok(self.subscribers.subscribe(protocol, ids))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::domain::{ApplicationUplink, EndDeviceIdentifiers, Up};
    use common::metrics::{AsMetrics, DropCause};
    use std::time::Duration;

    fn uplink(application_id: &str, f_cnt: u32) -> ApplicationUp {
        ApplicationUp::new(
            EndDeviceIdentifiers::new(application_id, "foo-device"),
            Up::UplinkMessage(ApplicationUplink {
                f_cnt,
                ..Default::default()
            }),
        )
    }

    fn distributor(buffer_size: usize, blocking: bool) -> (LocalDistributor, SharedMetrics) {
        let metrics = AsMetrics::shared();
        let distributor = LocalDistributor::new(
            LocalDistributorConfig {
                buffer_size,
                blocking,
            },
            metrics.clone(),
        );
        (distributor, metrics)
    }

    #[tokio::test]
    async fn test_application_and_broadcast_subscribers() {
        // Arrange
        let (distributor, _) = distributor(8, false);
        let mut foo = distributor
            .subscribe("grpc", Some(ApplicationIdentifiers::new("foo-app")))
            .await
            .unwrap();
        let mut all = distributor.subscribe("webhook", None).await.unwrap();

        // Act
        distributor.publish(&uplink("bar-app", 1)).await.unwrap();
        distributor.publish(&uplink("foo-app", 2)).await.unwrap();

        // Assert
        assert_eq!(foo.recv().await.unwrap().application_id(), "foo-app");
        assert_eq!(all.recv().await.unwrap().application_id(), "bar-app");
        assert_eq!(all.recv().await.unwrap().application_id(), "foo-app");
        let nothing = tokio::time::timeout(Duration::from_millis(20), foo.recv()).await;
        assert!(nothing.is_err());
    }

    #[tokio::test]
    async fn test_dropped_subscription_is_removed() {
        let (distributor, _) = distributor(8, false);
        let ids = ApplicationIdentifiers::new("foo-app");
        let subscription = distributor.subscribe("grpc", Some(ids)).await.unwrap();
        let key = Some("foo-app".to_string());
        assert_eq!(distributor.subscribers.len(&key), 1);

        drop(subscription);

        assert_eq!(distributor.subscribers.len(&key), 0);
    }

    #[tokio::test]
    async fn test_overflowing_subscriber_is_dropped() {
        let (distributor, metrics) = distributor(1, false);
        let mut slow = distributor.subscribe("grpc", None).await.unwrap();

        distributor.publish(&uplink("foo-app", 1)).await.unwrap();
        distributor.publish(&uplink("foo-app", 2)).await.unwrap();

        assert_eq!(metrics.drops(DropCause::SubscriberOverflow), 1);
        assert!(slow.recv().await.is_some());
        assert!(slow.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_blocking_subscriber_keeps_every_event() {
        let (distributor, metrics) = distributor(1, true);
        let distributor = Arc::new(distributor);
        let mut subscription = distributor.subscribe("grpc", None).await.unwrap();

        let publisher = {
            let distributor = distributor.clone();
            tokio::spawn(async move {
                for f_cnt in 0..3 {
                    distributor.publish(&uplink("foo-app", f_cnt)).await.unwrap();
                }
            })
        };
        let mut received = Vec::new();
        for _ in 0..3 {
            let up = subscription.recv().await.unwrap();
            if let Up::UplinkMessage(msg) = up.up {
                received.push(msg.f_cnt);
            }
        }
        publisher.await.unwrap();

        assert_eq!(received, vec![0, 1, 2]);
        assert_eq!(metrics.drops(DropCause::SubscriberOverflow), 0);
    }
}
