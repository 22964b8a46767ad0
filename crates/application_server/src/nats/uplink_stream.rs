use common::metrics::{DropCause, SharedMetrics};
use common::nats::{
    ConsumerConfig, JetStreamConsumer, ProtobufHandler, ProtobufService, StreamConsumer,
};
use common::proto::{from_proto_application_up, NsAsHandleUplinkRequest};
use common::workerpool::{WorkerPool, WorkerPoolConfig};
use std::sync::Arc;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::domain::UpstreamHandler;

/// A batch of Network Server traffic waiting for an uplink worker. `done`
/// fires once every message of the batch has been handled.
pub struct UplinkBatch {
    pub request: NsAsHandleUplinkRequest,
    pub done: oneshot::Sender<()>,
}

/// Worker pool handling uplink batches in message order.
pub fn uplink_pool(
    upstream: UpstreamHandler,
    metrics: SharedMetrics,
    config: WorkerPoolConfig,
    token: CancellationToken,
) -> WorkerPool<UplinkBatch> {
    WorkerPool::from_fn(config, token, move |batch: UplinkBatch| {
        let upstream = upstream.clone();
        let metrics = metrics.clone();
        async move {
            for up in batch.request.application_ups {
                match from_proto_application_up(up) {
                    Ok(up) => upstream.handle(up).await,
                    Err(e) => metrics.record_drop(DropCause::DecodeFail, &e.to_string()),
                }
            }
            let _ = batch.done.send(());
        }
    })
}

/// Consumer service feeding decoded batches to `pool`. A saturated pool
/// naks the message so JetStream redelivers it later.
pub fn uplink_batch_service(
    pool: WorkerPool<UplinkBatch>,
    metrics: SharedMetrics,
) -> ProtobufService<NsAsHandleUplinkRequest> {
    let handler: ProtobufHandler<NsAsHandleUplinkRequest> = Arc::new(move |request| {
        let pool = pool.clone();
        let metrics = metrics.clone();
        Box::pin(async move {
            let count = request.application_ups.len();
            let (done, handled) = oneshot::channel();
            if let Err(e) = pool.publish(UplinkBatch { request, done }) {
                metrics.record_drop(DropCause::PoolFull, &e.to_string());
                return Err(e.into());
            }
            handled
                .await
                .map_err(|_| anyhow::anyhow!("uplink worker stopped before handling batch"))?;
            debug!(count = count, "uplink batch handled");
            Ok(())
        })
    });
    ProtobufService::new(handler)
}

/// JetStream consumer for the uplinks the Network Server publishes to the
/// bus instead of calling `NsAs.HandleUplink`.
pub struct NsUplinkStream {
    jetstream: Arc<dyn JetStreamConsumer>,
    consumer_config: ConsumerConfig,
    pool_config: WorkerPoolConfig,
    upstream: UpstreamHandler,
    metrics: SharedMetrics,
}

impl NsUplinkStream {
    pub fn new(
        jetstream: Arc<dyn JetStreamConsumer>,
        consumer_config: ConsumerConfig,
        pool_config: WorkerPoolConfig,
        upstream: UpstreamHandler,
        metrics: SharedMetrics,
    ) -> Self {
        Self {
            jetstream,
            consumer_config,
            pool_config,
            upstream,
            metrics,
        }
    }

    pub async fn run(self, ctx: CancellationToken) -> anyhow::Result<()> {
        let pool = uplink_pool(
            self.upstream,
            self.metrics.clone(),
            self.pool_config,
            ctx.child_token(),
        );
        let service = uplink_batch_service(pool.clone(), self.metrics);
        let consumer = StreamConsumer::new(self.jetstream, self.consumer_config, service).await?;
        info!("network server uplink stream started");

        let result = consumer.run(ctx).await;
        pool.shutdown().await;
        if let Err(e) = &result {
            warn!(error = %e, "network server uplink stream stopped with error");
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use common::metrics::AsMetrics;
    use common::nats::{ConsumeRequest, ConsumeResponse};
    use prost::Message;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tower::Service;

    fn request(message: NsAsHandleUplinkRequest) -> ConsumeRequest {
        ConsumeRequest::new("as.uplinks", Bytes::from(message.encode_to_vec()), None)
    }

    #[tokio::test]
    async fn test_batch_acked_after_handling() {
        // Arrange
        let handled = Arc::new(AtomicUsize::new(0));
        let counter = handled.clone();
        let pool = WorkerPool::from_fn(
            WorkerPoolConfig::default(),
            CancellationToken::new(),
            move |batch: UplinkBatch| {
                let counter = counter.clone();
                async move {
                    tokio::time::sleep(Duration::from_millis(10)).await;
                    counter.fetch_add(1, Ordering::SeqCst);
                    let _ = batch.done.send(());
                }
            },
        );
        let mut service = uplink_batch_service(pool, AsMetrics::shared());

        // Act
        let response = service
            .call(request(NsAsHandleUplinkRequest::default()))
            .await
            .unwrap();

        // Assert
        assert_eq!(response, ConsumeResponse::Ack);
        assert_eq!(handled.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_saturated_pool_naks() {
        let config = WorkerPoolConfig {
            max_workers: 0,
            queue_size: 0,
            ..Default::default()
        };
        let pool = WorkerPool::from_fn(config, CancellationToken::new(), |batch: UplinkBatch| async move {
            let _ = batch.done.send(());
        });
        let metrics = AsMetrics::shared();
        let mut service = uplink_batch_service(pool, metrics.clone());

        let response = service
            .call(request(NsAsHandleUplinkRequest::default()))
            .await
            .unwrap();

        assert!(matches!(response, ConsumeResponse::Nak(_)));
        assert_eq!(metrics.drops(DropCause::PoolFull), 1);
    }

    #[tokio::test]
    async fn test_dropped_batch_naks() {
        let pool = WorkerPool::from_fn(
            WorkerPoolConfig::default(),
            CancellationToken::new(),
            |batch: UplinkBatch| async move { drop(batch.done) },
        );
        let mut service = uplink_batch_service(pool, AsMetrics::shared());

        let response = service
            .call(request(NsAsHandleUplinkRequest::default()))
            .await
            .unwrap();

        assert!(matches!(response, ConsumeResponse::Nak(_)));
    }
}
