use common::auth::{metadata_authorization, ClusterAuth};
use common::grpc::domain_error_to_status;
use common::metrics::{DropCause, SharedMetrics};
use common::proto::ns_as_server::NsAs as NsAsTrait;
use common::proto::NsAsHandleUplinkRequest;
use common::workerpool::WorkerPool;
use tokio::sync::oneshot;
use tonic::{Request, Response, Status};
use tracing::{debug, instrument};

use crate::nats::UplinkBatch;

/// gRPC handler for traffic pushed by the Network Server.
pub struct NsAsHandler {
    pool: WorkerPool<UplinkBatch>,
    cluster: ClusterAuth,
    metrics: SharedMetrics,
}

impl NsAsHandler {
    /// `pool` is usually built with [`crate::nats::uplink_pool`].
    pub fn new(pool: WorkerPool<UplinkBatch>, cluster: ClusterAuth, metrics: SharedMetrics) -> Self {
        Self {
            pool,
            cluster,
            metrics,
        }
    }
}

#[tonic::async_trait]
impl NsAsTrait for NsAsHandler {
    /// The batch is handed to one uplink worker, which handles its messages
    /// in the order received. A saturated pool rejects the batch with
    /// `ResourceExhausted` so the Network Server retries later.
    #[instrument(
        name = "HandleUplink",
        skip(self, request),
        fields(count = request.get_ref().application_ups.len())
    )]
    async fn handle_uplink(
        &self,
        request: Request<NsAsHandleUplinkRequest>,
    ) -> Result<Response<()>, Status> {
        self.cluster
            .verify(metadata_authorization(request.metadata()))
            .map_err(domain_error_to_status)?;

        let (done, handled) = oneshot::channel();
        let batch = UplinkBatch {
            request: request.into_inner(),
            done,
        };
        if let Err(e) = self.pool.publish(batch) {
            self.metrics.record_drop(DropCause::PoolFull, &e.to_string());
            return Err(domain_error_to_status(e));
        }
        handled
            .await
            .map_err(|_| Status::unavailable("uplink worker stopped before handling batch"))?;
        debug!("uplink batch handled");
        Ok(Response::new(()))
    }
}
