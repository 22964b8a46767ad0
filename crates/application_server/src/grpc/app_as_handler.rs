use futures::{Stream, StreamExt};
use std::pin::Pin;
use std::sync::Arc;
use tonic::{Request, Response, Status};
use tracing::{debug, instrument};

use common::auth::{Right, RightsFetcher};
use common::domain::{
    ApplicationDownlink as DomainDownlink, EndDeviceIdentifiers as DomainDeviceIds,
};
use common::grpc::{domain_error_to_status, require_rights};
use common::proto::app_as_server::AppAs as AppAsTrait;
use common::proto::{
    from_proto_application_ids, from_proto_downlinks, from_proto_end_device_ids,
    to_proto_application_up, to_proto_downlinks, ApplicationDownlinks, ApplicationIdentifiers,
    ApplicationUp, DownlinkQueueRequest, EndDeviceIdentifiers,
};

use crate::domain::{Distributor, DownlinkQueueService};

pub const GRPC_SUBSCRIPTION_PROTOCOL: &str = "grpc";

/// gRPC handler for applications: upstream subscriptions and the downlink
/// queue.
pub struct AppAsHandler {
    queue: DownlinkQueueService,
    distributor: Arc<dyn Distributor>,
    rights: Arc<dyn RightsFetcher>,
}

impl AppAsHandler {
    pub fn new(
        queue: DownlinkQueueService,
        distributor: Arc<dyn Distributor>,
        rights: Arc<dyn RightsFetcher>,
    ) -> Self {
        Self {
            queue,
            distributor,
            rights,
        }
    }

    async fn queue_request(
        &self,
        request: Request<DownlinkQueueRequest>,
    ) -> Result<(DomainDeviceIds, Vec<DomainDownlink>), Status> {
        let ids = from_proto_end_device_ids(request.get_ref().end_device_ids.clone())
            .map_err(domain_error_to_status)?;
        require_rights(
            self.rights.as_ref(),
            &request,
            &ids.application_ids,
            &[Right::ApplicationTrafficDownWrite],
        )
        .await?;
        let downlinks =
            from_proto_downlinks(request.into_inner().downlinks).map_err(domain_error_to_status)?;
        Ok((ids, downlinks))
    }
}

#[tonic::async_trait]
impl AppAsTrait for AppAsHandler {
    type SubscribeStream = Pin<Box<dyn Stream<Item = Result<ApplicationUp, Status>> + Send>>;

    #[instrument(name = "Subscribe", skip(self, request), fields(application_id = %request.get_ref().application_id))]
    async fn subscribe(
        &self,
        request: Request<ApplicationIdentifiers>,
    ) -> Result<Response<Self::SubscribeStream>, Status> {
        let ids = from_proto_application_ids(Some(request.get_ref().clone()))
            .map_err(domain_error_to_status)?;
        require_rights(
            self.rights.as_ref(),
            &request,
            &ids,
            &[Right::ApplicationTrafficRead],
        )
        .await?;

        let subscription = self
            .distributor
            .subscribe(GRPC_SUBSCRIPTION_PROTOCOL, Some(ids))
            .await
            .map_err(domain_error_to_status)?;
        debug!("application subscribed");

        let stream = subscription
            .into_stream()
            .map(|up| Ok(to_proto_application_up(up)));
        Ok(Response::new(Box::pin(stream)))
    }

    #[instrument(name = "DownlinkQueuePush", skip(self, request))]
    async fn downlink_queue_push(
        &self,
        request: Request<DownlinkQueueRequest>,
    ) -> Result<Response<()>, Status> {
        let (ids, downlinks) = self.queue_request(request).await?;
        self.queue
            .push(&ids, downlinks)
            .await
            .map_err(domain_error_to_status)?;
        Ok(Response::new(()))
    }

    #[instrument(name = "DownlinkQueueReplace", skip(self, request))]
    async fn downlink_queue_replace(
        &self,
        request: Request<DownlinkQueueRequest>,
    ) -> Result<Response<()>, Status> {
        let (ids, downlinks) = self.queue_request(request).await?;
        self.queue
            .replace(&ids, downlinks)
            .await
            .map_err(domain_error_to_status)?;
        Ok(Response::new(()))
    }

    #[instrument(name = "DownlinkQueueList", skip(self, request))]
    async fn downlink_queue_list(
        &self,
        request: Request<EndDeviceIdentifiers>,
    ) -> Result<Response<ApplicationDownlinks>, Status> {
        let ids = from_proto_end_device_ids(Some(request.get_ref().clone()))
            .map_err(domain_error_to_status)?;
        require_rights(
            self.rights.as_ref(),
            &request,
            &ids.application_ids,
            &[Right::ApplicationTrafficRead],
        )
        .await?;

        let downlinks = self
            .queue
            .list(&ids)
            .await
            .map_err(domain_error_to_status)?;

        Ok(Response::new(ApplicationDownlinks {
            downlinks: to_proto_downlinks(downlinks),
        }))
    }
}
