use async_trait::async_trait;
use common::auth::ClusterAuth;
use common::domain::{ApplicationDownlink, DomainError, DomainResult, EndDeviceIdentifiers};
use common::grpc::status_to_domain_error;
use common::proto::as_ns_client::AsNsClient;
use common::proto::{
    from_proto_downlinks, to_proto_downlinks, to_proto_end_device_ids, DownlinkQueueRequest,
};
use std::time::Duration;
use tonic::transport::{Channel, Endpoint};
use tonic::Request;
use tracing::{debug, instrument};

use crate::domain::NetworkServer;

/// Builds a lazily connecting channel to a cluster peer.
pub fn peer_channel(address: &str, timeout: Duration) -> DomainResult<Channel> {
    let endpoint = Endpoint::from_shared(address.to_string())
        .map_err(|e| DomainError::InvalidArgument(format!("invalid peer address `{}`: {}", address, e)))?
        .timeout(timeout);
    Ok(endpoint.connect_lazy())
}

/// Wraps `message` in a request authenticated with the cluster key.
pub(crate) fn cluster_request<T>(message: T, cluster: &ClusterAuth) -> DomainResult<Request<T>> {
    let mut request = Request::new(message);
    if let Some(header) = cluster.header() {
        let value = header
            .parse()
            .map_err(|_| DomainError::Internal(anyhow::anyhow!("invalid cluster key header")))?;
        request.metadata_mut().insert("authorization", value);
    }
    Ok(request)
}

/// Network Server reached over the cluster `AsNs` service.
pub struct GrpcNetworkServer {
    client: AsNsClient<Channel>,
    cluster: ClusterAuth,
}

impl GrpcNetworkServer {
    pub fn new(channel: Channel, cluster: ClusterAuth) -> Self {
        Self {
            client: AsNsClient::new(channel),
            cluster,
        }
    }

    fn queue_request(
        &self,
        ids: &EndDeviceIdentifiers,
        downlinks: Vec<ApplicationDownlink>,
    ) -> DomainResult<Request<DownlinkQueueRequest>> {
        cluster_request(
            DownlinkQueueRequest {
                end_device_ids: Some(to_proto_end_device_ids(ids.clone())),
                downlinks: to_proto_downlinks(downlinks),
            },
            &self.cluster,
        )
    }
}

#[async_trait]
impl NetworkServer for GrpcNetworkServer {
    #[instrument(skip(self, downlinks), fields(device = %ids.unique_id(), count = downlinks.len()))]
    async fn downlink_queue_push(
        &self,
        ids: &EndDeviceIdentifiers,
        downlinks: Vec<ApplicationDownlink>,
    ) -> DomainResult<()> {
        let request = self.queue_request(ids, downlinks)?;
        self.client
            .clone()
            .downlink_queue_push(request)
            .await
            .map_err(status_to_domain_error)?;
        debug!("downlinks pushed to network server");
        Ok(())
    }

    #[instrument(skip(self, downlinks), fields(device = %ids.unique_id(), count = downlinks.len()))]
    async fn downlink_queue_replace(
        &self,
        ids: &EndDeviceIdentifiers,
        downlinks: Vec<ApplicationDownlink>,
    ) -> DomainResult<()> {
        let request = self.queue_request(ids, downlinks)?;
        self.client
            .clone()
            .downlink_queue_replace(request)
            .await
            .map_err(status_to_domain_error)?;
        debug!("downlink queue replaced on network server");
        Ok(())
    }

    #[instrument(skip(self), fields(device = %ids.unique_id()))]
    async fn downlink_queue_list(
        &self,
        ids: &EndDeviceIdentifiers,
    ) -> DomainResult<Vec<ApplicationDownlink>> {
        let request = cluster_request(to_proto_end_device_ids(ids.clone()), &self.cluster)?;
        let response = self
            .client
            .clone()
            .downlink_queue_list(request)
            .await
            .map_err(status_to_domain_error)?;
        from_proto_downlinks(response.into_inner().downlinks)
    }
}
