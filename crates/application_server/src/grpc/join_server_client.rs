use async_trait::async_trait;
use common::auth::ClusterAuth;
use common::domain::{DomainError, DomainResult, KeyEnvelope};
use common::grpc::status_to_domain_error;
use common::proto::as_js_client::AsJsClient;
use common::proto::{eui_to_bytes, from_proto_key_envelope, SessionKeyRequest as ProtoSessionKeyRequest};
use tonic::transport::Channel;
use tracing::instrument;

use super::network_server_client::cluster_request;
use crate::domain::{JoinServer, SessionKeyRequest};

/// Cluster Join Server reached over the `AsJs` service.
pub struct GrpcJoinServer {
    client: AsJsClient<Channel>,
    cluster: ClusterAuth,
}

impl GrpcJoinServer {
    pub fn new(channel: Channel, cluster: ClusterAuth) -> Self {
        Self {
            client: AsJsClient::new(channel),
            cluster,
        }
    }
}

#[async_trait]
impl JoinServer for GrpcJoinServer {
    #[instrument(skip(self, request), fields(session_key_id = %hex::encode(&request.session_key_id)))]
    async fn get_app_s_key(&self, request: &SessionKeyRequest) -> DomainResult<KeyEnvelope> {
        let message = ProtoSessionKeyRequest {
            session_key_id: request.session_key_id.clone(),
            dev_eui: eui_to_bytes(request.dev_eui),
            join_eui: eui_to_bytes(request.join_eui),
        };
        let response = self
            .client
            .clone()
            .get_app_s_key(cluster_request(message, &self.cluster)?)
            .await
            .map_err(status_to_domain_error)?;

        let envelope = response
            .into_inner()
            .app_s_key
            .ok_or_else(|| DomainError::NotFound("app_s_key".to_string()))?;
        from_proto_key_envelope(envelope)
    }
}
