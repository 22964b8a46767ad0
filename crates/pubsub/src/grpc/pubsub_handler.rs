use std::sync::Arc;
use tonic::{Request, Response, Status};
use tracing::instrument;

use crate::domain::PubSubService;
use common::auth::{Right, RightsFetcher};
use common::grpc::{domain_error_to_status, require_rights};
use common::proto::application_pub_sub_registry_server::ApplicationPubSubRegistry as PubSubRegistryTrait;
use common::proto::{
    field_mask_paths, from_proto_application_ids, from_proto_pubsub, from_proto_pubsub_ids,
    to_proto_pubsub, ApplicationPubSub, ApplicationPubSubFormats, ApplicationPubSubIdentifiers,
    ApplicationPubSubs, GetApplicationPubSubRequest, ListApplicationPubSubsRequest,
    SetApplicationPubSubRequest,
};

/// gRPC handler for the application pub/sub registry.
pub struct PubSubRegistryHandler {
    pubsubs: Arc<PubSubService>,
    rights: Arc<dyn RightsFetcher>,
}

impl PubSubRegistryHandler {
    pub fn new(pubsubs: Arc<PubSubService>, rights: Arc<dyn RightsFetcher>) -> Self {
        Self { pubsubs, rights }
    }
}

#[tonic::async_trait]
impl PubSubRegistryTrait for PubSubRegistryHandler {
    async fn get_formats(
        &self,
        _request: Request<()>,
    ) -> Result<Response<ApplicationPubSubFormats>, Status> {
        Ok(Response::new(ApplicationPubSubFormats {
            formats: self.pubsubs.formats(),
        }))
    }

    #[instrument(name = "GetPubSub", skip(self, request))]
    async fn get(
        &self,
        request: Request<GetApplicationPubSubRequest>,
    ) -> Result<Response<ApplicationPubSub>, Status> {
        let ids =
            from_proto_pubsub_ids(request.get_ref().ids.clone()).map_err(domain_error_to_status)?;
        require_rights(
            self.rights.as_ref(),
            &request,
            &ids.application_ids,
            &[Right::ApplicationSettingsBasic],
        )
        .await?;

        let pubsub = self
            .pubsubs
            .get(&ids, &field_mask_paths(request.into_inner().field_mask))
            .await
            .map_err(domain_error_to_status)?;
        Ok(Response::new(to_proto_pubsub(pubsub)))
    }

    async fn list(
        &self,
        request: Request<ListApplicationPubSubsRequest>,
    ) -> Result<Response<ApplicationPubSubs>, Status> {
        let ids = from_proto_application_ids(request.get_ref().application_ids.clone())
            .map_err(domain_error_to_status)?;
        require_rights(
            self.rights.as_ref(),
            &request,
            &ids,
            &[Right::ApplicationSettingsBasic],
        )
        .await?;

        let pubsubs = self
            .pubsubs
            .list(&ids, &field_mask_paths(request.into_inner().field_mask))
            .await
            .map_err(domain_error_to_status)?;
        Ok(Response::new(ApplicationPubSubs {
            pubsubs: pubsubs.into_iter().map(to_proto_pubsub).collect(),
        }))
    }

    #[instrument(name = "SetPubSub", skip(self, request))]
    async fn set(
        &self,
        request: Request<SetApplicationPubSubRequest>,
    ) -> Result<Response<ApplicationPubSub>, Status> {
        let pubsub = from_proto_pubsub(request.get_ref().pubsub.clone().unwrap_or_default())
            .map_err(domain_error_to_status)?;
        let mut rights = vec![Right::ApplicationSettingsBasic];
        if pubsub.downlink_push.is_some() || pubsub.downlink_replace.is_some() {
            rights.push(Right::ApplicationTrafficDownWrite);
        }
        require_rights(
            self.rights.as_ref(),
            &request,
            &pubsub.ids.application_ids,
            &rights,
        )
        .await?;

        let pubsub = self
            .pubsubs
            .set(pubsub, &field_mask_paths(request.into_inner().field_mask))
            .await
            .map_err(domain_error_to_status)?;
        Ok(Response::new(to_proto_pubsub(pubsub)))
    }

    #[instrument(name = "DeletePubSub", skip(self, request))]
    async fn delete(
        &self,
        request: Request<ApplicationPubSubIdentifiers>,
    ) -> Result<Response<()>, Status> {
        let ids = from_proto_pubsub_ids(Some(request.get_ref().clone()))
            .map_err(domain_error_to_status)?;
        require_rights(
            self.rights.as_ref(),
            &request,
            &ids.application_ids,
            &[Right::ApplicationSettingsBasic],
        )
        .await?;

        self.pubsubs
            .delete(&ids)
            .await
            .map_err(domain_error_to_status)?;
        Ok(Response::new(()))
    }
}
