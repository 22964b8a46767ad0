use std::sync::Arc;
use tonic::{Request, Response, Status};
use tracing::instrument;

use crate::domain::WebhookService;
use common::auth::{Right, RightsFetcher};
use common::grpc::{domain_error_to_status, require_rights};
use common::proto::application_webhook_registry_server::ApplicationWebhookRegistry as WebhookRegistryTrait;
use common::proto::{
    field_mask_paths, from_proto_application_ids, from_proto_webhook, from_proto_webhook_ids,
    to_proto_webhook, ApplicationWebhook, ApplicationWebhookFormats,
    ApplicationWebhookIdentifiers, ApplicationWebhooks, GetApplicationWebhookRequest,
    ListApplicationWebhooksRequest, SetApplicationWebhookRequest,
};

/// gRPC handler for the application webhook registry.
pub struct WebhookRegistryHandler {
    webhooks: Arc<WebhookService>,
    rights: Arc<dyn RightsFetcher>,
}

impl WebhookRegistryHandler {
    pub fn new(webhooks: Arc<WebhookService>, rights: Arc<dyn RightsFetcher>) -> Self {
        Self { webhooks, rights }
    }
}

#[tonic::async_trait]
impl WebhookRegistryTrait for WebhookRegistryHandler {
    async fn get_formats(
        &self,
        _request: Request<()>,
    ) -> Result<Response<ApplicationWebhookFormats>, Status> {
        Ok(Response::new(ApplicationWebhookFormats {
            formats: self.webhooks.formats(),
        }))
    }

    #[instrument(name = "GetWebhook", skip(self, request))]
    async fn get(
        &self,
        request: Request<GetApplicationWebhookRequest>,
    ) -> Result<Response<ApplicationWebhook>, Status> {
        let ids = from_proto_webhook_ids(request.get_ref().ids.clone())
            .map_err(domain_error_to_status)?;
        require_rights(
            self.rights.as_ref(),
            &request,
            &ids.application_ids,
            &[Right::ApplicationSettingsBasic],
        )
        .await?;

        let webhook = self
            .webhooks
            .get(&ids, &field_mask_paths(request.into_inner().field_mask))
            .await
            .map_err(domain_error_to_status)?;
        Ok(Response::new(to_proto_webhook(webhook)))
    }

    async fn list(
        &self,
        request: Request<ListApplicationWebhooksRequest>,
    ) -> Result<Response<ApplicationWebhooks>, Status> {
        let ids = from_proto_application_ids(request.get_ref().application_ids.clone())
            .map_err(domain_error_to_status)?;
        require_rights(
            self.rights.as_ref(),
            &request,
            &ids,
            &[Right::ApplicationSettingsBasic],
        )
        .await?;

        let webhooks = self
            .webhooks
            .list(&ids, &field_mask_paths(request.into_inner().field_mask))
            .await
            .map_err(domain_error_to_status)?;
        Ok(Response::new(ApplicationWebhooks {
            webhooks: webhooks.into_iter().map(to_proto_webhook).collect(),
        }))
    }

    #[instrument(name = "SetWebhook", skip(self, request))]
    async fn set(
        &self,
        request: Request<SetApplicationWebhookRequest>,
    ) -> Result<Response<ApplicationWebhook>, Status> {
        let webhook = from_proto_webhook(request.get_ref().webhook.clone().unwrap_or_default())
            .map_err(domain_error_to_status)?;
        let mut rights = vec![Right::ApplicationSettingsBasic];
        if webhook.downlink_api_key.is_some() {
            rights.push(Right::ApplicationTrafficDownWrite);
        }
        require_rights(
            self.rights.as_ref(),
            &request,
            &webhook.ids.application_ids,
            &rights,
        )
        .await?;

        let webhook = self
            .webhooks
            .set(webhook, &field_mask_paths(request.into_inner().field_mask))
            .await
            .map_err(domain_error_to_status)?;
        Ok(Response::new(to_proto_webhook(webhook)))
    }

    #[instrument(name = "DeleteWebhook", skip(self, request))]
    async fn delete(
        &self,
        request: Request<ApplicationWebhookIdentifiers>,
    ) -> Result<Response<()>, Status> {
        let ids = from_proto_webhook_ids(Some(request.get_ref().clone()))
            .map_err(domain_error_to_status)?;
        require_rights(
            self.rights.as_ref(),
            &request,
            &ids.application_ids,
            &[Right::ApplicationSettingsBasic],
        )
        .await?;

        self.webhooks
            .delete(&ids)
            .await
            .map_err(domain_error_to_status)?;
        Ok(Response::new(()))
    }
}
