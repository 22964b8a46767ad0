use std::sync::Arc;
use tonic::{Request, Response, Status};

use crate::domain::TemplateStore;
use common::grpc::domain_error_to_status;
use common::proto::application_webhook_template_registry_server::ApplicationWebhookTemplateRegistry as TemplateRegistryTrait;
use common::proto::{
    to_proto_template, ApplicationWebhookTemplate, ApplicationWebhookTemplates,
    GetApplicationWebhookTemplateRequest, ListApplicationWebhookTemplatesRequest,
};

/// gRPC handler serving the webhook templates. Templates are public.
pub struct TemplateRegistryHandler {
    templates: Arc<TemplateStore>,
}

impl TemplateRegistryHandler {
    pub fn new(templates: Arc<TemplateStore>) -> Self {
        Self { templates }
    }
}

#[tonic::async_trait]
impl TemplateRegistryTrait for TemplateRegistryHandler {
    async fn get(
        &self,
        request: Request<GetApplicationWebhookTemplateRequest>,
    ) -> Result<Response<ApplicationWebhookTemplate>, Status> {
        let template = self
            .templates
            .get(&request.get_ref().template_id)
            .map_err(domain_error_to_status)?;
        Ok(Response::new(to_proto_template(template)))
    }

    async fn list(
        &self,
        _request: Request<ListApplicationWebhookTemplatesRequest>,
    ) -> Result<Response<ApplicationWebhookTemplates>, Status> {
        Ok(Response::new(ApplicationWebhookTemplates {
            templates: self
                .templates
                .list()
                .into_iter()
                .map(to_proto_template)
                .collect(),
        }))
    }
}
