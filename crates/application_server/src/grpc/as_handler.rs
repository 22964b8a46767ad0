use std::sync::Arc;
use tonic::{Request, Response, Status};
use tracing::instrument;

use common::grpc::require_rights;
use crate::domain::LinkService;
use common::auth::{Right, RightsFetcher};
use common::grpc::domain_error_to_status;
use common::proto::as_server::As as AsTrait;
use common::proto::{
    field_mask_paths, from_proto_application_ids, from_proto_link, to_proto_link,
    ApplicationIdentifiers, ApplicationLink, AsConfiguration, GetApplicationLinkRequest,
    GetAsConfigurationRequest, GetAsConfigurationResponse, SetApplicationLinkRequest,
};

/// gRPC handler for the `As` service: application links and server
/// configuration.
pub struct AsHandler {
    links: Arc<LinkService>,
    rights: Arc<dyn RightsFetcher>,
}

impl AsHandler {
    pub fn new(links: Arc<LinkService>, rights: Arc<dyn RightsFetcher>) -> Self {
        Self { links, rights }
    }
}

#[tonic::async_trait]
impl AsTrait for AsHandler {
    #[instrument(name = "GetLink", skip(self, request))]
    async fn get_link(
        &self,
        request: Request<GetApplicationLinkRequest>,
    ) -> Result<Response<ApplicationLink>, Status> {
        let ids = from_proto_application_ids(request.get_ref().application_ids.clone())
            .map_err(domain_error_to_status)?;
        require_rights(self.rights.as_ref(), &request, &ids, &[Right::ApplicationLink]).await?;
        let req = request.into_inner();

        let link = self
            .links
            .get_link(&ids, &field_mask_paths(req.field_mask))
            .await
            .map_err(domain_error_to_status)?;

        Ok(Response::new(to_proto_link(link)))
    }

    #[instrument(name = "SetLink", skip(self, request))]
    async fn set_link(
        &self,
        request: Request<SetApplicationLinkRequest>,
    ) -> Result<Response<ApplicationLink>, Status> {
        let ids = from_proto_application_ids(request.get_ref().application_ids.clone())
            .map_err(domain_error_to_status)?;
        require_rights(self.rights.as_ref(), &request, &ids, &[Right::ApplicationLink]).await?;
        let req = request.into_inner();

        let link = from_proto_link(req.link.unwrap_or_default()).map_err(domain_error_to_status)?;
        let link = self
            .links
            .set_link(&ids, link, &field_mask_paths(req.field_mask))
            .await
            .map_err(domain_error_to_status)?;

        Ok(Response::new(to_proto_link(link)))
    }

    #[instrument(name = "DeleteLink", skip(self, request))]
    async fn delete_link(
        &self,
        request: Request<ApplicationIdentifiers>,
    ) -> Result<Response<()>, Status> {
        let ids = from_proto_application_ids(Some(request.get_ref().clone()))
            .map_err(domain_error_to_status)?;
        require_rights(self.rights.as_ref(), &request, &ids, &[Right::ApplicationLink]).await?;

        self.links
            .delete_link(&ids)
            .await
            .map_err(domain_error_to_status)?;

        Ok(Response::new(()))
    }

    async fn get_configuration(
        &self,
        _request: Request<GetAsConfigurationRequest>,
    ) -> Result<Response<GetAsConfigurationResponse>, Status> {
        let max = u32::try_from(self.links.formatter_max_parameter_length()).unwrap_or(u32::MAX);
        Ok(Response::new(GetAsConfigurationResponse {
            configuration: Some(AsConfiguration {
                formatter_max_parameter_length: max,
            }),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::DEFAULT_FORMATTER_MAX_PARAMETER_LENGTH;
    use common::auth::{AuthInfo, MockRightsFetcher};
    use common::domain::ApplicationLink as DomainLink;
    use common::proto::to_field_mask;
    use common::registry::InMemoryLinkRegistry;
    use std::collections::HashSet;
    use tonic::Code;

    fn handler(rights: HashSet<Right>) -> AsHandler {
        let mut fetcher = MockRightsFetcher::new();
        fetcher.expect_application_rights().returning(move |_, _| {
            Ok(AuthInfo {
                token_id: "key-1".to_string(),
                rights: rights.clone(),
            })
        });
        AsHandler::new(
            Arc::new(LinkService::new(
                Arc::new(InMemoryLinkRegistry::default()),
                DomainLink::default(),
                DEFAULT_FORMATTER_MAX_PARAMETER_LENGTH,
            )),
            Arc::new(fetcher),
        )
    }

    fn authorized<T>(message: T) -> Request<T> {
        let mut request = Request::new(message);
        request
            .metadata_mut()
            .insert("authorization", "Bearer secret".parse().unwrap());
        request
    }

    fn app_ids() -> Option<ApplicationIdentifiers> {
        Some(ApplicationIdentifiers {
            application_id: "foo-app".to_string(),
        })
    }

    #[tokio::test]
    async fn test_set_and_get_link() {
        let handler = handler(HashSet::from([Right::ApplicationLink]));

        handler
            .set_link(authorized(SetApplicationLinkRequest {
                application_ids: app_ids(),
                link: Some(ApplicationLink {
                    default_formatters: None,
                    skip_payload_crypto: Some(true),
                }),
                field_mask: to_field_mask(&["skip_payload_crypto".to_string()]),
            }))
            .await
            .unwrap();
        let link = handler
            .get_link(authorized(GetApplicationLinkRequest {
                application_ids: app_ids(),
                field_mask: None,
            }))
            .await
            .unwrap()
            .into_inner();

        assert_eq!(link.skip_payload_crypto, Some(true));
    }

    #[tokio::test]
    async fn test_get_link_requires_link_right() {
        let handler = handler(HashSet::from([Right::ApplicationTrafficRead]));

        let status = handler
            .get_link(authorized(GetApplicationLinkRequest {
                application_ids: app_ids(),
                field_mask: None,
            }))
            .await
            .unwrap_err();

        assert_eq!(status.code(), Code::PermissionDenied);
    }

    #[tokio::test]
    async fn test_missing_authorization_is_unauthenticated() {
        let handler = handler(HashSet::new());

        let status = handler
            .delete_link(Request::new(ApplicationIdentifiers {
                application_id: "foo-app".to_string(),
            }))
            .await
            .unwrap_err();

        assert_eq!(status.code(), Code::Unauthenticated);
    }

    #[tokio::test]
    async fn test_get_configuration() {
        let handler = handler(HashSet::new());

        let response = handler
            .get_configuration(Request::new(GetAsConfigurationRequest {}))
            .await
            .unwrap()
            .into_inner();

        assert_eq!(
            response.configuration.unwrap().formatter_max_parameter_length,
            DEFAULT_FORMATTER_MAX_PARAMETER_LENGTH as u32
        );
    }
}
