use std::sync::Arc;
use tonic::{Request, Response, Status};
use tracing::instrument;

use common::grpc::require_rights;
use crate::domain::PackageService;
use common::auth::{Right, RightsFetcher};
use common::grpc::domain_error_to_status;
use common::proto::application_package_registry_server::ApplicationPackageRegistry as PackageRegistryTrait;
use common::proto::{
    field_mask_paths, from_proto_application_ids, from_proto_association,
    from_proto_association_ids, from_proto_default_association,
    from_proto_default_association_ids, from_proto_end_device_ids, to_proto_association,
    to_proto_default_association, to_proto_package, ApplicationPackageAssociation,
    ApplicationPackageAssociationIdentifiers, ApplicationPackageAssociations,
    ApplicationPackageDefaultAssociation, ApplicationPackageDefaultAssociationIdentifiers,
    ApplicationPackageDefaultAssociations, ApplicationPackages, EndDeviceIdentifiers,
    GetApplicationPackageAssociationRequest, GetApplicationPackageDefaultAssociationRequest,
    ListApplicationPackageAssociationRequest, ListApplicationPackageDefaultAssociationRequest,
    SetApplicationPackageAssociationRequest, SetApplicationPackageDefaultAssociationRequest,
};

/// gRPC handler for application package associations.
pub struct PackageRegistryHandler {
    packages: Arc<PackageService>,
    rights: Arc<dyn RightsFetcher>,
}

impl PackageRegistryHandler {
    pub fn new(packages: Arc<PackageService>, rights: Arc<dyn RightsFetcher>) -> Self {
        Self { packages, rights }
    }
}

#[tonic::async_trait]
impl PackageRegistryTrait for PackageRegistryHandler {
    async fn list(
        &self,
        request: Request<EndDeviceIdentifiers>,
    ) -> Result<Response<ApplicationPackages>, Status> {
        let ids = from_proto_end_device_ids(Some(request.get_ref().clone()))
            .map_err(domain_error_to_status)?;
        require_rights(
            self.rights.as_ref(),
            &request,
            &ids.application_ids,
            &[Right::ApplicationSettingsPackages],
        )
        .await?;

        let packages = self.packages.list(&ids).map_err(domain_error_to_status)?;
        Ok(Response::new(ApplicationPackages {
            packages: packages.into_iter().map(to_proto_package).collect(),
        }))
    }

    #[instrument(name = "GetAssociation", skip(self, request))]
    async fn get_association(
        &self,
        request: Request<GetApplicationPackageAssociationRequest>,
    ) -> Result<Response<ApplicationPackageAssociation>, Status> {
        let ids = from_proto_association_ids(request.get_ref().ids.clone())
            .map_err(domain_error_to_status)?;
        require_rights(
            self.rights.as_ref(),
            &request,
            &ids.end_device_ids.application_ids,
            &[Right::ApplicationSettingsPackages],
        )
        .await?;

        let association = self
            .packages
            .get_association(&ids, &field_mask_paths(request.into_inner().field_mask))
            .await
            .map_err(domain_error_to_status)?;
        Ok(Response::new(to_proto_association(association)))
    }

    async fn list_associations(
        &self,
        request: Request<ListApplicationPackageAssociationRequest>,
    ) -> Result<Response<ApplicationPackageAssociations>, Status> {
        let ids = from_proto_end_device_ids(request.get_ref().ids.clone())
            .map_err(domain_error_to_status)?;
        require_rights(
            self.rights.as_ref(),
            &request,
            &ids.application_ids,
            &[Right::ApplicationSettingsPackages],
        )
        .await?;

        let associations = self
            .packages
            .list_associations(&ids, &field_mask_paths(request.into_inner().field_mask))
            .await
            .map_err(domain_error_to_status)?;
        Ok(Response::new(ApplicationPackageAssociations {
            associations: associations.into_iter().map(to_proto_association).collect(),
        }))
    }

    #[instrument(name = "SetAssociation", skip(self, request))]
    async fn set_association(
        &self,
        request: Request<SetApplicationPackageAssociationRequest>,
    ) -> Result<Response<ApplicationPackageAssociation>, Status> {
        let association =
            from_proto_association(request.get_ref().association.clone().unwrap_or_default())
                .map_err(domain_error_to_status)?;
        require_rights(
            self.rights.as_ref(),
            &request,
            &association.ids.end_device_ids.application_ids,
            &[Right::ApplicationSettingsPackages],
        )
        .await?;

        let association = self
            .packages
            .set_association(association, &field_mask_paths(request.into_inner().field_mask))
            .await
            .map_err(domain_error_to_status)?;
        Ok(Response::new(to_proto_association(association)))
    }

    #[instrument(name = "DeleteAssociation", skip(self, request))]
    async fn delete_association(
        &self,
        request: Request<ApplicationPackageAssociationIdentifiers>,
    ) -> Result<Response<()>, Status> {
        let ids = from_proto_association_ids(Some(request.get_ref().clone()))
            .map_err(domain_error_to_status)?;
        require_rights(
            self.rights.as_ref(),
            &request,
            &ids.end_device_ids.application_ids,
            &[Right::ApplicationSettingsPackages],
        )
        .await?;

        self.packages
            .delete_association(&ids)
            .await
            .map_err(domain_error_to_status)?;
        Ok(Response::new(()))
    }

    async fn get_default_association(
        &self,
        request: Request<GetApplicationPackageDefaultAssociationRequest>,
    ) -> Result<Response<ApplicationPackageDefaultAssociation>, Status> {
        let ids = from_proto_default_association_ids(request.get_ref().ids.clone())
            .map_err(domain_error_to_status)?;
        require_rights(
            self.rights.as_ref(),
            &request,
            &ids.application_ids,
            &[Right::ApplicationSettingsPackages],
        )
        .await?;

        let association = self
            .packages
            .get_default_association(&ids, &field_mask_paths(request.into_inner().field_mask))
            .await
            .map_err(domain_error_to_status)?;
        Ok(Response::new(to_proto_default_association(association)))
    }

    async fn list_default_associations(
        &self,
        request: Request<ListApplicationPackageDefaultAssociationRequest>,
    ) -> Result<Response<ApplicationPackageDefaultAssociations>, Status> {
        let ids = from_proto_application_ids(request.get_ref().ids.clone())
            .map_err(domain_error_to_status)?;
        require_rights(
            self.rights.as_ref(),
            &request,
            &ids,
            &[Right::ApplicationSettingsPackages],
        )
        .await?;

        let defaults = self
            .packages
            .list_default_associations(&ids, &field_mask_paths(request.into_inner().field_mask))
            .await
            .map_err(domain_error_to_status)?;
        Ok(Response::new(ApplicationPackageDefaultAssociations {
            defaults: defaults.into_iter().map(to_proto_default_association).collect(),
        }))
    }

    #[instrument(name = "SetDefaultAssociation", skip(self, request))]
    async fn set_default_association(
        &self,
        request: Request<SetApplicationPackageDefaultAssociationRequest>,
    ) -> Result<Response<ApplicationPackageDefaultAssociation>, Status> {
        let association =
            from_proto_default_association(request.get_ref().default.clone().unwrap_or_default())
                .map_err(domain_error_to_status)?;
        require_rights(
            self.rights.as_ref(),
            &request,
            &association.ids.application_ids,
            &[Right::ApplicationSettingsPackages],
        )
        .await?;

        let association = self
            .packages
            .set_default_association(association, &field_mask_paths(request.into_inner().field_mask))
            .await
            .map_err(domain_error_to_status)?;
        Ok(Response::new(to_proto_default_association(association)))
    }

    #[instrument(name = "DeleteDefaultAssociation", skip(self, request))]
    async fn delete_default_association(
        &self,
        request: Request<ApplicationPackageDefaultAssociationIdentifiers>,
    ) -> Result<Response<()>, Status> {
        let ids = from_proto_default_association_ids(Some(request.get_ref().clone()))
            .map_err(domain_error_to_status)?;
        require_rights(
            self.rights.as_ref(),
            &request,
            &ids.application_ids,
            &[Right::ApplicationSettingsPackages],
        )
        .await?;

        self.packages
            .delete_default_association(&ids)
            .await
            .map_err(domain_error_to_status)?;
        Ok(Response::new(()))
    }
}
