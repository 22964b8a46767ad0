use common::domain::{
    field_mask, ApplicationIdentifiers, ApplicationPackage, ApplicationPackageAssociation,
    ApplicationPackageAssociationIdentifiers, ApplicationPackageDefaultAssociation,
    ApplicationPackageDefaultAssociationIdentifiers, DomainError, DomainResult,
    EndDeviceIdentifiers, PACKAGE_ASSOCIATION_FIELD_PATHS,
};
use common::registry::{Mutation, PackageRegistry};
use std::sync::Arc;
use tracing::{debug, instrument};

fn validate_f_port(f_port: u32) -> DomainResult<()> {
    if !(1..=255).contains(&f_port) {
        return Err(DomainError::InvalidArgument(format!(
            "invalid f_port {}",
            f_port
        )));
    }
    Ok(())
}

fn validate_write(package_name: &str, paths: &[String]) -> DomainResult<()> {
    if paths.is_empty() {
        return Err(DomainError::InvalidArgument(
            "field mask must not be empty".to_string(),
        ));
    }
    field_mask::validate_paths(paths, PACKAGE_ASSOCIATION_FIELD_PATHS)?;
    if field_mask::has_path(paths, "package_name") && package_name.is_empty() {
        return Err(DomainError::InvalidArgument(
            "package_name is required".to_string(),
        ));
    }
    Ok(())
}

/// Associations of end devices and applications with application packages.
pub struct PackageService {
    registry: Arc<dyn PackageRegistry>,
    packages: Vec<ApplicationPackage>,
}

impl PackageService {
    pub fn new(registry: Arc<dyn PackageRegistry>, packages: Vec<ApplicationPackage>) -> Self {
        Self { registry, packages }
    }

    /// Packages available to the device.
    pub fn list(&self, ids: &EndDeviceIdentifiers) -> DomainResult<Vec<ApplicationPackage>> {
        ids.validate()?;
        Ok(self.packages.clone())
    }

    pub async fn get_association(
        &self,
        ids: &ApplicationPackageAssociationIdentifiers,
        paths: &[String],
    ) -> DomainResult<ApplicationPackageAssociation> {
        ids.end_device_ids.validate()?;
        validate_f_port(ids.f_port)?;
        self.registry.get(ids, paths).await
    }

    pub async fn list_associations(
        &self,
        ids: &EndDeviceIdentifiers,
        paths: &[String],
    ) -> DomainResult<Vec<ApplicationPackageAssociation>> {
        ids.validate()?;
        self.registry.list(ids, paths).await
    }

    #[instrument(skip(self, association, paths), fields(association = %association.ids.unique_id()))]
    pub async fn set_association(
        &self,
        association: ApplicationPackageAssociation,
        paths: &[String],
    ) -> DomainResult<ApplicationPackageAssociation> {
        association.ids.end_device_ids.validate()?;
        validate_f_port(association.ids.f_port)?;
        validate_write(&association.package_name, paths)?;

        let ids = association.ids.clone();
        let write_paths = paths.to_vec();
        let stored = self
            .registry
            .set(
                &ids,
                paths,
                Box::new(move |_| {
                    Ok(Mutation::Write {
                        value: association,
                        paths: write_paths,
                    })
                }),
            )
            .await?
            .ok_or_else(|| DomainError::Internal(anyhow::anyhow!("association write returned nothing")))?;
        debug!("package association set");
        Ok(stored.masked(paths))
    }

    pub async fn delete_association(
        &self,
        ids: &ApplicationPackageAssociationIdentifiers,
    ) -> DomainResult<()> {
        ids.end_device_ids.validate()?;
        validate_f_port(ids.f_port)?;
        self.registry
            .set(ids, &[], Box::new(|_| Ok(Mutation::Delete)))
            .await?;
        Ok(())
    }

    pub async fn get_default_association(
        &self,
        ids: &ApplicationPackageDefaultAssociationIdentifiers,
        paths: &[String],
    ) -> DomainResult<ApplicationPackageDefaultAssociation> {
        ids.application_ids.validate()?;
        validate_f_port(ids.f_port)?;
        self.registry.get_default(ids, paths).await
    }

    pub async fn list_default_associations(
        &self,
        ids: &ApplicationIdentifiers,
        paths: &[String],
    ) -> DomainResult<Vec<ApplicationPackageDefaultAssociation>> {
        ids.validate()?;
        self.registry.list_defaults(ids, paths).await
    }

    #[instrument(skip(self, association, paths), fields(association = %association.ids.unique_id()))]
    pub async fn set_default_association(
        &self,
        association: ApplicationPackageDefaultAssociation,
        paths: &[String],
    ) -> DomainResult<ApplicationPackageDefaultAssociation> {
        association.ids.application_ids.validate()?;
        validate_f_port(association.ids.f_port)?;
        validate_write(&association.package_name, paths)?;

        let ids = association.ids.clone();
        let write_paths = paths.to_vec();
        let stored = self
            .registry
            .set_default(
                &ids,
                paths,
                Box::new(move |_| {
                    Ok(Mutation::Write {
                        value: association,
                        paths: write_paths,
                    })
                }),
            )
            .await?
            .ok_or_else(|| {
                DomainError::Internal(anyhow::anyhow!("default association write returned nothing"))
            })?;
        debug!("default package association set");
        Ok(stored.masked(paths))
    }

    pub async fn delete_default_association(
        &self,
        ids: &ApplicationPackageDefaultAssociationIdentifiers,
    ) -> DomainResult<()> {
        ids.application_ids.validate()?;
        validate_f_port(ids.f_port)?;
        self.registry
            .set_default(ids, &[], Box::new(|_| Ok(Mutation::Delete)))
            .await?;
        Ok(())
    }
}
