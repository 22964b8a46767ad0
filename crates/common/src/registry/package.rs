use async_trait::async_trait;
use std::time::Duration;

use super::{InMemoryStore, Mutator};
use crate::domain::{
    ApplicationIdentifiers, ApplicationPackageAssociation, ApplicationPackageAssociationIdentifiers,
    ApplicationPackageDefaultAssociation, ApplicationPackageDefaultAssociationIdentifiers,
    DomainError, DomainResult, EndDeviceIdentifiers,
};

/// Associations between devices (or applications) and application packages,
/// keyed by FPort.
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait PackageRegistry: Send + Sync {
    async fn get(
        &self,
        ids: &ApplicationPackageAssociationIdentifiers,
        paths: &[String],
    ) -> DomainResult<ApplicationPackageAssociation>;

    async fn list(
        &self,
        ids: &EndDeviceIdentifiers,
        paths: &[String],
    ) -> DomainResult<Vec<ApplicationPackageAssociation>>;

    async fn set(
        &self,
        ids: &ApplicationPackageAssociationIdentifiers,
        paths: &[String],
        mutator: Mutator<ApplicationPackageAssociation>,
    ) -> DomainResult<Option<ApplicationPackageAssociation>>;

    async fn get_default(
        &self,
        ids: &ApplicationPackageDefaultAssociationIdentifiers,
        paths: &[String],
    ) -> DomainResult<ApplicationPackageDefaultAssociation>;

    async fn list_defaults(
        &self,
        ids: &ApplicationIdentifiers,
        paths: &[String],
    ) -> DomainResult<Vec<ApplicationPackageDefaultAssociation>>;

    async fn set_default(
        &self,
        ids: &ApplicationPackageDefaultAssociationIdentifiers,
        paths: &[String],
        mutator: Mutator<ApplicationPackageDefaultAssociation>,
    ) -> DomainResult<Option<ApplicationPackageDefaultAssociation>>;
}

pub struct InMemoryPackageRegistry {
    associations: InMemoryStore<ApplicationPackageAssociation>,
    defaults: InMemoryStore<ApplicationPackageDefaultAssociation>,
}

impl InMemoryPackageRegistry {
    pub fn new(lock_ttl: Duration) -> Self {
        Self {
            associations: InMemoryStore::new(lock_ttl),
            defaults: InMemoryStore::new(lock_ttl),
        }
    }
}

impl Default for InMemoryPackageRegistry {
    fn default() -> Self {
        Self::new(Duration::from_secs(10))
    }
}

#[async_trait]
impl PackageRegistry for InMemoryPackageRegistry {
    async fn get(
        &self,
        ids: &ApplicationPackageAssociationIdentifiers,
        paths: &[String],
    ) -> DomainResult<ApplicationPackageAssociation> {
        self.associations
            .get(&ids.unique_id(), paths)
            .await
            .ok_or_else(|| DomainError::NotFound(format!("association `{}`", ids.unique_id())))
    }

    async fn list(
        &self,
        ids: &EndDeviceIdentifiers,
        paths: &[String],
    ) -> DomainResult<Vec<ApplicationPackageAssociation>> {
        let mut associations: Vec<_> = self
            .associations
            .range(&format!("{}.", ids.unique_id()), paths)
            .await
            .into_iter()
            .map(|(_, a)| a)
            .collect();
        associations.sort_by_key(|a| a.ids.f_port);
        Ok(associations)
    }

    async fn set(
        &self,
        ids: &ApplicationPackageAssociationIdentifiers,
        paths: &[String],
        mutator: Mutator<ApplicationPackageAssociation>,
    ) -> DomainResult<Option<ApplicationPackageAssociation>> {
        self.associations
            .set(&ids.unique_id(), paths, |stored| async move { mutator(stored) })
            .await
    }

    async fn get_default(
        &self,
        ids: &ApplicationPackageDefaultAssociationIdentifiers,
        paths: &[String],
    ) -> DomainResult<ApplicationPackageDefaultAssociation> {
        self.defaults
            .get(&ids.unique_id(), paths)
            .await
            .ok_or_else(|| {
                DomainError::NotFound(format!("default association `{}`", ids.unique_id()))
            })
    }

    async fn list_defaults(
        &self,
        ids: &ApplicationIdentifiers,
        paths: &[String],
    ) -> DomainResult<Vec<ApplicationPackageDefaultAssociation>> {
        let mut defaults: Vec<_> = self
            .defaults
            .range(&format!("{}.", ids.unique_id()), paths)
            .await
            .into_iter()
            .map(|(_, a)| a)
            .collect();
        defaults.sort_by_key(|a| a.ids.f_port);
        Ok(defaults)
    }

    async fn set_default(
        &self,
        ids: &ApplicationPackageDefaultAssociationIdentifiers,
        paths: &[String],
        mutator: Mutator<ApplicationPackageDefaultAssociation>,
    ) -> DomainResult<Option<ApplicationPackageDefaultAssociation>> {
        self.defaults
            .set(&ids.unique_id(), paths, |stored| async move { mutator(stored) })
            .await
    }
}
