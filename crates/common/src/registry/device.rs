use async_trait::async_trait;
use futures::future::BoxFuture;
use std::future::Future;
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::{debug, instrument};

use super::{InMemoryStore, Mutation};
use crate::domain::{field_mask, DomainError, DomainResult, EndDevice, EndDeviceIdentifiers};

pub type DeviceMutator = Box<
    dyn FnOnce(Option<EndDevice>) -> BoxFuture<'static, DomainResult<Mutation<EndDevice>>> + Send,
>;

/// Application Server end device registry.
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait DeviceRegistry: Send + Sync {
    /// Partial read. `NotFound` if the device does not exist.
    async fn get(&self, ids: &EndDeviceIdentifiers, paths: &[String]) -> DomainResult<EndDevice>;

    /// Transactional read-modify-write of one device.
    async fn set(
        &self,
        ids: &EndDeviceIdentifiers,
        paths: &[String],
        mutator: DeviceMutator,
    ) -> DomainResult<Option<EndDevice>>;

    /// Devices of an application. Concurrent writes during the iteration are
    /// tolerated.
    async fn range(&self, application_id: &str, paths: &[String]) -> DomainResult<Vec<EndDevice>>;

    /// Deletes each device independently. Returns the identifiers that were
    /// deleted.
    async fn batch_delete(
        &self,
        ids: &[EndDeviceIdentifiers],
    ) -> DomainResult<Vec<EndDeviceIdentifiers>>;
}

/// Runs a device transaction whose mutator also produces an output value.
pub async fn set_device_with<F, Fut, O>(
    registry: &dyn DeviceRegistry,
    ids: &EndDeviceIdentifiers,
    paths: &[String],
    f: F,
) -> DomainResult<(Option<EndDevice>, O)>
where
    F: FnOnce(Option<EndDevice>) -> Fut + Send + 'static,
    Fut: Future<Output = DomainResult<(Mutation<EndDevice>, O)>> + Send + 'static,
    O: Send + 'static,
{
    let (tx, rx) = oneshot::channel();
    let device = registry
        .set(
            ids,
            paths,
            Box::new(move |stored| {
                Box::pin(async move {
                    let (mutation, output) = f(stored).await?;
                    let _ = tx.send(output);
                    Ok(mutation)
                })
            }),
        )
        .await?;
    let output = rx
        .await
        .map_err(|_| DomainError::Internal(anyhow::anyhow!("device mutator did not complete")))?;
    Ok((device, output))
}

pub struct InMemoryDeviceRegistry {
    store: InMemoryStore<EndDevice>,
}

impl InMemoryDeviceRegistry {
    pub fn new(lock_ttl: Duration) -> Self {
        Self {
            store: InMemoryStore::new(lock_ttl),
        }
    }

    async fn check_eui_uniqueness(&self, candidate: &EndDevice) -> DomainResult<()> {
        let Some(dev_eui) = candidate.ids.dev_eui.filter(|eui| !eui.is_zero()) else {
            return Ok(());
        };
        let key = candidate.ids.unique_id();
        let conflict = self.store.values().await.into_iter().any(|other| {
            other.ids.unique_id() != key
                && other.ids.dev_eui == Some(dev_eui)
                && other.ids.join_eui == candidate.ids.join_eui
        });
        if conflict {
            return Err(DomainError::AlreadyExists(format!(
                "end device with dev_eui {} already registered",
                dev_eui
            )));
        }
        Ok(())
    }
}

impl Default for InMemoryDeviceRegistry {
    fn default() -> Self {
        Self::new(Duration::from_secs(10))
    }
}

/// Rejects changes to identifiers that are read-only once set.
fn check_immutable_ids(stored: Option<&EndDevice>, updated: &EndDevice) -> DomainResult<()> {
    let Some(stored) = stored else {
        return Ok(());
    };
    if stored.ids.application_ids != updated.ids.application_ids
        || stored.ids.device_id != updated.ids.device_id
    {
        return Err(DomainError::InvalidArgument(
            "application_id and device_id are read-only".to_string(),
        ));
    }
    let changed = |old: Option<crate::domain::Eui64>, new: Option<crate::domain::Eui64>| {
        matches!(old, Some(o) if !o.is_zero() && new != Some(o))
    };
    if changed(stored.ids.join_eui, updated.ids.join_eui) {
        return Err(DomainError::InvalidArgument("join_eui is read-only".to_string()));
    }
    if changed(stored.ids.dev_eui, updated.ids.dev_eui) {
        return Err(DomainError::InvalidArgument("dev_eui is read-only".to_string()));
    }
    Ok(())
}

#[async_trait]
impl DeviceRegistry for InMemoryDeviceRegistry {
    #[instrument(skip(self, paths), fields(device = %ids.unique_id()))]
    async fn get(&self, ids: &EndDeviceIdentifiers, paths: &[String]) -> DomainResult<EndDevice> {
        self.store
            .get(&ids.unique_id(), paths)
            .await
            .ok_or_else(|| DomainError::NotFound(format!("end device `{}`", ids.unique_id())))
    }

    #[instrument(skip(self, paths, mutator), fields(device = %ids.unique_id()))]
    async fn set(
        &self,
        ids: &EndDeviceIdentifiers,
        paths: &[String],
        mutator: DeviceMutator,
    ) -> DomainResult<Option<EndDevice>> {
        self.store
            .set_checked(
                &ids.unique_id(),
                paths,
                |stored| async move {
                    let mutation = mutator(stored).await?;
                    if let Mutation::Write { value, paths } = &mutation {
                        if field_mask::has_any(paths, &["ids.dev_eui", "ids.join_eui"]) {
                            self.check_eui_uniqueness(value).await?;
                        }
                    }
                    Ok(mutation)
                },
                check_immutable_ids,
            )
            .await
    }

    async fn range(&self, application_id: &str, paths: &[String]) -> DomainResult<Vec<EndDevice>> {
        Ok(self
            .store
            .range(&format!("{}.", application_id), paths)
            .await
            .into_iter()
            .map(|(_, dev)| dev)
            .collect())
    }

    async fn batch_delete(
        &self,
        ids: &[EndDeviceIdentifiers],
    ) -> DomainResult<Vec<EndDeviceIdentifiers>> {
        let mut deleted = Vec::with_capacity(ids.len());
        for id in ids {
            match self.store.delete(&id.unique_id()).await {
                Ok(()) => deleted.push(id.clone()),
                Err(e) => debug!(device = %id.unique_id(), error = %e, "batch delete skipped device"),
            }
        }
        Ok(deleted)
    }
}
