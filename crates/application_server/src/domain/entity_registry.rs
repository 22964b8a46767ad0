use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::domain::{DomainError, DomainResult, EndDeviceIdentifiers, Location};
use dashmap::DashMap;
use std::collections::HashMap;
use tracing::debug;

#[derive(Debug, Clone, PartialEq)]
pub struct LastSeenUpdate {
    pub ids: EndDeviceIdentifiers,
    pub last_seen_at: DateTime<Utc>,
}

/// Cluster entity registry holding the authoritative end device records.
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait EntityRegistry: Send + Sync {
    /// Locations attached to the device.
    async fn get_locations(
        &self,
        ids: &EndDeviceIdentifiers,
    ) -> DomainResult<HashMap<String, Location>>;

    async fn set_activated_at(
        &self,
        ids: &EndDeviceIdentifiers,
        activated_at: DateTime<Utc>,
    ) -> DomainResult<()>;

    async fn update_last_seen(&self, updates: Vec<LastSeenUpdate>) -> DomainResult<()>;
}

#[derive(Debug, Clone, Default)]
struct EntityRecord {
    locations: HashMap<String, Location>,
    activated_at: Option<DateTime<Utc>>,
    last_seen_at: Option<DateTime<Utc>>,
}

/// Entity registry kept in process, used when the Application Server runs
/// without a cluster.
#[derive(Default)]
pub struct InMemoryEntityRegistry {
    records: DashMap<String, EntityRecord>,
}

impl InMemoryEntityRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_locations(&self, ids: &EndDeviceIdentifiers, locations: HashMap<String, Location>) {
        self.records.entry(ids.unique_id()).or_default().locations = locations;
    }

    pub fn activated_at(&self, ids: &EndDeviceIdentifiers) -> Option<DateTime<Utc>> {
        self.records
            .get(&ids.unique_id())
            .and_then(|r| r.activated_at)
    }

    pub fn last_seen_at(&self, ids: &EndDeviceIdentifiers) -> Option<DateTime<Utc>> {
        self.records
            .get(&ids.unique_id())
            .and_then(|r| r.last_seen_at)
    }
}

#[async_trait]
impl EntityRegistry for InMemoryEntityRegistry {
    async fn get_locations(
        &self,
        ids: &EndDeviceIdentifiers,
    ) -> DomainResult<HashMap<String, Location>> {
        self.records
            .get(&ids.unique_id())
            .map(|r| r.locations.clone())
            .ok_or_else(|| DomainError::NotFound(format!("end device `{}`", ids.unique_id())))
    }

    async fn set_activated_at(
        &self,
        ids: &EndDeviceIdentifiers,
        activated_at: DateTime<Utc>,
    ) -> DomainResult<()> {
        let mut record = self.records.entry(ids.unique_id()).or_default();
        if record.activated_at.is_none() {
            record.activated_at = Some(activated_at);
        }
        Ok(())
    }

    async fn update_last_seen(&self, updates: Vec<LastSeenUpdate>) -> DomainResult<()> {
        debug!(count = updates.len(), "updating last seen");
        for update in updates {
            let mut record = self.records.entry(update.ids.unique_id()).or_default();
            if record.last_seen_at.map_or(true, |t| t < update.last_seen_at) {
                record.last_seen_at = Some(update.last_seen_at);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[tokio::test]
    async fn test_last_seen_only_moves_forward() {
        // Arrange
        let registry = InMemoryEntityRegistry::new();
        let ids = EndDeviceIdentifiers::new("foo-app", "foo-device");
        let now = Utc::now();

        // Act
        registry
            .update_last_seen(vec![
                LastSeenUpdate {
                    ids: ids.clone(),
                    last_seen_at: now,
                },
                LastSeenUpdate {
                    ids: ids.clone(),
                    last_seen_at: now - Duration::seconds(5),
                },
            ])
            .await
            .unwrap();

        // Assert
        assert_eq!(registry.last_seen_at(&ids), Some(now));
    }

    #[tokio::test]
    async fn test_unknown_device_locations_not_found() {
        let registry = InMemoryEntityRegistry::new();

        let err = registry
            .get_locations(&EndDeviceIdentifiers::new("foo-app", "bar-device"))
            .await
            .unwrap_err();

        assert!(err.is_not_found());
    }
}
