use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::warn;

use crate::clock::Clock;
use crate::domain::{DomainError, DomainResult, EndDeviceIdentifiers, Location};

const CACHED_FIELD: &str = "_cached";
const ERROR_FIELD: &str = "_error";

/// Cache of end device locations read from the entity registry.
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait LocationCache: Send + Sync {
    /// `Ok(None)` when the device was never looked up or the entry expired.
    /// A cached lookup error is returned as `Unavailable`.
    async fn get(&self, ids: &EndDeviceIdentifiers)
        -> DomainResult<Option<HashMap<String, Location>>>;

    async fn set(
        &self,
        ids: &EndDeviceIdentifiers,
        locations: HashMap<String, Location>,
        ttl: Duration,
    ) -> DomainResult<()>;

    async fn set_error(
        &self,
        ids: &EndDeviceIdentifiers,
        message: String,
        ttl: Duration,
    ) -> DomainResult<()>;
}

struct CacheEntry {
    fields: HashMap<String, String>,
    expires_at: DateTime<Utc>,
}

/// Stores a hash per device: one field per location service plus the
/// `_cached` and `_error` sentinels, so an empty cached result is
/// distinguishable from a missing entry.
pub struct InMemoryLocationCache {
    clock: Arc<dyn Clock>,
    entries: RwLock<HashMap<String, CacheEntry>>,
}

impl InMemoryLocationCache {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            entries: RwLock::new(HashMap::new()),
        }
    }

    async fn put(&self, ids: &EndDeviceIdentifiers, fields: HashMap<String, String>, ttl: Duration) {
        let ttl = chrono::Duration::from_std(ttl).unwrap_or(chrono::Duration::MAX);
        let expires_at = self
            .clock
            .now()
            .checked_add_signed(ttl)
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        self.entries
            .write()
            .await
            .insert(ids.unique_id(), CacheEntry { fields, expires_at });
    }
}

#[async_trait]
impl LocationCache for InMemoryLocationCache {
    async fn get(
        &self,
        ids: &EndDeviceIdentifiers,
    ) -> DomainResult<Option<HashMap<String, Location>>> {
        let entries = self.entries.read().await;
        let Some(entry) = entries.get(&ids.unique_id()) else {
            return Ok(None);
        };
        if entry.expires_at <= self.clock.now() {
            return Ok(None);
        }
        if let Some(message) = entry.fields.get(ERROR_FIELD) {
            return Err(DomainError::Unavailable(message.clone()));
        }
        if !entry.fields.contains_key(CACHED_FIELD) {
            return Ok(None);
        }

        let mut locations = HashMap::new();
        for (service, raw) in entry.fields.iter().filter(|(k, _)| !k.starts_with('_')) {
            match serde_json::from_str::<Location>(raw) {
                Ok(location) => {
                    locations.insert(service.clone(), location);
                }
                Err(e) => warn!(service = %service, error = %e, "skipping corrupt cached location"),
            }
        }
        Ok(Some(locations))
    }

    async fn set(
        &self,
        ids: &EndDeviceIdentifiers,
        locations: HashMap<String, Location>,
        ttl: Duration,
    ) -> DomainResult<()> {
        let mut fields = HashMap::with_capacity(locations.len() + 1);
        for (service, location) in locations {
            let raw = serde_json::to_string(&location)
                .map_err(|e| DomainError::Internal(e.into()))?;
            fields.insert(service, raw);
        }
        fields.insert(CACHED_FIELD.to_string(), self.clock.now().to_rfc3339());
        self.put(ids, fields, ttl).await;
        Ok(())
    }

    async fn set_error(
        &self,
        ids: &EndDeviceIdentifiers,
        message: String,
        ttl: Duration,
    ) -> DomainResult<()> {
        let fields = HashMap::from([
            (CACHED_FIELD.to_string(), self.clock.now().to_rfc3339()),
            (ERROR_FIELD.to_string(), message),
        ]);
        self.put(ids, fields, ttl).await;
        Ok(())
    }
}
