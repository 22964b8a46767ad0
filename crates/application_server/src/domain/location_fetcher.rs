use common::domain::{DomainError, DomainResult, EndDeviceIdentifiers, Location};
use common::registry::LocationCache;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use super::EntityRegistry;

#[derive(Debug, Clone)]
pub struct LocationFetcherConfig {
    pub cache_ttl: Duration,
    /// How long a failed lookup is remembered before the registry is asked
    /// again.
    pub error_ttl: Duration,
}

impl Default for LocationFetcherConfig {
    fn default() -> Self {
        Self {
            cache_ttl: Duration::from_secs(12 * 60 * 60),
            error_ttl: Duration::from_secs(60),
        }
    }
}

/// Reads end device locations from the entity registry through a cache.
pub struct LocationFetcher {
    registry: Arc<dyn EntityRegistry>,
    cache: Arc<dyn LocationCache>,
    config: LocationFetcherConfig,
}

impl LocationFetcher {
    pub fn new(
        registry: Arc<dyn EntityRegistry>,
        cache: Arc<dyn LocationCache>,
        config: LocationFetcherConfig,
    ) -> Self {
        Self {
            registry,
            cache,
            config,
        }
    }

    pub async fn get(&self, ids: &EndDeviceIdentifiers) -> DomainResult<HashMap<String, Location>> {
        if let Some(locations) = self.cache.get(ids).await? {
            return Ok(locations);
        }

        match self.registry.get_locations(ids).await {
            Ok(locations) => {
                debug!(device = %ids.unique_id(), count = locations.len(), "caching end device locations");
                if let Err(e) = self
                    .cache
                    .set(ids, locations.clone(), self.config.cache_ttl)
                    .await
                {
                    warn!(error = %e, "failed to cache end device locations");
                }
                Ok(locations)
            }
            Err(e) => {
                let message = e.to_string();
                if let Err(e) = self
                    .cache
                    .set_error(ids, message.clone(), self.config.error_ttl)
                    .await
                {
                    warn!(error = %e, "failed to cache location lookup error");
                }
                Err(DomainError::Unavailable(message))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{InMemoryEntityRegistry, MockEntityRegistry};
    use chrono::{Duration as ChronoDuration, Utc};
    use common::clock::ManualClock;
    use common::domain::LocationSource;
    use common::registry::InMemoryLocationCache;

    fn ids() -> EndDeviceIdentifiers {
        EndDeviceIdentifiers::new("foo-app", "foo-device")
    }

    fn location() -> Location {
        Location {
            latitude: 52.37,
            longitude: 4.89,
            altitude: 2,
            accuracy: 10,
            source: LocationSource::SourceRegistry,
        }
    }

    #[tokio::test]
    async fn test_cached_locations_skip_registry() {
        // Arrange
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let mut registry = MockEntityRegistry::new();
        registry
            .expect_get_locations()
            .times(1)
            .returning(|_| Ok(HashMap::from([("user".to_string(), location())])));
        let fetcher = LocationFetcher::new(
            Arc::new(registry),
            Arc::new(InMemoryLocationCache::new(clock)),
            LocationFetcherConfig::default(),
        );

        // Act
        let first = fetcher.get(&ids()).await.unwrap();
        let second = fetcher.get(&ids()).await.unwrap();

        // Assert
        assert_eq!(first, second);
        assert_eq!(second["user"], location());
    }

    #[tokio::test]
    async fn test_lookup_error_is_cached_until_error_ttl() {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let registry = Arc::new(InMemoryEntityRegistry::new());
        let fetcher = LocationFetcher::new(
            registry.clone(),
            Arc::new(InMemoryLocationCache::new(clock.clone())),
            LocationFetcherConfig {
                cache_ttl: Duration::from_secs(3600),
                error_ttl: Duration::from_secs(60),
            },
        );

        assert!(matches!(
            fetcher.get(&ids()).await,
            Err(DomainError::Unavailable(_))
        ));

        registry.set_locations(&ids(), HashMap::from([("user".to_string(), location())]));
        assert!(fetcher.get(&ids()).await.is_err());

        clock.advance(ChronoDuration::seconds(61));
        let locations = fetcher.get(&ids()).await.unwrap();
        assert_eq!(locations.len(), 1);
    }
}
