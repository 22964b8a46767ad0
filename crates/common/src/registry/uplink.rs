use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use tokio::sync::RwLock;

use crate::domain::{ApplicationUplink, DomainResult, EndDeviceIdentifiers};

pub const DEFAULT_UPLINK_BUFFER_SIZE: usize = 16;

/// Bounded per-device buffer of recent uplinks, newest last.
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait UplinkRegistry: Send + Sync {
    async fn push(&self, ids: &EndDeviceIdentifiers, uplink: ApplicationUplink) -> DomainResult<()>;

    async fn range(&self, ids: &EndDeviceIdentifiers) -> DomainResult<Vec<ApplicationUplink>>;

    async fn clear(&self, ids: &EndDeviceIdentifiers) -> DomainResult<()>;
}

pub struct InMemoryUplinkRegistry {
    limit: usize,
    uplinks: RwLock<HashMap<String, VecDeque<ApplicationUplink>>>,
}

impl InMemoryUplinkRegistry {
    pub fn new(limit: usize) -> Self {
        Self {
            limit,
            uplinks: RwLock::new(HashMap::new()),
        }
    }
}

impl Default for InMemoryUplinkRegistry {
    fn default() -> Self {
        Self::new(DEFAULT_UPLINK_BUFFER_SIZE)
    }
}

#[async_trait]
impl UplinkRegistry for InMemoryUplinkRegistry {
    async fn push(&self, ids: &EndDeviceIdentifiers, uplink: ApplicationUplink) -> DomainResult<()> {
        if self.limit == 0 {
            return Ok(());
        }
        let mut uplinks = self.uplinks.write().await;
        let buffer = uplinks.entry(ids.unique_id()).or_default();
        while buffer.len() >= self.limit {
            buffer.pop_front();
        }
        buffer.push_back(uplink);
        Ok(())
    }

    async fn range(&self, ids: &EndDeviceIdentifiers) -> DomainResult<Vec<ApplicationUplink>> {
        Ok(self
            .uplinks
            .read()
            .await
            .get(&ids.unique_id())
            .map(|b| b.iter().cloned().collect())
            .unwrap_or_default())
    }

    async fn clear(&self, ids: &EndDeviceIdentifiers) -> DomainResult<()> {
        self.uplinks.write().await.remove(&ids.unique_id());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn uplink(f_cnt: u32) -> ApplicationUplink {
        ApplicationUplink {
            f_cnt,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_ring_buffer_keeps_newest() {
        let registry = InMemoryUplinkRegistry::new(3);
        let ids = EndDeviceIdentifiers::new("foo-app", "foo-device");

        for f_cnt in 1..=5 {
            registry.push(&ids, uplink(f_cnt)).await.unwrap();
        }

        let stored: Vec<u32> = registry
            .range(&ids)
            .await
            .unwrap()
            .iter()
            .map(|u| u.f_cnt)
            .collect();
        assert_eq!(stored, vec![3, 4, 5]);
    }

    #[tokio::test]
    async fn test_clear() {
        let registry = InMemoryUplinkRegistry::default();
        let ids = EndDeviceIdentifiers::new("foo-app", "foo-device");
        registry.push(&ids, uplink(1)).await.unwrap();

        registry.clear(&ids).await.unwrap();

        assert!(registry.range(&ids).await.unwrap().is_empty());
    }
}
