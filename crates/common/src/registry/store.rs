use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};
use tracing::{debug, warn};

use crate::domain::{
    ApplicationLink, ApplicationPackageAssociation, ApplicationPackageDefaultAssociation,
    ApplicationPubSub, DomainError, DomainResult, EndDevice, Webhook,
};

/// Result of a registry mutator.
#[derive(Debug, Clone, PartialEq)]
pub enum Mutation<T> {
    /// Leave the stored entity untouched.
    Keep,
    /// Write `paths` of `value` onto the stored entity, creating it if needed.
    Write { value: T, paths: Vec<String> },
    /// Remove the stored entity.
    Delete,
}

/// Entities that support partial reads and writes by field path.
pub trait Masked: Clone + Send + Sync + 'static {
    fn masked(&self, paths: &[String]) -> Self;
    fn set_fields(&mut self, src: &Self, paths: &[String]);
    fn stamp(&mut self, _created_at: Option<DateTime<Utc>>, _updated_at: DateTime<Utc>) {}
}

macro_rules! impl_masked {
    ($ty:ty) => {
        impl Masked for $ty {
            fn masked(&self, paths: &[String]) -> Self {
                <$ty>::masked(self, paths)
            }

            fn set_fields(&mut self, src: &Self, paths: &[String]) {
                <$ty>::set_fields(self, src, paths)
            }

            fn stamp(&mut self, created_at: Option<DateTime<Utc>>, updated_at: DateTime<Utc>) {
                if self.created_at.is_none() {
                    self.created_at = created_at;
                }
                self.updated_at = Some(updated_at);
            }
        }
    };
}

impl_masked!(EndDevice);
impl_masked!(Webhook);
impl_masked!(ApplicationPubSub);
impl_masked!(ApplicationPackageAssociation);
impl_masked!(ApplicationPackageDefaultAssociation);

impl Masked for ApplicationLink {
    fn masked(&self, paths: &[String]) -> Self {
        ApplicationLink::masked(self, paths)
    }

    fn set_fields(&mut self, src: &Self, paths: &[String]) {
        ApplicationLink::set_fields(self, src, paths)
    }
}

/// In-memory key-value store with per-key transactional writes.
///
/// Writers on the same key serialize on a per-key mutex. Waiting for the
/// mutex is bounded by `lock_ttl`.
pub struct InMemoryStore<V> {
    entries: RwLock<HashMap<String, V>>,
    locks: DashMap<String, Arc<Mutex<()>>>,
    lock_ttl: Duration,
}

impl<V: Masked> InMemoryStore<V> {
    pub fn new(lock_ttl: Duration) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            locks: DashMap::new(),
            lock_ttl,
        }
    }

    async fn lock(&self, key: &str) -> DomainResult<OwnedMutexGuard<()>> {
        let mutex = self
            .locks
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        tokio::time::timeout(self.lock_ttl, mutex.lock_owned())
            .await
            .map_err(|_| {
                warn!(key = %key, "registry lock timeout");
                DomainError::Aborted("registry_lock_timeout".to_string())
            })
    }

    pub async fn get(&self, key: &str, paths: &[String]) -> Option<V> {
        self.entries
            .read()
            .await
            .get(key)
            .map(|v| v.masked(paths))
    }

    /// Runs `mutator` on the stored value (masked to `paths`) while holding
    /// the key's lock and applies the resulting mutation.
    pub async fn set<F, Fut>(&self, key: &str, paths: &[String], mutator: F) -> DomainResult<Option<V>>
    where
        F: FnOnce(Option<V>) -> Fut,
        Fut: Future<Output = DomainResult<Mutation<V>>>,
    {
        self.set_checked(key, paths, mutator, |_, _| Ok(())).await
    }

    /// Like [`InMemoryStore::set`], with `check(stored, updated)` validating
    /// the write before it is committed.
    pub async fn set_checked<F, Fut, C>(
        &self,
        key: &str,
        paths: &[String],
        mutator: F,
        check: C,
    ) -> DomainResult<Option<V>>
    where
        F: FnOnce(Option<V>) -> Fut,
        Fut: Future<Output = DomainResult<Mutation<V>>>,
        C: FnOnce(Option<&V>, &V) -> DomainResult<()>,
    {
        let _guard = self.lock(key).await?;

        let stored = self.entries.read().await.get(key).cloned();
        let view = stored.as_ref().map(|v| v.masked(paths));

        match mutator(view).await? {
            Mutation::Keep => Ok(stored),
            Mutation::Delete => {
                self.entries.write().await.remove(key);
                debug!(key = %key, "registry entry deleted");
                Ok(None)
            }
            Mutation::Write { value, paths } => {
                let now = Utc::now();
                let created = stored.is_none();
                let mut updated = match &stored {
                    Some(existing) => existing.clone(),
                    None => value.masked(&["ids".to_string()]),
                };
                updated.set_fields(&value, &paths);
                updated.stamp(if created { Some(now) } else { None }, now);

                check(stored.as_ref(), &updated)?;

                self.entries
                    .write()
                    .await
                    .insert(key.to_string(), updated.clone());
                Ok(Some(updated))
            }
        }
    }

    pub async fn delete(&self, key: &str) -> DomainResult<()> {
        let _guard = self.lock(key).await?;
        self.entries.write().await.remove(key);
        Ok(())
    }

    /// Snapshot of all entries whose key starts with `prefix`. Writes that
    /// happen while the caller iterates are not reflected.
    pub async fn range(&self, prefix: &str, paths: &[String]) -> Vec<(String, V)> {
        let mut items: Vec<(String, V)> = self
            .entries
            .read()
            .await
            .iter()
            .filter(|(k, _)| k.starts_with(prefix))
            .map(|(k, v)| (k.clone(), v.masked(paths)))
            .collect();
        items.sort_by(|a, b| a.0.cmp(&b.0));
        items
    }

    pub async fn values(&self) -> Vec<V> {
        self.entries.read().await.values().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::EndDeviceIdentifiers;

    fn paths(p: &[&str]) -> Vec<String> {
        p.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn test_set_creates_and_updates() {
        let store: InMemoryStore<EndDevice> = InMemoryStore::new(Duration::from_secs(1));
        let ids = EndDeviceIdentifiers::new("app", "dev");

        let created = store
            .set("app.dev", &[], |stored| async move {
                assert!(stored.is_none());
                let mut dev = EndDevice::new(ids);
                dev.skip_payload_crypto_override = Some(true);
                Ok(Mutation::Write {
                    value: dev,
                    paths: paths(&["skip_payload_crypto_override"]),
                })
            })
            .await
            .unwrap()
            .unwrap();

        assert_eq!(created.skip_payload_crypto_override, Some(true));
        assert!(created.created_at.is_some());

        let kept = store
            .set("app.dev", &[], |stored| async move {
                assert!(stored.is_some());
                Ok(Mutation::Keep)
            })
            .await
            .unwrap();
        assert_eq!(kept.unwrap().skip_payload_crypto_override, Some(true));
    }

    #[tokio::test]
    async fn test_set_delete() {
        let store: InMemoryStore<ApplicationLink> = InMemoryStore::new(Duration::from_secs(1));
        store
            .set("app", &[], |_| async {
                Ok(Mutation::Write {
                    value: ApplicationLink::default(),
                    paths: vec![],
                })
            })
            .await
            .unwrap();

        let result = store
            .set("app", &[], |_| async { Ok(Mutation::Delete) })
            .await
            .unwrap();

        assert!(result.is_none());
        assert!(store.get("app", &[]).await.is_none());
    }

    #[tokio::test]
    async fn test_mutator_error_leaves_entry_untouched() {
        let store: InMemoryStore<ApplicationLink> = InMemoryStore::new(Duration::from_secs(1));

        let result = store
            .set("app", &[], |_| async {
                Err::<Mutation<ApplicationLink>, _>(DomainError::InvalidArgument("x".to_string()))
            })
            .await;

        assert!(result.is_err());
        assert!(store.get("app", &[]).await.is_none());
    }

    #[tokio::test]
    async fn test_concurrent_writers_serialize() {
        let store: Arc<InMemoryStore<EndDevice>> =
            Arc::new(InMemoryStore::new(Duration::from_secs(5)));
        let mut handles = Vec::new();

        for _ in 0..20 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store
                    .set("app.dev", &[], |stored| async move {
                        let mut dev = stored
                            .unwrap_or_else(|| EndDevice::new(EndDeviceIdentifiers::new("app", "dev")));
                        let session = dev.session.get_or_insert_with(Default::default);
                        tokio::task::yield_now().await;
                        session.last_a_f_cnt_down += 1;
                        Ok(Mutation::Write {
                            value: dev,
                            paths: paths(&["session"]),
                        })
                    })
                    .await
                    .unwrap();
            }));
        }
        for h in handles {
            h.await.unwrap();
        }

        let dev = store.get("app.dev", &[]).await.unwrap();
        assert_eq!(dev.session.unwrap().last_a_f_cnt_down, 20);
    }

    #[tokio::test(start_paused = true)]
    async fn test_lock_wait_is_bounded() {
        let store: Arc<InMemoryStore<ApplicationLink>> =
            Arc::new(InMemoryStore::new(Duration::from_millis(50)));
        let (held_tx, held_rx) = tokio::sync::oneshot::channel();

        let holder = {
            let store = store.clone();
            tokio::spawn(async move {
                store
                    .set("app", &[], |_| async move {
                        let _ = held_tx.send(());
                        tokio::time::sleep(Duration::from_secs(1)).await;
                        Ok(Mutation::Keep)
                    })
                    .await
            })
        };
        held_rx.await.unwrap();

        let result = store.set("app", &[], |_| async { Ok(Mutation::Keep) }).await;

        assert!(matches!(result, Err(DomainError::Aborted(_))));
        holder.await.unwrap().unwrap();
    }
}
