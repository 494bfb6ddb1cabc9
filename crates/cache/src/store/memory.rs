//! In-process Action Store for single-replica deployments and tests

use super::{ActionStore, StoreError};
use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::time::Instant;

/// Writes between sweeps of expired keys
const SWEEP_INTERVAL: usize = 256;

/// Deadline `ttl` from now; a ttl past the clock's range never expires
fn deadline(ttl: Duration) -> Option<Instant> {
    Instant::now().checked_add(ttl)
}

#[derive(Debug, Clone)]
struct StoredValue {
    value: String,
    expires_at: Option<Instant>,
}

impl StoredValue {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

/// Action Store backed by a concurrent map with lazy expiry
#[derive(Debug, Default)]
pub struct MemoryActionStore {
    entries: DashMap<String, StoredValue>,
    writes: AtomicUsize,
}

impl MemoryActionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of keys, including expired ones not yet purged
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drop every expired key
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries.retain(|_, stored| !stored.is_expired(now));
        before - self.entries.len()
    }

    /// Purge expired keys every `SWEEP_INTERVAL` writes; no map guard may be held
    fn record_write(&self) {
        let writes = self.writes.fetch_add(1, Ordering::Relaxed) + 1;
        if writes % SWEEP_INTERVAL == 0 {
            let purged = self.purge_expired();
            if purged > 0 {
                tracing::debug!(purged, "purged expired action entries");
            }
        }
    }
}

#[async_trait]
impl ActionStore for MemoryActionStore {
    async fn set_if_absent(&self, key: &str, value: &str) -> Result<bool, StoreError> {
        let fresh = StoredValue {
            value: value.to_string(),
            expires_at: None,
        };
        // The entry guard holds the shard lock, making check-and-insert atomic.
        let claimed = match self.entries.entry(key.to_string()) {
            Entry::Occupied(mut occupied) => {
                if occupied.get().is_expired(Instant::now()) {
                    occupied.insert(fresh);
                    true
                } else {
                    false
                }
            }
            Entry::Vacant(vacant) => {
                vacant.insert(fresh);
                true
            }
        };
        if claimed {
            self.record_write();
        }
        Ok(claimed)
    }

    async fn set_expiry(&self, key: &str, ttl: Duration) -> Result<(), StoreError> {
        if let Some(mut stored) = self.entries.get_mut(key) {
            stored.expires_at = deadline(ttl);
        }
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let now = Instant::now();
        let value = match self.entries.get(key) {
            Some(stored) if !stored.is_expired(now) => return Ok(Some(stored.value.clone())),
            Some(_) => None,
            None => return Ok(None),
        };
        self.entries
            .remove_if(key, |_, stored| stored.is_expired(now));
        Ok(value)
    }

    async fn set_with_expiry(
        &self,
        key: &str,
        value: &str,
        ttl: Duration,
    ) -> Result<(), StoreError> {
        self.entries.insert(
            key.to_string(),
            StoredValue {
                value: value.to_string(),
                expires_at: deadline(ttl),
            },
        );
        self.record_write();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_set_if_absent_only_once() {
        let store = MemoryActionStore::new();
        assert!(store.set_if_absent("k", "first").await.unwrap());
        assert!(!store.set_if_absent("k", "second").await.unwrap());
        assert_eq!(store.get("k").await.unwrap().as_deref(), Some("first"));
    }

    #[tokio::test]
    async fn test_concurrent_claims_have_one_winner() {
        let store = Arc::new(MemoryActionStore::new());
        let handles: Vec<_> = (0..32)
            .map(|i| {
                let store = Arc::clone(&store);
                tokio::spawn(async move { store.set_if_absent("race", &i.to_string()).await })
            })
            .collect();

        let mut winners = 0;
        for handle in handles {
            if handle.await.unwrap().unwrap() {
                winners += 1;
            }
        }
        assert_eq!(winners, 1);
    }

    #[tokio::test]
    async fn test_expiry() {
        let store = MemoryActionStore::new();
        store
            .set_with_expiry("k", "v", Duration::from_millis(30))
            .await
            .unwrap();
        assert_eq!(store.get("k").await.unwrap().as_deref(), Some("v"));

        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(store.get("k").await.unwrap(), None);
        assert!(store.is_empty());

        // an expired key can be claimed again
        store
            .set_with_expiry("k", "v", Duration::from_millis(10))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(store.set_if_absent("k", "new").await.unwrap());
    }

    #[tokio::test]
    async fn test_set_expiry_on_claimed_key() {
        let store = MemoryActionStore::new();
        store.set_if_absent("k", "started").await.unwrap();
        store
            .set_expiry("k", Duration::from_millis(20))
            .await
            .unwrap();
        // missing keys are ignored
        store
            .set_expiry("missing", Duration::from_millis(20))
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(store.purge_expired(), 1);
        assert_eq!(store.len(), 0);
    }

    #[tokio::test]
    async fn test_writes_sweep_expired_keys() {
        let store = MemoryActionStore::new();
        for i in 0..1010 {
            store
                .set_with_expiry(&format!("short:{i}"), "v", Duration::from_millis(200))
                .await
                .unwrap();
        }
        assert_eq!(store.len(), 1010);
        tokio::time::sleep(Duration::from_millis(300)).await;

        // write 1024 falls after the sleep and sweeps every short-lived key
        for i in 0..SWEEP_INTERVAL {
            store
                .set_with_expiry(&format!("long:{i}"), "v", Duration::from_secs(60))
                .await
                .unwrap();
        }
        assert_eq!(store.len(), SWEEP_INTERVAL);
    }

    #[tokio::test]
    async fn test_huge_ttl_never_expires() {
        let store = MemoryActionStore::new();
        store
            .set_with_expiry("k", "v", Duration::MAX)
            .await
            .unwrap();
        store.set_if_absent("claimed", "started").await.unwrap();
        store.set_expiry("claimed", Duration::MAX).await.unwrap();

        assert_eq!(store.get("k").await.unwrap().as_deref(), Some("v"));
        assert!(!store.set_if_absent("claimed", "again").await.unwrap());
        assert_eq!(store.purge_expired(), 0);
    }
}
