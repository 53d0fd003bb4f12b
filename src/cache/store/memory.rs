//! Process-local store used when no remote backend is configured.
//!
//! Entries honor TTLs against the shared [`Clock`] so local development sees
//! the same expiry behaviour as the remote store. Contents are not shared
//! across processes.

use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;

use super::{KeyValueStore, StoreBackend, StoreError};
use crate::cache::clock::Clock;

#[derive(Debug, Clone)]
struct StoredValue {
    value: String,
    expires_at_ms: Option<i64>,
}

impl StoredValue {
    fn is_live(&self, now_ms: i64) -> bool {
        self.expires_at_ms.is_none_or(|deadline| now_ms < deadline)
    }
}

pub struct MemoryStore {
    entries: DashMap<String, StoredValue>,
    clock: Clock,
}

impl MemoryStore {
    pub fn new(clock: Clock) -> Self {
        Self {
            entries: DashMap::new(),
            clock,
        }
    }

    fn deadline(&self, ttl: Option<Duration>) -> Option<i64> {
        ttl.map(|ttl| self.clock.now_ms().saturating_add(ttl.as_millis() as i64))
    }

    /// Number of live entries.
    pub fn len(&self) -> usize {
        let now = self.clock.now_ms();
        self.entries.iter().filter(|e| e.value().is_live(now)).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    fn backend(&self) -> StoreBackend {
        StoreBackend::Memory
    }

    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let now = self.clock.now_ms();
        let live = self
            .entries
            .get(key)
            .map(|stored| (stored.is_live(now), stored.value.clone()));

        match live {
            Some((true, value)) => Ok(Some(value)),
            Some((false, _)) => {
                self.entries.remove_if(key, |_, stored| !stored.is_live(now));
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<(), StoreError> {
        self.entries.insert(
            key.to_string(),
            StoredValue {
                value: value.to_string(),
                expires_at_ms: self.deadline(ttl),
            },
        );
        Ok(())
    }

    async fn set_if_absent(
        &self,
        key: &str,
        value: &str,
        ttl: Duration,
    ) -> Result<bool, StoreError> {
        let now = self.clock.now_ms();
        let stored = StoredValue {
            value: value.to_string(),
            expires_at_ms: self.deadline(Some(ttl)),
        };

        match self.entries.entry(key.to_string()) {
            Entry::Occupied(mut occupied) => {
                if occupied.get().is_live(now) {
                    Ok(false)
                } else {
                    occupied.insert(stored);
                    Ok(true)
                }
            }
            Entry::Vacant(vacant) => {
                vacant.insert(stored);
                Ok(true)
            }
        }
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        self.entries.remove(key);
        Ok(())
    }

    async fn delete_many(&self, keys: &[String]) -> Result<(), StoreError> {
        for key in keys {
            self.entries.remove(key);
        }
        Ok(())
    }

    async fn scan_prefix(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
        let now = self.clock.now_ms();
        let mut keys: Vec<String> = self
            .entries
            .iter()
            .filter(|entry| entry.key().starts_with(prefix) && entry.value().is_live(now))
            .map(|entry| entry.key().clone())
            .collect();
        keys.sort();
        Ok(keys)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> (MemoryStore, crate::cache::clock::ClockControl) {
        let (clock, control) = Clock::manual(0);
        (MemoryStore::new(clock), control)
    }

    #[tokio::test]
    async fn set_get_delete_roundtrip() {
        let (store, _) = store();
        store.set("a", "1", None).await.expect("set");
        assert_eq!(store.get("a").await.expect("get"), Some("1".to_string()));

        store.delete("a").await.expect("delete");
        assert_eq!(store.get("a").await.expect("get"), None);
    }

    #[tokio::test]
    async fn ttl_expires_entries() {
        let (store, control) = store();
        store
            .set("a", "1", Some(Duration::from_secs(10)))
            .await
            .expect("set");

        control.advance(Duration::from_secs(9));
        assert!(store.get("a").await.expect("get").is_some());

        control.advance(Duration::from_secs(1));
        assert!(store.get("a").await.expect("get").is_none());
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn set_if_absent_behaves_like_nx_ex() {
        let (store, control) = store();
        let ttl = Duration::from_secs(10);

        assert!(store.set_if_absent("lock", "1", ttl).await.expect("nx"));
        assert!(!store.set_if_absent("lock", "1", ttl).await.expect("nx"));

        control.advance(ttl);
        assert!(store.set_if_absent("lock", "1", ttl).await.expect("nx"));
    }

    #[tokio::test]
    async fn scan_is_prefix_scoped_and_skips_expired() {
        let (store, control) = store();
        store.set("ns:list:0:10:all", "[]", None).await.expect("set");
        store
            .set("ns:list:10:10:all", "[]", Some(Duration::from_secs(1)))
            .await
            .expect("set");
        store.set("ns:post:a", "{}", None).await.expect("set");
        store.set("other:list:0:10:all", "[]", None).await.expect("set");

        control.advance(Duration::from_secs(2));
        let keys = store.scan_prefix("ns:list:").await.expect("scan");
        assert_eq!(keys, vec!["ns:list:0:10:all".to_string()]);
    }

    #[tokio::test]
    async fn delete_many_removes_each_key() {
        let (store, _) = store();
        store.set("a", "1", None).await.expect("set");
        store.set("b", "2", None).await.expect("set");
        store
            .delete_many(&["a".to_string(), "b".to_string()])
            .await
            .expect("delete_many");
        assert_eq!(store.len(), 0);
    }
}
