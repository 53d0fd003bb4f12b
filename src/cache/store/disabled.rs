//! No-op store used when caching is unavailable.

use std::time::Duration;

use async_trait::async_trait;

use super::{KeyValueStore, StoreBackend, StoreError};

/// Store that keeps nothing: every read misses and every write is dropped.
#[derive(Debug, Default, Clone, Copy)]
pub struct DisabledStore;

#[async_trait]
impl KeyValueStore for DisabledStore {
    fn backend(&self) -> StoreBackend {
        StoreBackend::Disabled
    }

    async fn get(&self, _key: &str) -> Result<Option<String>, StoreError> {
        Ok(None)
    }

    async fn set(&self, _key: &str, _value: &str, _ttl: Option<Duration>) -> Result<(), StoreError> {
        Ok(())
    }

    async fn set_if_absent(
        &self,
        _key: &str,
        _value: &str,
        _ttl: Duration,
    ) -> Result<bool, StoreError> {
        Ok(false)
    }

    async fn delete(&self, _key: &str) -> Result<(), StoreError> {
        Ok(())
    }

    async fn delete_many(&self, _keys: &[String]) -> Result<(), StoreError> {
        Ok(())
    }

    async fn scan_prefix(&self, _prefix: &str) -> Result<Vec<String>, StoreError> {
        Ok(Vec::new())
    }
}
