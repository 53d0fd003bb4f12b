//! Key-value store adapters.
//!
//! [`KeyValueStore`] is the raw backend contract and reports failures.
//! [`CacheStore`] is what the cache layer actually talks to: it absorbs every
//! backend failure into a structured diagnostic plus the neutral result for the
//! operation (miss, no-op, lock not acquired, empty scan), so a broken cache
//! can never fail a request.

mod disabled;
mod memory;
mod redis;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use metrics::counter;
use thiserror::Error;

pub use self::disabled::DisabledStore;
pub use self::memory::MemoryStore;
pub use self::redis::RedisStore;

use super::diagnostics::{DiagnosticKind, Diagnostics, StoreOp};

const METRIC_BACKEND_ERROR: &str = "quire_cache_backend_error_total";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("cache backend error: {0}")]
    Backend(String),
    #[error("cache backend unavailable: {0}")]
    Unavailable(String),
}

impl StoreError {
    pub fn backend(err: impl std::fmt::Display) -> Self {
        Self::Backend(err.to_string())
    }
}

/// Which backend a store is running on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreBackend {
    Redis,
    Memory,
    Disabled,
}

impl StoreBackend {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Redis => "redis",
            Self::Memory => "memory",
            Self::Disabled => "disabled",
        }
    }
}

/// Raw key-value backend.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    fn backend(&self) -> StoreBackend;

    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    /// Store `value`; `ttl` of `None` keeps the key until deleted.
    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<(), StoreError>;

    /// Atomically store `value` only if `key` is absent. Returns whether it was stored.
    async fn set_if_absent(
        &self,
        key: &str,
        value: &str,
        ttl: Duration,
    ) -> Result<bool, StoreError>;

    async fn delete(&self, key: &str) -> Result<(), StoreError>;

    async fn delete_many(&self, keys: &[String]) -> Result<(), StoreError>;

    /// Keys beginning with `prefix`. Never a full keyspace walk.
    async fn scan_prefix(&self, prefix: &str) -> Result<Vec<String>, StoreError>;
}

/// Failure-absorbing handle over a [`KeyValueStore`].
#[derive(Clone)]
pub struct CacheStore {
    inner: Arc<dyn KeyValueStore>,
    diagnostics: Arc<Diagnostics>,
}

impl CacheStore {
    pub fn new(inner: Arc<dyn KeyValueStore>, diagnostics: Arc<Diagnostics>) -> Self {
        Self { inner, diagnostics }
    }

    pub fn backend(&self) -> StoreBackend {
        self.inner.backend()
    }

    pub fn diagnostics(&self) -> &Arc<Diagnostics> {
        &self.diagnostics
    }

    /// Read a key; backend failures read as a miss.
    pub async fn get(&self, key: &str) -> Option<String> {
        match self.inner.get(key).await {
            Ok(value) => value,
            Err(err) => {
                self.backend_error(StoreOp::Get, key, &err);
                None
            }
        }
    }

    /// Best-effort write.
    pub async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) {
        if let Err(err) = self.inner.set(key, value, ttl).await {
            self.backend_error(StoreOp::Set, key, &err);
        }
    }

    /// Lock-style conditional write; backend failures read as "not acquired".
    pub async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> bool {
        match self.inner.set_if_absent(key, value, ttl).await {
            Ok(acquired) => acquired,
            Err(err) => {
                self.backend_error(StoreOp::SetIfAbsent, key, &err);
                false
            }
        }
    }

    pub async fn delete(&self, key: &str) {
        if let Err(err) = self.inner.delete(key).await {
            self.backend_error(StoreOp::Delete, key, &err);
        }
    }

    pub async fn delete_many(&self, keys: &[String]) {
        if keys.is_empty() {
            return;
        }
        if let Err(err) = self.inner.delete_many(keys).await {
            let label = keys.first().map(String::as_str).unwrap_or_default();
            self.backend_error(StoreOp::Delete, label, &err);
        }
    }

    /// Prefix scan; backend failures read as no matches.
    pub async fn scan_prefix(&self, prefix: &str) -> Vec<String> {
        match self.inner.scan_prefix(prefix).await {
            Ok(keys) => keys,
            Err(err) => {
                self.backend_error(StoreOp::Scan, prefix, &err);
                Vec::new()
            }
        }
    }

    fn backend_error(&self, op: StoreOp, key: &str, err: &StoreError) {
        counter!(METRIC_BACKEND_ERROR, "op" => op.as_str()).increment(1);
        self.diagnostics
            .record(DiagnosticKind::BackendError(op), key, Some(err.to_string()));
    }
}
