//! Key-value store selection at startup.

use std::sync::Arc;

use tracing::{info, warn};

use crate::{
    cache::{
        Clock, Diagnostics, StoreBackend,
        store::{CacheStore, DisabledStore, KeyValueStore, MemoryStore, RedisStore},
    },
    config::{RuntimeEnvironment, StoreMode, StoreSettings},
};

/// Backend the settings ask for, before any connection attempt.
pub fn select_backend(settings: &StoreSettings) -> StoreBackend {
    match settings.mode {
        StoreMode::Redis => StoreBackend::Redis,
        StoreMode::Memory => StoreBackend::Memory,
        StoreMode::Disabled => StoreBackend::Disabled,
        StoreMode::Auto => match (&settings.url, settings.environment) {
            (Some(_), _) => StoreBackend::Redis,
            (None, RuntimeEnvironment::Development) => StoreBackend::Memory,
            (None, RuntimeEnvironment::Production) => StoreBackend::Disabled,
        },
    }
}

/// Build the cache store. A Redis backend that cannot be reached degrades to
/// the disabled store so the service still answers from the source.
pub async fn build_store(
    settings: &StoreSettings,
    clock: Clock,
    diagnostics: Arc<Diagnostics>,
) -> CacheStore {
    let inner: Arc<dyn KeyValueStore> = match select_backend(settings) {
        StoreBackend::Redis => match settings.url.as_deref() {
            Some(url) => match RedisStore::connect(url, settings.scan_count.get()).await {
                Ok(store) => Arc::new(store),
                Err(err) => {
                    warn!(
                        target: "quire::infra::store",
                        error = %err,
                        "redis unavailable, caching disabled"
                    );
                    Arc::new(DisabledStore)
                }
            },
            None => {
                warn!(
                    target: "quire::infra::store",
                    "redis selected without a URL, caching disabled"
                );
                Arc::new(DisabledStore)
            }
        },
        StoreBackend::Memory => Arc::new(MemoryStore::new(clock)),
        StoreBackend::Disabled => Arc::new(DisabledStore),
    };

    info!(
        target: "quire::infra::store",
        backend = inner.backend().as_str(),
        "cache store ready"
    );
    CacheStore::new(inner, diagnostics)
}
