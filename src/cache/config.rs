//! Cache configuration.
//!
//! Resolved from the `[cache]` section of `quire.toml` once settings have been
//! validated.

use std::num::NonZeroUsize;
use std::time::Duration;

use super::entry::StalenessPolicy;
use super::invalidation::InvalidationMode;
use super::keys::ResourceKind;
use super::pool::OverflowPolicy;

const DEFAULT_NAMESPACE: &str = "quire";
const DEFAULT_LOCK_TTL_SECS: u64 = 10;
const DEFAULT_REFRESH_WORKERS: usize = 4;
const DEFAULT_REFRESH_QUEUE_CAPACITY: usize = 256;

#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// First segment of every key.
    pub namespace: String,
    pub post_policy: StalenessPolicy,
    pub list_policy: StalenessPolicy,
    pub tags_policy: StalenessPolicy,
    /// TTL of the advisory refresh lock.
    pub lock_ttl: Duration,
    pub refresh_workers: NonZeroUsize,
    pub refresh_queue_capacity: NonZeroUsize,
    pub refresh_overflow: OverflowPolicy,
    pub invalidation_mode: InvalidationMode,
    /// Extra list prefixes written by earlier key layouts.
    pub legacy_list_prefixes: Vec<String>,
    /// Share one upstream fetch between concurrent misses in this process.
    pub single_flight_misses: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            namespace: DEFAULT_NAMESPACE.to_string(),
            post_policy: StalenessPolicy::POST,
            list_policy: StalenessPolicy::LIST,
            tags_policy: StalenessPolicy::TAGS,
            lock_ttl: Duration::from_secs(DEFAULT_LOCK_TTL_SECS),
            refresh_workers: NonZeroUsize::new(DEFAULT_REFRESH_WORKERS)
                .unwrap_or(NonZeroUsize::MIN),
            refresh_queue_capacity: NonZeroUsize::new(DEFAULT_REFRESH_QUEUE_CAPACITY)
                .unwrap_or(NonZeroUsize::MIN),
            refresh_overflow: OverflowPolicy::DropOldest,
            invalidation_mode: InvalidationMode::Filter,
            legacy_list_prefixes: Vec::new(),
            single_flight_misses: false,
        }
    }
}

impl CacheConfig {
    /// Build from validated settings; an unset namespace falls back to `source_id`.
    pub fn from_settings(settings: &crate::config::CacheSettings, source_id: &str) -> Self {
        Self {
            namespace: settings
                .namespace
                .clone()
                .unwrap_or_else(|| source_id.to_string()),
            post_policy: settings.post_policy,
            list_policy: settings.list_policy,
            tags_policy: settings.tags_policy,
            lock_ttl: settings.lock_ttl,
            refresh_workers: settings.refresh_workers,
            refresh_queue_capacity: settings.refresh_queue_capacity,
            refresh_overflow: settings.refresh_overflow,
            invalidation_mode: settings.invalidation_mode,
            legacy_list_prefixes: settings.legacy_list_prefixes.clone(),
            single_flight_misses: settings.single_flight_misses,
        }
    }

    pub fn policy(&self, kind: ResourceKind) -> StalenessPolicy {
        match kind {
            ResourceKind::Post => self.post_policy,
            ResourceKind::List => self.list_policy,
            ResourceKind::Tags => self.tags_policy,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_values() {
        let config = CacheConfig::default();
        assert_eq!(config.namespace, "quire");
        assert_eq!(config.policy(ResourceKind::Post).ttl(), Duration::from_secs(3600));
        assert_eq!(config.policy(ResourceKind::Post).stale_after(), Duration::from_secs(30));
        assert_eq!(config.policy(ResourceKind::List).ttl(), Duration::from_secs(300));
        assert_eq!(config.policy(ResourceKind::Tags).stale_after(), Duration::from_secs(60));
        assert_eq!(config.lock_ttl, Duration::from_secs(10));
        assert_eq!(config.refresh_workers.get(), 4);
        assert_eq!(config.refresh_overflow, OverflowPolicy::DropOldest);
        assert_eq!(config.invalidation_mode, InvalidationMode::Filter);
        assert!(!config.single_flight_misses);
    }
}
