//! Cached payload wrapper and staleness policy.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Value stored under a cache key.
///
/// `fetched_at` records when `data` was last confirmed against the content
/// source, in unix milliseconds. It is independent of the key's store TTL.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry<T> {
    pub data: T,
    #[serde(rename = "fetchedAt")]
    pub fetched_at: i64,
}

impl<T> CacheEntry<T> {
    pub fn new(data: T, fetched_at: i64) -> Self {
        Self { data, fetched_at }
    }

    /// Age relative to `now_ms`; an entry from the future counts as brand new.
    pub fn age(&self, now_ms: i64) -> Duration {
        Duration::from_millis(now_ms.saturating_sub(self.fetched_at).max(0) as u64)
    }
}

/// How a cached value relates to its policy at read time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Freshness {
    Fresh,
    Stale,
    Expired,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PolicyError {
    #[error("ttl must be greater than zero")]
    ZeroTtl,
    #[error("stale_after ({stale_after:?}) must be shorter than ttl ({ttl:?})")]
    StaleAfterNotBeforeTtl { stale_after: Duration, ttl: Duration },
}

/// Soft and hard expiry thresholds for one kind of cached resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StalenessPolicy {
    ttl: Duration,
    stale_after: Duration,
}

impl StalenessPolicy {
    /// Single item reads.
    pub const POST: Self = Self {
        ttl: Duration::from_secs(3600),
        stale_after: Duration::from_secs(30),
    };
    /// Paged list views.
    pub const LIST: Self = Self {
        ttl: Duration::from_secs(300),
        stale_after: Duration::from_secs(30),
    };
    /// Tag listings.
    pub const TAGS: Self = Self {
        ttl: Duration::from_secs(600),
        stale_after: Duration::from_secs(60),
    };

    /// Build a policy; `stale_after` must be strictly shorter than `ttl`.
    pub fn new(ttl: Duration, stale_after: Duration) -> Result<Self, PolicyError> {
        if ttl.is_zero() {
            return Err(PolicyError::ZeroTtl);
        }
        if stale_after >= ttl {
            return Err(PolicyError::StaleAfterNotBeforeTtl { stale_after, ttl });
        }
        Ok(Self { ttl, stale_after })
    }

    pub fn from_secs(ttl_seconds: u64, stale_after_seconds: u64) -> Result<Self, PolicyError> {
        Self::new(
            Duration::from_secs(ttl_seconds),
            Duration::from_secs(stale_after_seconds),
        )
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn stale_after(&self) -> Duration {
        self.stale_after
    }

    pub fn classify(&self, age: Duration) -> Freshness {
        if age < self.stale_after {
            Freshness::Fresh
        } else if age < self.ttl {
            Freshness::Stale
        } else {
            Freshness::Expired
        }
    }

    /// Store TTL left for an entry of the given age, never below one second.
    pub fn remaining_ttl(&self, age: Duration) -> Duration {
        self.ttl
            .saturating_sub(age)
            .max(Duration::from_secs(1))
    }
}
