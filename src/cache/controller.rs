//! Read-through cache controller.
//!
//! Each read lands in one of three states:
//!
//! - **Fresh**: the entry is younger than the policy's `stale_after`; it is
//!   returned and the source is not contacted.
//! - **Stale**: the entry is past `stale_after` but inside its TTL; it is
//!   returned immediately and a background refresh is queued on the
//!   [`RefreshPool`]. The caller never waits on that refresh.
//! - **Miss**: nothing usable is cached; the loader runs inline and the result
//!   is written back with the policy TTL.
//!
//! A not-found from a loader that reads by identity triggers the
//! [`Invalidator`] before the error is returned, so list views stop showing
//! content the source has dropped.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use futures::FutureExt;
use metrics::counter;
use serde::Serialize;
use serde::de::DeserializeOwned;
use thiserror::Error;
use tracing::{debug, instrument, warn};

use super::clock::Clock;
use super::config::CacheConfig;
use super::diagnostics::{DiagnosticKind, Diagnostics};
use super::entry::{CacheEntry, Freshness, StalenessPolicy};
use super::invalidation::Invalidator;
use super::keys::CacheKey;
use super::pool::{RefreshPool, Submission};
use super::refresh::RefreshCoordinator;
use super::single_flight::SingleFlight;
use super::store::{CacheStore, StoreBackend};
use crate::source::{ChangeMarker, SourceError};

const METRIC_READ: &str = "quire_cache_read_total";

/// Where a read was served from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServedFrom {
    Fresh,
    Stale,
    Miss,
}

impl ServedFrom {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Fresh => "fresh",
            Self::Stale => "stale",
            Self::Miss => "miss",
        }
    }
}

impl fmt::Display for ServedFrom {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Payload returned by a cached read.
#[derive(Debug, Clone, PartialEq)]
pub struct Cached<T> {
    pub data: T,
    pub served_from: ServedFrom,
}

/// Caller-facing read failure. Only produced when nothing usable is cached.
#[derive(Debug, Clone, Error)]
pub enum ReadError {
    #[error("content not found")]
    NotFound,
    #[error(transparent)]
    Source(SourceError),
}

impl From<SourceError> for ReadError {
    fn from(err: SourceError) -> Self {
        match err {
            SourceError::NotFound => Self::NotFound,
            other => Self::Source(other),
        }
    }
}

/// Fetches one cacheable value from the content source.
#[async_trait]
pub trait Loader: Send + Sync + 'static {
    type Output: Serialize + DeserializeOwned + Clone + Send + Sync + 'static;

    async fn load(&self) -> Result<Self::Output, SourceError>;

    /// Slug this loader reads by identity. A not-found from such a loader
    /// means the content was removed and dependent entries must be scrubbed.
    fn identity(&self) -> Option<&str> {
        None
    }

    /// Whether [`Loader::probe`] is worth calling.
    fn supports_probe(&self) -> bool {
        false
    }

    /// Current upstream change marker.
    async fn probe(&self) -> Result<Option<ChangeMarker>, SourceError> {
        Ok(None)
    }

    /// Change marker embedded in a cached value.
    fn marker(&self, _data: &Self::Output) -> Option<ChangeMarker> {
        None
    }
}

/// Decode a stored entry; undecodable values are recorded and read as absent.
pub(crate) fn decode_entry<T: DeserializeOwned>(
    raw: &str,
    key: &CacheKey,
    diagnostics: &Diagnostics,
) -> Option<CacheEntry<T>> {
    match serde_json::from_str(raw) {
        Ok(entry) => Some(entry),
        Err(err) => {
            diagnostics.record(DiagnosticKind::CorruptEntry, key.as_str(), Some(err.to_string()));
            None
        }
    }
}

pub(crate) fn encode_entry<T: Serialize>(entry: &CacheEntry<T>, key: &CacheKey) -> Option<String> {
    match serde_json::to_string(entry) {
        Ok(raw) => Some(raw),
        Err(err) => {
            warn!(key = %key, error = %err, "failed to encode cache entry; skipping write");
            None
        }
    }
}

/// The stale-while-revalidate read path.
pub struct ReadThrough {
    store: CacheStore,
    clock: Clock,
    refresher: Arc<RefreshCoordinator>,
    invalidator: Arc<Invalidator>,
    pool: RefreshPool,
    flights: Option<SingleFlight>,
}

impl ReadThrough {
    /// Wire the controller and start its refresh pool on the current runtime.
    pub fn start(store: CacheStore, clock: Clock, config: &CacheConfig) -> Self {
        let invalidator = Arc::new(Invalidator::new(
            store.clone(),
            clock.clone(),
            config.namespace.clone(),
            config.list_policy,
            config.invalidation_mode,
            config.legacy_list_prefixes.clone(),
        ));
        let refresher = Arc::new(RefreshCoordinator::new(
            store.clone(),
            clock.clone(),
            config.lock_ttl,
            Arc::clone(&invalidator),
        ));
        let pool = RefreshPool::start(
            config.refresh_workers,
            config.refresh_queue_capacity,
            config.refresh_overflow,
            Arc::clone(store.diagnostics()),
        );

        Self {
            store,
            clock,
            refresher,
            invalidator,
            pool,
            flights: config.single_flight_misses.then(SingleFlight::new),
        }
    }

    pub fn invalidator(&self) -> &Arc<Invalidator> {
        &self.invalidator
    }

    pub fn pool(&self) -> &RefreshPool {
        &self.pool
    }

    pub fn diagnostics(&self) -> &Arc<Diagnostics> {
        self.store.diagnostics()
    }

    pub fn backend(&self) -> StoreBackend {
        self.store.backend()
    }

    /// Serve `key` under `policy`, falling back to `loader` on a miss.
    #[instrument(skip(self, policy, loader), fields(key = %key))]
    pub async fn read<L: Loader>(
        &self,
        key: CacheKey,
        policy: StalenessPolicy,
        loader: Arc<L>,
    ) -> Result<Cached<L::Output>, ReadError> {
        if let Some(raw) = self.store.get(key.as_str()).await
            && let Some(entry) = decode_entry::<L::Output>(&raw, &key, self.diagnostics())
        {
            match policy.classify(entry.age(self.clock.now_ms())) {
                Freshness::Fresh => return Ok(self.served(entry.data, ServedFrom::Fresh)),
                Freshness::Stale => {
                    self.schedule_refresh(&key, policy, &loader);
                    return Ok(self.served(entry.data, ServedFrom::Stale));
                }
                Freshness::Expired => {
                    debug!(key = %key, "entry outlived its ttl; treating as miss");
                }
            }
        }

        let data = match &self.flights {
            Some(flights) => {
                let store = self.store.clone();
                let clock = self.clock.clone();
                let invalidator = Arc::clone(&self.invalidator);
                let flight_key = key.clone();
                flights
                    .run(key.as_str(), move || {
                        async move {
                            fetch_and_store(&store, &clock, &invalidator, &flight_key, policy, loader.as_ref())
                                .await
                        }
                        .boxed()
                    })
                    .await?
            }
            None => {
                fetch_and_store(
                    &self.store,
                    &self.clock,
                    &self.invalidator,
                    &key,
                    policy,
                    loader.as_ref(),
                )
                .await?
            }
        };

        Ok(self.served(data, ServedFrom::Miss))
    }

    fn served<T>(&self, data: T, served_from: ServedFrom) -> Cached<T> {
        counter!(METRIC_READ, "served_from" => served_from.as_str()).increment(1);
        Cached { data, served_from }
    }

    fn schedule_refresh<L: Loader>(&self, key: &CacheKey, policy: StalenessPolicy, loader: &Arc<L>) {
        let refresher = Arc::clone(&self.refresher);
        let loader = Arc::clone(loader);
        let job_key = key.clone();
        let task = async move { refresher.refresh(&job_key, policy, loader.as_ref()).await }.boxed();

        match self.pool.submit(key.clone(), task) {
            Submission::Queued | Submission::Coalesced => {}
            Submission::Evicted(evicted) => {
                debug!(key = %key, evicted = %evicted, "refresh queue full; evicted oldest job");
            }
            Submission::Rejected => debug!(key = %key, "refresh queue full; job rejected"),
            Submission::Closed => debug!(key = %key, "refresh pool closed; refresh skipped"),
        }
    }

    /// Stop the refresh pool and wait for running refreshes.
    pub async fn shutdown(&self) {
        self.pool.shutdown().await;
    }
}

async fn fetch_and_store<L: Loader>(
    store: &CacheStore,
    clock: &Clock,
    invalidator: &Invalidator,
    key: &CacheKey,
    policy: StalenessPolicy,
    loader: &L,
) -> Result<L::Output, ReadError> {
    match loader.load().await {
        Ok(data) => {
            let entry = CacheEntry::new(data, clock.now_ms());
            if let Some(raw) = encode_entry(&entry, key) {
                store.set(key.as_str(), &raw, Some(policy.ttl())).await;
            }
            Ok(entry.data)
        }
        Err(SourceError::NotFound) => {
            store
                .diagnostics()
                .record(DiagnosticKind::SourceNotFound, key.as_str(), None);
            if let Some(slug) = loader.identity() {
                invalidator.invalidate(slug).await;
            }
            Err(ReadError::NotFound)
        }
        Err(err) => {
            store.diagnostics().record(
                DiagnosticKind::SourceTransient,
                key.as_str(),
                Some(err.to_string()),
            );
            Err(ReadError::Source(err))
        }
    }
}
