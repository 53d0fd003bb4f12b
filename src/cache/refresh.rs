//! Background refresh coordinator.
//!
//! Runs one refresh attempt for a stale key: take the advisory lock, probe for
//! change when the loader can, re-fetch when it must, and release the lock.
//! Nothing here ever returns an error; every failure becomes a
//! [`RefreshOutcome`] plus a diagnostic, and the stale entry stays servable.

use std::sync::Arc;
use std::time::Duration;

use metrics::counter;
use tracing::{debug, info, instrument};

use super::clock::Clock;
use super::controller::{Loader, decode_entry, encode_entry};
use super::diagnostics::{DiagnosticKind, Diagnostics};
use super::entry::{CacheEntry, Freshness, StalenessPolicy};
use super::invalidation::Invalidator;
use super::keys::CacheKey;
use super::store::CacheStore;
use crate::source::SourceError;

const METRIC_REFRESH: &str = "quire_refresh_total";
const LOCK_SENTINEL: &str = "1";

/// Result of one refresh attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshOutcome {
    /// Full fetch succeeded and replaced the entry.
    Refreshed,
    /// The probe reported no change; only `fetchedAt` moved.
    Touched,
    /// Another process refreshed the entry before the lock was taken.
    AlreadyFresh,
    /// Another holder owns the lock.
    Contended,
    /// The source no longer has the content; dependent entries were scrubbed.
    Removed,
    /// The fetch failed; the stale entry was kept.
    Failed,
}

impl RefreshOutcome {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Refreshed => "refreshed",
            Self::Touched => "touched",
            Self::AlreadyFresh => "already_fresh",
            Self::Contended => "contended",
            Self::Removed => "removed",
            Self::Failed => "failed",
        }
    }
}

pub struct RefreshCoordinator {
    store: CacheStore,
    clock: Clock,
    lock_ttl: Duration,
    invalidator: Arc<Invalidator>,
}

impl RefreshCoordinator {
    pub fn new(
        store: CacheStore,
        clock: Clock,
        lock_ttl: Duration,
        invalidator: Arc<Invalidator>,
    ) -> Self {
        Self {
            store,
            clock,
            lock_ttl,
            invalidator,
        }
    }

    fn diagnostics(&self) -> &Diagnostics {
        self.store.diagnostics()
    }

    /// Refresh `key` under its advisory lock.
    #[instrument(skip(self, policy, loader), fields(key = %key))]
    pub async fn refresh<L: Loader>(
        &self,
        key: &CacheKey,
        policy: StalenessPolicy,
        loader: &L,
    ) -> RefreshOutcome {
        let lock_key = key.lock_key();
        if !self
            .store
            .set_if_absent(&lock_key, LOCK_SENTINEL, self.lock_ttl)
            .await
        {
            self.diagnostics()
                .record(DiagnosticKind::LockContention, key.as_str(), None);
            return self.finish(key, RefreshOutcome::Contended);
        }

        let outcome = self.refresh_locked(key, policy, loader).await;
        self.store.delete(&lock_key).await;
        self.finish(key, outcome)
    }

    fn finish(&self, key: &CacheKey, outcome: RefreshOutcome) -> RefreshOutcome {
        counter!(METRIC_REFRESH, "outcome" => outcome.as_str()).increment(1);
        debug!(key = %key, outcome = outcome.as_str(), "refresh attempt finished");
        outcome
    }

    async fn refresh_locked<L: Loader>(
        &self,
        key: &CacheKey,
        policy: StalenessPolicy,
        loader: &L,
    ) -> RefreshOutcome {
        let current = match self.store.get(key.as_str()).await {
            Some(raw) => decode_entry::<L::Output>(&raw, key, self.diagnostics()),
            None => None,
        };

        if let Some(entry) = current.as_ref()
            && policy.classify(entry.age(self.clock.now_ms())) == Freshness::Fresh
        {
            return RefreshOutcome::AlreadyFresh;
        }

        if let Some(entry) = current
            && self.is_unchanged(key, &entry, loader).await
        {
            let touched = CacheEntry::new(entry.data, self.clock.now_ms());
            self.write(key, &touched, policy).await;
            return RefreshOutcome::Touched;
        }

        match loader.load().await {
            Ok(data) => {
                let entry = CacheEntry::new(data, self.clock.now_ms());
                self.write(key, &entry, policy).await;
                RefreshOutcome::Refreshed
            }
            Err(SourceError::NotFound) => {
                self.diagnostics()
                    .record(DiagnosticKind::SourceNotFound, key.as_str(), None);
                match loader.identity() {
                    Some(slug) => {
                        let report = self.invalidator.invalidate(slug).await;
                        info!(
                            key = %key,
                            slug,
                            lists_rewritten = report.lists_rewritten,
                            lists_deleted = report.lists_deleted,
                            "content removed upstream during refresh"
                        );
                    }
                    None => self.store.delete(key.as_str()).await,
                }
                RefreshOutcome::Removed
            }
            Err(err) => {
                self.diagnostics().record(
                    DiagnosticKind::RefreshFailed,
                    key.as_str(),
                    Some(err.to_string()),
                );
                RefreshOutcome::Failed
            }
        }
    }

    /// True when the loader's probe matches the marker embedded in `entry`.
    async fn is_unchanged<L: Loader>(
        &self,
        key: &CacheKey,
        entry: &CacheEntry<L::Output>,
        loader: &L,
    ) -> bool {
        if !loader.supports_probe() {
            return false;
        }
        let Some(cached) = loader.marker(&entry.data) else {
            return false;
        };

        match loader.probe().await {
            Ok(Some(current)) => current == cached,
            Ok(None) => false,
            Err(err) => {
                debug!(key = %key, error = %err, "change probe failed; falling back to full fetch");
                false
            }
        }
    }

    async fn write<T: serde::Serialize>(
        &self,
        key: &CacheKey,
        entry: &CacheEntry<T>,
        policy: StalenessPolicy,
    ) {
        if let Some(raw) = encode_entry(entry, key) {
            self.store
                .set(key.as_str(), &raw, Some(policy.ttl()))
                .await;
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;

    use super::*;
    use crate::cache::clock::ClockControl;
    use crate::cache::invalidation::InvalidationMode;
    use crate::cache::store::MemoryStore;
    use crate::source::ChangeMarker;

    /// Loader over a single string value whose marker is the value itself.
    struct ScriptedLoader {
        next: Mutex<Result<String, SourceError>>,
        probe: Option<&'static str>,
        identity: Option<&'static str>,
        loads: AtomicUsize,
    }

    impl ScriptedLoader {
        fn returning(result: Result<String, SourceError>) -> Self {
            Self {
                next: Mutex::new(result),
                probe: None,
                identity: None,
                loads: AtomicUsize::new(0),
            }
        }

        fn loads(&self) -> usize {
            self.loads.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Loader for ScriptedLoader {
        type Output = String;

        async fn load(&self) -> Result<String, SourceError> {
            self.loads.fetch_add(1, Ordering::SeqCst);
            self.next.lock().expect("script").clone()
        }

        fn identity(&self) -> Option<&str> {
            self.identity
        }

        fn supports_probe(&self) -> bool {
            self.probe.is_some()
        }

        async fn probe(&self) -> Result<Option<ChangeMarker>, SourceError> {
            Ok(self.probe.map(ChangeMarker::new))
        }

        fn marker(&self, data: &String) -> Option<ChangeMarker> {
            Some(ChangeMarker::new(data.clone()))
        }
    }

    struct Fixture {
        coordinator: RefreshCoordinator,
        store: CacheStore,
        control: ClockControl,
        key: CacheKey,
    }

    async fn fixture(cached: Option<&str>) -> Fixture {
        let (clock, control) = Clock::manual(0);
        let store = CacheStore::new(
            Arc::new(MemoryStore::new(clock.clone())),
            Arc::new(Diagnostics::new()),
        );
        let invalidator = Arc::new(Invalidator::new(
            store.clone(),
            clock.clone(),
            "ns",
            StalenessPolicy::LIST,
            InvalidationMode::Filter,
            Vec::new(),
        ));
        let key = CacheKey::from_raw("ns:post:hello");
        if let Some(value) = cached {
            let raw = encode_entry(&CacheEntry::new(value.to_string(), 0), &key).expect("encode");
            store.set(key.as_str(), &raw, None).await;
        }
        Fixture {
            coordinator: RefreshCoordinator::new(
                store.clone(),
                clock,
                Duration::from_secs(10),
                invalidator,
            ),
            store,
            control,
            key,
        }
    }

    async fn stored(store: &CacheStore, key: &CacheKey) -> Option<CacheEntry<String>> {
        let raw = store.get(key.as_str()).await?;
        Some(serde_json::from_str(&raw).expect("decode"))
    }

    #[tokio::test]
    async fn held_lock_is_a_no_op() {
        let fx = fixture(Some("A")).await;
        assert!(
            fx.store
                .set_if_absent(&fx.key.lock_key(), "other", Duration::from_secs(10))
                .await
        );
        let loader = ScriptedLoader::returning(Ok("B".to_string()));

        let outcome = fx
            .coordinator
            .refresh(&fx.key, StalenessPolicy::POST, &loader)
            .await;

        assert_eq!(outcome, RefreshOutcome::Contended);
        assert_eq!(loader.loads(), 0);
        assert_eq!(
            fx.store.diagnostics().count(DiagnosticKind::LockContention),
            1
        );
        assert_eq!(stored(&fx.store, &fx.key).await.expect("entry").data, "A");
    }

    #[tokio::test]
    async fn unchanged_marker_only_moves_fetched_at() {
        let fx = fixture(Some("A")).await;
        fx.control.advance(Duration::from_secs(45));
        let mut loader = ScriptedLoader::returning(Ok("B".to_string()));
        loader.probe = Some("A");

        let outcome = fx
            .coordinator
            .refresh(&fx.key, StalenessPolicy::POST, &loader)
            .await;

        assert_eq!(outcome, RefreshOutcome::Touched);
        assert_eq!(loader.loads(), 0);
        let entry = stored(&fx.store, &fx.key).await.expect("entry");
        assert_eq!(entry.data, "A");
        assert_eq!(entry.fetched_at, 45_000);
        assert!(fx.store.get(&fx.key.lock_key()).await.is_none());
    }

    #[tokio::test]
    async fn changed_marker_triggers_full_fetch() {
        let fx = fixture(Some("A")).await;
        fx.control.advance(Duration::from_secs(45));
        let mut loader = ScriptedLoader::returning(Ok("B".to_string()));
        loader.probe = Some("B");

        let outcome = fx
            .coordinator
            .refresh(&fx.key, StalenessPolicy::POST, &loader)
            .await;

        assert_eq!(outcome, RefreshOutcome::Refreshed);
        assert_eq!(loader.loads(), 1);
        let entry = stored(&fx.store, &fx.key).await.expect("entry");
        assert_eq!(entry.data, "B");
        assert_eq!(entry.fetched_at, 45_000);
    }

    #[tokio::test]
    async fn transient_failure_keeps_stale_entry_and_releases_lock() {
        let fx = fixture(Some("A")).await;
        fx.control.advance(Duration::from_secs(45));
        let loader = ScriptedLoader::returning(Err(SourceError::Transient("timeout".into())));

        let outcome = fx
            .coordinator
            .refresh(&fx.key, StalenessPolicy::POST, &loader)
            .await;

        assert_eq!(outcome, RefreshOutcome::Failed);
        assert_eq!(stored(&fx.store, &fx.key).await.expect("entry").data, "A");
        assert!(fx.store.get(&fx.key.lock_key()).await.is_none());
        assert_eq!(fx.store.diagnostics().count(DiagnosticKind::RefreshFailed), 1);
    }

    #[tokio::test]
    async fn not_found_without_identity_drops_the_entry() {
        let fx = fixture(Some("A")).await;
        fx.control.advance(Duration::from_secs(45));
        let loader = ScriptedLoader::returning(Err(SourceError::NotFound));

        let outcome = fx
            .coordinator
            .refresh(&fx.key, StalenessPolicy::POST, &loader)
            .await;

        assert_eq!(outcome, RefreshOutcome::Removed);
        assert!(stored(&fx.store, &fx.key).await.is_none());
        assert_eq!(fx.store.diagnostics().count(DiagnosticKind::SourceNotFound), 1);
    }

    #[tokio::test]
    async fn entry_refreshed_elsewhere_is_left_alone() {
        let fx = fixture(Some("A")).await;
        fx.control.advance(Duration::from_secs(45));
        let newer = encode_entry(&CacheEntry::new("B".to_string(), 44_000), &fx.key).expect("encode");
        fx.store.set(fx.key.as_str(), &newer, None).await;
        let mut loader = ScriptedLoader::returning(Ok("C".to_string()));
        loader.probe = Some("C");

        let outcome = fx
            .coordinator
            .refresh(&fx.key, StalenessPolicy::POST, &loader)
            .await;

        assert_eq!(outcome, RefreshOutcome::AlreadyFresh);
        assert_eq!(loader.loads(), 0);
        let entry = stored(&fx.store, &fx.key).await.expect("entry");
        assert_eq!(entry.data, "B");
        assert_eq!(entry.fetched_at, 44_000);
        assert!(fx.store.get(&fx.key.lock_key()).await.is_none());
    }
}
