mod common;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use quire::{
    application::pagination::PageRequest,
    cache::{
        CacheConfig, Clock, DiagnosticKind, Diagnostics, ServedFrom, StoreOp,
        store::{CacheStore, DisabledStore, KeyValueStore, StoreBackend, StoreError},
    },
    source::{ReadOptions, TagLimit},
};

use common::{Harness, item, tag};

/// Backend whose every call fails, as an unreachable Redis would.
struct BrokenStore;

#[async_trait]
impl KeyValueStore for BrokenStore {
    fn backend(&self) -> StoreBackend {
        StoreBackend::Redis
    }

    async fn get(&self, _key: &str) -> Result<Option<String>, StoreError> {
        Err(StoreError::Unavailable("connection refused".to_string()))
    }

    async fn set(&self, _key: &str, _value: &str, _ttl: Option<Duration>) -> Result<(), StoreError> {
        Err(StoreError::Unavailable("connection refused".to_string()))
    }

    async fn set_if_absent(
        &self,
        _key: &str,
        _value: &str,
        _ttl: Duration,
    ) -> Result<bool, StoreError> {
        Err(StoreError::Unavailable("connection refused".to_string()))
    }

    async fn delete(&self, _key: &str) -> Result<(), StoreError> {
        Err(StoreError::Unavailable("connection refused".to_string()))
    }

    async fn delete_many(&self, _keys: &[String]) -> Result<(), StoreError> {
        Err(StoreError::Unavailable("connection refused".to_string()))
    }

    async fn scan_prefix(&self, _prefix: &str) -> Result<Vec<String>, StoreError> {
        Err(StoreError::Unavailable("connection refused".to_string()))
    }
}

fn harness_over(inner: Arc<dyn KeyValueStore>) -> Harness {
    let (clock, control) = Clock::manual(0);
    let store = CacheStore::new(inner, Arc::new(Diagnostics::new()));
    let harness = Harness::with_store(CacheConfig::default(), store, clock, control);
    let mut hello = item("hello", "Hello", 1);
    hello.tags.push(tag("rust"));
    harness.source.upsert(hello);
    harness.source.upsert(item("world", "World", 2));
    harness
}

#[tokio::test]
async fn disabled_store_passes_every_read_through() {
    let harness = harness_over(Arc::new(DisabledStore));

    for round in 1..=3 {
        let post = harness
            .content()
            .read_post("hello", ReadOptions::default())
            .await
            .expect("post");
        assert_eq!(post.served_from, ServedFrom::Miss);
        assert_eq!(post.data.title, "Hello");

        let list = harness
            .content()
            .browse_posts(PageRequest::new(None, None, None).expect("page"))
            .await
            .expect("list");
        assert_eq!(list.served_from, ServedFrom::Miss);
        assert_eq!(list.data.len(), 2);

        let tags = harness
            .content()
            .browse_tags(TagLimit::All)
            .await
            .expect("tags");
        assert_eq!(tags.served_from, ServedFrom::Miss);
        assert_eq!(tags.data.len(), 1);

        assert_eq!(harness.source.calls().by_slug(), round);
        harness.advance_secs(1);
    }

    assert!(harness.store.diagnostics().is_empty());
    assert_eq!(harness.node.cache.backend(), StoreBackend::Disabled);
}

#[tokio::test]
async fn failing_backend_degrades_to_source_reads() {
    let harness = harness_over(Arc::new(BrokenStore));

    for _ in 0..2 {
        let post = harness
            .content()
            .read_post("hello", ReadOptions::default())
            .await
            .expect("post despite broken store");
        assert_eq!(post.served_from, ServedFrom::Miss);
        assert_eq!(post.data.title, "Hello");
    }

    let diagnostics = harness.store.diagnostics();
    assert_eq!(diagnostics.count(DiagnosticKind::BackendError(StoreOp::Get)), 2);
    assert_eq!(diagnostics.count(DiagnosticKind::BackendError(StoreOp::Set)), 2);
}

#[tokio::test]
async fn invalidation_on_failing_backend_reports_nothing_touched() {
    let harness = harness_over(Arc::new(BrokenStore));

    let report = harness.content().invalidate("hello").await;
    assert_eq!(report.lists_rewritten, 0);
    assert_eq!(report.lists_deleted, 0);
    assert_eq!(report.details_deleted, 0);
    assert!(
        harness
            .store
            .diagnostics()
            .count(DiagnosticKind::BackendError(StoreOp::Scan))
            >= 1
    );
}
