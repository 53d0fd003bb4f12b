//! Invalidation propagation.
//!
//! Scrubs a removed slug from every cached list view and drops its detail
//! entries, so nothing cached keeps referencing content the source no longer
//! has. Also owns the namespace-wide purge.

use std::collections::BTreeSet;

use metrics::counter;
use quire_api_types::{InvalidationReport, PurgeReport};
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, info, instrument};

use super::clock::Clock;
use super::diagnostics::DiagnosticKind;
use super::entry::{CacheEntry, StalenessPolicy};
use super::keys::{self, ResourceKind};
use super::store::CacheStore;

const METRIC_REWRITTEN: &str = "quire_invalidation_rewritten_total";
const METRIC_DELETED: &str = "quire_invalidation_deleted_total";

/// How list entries that reference a removed slug are handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvalidationMode {
    /// Rewrite the list without the slug, keeping its `fetchedAt`.
    Filter,
    /// Delete every list entry so the next read repopulates it.
    Delete,
}

pub struct Invalidator {
    store: CacheStore,
    clock: Clock,
    namespace: String,
    list_policy: StalenessPolicy,
    mode: InvalidationMode,
    legacy_list_prefixes: Vec<String>,
}

impl Invalidator {
    pub fn new(
        store: CacheStore,
        clock: Clock,
        namespace: impl Into<String>,
        list_policy: StalenessPolicy,
        mode: InvalidationMode,
        legacy_list_prefixes: Vec<String>,
    ) -> Self {
        Self {
            store,
            clock,
            namespace: namespace.into(),
            list_policy,
            mode,
            legacy_list_prefixes,
        }
    }

    pub fn mode(&self) -> InvalidationMode {
        self.mode
    }

    /// Remove every cached reference to `slug`.
    #[instrument(skip(self))]
    pub async fn invalidate(&self, slug: &str) -> InvalidationReport {
        let mut report = InvalidationReport {
            slug: slug.to_string(),
            ..InvalidationReport::default()
        };

        let list_keys = self.list_keys().await;
        match self.mode {
            InvalidationMode::Delete => {
                self.store.delete_many(&list_keys).await;
                report.lists_deleted = list_keys.len();
            }
            InvalidationMode::Filter => {
                for key in &list_keys {
                    match self.filter_list(key, slug).await {
                        ListScrub::Rewritten => report.lists_rewritten += 1,
                        ListScrub::Deleted => report.lists_deleted += 1,
                        ListScrub::Untouched => {}
                    }
                }
            }
        }

        report.details_deleted = self.delete_details(slug).await;

        counter!(METRIC_REWRITTEN).increment(report.lists_rewritten as u64);
        counter!(METRIC_DELETED).increment((report.lists_deleted + report.details_deleted) as u64);
        info!(
            slug,
            mode = ?self.mode,
            lists_rewritten = report.lists_rewritten,
            lists_deleted = report.lists_deleted,
            details_deleted = report.details_deleted,
            "invalidation propagated"
        );
        report
    }

    /// Delete every key in the namespace and under the legacy list prefixes.
    #[instrument(skip(self))]
    pub async fn purge_all(&self) -> PurgeReport {
        let mut prefixes = vec![keys::namespace_prefix(&self.namespace)];
        prefixes.extend(self.legacy_list_prefixes.iter().cloned());

        let keys = self.scan_all(&prefixes, true).await;
        self.store.delete_many(&keys).await;

        counter!(METRIC_DELETED).increment(keys.len() as u64);
        info!(namespace = %self.namespace, keys_deleted = keys.len(), "cache purged");
        PurgeReport {
            keys_deleted: keys.len(),
        }
    }

    async fn list_keys(&self) -> Vec<String> {
        let mut prefixes = vec![keys::kind_prefix(&self.namespace, ResourceKind::List)];
        prefixes.extend(self.legacy_list_prefixes.iter().cloned());
        self.scan_all(&prefixes, false).await
    }

    async fn scan_all(&self, prefixes: &[String], include_locks: bool) -> Vec<String> {
        let mut found = BTreeSet::new();
        for prefix in prefixes {
            for key in self.store.scan_prefix(prefix).await {
                if include_locks || !keys::is_lock_key(&key) {
                    found.insert(key);
                }
            }
        }
        found.into_iter().collect()
    }

    async fn filter_list(&self, key: &str, slug: &str) -> ListScrub {
        let Some(raw) = self.store.get(key).await else {
            return ListScrub::Untouched;
        };

        let entry = match serde_json::from_str::<CacheEntry<Vec<Value>>>(&raw) {
            Ok(entry) => entry,
            Err(err) => {
                self.store.diagnostics().record(
                    DiagnosticKind::CorruptEntry,
                    key,
                    Some(err.to_string()),
                );
                self.store.delete(key).await;
                return ListScrub::Deleted;
            }
        };

        let before = entry.data.len();
        let age = entry.age(self.clock.now_ms());
        let kept: Vec<Value> = entry
            .data
            .into_iter()
            .filter(|item| item_slug(item) != Some(slug))
            .collect();
        if kept.len() == before {
            return ListScrub::Untouched;
        }

        let filtered = CacheEntry::new(kept, entry.fetched_at);
        match serde_json::to_string(&filtered) {
            Ok(raw) => {
                let ttl = self.list_policy.remaining_ttl(age);
                self.store.set(key, &raw, Some(ttl)).await;
                debug!(key, removed = before - filtered.data.len(), "list entry rewritten");
                ListScrub::Rewritten
            }
            Err(_) => {
                self.store.delete(key).await;
                ListScrub::Deleted
            }
        }
    }

    async fn delete_details(&self, slug: &str) -> usize {
        let (exact, variant_prefix) = keys::post_key_patterns(&self.namespace, slug);
        let mut targets: Vec<String> = self
            .scan_all(std::slice::from_ref(&variant_prefix), false)
            .await;
        if self.store.get(&exact).await.is_some() {
            targets.push(exact);
        }
        self.store.delete_many(&targets).await;
        targets.len()
    }
}

enum ListScrub {
    Untouched,
    Rewritten,
    Deleted,
}

/// Slug of a cached list item in either the canonical or a wrapped legacy shape.
fn item_slug(item: &Value) -> Option<&str> {
    item.get("slug")
        .or_else(|| item.get("attributes").and_then(|attrs| attrs.get("slug")))
        .and_then(Value::as_str)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use serde_json::json;

    use super::*;
    use crate::cache::clock::ClockControl;
    use crate::cache::diagnostics::Diagnostics;
    use crate::cache::store::MemoryStore;

    fn fixture(mode: InvalidationMode, legacy: Vec<String>) -> (Invalidator, CacheStore, ClockControl) {
        let (clock, control) = Clock::manual(1_000_000);
        let store = CacheStore::new(
            Arc::new(MemoryStore::new(clock.clone())),
            Arc::new(Diagnostics::new()),
        );
        let invalidator = Invalidator::new(
            store.clone(),
            clock,
            "ns",
            StalenessPolicy::LIST,
            mode,
            legacy,
        );
        (invalidator, store, control)
    }

    fn list_entry(slugs: &[&str], fetched_at: i64) -> String {
        let data: Vec<Value> = slugs.iter().map(|s| json!({"slug": s, "title": s})).collect();
        serde_json::to_string(&CacheEntry::new(data, fetched_at)).expect("encode")
    }

    async fn slugs_at(store: &CacheStore, key: &str) -> Option<Vec<String>> {
        let raw = store.get(key).await?;
        let entry: CacheEntry<Vec<Value>> = serde_json::from_str(&raw).expect("decode");
        Some(
            entry
                .data
                .iter()
                .filter_map(item_slug)
                .map(str::to_string)
                .collect(),
        )
    }

    #[tokio::test]
    async fn filter_mode_rewrites_only_lists_containing_slug() {
        let (invalidator, store, _) = fixture(InvalidationMode::Filter, Vec::new());
        let ttl = Some(Duration::from_secs(300));
        store.set("ns:list:0:10:all", &list_entry(&["a", "b", "c"], 999_000), ttl).await;
        store.set("ns:list:0:10:tag=rust", &list_entry(&["a", "c"], 999_000), ttl).await;
        store.set("ns:post:b", "{}", None).await;

        let report = invalidator.invalidate("b").await;

        assert_eq!(report.lists_rewritten, 1);
        assert_eq!(report.lists_deleted, 0);
        assert_eq!(report.details_deleted, 1);
        assert_eq!(
            slugs_at(&store, "ns:list:0:10:all").await,
            Some(vec!["a".to_string(), "c".to_string()])
        );
        assert_eq!(store.get("ns:post:b").await, None);
    }

    #[tokio::test]
    async fn rewrite_preserves_fetched_at() {
        let (invalidator, store, _) = fixture(InvalidationMode::Filter, Vec::new());
        store.set("ns:list:0:10:all", &list_entry(&["a", "b"], 990_000), None).await;

        invalidator.invalidate("a").await;

        let raw = store.get("ns:list:0:10:all").await.expect("list kept");
        let entry: CacheEntry<Vec<Value>> = serde_json::from_str(&raw).expect("decode");
        assert_eq!(entry.fetched_at, 990_000);
    }

    #[tokio::test]
    async fn rewritten_list_keeps_remaining_ttl() {
        let (invalidator, store, control) = fixture(InvalidationMode::Filter, Vec::new());
        // 100s old against a 300s list ttl leaves 200s
        store
            .set("ns:list:0:10:all", &list_entry(&["a", "b"], 900_000), Some(Duration::from_secs(300)))
            .await;

        invalidator.invalidate("a").await;

        control.advance(Duration::from_secs(199));
        assert!(store.get("ns:list:0:10:all").await.is_some());
        control.advance(Duration::from_secs(1));
        assert!(store.get("ns:list:0:10:all").await.is_none());
    }

    #[tokio::test]
    async fn delete_mode_drops_every_list() {
        let (invalidator, store, _) = fixture(InvalidationMode::Delete, Vec::new());
        store.set("ns:list:0:10:all", &list_entry(&["a"], 0), None).await;
        store.set("ns:list:10:10:all", &list_entry(&["z"], 0), None).await;

        let report = invalidator.invalidate("a").await;

        assert_eq!(report.lists_deleted, 2);
        assert!(store.scan_prefix("ns:list:").await.is_empty());
    }

    #[tokio::test]
    async fn legacy_prefixes_are_scrubbed_too() {
        let legacy = vec!["strapi:posts:browse:".to_string()];
        let (invalidator, store, _) = fixture(InvalidationMode::Filter, legacy);
        let legacy_list = serde_json::to_string(&CacheEntry::new(
            vec![
                json!({"id": 1, "attributes": {"slug": "gone"}}),
                json!({"id": 2, "attributes": {"slug": "kept"}}),
            ],
            0,
        ))
        .expect("encode");
        store.set("strapi:posts:browse:0:10:all", &legacy_list, None).await;

        let report = invalidator.invalidate("gone").await;

        assert_eq!(report.lists_rewritten, 1);
        assert_eq!(
            slugs_at(&store, "strapi:posts:browse:0:10:all").await,
            Some(vec!["kept".to_string()])
        );
    }

    #[tokio::test]
    async fn undecodable_lists_are_deleted() {
        let (invalidator, store, _) = fixture(InvalidationMode::Filter, Vec::new());
        store.set("ns:list:0:10:all", "not json", None).await;

        let report = invalidator.invalidate("a").await;

        assert_eq!(report.lists_deleted, 1);
        assert_eq!(store.get("ns:list:0:10:all").await, None);
        assert_eq!(store.diagnostics().count(DiagnosticKind::CorruptEntry), 1);
    }

    #[tokio::test]
    async fn detail_variants_match_exact_slug_only() {
        let (invalidator, store, _) = fixture(InvalidationMode::Filter, Vec::new());
        store.set("ns:post:hello", "{}", None).await;
        store.set("ns:post:hello:include=tags", "{}", None).await;
        store.set("ns:post:hello-again", "{}", None).await;

        let report = invalidator.invalidate("hello").await;

        assert_eq!(report.details_deleted, 2);
        assert!(store.get("ns:post:hello-again").await.is_some());
    }

    #[tokio::test]
    async fn purge_removes_namespace_and_legacy_keys() {
        let legacy = vec!["posts:list:".to_string()];
        let (invalidator, store, _) = fixture(InvalidationMode::Filter, legacy);
        store.set("ns:post:a", "{}", None).await;
        store.set("ns:tags:all", "{}", None).await;
        store.set("posts:list:1", "{}", None).await;
        store.set("other:post:a", "{}", None).await;

        let report = invalidator.purge_all().await;

        assert_eq!(report.keys_deleted, 3);
        assert!(store.get("other:post:a").await.is_some());
    }
}
