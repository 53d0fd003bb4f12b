//! In-process content source.
//!
//! Backs local development without a CMS and drives the cache tests: content
//! can be edited or removed at runtime, calls are counted, and failures or
//! latency can be injected.

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use quire_api_types::{Item, ItemSummary, Tag};

use super::{ChangeMarker, ContentSource, ListQuery, ReadOptions, SourceError, TagLimit};

/// Per-operation call counters.
#[derive(Debug, Default)]
pub struct SourceCalls {
    by_slug: AtomicUsize,
    list: AtomicUsize,
    tags: AtomicUsize,
    probe: AtomicUsize,
}

impl SourceCalls {
    pub fn by_slug(&self) -> usize {
        self.by_slug.load(Ordering::SeqCst)
    }

    pub fn list(&self) -> usize {
        self.list.load(Ordering::SeqCst)
    }

    pub fn tags(&self) -> usize {
        self.tags.load(Ordering::SeqCst)
    }

    pub fn probe(&self) -> usize {
        self.probe.load(Ordering::SeqCst)
    }
}

#[derive(Default)]
pub struct MemorySource {
    items: DashMap<String, Item>,
    calls: SourceCalls,
    failing: AtomicBool,
    probe_enabled: AtomicBool,
    delay_ms: AtomicU64,
}

impl MemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_items(items: impl IntoIterator<Item = Item>) -> Self {
        let source = Self::new();
        for item in items {
            source.upsert(item);
        }
        source
    }

    pub fn upsert(&self, item: Item) {
        self.items.insert(item.slug.clone(), item);
    }

    pub fn remove(&self, slug: &str) -> Option<Item> {
        self.items.remove(slug).map(|(_, item)| item)
    }

    /// Make every subsequent fetch fail with a transient error.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Answer change probes from each item's `updated_at`.
    pub fn set_probe_enabled(&self, enabled: bool) {
        self.probe_enabled.store(enabled, Ordering::SeqCst);
    }

    pub fn set_delay(&self, delay: Duration) {
        self.delay_ms
            .store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    pub fn calls(&self) -> &SourceCalls {
        &self.calls
    }

    async fn before_fetch(&self, counter: &AtomicUsize) -> Result<(), SourceError> {
        counter.fetch_add(1, Ordering::SeqCst);

        let delay = self.delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        if self.failing.load(Ordering::SeqCst) {
            return Err(SourceError::Transient("memory source set to fail".to_string()));
        }
        Ok(())
    }

    fn sorted_items(&self) -> Vec<Item> {
        let mut items: Vec<Item> = self.items.iter().map(|e| e.value().clone()).collect();
        items.sort_by(|a, b| {
            b.published_at
                .cmp(&a.published_at)
                .then_with(|| a.slug.cmp(&b.slug))
        });
        items
    }
}

#[async_trait]
impl ContentSource for MemorySource {
    fn id(&self) -> &str {
        "memory"
    }

    async fn fetch_by_slug(&self, slug: &str, _options: &ReadOptions) -> Result<Item, SourceError> {
        self.before_fetch(&self.calls.by_slug).await?;
        self.items
            .get(slug)
            .map(|item| item.value().clone())
            .ok_or(SourceError::NotFound)
    }

    async fn fetch_list(&self, query: &ListQuery) -> Result<Vec<ItemSummary>, SourceError> {
        self.before_fetch(&self.calls.list).await?;
        Ok(self
            .sorted_items()
            .into_iter()
            .map(ItemSummary::from)
            .filter(|item| query.tag.as_deref().is_none_or(|tag| item.has_tag(tag)))
            .skip(query.offset as usize)
            .take(query.limit as usize)
            .collect())
    }

    async fn fetch_tags(&self, limit: TagLimit) -> Result<Vec<Tag>, SourceError> {
        self.before_fetch(&self.calls.tags).await?;
        let mut tags: Vec<Tag> = Vec::new();
        for item in self.items.iter() {
            for tag in &item.tags {
                if !tags.iter().any(|known| known.slug == tag.slug) {
                    tags.push(tag.clone());
                }
            }
        }
        tags.sort_by(|a, b| a.name.cmp(&b.name));
        if let TagLimit::Limit(limit) = limit {
            tags.truncate(limit as usize);
        }
        Ok(tags)
    }

    async fn fetch_change_marker(&self, slug: &str) -> Result<Option<ChangeMarker>, SourceError> {
        if !self.probe_enabled.load(Ordering::SeqCst) {
            return Ok(None);
        }
        self.before_fetch(&self.calls.probe).await?;
        let item = self.items.get(slug).ok_or(SourceError::NotFound)?;
        Ok(item.updated_at.map(ChangeMarker::from_timestamp))
    }
}

#[cfg(test)]
mod tests {
    use quire_api_types::Tag;
    use time::macros::datetime;

    use super::*;

    fn item(slug: &str, day: u8, tags: &[&str]) -> Item {
        Item {
            id: slug.to_string(),
            slug: slug.to_string(),
            title: slug.to_uppercase(),
            html: None,
            excerpt: None,
            feature_image: None,
            tags: tags
                .iter()
                .map(|t| Tag {
                    id: (*t).to_string(),
                    name: (*t).to_string(),
                    slug: (*t).to_string(),
                })
                .collect(),
            published_at: datetime!(2024-01-01 0:00 UTC)
                .replace_day(day)
                .ok(),
            updated_at: None,
            primary_author: None,
        }
    }

    #[tokio::test]
    async fn list_is_newest_first_filtered_and_paged() {
        let source = MemorySource::with_items([
            item("a", 1, &["rust"]),
            item("b", 2, &["go"]),
            item("c", 3, &["rust"]),
            item("d", 4, &["rust"]),
        ]);

        let page = source
            .fetch_list(&ListQuery {
                offset: 1,
                limit: 2,
                tag: Some("rust".to_string()),
            })
            .await
            .expect("list");
        let slugs: Vec<&str> = page.iter().map(|i| i.slug.as_str()).collect();
        assert_eq!(slugs, vec!["c", "a"]);
        assert_eq!(source.calls().list(), 1);
    }

    #[tokio::test]
    async fn removed_items_are_not_found() {
        let source = MemorySource::with_items([item("a", 1, &[])]);
        source.remove("a");
        let err = source
            .fetch_by_slug("a", &ReadOptions::default())
            .await
            .expect_err("removed");
        assert_eq!(err, SourceError::NotFound);
    }

    #[tokio::test]
    async fn tags_are_unique_and_limited() {
        let source = MemorySource::with_items([
            item("a", 1, &["rust", "async"]),
            item("b", 2, &["rust"]),
        ]);
        let all = source.fetch_tags(TagLimit::All).await.expect("tags");
        assert_eq!(all.len(), 2);
        let one = source.fetch_tags(TagLimit::Limit(1)).await.expect("tags");
        assert_eq!(one[0].slug, "async");
    }

    #[tokio::test]
    async fn probes_are_opt_in() {
        let source = MemorySource::with_items([item("a", 1, &[])]);
        assert_eq!(source.fetch_change_marker("a").await.expect("probe"), None);
        assert_eq!(source.calls().probe(), 0);
    }

    #[tokio::test]
    async fn failing_source_reports_transient_errors() {
        let source = MemorySource::with_items([item("a", 1, &[])]);
        source.set_failing(true);
        assert!(matches!(
            source.fetch_tags(TagLimit::All).await,
            Err(SourceError::Transient(_))
        ));
    }
}
