#![allow(dead_code)]

use std::sync::Arc;

use quire::{
    application::content::ContentService,
    cache::{
        CacheConfig, CacheEntry, Clock, ClockControl, Diagnostics, ReadThrough,
        store::{CacheStore, KeyValueStore, MemoryStore},
    },
    source::{ContentSource, MemorySource},
};
use quire_api_types::{Item, Tag};
use serde_json::Value;
use time::OffsetDateTime;

/// Unix seconds used as the epoch for item timestamps in tests.
const BASE_TS: i64 = 1_700_000_000;

pub fn tag(slug: &str) -> Tag {
    Tag {
        id: format!("tag-{slug}"),
        name: slug.to_uppercase(),
        slug: slug.to_string(),
    }
}

/// An item published `order` seconds after the base timestamp.
pub fn item(slug: &str, title: &str, order: i64) -> Item {
    let published = OffsetDateTime::from_unix_timestamp(BASE_TS + order).expect("timestamp");
    Item {
        id: format!("id-{slug}"),
        slug: slug.to_string(),
        title: title.to_string(),
        html: Some(format!("<p>{title}</p>")),
        excerpt: None,
        feature_image: None,
        tags: Vec::new(),
        published_at: Some(published),
        updated_at: Some(published),
        primary_author: None,
    }
}

/// Bump `updated_at` so change probes see a new marker.
pub fn edited(mut item: Item, title: &str) -> Item {
    item.title = title.to_string();
    item.html = Some(format!("<p>{title}</p>"));
    item.updated_at = item
        .updated_at
        .map(|ts| ts + time::Duration::seconds(60));
    item
}

/// One "process": a controller and service over a shared store.
pub struct Node {
    pub cache: Arc<ReadThrough>,
    pub content: Arc<ContentService>,
}

pub struct Harness {
    pub source: Arc<MemorySource>,
    pub store: CacheStore,
    pub clock: Clock,
    pub control: ClockControl,
    pub config: CacheConfig,
    pub node: Node,
}

impl Harness {
    pub fn new(config: CacheConfig) -> Self {
        let (clock, control) = Clock::manual(0);
        let inner: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new(clock.clone()));
        let store = CacheStore::new(inner, Arc::new(Diagnostics::new()));
        Self::with_store(config, store, clock, control)
    }

    pub fn with_store(
        config: CacheConfig,
        store: CacheStore,
        clock: Clock,
        control: ClockControl,
    ) -> Self {
        let source = Arc::new(MemorySource::new());
        let node = node(&config, &store, &clock, &source);
        Self {
            source,
            store,
            clock,
            control,
            config,
            node,
        }
    }

    /// A second controller over the same store and source.
    pub fn peer(&self) -> Node {
        node(&self.config, &self.store, &self.clock, &self.source)
    }

    pub fn content(&self) -> &ContentService {
        &self.node.content
    }

    pub async fn settle(&self) {
        self.node.cache.pool().wait_idle().await;
    }

    pub fn advance_secs(&self, secs: u64) {
        self.control.advance(std::time::Duration::from_secs(secs));
    }

    /// Raw stored entry under `key`, as JSON.
    pub async fn raw_entry(&self, key: &str) -> Option<CacheEntry<Value>> {
        let raw = self.store.get(key).await?;
        Some(serde_json::from_str(&raw).expect("stored entry decodes"))
    }
}

fn node(config: &CacheConfig, store: &CacheStore, clock: &Clock, source: &Arc<MemorySource>) -> Node {
    let cache = Arc::new(ReadThrough::start(store.clone(), clock.clone(), config));
    let source: Arc<dyn ContentSource> = source.clone();
    let content = Arc::new(ContentService::new(
        Arc::clone(&cache),
        source,
        config.clone(),
    ));
    Node { cache, content }
}
