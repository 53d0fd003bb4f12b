//! Cached content reads.
//!
//! [`ContentService`] binds each read to its cache key, staleness policy and a
//! [`Loader`] over the configured [`ContentSource`].

use std::sync::Arc;

use async_trait::async_trait;
use quire_api_types::{InvalidationReport, Item, ItemSummary, PurgeReport, Tag};
use tracing::instrument;

use crate::{
    cache::{CacheConfig, CacheKey, Cached, Loader, ReadError, ReadThrough, ResourceKind},
    source::{ChangeMarker, ContentSource, ListQuery, ReadOptions, SourceError, TagLimit},
};

use super::pagination::PageRequest;

/// Single item by slug. Probes for change via the source's marker.
pub struct PostLoader {
    source: Arc<dyn ContentSource>,
    slug: String,
    options: ReadOptions,
}

#[async_trait]
impl Loader for PostLoader {
    type Output = Item;

    async fn load(&self) -> Result<Item, SourceError> {
        self.source.fetch_by_slug(&self.slug, &self.options).await
    }

    fn identity(&self) -> Option<&str> {
        Some(self.slug.as_str())
    }

    fn supports_probe(&self) -> bool {
        true
    }

    async fn probe(&self) -> Result<Option<ChangeMarker>, SourceError> {
        self.source.fetch_change_marker(&self.slug).await
    }

    fn marker(&self, data: &Item) -> Option<ChangeMarker> {
        data.updated_at.map(ChangeMarker::from_timestamp)
    }
}

pub struct ListLoader {
    source: Arc<dyn ContentSource>,
    query: ListQuery,
}

#[async_trait]
impl Loader for ListLoader {
    type Output = Vec<ItemSummary>;

    async fn load(&self) -> Result<Vec<ItemSummary>, SourceError> {
        self.source.fetch_list(&self.query).await
    }
}

pub struct TagsLoader {
    source: Arc<dyn ContentSource>,
    limit: TagLimit,
}

#[async_trait]
impl Loader for TagsLoader {
    type Output = Vec<Tag>;

    async fn load(&self) -> Result<Vec<Tag>, SourceError> {
        self.source.fetch_tags(self.limit).await
    }
}

pub struct ContentService {
    cache: Arc<ReadThrough>,
    source: Arc<dyn ContentSource>,
    config: CacheConfig,
}

impl ContentService {
    pub fn new(cache: Arc<ReadThrough>, source: Arc<dyn ContentSource>, config: CacheConfig) -> Self {
        Self {
            cache,
            source,
            config,
        }
    }

    pub fn cache(&self) -> &Arc<ReadThrough> {
        &self.cache
    }

    pub fn namespace(&self) -> &str {
        &self.config.namespace
    }

    #[instrument(skip(self, options))]
    pub async fn read_post(&self, slug: &str, options: ReadOptions) -> Result<Cached<Item>, ReadError> {
        let key = CacheKey::post(self.namespace(), slug, &options);
        let loader = PostLoader {
            source: Arc::clone(&self.source),
            slug: slug.to_string(),
            options,
        };
        self.cache
            .read(key, self.config.policy(ResourceKind::Post), Arc::new(loader))
            .await
    }

    #[instrument(skip(self))]
    pub async fn browse_posts(
        &self,
        page: PageRequest,
    ) -> Result<Cached<Vec<ItemSummary>>, ReadError> {
        let query = page.to_query();
        let key = CacheKey::list(self.namespace(), &query);
        let loader = ListLoader {
            source: Arc::clone(&self.source),
            query,
        };
        self.cache
            .read(key, self.config.policy(ResourceKind::List), Arc::new(loader))
            .await
    }

    #[instrument(skip(self))]
    pub async fn browse_tags(&self, limit: TagLimit) -> Result<Cached<Vec<Tag>>, ReadError> {
        let key = CacheKey::tags(self.namespace(), limit);
        let loader = TagsLoader {
            source: Arc::clone(&self.source),
            limit,
        };
        self.cache
            .read(key, self.config.policy(ResourceKind::Tags), Arc::new(loader))
            .await
    }

    pub async fn invalidate(&self, slug: &str) -> InvalidationReport {
        self.cache.invalidator().invalidate(slug).await
    }

    pub async fn purge(&self) -> PurgeReport {
        self.cache.invalidator().purge_all().await
    }
}
