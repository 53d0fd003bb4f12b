//! Canonical content shapes shared by the Quire server and its clients.
//!
//! Every content backend is normalized into these types before anything is
//! cached, so cached payloads never carry backend-specific wrappers.

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

/// A tag attached to content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tag {
    pub id: String,
    pub name: String,
    pub slug: String,
}

/// The author credited on an item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Author {
    pub id: String,
    pub name: String,
    pub slug: Option<String>,
    pub profile_image: Option<String>,
}

/// A full content item as returned by a read-by-slug.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Item {
    pub id: String,
    pub slug: String,
    pub title: String,
    pub html: Option<String>,
    pub excerpt: Option<String>,
    pub feature_image: Option<String>,
    #[serde(default)]
    pub tags: Vec<Tag>,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub published_at: Option<OffsetDateTime>,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub updated_at: Option<OffsetDateTime>,
    pub primary_author: Option<Author>,
}

/// The list-view projection of an [`Item`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemSummary {
    pub id: String,
    pub slug: String,
    pub title: String,
    pub excerpt: Option<String>,
    pub feature_image: Option<String>,
    #[serde(default)]
    pub tags: Vec<Tag>,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub published_at: Option<OffsetDateTime>,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub updated_at: Option<OffsetDateTime>,
    pub primary_author: Option<Author>,
}

impl ItemSummary {
    /// Returns true when any attached tag carries `slug`.
    pub fn has_tag(&self, slug: &str) -> bool {
        self.tags.iter().any(|tag| tag.slug == slug)
    }
}

impl From<Item> for ItemSummary {
    fn from(item: Item) -> Self {
        Self {
            id: item.id,
            slug: item.slug,
            title: item.title,
            excerpt: item.excerpt,
            feature_image: item.feature_image,
            tags: item.tags,
            published_at: item.published_at,
            updated_at: item.updated_at,
            primary_author: item.primary_author,
        }
    }
}

/// Report returned by the administrative invalidation endpoint.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvalidationReport {
    pub slug: String,
    pub lists_rewritten: usize,
    pub lists_deleted: usize,
    pub details_deleted: usize,
}

/// Report returned by the administrative purge endpoint.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PurgeReport {
    pub keys_deleted: usize,
}
