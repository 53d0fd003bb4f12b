//! Content source adapters.
//!
//! A [`ContentSource`] is the source of truth the cache fronts. Adapters talk
//! to their backend in its own shape and hand back canonical
//! [`quire_api_types`] values produced by [`normalize`]; nothing above this
//! module sees backend-specific JSON.

mod ghost;
mod memory;
pub mod normalize;
mod strapi;

use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use quire_api_types::{Item, ItemSummary, Tag};
use serde_json::Value;
use thiserror::Error;
use time::OffsetDateTime;
use url::form_urlencoded;

pub use self::ghost::GhostSource;
pub use self::memory::{MemorySource, SourceCalls};
pub use self::strapi::StrapiSource;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SourceError {
    #[error("content not found")]
    NotFound,
    #[error("content source request failed: {0}")]
    Transient(String),
    #[error("content source returned an unexpected payload: {0}")]
    InvalidResponse(String),
}

impl SourceError {
    pub fn transient(err: impl fmt::Display) -> Self {
        Self::Transient(err.to_string())
    }

    pub fn invalid(err: impl fmt::Display) -> Self {
        Self::InvalidResponse(err.to_string())
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound)
    }
}

/// Query options that change the shape of a single-item read.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct ReadOptions {
    pub include: Option<String>,
    pub fields: Option<String>,
}

impl ReadOptions {
    /// `include`, with a blank value read as unset.
    pub fn include(&self) -> Option<&str> {
        non_blank(self.include.as_deref())
    }

    /// `fields`, with a blank value read as unset.
    pub fn fields(&self) -> Option<&str> {
        non_blank(self.fields.as_deref())
    }

    /// Stable fingerprint of the options, or `None` when no option is set.
    ///
    /// Sources read options through the same accessors, so two requests
    /// sharing a fingerprint always fetch the same shape.
    pub fn fingerprint(&self) -> Option<String> {
        let include = self.include();
        let fields = self.fields();
        if include.is_none() && fields.is_none() {
            return None;
        }

        let mut serializer = form_urlencoded::Serializer::new(String::new());
        if let Some(include) = include {
            serializer.append_pair("include", include);
        }
        if let Some(fields) = fields {
            serializer.append_pair("fields", fields);
        }
        Some(serializer.finish())
    }
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

/// One page of a list view.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ListQuery {
    pub offset: u32,
    pub limit: u32,
    /// Only items carrying this tag slug.
    pub tag: Option<String>,
}

/// How many tags to return.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TagLimit {
    All,
    Limit(u32),
}

impl fmt::Display for TagLimit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::All => f.write_str("all"),
            Self::Limit(limit) => write!(f, "{limit}"),
        }
    }
}

impl FromStr for TagLimit {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        if value.eq_ignore_ascii_case("all") {
            return Ok(Self::All);
        }
        match value.parse::<u32>() {
            Ok(0) => Err("tag limit must be greater than zero".to_string()),
            Ok(limit) => Ok(Self::Limit(limit)),
            Err(err) => Err(format!("invalid tag limit `{value}`: {err}")),
        }
    }
}

/// Opaque "has it changed" token returned by a source probe.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ChangeMarker(String);

impl ChangeMarker {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Marker derived from a last-modified timestamp.
    pub fn from_timestamp(timestamp: OffsetDateTime) -> Self {
        Self(timestamp.unix_timestamp_nanos().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Source of truth for cached content.
#[async_trait]
pub trait ContentSource: Send + Sync {
    /// Short identifier used as the default cache namespace.
    fn id(&self) -> &str;

    async fn fetch_by_slug(&self, slug: &str, options: &ReadOptions) -> Result<Item, SourceError>;

    async fn fetch_list(&self, query: &ListQuery) -> Result<Vec<ItemSummary>, SourceError>;

    async fn fetch_tags(&self, limit: TagLimit) -> Result<Vec<Tag>, SourceError>;

    /// Cheap change probe for `slug`; `Ok(None)` when the source has no marker.
    async fn fetch_change_marker(&self, slug: &str) -> Result<Option<ChangeMarker>, SourceError>;
}

/// Send `request` and decode a JSON body, mapping HTTP failures onto [`SourceError`].
pub(crate) async fn send_json(request: reqwest::RequestBuilder) -> Result<Value, SourceError> {
    let response = request.send().await.map_err(SourceError::transient)?;
    let status = response.status();

    if status == reqwest::StatusCode::NOT_FOUND {
        return Err(SourceError::NotFound);
    }
    if !status.is_success() {
        return Err(SourceError::Transient(format!(
            "upstream responded with status {status}"
        )));
    }

    response
        .json::<Value>()
        .await
        .map_err(SourceError::invalid)
}
