//! Cache key definitions.
//!
//! Keys are laid out as `<namespace>:<kind>:<identifier>[:<fingerprint>]`.
//! Every caller-supplied segment is form-urlencoded so a `:` inside a slug or
//! filter can never shift segment boundaries, which keeps distinct requests
//! from colliding. Keys are persisted in a shared store, so they are built
//! from stable text rather than process-local hashes.

use std::fmt;

use url::form_urlencoded;

use crate::source::{ListQuery, ReadOptions, TagLimit};

/// `~` never survives segment encoding, so no data key can end with this.
const LOCK_SUFFIX: &str = ":~lock";
const UNFILTERED: &str = "all";
const TAG_FILTER: &str = "tag=";

/// Resource kind segment of a key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    /// A single item read by slug.
    Post,
    /// A page of item summaries.
    List,
    /// The tag listing.
    Tags,
}

impl ResourceKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Post => "post",
            Self::List => "list",
            Self::Tags => "tags",
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A fully composed cache key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey(String);

impl CacheKey {
    /// Key for an item read by slug, qualified by its query options.
    pub fn post(namespace: &str, slug: &str, options: &ReadOptions) -> Self {
        let mut key = format!("{}{}", kind_prefix(namespace, ResourceKind::Post), encode(slug));
        if let Some(fingerprint) = options.fingerprint() {
            key.push(':');
            key.push_str(&fingerprint);
        }
        Self(key)
    }

    /// Key for one page of a list view.
    pub fn list(namespace: &str, query: &ListQuery) -> Self {
        let filter = match query.tag.as_deref() {
            Some(tag) => format!("{TAG_FILTER}{}", encode(tag)),
            None => UNFILTERED.to_string(),
        };
        Self(format!(
            "{}{}:{}:{}",
            kind_prefix(namespace, ResourceKind::List),
            query.offset,
            query.limit,
            filter
        ))
    }

    /// Key for the tag listing.
    pub fn tags(namespace: &str, limit: TagLimit) -> Self {
        Self(format!("{}{limit}", kind_prefix(namespace, ResourceKind::Tags)))
    }

    /// Wrap an already composed key, e.g. one returned by a prefix scan.
    pub fn from_raw(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Advisory lock key guarding background refreshes of this key.
    pub fn lock_key(&self) -> String {
        format!("{}{LOCK_SUFFIX}", self.0)
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Prefix covering every key in `namespace`.
pub fn namespace_prefix(namespace: &str) -> String {
    format!("{namespace}:")
}

/// Prefix covering every key of `kind` in `namespace`.
pub fn kind_prefix(namespace: &str, kind: ResourceKind) -> String {
    format!("{namespace}:{kind}:")
}

/// Exact key and fingerprint prefix for every detail entry of `slug`.
///
/// Returns `(exact, fingerprinted_prefix)`; a plain prefix scan on the exact key
/// would also match slugs that merely start with the same text.
pub fn post_key_patterns(namespace: &str, slug: &str) -> (String, String) {
    let exact = format!("{}{}", kind_prefix(namespace, ResourceKind::Post), encode(slug));
    let prefix = format!("{exact}:");
    (exact, prefix)
}

/// Returns true for advisory lock keys.
pub fn is_lock_key(key: &str) -> bool {
    key.ends_with(LOCK_SUFFIX)
}

fn encode(segment: &str) -> String {
    form_urlencoded::byte_serialize(segment.as_bytes()).collect()
}
