//! Ghost Content API adapter.

use std::time::Duration;

use async_trait::async_trait;
use quire_api_types::{Item, ItemSummary, Tag};
use tracing::{debug, instrument};
use url::Url;

use super::{ChangeMarker, ContentSource, ListQuery, ReadOptions, SourceError, TagLimit, normalize};

const DEFAULT_INCLUDE: &str = "tags,authors";

pub struct GhostSource {
    client: reqwest::Client,
    api_root: Url,
    api_key: Option<String>,
}

impl GhostSource {
    pub fn new(base_url: &Url, api_key: Option<String>, timeout: Duration) -> Result<Self, SourceError> {
        let api_root = base_url
            .join("ghost/api/content/")
            .map_err(SourceError::invalid)?;
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(SourceError::transient)?;
        Ok(Self {
            client,
            api_root,
            api_key,
        })
    }

    fn endpoint(&self, path: &str, params: &[(&str, &str)]) -> Result<Url, SourceError> {
        let url = self.api_root.join(path).map_err(SourceError::invalid)?;
        Ok(self.with_query(url, params))
    }

    /// `posts/slug/{slug}/` with the slug escaped as a single path segment.
    fn post_endpoint(&self, slug: &str, params: &[(&str, &str)]) -> Result<Url, SourceError> {
        let mut url = self.api_root.join("posts/slug/").map_err(SourceError::invalid)?;
        url.path_segments_mut()
            .map_err(|()| SourceError::invalid("ghost api root cannot carry a path"))?
            .pop_if_empty()
            .push(slug)
            .push("");
        Ok(self.with_query(url, params))
    }

    fn with_query(&self, mut url: Url, params: &[(&str, &str)]) -> Url {
        {
            let mut query = url.query_pairs_mut();
            if let Some(key) = self.api_key.as_deref() {
                query.append_pair("key", key);
            }
            for (name, value) in params {
                query.append_pair(name, value);
            }
        }
        url
    }
}

/// NQL filter for a tag slug, or `None` when the value cannot be a Ghost slug.
///
/// Ghost slugs are lowercase alphanumerics and hyphens; anything else would be
/// parsed as NQL syntax.
fn tag_filter(tag: &str) -> Option<String> {
    let is_slug = !tag.is_empty()
        && tag
            .chars()
            .all(|c| c.is_alphanumeric() || c == '-' || c == '_');
    is_slug.then(|| format!("tag:{tag}"))
}

#[async_trait]
impl ContentSource for GhostSource {
    fn id(&self) -> &str {
        "ghost"
    }

    #[instrument(skip(self, options), fields(source = "ghost"))]
    async fn fetch_by_slug(&self, slug: &str, options: &ReadOptions) -> Result<Item, SourceError> {
        let include = options.include().unwrap_or(DEFAULT_INCLUDE);
        let mut params = vec![("include", include)];
        if let Some(fields) = options.fields() {
            params.push(("fields", fields));
        }

        let url = self.post_endpoint(slug, &params)?;
        let body = super::send_json(self.client.get(url)).await?;
        normalize::item(normalize::first_record(&body, "posts")?)
    }

    #[instrument(skip(self), fields(source = "ghost"))]
    async fn fetch_list(&self, query: &ListQuery) -> Result<Vec<ItemSummary>, SourceError> {
        let limit = query.limit.max(1);
        let page = (query.offset / limit + 1).to_string();
        let limit = limit.to_string();
        let filter = match query.tag.as_deref() {
            Some(tag) => match tag_filter(tag) {
                Some(filter) => Some(filter),
                None => {
                    debug!(tag, "tag is not a valid slug; no post can carry it");
                    return Ok(Vec::new());
                }
            },
            None => None,
        };

        let mut params = vec![
            ("limit", limit.as_str()),
            ("page", page.as_str()),
            ("include", DEFAULT_INCLUDE),
            ("order", "published_at desc"),
        ];
        if let Some(filter) = filter.as_deref() {
            params.push(("filter", filter));
        }

        let url = self.endpoint("posts/", &params)?;
        let body = super::send_json(self.client.get(url)).await?;
        normalize::summaries(normalize::records(&body, "posts")?)
    }

    #[instrument(skip(self), fields(source = "ghost"))]
    async fn fetch_tags(&self, limit: TagLimit) -> Result<Vec<Tag>, SourceError> {
        let limit = limit.to_string();
        let url = self.endpoint("tags/", &[("limit", limit.as_str()), ("order", "name asc")])?;
        let body = super::send_json(self.client.get(url)).await?;
        Ok(normalize::records(&body, "tags")?
            .iter()
            .filter_map(normalize::tag)
            .collect())
    }

    #[instrument(skip(self), fields(source = "ghost"))]
    async fn fetch_change_marker(&self, slug: &str) -> Result<Option<ChangeMarker>, SourceError> {
        let url = self.post_endpoint(slug, &[("fields", "id,slug,updated_at")])?;
        let body = super::send_json(self.client.get(url)).await?;
        Ok(normalize::change_marker(normalize::first_record(&body, "posts")?))
    }
}
