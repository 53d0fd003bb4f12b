//! Strapi REST adapter.
//!
//! Records come back as `{ data: [{ id, attributes }], meta }`; relations need
//! explicit `populate` parameters.

use std::time::Duration;

use async_trait::async_trait;
use quire_api_types::{Item, ItemSummary, Tag};
use tracing::instrument;
use url::Url;

use super::{ChangeMarker, ContentSource, ListQuery, ReadOptions, SourceError, TagLimit, normalize};

const POPULATE: [(&str, &str); 3] = [
    ("populate[0]", "tags"),
    ("populate[1]", "cover"),
    ("populate[2]", "author"),
];

pub struct StrapiSource {
    client: reqwest::Client,
    api_root: Url,
    token: Option<String>,
}

impl StrapiSource {
    pub fn new(base_url: &Url, token: Option<String>, timeout: Duration) -> Result<Self, SourceError> {
        let api_root = base_url.join("api/").map_err(SourceError::invalid)?;
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(SourceError::transient)?;
        Ok(Self {
            client,
            api_root,
            token,
        })
    }

    fn endpoint(&self, path: &str, params: &[(&str, &str)]) -> Result<Url, SourceError> {
        let mut url = self.api_root.join(path).map_err(SourceError::invalid)?;
        url.query_pairs_mut().extend_pairs(params);
        Ok(url)
    }

    fn get(&self, url: Url) -> reqwest::RequestBuilder {
        let request = self.client.get(url);
        match self.token.as_deref() {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }
}

#[async_trait]
impl ContentSource for StrapiSource {
    fn id(&self) -> &str {
        "strapi"
    }

    #[instrument(skip(self, options), fields(source = "strapi"))]
    async fn fetch_by_slug(&self, slug: &str, options: &ReadOptions) -> Result<Item, SourceError> {
        let mut params = vec![("filters[slug][$eq]", slug)];
        params.extend(POPULATE);
        if let Some(fields) = options.fields() {
            params.push(("fields", fields));
        }

        let url = self.endpoint("articles", &params)?;
        let body = super::send_json(self.get(url)).await?;
        normalize::item(normalize::first_record(&body, "data")?)
    }

    #[instrument(skip(self), fields(source = "strapi"))]
    async fn fetch_list(&self, query: &ListQuery) -> Result<Vec<ItemSummary>, SourceError> {
        let start = query.offset.to_string();
        let limit = query.limit.to_string();

        let mut params = vec![
            ("pagination[start]", start.as_str()),
            ("pagination[limit]", limit.as_str()),
            ("sort[0]", "publishedAt:desc"),
        ];
        params.extend(POPULATE);
        if let Some(tag) = query.tag.as_deref() {
            params.push(("filters[tags][slug][$eq]", tag));
        }

        let url = self.endpoint("articles", &params)?;
        let body = super::send_json(self.get(url)).await?;
        normalize::summaries(normalize::records(&body, "data")?)
    }

    #[instrument(skip(self), fields(source = "strapi"))]
    async fn fetch_tags(&self, limit: TagLimit) -> Result<Vec<Tag>, SourceError> {
        let limit = match limit {
            TagLimit::All => "-1".to_string(),
            TagLimit::Limit(n) => n.to_string(),
        };
        let url = self.endpoint(
            "tags",
            &[("pagination[limit]", limit.as_str()), ("sort[0]", "name:asc")],
        )?;
        let body = super::send_json(self.get(url)).await?;
        Ok(normalize::records(&body, "data")?
            .iter()
            .filter_map(normalize::tag)
            .collect())
    }

    #[instrument(skip(self), fields(source = "strapi"))]
    async fn fetch_change_marker(&self, slug: &str) -> Result<Option<ChangeMarker>, SourceError> {
        let url = self.endpoint(
            "articles",
            &[("filters[slug][$eq]", slug), ("fields[0]", "updatedAt")],
        )?;
        let body = super::send_json(self.get(url)).await?;
        Ok(normalize::change_marker(normalize::first_record(&body, "data")?))
    }
}
