use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::{HeaderValue, StatusCode},
    middleware,
    response::{IntoResponse, Response},
    routing::get,
};
use serde::{Deserialize, Serialize};

use crate::{
    application::{error::HttpError, pagination::PageRequest},
    cache::{Cached, ServedFrom},
    source::{ReadOptions, TagLimit},
};

use super::{
    CACHE_STATUS_HEADER, HttpState, health,
    middleware::{log_responses, set_request_context},
};

const SOURCE: &str = "infra::http::public";

pub fn build_router(state: HttpState) -> Router {
    Router::new()
        .route("/api/posts/read/{slug}", get(read_post))
        .route("/api/posts/browse", get(browse_posts))
        .route("/api/tags/browse", get(browse_tags))
        .route("/_health", get(health))
        .with_state(state)
        .layer(middleware::from_fn(log_responses))
        .layer(middleware::from_fn(set_request_context))
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ReadQuery {
    include: Option<String>,
    fields: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct BrowseQuery {
    page: Option<u32>,
    limit: Option<u32>,
    tag: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct TagsQuery {
    limit: Option<String>,
}

#[derive(Debug, Serialize)]
struct Pagination {
    page: u32,
    limit: u32,
}

#[derive(Debug, Serialize)]
struct PostsBody<T> {
    posts: Vec<T>,
    pagination: Pagination,
}

#[derive(Debug, Serialize)]
struct TagsBody<T> {
    tags: Vec<T>,
}

/// JSON body plus the `x-cache` header.
fn cached_json<T: Serialize>(served_from: ServedFrom, body: T) -> Response {
    let mut response = Json(body).into_response();
    response.headers_mut().insert(
        CACHE_STATUS_HEADER,
        HeaderValue::from_static(served_from.as_str()),
    );
    response
}

async fn read_post(
    State(state): State<HttpState>,
    Path(slug): Path<String>,
    Query(query): Query<ReadQuery>,
) -> Result<Response, HttpError> {
    if slug.trim().is_empty() {
        return Err(HttpError::new(
            SOURCE,
            StatusCode::BAD_REQUEST,
            "Invalid slug",
            "slug must not be empty",
        ));
    }

    let options = ReadOptions {
        include: query.include,
        fields: query.fields,
    };
    let Cached { data, served_from } = state.content.read_post(&slug, options).await?;
    Ok(cached_json(served_from, data))
}

async fn browse_posts(
    State(state): State<HttpState>,
    Query(query): Query<BrowseQuery>,
) -> Result<Response, HttpError> {
    let page = PageRequest::new(query.page, query.limit, query.tag).map_err(|err| {
        HttpError::from_error(SOURCE, StatusCode::BAD_REQUEST, "Invalid pagination", &err)
    })?;
    let pagination = Pagination {
        page: page.page(),
        limit: page.limit(),
    };

    let Cached { data, served_from } = state.content.browse_posts(page).await?;
    Ok(cached_json(
        served_from,
        PostsBody {
            posts: data,
            pagination,
        },
    ))
}

async fn browse_tags(
    State(state): State<HttpState>,
    Query(query): Query<TagsQuery>,
) -> Result<Response, HttpError> {
    let limit = match query.limit.as_deref() {
        None | Some("") => TagLimit::All,
        Some(raw) => raw.parse::<TagLimit>().map_err(|err| {
            HttpError::new(
                SOURCE,
                StatusCode::BAD_REQUEST,
                "Invalid limit",
                err,
            )
        })?,
    };

    let Cached { data, served_from } = state.content.browse_tags(limit).await?;
    Ok(cached_json(served_from, TagsBody { tags: data }))
}
