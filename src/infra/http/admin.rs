use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    middleware,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use quire_api_types::{InvalidationReport, PurgeReport};
use serde::Serialize;
use time::format_description::well_known::Rfc3339;
use tracing::info;

use crate::application::error::HttpError;

use super::{
    HttpState, health,
    middleware::{log_responses, set_request_context},
};

const SOURCE: &str = "infra::http::admin";

pub fn build_admin_router(state: HttpState) -> Router {
    Router::new()
        .route("/cache/invalidate/{slug}", post(invalidate_slug))
        .route("/cache/purge", post(purge_cache))
        .route("/cache/diagnostics", get(recent_diagnostics))
        .route("/_health", get(health))
        .with_state(state)
        .layer(middleware::from_fn(log_responses))
        .layer(middleware::from_fn(set_request_context))
}

async fn invalidate_slug(
    State(state): State<HttpState>,
    Path(slug): Path<String>,
) -> Result<Json<InvalidationReport>, HttpError> {
    let slug = slug.trim();
    if slug.is_empty() {
        return Err(HttpError::new(
            SOURCE,
            StatusCode::BAD_REQUEST,
            "Invalid slug",
            "slug must not be empty",
        ));
    }

    let report = state.content.invalidate(slug).await;
    info!(
        target: "quire::http::admin",
        slug = %report.slug,
        lists_rewritten = report.lists_rewritten,
        lists_deleted = report.lists_deleted,
        details_deleted = report.details_deleted,
        "slug invalidated"
    );
    Ok(Json(report))
}

async fn purge_cache(State(state): State<HttpState>) -> Json<PurgeReport> {
    let report = state.content.purge().await;
    info!(
        target: "quire::http::admin",
        namespace = state.content.namespace(),
        keys_deleted = report.keys_deleted,
        "cache purged"
    );
    Json(report)
}

#[derive(Debug, Serialize)]
struct DiagnosticView {
    seq: u64,
    kind: String,
    key: String,
    detail: Option<String>,
    at: String,
}

#[derive(Debug, Serialize)]
struct DiagnosticsBody {
    backend: &'static str,
    queued_refreshes: usize,
    diagnostics: Vec<DiagnosticView>,
}

async fn recent_diagnostics(State(state): State<HttpState>) -> Response {
    let cache = state.content.cache();
    let diagnostics = cache
        .diagnostics()
        .snapshot()
        .into_iter()
        .rev()
        .map(|diagnostic| DiagnosticView {
            seq: diagnostic.seq,
            kind: diagnostic.kind.to_string(),
            key: diagnostic.key,
            detail: diagnostic.detail,
            at: diagnostic.at.format(&Rfc3339).unwrap_or_default(),
        })
        .collect();

    Json(DiagnosticsBody {
        backend: cache.backend().as_str(),
        queued_refreshes: cache.pool().queued(),
        diagnostics,
    })
    .into_response()
}
