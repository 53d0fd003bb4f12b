mod admin;
mod middleware;
mod public;

use std::sync::Arc;

use axum::http::{HeaderName, StatusCode};
use axum::response::{IntoResponse, Response};

pub use admin::build_admin_router;
pub use middleware::{REQUEST_ID_HEADER, RequestContext};
pub use public::build_router;

use crate::application::content::ContentService;

/// Response header reporting where a cached read was served from.
pub const CACHE_STATUS_HEADER: HeaderName = HeaderName::from_static("x-cache");

/// Shared state for both listeners.
#[derive(Clone)]
pub struct HttpState {
    pub content: Arc<ContentService>,
}

impl HttpState {
    pub fn new(content: Arc<ContentService>) -> Self {
        Self { content }
    }
}

async fn health() -> Response {
    StatusCode::NO_CONTENT.into_response()
}
