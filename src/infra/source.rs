//! Content source construction from settings.

use std::sync::Arc;

use tracing::{info, warn};

use crate::{
    config::{SourceKind, SourceSettings},
    source::{ContentSource, GhostSource, MemorySource, StrapiSource},
};

use super::error::InfraError;

pub fn build_source(settings: &SourceSettings) -> Result<Arc<dyn ContentSource>, InfraError> {
    let source: Arc<dyn ContentSource> = match settings.kind {
        SourceKind::Ghost => {
            let base_url = require_base_url(settings)?;
            if settings.api_key.is_none() {
                warn!(
                    target: "quire::infra::source",
                    "ghost source configured without a content API key"
                );
            }
            Arc::new(
                GhostSource::new(base_url, settings.api_key.clone(), settings.timeout)
                    .map_err(|err| InfraError::configuration(err.to_string()))?,
            )
        }
        SourceKind::Strapi => {
            let base_url = require_base_url(settings)?;
            Arc::new(
                StrapiSource::new(base_url, settings.api_key.clone(), settings.timeout)
                    .map_err(|err| InfraError::configuration(err.to_string()))?,
            )
        }
        SourceKind::Memory => Arc::new(MemorySource::new()),
    };

    info!(
        target: "quire::infra::source",
        source = source.id(),
        base_url = settings.base_url.as_ref().map(|url| url.as_str()).unwrap_or(""),
        "content source ready"
    );
    Ok(source)
}

fn require_base_url(settings: &SourceSettings) -> Result<&url::Url, InfraError> {
    settings
        .base_url
        .as_ref()
        .ok_or_else(|| InfraError::configuration("source.base_url is required"))
}
