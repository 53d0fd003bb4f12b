use std::sync::Once;

use metrics::{Unit, describe_counter, describe_gauge, describe_histogram};
use tracing_error::ErrorLayer;
use tracing_subscriber::{
    EnvFilter, fmt,
    layer::{Layer, SubscriberExt},
    util::SubscriberInitExt,
};

use crate::config::{LogFormat, LoggingSettings};

use super::error::InfraError;

static METRIC_DESCRIPTIONS: Once = Once::new();

/// Install a global tracing subscriber using the provided logging settings.
pub fn init(logging: &LoggingSettings) -> Result<(), InfraError> {
    describe_metrics();

    let env_filter = EnvFilter::builder()
        .with_default_directive(logging.level.into())
        .from_env_lossy();

    let fmt_layer = match logging.format {
        LogFormat::Json => fmt::layer()
            .json()
            .with_current_span(true)
            .with_span_list(true)
            .with_target(true)
            .boxed(),
        LogFormat::Compact => fmt::layer().compact().with_target(true).boxed(),
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(ErrorLayer::default())
        .with(fmt_layer)
        .try_init()
        .map_err(|err| {
            InfraError::telemetry(format!("failed to install tracing subscriber: {err}"))
        })
}

fn describe_metrics() {
    METRIC_DESCRIPTIONS.call_once(|| {
        describe_counter!(
            "quire_cache_read_total",
            Unit::Count,
            "Cached reads, labelled by served_from (fresh, stale, miss)."
        );
        describe_counter!(
            "quire_cache_backend_error_total",
            Unit::Count,
            "Key-value backend failures absorbed by the cache, labelled by op."
        );
        describe_counter!(
            "quire_refresh_total",
            Unit::Count,
            "Background refreshes, labelled by outcome."
        );
        describe_counter!(
            "quire_refresh_dropped_total",
            Unit::Count,
            "Refresh jobs discarded because the queue was full."
        );
        describe_gauge!(
            "quire_refresh_queue_len",
            Unit::Count,
            "Refresh jobs waiting for a worker."
        );
        describe_histogram!(
            "quire_refresh_ms",
            Unit::Milliseconds,
            "Background refresh latency in milliseconds."
        );
        describe_counter!(
            "quire_invalidation_rewritten_total",
            Unit::Count,
            "List entries rewritten without an invalidated slug."
        );
        describe_counter!(
            "quire_invalidation_deleted_total",
            Unit::Count,
            "Entries deleted by invalidation or purge."
        );
    });
}
