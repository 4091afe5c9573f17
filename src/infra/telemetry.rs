use std::sync::Once;

use metrics::{Unit, describe_counter, describe_histogram};
use tracing_error::ErrorLayer;
use tracing_subscriber::{
    EnvFilter, fmt,
    layer::{Layer, SubscriberExt},
    util::SubscriberInitExt,
};

use crate::cache::metrics::{
    METRIC_FLIGHT_JOINED_TOTAL, METRIC_LOOKUP_TOTAL, METRIC_PURGED_KEYS_TOTAL,
    METRIC_REGENERATION_TOTAL, METRIC_RENDER_MS, METRIC_STORE_EVICT_TOTAL,
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
            .with_writer(std::io::stderr)
            .boxed(),
        LogFormat::Compact => fmt::layer()
            .compact()
            .with_target(true)
            .with_writer(std::io::stderr)
            .boxed(),
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

/// Register descriptions for every metric the cache emits.
pub fn describe_metrics() {
    METRIC_DESCRIPTIONS.call_once(|| {
        describe_counter!(
            METRIC_LOOKUP_TOTAL,
            Unit::Count,
            "Cache lookups by served path (hit, stale, miss, expired, degraded, error)."
        );
        describe_counter!(
            METRIC_REGENERATION_TOTAL,
            Unit::Count,
            "Regenerations by result (committed, conflict, failed, superseded)."
        );
        describe_counter!(
            METRIC_FLIGHT_JOINED_TOTAL,
            Unit::Count,
            "Lookups that attached to an in-flight regeneration."
        );
        describe_counter!(
            METRIC_STORE_EVICT_TOTAL,
            Unit::Count,
            "Entries evicted from the memory store due to capacity."
        );
        describe_counter!(
            METRIC_PURGED_KEYS_TOTAL,
            Unit::Count,
            "Entries removed by tag invalidation."
        );
        describe_histogram!(
            METRIC_RENDER_MS,
            Unit::Milliseconds,
            "Render latency in milliseconds."
        );
    });
}
