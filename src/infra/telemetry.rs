use std::sync::Once;

use metrics::{Unit, describe_counter, describe_histogram};
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

pub fn describe_metrics() {
    METRIC_DESCRIPTIONS.call_once(|| {
        describe_counter!(
            "pressroom_cache_hit_total",
            Unit::Count,
            "Reads answered from the cache."
        );
        describe_counter!(
            "pressroom_cache_miss_total",
            Unit::Count,
            "Reads that found no cache entry and loaded from the store."
        );
        describe_counter!(
            "pressroom_cache_bypass_total",
            Unit::Count,
            "Reads served from the store because the cache was disabled or unreachable."
        );
        describe_counter!(
            "pressroom_cache_fill_failed_total",
            Unit::Count,
            "Loaded values that could not be written back to the cache."
        );
        describe_counter!(
            "pressroom_cache_corrupt_total",
            Unit::Count,
            "Cache entries that failed to decode on a hit."
        );
        describe_counter!(
            "pressroom_cache_invalidation_failed_total",
            Unit::Count,
            "Committed writes whose cache invalidation did not complete."
        );
        describe_counter!(
            "pressroom_cache_backend_error_total",
            Unit::Count,
            "Cache backend calls that failed or exceeded their deadline."
        );
        describe_counter!(
            "pressroom_cache_memory_evict_total",
            Unit::Count,
            "In-process cache entries evicted due to capacity."
        );
        describe_counter!(
            "pressroom_store_query_total",
            Unit::Count,
            "Entity store queries issued by reads."
        );
        describe_histogram!(
            "pressroom_load_ms",
            Unit::Milliseconds,
            "Latency of loading and hydrating articles from the store."
        );
    });
}
