//! Tracing and metrics bootstrap.

use std::sync::Once;

use metrics::{Unit, describe_counter, describe_histogram};
use tracing_error::ErrorLayer;
use tracing_subscriber::{
    EnvFilter, fmt,
    layer::{Layer, SubscriberExt},
    util::SubscriberInitExt,
};

use crate::config::{LogFormat, LoggingSettings};
use crate::error::AppError;

static METRIC_DESCRIPTIONS: Once = Once::new();

/// Install a global tracing subscriber using the provided logging settings.
pub fn init(logging: &LoggingSettings) -> Result<(), AppError> {
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
            AppError::Telemetry(format!("failed to install tracing subscriber: {err}"))
        })
}

fn describe_metrics() {
    METRIC_DESCRIPTIONS.call_once(|| {
        describe_counter!(
            "dispensa_cache_hit_total",
            Unit::Count,
            "Total number of fresh cache hits."
        );
        describe_counter!(
            "dispensa_cache_miss_total",
            Unit::Count,
            "Total number of cache misses and expirations."
        );
        describe_counter!(
            "dispensa_cache_stale_served_total",
            Unit::Count,
            "Total number of stale entries served after origin failures."
        );
        describe_counter!(
            "dispensa_cache_unavailable_total",
            Unit::Count,
            "Total number of synthesized 503 responses."
        );
        describe_counter!(
            "dispensa_cache_write_total",
            Unit::Count,
            "Total number of successful cache writes from the request path."
        );
        describe_counter!(
            "dispensa_revalidate_refreshed_total",
            Unit::Count,
            "Total number of assets refreshed by background revalidation."
        );
        describe_counter!(
            "dispensa_revalidate_failed_total",
            Unit::Count,
            "Total number of revalidation failures."
        );
        describe_histogram!(
            "dispensa_fetch_duration_ms",
            Unit::Milliseconds,
            "Origin fetch latency in milliseconds."
        );
    });
}
