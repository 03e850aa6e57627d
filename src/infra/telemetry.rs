use std::sync::Once;

use metrics::{Unit, describe_counter, describe_gauge};
use tracing_error::ErrorLayer;
use tracing_subscriber::{
    EnvFilter, fmt,
    layer::{Layer, SubscriberExt},
    util::SubscriberInitExt,
};

use crate::auth::metric_names as auth_names;
use crate::cache::metric_names as cache_names;
use crate::config::{LogFormat, LoggingSettings};
use crate::pipeline::METRIC_REQUEST_RETRIED;

use super::error::InfraError;

static METRIC_DESCRIPTIONS: Once = Once::new();

/// Install a global tracing subscriber using the provided logging settings.
///
/// Logs go to stderr so command output on stdout stays machine-readable.
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

/// Register descriptions for every metric the client emits. Safe to call repeatedly.
pub fn describe_metrics() {
    METRIC_DESCRIPTIONS.call_once(|| {
        describe_counter!(
            cache_names::METRIC_CACHE_HIT,
            Unit::Count,
            "Total number of reads served from the response cache."
        );
        describe_counter!(
            cache_names::METRIC_CACHE_MISS,
            Unit::Count,
            "Total number of reads not served from the response cache."
        );
        describe_counter!(
            cache_names::METRIC_CACHE_EXPIRED,
            Unit::Count,
            "Total number of cache entries found stale on read."
        );
        describe_counter!(
            cache_names::METRIC_CACHE_EVICT,
            Unit::Count,
            "Total number of cache entries evicted due to capacity."
        );
        describe_counter!(
            cache_names::METRIC_CACHE_SWEPT,
            Unit::Count,
            "Total number of expired cache entries removed by the sweeper."
        );
        describe_counter!(
            cache_names::METRIC_INFLIGHT_STARTED,
            Unit::Count,
            "Total number of underlying fetches started."
        );
        describe_counter!(
            cache_names::METRIC_INFLIGHT_JOIN,
            Unit::Count,
            "Total number of reads that joined an in-flight fetch."
        );
        describe_counter!(
            auth_names::METRIC_REFRESH_STARTED,
            Unit::Count,
            "Total number of credential renewals started."
        );
        describe_counter!(
            auth_names::METRIC_REFRESH_FAILED,
            Unit::Count,
            "Total number of credential renewals that ended the session."
        );
        describe_gauge!(
            auth_names::METRIC_REFRESH_WAITERS,
            Unit::Count,
            "Current number of calls waiting on a credential renewal."
        );
        describe_counter!(
            METRIC_REQUEST_RETRIED,
            Unit::Count,
            "Total number of calls replayed after a credential renewal."
        );
    });
}
