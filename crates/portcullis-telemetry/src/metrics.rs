//! Prometheus metrics for the gateway.
//!
//! The filter chain records through the `metrics` facade; this module
//! installs the Prometheus recorder behind it and renders the scrape output
//! served at `/_portcullis/metrics`.
//!
//! # Gateway Metrics
//!
//! | Metric | Type | Labels | Description |
//! |--------|------|--------|-------------|
//! | `portcullis_requests_total` | Counter | `outcome` | Requests by chain outcome |
//! | `portcullis_request_duration_seconds` | Histogram | - | Time spent in the chain |
//! | `portcullis_filter_short_circuits_total` | Counter | `filter` | Requests answered by a filter |
//! | `portcullis_in_flight_requests` | Gauge | - | Requests currently in the chain |

use crate::error::TelemetryError;
use crate::TelemetryResult;
use metrics::{describe_counter, describe_gauge, describe_histogram, gauge};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use portcullis_config::MetricsConfig;

/// Requests by outcome.
pub const REQUESTS_TOTAL: &str = "portcullis_requests_total";

/// Chain latency histogram.
pub const REQUEST_DURATION_SECONDS: &str = "portcullis_request_duration_seconds";

/// Requests answered directly by a filter.
pub const FILTER_SHORT_CIRCUITS_TOTAL: &str = "portcullis_filter_short_circuits_total";

/// Requests currently in the chain.
pub const IN_FLIGHT_REQUESTS: &str = "portcullis_in_flight_requests";

/// Handle to the installed Prometheus recorder.
#[derive(Debug, Clone)]
pub struct MetricsRegistry {
    handle: PrometheusHandle,
}

impl MetricsRegistry {
    /// Wraps an existing handle.
    #[must_use]
    pub fn new(handle: PrometheusHandle) -> Self {
        Self { handle }
    }

    /// Renders all metrics in Prometheus text format.
    #[must_use]
    pub fn render(&self) -> String {
        self.handle.render()
    }
}

/// Builds the Prometheus recorder without installing it.
///
/// # Errors
///
/// Returns [`TelemetryError::InvalidConfig`] if the histogram buckets are
/// rejected.
pub fn build_recorder(
    config: &MetricsConfig,
) -> TelemetryResult<metrics_exporter_prometheus::PrometheusRecorder> {
    let builder = PrometheusBuilder::new()
        .set_buckets_for_metric(
            Matcher::Full(REQUEST_DURATION_SECONDS.to_string()),
            &config.histogram_buckets,
        )
        .map_err(|e| TelemetryError::InvalidConfig(e.to_string()))?;
    Ok(builder.build_recorder())
}

/// Installs the global Prometheus recorder.
///
/// Returns `None` when metrics are disabled; the `metrics` macros are then
/// no-ops.
///
/// # Errors
///
/// Returns [`TelemetryError::MetricsInit`] if a recorder is already
/// installed.
pub fn init_metrics(config: &MetricsConfig) -> TelemetryResult<Option<MetricsRegistry>> {
    if !config.enabled {
        return Ok(None);
    }

    let recorder = build_recorder(config)?;
    let handle = recorder.handle();
    metrics::set_global_recorder(recorder)
        .map_err(|e| TelemetryError::MetricsInit(e.to_string()))?;

    register_metric_descriptions();

    Ok(Some(MetricsRegistry::new(handle)))
}

fn register_metric_descriptions() {
    describe_counter!(REQUESTS_TOTAL, "Requests processed by the filter chain, by outcome");
    describe_histogram!(
        REQUEST_DURATION_SECONDS,
        metrics::Unit::Seconds,
        "Time spent in the filter chain"
    );
    describe_counter!(
        FILTER_SHORT_CIRCUITS_TOTAL,
        "Requests answered directly by a filter"
    );
    describe_gauge!(IN_FLIGHT_REQUESTS, "Requests currently in the filter chain");
}

/// Tracks one in-flight request; the gauge is decremented on drop.
#[derive(Debug)]
pub struct InFlightGuard {
    _private: (),
}

impl InFlightGuard {
    /// Increments the in-flight gauge.
    #[must_use]
    pub fn new() -> Self {
        gauge!(IN_FLIGHT_REQUESTS).increment(1.0);
        Self { _private: () }
    }
}

impl Default for InFlightGuard {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        gauge!(IN_FLIGHT_REQUESTS).decrement(1.0);
    }
}
