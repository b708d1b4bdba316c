//! Logging and metrics for the Portcullis gateway.
//!
//! - **Logging**: `tracing-subscriber` with an `EnvFilter`, JSON lines in
//!   production and pretty output in development
//! - **Metrics**: the `metrics` facade backed by a Prometheus recorder,
//!   rendered on demand for the gateway's metrics endpoint
//!
//! # Example
//!
//! ```rust,ignore
//! use portcullis_config::GatewayConfig;
//! use portcullis_telemetry::init_telemetry;
//!
//! let config = GatewayConfig::default();
//! let telemetry = init_telemetry(&config.logging, &config.metrics)?;
//!
//! if let Some(metrics) = telemetry.metrics() {
//!     println!("{}", metrics.render());
//! }
//! ```

#![warn(missing_docs)]

pub mod error;
pub mod logging;
pub mod metrics;

pub use error::TelemetryError;
pub use logging::{create_env_filter, init_logging};
pub use metrics::{init_metrics, InFlightGuard, MetricsRegistry};

use portcullis_config::{LoggingConfig, MetricsConfig};

/// Result type for telemetry operations.
pub type TelemetryResult<T> = Result<T, TelemetryError>;

/// Installed telemetry.
#[derive(Debug, Clone, Default)]
pub struct Telemetry {
    metrics: Option<MetricsRegistry>,
}

impl Telemetry {
    /// Returns the metrics registry, if metrics are enabled.
    #[must_use]
    pub fn metrics(&self) -> Option<&MetricsRegistry> {
        self.metrics.as_ref()
    }
}

/// Initializes logging, then metrics.
///
/// # Errors
///
/// Returns [`TelemetryError`] if either subsystem fails to install.
pub fn init_telemetry(logging: &LoggingConfig, metrics: &MetricsConfig) -> TelemetryResult<Telemetry> {
    init_logging(logging)?;
    let metrics = init_metrics(metrics)?;
    Ok(Telemetry { metrics })
}
