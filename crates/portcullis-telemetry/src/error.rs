//! Telemetry error types.

use thiserror::Error;

/// Errors that can occur while installing telemetry.
#[derive(Debug, Error)]
pub enum TelemetryError {
    /// Failed to install the metrics recorder.
    #[error("failed to initialize metrics: {0}")]
    MetricsInit(String),

    /// Failed to install the logging subscriber.
    #[error("failed to initialize logging: {0}")]
    LoggingInit(String),

    /// Invalid telemetry configuration.
    #[error("invalid telemetry configuration: {0}")]
    InvalidConfig(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = TelemetryError::MetricsInit("recorder already installed".to_string());
        assert_eq!(
            err.to_string(),
            "failed to initialize metrics: recorder already installed"
        );
    }
}
