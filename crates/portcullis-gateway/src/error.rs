//! Error types for the gateway process.
//!
//! These cover startup and the accept loop. Request-level failures never
//! surface here; they are answered through the filter chain.

use portcullis_config::ConfigError;
use portcullis_filters::ChainError;
use portcullis_telemetry::TelemetryError;
use thiserror::Error;

/// Gateway process errors.
#[derive(Debug, Error)]
pub enum ServerError {
    /// Configuration could not be loaded or is invalid.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Logging or metrics could not be installed.
    #[error(transparent)]
    Telemetry(#[from] TelemetryError),

    /// The filter chain could not be assembled.
    #[error("failed to build filter chain: {0}")]
    Chain(#[from] ChainError),

    /// The listen socket could not be bound.
    #[error("failed to bind {addr}: {source}")]
    Bind {
        /// The address that was requested.
        addr: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The backend HTTP client could not be created.
    #[error("failed to create backend client: {0}")]
    Client(#[source] reqwest::Error),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ServerError {
    /// Creates a bind error.
    pub fn bind(addr: impl Into<String>, source: std::io::Error) -> Self {
        Self::Bind {
            addr: addr.into(),
            source,
        }
    }

    /// Process exit code for this error.
    ///
    /// Configuration problems exit with `2`, everything else with `1`.
    #[must_use]
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Config(_) | Self::Chain(_) => 2,
            _ => 1,
        }
    }
}

/// Result type for gateway process operations.
pub type ServerResult<T> = Result<T, ServerError>;
