//! Liveness and readiness of the gateway process.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use serde::{Deserialize, Serialize};

/// Health status reported on the health endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// Accepting and routing traffic.
    Healthy,
    /// Not accepting traffic, typically while starting or draining.
    Draining,
}

/// Health endpoint body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    /// Overall status.
    pub status: HealthStatus,
    /// Seconds since the gateway started.
    pub uptime_seconds: u64,
    /// Gateway version.
    pub version: String,
    /// Number of filters in the chain.
    pub filters: usize,
}

/// Tracks process start time and readiness.
#[derive(Debug)]
pub struct HealthChecker {
    start_time: Instant,
    ready: AtomicBool,
    filters: usize,
}

impl HealthChecker {
    /// Creates a checker for a chain of `filters` filters, not yet ready.
    #[must_use]
    pub fn new(filters: usize) -> Self {
        Self {
            start_time: Instant::now(),
            ready: AtomicBool::new(false),
            filters,
        }
    }

    /// Marks the gateway ready or draining.
    pub fn set_ready(&self, ready: bool) {
        self.ready.store(ready, Ordering::SeqCst);
    }

    /// Returns `true` while the gateway accepts traffic.
    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    /// Builds the health endpoint body.
    #[must_use]
    pub fn check(&self) -> HealthResponse {
        HealthResponse {
            status: if self.is_ready() {
                HealthStatus::Healthy
            } else {
                HealthStatus::Draining
            },
            uptime_seconds: self.start_time.elapsed().as_secs(),
            version: crate::VERSION.to_string(),
            filters: self.filters,
        }
    }
}
