//! Configuration schema types.
//!
//! This module defines the structure of all configuration sections.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Server configuration section.
///
/// # Example
///
/// ```
/// use portcullis_config::ServerConfig;
///
/// let config = ServerConfig {
///     http_addr: "127.0.0.1:8080".to_string(),
///     ..Default::default()
/// };
/// assert_eq!(config.request_timeout_ms, 30000);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct ServerConfig {
    /// HTTP listen address (e.g., "0.0.0.0:8080").
    #[serde(default = "default_http_addr")]
    pub http_addr: String,

    /// Per-request deadline in milliseconds. `0` disables it.
    #[serde(default = "default_request_timeout")]
    pub request_timeout_ms: u64,

    /// Largest request body the gateway will buffer, in bytes.
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,

    /// Graceful shutdown timeout in seconds.
    #[serde(default = "default_shutdown_timeout")]
    pub shutdown_timeout_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_addr: default_http_addr(),
            request_timeout_ms: default_request_timeout(),
            max_body_bytes: default_max_body_bytes(),
            shutdown_timeout_secs: default_shutdown_timeout(),
        }
    }
}

fn default_http_addr() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_request_timeout() -> u64 {
    30000
}

fn default_max_body_bytes() -> usize {
    10 * 1024 * 1024
}

fn default_shutdown_timeout() -> u64 {
    30
}

/// Log output format.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// JSON lines for production.
    #[default]
    Json,
    /// Human-readable output for development.
    Pretty,
}

/// Logging configuration section.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct LoggingConfig {
    /// Log filter directive (e.g., "info", "portcullis_filters=debug").
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Output format.
    #[serde(default)]
    pub format: LogFormat,

    /// Enable ANSI colors in pretty output.
    #[serde(default)]
    pub ansi_enabled: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::Json,
            ansi_enabled: false,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Metrics configuration section.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct MetricsConfig {
    /// Record metrics and serve them at `/_portcullis/metrics`.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Histogram bucket boundaries for request duration, in seconds.
    #[serde(default = "default_histogram_buckets")]
    pub histogram_buckets: Vec<f64>,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            histogram_buckets: default_histogram_buckets(),
        }
    }
}

fn default_histogram_buckets() -> Vec<f64> {
    vec![
        0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
    ]
}

/// CORS policy section.
///
/// An `allowed_origins` entry of `"*"` allows any origin.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct CorsConfig {
    /// Allowed origins.
    #[serde(default = "default_any")]
    pub allowed_origins: Vec<String>,

    /// Allowed methods.
    #[serde(default = "default_cors_methods")]
    pub allowed_methods: Vec<String>,

    /// Allowed request headers.
    #[serde(default = "default_any")]
    pub allowed_headers: Vec<String>,

    /// Response headers exposed to scripts.
    #[serde(default)]
    pub exposed_headers: Vec<String>,

    /// Allow cookies and authorization headers.
    #[serde(default)]
    pub allow_credentials: bool,

    /// Preflight cache lifetime in seconds.
    #[serde(default = "default_max_age")]
    pub max_age_secs: Option<u64>,
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            allowed_origins: default_any(),
            allowed_methods: default_cors_methods(),
            allowed_headers: default_any(),
            exposed_headers: Vec::new(),
            allow_credentials: false,
            max_age_secs: default_max_age(),
        }
    }
}

fn default_any() -> Vec<String> {
    vec!["*".to_string()]
}

fn default_cors_methods() -> Vec<String> {
    ["GET", "HEAD", "POST", "PUT", "DELETE", "PATCH", "OPTIONS"]
        .iter()
        .map(|m| (*m).to_string())
        .collect()
}

#[allow(clippy::unnecessary_wraps)]
fn default_max_age() -> Option<u64> {
    Some(3600)
}

/// A statically configured bearer token.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct TokenConfig {
    /// The opaque token value.
    pub token: String,
    /// Subject the token authenticates as.
    pub subject: String,
    /// Display name.
    #[serde(default)]
    pub name: Option<String>,
    /// Granted authorities.
    #[serde(default)]
    pub authorities: Vec<String>,
}

/// Security section.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(deny_unknown_fields)]
pub struct SecurityConfig {
    /// Path prefixes that require a bearer token.
    #[serde(default)]
    pub protected_paths: Vec<String>,

    /// Tokens accepted by the static authenticator.
    #[serde(default)]
    pub tokens: Vec<TokenConfig>,
}

/// A route from a path prefix to a logical service.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct RouteConfig {
    /// Route identifier.
    pub id: String,
    /// Path prefix the route matches.
    pub path_prefix: String,
    /// Logical service requests go to.
    pub service_id: String,
    /// Remove `path_prefix` before forwarding.
    #[serde(default)]
    pub strip_prefix: bool,
}

/// How the caller's identity reaches a backend service.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum IdentityInjection {
    /// `userId` and `user` headers only.
    #[default]
    Header,
    /// Headers plus a `user=<subject>` query parameter.
    Query,
    /// Headers plus a `"user"` key in the JSON body.
    Body,
}

/// An authority requirement scoped to methods and a path prefix.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct AuthorityRule {
    /// Methods the rule applies to. Empty means all.
    #[serde(default)]
    pub methods: Vec<String>,
    /// Path prefix the rule applies to. Absent means all.
    #[serde(default)]
    pub path_prefix: Option<String>,
    /// Authorities that satisfy the rule.
    pub authorities: Vec<String>,
}

impl AuthorityRule {
    /// Returns `true` if the rule applies to `method` and `path`.
    #[must_use]
    pub fn matches(&self, method: &str, path: &str) -> bool {
        let method_ok =
            self.methods.is_empty() || self.methods.iter().any(|m| m.eq_ignore_ascii_case(method));
        let path_ok = self
            .path_prefix
            .as_deref()
            .map_or(true, |prefix| path.starts_with(prefix));
        method_ok && path_ok
    }
}

/// Static Basic credentials injected for a service.
#[derive(Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct BasicAuthConfig {
    /// User name.
    pub username: String,
    /// Password.
    pub password: String,
    /// Authority rules; the caller must hold one authority from the union
    /// of all matching rules.
    #[serde(default)]
    pub required_authorities: Vec<AuthorityRule>,
}

impl std::fmt::Debug for BasicAuthConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BasicAuthConfig")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("required_authorities", &self.required_authorities)
            .finish()
    }
}

/// A statically configured backend instance.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct InstanceConfig {
    /// Host name or address.
    pub host: String,
    /// Port.
    pub port: u16,
    /// `http` or `https`.
    #[serde(default = "default_scheme")]
    pub scheme: String,
    /// Instance metadata (e.g., `basePath`).
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

fn default_scheme() -> String {
    "http".to_string()
}

/// Per-service settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(deny_unknown_fields)]
pub struct ServiceConfig {
    /// How the caller's identity is forwarded.
    #[serde(default)]
    pub identity_injection: IdentityInjection,

    /// Basic credentials to inject, if the service requires them.
    #[serde(default)]
    pub basic_auth: Option<BasicAuthConfig>,

    /// Instances to balance across.
    #[serde(default)]
    pub instances: Vec<InstanceConfig>,
}

fn default_true() -> bool {
    true
}
