//! Main configuration types.
//!
//! This module provides the top-level [`GatewayConfig`] struct.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};

use crate::{
    ConfigError, CorsConfig, LogFormat, LoggingConfig, MetricsConfig, RouteConfig, SecurityConfig,
    ServerConfig, ServiceConfig,
};

/// Complete gateway configuration.
///
/// Use [`ConfigLoader`](crate::ConfigLoader) to load configuration from files
/// and environment variables.
///
/// # Example
///
/// ```
/// use portcullis_config::GatewayConfig;
///
/// let config = GatewayConfig::default();
/// assert_eq!(config.server.http_addr, "0.0.0.0:8080");
/// assert!(config.routes.is_empty());
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(deny_unknown_fields)]
pub struct GatewayConfig {
    /// Server configuration.
    #[serde(default)]
    pub server: ServerConfig,

    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Metrics configuration.
    #[serde(default)]
    pub metrics: MetricsConfig,

    /// CORS policy.
    #[serde(default)]
    pub cors: CorsConfig,

    /// Bearer authentication settings.
    #[serde(default)]
    pub security: SecurityConfig,

    /// Routes, matched in order.
    #[serde(default)]
    pub routes: Vec<RouteConfig>,

    /// Services keyed by service id.
    #[serde(default)]
    pub services: BTreeMap<String, ServiceConfig>,
}

impl GatewayConfig {
    /// Returns the settings for `service_id`, if configured.
    #[must_use]
    pub fn service(&self, service_id: &str) -> Option<&ServiceConfig> {
        self.services.get(service_id)
    }

    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidValue` or `ConfigError::Inconsistent` if:
    /// - The server address is not a socket address
    /// - A route id is duplicated, a route prefix lacks a leading `/`, or a
    ///   route names a service that is not configured
    /// - An instance has port 0 or an unsupported scheme
    /// - A protected path lacks a leading `/`
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self
            .server
            .http_addr
            .parse::<std::net::SocketAddr>()
            .is_err()
        {
            return Err(ConfigError::invalid_value(
                "server.http_addr",
                format!("invalid socket address: {}", self.server.http_addr),
            ));
        }

        if self.server.max_body_bytes == 0 {
            return Err(ConfigError::invalid_value(
                "server.max_body_bytes",
                "must be greater than 0",
            ));
        }

        for (i, path) in self.security.protected_paths.iter().enumerate() {
            if !path.starts_with('/') {
                return Err(ConfigError::invalid_value(
                    format!("security.protected_paths[{i}]"),
                    format!("must start with '/': {path}"),
                ));
            }
        }

        let mut route_ids = HashSet::new();
        for route in &self.routes {
            if !route_ids.insert(route.id.as_str()) {
                return Err(ConfigError::validation_error(format!(
                    "duplicate route id '{}'",
                    route.id
                )));
            }
            if !route.path_prefix.starts_with('/') {
                return Err(ConfigError::invalid_value(
                    format!("routes.{}.path_prefix", route.id),
                    format!("must start with '/': {}", route.path_prefix),
                ));
            }
            if !self.services.contains_key(&route.service_id) {
                return Err(ConfigError::validation_error(format!(
                    "route '{}' references unknown service '{}'",
                    route.id, route.service_id
                )));
            }
        }

        for (service_id, service) in &self.services {
            for (i, instance) in service.instances.iter().enumerate() {
                if instance.port == 0 {
                    return Err(ConfigError::invalid_value(
                        format!("services.{service_id}.instances[{i}].port"),
                        "must be greater than 0",
                    ));
                }
                if instance.scheme != "http" && instance.scheme != "https" {
                    return Err(ConfigError::invalid_value(
                        format!("services.{service_id}.instances[{i}].scheme"),
                        format!("unsupported scheme: {}", instance.scheme),
                    ));
                }
            }
        }

        Ok(())
    }

    /// Create a development configuration preset.
    ///
    /// Pretty, colored logs at debug level.
    ///
    /// ```
    /// use portcullis_config::GatewayConfig;
    ///
    /// let config = GatewayConfig::development();
    /// assert_eq!(config.logging.level, "debug");
    /// ```
    #[must_use]
    pub fn development() -> Self {
        let mut config = Self::default();
        config.logging.level = "debug".to_string();
        config.logging.format = LogFormat::Pretty;
        config.logging.ansi_enabled = true;
        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{IdentityInjection, InstanceConfig};

    fn service_with_instance(port: u16) -> ServiceConfig {
        ServiceConfig {
            instances: vec![InstanceConfig {
                host: "localhost".to_string(),
                port,
                scheme: "http".to_string(),
                metadata: Default::default(),
            }],
            ..Default::default()
        }
    }

    fn route(id: &str, prefix: &str, service_id: &str) -> RouteConfig {
        RouteConfig {
            id: id.to_string(),
            path_prefix: prefix.to_string(),
            service_id: service_id.to_string(),
            strip_prefix: false,
        }
    }

    #[test]
    fn test_default_config_is_valid() {
        assert!(GatewayConfig::default().validate().is_ok());
    }

    #[test]
    fn test_invalid_http_addr() {
        let mut config = GatewayConfig::default();
        config.server.http_addr = "not-an-address".to_string();

        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("server.http_addr"));
    }

    #[test]
    fn test_route_to_unknown_service() {
        let mut config = GatewayConfig::default();
        config.routes.push(route("orders", "/orders", "orders"));

        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("unknown service 'orders'"));

        config
            .services
            .insert("orders".to_string(), service_with_instance(8081));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_duplicate_route_id() {
        let mut config = GatewayConfig::default();
        config
            .services
            .insert("orders".to_string(), service_with_instance(8081));
        config.routes.push(route("orders", "/orders", "orders"));
        config.routes.push(route("orders", "/v2/orders", "orders"));

        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("duplicate route id"));
    }

    #[test]
    fn test_route_prefix_requires_slash() {
        let mut config = GatewayConfig::default();
        config
            .services
            .insert("orders".to_string(), service_with_instance(8081));
        config.routes.push(route("orders", "orders", "orders"));

        assert!(config.validate().is_err());
    }

    #[test]
    fn test_instance_port_zero_rejected() {
        let mut config = GatewayConfig::default();
        config
            .services
            .insert("orders".to_string(), service_with_instance(0));

        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("services.orders.instances[0].port"));
    }

    #[test]
    fn test_service_lookup() {
        let mut config = GatewayConfig::default();
        config.services.insert(
            "billing".to_string(),
            ServiceConfig {
                identity_injection: IdentityInjection::Query,
                ..Default::default()
            },
        );

        assert_eq!(
            config.service("billing").unwrap().identity_injection,
            IdentityInjection::Query
        );
        assert!(config.service("orders").is_none());
    }

    #[test]
    fn test_development_preset() {
        let config = GatewayConfig::development();
        assert_eq!(config.logging.format, LogFormat::Pretty);
        assert!(config.logging.ansi_enabled);
    }
}
