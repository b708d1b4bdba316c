//! Builds the filter chain from configuration.
//!
//! [`Collaborators`] holds the pluggable parts. [`Collaborators::from_config`]
//! gives the static implementations; tests and embedders swap in their own.

use std::sync::Arc;
use std::time::Duration;

use portcullis_config::GatewayConfig;
use portcullis_core::{Authenticator, Backend, BodyCodec, JsonCodec, RouteMatcher, ServiceResolver};
use portcullis_filters::stages::{
    order, BasicAuthOverrideFilter, BearerAuthFilter, CorsFilter, PathRewriteFilter,
    RequestLoggerFilter, ServiceIdFilter, TraceIdFilter, UserIdentityFilter,
};
use portcullis_filters::Chain;
use tracing::debug;

use crate::auth::StaticTokenAuthenticator;
use crate::backend::HttpBackend;
use crate::discovery::StaticServiceResolver;
use crate::error::{ServerError, ServerResult};
use crate::routes::PrefixRouteTable;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// The pluggable parts of the chain.
#[derive(Clone)]
pub struct Collaborators {
    /// Validates bearer tokens.
    pub authenticator: Arc<dyn Authenticator>,
    /// Maps requests to routes.
    pub routes: Arc<dyn RouteMatcher>,
    /// Maps services to instances.
    pub resolver: Arc<dyn ServiceResolver>,
    /// Decodes and encodes request bodies for identity injection.
    pub codec: Arc<dyn BodyCodec>,
    /// Sends requests to instances.
    pub backend: Arc<dyn Backend>,
}

impl Collaborators {
    /// Builds the static collaborators described by `config`.
    ///
    /// # Errors
    ///
    /// Fails if the HTTP client cannot be created.
    pub fn from_config(config: &GatewayConfig) -> ServerResult<Self> {
        let backend = HttpBackend::new(CONNECT_TIMEOUT, config.server.max_body_bytes)
            .map_err(ServerError::Client)?;

        Ok(Self {
            authenticator: Arc::new(StaticTokenAuthenticator::from_config(&config.security.tokens)),
            routes: Arc::new(PrefixRouteTable::new(config.routes.clone())),
            resolver: Arc::new(StaticServiceResolver::from_config(&config.services)),
            codec: Arc::new(JsonCodec),
            backend: Arc::new(backend),
        })
    }
}

impl std::fmt::Debug for Collaborators {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Collaborators").finish_non_exhaustive()
    }
}

/// Builds the chain for `config` with the static collaborators.
///
/// # Errors
///
/// Fails if a collaborator cannot be created or the chain is inconsistent.
pub fn build_chain(config: &GatewayConfig) -> ServerResult<Chain> {
    build_chain_with(config, Collaborators::from_config(config)?)
}

/// Builds the chain for `config` around the given collaborators.
///
/// # Errors
///
/// Fails if the registered filters violate phase ordering.
pub fn build_chain_with(config: &GatewayConfig, parts: Collaborators) -> ServerResult<Chain> {
    let mut identity = UserIdentityFilter::new(parts.codec)
        .with_max_body_bytes(config.server.max_body_bytes);
    let mut basic_auth = BasicAuthOverrideFilter::new();
    for (service_id, service) in &config.services {
        identity = identity.with_service(service_id.clone(), service.identity_injection);
        if let Some(credentials) = &service.basic_auth {
            basic_auth = basic_auth.with_service(service_id.clone(), credentials);
        }
    }

    let mut builder = Chain::builder()
        .register(order::CORS, CorsFilter::from_config(&config.cors))
        .register(order::REQUEST_LOGGER, RequestLoggerFilter::new())
        .register(
            order::BEARER_AUTH,
            BearerAuthFilter::new(parts.authenticator, &config.security.protected_paths),
        )
        .register(order::USER_IDENTITY, identity)
        .register(order::BASIC_AUTH, basic_auth)
        .register(order::PATH_REWRITE, PathRewriteFilter::new())
        .register(order::SERVICE_ID, ServiceIdFilter::new())
        .register(order::TRACE_ID, TraceIdFilter::new())
        .route_matcher(parts.routes)
        .resolver(parts.resolver)
        .backend(parts.backend);

    if config.server.request_timeout_ms > 0 {
        builder = builder.request_timeout(Duration::from_millis(config.server.request_timeout_ms));
    }

    let chain = builder.build()?;
    debug!(filters = ?chain.describe(), "filter chain built");
    Ok(chain)
}
