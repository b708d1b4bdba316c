//! Basic credentials override filter.
//!
//! Some backends accept only HTTP Basic credentials. For those services the
//! caller's bearer token is replaced with the service's configured
//! `Authorization: Basic ...` value, after checking that the caller holds
//! one of the authorities the service requires for this method and path.
//!
//! The filter passes the request through untouched when there is no route
//! target, the service has no Basic credentials, or the caller is not
//! authenticated.

use crate::filter::{Filter, Next, Outcome, Phase};
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use http::header::{HeaderValue, AUTHORIZATION};
use portcullis_config::{AuthorityRule, BasicAuthConfig};
use portcullis_core::{BoxFuture, GatewayError, RequestContext, Response, ResponseExt};
use std::collections::{HashMap, HashSet};
use tracing::{debug, info};

/// Basic credentials and authority rules for one service.
#[derive(Clone)]
struct ServiceCredentials {
    header: HeaderValue,
    rules: Vec<AuthorityRule>,
}

impl ServiceCredentials {
    fn new(config: &BasicAuthConfig) -> Option<Self> {
        let encoded = STANDARD.encode(format!("{}:{}", config.username, config.password));
        let mut header = HeaderValue::from_str(&format!("Basic {encoded}")).ok()?;
        header.set_sensitive(true);
        Some(Self {
            header,
            rules: config.required_authorities.clone(),
        })
    }

    /// Union of the authorities of every rule matching `method` and `path`.
    fn required_authorities(&self, method: &str, path: &str) -> HashSet<String> {
        self.rules
            .iter()
            .filter(|rule| rule.matches(method, path))
            .flat_map(|rule| rule.authorities.iter().cloned())
            .collect()
    }
}

/// Replaces the caller's credentials with a service's Basic credentials.
#[derive(Clone, Default)]
pub struct BasicAuthOverrideFilter {
    services: HashMap<String, ServiceCredentials>,
}

impl BasicAuthOverrideFilter {
    /// Creates a filter with no services configured.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds Basic credentials for `service_id`.
    #[must_use]
    pub fn with_service(mut self, service_id: impl Into<String>, config: &BasicAuthConfig) -> Self {
        let service_id = service_id.into();
        match ServiceCredentials::new(config) {
            Some(credentials) => {
                self.services.insert(service_id, credentials);
            }
            None => tracing::warn!(service = %service_id, "basic credentials are not a valid header"),
        }
        self
    }

    /// Returns `true` if `service_id` has Basic credentials.
    #[must_use]
    pub fn requires_basic_auth(&self, service_id: &str) -> bool {
        self.services.contains_key(service_id)
    }
}

impl std::fmt::Debug for BasicAuthOverrideFilter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut services: Vec<&String> = self.services.keys().collect();
        services.sort();
        f.debug_struct("BasicAuthOverrideFilter")
            .field("services", &services)
            .finish()
    }
}

impl Filter for BasicAuthOverrideFilter {
    fn name(&self) -> &'static str {
        "basic_auth_override"
    }

    fn phase(&self) -> Phase {
        Phase::PostRoute
    }

    fn process<'a>(&'a self, ctx: RequestContext, next: Next<'a>) -> BoxFuture<'a, Outcome> {
        Box::pin(async move {
            let Some(target) = ctx.route_target() else {
                debug!("no route target, skipping basic auth");
                return next.run(ctx).await;
            };
            let service_id = target.service_id.clone();

            let Some(credentials) = self.services.get(&service_id) else {
                debug!(service = %service_id, "basic auth not required");
                return next.run(ctx).await;
            };

            let Some(identity) = ctx.identity() else {
                debug!(service = %service_id, "caller not authenticated, skipping basic auth");
                return next.run(ctx).await;
            };

            // Rules are written against the path the client sent.
            let original = ctx.original();
            let required =
                credentials.required_authorities(original.method.as_str(), original.uri.path());
            if !identity.has_any_of(&required) {
                debug!(
                    service = %service_id,
                    user = %identity.log_id(),
                    "insufficient authorities, returning 403"
                );
                let cause =
                    GatewayError::forbidden(format!("insufficient authority for {service_id}"));
                return Outcome::short_circuit(
                    self.name(),
                    Response::json_error(cause.status_code(), &cause.client_message()),
                );
            }

            let header = credentials.header.clone();
            let ctx = ctx.map_request(|mut request| {
                request.headers_mut().insert(AUTHORIZATION, header);
                request
            });
            info!(service = %service_id, "added basic authorization");

            next.run(ctx).await
        })
    }
}
