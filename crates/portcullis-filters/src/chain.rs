//! Priority-ordered filter chain.
//!
//! A [`Chain`] is built once at startup from `(priority, filter)` pairs and is
//! immutable afterwards. Filters run in ascending priority; ties keep
//! registration order. Every request walks the same sequence:
//!
//! 1. Pre-route filters
//! 2. Routing step: route match, route target, instance resolution
//! 3. Post-route filters
//! 4. Response-phase filters
//! 5. Backend dispatch
//!
//! and then unwinds back out through the same filters in reverse.

use crate::filter::{Failure, Filter, Next, Outcome, Phase};
use crate::uri::replace_path;
use http::StatusCode;
use portcullis_core::{
    Backend, BoxFuture, GatewayError, RequestContext, Response, ResponseExt, RouteMatcher,
    ServiceResolver,
};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, warn};

/// A type-erased filter that can be stored in a vector.
pub type BoxedFilter = Arc<dyn Filter>;

/// Errors raised while building a [`Chain`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ChainError {
    /// After sorting, a filter of an earlier phase comes after one of a later
    /// phase.
    #[error(
        "filter '{later}' ({later_phase:?}) is ordered after '{earlier}' ({earlier_phase:?})"
    )]
    PhaseOrder {
        /// The filter that runs first.
        earlier: &'static str,
        /// Its phase.
        earlier_phase: Phase,
        /// The filter that runs second.
        later: &'static str,
        /// Its phase.
        later_phase: Phase,
    },

    /// A required collaborator was not supplied.
    #[error("no {0} configured")]
    MissingCollaborator(&'static str),
}

struct Registration {
    priority: i32,
    index: usize,
    filter: BoxedFilter,
}

/// The immutable filter chain.
///
/// # Example
///
/// ```ignore
/// let chain = Chain::builder()
///     .register(order::CORS, CorsFilter::permissive())
///     .register(order::BEARER_AUTH, BearerAuthFilter::new(authenticator, ["/api"]))
///     .route_matcher(routes)
///     .resolver(resolver)
///     .backend(backend)
///     .build()?;
///
/// let response = match chain.run(ctx).await {
///     Ok(response) => response,
///     Err(failure) => failure.into_response(),
/// };
/// ```
pub struct Chain {
    filters: Vec<Registration>,
    routing_index: usize,
    routing: RoutingStep,
    backend: Arc<dyn Backend>,
    request_timeout: Option<Duration>,
}

impl Chain {
    /// Creates a new chain builder.
    #[must_use]
    pub fn builder() -> ChainBuilder {
        ChainBuilder::new()
    }

    /// Runs a request through the chain.
    ///
    /// Returns the response to send, or the failure that unwound out of the
    /// chain. A request timeout cancels the request's token; stages on the
    /// stack still see the failure on the way out.
    pub async fn run(&self, ctx: RequestContext) -> Result<Response, Failure> {
        let started = Instant::now();
        let token = ctx.cancellation().clone();
        let next = self.build_next();
        let mut timed_out = false;

        let outcome = match self.request_timeout {
            Some(timeout) => {
                let chain = next.run(ctx);
                tokio::pin!(chain);
                tokio::select! {
                    outcome = &mut chain => outcome,
                    () = tokio::time::sleep(timeout) => {
                        timed_out = true;
                        token.cancel();
                        chain.await
                    }
                }
            }
            None => next.run(ctx).await,
        };

        let label = outcome.label();
        let result = match outcome {
            Outcome::Continue(ctx) => ctx.into_response().ok_or_else(|| {
                Failure::new(GatewayError::internal("chain finished without a response"))
            }),
            Outcome::ShortCircuit(response) => Ok(response),
            Outcome::Error(failure) if timed_out && matches!(failure.cause(), GatewayError::Cancelled) => {
                Err(failure.with_cause(GatewayError::Timeout))
            }
            Outcome::Error(failure) => Err(failure),
        };

        if let Err(failure) = &result {
            warn!(
                error = %failure.cause(),
                category = failure.cause().category().as_str(),
                "request failed"
            );
        }

        metrics::counter!("portcullis_requests_total", "outcome" => label).increment(1);
        metrics::histogram!("portcullis_request_duration_seconds")
            .record(started.elapsed().as_secs_f64());

        result
    }

    /// Builds the continuation for one request, right to left.
    fn build_next(&self) -> Next<'_> {
        let mut next = Next::dispatch(self.backend.as_ref());
        if self.routing_index == self.filters.len() {
            next = Next::route(&self.routing, next);
        }

        for (index, registration) in self.filters.iter().enumerate().rev() {
            next = Next::filter(registration.filter.as_ref(), next);
            if index == self.routing_index {
                next = Next::route(&self.routing, next);
            }
        }

        next
    }

    /// Returns the filter names in execution order.
    #[must_use]
    pub fn filter_names(&self) -> Vec<&'static str> {
        self.filters.iter().map(|r| r.filter.name()).collect()
    }

    /// Returns `(priority, name)` pairs in execution order.
    #[must_use]
    pub fn describe(&self) -> Vec<(i32, &'static str)> {
        self.filters
            .iter()
            .map(|r| (r.priority, r.filter.name()))
            .collect()
    }

    /// Returns the number of filters.
    #[must_use]
    pub fn len(&self) -> usize {
        self.filters.len()
    }

    /// Returns `true` if no filters are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.filters.is_empty()
    }
}

impl std::fmt::Debug for Chain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Chain")
            .field("filters", &self.describe())
            .field("routing_index", &self.routing_index)
            .field("request_timeout", &self.request_timeout)
            .finish_non_exhaustive()
    }
}

/// Builder for constructing a [`Chain`].
#[derive(Default)]
pub struct ChainBuilder {
    registrations: Vec<Registration>,
    route_matcher: Option<Arc<dyn RouteMatcher>>,
    resolver: Option<Arc<dyn ServiceResolver>>,
    backend: Option<Arc<dyn Backend>>,
    request_timeout: Option<Duration>,
}

impl ChainBuilder {
    /// Creates an empty builder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `filter` at `priority`. Lower priorities run first.
    #[must_use]
    pub fn register<F: Filter>(self, priority: i32, filter: F) -> Self {
        self.register_boxed(priority, Arc::new(filter))
    }

    /// Registers an already shared filter.
    #[must_use]
    pub fn register_boxed(mut self, priority: i32, filter: BoxedFilter) -> Self {
        let index = self.registrations.len();
        self.registrations.push(Registration {
            priority,
            index,
            filter,
        });
        self
    }

    /// Sets the route matcher used by the routing step.
    #[must_use]
    pub fn route_matcher(mut self, matcher: Arc<dyn RouteMatcher>) -> Self {
        self.route_matcher = Some(matcher);
        self
    }

    /// Sets the instance resolver used by the routing step.
    #[must_use]
    pub fn resolver(mut self, resolver: Arc<dyn ServiceResolver>) -> Self {
        self.resolver = Some(resolver);
        self
    }

    /// Sets the backend the chain dispatches to.
    #[must_use]
    pub fn backend(mut self, backend: Arc<dyn Backend>) -> Self {
        self.backend = Some(backend);
        self
    }

    /// Cancels requests that take longer than `timeout`.
    #[must_use]
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = Some(timeout);
        self
    }

    /// Sorts the registrations and validates phase order.
    pub fn build(self) -> Result<Chain, ChainError> {
        let matcher = self
            .route_matcher
            .ok_or(ChainError::MissingCollaborator("route matcher"))?;
        let resolver = self
            .resolver
            .ok_or(ChainError::MissingCollaborator("service resolver"))?;
        let backend = self
            .backend
            .ok_or(ChainError::MissingCollaborator("backend"))?;

        let mut filters = self.registrations;
        filters.sort_by_key(|r| (r.priority, r.index));

        for pair in filters.windows(2) {
            let (a, b) = (&pair[0], &pair[1]);
            if a.filter.phase() > b.filter.phase() {
                return Err(ChainError::PhaseOrder {
                    earlier: a.filter.name(),
                    earlier_phase: a.filter.phase(),
                    later: b.filter.name(),
                    later_phase: b.filter.phase(),
                });
            }
        }

        let routing_index = filters
            .iter()
            .position(|r| r.filter.phase() != Phase::PreRoute)
            .unwrap_or(filters.len());

        Ok(Chain {
            filters,
            routing_index,
            routing: RoutingStep { matcher, resolver },
            backend,
            request_timeout: self.request_timeout,
        })
    }
}

/// Route matching and instance resolution, run between the pre-route and
/// post-route filters.
pub(crate) struct RoutingStep {
    matcher: Arc<dyn RouteMatcher>,
    resolver: Arc<dyn ServiceResolver>,
}

impl RoutingStep {
    pub(crate) fn run<'a>(&'a self, ctx: RequestContext, next: Next<'a>) -> BoxFuture<'a, Outcome> {
        Box::pin(async move {
            let mut ctx = ctx;

            let Some(target) = self.matcher.match_route(ctx.request()) else {
                let cause = GatewayError::no_route(ctx.request().uri().path());
                return Outcome::short_circuit(
                    "routing",
                    Response::json_error(StatusCode::NOT_FOUND, &cause.client_message()),
                );
            };

            if let Some(prefix) = target.strip_prefix.as_deref() {
                if let Some(stripped) = ctx.request().uri().path().strip_prefix(prefix) {
                    let path = if stripped.starts_with('/') {
                        stripped.to_string()
                    } else {
                        format!("/{stripped}")
                    };
                    if let Some(uri) = replace_path(ctx.request().uri(), &path) {
                        ctx = ctx.map_request(|mut request| {
                            *request.uri_mut() = uri;
                            request
                        });
                    }
                }
            }

            let service_id = target.service_id.clone();
            debug!(route = %target.route_id, service = %service_id, "route matched");
            if let Err(cause) = ctx.set_route_target(target) {
                return Outcome::error(cause);
            }

            let resolved = ctx.guard(self.resolver.resolve_instance(&service_id)).await;
            match resolved {
                Ok(Some(instance)) => {
                    debug!(service = %service_id, instance = %instance.authority(), "instance resolved");
                    ctx.set_instance(instance);
                }
                Ok(None) => debug!(service = %service_id, "no instance resolved"),
                Err(cause) => return Outcome::error(cause),
            }

            next.run(ctx).await
        })
    }
}
