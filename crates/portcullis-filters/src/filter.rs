//! Core filter trait and types.
//!
//! This module defines the [`Filter`] trait that all filter stages implement.
//! A filter receives the request context by value and a [`Next`] continuation
//! for the rest of the chain. It can run code before and after calling `next`,
//! or return without calling it at all.
//!
//! # Example
//!
//! ```
//! use portcullis_core::BoxFuture;
//! use portcullis_core::RequestContext;
//! use portcullis_filters::{Filter, Next, Outcome, Phase};
//!
//! struct Timing;
//!
//! impl Filter for Timing {
//!     fn name(&self) -> &'static str {
//!         "timing"
//!     }
//!
//!     fn phase(&self) -> Phase {
//!         Phase::PreRoute
//!     }
//!
//!     fn process<'a>(&'a self, ctx: RequestContext, next: Next<'a>) -> BoxFuture<'a, Outcome> {
//!         Box::pin(async move {
//!             let started = std::time::Instant::now();
//!             let outcome = next.run(ctx).await;
//!             tracing::debug!(elapsed = ?started.elapsed(), "chain finished");
//!             outcome
//!         })
//!     }
//! }
//! ```

use crate::chain::RoutingStep;
use http::header::{HeaderName, HeaderValue};
use http::HeaderMap;
use portcullis_core::{
    guard, Backend, BoxFuture, GatewayError, RequestContext, Response, ResponseExt,
};

/// Which part of the request lifecycle a filter belongs to.
///
/// Phases tell a filter which context fields are guaranteed populated.
/// Post-route filters see the route target; response-phase filters sit
/// directly around backend dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Phase {
    /// Before routing. No route target or instance yet.
    PreRoute,
    /// After routing and instance resolution.
    PostRoute,
    /// Around backend dispatch; observes the backend response.
    Response,
}

/// What a filter (or the rest of the chain) produced.
#[derive(Debug)]
pub enum Outcome {
    /// The chain continued. Carries a response once the backend answered.
    Continue(RequestContext),
    /// A filter answered without calling the rest of the chain.
    ShortCircuit(Response),
    /// Processing failed; unwinds through every pending filter.
    Error(Failure),
}

impl Outcome {
    /// Builds a short-circuit outcome and records which filter produced it.
    pub fn short_circuit(filter: &'static str, response: Response) -> Self {
        tracing::debug!(filter, status = response.status().as_u16(), "short-circuit");
        metrics::counter!("portcullis_filter_short_circuits_total", "filter" => filter)
            .increment(1);
        Self::ShortCircuit(response)
    }

    /// Builds an error outcome.
    pub fn error(cause: impl Into<GatewayError>) -> Self {
        Self::Error(Failure::new(cause.into()))
    }

    /// Metric label for this outcome.
    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            Self::Continue(_) => "continue",
            Self::ShortCircuit(_) => "short_circuit",
            Self::Error(_) => "error",
        }
    }
}

/// A failed outcome: the cause plus any response headers filters attached
/// while it unwound.
#[derive(Debug)]
pub struct Failure {
    cause: GatewayError,
    headers: HeaderMap,
}

impl Failure {
    /// Creates a failure with no extra headers.
    #[must_use]
    pub fn new(cause: GatewayError) -> Self {
        Self {
            cause,
            headers: HeaderMap::new(),
        }
    }

    /// Returns the cause.
    #[must_use]
    pub const fn cause(&self) -> &GatewayError {
        &self.cause
    }

    /// Returns the headers attached so far.
    #[must_use]
    pub const fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// Returns the attached headers for in-place edits.
    pub fn headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.headers
    }

    /// Attaches a response header.
    #[must_use]
    pub fn with_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// Replaces the cause, keeping attached headers.
    #[must_use]
    pub fn with_cause(mut self, cause: GatewayError) -> Self {
        self.cause = cause;
        self
    }

    /// Consumes the failure, returning its cause.
    #[must_use]
    pub fn into_cause(self) -> GatewayError {
        self.cause
    }

    /// Renders `{"error": "<message>"}` with the cause's status and the
    /// attached headers.
    #[must_use]
    pub fn into_response(self) -> Response {
        let mut response =
            Response::json_error(self.cause.status_code(), &self.cause.client_message());
        response.headers_mut().extend(self.headers);
        response
    }
}

impl From<GatewayError> for Failure {
    fn from(cause: GatewayError) -> Self {
        Self::new(cause)
    }
}

/// A stage of the filter chain.
///
/// # Invariants
///
/// - A filter calls `next.run()` at most once; `Next` is consumed by it
/// - Filters hold only configuration and collaborators; no shared mutable
///   state is touched during `process`
pub trait Filter: Send + Sync + 'static {
    /// Returns the name of this filter, used in logs and metrics.
    fn name(&self) -> &'static str;

    /// Returns the phase this filter belongs to.
    fn phase(&self) -> Phase;

    /// Processes the request.
    ///
    /// Call `next.run(ctx)` to continue, or return a short-circuit or error
    /// outcome without calling it.
    fn process<'a>(&'a self, ctx: RequestContext, next: Next<'a>) -> BoxFuture<'a, Outcome>;
}

/// One-shot continuation for the remainder of the chain.
pub struct Next<'a> {
    inner: NextInner<'a>,
}

type Handler<'a> = Box<dyn FnOnce(RequestContext) -> BoxFuture<'a, Outcome> + Send + 'a>;

enum NextInner<'a> {
    /// Another filter.
    Filter {
        filter: &'a dyn Filter,
        next: Box<Next<'a>>,
    },
    /// Route matching and instance resolution.
    Route {
        step: &'a RoutingStep,
        next: Box<Next<'a>>,
    },
    /// Backend dispatch.
    Dispatch(&'a dyn Backend),
    /// Arbitrary terminal handler.
    Handler(Handler<'a>),
}

impl<'a> Next<'a> {
    pub(crate) fn filter(filter: &'a dyn Filter, next: Self) -> Self {
        Self {
            inner: NextInner::Filter {
                filter,
                next: Box::new(next),
            },
        }
    }

    pub(crate) fn route(step: &'a RoutingStep, next: Self) -> Self {
        Self {
            inner: NextInner::Route {
                step,
                next: Box::new(next),
            },
        }
    }

    pub(crate) fn dispatch(backend: &'a dyn Backend) -> Self {
        Self {
            inner: NextInner::Dispatch(backend),
        }
    }

    /// Creates a terminal `Next` that invokes `f`.
    ///
    /// Useful for exercising a single filter without building a chain.
    pub fn handler<F>(f: F) -> Self
    where
        F: FnOnce(RequestContext) -> BoxFuture<'a, Outcome> + Send + 'a,
    {
        Self {
            inner: NextInner::Handler(Box::new(f)),
        }
    }

    /// Invokes the rest of the chain.
    ///
    /// Once the request is cancelled no further stage is entered and the
    /// result is [`GatewayError::Cancelled`].
    pub async fn run(self, ctx: RequestContext) -> Outcome {
        if ctx.is_cancelled() {
            return Outcome::error(GatewayError::Cancelled);
        }

        match self.inner {
            NextInner::Filter { filter, next } => filter.process(ctx, *next).await,
            NextInner::Route { step, next } => step.run(ctx, *next).await,
            NextInner::Dispatch(backend) => dispatch(backend, ctx).await,
            NextInner::Handler(handler) => handler(ctx).await,
        }
    }
}

async fn dispatch(backend: &dyn Backend, mut ctx: RequestContext) -> Outcome {
    let token = ctx.cancellation().clone();
    match guard(&token, backend.dispatch(&mut ctx)).await {
        Ok(Ok(response)) => Outcome::Continue(ctx.with_response(response)),
        Ok(Err(cause)) | Err(cause) => {
            tracing::debug!(error = %cause, "dispatch failed");
            Outcome::error(cause)
        }
    }
}
