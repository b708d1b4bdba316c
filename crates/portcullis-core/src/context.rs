//! Request context types.
//!
//! The [`RequestContext`] carries all per-request state through the filter
//! chain: the current request, the response once one exists, the attribute
//! bag, the route target and the cancellation token.
//!
//! Transitions are by value. A filter that changes the request calls
//! [`RequestContext::with_request`] (or [`map_request`](RequestContext::map_request))
//! and passes the returned context on; the old one is gone.

use crate::body::{self, Body, BodyError};
use crate::collaborators::{Instance, RouteTarget};
use crate::error::GatewayError;
use crate::identity::Identity;
use crate::trace::TraceContext;
use crate::types::{Request, Response};
use bytes::Bytes;
use http::{HeaderMap, Method, Uri};
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Well-known attribute keys.
pub mod attributes {
    /// The authenticated [`Identity`](crate::Identity).
    pub const IDENTITY: &str = "portcullis.identity";
    /// The selected [`Instance`](crate::Instance).
    pub const INSTANCE: &str = "portcullis.instance";
}

/// A unique identifier for each request, using UUID v7.
///
/// UUID v7 is time-ordered, which makes it ideal for request tracking
/// and log correlation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestId(Uuid);

impl RequestId {
    /// Creates a new unique request ID.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    /// Returns the underlying UUID.
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for RequestId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

/// Read-only snapshot of the request as it arrived at ingress.
#[derive(Debug, Clone)]
pub struct RequestHead {
    /// Inbound method.
    pub method: Method,
    /// Inbound URI.
    pub uri: Uri,
    /// Inbound headers.
    pub headers: HeaderMap,
    /// Peer address, when known.
    pub client_addr: Option<SocketAddr>,
}

/// String-keyed, type-erased, last-write-wins values.
#[derive(Default)]
pub struct Attributes {
    values: HashMap<String, Box<dyn Any + Send + Sync>>,
}

impl Attributes {
    /// Returns the value under `key` if it exists and has type `T`.
    #[must_use]
    pub fn get<T: Send + Sync + 'static>(&self, key: &str) -> Option<&T> {
        self.values.get(key).and_then(|v| v.downcast_ref::<T>())
    }

    /// Stores `value` under `key`, replacing any previous value.
    pub fn insert<T: Send + Sync + 'static>(&mut self, key: impl Into<String>, value: T) {
        self.values.insert(key.into(), Box::new(value));
    }

    /// Removes and returns the value under `key` if it has type `T`.
    pub fn remove<T: Send + Sync + 'static>(&mut self, key: &str) -> Option<T> {
        let value = self.values.remove(key)?;
        value.downcast::<T>().ok().map(|boxed| *boxed)
    }

    /// Returns `true` if anything is stored under `key`.
    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }
}

impl fmt::Debug for Attributes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.values.keys()).finish()
    }
}

/// Per-request state that flows through the filter chain.
///
/// # Example
///
/// ```
/// use portcullis_core::{Body, Identity, RequestContext};
///
/// let request = http::Request::builder()
///     .uri("/orders")
///     .body(Body::empty())
///     .unwrap();
///
/// let mut ctx = RequestContext::new(request);
/// ctx.set_identity(Identity::new("user-123"));
///
/// let ctx = ctx.map_request(|mut req| {
///     req.headers_mut().insert("userid", "user-123".parse().unwrap());
///     req
/// });
/// assert_eq!(ctx.identity().unwrap().subject, "user-123");
/// assert!(ctx.original().headers.get("userid").is_none());
/// ```
#[derive(Debug)]
pub struct RequestContext {
    request_id: RequestId,
    original: Arc<RequestHead>,
    request: Request,
    response: Option<Response>,
    attributes: Attributes,
    route_target: Option<RouteTarget>,
    trace: TraceContext,
    started_at: Instant,
    cancellation: CancellationToken,
}

impl RequestContext {
    /// Creates a context for a freshly received request.
    ///
    /// The trace context is taken from `traceparent` or generated.
    #[must_use]
    pub fn new(request: Request) -> Self {
        let original = RequestHead {
            method: request.method().clone(),
            uri: request.uri().clone(),
            headers: request.headers().clone(),
            client_addr: None,
        };
        let trace = TraceContext::from_headers(request.headers());

        Self {
            request_id: RequestId::new(),
            original: Arc::new(original),
            request,
            response: None,
            attributes: Attributes::default(),
            route_target: None,
            trace,
            started_at: Instant::now(),
            cancellation: CancellationToken::new(),
        }
    }

    /// Records the peer address in the original-request snapshot.
    #[must_use]
    pub fn with_client_addr(mut self, addr: SocketAddr) -> Self {
        Arc::make_mut(&mut self.original).client_addr = Some(addr);
        self
    }

    /// Replaces the request ID.
    #[must_use]
    pub fn with_request_id(mut self, request_id: RequestId) -> Self {
        self.request_id = request_id;
        self
    }

    /// Replaces the trace context.
    #[must_use]
    pub fn with_trace(mut self, trace: TraceContext) -> Self {
        self.trace = trace;
        self
    }

    /// Uses `token` as this request's cancellation token.
    #[must_use]
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = token;
        self
    }

    /// Returns the request ID.
    #[must_use]
    pub const fn request_id(&self) -> RequestId {
        self.request_id
    }

    /// Returns the request as received at ingress.
    #[must_use]
    pub fn original(&self) -> &RequestHead {
        &self.original
    }

    /// Returns the current request.
    #[must_use]
    pub const fn request(&self) -> &Request {
        &self.request
    }

    /// Returns a context carrying `request` in place of the current one.
    #[must_use]
    pub fn with_request(mut self, request: Request) -> Self {
        self.request = request;
        self
    }

    /// Returns a context whose request is `f(current request)`.
    #[must_use]
    pub fn map_request(mut self, f: impl FnOnce(Request) -> Request) -> Self {
        let placeholder = http::Request::new(Body::empty());
        let request = std::mem::replace(&mut self.request, placeholder);
        self.request = f(request);
        self
    }

    /// Returns a context whose request body is `bytes`.
    ///
    /// `Content-Length` is recomputed.
    #[must_use]
    pub fn with_body(self, bytes: impl Into<Bytes>) -> Self {
        let bytes = bytes.into();
        self.map_request(|request| body::replace(request, bytes))
    }

    /// Reads the request body once and caches it.
    ///
    /// # Errors
    ///
    /// See [`Body::materialize`].
    pub async fn materialize_body(&mut self) -> Result<Bytes, BodyError> {
        self.request.body_mut().materialize().await
    }

    /// Like [`materialize_body`](Self::materialize_body) with a size limit.
    ///
    /// # Errors
    ///
    /// See [`Body::materialize_limited`].
    pub async fn materialize_body_limited(&mut self, limit: usize) -> Result<Bytes, BodyError> {
        self.request.body_mut().materialize_limited(limit).await
    }

    /// Returns the response, once the backend or a filter produced one.
    #[must_use]
    pub const fn response(&self) -> Option<&Response> {
        self.response.as_ref()
    }

    /// Returns a context carrying `response`.
    #[must_use]
    pub fn with_response(mut self, response: Response) -> Self {
        self.response = Some(response);
        self
    }

    /// Returns a context whose response is `f(current response)`.
    ///
    /// Does nothing when there is no response yet.
    #[must_use]
    pub fn map_response(mut self, f: impl FnOnce(Response) -> Response) -> Self {
        self.response = self.response.take().map(f);
        self
    }

    /// Consumes the context, returning the response if any.
    #[must_use]
    pub fn into_response(self) -> Option<Response> {
        self.response
    }

    /// Returns the attribute under `key` if it has type `T`.
    #[must_use]
    pub fn attribute<T: Send + Sync + 'static>(&self, key: &str) -> Option<&T> {
        self.attributes.get(key)
    }

    /// Stores an attribute; last write wins.
    pub fn set_attribute<T: Send + Sync + 'static>(&mut self, key: impl Into<String>, value: T) {
        self.attributes.insert(key, value);
    }

    /// Returns the attribute bag.
    #[must_use]
    pub const fn attributes(&self) -> &Attributes {
        &self.attributes
    }

    /// Returns the authenticated identity, if any.
    #[must_use]
    pub fn identity(&self) -> Option<&Identity> {
        self.attribute(attributes::IDENTITY)
    }

    /// Stores the authenticated identity.
    pub fn set_identity(&mut self, identity: Identity) {
        self.set_attribute(attributes::IDENTITY, identity);
    }

    /// Returns the selected backend instance, if any.
    #[must_use]
    pub fn instance(&self) -> Option<&Instance> {
        self.attribute(attributes::INSTANCE)
    }

    /// Stores the selected backend instance.
    pub fn set_instance(&mut self, instance: Instance) {
        self.set_attribute(attributes::INSTANCE, instance);
    }

    /// Returns the route target, once routing has run.
    #[must_use]
    pub const fn route_target(&self) -> Option<&RouteTarget> {
        self.route_target.as_ref()
    }

    /// Records the route target.
    ///
    /// # Errors
    ///
    /// The target is set once per request; a second call fails with
    /// [`GatewayError::Internal`].
    pub fn set_route_target(&mut self, target: RouteTarget) -> Result<(), GatewayError> {
        if let Some(existing) = &self.route_target {
            return Err(GatewayError::internal(format!(
                "route target already set to {}",
                existing.route_id
            )));
        }
        self.route_target = Some(target);
        Ok(())
    }

    /// Returns the trace context.
    #[must_use]
    pub const fn trace(&self) -> &TraceContext {
        &self.trace
    }

    /// Returns the trace ID.
    #[must_use]
    pub fn trace_id(&self) -> &str {
        &self.trace.trace_id
    }

    /// Returns when the request was received.
    #[must_use]
    pub const fn started_at(&self) -> Instant {
        self.started_at
    }

    /// Returns the time since the request was received.
    #[must_use]
    pub fn elapsed(&self) -> Duration {
        self.started_at.elapsed()
    }

    /// Returns the cancellation token.
    #[must_use]
    pub const fn cancellation(&self) -> &CancellationToken {
        &self.cancellation
    }

    /// Returns `true` once the request was cancelled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }

    /// Races `fut` against this request's cancellation.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::Cancelled`] if the token fires first.
    pub async fn guard<F: Future>(&self, fut: F) -> Result<F::Output, GatewayError> {
        guard(&self.cancellation, fut).await
    }
}

/// Races `fut` against `token`.
///
/// Use this when `fut` borrows the context mutably.
///
/// # Errors
///
/// Returns [`GatewayError::Cancelled`] if the token fires first.
pub async fn guard<F: Future>(
    token: &CancellationToken,
    fut: F,
) -> Result<F::Output, GatewayError> {
    tokio::select! {
        biased;
        () = token.cancelled() => Err(GatewayError::Cancelled),
        output = fut => Ok(output),
    }
}
