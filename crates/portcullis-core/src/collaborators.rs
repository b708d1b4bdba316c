//! Interfaces to the services the filter chain depends on.
//!
//! The chain never talks to a token validator, service registry, route table
//! or HTTP client directly. It holds trait objects for each of them, so the
//! gateway binary can plug in real implementations and tests can plug in
//! mocks.

use crate::context::RequestContext;
use crate::error::{AuthError, DecodeError, EncodeError, GatewayError};
use crate::identity::Identity;
use crate::types::{Request, Response};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;

/// A boxed future that is `Send`.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// An insertion-ordered string-keyed payload.
pub type KeyedPayload = serde_json::Map<String, serde_json::Value>;

/// Validates bearer tokens.
pub trait Authenticator: Send + Sync + 'static {
    /// Validates `token` and returns the identity it carries.
    fn validate<'a>(&'a self, token: &'a str) -> BoxFuture<'a, Result<Identity, AuthError>>;
}

/// Selects a concrete instance for a logical service.
pub trait ServiceResolver: Send + Sync + 'static {
    /// Returns an instance of `service_id`, or `None` when nothing is available.
    fn resolve_instance<'a>(&'a self, service_id: &'a str) -> BoxFuture<'a, Option<Instance>>;
}

/// Converts request bodies to and from a keyed payload.
pub trait BodyCodec: Send + Sync + 'static {
    /// Decodes `bytes` into a payload.
    ///
    /// # Errors
    ///
    /// Returns [`DecodeError`] when the bytes are not a keyed object.
    fn decode(&self, bytes: &[u8]) -> Result<KeyedPayload, DecodeError>;

    /// Encodes `payload` into bytes.
    ///
    /// # Errors
    ///
    /// Returns [`EncodeError`] when the payload cannot be serialized.
    fn encode(&self, payload: &KeyedPayload) -> Result<Bytes, EncodeError>;
}

/// Maps an inbound request to a logical service.
pub trait RouteMatcher: Send + Sync + 'static {
    /// Returns the route for `request`, or `None` when nothing matches.
    fn match_route(&self, request: &Request) -> Option<RouteTarget>;
}

/// Forwards the request to the selected backend.
pub trait Backend: Send + Sync + 'static {
    /// Sends the current request of `ctx` and returns the backend response.
    ///
    /// The backend may materialize the request body through the context.
    fn dispatch<'a>(
        &'a self,
        ctx: &'a mut RequestContext,
    ) -> BoxFuture<'a, Result<Response, GatewayError>>;
}

/// A concrete backend instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Instance {
    /// The logical service this instance belongs to.
    pub service_id: String,
    /// `http` or `https`.
    pub scheme: String,
    /// Host name or address.
    pub host: String,
    /// Port.
    pub port: u16,
    /// Free-form metadata published with the instance.
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

impl Instance {
    /// Metadata key holding the path prefix the instance serves under.
    pub const BASE_PATH: &'static str = "basePath";

    /// Creates an `http` instance with no metadata.
    pub fn new(service_id: impl Into<String>, host: impl Into<String>, port: u16) -> Self {
        Self {
            service_id: service_id.into(),
            scheme: "http".to_string(),
            host: host.into(),
            port,
            metadata: HashMap::new(),
        }
    }

    /// Adds a metadata entry.
    #[must_use]
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Returns the `basePath` metadata, if non-empty.
    #[must_use]
    pub fn base_path(&self) -> Option<&str> {
        self.metadata
            .get(Self::BASE_PATH)
            .map(String::as_str)
            .filter(|p| !p.is_empty())
    }

    /// Returns `host:port`.
    #[must_use]
    pub fn authority(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Returns `scheme://host:port`.
    #[must_use]
    pub fn base_url(&self) -> String {
        format!("{}://{}", self.scheme, self.authority())
    }
}

/// The result of route matching.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteTarget {
    /// Identifier of the matched route.
    pub route_id: String,
    /// Logical service id requests on this route go to.
    pub service_id: String,
    /// Path prefix to remove before forwarding.
    pub strip_prefix: Option<String>,
}

impl RouteTarget {
    /// Creates a route target with no prefix stripping.
    pub fn new(route_id: impl Into<String>, service_id: impl Into<String>) -> Self {
        Self {
            route_id: route_id.into(),
            service_id: service_id.into(),
            strip_prefix: None,
        }
    }

    /// Sets the prefix to strip.
    #[must_use]
    pub fn with_strip_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.strip_prefix = Some(prefix.into());
        self
    }
}
