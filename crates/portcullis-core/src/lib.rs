//! # Portcullis Core
//!
//! Core types shared by every Portcullis crate.
//!
//! - [`RequestContext`] - the per-request value threaded through the filter chain
//! - [`Body`] - one-shot request body with buffering ([`body::replace`])
//! - [`GatewayError`] - error taxonomy and HTTP status mapping
//! - [`Identity`] - authenticated principal
//! - [`collaborators`] - traits for the services the chain calls into
//!   (authentication, instance resolution, routing, body codec, dispatch)
//! - [`TraceContext`] - W3C trace context carried by each request

#![doc(html_root_url = "https://docs.rs/portcullis-core/0.1.0")]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

pub mod body;
pub mod codec;
pub mod collaborators;
mod context;
mod error;
mod identity;
mod trace;
mod types;

pub use body::{Body, BodyError, BoxError};
pub use codec::JsonCodec;
pub use collaborators::{
    Authenticator, Backend, BodyCodec, BoxFuture, Instance, KeyedPayload, RouteMatcher,
    RouteTarget, ServiceResolver,
};
pub use context::{attributes, guard, Attributes, RequestContext, RequestHead, RequestId};
pub use error::{AuthError, DecodeError, EncodeError, ErrorCategory, GatewayError, GatewayResult};
pub use identity::Identity;
pub use trace::{TraceContext, TraceFlags, TRACEPARENT_HEADER};
pub use types::{Request, Response, ResponseExt};
