//! Error types for the gateway.
//!
//! [`GatewayError`] is the error that unwinds through the filter chain. Each
//! variant belongs to an [`ErrorCategory`], which decides the HTTP status the
//! client sees.
//!
//! Not every failure becomes a `GatewayError`. Transform failures are soft and
//! handled where they occur: a [`DecodeError`] falls back to an empty payload,
//! an [`EncodeError`] forwards the original body, and an instance resolution
//! miss passes through. Authentication and authorization failures are hard and
//! terminate the request.
//!
//! | `ErrorCategory` | Status |
//! |---|---|
//! | `Authentication` | 401 |
//! | `Authorization` | 403 |
//! | `NotFound` | 404 |
//! | `Unavailable` | 503 |
//! | `External` | 502 |
//! | `Timeout` | 504 |
//! | `Cancelled` | 499 |
//! | `Validation` | 400 |
//! | `PayloadTooLarge` | 413 |
//! | `Internal` | 500 |

use crate::body::BodyError;
use http::StatusCode;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type alias using [`GatewayError`].
pub type GatewayResult<T> = Result<T, GatewayError>;

/// Categories of errors for classification and status mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// Missing, malformed or rejected credentials.
    Authentication,
    /// Authenticated caller lacks a required authority.
    Authorization,
    /// No route matches the request.
    NotFound,
    /// No backend instance available.
    Unavailable,
    /// Backend failure.
    External,
    /// Request deadline elapsed.
    Timeout,
    /// Client went away before the response was produced.
    Cancelled,
    /// Malformed request (unreadable body).
    Validation,
    /// Request body exceeds the configured limit.
    PayloadTooLarge,
    /// Anything else.
    Internal,
}

impl ErrorCategory {
    /// Returns the HTTP status code for this category.
    ///
    /// `Cancelled` maps to the non-standard 499 (client closed request). The
    /// client never sees it, but it shows up in logs and metrics.
    #[must_use]
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Authentication => StatusCode::UNAUTHORIZED,
            Self::Authorization => StatusCode::FORBIDDEN,
            Self::NotFound => StatusCode::NOT_FOUND,
            Self::Unavailable => StatusCode::SERVICE_UNAVAILABLE,
            Self::External => StatusCode::BAD_GATEWAY,
            Self::Timeout => StatusCode::GATEWAY_TIMEOUT,
            Self::Cancelled => StatusCode::from_u16(499).unwrap_or(StatusCode::BAD_REQUEST),
            Self::Validation => StatusCode::BAD_REQUEST,
            Self::PayloadTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
            Self::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Returns the metric label for this category.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Authentication => "authentication",
            Self::Authorization => "authorization",
            Self::NotFound => "not_found",
            Self::Unavailable => "unavailable",
            Self::External => "external",
            Self::Timeout => "timeout",
            Self::Cancelled => "cancelled",
            Self::Validation => "validation",
            Self::PayloadTooLarge => "payload_too_large",
            Self::Internal => "internal",
        }
    }
}

/// Failure reported by an [`Authenticator`](crate::Authenticator) or by
/// bearer-token parsing.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AuthError {
    /// No `Authorization` header.
    #[error("missing bearer token")]
    MissingCredentials,

    /// `Authorization` header present but not `Bearer <token>`.
    #[error("malformed authorization header")]
    MalformedCredentials,

    /// The token was checked and refused.
    #[error("invalid token: {reason}")]
    Rejected {
        /// Why the token was refused.
        reason: String,
    },

    /// The token could not be checked.
    #[error("token validation unavailable: {message}")]
    Unavailable {
        /// What went wrong reaching the validator.
        message: String,
    },
}

impl AuthError {
    /// Creates a rejection with the given reason.
    pub fn rejected(reason: impl Into<String>) -> Self {
        Self::Rejected {
            reason: reason.into(),
        }
    }

    /// Creates an unavailable error.
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::Unavailable {
            message: message.into(),
        }
    }
}

/// A body could not be decoded into a keyed payload.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("decode failed: {message}")]
pub struct DecodeError {
    /// Codec message.
    pub message: String,
}

impl DecodeError {
    /// Creates a decode error.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// A keyed payload could not be encoded.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("encode failed: {message}")]
pub struct EncodeError {
    /// Codec message.
    pub message: String,
}

impl EncodeError {
    /// Creates an encode error.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Error that unwinds through the filter chain.
///
/// # Example
///
/// ```
/// use portcullis_core::{ErrorCategory, GatewayError};
///
/// let err = GatewayError::upstream("connection refused");
/// assert_eq!(err.category(), ErrorCategory::External);
/// assert_eq!(err.status_code().as_u16(), 502);
/// ```
#[derive(Error, Debug)]
pub enum GatewayError {
    /// Credentials missing, malformed or rejected.
    #[error(transparent)]
    Authentication(#[from] AuthError),

    /// Caller lacks a required authority.
    #[error("forbidden: {message}")]
    Forbidden {
        /// Human-readable message.
        message: String,
    },

    /// No route matches the request path.
    #[error("no route for {path}")]
    NoRoute {
        /// The unmatched path.
        path: String,
    },

    /// Nothing resolved for the routed service.
    #[error("no instance available for service {service_id}")]
    NoInstance {
        /// The logical service id.
        service_id: String,
    },

    /// The backend failed.
    #[error("upstream error: {message}")]
    Upstream {
        /// Human-readable message.
        message: String,
    },

    /// The request deadline elapsed.
    #[error("request timed out")]
    Timeout,

    /// The request was cancelled before it completed.
    #[error("request cancelled")]
    Cancelled,

    /// The request body could not be read.
    #[error(transparent)]
    Body(#[from] BodyError),

    /// Internal failure.
    #[error("internal error: {message}")]
    Internal {
        /// Human-readable message.
        message: String,
        /// Underlying cause, if any.
        #[source]
        source: Option<anyhow::Error>,
    },
}

impl GatewayError {
    /// Creates a forbidden error.
    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::Forbidden {
            message: message.into(),
        }
    }

    /// Creates a no-route error.
    pub fn no_route(path: impl Into<String>) -> Self {
        Self::NoRoute { path: path.into() }
    }

    /// Creates a no-instance error.
    pub fn no_instance(service_id: impl Into<String>) -> Self {
        Self::NoInstance {
            service_id: service_id.into(),
        }
    }

    /// Creates an upstream error.
    pub fn upstream(message: impl Into<String>) -> Self {
        Self::Upstream {
            message: message.into(),
        }
    }

    /// Creates an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
            source: None,
        }
    }

    /// Creates an internal error wrapping a cause.
    pub fn internal_with_source(message: impl Into<String>, source: anyhow::Error) -> Self {
        Self::Internal {
            message: message.into(),
            source: Some(source),
        }
    }

    /// Returns the category of this error.
    #[must_use]
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Authentication(_) => ErrorCategory::Authentication,
            Self::Forbidden { .. } => ErrorCategory::Authorization,
            Self::NoRoute { .. } => ErrorCategory::NotFound,
            Self::NoInstance { .. } => ErrorCategory::Unavailable,
            Self::Upstream { .. } => ErrorCategory::External,
            Self::Timeout => ErrorCategory::Timeout,
            Self::Cancelled => ErrorCategory::Cancelled,
            Self::Body(BodyError::TooLarge { .. }) => ErrorCategory::PayloadTooLarge,
            Self::Body(_) => ErrorCategory::Validation,
            Self::Internal { .. } => ErrorCategory::Internal,
        }
    }

    /// Returns the HTTP status code for this error.
    #[must_use]
    pub fn status_code(&self) -> StatusCode {
        self.category().status_code()
    }

    /// Returns the message shown to the client.
    ///
    /// Internal and upstream details stay in the logs.
    #[must_use]
    pub fn client_message(&self) -> String {
        match self {
            Self::Internal { .. } => "internal error".to_string(),
            Self::Upstream { .. } => "bad gateway".to_string(),
            other => other.to_string(),
        }
    }
}
