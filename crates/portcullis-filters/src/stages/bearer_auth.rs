//! Bearer token authentication filter.
//!
//! Requests under a protected path prefix must carry
//! `Authorization: Bearer <token>`. The token is checked by the configured
//! [`Authenticator`]; on success the identity is stored in the context and
//! forwarded as `x-user-id`. Any `x-user-id` sent by the caller is removed
//! first, protected path or not.

use crate::filter::{Filter, Next, Outcome, Phase};
use crate::uri::matches_prefix;
use http::header::{HeaderValue, AUTHORIZATION, WWW_AUTHENTICATE};
use http::StatusCode;
use portcullis_core::{
    AuthError, Authenticator, BoxFuture, GatewayError, Request, RequestContext, Response,
    ResponseExt,
};
use std::sync::Arc;
use tracing::{debug, warn};

/// Header carrying the authenticated subject to backends.
pub const USER_ID_HEADER: &str = "x-user-id";

/// Authenticates requests to protected paths with a bearer token.
#[derive(Clone)]
pub struct BearerAuthFilter {
    authenticator: Arc<dyn Authenticator>,
    protected_paths: Vec<String>,
}

impl BearerAuthFilter {
    /// Creates a filter that protects every path starting with one of
    /// `protected_paths`.
    pub fn new<I, S>(authenticator: Arc<dyn Authenticator>, protected_paths: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            authenticator,
            protected_paths: protected_paths.into_iter().map(Into::into).collect(),
        }
    }

    /// Returns `true` if `path` requires a bearer token.
    #[must_use]
    pub fn is_protected(&self, path: &str) -> bool {
        self.protected_paths
            .iter()
            .any(|prefix| matches_prefix(path, prefix))
    }

    fn unauthorized(&self, error: AuthError) -> Outcome {
        let cause = GatewayError::from(error);
        let mut response = Response::json_error(StatusCode::UNAUTHORIZED, &cause.client_message());
        response
            .headers_mut()
            .insert(WWW_AUTHENTICATE, HeaderValue::from_static("Bearer"));
        Outcome::short_circuit(self.name(), response)
    }
}

impl std::fmt::Debug for BearerAuthFilter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BearerAuthFilter")
            .field("protected_paths", &self.protected_paths)
            .finish_non_exhaustive()
    }
}

/// Extracts the token from `Authorization: Bearer <token>`.
fn bearer_token(request: &Request) -> Result<&str, AuthError> {
    let value = request
        .headers()
        .get(AUTHORIZATION)
        .ok_or(AuthError::MissingCredentials)?
        .to_str()
        .map_err(|_| AuthError::MalformedCredentials)?;

    let (scheme, token) = value
        .split_once(' ')
        .ok_or(AuthError::MalformedCredentials)?;
    let token = token.trim();
    if !scheme.eq_ignore_ascii_case("bearer") || token.is_empty() {
        return Err(AuthError::MalformedCredentials);
    }
    Ok(token)
}

impl Filter for BearerAuthFilter {
    fn name(&self) -> &'static str {
        "bearer_auth"
    }

    fn phase(&self) -> Phase {
        Phase::PreRoute
    }

    fn process<'a>(&'a self, ctx: RequestContext, next: Next<'a>) -> BoxFuture<'a, Outcome> {
        Box::pin(async move {
            let mut ctx = ctx.map_request(|mut request| {
                request.headers_mut().remove(USER_ID_HEADER);
                request
            });

            if !self.is_protected(ctx.request().uri().path()) {
                return next.run(ctx).await;
            }

            let token = match bearer_token(ctx.request()) {
                Ok(token) => token.to_string(),
                Err(error) => {
                    debug!(path = %ctx.request().uri().path(), %error, "bearer token missing");
                    return self.unauthorized(error);
                }
            };

            let identity = match ctx.guard(self.authenticator.validate(&token)).await {
                Ok(Ok(identity)) => identity,
                Ok(Err(error)) => {
                    if matches!(error, AuthError::Unavailable { .. }) {
                        warn!(%error, "token validation unavailable");
                    } else {
                        debug!(%error, "token rejected");
                    }
                    return self.unauthorized(error);
                }
                Err(cancelled) => return Outcome::error(cancelled),
            };

            debug!(user = %identity.log_id(), "authenticated");
            if let Ok(value) = HeaderValue::from_str(&identity.subject) {
                ctx = ctx.map_request(|mut request| {
                    request.headers_mut().insert(USER_ID_HEADER, value);
                    request
                });
            }
            ctx.set_identity(identity);

            next.run(ctx).await
        })
    }
}
