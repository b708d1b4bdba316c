//! User identity propagation filter.
//!
//! For `POST` requests from an authenticated caller, forwards the identity
//! to the backend as `userId` (subject) and `user` (display name) headers.
//! Services can additionally ask for the subject as a `user` query
//! parameter or as a `"user"` key in the JSON body.
//!
//! Enrichment never fails the request. A body that is not a JSON object is
//! treated as `{}`; if the enriched body cannot be encoded the original body
//! is forwarded; if the query cannot be rewritten only the headers are sent.

use crate::filter::{Filter, Next, Outcome, Phase};
use crate::uri::append_query;
use http::header::HeaderValue;
use http::Method;
use portcullis_config::IdentityInjection;
use portcullis_core::{guard, BodyCodec, BoxFuture, KeyedPayload, RequestContext};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

/// Header carrying the caller's subject.
pub const USER_ID_HEADER: &str = "userid";

/// Header (and query parameter, and body key) carrying the caller's name.
pub const USER_HEADER: &str = "user";

const USER_PARAM: &str = "user";

/// Forwards the authenticated caller's identity to the backend.
#[derive(Clone)]
pub struct UserIdentityFilter {
    codec: Arc<dyn BodyCodec>,
    services: HashMap<String, IdentityInjection>,
    max_body_bytes: Option<usize>,
}

impl UserIdentityFilter {
    /// Creates a filter that uses `codec` for body enrichment. Services not
    /// configured with [`with_service`](Self::with_service) get headers only.
    pub fn new(codec: Arc<dyn BodyCodec>) -> Self {
        Self {
            codec,
            services: HashMap::new(),
            max_body_bytes: None,
        }
    }

    /// Sets how identity reaches `service_id`.
    #[must_use]
    pub fn with_service(mut self, service_id: impl Into<String>, mode: IdentityInjection) -> Self {
        self.services.insert(service_id.into(), mode);
        self
    }

    /// Limits how much of a body is buffered for enrichment.
    #[must_use]
    pub fn with_max_body_bytes(mut self, limit: usize) -> Self {
        self.max_body_bytes = Some(limit);
        self
    }

    /// Returns the injection mode for `service_id`.
    #[must_use]
    pub fn mode_for(&self, service_id: &str) -> IdentityInjection {
        self.services.get(service_id).copied().unwrap_or_default()
    }

    async fn enrich_body(&self, mut ctx: RequestContext, subject: &str) -> Outcome {
        // A stalled upload must not outlive the request's cancellation.
        let token = ctx.cancellation().clone();
        let materialized = match self.max_body_bytes {
            Some(limit) => guard(&token, ctx.materialize_body_limited(limit)).await,
            None => guard(&token, ctx.materialize_body()).await,
        };
        let original = match materialized {
            Ok(Ok(bytes)) => bytes,
            Ok(Err(error)) => return Outcome::error(error),
            Err(cause) => return Outcome::error(cause),
        };

        let mut payload = self.codec.decode(&original).unwrap_or_else(|error| {
            debug!(%error, "request body is not a JSON object, enriching an empty one");
            KeyedPayload::new()
        });
        payload.insert(USER_PARAM.to_string(), Value::String(subject.to_string()));

        match self.codec.encode(&payload) {
            Ok(encoded) => Outcome::Continue(ctx.with_body(encoded)),
            Err(error) => {
                warn!(%error, "failed to encode enriched body, forwarding original");
                Outcome::Continue(ctx)
            }
        }
    }
}

impl std::fmt::Debug for UserIdentityFilter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UserIdentityFilter")
            .field("services", &self.services)
            .field("max_body_bytes", &self.max_body_bytes)
            .finish_non_exhaustive()
    }
}

impl Filter for UserIdentityFilter {
    fn name(&self) -> &'static str {
        "user_identity"
    }

    fn phase(&self) -> Phase {
        Phase::PostRoute
    }

    fn process<'a>(&'a self, ctx: RequestContext, next: Next<'a>) -> BoxFuture<'a, Outcome> {
        Box::pin(async move {
            if ctx.request().method() != Method::POST {
                return next.run(ctx).await;
            }
            let Some(identity) = ctx.identity().cloned() else {
                return next.run(ctx).await;
            };

            let mut ctx = ctx;
            let subject = HeaderValue::from_str(&identity.subject);
            let user = HeaderValue::from_str(identity.display_name());
            ctx = ctx.map_request(|mut request| {
                let headers = request.headers_mut();
                if let Ok(value) = subject {
                    headers.insert(USER_ID_HEADER, value);
                }
                if let Ok(value) = user {
                    headers.insert(USER_HEADER, value);
                }
                request
            });

            let mode = ctx
                .route_target()
                .map_or(IdentityInjection::Header, |target| self.mode_for(&target.service_id));

            match mode {
                IdentityInjection::Header => {}
                IdentityInjection::Query => {
                    match append_query(ctx.request().uri(), USER_PARAM, &identity.subject) {
                        Some(uri) => {
                            ctx = ctx.map_request(|mut request| {
                                *request.uri_mut() = uri;
                                request
                            });
                        }
                        None => debug!("could not add user to query, sending headers only"),
                    }
                }
                IdentityInjection::Body => match self.enrich_body(ctx, &identity.subject).await {
                    Outcome::Continue(enriched) => ctx = enriched,
                    other => return other,
                },
            }

            debug!(user = %identity.log_id(), ?mode, "identity propagated");
            next.run(ctx).await
        })
    }
}
