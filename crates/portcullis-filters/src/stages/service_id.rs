//! Response service-id tag.

use crate::filter::{Filter, Next, Outcome, Phase};
use http::header::HeaderValue;
use portcullis_core::{BoxFuture, RequestContext};

/// Response header naming the service that answered.
pub const SERVICE_ID_HEADER: &str = "x-service-id";

/// Adds `x-service-id` to successful backend responses.
///
/// Short-circuits and failures are left untagged.
#[derive(Debug, Clone, Copy, Default)]
pub struct ServiceIdFilter;

impl ServiceIdFilter {
    /// Creates a new service-id filter.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl Filter for ServiceIdFilter {
    fn name(&self) -> &'static str {
        "service_id"
    }

    fn phase(&self) -> Phase {
        Phase::Response
    }

    fn process<'a>(&'a self, ctx: RequestContext, next: Next<'a>) -> BoxFuture<'a, Outcome> {
        Box::pin(async move {
            let service_id = ctx
                .route_target()
                .and_then(|target| HeaderValue::from_str(&target.service_id).ok());

            match (next.run(ctx).await, service_id) {
                (Outcome::Continue(ctx), Some(value)) => {
                    Outcome::Continue(ctx.map_response(|mut response| {
                        response.headers_mut().insert(SERVICE_ID_HEADER, value);
                        response
                    }))
                }
                (outcome, _) => outcome,
            }
        })
    }
}
