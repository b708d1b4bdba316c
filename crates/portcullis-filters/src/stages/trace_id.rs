//! Response trace-id tag.
//!
//! Runs innermost so that every way out of the chain carries the trace id:
//! backend responses, short-circuits from dispatch and failures alike.

use crate::filter::{Filter, Next, Outcome, Phase};
use http::header::HeaderValue;
use portcullis_core::{BoxFuture, RequestContext};

/// Response header carrying the request's trace id.
pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Adds `x-request-id: <trace id>` to whatever the chain produces.
#[derive(Debug, Clone, Copy, Default)]
pub struct TraceIdFilter;

impl TraceIdFilter {
    /// Creates a new trace-id filter.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl Filter for TraceIdFilter {
    fn name(&self) -> &'static str {
        "trace_id"
    }

    fn phase(&self) -> Phase {
        Phase::Response
    }

    fn process<'a>(&'a self, ctx: RequestContext, next: Next<'a>) -> BoxFuture<'a, Outcome> {
        Box::pin(async move {
            let trace_id = Some(ctx.trace_id())
                .filter(|id| !id.is_empty())
                .and_then(|id| HeaderValue::from_str(id).ok());
            let Some(value) = trace_id else {
                return next.run(ctx).await;
            };

            match next.run(ctx).await {
                Outcome::Continue(ctx) => Outcome::Continue(ctx.map_response(|mut response| {
                    response.headers_mut().insert(REQUEST_ID_HEADER, value);
                    response
                })),
                Outcome::ShortCircuit(mut response) => {
                    response.headers_mut().insert(REQUEST_ID_HEADER, value);
                    Outcome::ShortCircuit(response)
                }
                Outcome::Error(mut failure) => {
                    failure.headers_mut().insert(REQUEST_ID_HEADER, value);
                    Outcome::Error(failure)
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::StatusCode;
    use portcullis_core::{Body, GatewayError, Response, ResponseExt};

    const TRACEPARENT: &str = "00-4bf92f3577b34da6a3ce929d0e0e4736-00f067aa0ba902b7-01";

    fn ctx() -> RequestContext {
        let request = http::Request::builder()
            .uri("/orders")
            .header("traceparent", TRACEPARENT)
            .body(Body::empty())
            .unwrap();
        RequestContext::new(request)
    }

    #[tokio::test]
    async fn test_tags_success() {
        let filter = TraceIdFilter::new();
        let next = Next::handler(|ctx| {
            Box::pin(async move { Outcome::Continue(ctx.with_response(Response::empty(StatusCode::OK))) })
        });

        let Outcome::Continue(ctx) = filter.process(ctx(), next).await else {
            panic!("expected continue");
        };
        assert_eq!(
            ctx.response().unwrap().headers()[REQUEST_ID_HEADER],
            "4bf92f3577b34da6a3ce929d0e0e4736"
        );
    }

    #[tokio::test]
    async fn test_tags_short_circuit() {
        let filter = TraceIdFilter::new();
        let next = Next::handler(|_| {
            Box::pin(async { Outcome::ShortCircuit(Response::empty(StatusCode::NO_CONTENT)) })
        });

        let Outcome::ShortCircuit(response) = filter.process(ctx(), next).await else {
            panic!("expected short-circuit");
        };
        assert_eq!(response.headers()[REQUEST_ID_HEADER], "4bf92f3577b34da6a3ce929d0e0e4736");
    }

    #[tokio::test]
    async fn test_tags_failure() {
        let filter = TraceIdFilter::new();
        let next = Next::handler(|_| Box::pin(async { Outcome::error(GatewayError::upstream("reset")) }));

        let Outcome::Error(failure) = filter.process(ctx(), next).await else {
            panic!("expected error");
        };
        let response = failure.into_response();
        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
        assert_eq!(response.headers()[REQUEST_ID_HEADER], "4bf92f3577b34da6a3ce929d0e0e4736");
    }
}
