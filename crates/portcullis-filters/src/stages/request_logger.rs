//! Request logging filter.
//!
//! Logs every inbound request and how it finished. The `Authorization`
//! header is reported only as present or absent; its value never reaches
//! the log.

use crate::filter::{Filter, Next, Outcome, Phase};
use http::header::AUTHORIZATION;
use portcullis_core::{BoxFuture, RequestContext};
use tracing::{info, warn};

/// Logs method, path, client address and whether credentials were sent.
#[derive(Debug, Clone, Copy, Default)]
pub struct RequestLoggerFilter;

impl RequestLoggerFilter {
    /// Creates a new request logger.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl Filter for RequestLoggerFilter {
    fn name(&self) -> &'static str {
        "request_logger"
    }

    fn phase(&self) -> Phase {
        Phase::PreRoute
    }

    fn process<'a>(&'a self, ctx: RequestContext, next: Next<'a>) -> BoxFuture<'a, Outcome> {
        Box::pin(async move {
            let request_id = ctx.request_id();
            let trace_id = ctx.trace_id().to_string();
            let method = ctx.request().method().clone();
            let path = ctx.request().uri().path().to_string();
            let client = ctx
                .original()
                .client_addr
                .map_or_else(|| "-".to_string(), |addr| addr.to_string());

            info!(
                %request_id,
                %trace_id,
                %method,
                %path,
                %client,
                has_authorization = ctx.request().headers().contains_key(AUTHORIZATION),
                "request received"
            );

            let started = ctx.started_at();
            let outcome = next.run(ctx).await;
            let duration_ms = started.elapsed().as_millis();

            match &outcome {
                Outcome::Continue(ctx) => {
                    let status = ctx.response().map_or(0, |r| r.status().as_u16());
                    info!(%request_id, status, duration_ms, "request completed");
                }
                Outcome::ShortCircuit(response) => {
                    info!(
                        %request_id,
                        status = response.status().as_u16(),
                        duration_ms,
                        "request answered by filter"
                    );
                }
                Outcome::Error(failure) => {
                    warn!(
                        %request_id,
                        status = failure.cause().status_code().as_u16(),
                        error = %failure.cause(),
                        duration_ms,
                        "request failed"
                    );
                }
            }

            outcome
        })
    }
}
