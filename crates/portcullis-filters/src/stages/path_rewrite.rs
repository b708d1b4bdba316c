//! Backend base-path rewrite filter.
//!
//! Instances may be mounted under a base path, published as the `basePath`
//! metadata entry. When the selected instance has one, it is prepended to
//! the request path before dispatch.

use crate::filter::{Filter, Next, Outcome, Phase};
use crate::uri::{join_paths, replace_path};
use portcullis_core::{BoxFuture, RequestContext};
use tracing::debug;

/// Prepends the selected instance's `basePath` to the request path.
#[derive(Debug, Clone, Copy, Default)]
pub struct PathRewriteFilter;

impl PathRewriteFilter {
    /// Creates a new path rewrite filter.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl Filter for PathRewriteFilter {
    fn name(&self) -> &'static str {
        "path_rewrite"
    }

    fn phase(&self) -> Phase {
        Phase::PostRoute
    }

    fn process<'a>(&'a self, ctx: RequestContext, next: Next<'a>) -> BoxFuture<'a, Outcome> {
        Box::pin(async move {
            let Some(base_path) = ctx.instance().and_then(|i| i.base_path()) else {
                return next.run(ctx).await;
            };

            let uri = ctx.request().uri();
            let path = join_paths(base_path, uri.path());
            let Some(rewritten) = replace_path(uri, &path) else {
                debug!(%base_path, "base path produced an invalid URI, leaving path unchanged");
                return next.run(ctx).await;
            };

            debug!(from = %uri.path(), to = %path, "path rewritten");
            let ctx = ctx.map_request(|mut request| {
                *request.uri_mut() = rewritten;
                request
            });
            next.run(ctx).await
        })
    }
}
