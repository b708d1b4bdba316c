//! HTTP dispatch to backend instances.

use crate::headers::{downstream_headers, upstream_headers};
use bytes::Bytes;
use http::header::CONTENT_LENGTH;
use http::Uri;
use http_body_util::Full;
use portcullis_core::{Backend, BoxFuture, GatewayError, Instance, RequestContext, Response};
use reqwest::Client;
use std::time::Duration;
use tracing::debug;

/// Forwards requests to the resolved instance over HTTP.
#[derive(Debug, Clone)]
pub struct HttpBackend {
    client: Client,
    max_body_bytes: usize,
}

impl HttpBackend {
    /// Creates a backend with a pooled client.
    ///
    /// Request deadlines are enforced by the chain; `connect_timeout` only
    /// bounds connection establishment. Redirects are returned to the
    /// client and proxy environment variables are ignored.
    pub fn new(connect_timeout: Duration, max_body_bytes: usize) -> Result<Self, reqwest::Error> {
        let client = Client::builder()
            .connect_timeout(connect_timeout)
            .pool_max_idle_per_host(100)
            .redirect(reqwest::redirect::Policy::none())
            .no_proxy()
            .build()?;
        Ok(Self::with_client(client, max_body_bytes))
    }

    /// Uses an existing client.
    #[must_use]
    pub fn with_client(client: Client, max_body_bytes: usize) -> Self {
        Self {
            client,
            max_body_bytes,
        }
    }
}

/// Builds the backend URL: instance base URL plus the current path and query.
pub fn upstream_url(instance: &Instance, uri: &Uri) -> String {
    let path_and_query = uri.path_and_query().map_or("/", |pq| pq.as_str());
    format!("{}{path_and_query}", instance.base_url())
}

fn upstream_error(url: &str, error: &reqwest::Error) -> GatewayError {
    if error.is_timeout() {
        return GatewayError::Timeout;
    }
    GatewayError::upstream(format!("request to {url} failed: {error}"))
}

impl Backend for HttpBackend {
    fn dispatch<'a>(
        &'a self,
        ctx: &'a mut RequestContext,
    ) -> BoxFuture<'a, Result<Response, GatewayError>> {
        Box::pin(async move {
            let url = match ctx.instance() {
                Some(instance) => upstream_url(instance, ctx.request().uri()),
                None => {
                    let service = ctx
                        .route_target()
                        .map_or_else(String::new, |t| t.service_id.clone());
                    return Err(GatewayError::no_instance(service));
                }
            };

            let body = ctx.materialize_body_limited(self.max_body_bytes).await?;
            let request = ctx.request();
            let mut headers = upstream_headers(request.headers(), ctx.trace());
            headers.remove(CONTENT_LENGTH);

            debug!(method = %request.method(), %url, "dispatching");
            let response = self
                .client
                .request(request.method().clone(), &url)
                .headers(headers)
                .body(body)
                .send()
                .await
                .map_err(|e| upstream_error(&url, &e))?;

            let status = response.status();
            let headers = downstream_headers(response.headers());
            let bytes: Bytes = response
                .bytes()
                .await
                .map_err(|e| upstream_error(&url, &e))?;

            debug!(%url, status = status.as_u16(), bytes = bytes.len(), "backend responded");
            let mut out = Response::new(Full::new(bytes));
            *out.status_mut() = status;
            *out.headers_mut() = headers;
            Ok(out)
        })
    }
}
