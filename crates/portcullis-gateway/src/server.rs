//! HTTP ingress.
//!
//! Accepts HTTP/1.1 connections and runs every request through the filter
//! chain. Paths under `/_portcullis/` are answered by the gateway itself.

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use http::header::{HeaderValue, CONTENT_TYPE};
use http::{Method, StatusCode};
use http_body_util::Full;
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper_util::rt::TokioIo;
use portcullis_config::GatewayConfig;
use portcullis_core::{Body, BoxError, GatewayError, RequestContext, Response, ResponseExt};
use portcullis_filters::Chain;
use portcullis_telemetry::{InFlightGuard, MetricsRegistry};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn, Instrument};

use crate::error::{ServerError, ServerResult};
use crate::health::{HealthChecker, HealthStatus};
use crate::shutdown::{ConnectionTracker, ShutdownSignal};

/// Prefix of the gateway's own endpoints.
pub const INTERNAL_PREFIX: &str = "/_portcullis/";

/// The gateway server.
pub struct GatewayServer {
    config: Arc<GatewayConfig>,
    chain: Arc<Chain>,
    health: Arc<HealthChecker>,
    metrics: Option<MetricsRegistry>,
}

impl GatewayServer {
    /// Creates a server that runs requests through `chain`.
    #[must_use]
    pub fn new(config: GatewayConfig, chain: Chain) -> Self {
        let health = Arc::new(HealthChecker::new(chain.len()));
        Self {
            config: Arc::new(config),
            chain: Arc::new(chain),
            health,
            metrics: None,
        }
    }

    /// Serves Prometheus metrics from `registry` on `/_portcullis/metrics`.
    #[must_use]
    pub fn with_metrics(mut self, registry: Option<MetricsRegistry>) -> Self {
        self.metrics = registry;
        self
    }

    /// Returns the health checker.
    #[must_use]
    pub fn health(&self) -> &HealthChecker {
        &self.health
    }

    /// Runs until SIGTERM or SIGINT.
    ///
    /// # Errors
    ///
    /// Returns an error if the listen address cannot be bound.
    pub async fn run(self) -> ServerResult<()> {
        self.run_with_shutdown(ShutdownSignal::with_os_signals()).await
    }

    /// Binds `server.http_addr` and runs until `shutdown` triggers.
    ///
    /// # Errors
    ///
    /// Returns an error if the listen address cannot be bound.
    pub async fn run_with_shutdown(self, shutdown: ShutdownSignal) -> ServerResult<()> {
        let addr = self.config.server.http_addr.clone();
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|e| ServerError::bind(&addr, e))?;
        self.serve(listener, shutdown).await
    }

    /// Accepts connections on `listener` until `shutdown` triggers, then
    /// drains open connections for up to `server.shutdown_timeout_secs`.
    ///
    /// Requests still running after the drain period are cancelled.
    ///
    /// # Errors
    ///
    /// Returns an error if the local address cannot be read.
    pub async fn serve(self, listener: TcpListener, shutdown: ShutdownSignal) -> ServerResult<()> {
        info!(addr = %listener.local_addr()?, filters = ?self.chain.describe(), "gateway listening");

        let server = Arc::new(self);
        let tracker = ConnectionTracker::new();
        let hard_stop = CancellationToken::new();
        server.health.set_ready(true);

        loop {
            tokio::select! {
                result = listener.accept() => match result {
                    Ok((stream, peer)) => {
                        let server = Arc::clone(&server);
                        let token = tracker.acquire();
                        let shutdown = shutdown.clone();
                        let connection = hard_stop.child_token();
                        tokio::spawn(async move {
                            if let Err(e) = server.handle_connection(stream, peer, shutdown, connection).await {
                                debug!(%peer, error = %e, "connection error");
                            }
                            drop(token);
                        });
                    }
                    Err(e) => error!(error = %e, "failed to accept connection"),
                },
                () = shutdown.recv() => {
                    info!("shutdown signal received, no longer accepting connections");
                    break;
                }
            }
        }

        server.health.set_ready(false);
        let timeout = Duration::from_secs(server.config.server.shutdown_timeout_secs);
        info!(
            timeout_secs = timeout.as_secs(),
            connections = tracker.active_connections(),
            "draining connections"
        );

        tokio::select! {
            () = tracker.wait_for_shutdown() => info!("all connections closed"),
            () = tokio::time::sleep(timeout) => {
                warn!(
                    connections = tracker.active_connections(),
                    "drain timeout reached, cancelling remaining requests"
                );
                hard_stop.cancel();
            }
        }

        info!("gateway stopped");
        Ok(())
    }

    async fn handle_connection(
        self: &Arc<Self>,
        stream: TcpStream,
        peer: SocketAddr,
        shutdown: ShutdownSignal,
        cancel: CancellationToken,
    ) -> Result<(), hyper::Error> {
        // Closing the connection cancels whatever it still has in flight.
        let _guard = cancel.clone().drop_guard();
        let server = Arc::clone(self);
        let service = service_fn(move |req: http::Request<Incoming>| {
            let server = Arc::clone(&server);
            let token = cancel.child_token();
            async move { Ok::<_, Infallible>(server.handle_detached(req, peer, token).await) }
        });

        let conn = http1::Builder::new().serve_connection(TokioIo::new(stream), service);
        tokio::pin!(conn);

        tokio::select! {
            result = conn.as_mut() => result,
            () = shutdown.recv() => {
                debug!(%peer, "finishing connection for shutdown");
                conn.as_mut().graceful_shutdown();
                conn.await
            }
        }
    }

    /// Runs [`handle`](Self::handle) on its own task.
    ///
    /// Dropping the returned future, as hyper does when the client goes away,
    /// cancels `cancel`. The chain then unwinds on its task with a `Cancelled`
    /// failure, so every stage still runs its post-`next` work.
    pub async fn handle_detached<B>(
        self: &Arc<Self>,
        req: http::Request<B>,
        peer: SocketAddr,
        cancel: CancellationToken,
    ) -> Response
    where
        B: http_body::Body<Data = Bytes> + Send + Sync + 'static,
        B::Error: Into<BoxError>,
    {
        let abandoned = cancel.clone().drop_guard();
        let server = Arc::clone(self);
        let task = tokio::spawn(async move { server.handle(req, peer, cancel).await });

        let response = match task.await {
            Ok(response) => response,
            Err(e) => {
                let cause =
                    GatewayError::internal_with_source("request task failed", anyhow::Error::new(e));
                error!(%peer, error = ?cause, "request aborted");
                Response::json_error(cause.status_code(), &cause.client_message())
            }
        };
        abandoned.disarm();
        response
    }

    /// Handles one request on the current task.
    ///
    /// `cancel` is the request's cancellation token; cancelling it aborts the
    /// chain with a `Cancelled` failure.
    pub async fn handle<B>(
        &self,
        req: http::Request<B>,
        peer: SocketAddr,
        cancel: CancellationToken,
    ) -> Response
    where
        B: http_body::Body<Data = Bytes> + Send + Sync + 'static,
        B::Error: Into<BoxError>,
    {
        if req.uri().path().starts_with(INTERNAL_PREFIX) {
            return self.handle_internal(req.method(), req.uri().path());
        }

        let _in_flight = InFlightGuard::new();
        let ctx = RequestContext::new(req.map(Body::streaming))
            .with_client_addr(peer)
            .with_cancellation(cancel);
        let span = tracing::info_span!(
            "request",
            request_id = %ctx.request_id(),
            trace_id = %ctx.trace_id(),
            %peer,
        );

        match self.chain.run(ctx).instrument(span).await {
            Ok(response) => response,
            Err(failure) => failure.into_response(),
        }
    }

    fn handle_internal(&self, method: &Method, path: &str) -> Response {
        if method != Method::GET {
            return Response::json_error(StatusCode::METHOD_NOT_ALLOWED, "method not allowed");
        }

        match &path[INTERNAL_PREFIX.len()..] {
            "health" => {
                let health = self.health.check();
                let status = match health.status {
                    HealthStatus::Healthy => StatusCode::OK,
                    HealthStatus::Draining => StatusCode::SERVICE_UNAVAILABLE,
                };
                json_response(status, &health)
            }
            "metrics" => match &self.metrics {
                Some(registry) => {
                    let mut response = Response::new(Full::new(Bytes::from(registry.render())));
                    response.headers_mut().insert(
                        CONTENT_TYPE,
                        HeaderValue::from_static("text/plain; version=0.0.4"),
                    );
                    response
                }
                None => Response::json_error(StatusCode::NOT_FOUND, "metrics disabled"),
            },
            other => Response::json_error(
                StatusCode::NOT_FOUND,
                &format!("unknown internal endpoint: {other}"),
            ),
        }
    }
}

impl std::fmt::Debug for GatewayServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GatewayServer")
            .field("addr", &self.config.server.http_addr)
            .field("chain", &self.chain)
            .field("metrics", &self.metrics.is_some())
            .finish_non_exhaustive()
    }
}

fn json_response<T: serde::Serialize>(status: StatusCode, body: &T) -> Response {
    let json = serde_json::to_vec(body).unwrap_or_else(|_| b"{}".to_vec());
    let mut response = Response::new(Full::new(Bytes::from(json)));
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    response
}
