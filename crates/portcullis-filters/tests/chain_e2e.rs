//! End-to-end chain tests.
//!
//! Every test runs a request through the full gateway filter set, with
//! in-memory collaborators standing in for the token validator, service
//! discovery and the backend.

use bytes::Bytes;
use http::header::{AUTHORIZATION, CONTENT_LENGTH};
use http::{HeaderMap, Method, StatusCode};
use http_body_util::{BodyExt, Full};
use parking_lot::Mutex;
use portcullis_config::{AuthorityRule, BasicAuthConfig, IdentityInjection};
use portcullis_core::{
    AuthError, Authenticator, Backend, Body, BoxFuture, GatewayError, Identity, Instance,
    JsonCodec, Request, RequestContext, Response, RouteMatcher, RouteTarget, ServiceResolver,
};
use portcullis_filters::stages::{
    order, BasicAuthOverrideFilter, BearerAuthFilter, CorsFilter, PathRewriteFilter,
    RequestLoggerFilter, ServiceIdFilter, TraceIdFilter, UserIdentityFilter,
};
use portcullis_filters::{Chain, ChainBuilder, Filter, Next, Outcome, Phase};
use std::convert::Infallible;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

const TRACE_ID: &str = "4bf92f3577b34da6a3ce929d0e0e4736";
const TRACEPARENT: &str = "00-4bf92f3577b34da6a3ce929d0e0e4736-00f067aa0ba902b7-01";

// =============================================================================
// Collaborators
// =============================================================================

#[derive(Default)]
struct TokenAuthenticator {
    calls: AtomicUsize,
}

impl Authenticator for TokenAuthenticator {
    fn validate<'a>(&'a self, token: &'a str) -> BoxFuture<'a, Result<Identity, AuthError>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Box::pin(async move {
            match token {
                "writer" => Ok(Identity::new("user123").with_authorities(["legacy:write"])),
                "reader" => Ok(Identity::new("user123").with_authorities(["legacy:read"])),
                _ => Err(AuthError::rejected("signature mismatch")),
            }
        })
    }
}

struct PrefixRoutes;

impl RouteMatcher for PrefixRoutes {
    fn match_route(&self, request: &Request) -> Option<RouteTarget> {
        let path = request.uri().path();
        let service = ["orders", "billing", "legacy", "ghost"]
            .into_iter()
            .find(|s| path.starts_with(&format!("/api/{s}")));
        match service {
            Some(service) => Some(RouteTarget::new(service, service).with_strip_prefix("/api")),
            None if path.starts_with("/public") => Some(RouteTarget::new("public", "public")),
            None => None,
        }
    }
}

struct Discovery {
    log: Arc<Mutex<Vec<&'static str>>>,
}

impl ServiceResolver for Discovery {
    fn resolve_instance<'a>(&'a self, service_id: &'a str) -> BoxFuture<'a, Option<Instance>> {
        self.log.lock().push("resolve");
        Box::pin(async move {
            match service_id {
                "ghost" => None,
                "orders" => Some(Instance::new("orders", "10.0.0.5", 8081).with_metadata("basePath", "/v2")),
                other => Some(Instance::new(other, "10.0.0.9", 8080)),
            }
        })
    }
}

#[derive(Debug, Clone)]
struct Forwarded {
    method: Method,
    uri: String,
    headers: HeaderMap,
    body: Bytes,
}

#[derive(Default)]
struct RecordingBackend {
    seen: Mutex<Vec<Forwarded>>,
}

impl RecordingBackend {
    fn last(&self) -> Forwarded {
        self.seen.lock().last().cloned().expect("backend was not called")
    }

    fn calls(&self) -> usize {
        self.seen.lock().len()
    }
}

impl Backend for RecordingBackend {
    fn dispatch<'a>(
        &'a self,
        ctx: &'a mut RequestContext,
    ) -> BoxFuture<'a, Result<Response, GatewayError>> {
        Box::pin(async move {
            if ctx.instance().is_none() {
                let service = ctx.route_target().map(|t| t.service_id.clone()).unwrap_or_default();
                return Err(GatewayError::no_instance(service));
            }

            let body = ctx.materialize_body().await?;
            let request = ctx.request();
            self.seen.lock().push(Forwarded {
                method: request.method().clone(),
                uri: request.uri().to_string(),
                headers: request.headers().clone(),
                body,
            });

            let path = request.uri().path().to_string();
            if path.ends_with("/fail") {
                return Err(GatewayError::upstream("connection reset by peer"));
            }
            if path.ends_with("/slow") {
                tokio::time::sleep(Duration::from_secs(60)).await;
            }
            Ok(Response::new(Full::new(Bytes::from_static(b"backend ok"))))
        })
    }
}

/// Records entry into the chain under `name`.
struct Probe {
    name: &'static str,
    phase: Phase,
    log: Arc<Mutex<Vec<&'static str>>>,
}

impl Filter for Probe {
    fn name(&self) -> &'static str {
        self.name
    }

    fn phase(&self) -> Phase {
        self.phase
    }

    fn process<'a>(&'a self, ctx: RequestContext, next: Next<'a>) -> BoxFuture<'a, Outcome> {
        self.log.lock().push(self.name);
        Box::pin(next.run(ctx))
    }
}

/// A client that sent its headers and then stopped sending the body.
struct StalledUpload;

impl http_body::Body for StalledUpload {
    type Data = Bytes;
    type Error = Infallible;

    fn poll_frame(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
    ) -> Poll<Option<Result<http_body::Frame<Bytes>, Infallible>>> {
        Poll::Pending
    }
}

// =============================================================================
// Harness
// =============================================================================

struct Gateway {
    chain: Chain,
    auth: Arc<TokenAuthenticator>,
    backend: Arc<RecordingBackend>,
    log: Arc<Mutex<Vec<&'static str>>>,
}

struct Reply {
    status: StatusCode,
    headers: HeaderMap,
    body: Bytes,
}

fn legacy_credentials() -> BasicAuthConfig {
    BasicAuthConfig {
        username: "legacy-svc".to_string(),
        password: "pa55".to_string(),
        required_authorities: vec![AuthorityRule {
            methods: vec!["POST".to_string()],
            path_prefix: Some("/api/legacy".to_string()),
            authorities: vec!["legacy:write".to_string()],
        }],
    }
}

fn base_builder(
    auth: &Arc<TokenAuthenticator>,
    backend: &Arc<RecordingBackend>,
    log: &Arc<Mutex<Vec<&'static str>>>,
) -> ChainBuilder {
    Chain::builder()
        .route_matcher(Arc::new(PrefixRoutes))
        .resolver(Arc::new(Discovery { log: log.clone() }))
        .backend(backend.clone())
        .request_timeout(Duration::from_millis(500))
        .register(order::BEARER_AUTH, BearerAuthFilter::new(auth.clone(), ["/api"]))
}

fn gateway_with(extra: impl FnOnce(ChainBuilder) -> ChainBuilder) -> Gateway {
    let auth = Arc::new(TokenAuthenticator::default());
    let backend = Arc::new(RecordingBackend::default());
    let log = Arc::new(Mutex::new(Vec::new()));

    let chain = extra(base_builder(&auth, &backend, &log)).build().unwrap();
    Gateway {
        chain,
        auth,
        backend,
        log,
    }
}

fn gateway() -> Gateway {
    gateway_with(|builder| {
        builder
            .register(order::TRACE_ID, TraceIdFilter::new())
            .register(order::SERVICE_ID, ServiceIdFilter::new())
            .register(order::PATH_REWRITE, PathRewriteFilter::new())
            .register(
                order::BASIC_AUTH,
                BasicAuthOverrideFilter::new().with_service("legacy", &legacy_credentials()),
            )
            .register(
                order::USER_IDENTITY,
                UserIdentityFilter::new(Arc::new(JsonCodec))
                    .with_service("orders", IdentityInjection::Body)
                    .with_service("billing", IdentityInjection::Query),
            )
            .register(order::REQUEST_LOGGER, RequestLoggerFilter::new())
            .register(
                order::CORS,
                CorsFilter::builder()
                    .allow_origin("https://app.example.com")
                    .allow_credentials(true)
                    .build(),
            )
    })
}

fn request(method: Method, uri: &str, token: Option<&str>, body: &'static str) -> RequestContext {
    let mut builder = http::Request::builder()
        .method(method)
        .uri(uri)
        .header("origin", "https://app.example.com")
        .header("traceparent", TRACEPARENT)
        .header(CONTENT_LENGTH, body.len());
    if let Some(token) = token {
        builder = builder.header(AUTHORIZATION, format!("Bearer {token}"));
    }
    let body = Body::streaming(Full::new(Bytes::from_static(body.as_bytes())));
    RequestContext::new(builder.body(body).unwrap())
}

async fn send(chain: &Chain, ctx: RequestContext) -> Reply {
    let response = match chain.run(ctx).await {
        Ok(response) => response,
        Err(failure) => failure.into_response(),
    };
    let (parts, body) = response.into_parts();
    Reply {
        status: parts.status,
        headers: parts.headers,
        body: body.collect().await.unwrap().to_bytes(),
    }
}

// =============================================================================
// Authentication
// =============================================================================

#[tokio::test]
async fn test_unprotected_path_never_consults_authenticator() {
    let gw = gateway();

    let reply = send(&gw.chain, request(Method::GET, "/public/status", None, "")).await;

    assert_eq!(reply.status, StatusCode::OK);
    assert_eq!(gw.auth.calls.load(Ordering::SeqCst), 0);
    assert_eq!(gw.backend.calls(), 1);
}

#[tokio::test]
async fn test_protected_path_without_token_is_401() {
    let gw = gateway();

    let reply = send(&gw.chain, request(Method::GET, "/api/orders", None, "")).await;

    assert_eq!(reply.status, StatusCode::UNAUTHORIZED);
    assert_eq!(reply.headers["content-type"], "application/json");
    assert_eq!(reply.body, Bytes::from(r#"{"error":"missing bearer token"}"#));
    assert_eq!(gw.backend.calls(), 0);
    assert!(gw.log.lock().is_empty(), "routing must not run");
}

#[tokio::test]
async fn test_protected_path_with_rejected_token_is_401() {
    let gw = gateway();

    let reply = send(&gw.chain, request(Method::GET, "/api/orders", Some("forged"), "")).await;

    assert_eq!(reply.status, StatusCode::UNAUTHORIZED);
    assert_eq!(
        reply.body,
        Bytes::from(r#"{"error":"invalid token: signature mismatch"}"#)
    );
    assert_eq!(gw.backend.calls(), 0);
}

#[tokio::test]
async fn test_spoofed_user_header_is_replaced() {
    let gw = gateway();
    let mut ctx = request(Method::GET, "/api/orders", Some("writer"), "");
    ctx = ctx.map_request(|mut r| {
        r.headers_mut().insert("x-user-id", "admin".parse().unwrap());
        r
    });

    send(&gw.chain, ctx).await;

    assert_eq!(gw.backend.last().headers["x-user-id"], "user123");
}

// =============================================================================
// CORS
// =============================================================================

#[tokio::test]
async fn test_options_short_circuits_before_routing() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let probe_log = log.clone();
    let gw = gateway_with(move |builder| {
        builder
            .register(order::CORS, CorsFilter::builder().allow_origin("https://app.example.com").build())
            .register(
                order::USER_IDENTITY,
                Probe {
                    name: "post-route",
                    phase: Phase::PostRoute,
                    log: probe_log,
                },
            )
    });

    let reply = send(&gw.chain, request(Method::OPTIONS, "/api/orders", None, "")).await;

    assert_eq!(reply.status, StatusCode::OK);
    assert_eq!(
        reply.headers["access-control-allow-origin"],
        "https://app.example.com"
    );
    assert!(reply.headers.contains_key("access-control-allow-methods"));
    assert!(log.lock().is_empty(), "post-route filters must not run");
    assert!(gw.log.lock().is_empty(), "routing must not run");
    assert_eq!(gw.auth.calls.load(Ordering::SeqCst), 0);
    assert_eq!(gw.backend.calls(), 0);
}

#[tokio::test]
async fn test_cors_headers_on_error_responses() {
    let gw = gateway();

    let reply = send(&gw.chain, request(Method::GET, "/api/orders", None, "")).await;

    assert_eq!(reply.status, StatusCode::UNAUTHORIZED);
    assert_eq!(
        reply.headers["access-control-allow-origin"],
        "https://app.example.com"
    );
    assert_eq!(reply.headers["access-control-allow-credentials"], "true");
}

// =============================================================================
// Identity propagation
// =============================================================================

#[tokio::test]
async fn test_body_enrichment_preserves_keys_and_length() {
    let gw = gateway();

    let reply = send(
        &gw.chain,
        request(Method::POST, "/api/orders", Some("writer"), r#"{"foo":"bar"}"#),
    )
    .await;

    assert_eq!(reply.status, StatusCode::OK);
    let forwarded = gw.backend.last();
    let expected = r#"{"foo":"bar","user":"user123"}"#;
    assert_eq!(forwarded.body, Bytes::from(expected));
    assert_eq!(
        forwarded.headers[CONTENT_LENGTH],
        expected.len().to_string().as_str()
    );
    assert_eq!(forwarded.headers["userid"], "user123");
    assert_eq!(forwarded.headers["user"], "user123");
}

#[tokio::test]
async fn test_malformed_body_enriched_as_empty_object() {
    let gw = gateway();

    let reply = send(
        &gw.chain,
        request(Method::POST, "/api/orders", Some("writer"), "not json"),
    )
    .await;

    assert_eq!(reply.status, StatusCode::OK);
    assert_eq!(gw.backend.last().body, Bytes::from(r#"{"user":"user123"}"#));
}

#[tokio::test]
async fn test_query_injection() {
    let gw = gateway();

    send(
        &gw.chain,
        request(Method::POST, "/api/billing/invoices?draft=1", Some("writer"), "{}"),
    )
    .await;

    let forwarded = gw.backend.last();
    assert_eq!(forwarded.uri, "/billing/invoices?draft=1&user=user123");
    assert_eq!(forwarded.body, Bytes::from("{}"));
}

#[tokio::test]
async fn test_get_is_not_enriched() {
    let gw = gateway();

    send(&gw.chain, request(Method::GET, "/api/billing", Some("writer"), "")).await;

    let forwarded = gw.backend.last();
    assert_eq!(forwarded.uri, "/billing");
    assert!(forwarded.headers.get("userid").is_none());
}

// =============================================================================
// Basic credentials override
// =============================================================================

#[tokio::test]
async fn test_basic_override_forbidden_without_authority() {
    let gw = gateway();

    let reply = send(
        &gw.chain,
        request(Method::POST, "/api/legacy/items", Some("reader"), "{}"),
    )
    .await;

    assert_eq!(reply.status, StatusCode::FORBIDDEN);
    assert_eq!(
        reply.body,
        Bytes::from(r#"{"error":"forbidden: insufficient authority for legacy"}"#)
    );
    assert_eq!(gw.backend.calls(), 0);
}

#[tokio::test]
async fn test_basic_override_injects_credentials() {
    let gw = gateway();

    let reply = send(
        &gw.chain,
        request(Method::POST, "/api/legacy/items", Some("writer"), "{}"),
    )
    .await;

    assert_eq!(reply.status, StatusCode::OK);
    // base64("legacy-svc:pa55")
    assert_eq!(
        gw.backend.last().headers[AUTHORIZATION],
        "Basic bGVnYWN5LXN2YzpwYTU1"
    );
}

#[tokio::test]
async fn test_basic_override_rule_scoped_to_method() {
    let gw = gateway();

    let reply = send(
        &gw.chain,
        request(Method::GET, "/api/legacy/items", Some("reader"), ""),
    )
    .await;

    assert_eq!(reply.status, StatusCode::OK);
    assert!(gw.backend.last().headers[AUTHORIZATION]
        .to_str()
        .unwrap()
        .starts_with("Basic "));
}

// =============================================================================
// Ordering
// =============================================================================

#[tokio::test]
async fn test_entry_order_follows_priority() {
    let auth = Arc::new(TokenAuthenticator::default());
    let backend = Arc::new(RecordingBackend::default());
    let log = Arc::new(Mutex::new(Vec::new()));
    let probe = |name, phase| Probe {
        name,
        phase,
        log: log.clone(),
    };

    let chain = Chain::builder()
        .route_matcher(Arc::new(PrefixRoutes))
        .resolver(Arc::new(Discovery { log: log.clone() }))
        .backend(backend.clone())
        .register(i32::MAX, probe("lowest", Phase::Response))
        .register(101, probe("101", Phase::PostRoute))
        .register(-1, probe("-1", Phase::PreRoute))
        .register(100, probe("100", Phase::PostRoute))
        .build()
        .unwrap();

    assert_eq!(chain.describe(), vec![(-1, "-1"), (100, "100"), (101, "101"), (i32::MAX, "lowest")]);

    let reply = send(&chain, request(Method::GET, "/public/x", None, "")).await;

    assert_eq!(reply.status, StatusCode::OK);
    assert_eq!(*log.lock(), vec!["-1", "resolve", "100", "101", "lowest"]);
    assert_eq!(auth.calls.load(Ordering::SeqCst), 0);
}

// =============================================================================
// Routing, rewriting and response tags
// =============================================================================

#[tokio::test]
async fn test_success_carries_service_and_trace_tags() {
    let gw = gateway();

    let reply = send(&gw.chain, request(Method::GET, "/api/orders/7?expand=1", Some("writer"), "")).await;

    assert_eq!(reply.status, StatusCode::OK);
    assert_eq!(reply.body, Bytes::from("backend ok"));
    assert_eq!(reply.headers["x-service-id"], "orders");
    assert_eq!(reply.headers["x-request-id"], TRACE_ID);
    assert_eq!(gw.backend.last().uri, "/v2/orders/7?expand=1");
}

#[tokio::test]
async fn test_route_miss_is_404() {
    let gw = gateway();

    let reply = send(&gw.chain, request(Method::GET, "/nowhere", None, "")).await;

    assert_eq!(reply.status, StatusCode::NOT_FOUND);
    assert_eq!(reply.body, Bytes::from(r#"{"error":"no route for /nowhere"}"#));
    assert_eq!(gw.backend.calls(), 0);
}

#[tokio::test]
async fn test_resolution_miss_reported_by_backend() {
    let gw = gateway();

    let reply = send(&gw.chain, request(Method::GET, "/api/ghost", Some("writer"), "")).await;

    assert_eq!(reply.status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(reply.headers["x-request-id"], TRACE_ID);
}

#[tokio::test]
async fn test_downstream_failure_propagates_with_trace_tag() {
    let gw = gateway();

    let reply = send(&gw.chain, request(Method::GET, "/api/orders/fail", Some("writer"), "")).await;

    assert_eq!(reply.status, StatusCode::BAD_GATEWAY);
    assert_eq!(reply.body, Bytes::from(r#"{"error":"bad gateway"}"#));
    assert_eq!(reply.headers["x-request-id"], TRACE_ID);
    assert!(reply.headers.get("x-service-id").is_none());
}

// =============================================================================
// Timeout and cancellation
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_timeout_unwinds_as_504() {
    let gw = gateway();

    let result = gw
        .chain
        .run(request(Method::GET, "/api/orders/slow", Some("writer"), ""))
        .await;

    let failure = result.unwrap_err();
    assert!(matches!(failure.cause(), GatewayError::Timeout));
    assert_eq!(failure.headers()["x-request-id"], TRACE_ID);
    assert_eq!(failure.into_response().status(), StatusCode::GATEWAY_TIMEOUT);
}

#[tokio::test(start_paused = true)]
async fn test_stalled_upload_times_out_during_enrichment() {
    let gw = gateway();
    let ctx = RequestContext::new(
        http::Request::builder()
            .method(Method::POST)
            .uri("/api/orders")
            .header("traceparent", TRACEPARENT)
            .header(AUTHORIZATION, "Bearer writer")
            .body(Body::streaming(StalledUpload))
            .unwrap(),
    );

    let failure = tokio::time::timeout(Duration::from_secs(30), gw.chain.run(ctx))
        .await
        .expect("chain should give up on the body once the request times out")
        .unwrap_err();

    assert!(matches!(failure.cause(), GatewayError::Timeout));
    assert_eq!(failure.into_response().status(), StatusCode::GATEWAY_TIMEOUT);
    assert_eq!(gw.backend.calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_client_cancellation_unwinds() {
    let gw = gateway();
    let ctx = request(Method::GET, "/api/orders/slow", Some("writer"), "");
    let token = ctx.cancellation().clone();

    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(10)).await;
        token.cancel();
    });

    let failure = gw.chain.run(ctx).await.unwrap_err();
    assert!(matches!(failure.cause(), GatewayError::Cancelled));
    assert_eq!(failure.headers()["x-request-id"], TRACE_ID);
    assert_eq!(failure.into_response().status().as_u16(), 499);
}

#[tokio::test]
async fn test_cancelled_before_start_reaches_nothing() {
    let gw = gateway();
    let ctx = request(Method::GET, "/api/orders", Some("writer"), "");
    ctx.cancellation().cancel();

    let failure = gw.chain.run(ctx).await.unwrap_err();

    assert!(matches!(failure.cause(), GatewayError::Cancelled));
    assert_eq!(gw.auth.calls.load(Ordering::SeqCst), 0);
    assert_eq!(gw.backend.calls(), 0);
}
