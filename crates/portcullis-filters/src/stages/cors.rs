//! CORS (Cross-Origin Resource Sharing) filter.
//!
//! Every `OPTIONS` request is answered here with `200 OK` and the preflight
//! headers; it never reaches routing. All other requests continue, and the
//! CORS response headers are added to whatever comes back: a backend
//! response, a short-circuit from a later filter, or a failure.
//!
//! ## CORS Headers
//!
//! - `Access-Control-Allow-Origin`: the configured origin, echoed when
//!   credentials are allowed
//! - `Access-Control-Allow-Methods`: allowed methods (preflight)
//! - `Access-Control-Allow-Headers`: allowed request headers (preflight)
//! - `Access-Control-Allow-Credentials`: when credentials are allowed
//! - `Access-Control-Max-Age`: preflight cache duration (preflight)
//! - `Access-Control-Expose-Headers`: headers exposed to scripts
//!
//! ## Example
//!
//! ```
//! use http::Method;
//! use portcullis_filters::stages::CorsFilter;
//! use std::time::Duration;
//!
//! let cors = CorsFilter::builder()
//!     .allow_origin("https://app.example.com")
//!     .allow_methods([Method::GET, Method::POST])
//!     .allow_headers(["Content-Type", "Authorization"])
//!     .allow_credentials(true)
//!     .max_age(Duration::from_secs(3600))
//!     .build();
//! ```

use crate::filter::{Filter, Next, Outcome, Phase};
use http::header::{HeaderMap, HeaderName, HeaderValue};
use http::{Method, StatusCode};
use portcullis_config::CorsConfig;
use portcullis_core::{BoxFuture, RequestContext, Response, ResponseExt};
use std::time::Duration;

/// CORS header names.
pub mod headers {
    /// `Access-Control-Allow-Origin` header.
    pub const ALLOW_ORIGIN: &str = "access-control-allow-origin";
    /// `Access-Control-Allow-Methods` header.
    pub const ALLOW_METHODS: &str = "access-control-allow-methods";
    /// `Access-Control-Allow-Headers` header.
    pub const ALLOW_HEADERS: &str = "access-control-allow-headers";
    /// `Access-Control-Allow-Credentials` header.
    pub const ALLOW_CREDENTIALS: &str = "access-control-allow-credentials";
    /// `Access-Control-Max-Age` header.
    pub const MAX_AGE: &str = "access-control-max-age";
    /// `Access-Control-Expose-Headers` header.
    pub const EXPOSE_HEADERS: &str = "access-control-expose-headers";
    /// `Origin` header.
    pub const ORIGIN: &str = "origin";
    /// `Vary` header.
    pub const VARY: &str = "vary";
}

/// Represents the set of allowed origins.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AllowedOrigins {
    /// Allow any origin (wildcard `*`).
    Any,
    /// Allow specific origins, in configured order.
    List(Vec<String>),
}

impl AllowedOrigins {
    /// Checks if an origin is allowed.
    pub fn is_allowed(&self, origin: &str) -> bool {
        match self {
            Self::Any => true,
            Self::List(origins) => origins.iter().any(|o| o == origin),
        }
    }
}

/// The CORS policy a [`CorsFilter`] applies.
#[derive(Debug, Clone)]
pub struct CorsPolicy {
    allowed_origins: AllowedOrigins,
    allowed_methods: Vec<Method>,
    allowed_headers: Vec<String>,
    expose_headers: Vec<String>,
    allow_credentials: bool,
    max_age: Option<Duration>,
}

impl Default for CorsPolicy {
    fn default() -> Self {
        Self {
            allowed_origins: AllowedOrigins::List(Vec::new()),
            allowed_methods: vec![
                Method::GET,
                Method::HEAD,
                Method::POST,
                Method::PUT,
                Method::DELETE,
                Method::PATCH,
            ],
            allowed_headers: vec![
                "content-type".to_string(),
                "authorization".to_string(),
                "x-request-id".to_string(),
            ],
            expose_headers: Vec::new(),
            allow_credentials: false,
            max_age: Some(Duration::from_secs(3600)),
        }
    }
}

/// Builder for [`CorsFilter`].
#[derive(Debug, Clone, Default)]
pub struct CorsBuilder {
    policy: CorsPolicy,
}

fn push_unique<T: PartialEq>(list: &mut Vec<T>, item: T) {
    if !list.contains(&item) {
        list.push(item);
    }
}

impl CorsBuilder {
    /// Creates a new CORS builder with default settings.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Allows any origin.
    ///
    /// With credentials allowed the request origin is echoed instead of `*`.
    #[must_use]
    pub fn allow_any_origin(mut self) -> Self {
        self.policy.allowed_origins = AllowedOrigins::Any;
        self
    }

    /// Adds an allowed origin. A `"*"` origin allows any origin.
    #[must_use]
    pub fn allow_origin(mut self, origin: impl Into<String>) -> Self {
        let origin = origin.into();
        if origin == "*" {
            self.policy.allowed_origins = AllowedOrigins::Any;
        } else if let AllowedOrigins::List(origins) = &mut self.policy.allowed_origins {
            push_unique(origins, origin);
        }
        self
    }

    /// Sets the allowed HTTP methods.
    #[must_use]
    pub fn allow_methods<I>(mut self, methods: I) -> Self
    where
        I: IntoIterator<Item = Method>,
    {
        self.policy.allowed_methods.clear();
        for method in methods {
            push_unique(&mut self.policy.allowed_methods, method);
        }
        self
    }

    /// Sets the allowed request headers.
    #[must_use]
    pub fn allow_headers<I, S>(mut self, headers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.policy.allowed_headers.clear();
        for header in headers {
            push_unique(&mut self.policy.allowed_headers, header.into().to_lowercase());
        }
        self
    }

    /// Sets headers that should be exposed to scripts.
    #[must_use]
    pub fn expose_headers<I, S>(mut self, headers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.policy.expose_headers.clear();
        for header in headers {
            push_unique(&mut self.policy.expose_headers, header.into().to_lowercase());
        }
        self
    }

    /// Sets whether to allow credentials (cookies, authorization headers).
    #[must_use]
    pub fn allow_credentials(mut self, allow: bool) -> Self {
        self.policy.allow_credentials = allow;
        self
    }

    /// Sets the max age for preflight cache.
    #[must_use]
    pub fn max_age(mut self, duration: Duration) -> Self {
        self.policy.max_age = Some(duration);
        self
    }

    /// Disables preflight caching.
    #[must_use]
    pub fn no_max_age(mut self) -> Self {
        self.policy.max_age = None;
        self
    }

    /// Builds the CORS filter.
    #[must_use]
    pub fn build(self) -> CorsFilter {
        CorsFilter {
            policy: self.policy,
        }
    }
}

/// Answers preflight requests and adds CORS headers to every response.
#[derive(Debug, Clone)]
pub struct CorsFilter {
    policy: CorsPolicy,
}

impl CorsFilter {
    /// Creates a new CORS builder.
    #[must_use]
    pub fn builder() -> CorsBuilder {
        CorsBuilder::new()
    }

    /// Creates a CORS filter that allows any origin, method and header.
    #[must_use]
    pub fn permissive() -> Self {
        CorsBuilder::new()
            .allow_any_origin()
            .allow_methods([
                Method::GET,
                Method::HEAD,
                Method::POST,
                Method::PUT,
                Method::DELETE,
                Method::PATCH,
                Method::OPTIONS,
            ])
            .allow_headers(["*"])
            .build()
    }

    /// Creates a CORS filter from the `[cors]` configuration section.
    ///
    /// Method names that do not parse are skipped with a warning.
    #[must_use]
    pub fn from_config(config: &CorsConfig) -> Self {
        let mut builder = CorsBuilder::new();
        for origin in &config.allowed_origins {
            builder = builder.allow_origin(origin.as_str());
        }

        let methods = config.allowed_methods.iter().filter_map(|m| {
            match Method::from_bytes(m.to_ascii_uppercase().as_bytes()) {
                Ok(method) => Some(method),
                Err(_) => {
                    tracing::warn!(method = %m, "ignoring invalid CORS method");
                    None
                }
            }
        });

        builder = builder
            .allow_methods(methods.collect::<Vec<_>>())
            .allow_headers(config.allowed_headers.iter().cloned())
            .expose_headers(config.exposed_headers.iter().cloned())
            .allow_credentials(config.allow_credentials);

        match config.max_age_secs {
            Some(secs) => builder.max_age(Duration::from_secs(secs)),
            None => builder.no_max_age(),
        }
        .build()
    }

    /// Returns the policy.
    #[must_use]
    pub const fn policy(&self) -> &CorsPolicy {
        &self.policy
    }

    /// The `Access-Control-Allow-Origin` value for a request from `origin`.
    fn allow_origin_value(&self, origin: Option<&str>) -> Option<HeaderValue> {
        let policy = &self.policy;
        match (&policy.allowed_origins, origin) {
            (AllowedOrigins::Any, _) if !policy.allow_credentials => {
                Some(HeaderValue::from_static("*"))
            }
            (allowed, Some(origin)) if allowed.is_allowed(origin) => {
                HeaderValue::from_str(origin).ok()
            }
            _ => None,
        }
    }

    /// Builds the CORS headers for a response to a request from `origin`.
    fn cors_headers(&self, origin: Option<&str>, preflight: bool) -> HeaderMap {
        let policy = &self.policy;
        let mut map = HeaderMap::new();

        if let Some(value) = self.allow_origin_value(origin) {
            if value != "*" {
                map.insert(
                    HeaderName::from_static(headers::VARY),
                    HeaderValue::from_static("Origin"),
                );
            }
            map.insert(HeaderName::from_static(headers::ALLOW_ORIGIN), value);
        }

        if policy.allow_credentials {
            map.insert(
                HeaderName::from_static(headers::ALLOW_CREDENTIALS),
                HeaderValue::from_static("true"),
            );
        }

        if !policy.expose_headers.is_empty() {
            if let Ok(value) = HeaderValue::from_str(&policy.expose_headers.join(", ")) {
                map.insert(HeaderName::from_static(headers::EXPOSE_HEADERS), value);
            }
        }

        if preflight {
            let methods: Vec<&str> = policy.allowed_methods.iter().map(Method::as_str).collect();
            if !methods.is_empty() {
                if let Ok(value) = HeaderValue::from_str(&methods.join(", ")) {
                    map.insert(HeaderName::from_static(headers::ALLOW_METHODS), value);
                }
            }

            if !policy.allowed_headers.is_empty() {
                if let Ok(value) = HeaderValue::from_str(&policy.allowed_headers.join(", ")) {
                    map.insert(HeaderName::from_static(headers::ALLOW_HEADERS), value);
                }
            }

            if let Some(max_age) = policy.max_age {
                map.insert(
                    HeaderName::from_static(headers::MAX_AGE),
                    HeaderValue::from(max_age.as_secs()),
                );
            }
        }

        map
    }
}

/// Adds `cors` to a response's headers. `Vary` joins whatever the response
/// already varies on; the other CORS headers replace their counterparts.
fn apply_cors(target: &mut HeaderMap, cors: &HeaderMap) {
    for (name, value) in cors {
        if name.as_str() == headers::VARY {
            if !varies_on_origin(target) {
                target.append(name.clone(), value.clone());
            }
        } else {
            target.insert(name.clone(), value.clone());
        }
    }
}

fn varies_on_origin(map: &HeaderMap) -> bool {
    map.get_all(headers::VARY)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(','))
        .map(str::trim)
        .any(|token| token == "*" || token.eq_ignore_ascii_case("origin"))
}

impl Filter for CorsFilter {
    fn name(&self) -> &'static str {
        "cors"
    }

    fn phase(&self) -> Phase {
        Phase::PreRoute
    }

    fn process<'a>(&'a self, ctx: RequestContext, next: Next<'a>) -> BoxFuture<'a, Outcome> {
        Box::pin(async move {
            let origin = ctx
                .request()
                .headers()
                .get(headers::ORIGIN)
                .and_then(|v| v.to_str().ok())
                .map(str::to_owned);

            if ctx.request().method() == Method::OPTIONS {
                let mut response = Response::empty(StatusCode::OK);
                response
                    .headers_mut()
                    .extend(self.cors_headers(origin.as_deref(), true));
                return Outcome::short_circuit(self.name(), response);
            }

            let cors = self.cors_headers(origin.as_deref(), false);
            match next.run(ctx).await {
                Outcome::Continue(ctx) => Outcome::Continue(ctx.map_response(|mut response| {
                    apply_cors(response.headers_mut(), &cors);
                    response
                })),
                Outcome::ShortCircuit(mut response) => {
                    apply_cors(response.headers_mut(), &cors);
                    Outcome::ShortCircuit(response)
                }
                Outcome::Error(mut failure) => {
                    apply_cors(failure.headers_mut(), &cors);
                    Outcome::Error(failure)
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use portcullis_core::{Body, GatewayError};

    fn request(method: Method, origin: Option<&str>) -> RequestContext {
        let mut builder = http::Request::builder().method(method).uri("/api/orders");
        if let Some(origin) = origin {
            builder = builder.header("Origin", origin);
        }
        RequestContext::new(builder.body(Body::empty()).unwrap())
    }

    fn ok_next<'a>() -> Next<'a> {
        Next::handler(|ctx| {
            Box::pin(async move { Outcome::Continue(ctx.with_response(Response::empty(StatusCode::OK))) })
        })
    }

    fn unreachable_next<'a>() -> Next<'a> {
        Next::handler(|_| -> BoxFuture<'a, Outcome> { panic!("preflight must not continue") })
    }

    #[tokio::test]
    async fn test_options_short_circuits_with_headers() {
        let cors = CorsFilter::builder()
            .allow_origin("https://app.example.com")
            .allow_methods([Method::GET, Method::POST])
            .allow_headers(["Content-Type", "Authorization"])
            .max_age(Duration::from_secs(600))
            .build();

        let outcome = cors
            .process(request(Method::OPTIONS, Some("https://app.example.com")), unreachable_next())
            .await;

        let Outcome::ShortCircuit(response) = outcome else {
            panic!("expected short-circuit");
        };
        assert_eq!(response.status(), StatusCode::OK);
        let h = response.headers();
        assert_eq!(h[headers::ALLOW_ORIGIN], "https://app.example.com");
        assert_eq!(h[headers::ALLOW_METHODS], "GET, POST");
        assert_eq!(h[headers::ALLOW_HEADERS], "content-type, authorization");
        assert_eq!(h[headers::MAX_AGE], "600");
        assert_eq!(h[headers::VARY], "Origin");
    }

    #[tokio::test]
    async fn test_options_without_origin_still_short_circuits() {
        let cors = CorsFilter::permissive();
        let outcome = cors.process(request(Method::OPTIONS, None), unreachable_next()).await;

        let Outcome::ShortCircuit(response) = outcome else {
            panic!("expected short-circuit");
        };
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[headers::ALLOW_ORIGIN], "*");
    }

    #[tokio::test]
    async fn test_credentials_echo_origin() {
        let cors = CorsFilter::builder()
            .allow_any_origin()
            .allow_credentials(true)
            .build();

        let outcome = cors
            .process(request(Method::GET, Some("https://other.example")), ok_next())
            .await;

        let Outcome::Continue(ctx) = outcome else {
            panic!("expected continue");
        };
        let h = ctx.response().unwrap().headers();
        assert_eq!(h[headers::ALLOW_ORIGIN], "https://other.example");
        assert_eq!(h[headers::ALLOW_CREDENTIALS], "true");
        assert!(h.get(headers::ALLOW_METHODS).is_none());
    }

    #[tokio::test]
    async fn test_backend_vary_kept() {
        let cors = CorsFilter::builder().allow_origin("https://app.example.com").build();
        let next = Next::handler(|ctx| {
            Box::pin(async move {
                let mut response = Response::empty(StatusCode::OK);
                response
                    .headers_mut()
                    .insert(headers::VARY, HeaderValue::from_static("Accept-Encoding"));
                Outcome::Continue(ctx.with_response(response))
            })
        });

        let outcome = cors
            .process(request(Method::GET, Some("https://app.example.com")), next)
            .await;

        let Outcome::Continue(ctx) = outcome else {
            panic!("expected continue");
        };
        let vary: Vec<_> = ctx.response().unwrap().headers().get_all(headers::VARY).iter().collect();
        assert_eq!(vary, ["Accept-Encoding", "Origin"]);
    }

    #[test]
    fn test_vary_origin_not_duplicated() {
        let mut target = HeaderMap::new();
        target.insert(headers::VARY, HeaderValue::from_static("accept-encoding, origin"));
        let mut cors = HeaderMap::new();
        cors.insert(headers::VARY, HeaderValue::from_static("Origin"));

        apply_cors(&mut target, &cors);

        assert_eq!(target.get_all(headers::VARY).iter().count(), 1);
    }

    #[tokio::test]
    async fn test_disallowed_origin_gets_no_allow_origin() {
        let cors = CorsFilter::builder().allow_origin("https://app.example.com").build();

        let outcome = cors
            .process(request(Method::GET, Some("https://evil.example")), ok_next())
            .await;

        let Outcome::Continue(ctx) = outcome else {
            panic!("expected continue");
        };
        assert!(ctx.response().unwrap().headers().get(headers::ALLOW_ORIGIN).is_none());
    }

    #[tokio::test]
    async fn test_headers_added_to_failure() {
        let cors = CorsFilter::builder()
            .allow_any_origin()
            .expose_headers(["X-Request-Id"])
            .build();
        let next = Next::handler(|_| {
            Box::pin(async { Outcome::error(GatewayError::upstream("refused")) })
        });

        let outcome = cors.process(request(Method::GET, Some("https://a.example")), next).await;

        let Outcome::Error(failure) = outcome else {
            panic!("expected error");
        };
        assert_eq!(failure.headers()[headers::ALLOW_ORIGIN], "*");
        assert_eq!(failure.headers()[headers::EXPOSE_HEADERS], "x-request-id");
    }

    #[test]
    fn test_from_config() {
        let config = CorsConfig {
            allowed_origins: vec!["https://app.example.com".to_string()],
            allowed_methods: vec!["get".to_string(), "POST".to_string(), "bad method".to_string()],
            allowed_headers: vec!["*".to_string()],
            exposed_headers: Vec::new(),
            allow_credentials: true,
            max_age_secs: None,
        };

        let cors = CorsFilter::from_config(&config);
        let policy = cors.policy();
        assert_eq!(
            policy.allowed_origins,
            AllowedOrigins::List(vec!["https://app.example.com".to_string()])
        );
        assert_eq!(policy.allowed_methods, vec![Method::GET, Method::POST]);
        assert!(policy.allow_credentials);
        assert_eq!(policy.max_age, None);
    }

    #[test]
    fn test_wildcard_origin_in_list_means_any() {
        let cors = CorsFilter::builder().allow_origin("*").build();
        assert_eq!(cors.policy().allowed_origins, AllowedOrigins::Any);
    }
}
