//! HTTP request and response types used throughout the gateway.

use crate::body::Body;
use bytes::Bytes;
use http::header::{HeaderValue, CONTENT_TYPE};
use http::StatusCode;
use http_body_util::Full;

/// The HTTP request type flowing through the filter chain.
///
/// The body starts out as a one-shot stream; see [`Body`].
pub type Request = http::Request<Body>;

/// The HTTP response type flowing back through the filter chain.
pub type Response = http::Response<Full<Bytes>>;

/// Extension trait for building responses.
pub trait ResponseExt {
    /// Creates a JSON error response with body `{"error": "<message>"}`.
    fn json_error(status: StatusCode, message: &str) -> Response;

    /// Creates a response with the given status and empty body.
    fn empty(status: StatusCode) -> Response;
}

impl ResponseExt for Response {
    fn json_error(status: StatusCode, message: &str) -> Response {
        let body = serde_json::json!({ "error": message });

        let mut response = http::Response::new(Full::new(Bytes::from(body.to_string())));
        *response.status_mut() = status;
        response
            .headers_mut()
            .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        response
    }

    fn empty(status: StatusCode) -> Response {
        let mut response = http::Response::new(Full::new(Bytes::new()));
        *response.status_mut() = status;
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http_body_util::BodyExt;

    #[tokio::test]
    async fn test_json_error_response() {
        let response = Response::json_error(StatusCode::UNAUTHORIZED, "missing bearer token");
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(
            response.headers().get(CONTENT_TYPE).unwrap(),
            "application/json"
        );

        let body = response.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(body, Bytes::from(r#"{"error":"missing bearer token"}"#));
    }

    #[test]
    fn test_empty_response() {
        let response = Response::empty(StatusCode::OK);
        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.headers().is_empty());
    }
}
