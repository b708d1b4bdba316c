//! Header handling between the client, the gateway and backends.
//!
//! Hop-by-hop headers describe a single connection and are dropped in both
//! directions, together with any header the `Connection` header names.

use http::header::{HeaderMap, HeaderName, HeaderValue, CONNECTION, HOST};
use portcullis_core::{TraceContext, TRACEPARENT_HEADER};

/// Headers that are never forwarded.
pub static HOP_BY_HOP_HEADERS: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "proxy-connection",
    "te",
    "trailer",
    "trailers",
    "transfer-encoding",
    "upgrade",
];

/// Returns `true` for a hop-by-hop header name.
pub fn is_hop_by_hop_header(name: &str) -> bool {
    HOP_BY_HOP_HEADERS
        .iter()
        .any(|h| h.eq_ignore_ascii_case(name))
}

/// Removes hop-by-hop headers, including those listed in `Connection`.
pub fn strip_hop_by_hop(headers: &mut HeaderMap) {
    let listed: Vec<HeaderName> = headers
        .get_all(CONNECTION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .filter_map(|name| HeaderName::from_bytes(name.trim().as_bytes()).ok())
        .collect();

    for name in listed {
        headers.remove(name);
    }
    for name in HOP_BY_HOP_HEADERS {
        headers.remove(*name);
    }
}

/// Builds the header set sent to a backend.
///
/// Hop-by-hop headers and `Host` are dropped; `traceparent` is replaced by
/// one naming this gateway hop as the parent span.
pub fn upstream_headers(headers: &HeaderMap, trace: &TraceContext) -> HeaderMap {
    let mut outbound = headers.clone();
    strip_hop_by_hop(&mut outbound);
    outbound.remove(HOST);

    if let Ok(value) = HeaderValue::from_str(&trace.to_traceparent()) {
        outbound.insert(TRACEPARENT_HEADER, value);
    }
    outbound
}

/// Builds the header set returned to the client from a backend response.
pub fn downstream_headers(headers: &HeaderMap) -> HeaderMap {
    let mut inbound = headers.clone();
    strip_hop_by_hop(&mut inbound);
    inbound
}
