//! W3C Trace Context.
//!
//! Supports the [W3C Trace Context](https://www.w3.org/TR/trace-context/)
//! `traceparent` header: `{version}-{trace-id}-{parent-span-id}-{flags}`.
//! Ingress parses the inbound header or generates a fresh context; the
//! backend client forwards a child `traceparent` with a new span id.

use http::HeaderMap;
use uuid::Uuid;

/// The W3C Trace Context header name.
pub const TRACEPARENT_HEADER: &str = "traceparent";

/// Trace context for one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TraceContext {
    /// The 128-bit trace ID as a 32-char hex string.
    pub trace_id: String,
    /// This hop's span ID (16 hex chars).
    pub span_id: String,
    /// The upstream span ID, if propagated.
    pub parent_span_id: Option<String>,
    /// Trace flags (sampling).
    pub flags: TraceFlags,
}

impl TraceContext {
    /// Starts a new sampled trace with no parent.
    #[must_use]
    pub fn generate() -> Self {
        Self {
            trace_id: Uuid::now_v7().simple().to_string(),
            span_id: generate_span_id(),
            parent_span_id: None,
            flags: TraceFlags::SAMPLED,
        }
    }

    /// Parses a `traceparent` header value and opens a child span.
    ///
    /// Returns `None` for anything that is not a version `00` header with
    /// well-formed hex fields.
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        let parts: Vec<&str> = value.trim().split('-').collect();
        let [version, trace_id, parent_span_id, flags] = parts.as_slice() else {
            return None;
        };

        if *version != "00" {
            return None;
        }
        if !is_hex(trace_id, 32) || trace_id.bytes().all(|b| b == b'0') {
            return None;
        }
        if !is_hex(parent_span_id, 16) || !is_hex(flags, 2) {
            return None;
        }

        let flags = u8::from_str_radix(flags, 16).ok()?;

        Some(Self {
            trace_id: trace_id.to_ascii_lowercase(),
            span_id: generate_span_id(),
            parent_span_id: Some(parent_span_id.to_ascii_lowercase()),
            flags: TraceFlags(flags),
        })
    }

    /// Reads `traceparent` from `headers`, generating a new context when
    /// absent or invalid.
    #[must_use]
    pub fn from_headers(headers: &HeaderMap) -> Self {
        headers
            .get(TRACEPARENT_HEADER)
            .and_then(|v| v.to_str().ok())
            .and_then(Self::parse)
            .unwrap_or_else(Self::generate)
    }

    /// Renders the `traceparent` value for an outbound call from this span.
    #[must_use]
    pub fn to_traceparent(&self) -> String {
        format!("00-{}-{}-{:02x}", self.trace_id, self.span_id, self.flags.0)
    }
}

/// Trace flags from the W3C Trace Context spec.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TraceFlags(u8);

impl TraceFlags {
    /// No flags set.
    pub const NONE: Self = Self(0x00);
    /// The trace is sampled.
    pub const SAMPLED: Self = Self(0x01);

    /// Returns true if the sampled flag is set.
    #[must_use]
    pub const fn is_sampled(self) -> bool {
        self.0 & 0x01 != 0
    }
}

fn is_hex(s: &str, len: usize) -> bool {
    s.len() == len && s.chars().all(|c| c.is_ascii_hexdigit())
}

fn generate_span_id() -> String {
    // Low half of a v7 UUID is random.
    Uuid::now_v7().simple().to_string()[16..].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    const VALID: &str = "00-0af7651916cd43dd8448eb211c80319c-b7ad6b7169203331-01";

    #[test]
    fn test_parse_valid() {
        let ctx = TraceContext::parse(VALID).unwrap();
        assert_eq!(ctx.trace_id, "0af7651916cd43dd8448eb211c80319c");
        assert_eq!(ctx.parent_span_id.as_deref(), Some("b7ad6b7169203331"));
        assert!(ctx.flags.is_sampled());
        assert_eq!(ctx.span_id.len(), 16);
        assert_ne!(ctx.span_id, "b7ad6b7169203331");
    }

    #[test]
    fn test_parse_rejects_malformed() {
        assert!(TraceContext::parse("garbage").is_none());
        assert!(TraceContext::parse("01-0af7651916cd43dd8448eb211c80319c-b7ad6b7169203331-01").is_none());
        assert!(TraceContext::parse("00-short-b7ad6b7169203331-01").is_none());
        assert!(TraceContext::parse("00-00000000000000000000000000000000-b7ad6b7169203331-01").is_none());
        assert!(TraceContext::parse("00-0af7651916cd43dd8448eb211c80319c-b7ad6b7169203331-zz").is_none());
    }

    #[test]
    fn test_generate() {
        let ctx = TraceContext::generate();
        assert_eq!(ctx.trace_id.len(), 32);
        assert_eq!(ctx.span_id.len(), 16);
        assert!(ctx.parent_span_id.is_none());
        assert_eq!(ctx.flags, TraceFlags::SAMPLED);
    }

    #[test]
    fn test_from_headers_falls_back() {
        let mut headers = HeaderMap::new();
        headers.insert(TRACEPARENT_HEADER, "bogus".parse().unwrap());
        let ctx = TraceContext::from_headers(&headers);
        assert!(ctx.parent_span_id.is_none());

        headers.insert(TRACEPARENT_HEADER, VALID.parse().unwrap());
        let ctx = TraceContext::from_headers(&headers);
        assert_eq!(ctx.trace_id, "0af7651916cd43dd8448eb211c80319c");
    }

    #[test]
    fn test_to_traceparent_keeps_trace_id() {
        let ctx = TraceContext::parse(VALID).unwrap();
        let rendered = ctx.to_traceparent();
        assert!(rendered.starts_with("00-0af7651916cd43dd8448eb211c80319c-"));
        assert!(rendered.ends_with("-01"));

        let reparsed = TraceContext::parse(&rendered).unwrap();
        assert_eq!(reparsed.parent_span_id.as_deref(), Some(ctx.span_id.as_str()));
    }
}
