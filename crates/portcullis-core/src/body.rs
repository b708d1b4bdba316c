//! One-shot request body with safe buffering.
//!
//! An inbound body is a stream that can be read exactly once. Filters that
//! need the bytes call [`Body::materialize`], which drains the stream a single
//! time and caches the result; every later reader gets the cached bytes and
//! the stream is never polled again. [`replace`] swaps a request's body for
//! new bytes and recomputes `Content-Length`.
//!
//! ```
//! use bytes::Bytes;
//! use portcullis_core::Body;
//!
//! # tokio_test::block_on(async {
//! let mut body = Body::from("hello");
//! assert_eq!(body.materialize().await.unwrap(), Bytes::from("hello"));
//! assert_eq!(body.materialize().await.unwrap(), Bytes::from("hello"));
//! # });
//! ```

use crate::types::Request;
use bytes::Bytes;
use http::header::{HeaderValue, CONTENT_LENGTH};
use http_body_util::combinators::BoxBody;
use http_body_util::{BodyExt, Full, LengthLimitError, Limited};
use std::fmt;
use std::mem;
use thiserror::Error;

/// Boxed error type carried by streaming bodies.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

// Naming the future as `Send` here keeps `Limited`'s error bound out of the
// caller's async state, where rustc cannot prove it for every lifetime.
fn collect_limited(
    stream: BoxBody<Bytes, BoxError>,
    limit: usize,
) -> impl std::future::Future<Output = Result<http_body_util::Collected<Bytes>, BoxError>> + Send {
    Limited::new(stream, limit).collect()
}

/// Failure while reading a body.
#[derive(Error, Debug)]
pub enum BodyError {
    /// The underlying stream failed.
    #[error("failed to read request body: {0}")]
    Read(#[source] BoxError),

    /// The body is larger than allowed.
    #[error("request body exceeds {limit} bytes")]
    TooLarge {
        /// The configured limit in bytes.
        limit: usize,
    },

    /// A previous read failed part-way; the stream cannot be re-read.
    #[error("request body already consumed")]
    Consumed,
}

enum Inner {
    Empty,
    Streaming(BoxBody<Bytes, BoxError>),
    Buffered(Bytes),
    Consumed,
}

/// A request body that is streamed until someone needs its bytes.
pub struct Body {
    inner: Inner,
}

impl Body {
    /// An empty body.
    #[must_use]
    pub const fn empty() -> Self {
        Self { inner: Inner::Empty }
    }

    /// Wraps a one-shot body stream.
    pub fn streaming<B>(body: B) -> Self
    where
        B: http_body::Body<Data = Bytes> + Send + Sync + 'static,
        B::Error: Into<BoxError>,
    {
        Self {
            inner: Inner::Streaming(BoxBody::new(body.map_err(Into::into))),
        }
    }

    /// A body whose bytes are already in memory.
    pub fn buffered(bytes: impl Into<Bytes>) -> Self {
        Self {
            inner: Inner::Buffered(bytes.into()),
        }
    }

    /// Returns `true` once the bytes are held in memory.
    #[must_use]
    pub const fn is_buffered(&self) -> bool {
        matches!(self.inner, Inner::Buffered(_))
    }

    /// Returns the buffered bytes without reading, if any.
    #[must_use]
    pub const fn buffered_bytes(&self) -> Option<&Bytes> {
        match &self.inner {
            Inner::Buffered(bytes) => Some(bytes),
            _ => None,
        }
    }

    /// Drains the stream once and caches the bytes.
    ///
    /// Repeated calls return the cached bytes.
    ///
    /// # Errors
    ///
    /// Returns [`BodyError::Read`] if the stream fails, and
    /// [`BodyError::Consumed`] on any call after a failed read.
    pub async fn materialize(&mut self) -> Result<Bytes, BodyError> {
        self.drain(None).await
    }

    /// Like [`materialize`](Self::materialize) but refuses bodies over `limit` bytes.
    ///
    /// # Errors
    ///
    /// Returns [`BodyError::TooLarge`] when the body exceeds `limit`. The
    /// stream is left consumed.
    pub async fn materialize_limited(&mut self, limit: usize) -> Result<Bytes, BodyError> {
        self.drain(Some(limit)).await
    }

    async fn drain(&mut self, limit: Option<usize>) -> Result<Bytes, BodyError> {
        match mem::replace(&mut self.inner, Inner::Consumed) {
            Inner::Buffered(bytes) => {
                self.inner = Inner::Buffered(bytes.clone());
                match limit {
                    Some(limit) if bytes.len() > limit => Err(BodyError::TooLarge { limit }),
                    _ => Ok(bytes),
                }
            }
            Inner::Empty => {
                self.inner = Inner::Buffered(Bytes::new());
                Ok(Bytes::new())
            }
            Inner::Consumed => Err(BodyError::Consumed),
            Inner::Streaming(stream) => {
                let collected = match limit {
                    Some(limit) => collect_limited(stream, limit).await.map_err(|e| {
                        if e.downcast_ref::<LengthLimitError>().is_some() {
                            BodyError::TooLarge { limit }
                        } else {
                            BodyError::Read(e)
                        }
                    })?,
                    None => stream.collect().await.map_err(BodyError::Read)?,
                };
                let bytes = collected.to_bytes();
                self.inner = Inner::Buffered(bytes.clone());
                Ok(bytes)
            }
        }
    }

    /// Returns a fresh stream over the buffered bytes.
    ///
    /// `None` until the body has been materialized.
    #[must_use]
    pub fn as_stream(&self) -> Option<Full<Bytes>> {
        self.buffered_bytes().map(|bytes| Full::new(bytes.clone()))
    }
}

impl Default for Body {
    fn default() -> Self {
        Self::empty()
    }
}

impl fmt::Debug for Body {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.inner {
            Inner::Empty => f.write_str("Body::Empty"),
            Inner::Streaming(_) => f.write_str("Body::Streaming"),
            Inner::Buffered(bytes) => write!(f, "Body::Buffered({} bytes)", bytes.len()),
            Inner::Consumed => f.write_str("Body::Consumed"),
        }
    }
}

impl From<Bytes> for Body {
    fn from(bytes: Bytes) -> Self {
        Self::buffered(bytes)
    }
}

impl From<&'static str> for Body {
    fn from(s: &'static str) -> Self {
        Self::buffered(Bytes::from_static(s.as_bytes()))
    }
}

impl From<String> for Body {
    fn from(s: String) -> Self {
        Self::buffered(s)
    }
}

impl From<Vec<u8>> for Body {
    fn from(v: Vec<u8>) -> Self {
        Self::buffered(v)
    }
}

/// Returns `request` with its body replaced by `bytes`.
///
/// `Content-Length` is recomputed; every other header is kept.
pub fn replace(request: Request, bytes: impl Into<Bytes>) -> Request {
    let bytes = bytes.into();
    let (mut parts, _) = request.into_parts();
    parts
        .headers
        .insert(CONTENT_LENGTH, HeaderValue::from(bytes.len()));
    Request::from_parts(parts, Body::buffered(bytes))
}

#[cfg(test)]
mod tests {
    use super::*;
    use http_body::Frame;
    use std::collections::VecDeque;
    use std::convert::Infallible;
    use std::pin::Pin;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::task::{Context, Poll};

    struct CountingBody {
        chunks: VecDeque<Bytes>,
        reads: Arc<AtomicUsize>,
    }

    impl http_body::Body for CountingBody {
        type Data = Bytes;
        type Error = Infallible;

        fn poll_frame(
            mut self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
        ) -> Poll<Option<Result<Frame<Bytes>, Infallible>>> {
            match self.chunks.pop_front() {
                Some(chunk) => {
                    self.reads.fetch_add(1, Ordering::SeqCst);
                    Poll::Ready(Some(Ok(Frame::data(chunk))))
                }
                None => Poll::Ready(None),
            }
        }
    }

    struct FailingBody {
        sent: bool,
    }

    impl http_body::Body for FailingBody {
        type Data = Bytes;
        type Error = std::io::Error;

        fn poll_frame(
            mut self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
        ) -> Poll<Option<Result<Frame<Bytes>, std::io::Error>>> {
            if self.sent {
                Poll::Ready(Some(Err(std::io::Error::other("connection reset"))))
            } else {
                self.sent = true;
                Poll::Ready(Some(Ok(Frame::data(Bytes::from_static(b"partial")))))
            }
        }
    }

    fn counting(chunks: &[&'static str]) -> (Body, Arc<AtomicUsize>) {
        let reads = Arc::new(AtomicUsize::new(0));
        let body = Body::streaming(CountingBody {
            chunks: chunks.iter().map(|c| Bytes::from_static(c.as_bytes())).collect(),
            reads: reads.clone(),
        });
        (body, reads)
    }

    #[tokio::test]
    async fn test_materialize_drains_once() {
        let (mut body, reads) = counting(&["{\"foo\":", "\"bar\"}"]);
        assert!(!body.is_buffered());
        assert!(body.as_stream().is_none());

        let first = body.materialize().await.unwrap();
        let second = body.materialize().await.unwrap();

        assert_eq!(first, Bytes::from("{\"foo\":\"bar\"}"));
        assert_eq!(first, second);
        assert_eq!(reads.load(Ordering::SeqCst), 2);
        assert!(body.is_buffered());
    }

    #[tokio::test]
    async fn test_empty_body_materializes_to_nothing() {
        let mut body = Body::empty();
        assert!(body.materialize().await.unwrap().is_empty());
        assert!(body.is_buffered());
    }

    #[tokio::test]
    async fn test_failed_read_is_not_retried() {
        let mut body = Body::streaming(FailingBody { sent: false });

        assert!(matches!(body.materialize().await, Err(BodyError::Read(_))));
        assert!(matches!(body.materialize().await, Err(BodyError::Consumed)));
    }

    #[tokio::test]
    async fn test_limit_enforced() {
        let (mut body, _) = counting(&["0123456789", "abcdef"]);
        let result = body.materialize_limited(12).await;
        assert!(matches!(result, Err(BodyError::TooLarge { limit: 12 })));

        let mut small = Body::from("tiny");
        assert_eq!(small.materialize_limited(12).await.unwrap(), "tiny");
        assert!(matches!(
            small.materialize_limited(2).await,
            Err(BodyError::TooLarge { limit: 2 })
        ));
    }

    #[tokio::test]
    async fn test_replace_then_stream_reproduces_bytes() {
        let request = http::Request::builder()
            .method("POST")
            .uri("/orders")
            .header("content-type", "application/json")
            .header("content-length", "2")
            .body(Body::from("{}"))
            .unwrap();

        let replaced = replace(request, Bytes::from_static(b"{\"user\":\"u1\"}"));

        assert_eq!(replaced.headers()["content-length"], "13");
        assert_eq!(replaced.headers()["content-type"], "application/json");

        let stream = replaced.body().as_stream().unwrap();
        let replayed = stream.collect().await.unwrap().to_bytes();
        assert_eq!(replayed, Bytes::from_static(b"{\"user\":\"u1\"}"));
    }

    #[test]
    fn test_debug_hides_contents() {
        assert_eq!(format!("{:?}", Body::from("secret")), "Body::Buffered(6 bytes)");
    }
}
