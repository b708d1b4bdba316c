//! # Portcullis Filters
//!
//! The filter chain executor and the gateway's filter stages.
//!
//! A [`Chain`] runs every request through its filters in ascending
//! priority. Between the last pre-route filter and the first post-route
//! filter the chain matches a route and resolves a backend instance; after
//! the last filter it dispatches to the backend. Each filter can act before
//! and after the rest of the chain, or answer on its own.
//!
//! ```text
//! CORS → logger → bearer auth → [routing] → identity → basic auth → rewrite
//!                                                                      ↓
//!                                          dispatch ← trace id ← service id
//! ```
//!
//! ## Example
//!
//! ```ignore
//! use portcullis_filters::stages::{order, CorsFilter, TraceIdFilter};
//! use portcullis_filters::Chain;
//!
//! let chain = Chain::builder()
//!     .register(order::CORS, CorsFilter::permissive())
//!     .register(order::TRACE_ID, TraceIdFilter::new())
//!     .route_matcher(routes)
//!     .resolver(resolver)
//!     .backend(backend)
//!     .build()?;
//! ```

pub mod chain;
pub mod filter;
pub mod stages;
mod uri;

pub use chain::{BoxedFilter, Chain, ChainBuilder, ChainError};
pub use filter::{Failure, Filter, Next, Outcome, Phase};
pub use uri::matches_prefix;
