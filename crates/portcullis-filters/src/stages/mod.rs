//! Gateway filter stages.
//!
//! | Priority | Filter | Phase |
//! |---|---|---|
//! | `i32::MIN` | [`CorsFilter`] | pre-route |
//! | -2 | [`RequestLoggerFilter`] | pre-route |
//! | -1 | [`BearerAuthFilter`] | pre-route |
//! | *routing step* | | |
//! | 100 | [`UserIdentityFilter`] | post-route |
//! | 101 | [`BasicAuthOverrideFilter`] | post-route |
//! | 10151 | [`PathRewriteFilter`] | post-route |
//! | `i32::MAX - 1` | [`ServiceIdFilter`] | response |
//! | `i32::MAX` | [`TraceIdFilter`] | response |

pub mod basic_auth;
pub mod bearer_auth;
pub mod cors;
pub mod path_rewrite;
pub mod request_logger;
pub mod service_id;
pub mod trace_id;
pub mod user_identity;

pub use basic_auth::BasicAuthOverrideFilter;
pub use bearer_auth::BearerAuthFilter;
pub use cors::{CorsBuilder, CorsFilter};
pub use path_rewrite::PathRewriteFilter;
pub use request_logger::RequestLoggerFilter;
pub use service_id::ServiceIdFilter;
pub use trace_id::TraceIdFilter;
pub use user_identity::UserIdentityFilter;

/// Default priorities. Lower runs first.
pub mod order {
    /// CORS runs before everything else.
    pub const CORS: i32 = i32::MIN;
    /// Request logging.
    pub const REQUEST_LOGGER: i32 = -2;
    /// Bearer authentication.
    pub const BEARER_AUTH: i32 = -1;
    /// User identity propagation.
    pub const USER_IDENTITY: i32 = 100;
    /// Basic credentials override.
    pub const BASIC_AUTH: i32 = 101;
    /// Backend base-path rewrite.
    pub const PATH_REWRITE: i32 = 10151;
    /// Response service-id tag.
    pub const SERVICE_ID: i32 = i32::MAX - 1;
    /// Response trace-id tag; innermost.
    pub const TRACE_ID: i32 = i32::MAX;
}
