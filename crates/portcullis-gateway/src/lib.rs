//! Portcullis edge gateway.
//!
//! Wires the filter chain from [`portcullis_filters`] to an HTTP/1.1
//! listener, static collaborators and an HTTP backend client.
//!
//! ```text
//!   client ──► GatewayServer ──► Chain ──────────────────────────► HttpBackend ──► instance
//!                                 │ cors, request logger, bearer auth
//!                                 │ routing: PrefixRouteTable + StaticServiceResolver
//!                                 │ user identity, basic auth, path rewrite
//!                                 └ service id, trace id
//! ```
//!
//! # Example
//!
//! ```no_run
//! use portcullis_config::ConfigLoader;
//! use portcullis_gateway::{build_chain, GatewayServer};
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let config = ConfigLoader::new()
//!     .with_defaults()
//!     .with_file("gateway.toml")?
//!     .with_env_prefix("PORTCULLIS")
//!     .load()?;
//!
//! let chain = build_chain(&config)?;
//! GatewayServer::new(config, chain).run().await?;
//! # Ok(())
//! # }
//! ```

#![doc(html_root_url = "https://docs.rs/portcullis-gateway/0.1.0")]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

pub mod assembly;
pub mod auth;
pub mod backend;
pub mod discovery;
pub mod error;
pub mod headers;
pub mod health;
pub mod routes;
pub mod server;
pub mod shutdown;

pub use assembly::{build_chain, build_chain_with, Collaborators};
pub use auth::StaticTokenAuthenticator;
pub use backend::HttpBackend;
pub use discovery::StaticServiceResolver;
pub use error::{ServerError, ServerResult};
pub use health::{HealthChecker, HealthStatus};
pub use routes::PrefixRouteTable;
pub use server::GatewayServer;
pub use shutdown::ShutdownSignal;

/// Gateway version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
