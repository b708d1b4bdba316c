//! Typed configuration for the Portcullis gateway.
//!
//! Configuration is layered: built-in defaults, then a TOML or JSON file,
//! then environment variables. Unknown fields are rejected.
//!
//! # Example
//!
//! ```no_run
//! use portcullis_config::{ConfigLoader, GatewayConfig};
//!
//! # fn main() -> Result<(), portcullis_config::ConfigError> {
//! let config: GatewayConfig = ConfigLoader::new()
//!     .with_defaults()
//!     .with_file("portcullis.toml")?
//!     .with_env_prefix("PORTCULLIS")
//!     .load()?;
//!
//! println!("listening on {}", config.server.http_addr);
//! # Ok(())
//! # }
//! ```
//!
//! # Configuration File Format
//!
//! ```toml
//! [server]
//! http_addr = "0.0.0.0:8080"
//! request_timeout_ms = 30000
//!
//! [logging]
//! level = "info"
//! format = "json"
//!
//! [cors]
//! allowed_origins = ["https://app.example.com"]
//! allow_credentials = true
//!
//! [security]
//! protected_paths = ["/api"]
//!
//! [[routes]]
//! id = "orders"
//! path_prefix = "/api/orders"
//! service_id = "orders"
//! strip_prefix = true
//!
//! [services.orders]
//! identity_injection = "body"
//!
//! [[services.orders.instances]]
//! host = "10.0.0.5"
//! port = 8081
//! metadata = { basePath = "/v2" }
//! ```
//!
//! # Environment Variable Overrides
//!
//! Values can be overridden with `PREFIX__SECTION__KEY` variables:
//!
//! - `PORTCULLIS__SERVER__HTTP_ADDR=0.0.0.0:9000`
//! - `PORTCULLIS__LOGGING__LEVEL=debug`
//! - `PORTCULLIS__SECURITY__PROTECTED_PATHS=/api,/admin`
//! - `PORTCULLIS__SERVICES__ORDERS__BASIC_AUTH__PASSWORD=secret`

mod config;
mod error;
mod loader;
mod schema;

pub use config::GatewayConfig;
pub use error::ConfigError;
pub use loader::ConfigLoader;
pub use schema::*;
