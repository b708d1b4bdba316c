//! Configuration error types.

use std::path::PathBuf;
use thiserror::Error;

/// Why a gateway configuration could not be produced.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// A configuration file given explicitly does not exist.
    #[error("configuration file not found: {path}")]
    FileNotFound {
        /// Path that was looked up.
        path: PathBuf,
    },

    /// The file exists but could not be read.
    #[error("cannot read {path}")]
    Read {
        /// Path to the file.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// Neither TOML nor JSON.
    #[error("unsupported configuration format: {0}")]
    UnsupportedFormat(String),

    /// The document is not valid TOML or JSON, or does not match the schema.
    #[error("malformed {format} configuration: {message}")]
    Parse {
        /// `"toml"` or `"json"`.
        format: &'static str,
        /// Parser message.
        message: String,
    },

    /// A `.env` file could not be loaded.
    #[error("cannot load env file {path}: {message}")]
    Dotenv {
        /// Path to the `.env` file.
        path: PathBuf,
        /// Loader message.
        message: String,
    },

    /// An environment override could not be applied.
    #[error("bad override {var}: {reason}")]
    Env {
        /// The environment variable name.
        var: String,
        /// What was expected.
        reason: String,
    },

    /// A single field holds an unusable value.
    #[error("invalid {field}: {reason}")]
    InvalidValue {
        /// Dotted path of the field, e.g. `routes[2].path_prefix`.
        field: String,
        /// What is wrong with it.
        reason: String,
    },

    /// Fields are individually fine but inconsistent with each other.
    #[error("inconsistent configuration: {0}")]
    Inconsistent(String),
}

impl From<toml::de::Error> for ConfigError {
    fn from(e: toml::de::Error) -> Self {
        Self::Parse {
            format: "toml",
            message: e.message().to_string(),
        }
    }
}

impl From<serde_json::Error> for ConfigError {
    fn from(e: serde_json::Error) -> Self {
        Self::Parse {
            format: "json",
            message: e.to_string(),
        }
    }
}

impl ConfigError {
    /// Missing file at `path`.
    pub fn file_not_found(path: impl Into<PathBuf>) -> Self {
        Self::FileNotFound { path: path.into() }
    }

    /// I/O failure while reading `path`.
    pub fn read_error(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Read {
            path: path.into(),
            source,
        }
    }

    /// Bad value in `field`.
    pub fn invalid_value(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidValue {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// Unusable environment override `var`.
    pub fn env_parse_error(var: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Env {
            var: var.into(),
            reason: reason.into(),
        }
    }

    /// Cross-field inconsistency.
    pub fn validation_error(message: impl Into<String>) -> Self {
        Self::Inconsistent(message.into())
    }
}
