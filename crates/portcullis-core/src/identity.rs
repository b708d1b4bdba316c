//! Authenticated principal.
//!
//! An [`Identity`] is produced by an [`Authenticator`](crate::Authenticator)
//! and stored on the request context. Downstream filters use it for header
//! propagation and authority checks.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// An authenticated caller.
///
/// # Example
///
/// ```rust
/// use portcullis_core::Identity;
///
/// let identity = Identity::new("user-123").with_authorities(["ROLE_ADMIN"]);
/// assert!(identity.has_authority("ROLE_ADMIN"));
/// assert_eq!(identity.display_name(), "user-123");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    /// Stable subject identifier.
    pub subject: String,
    /// Human-readable name, if the token carries one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Granted authorities. Matching is case-sensitive.
    #[serde(default)]
    pub authorities: Vec<String>,
}

impl Identity {
    /// Creates an identity with no name and no authorities.
    pub fn new(subject: impl Into<String>) -> Self {
        Self {
            subject: subject.into(),
            name: None,
            authorities: Vec::new(),
        }
    }

    /// Sets the display name.
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Sets the granted authorities.
    #[must_use]
    pub fn with_authorities<I, S>(mut self, authorities: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.authorities = authorities.into_iter().map(Into::into).collect();
        self
    }

    /// Returns the name, falling back to the subject.
    #[must_use]
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.subject)
    }

    /// Returns `true` if the identity holds `authority`.
    #[must_use]
    pub fn has_authority(&self, authority: &str) -> bool {
        self.authorities.iter().any(|a| a == authority)
    }

    /// Returns `true` if the identity holds any of `required`.
    ///
    /// An empty `required` set places no restriction and always matches.
    #[must_use]
    pub fn has_any_of(&self, required: &HashSet<String>) -> bool {
        required.is_empty() || self.authorities.iter().any(|a| required.contains(a))
    }

    /// Returns a string identifier suitable for logging.
    #[must_use]
    pub fn log_id(&self) -> String {
        format!("user:{}", self.subject)
    }
}
