//! Static bearer token validation.
//!
//! Tokens are listed in `security.tokens` together with the identity they
//! stand for. This is the gateway's stand-in for a token verification
//! service; anything implementing [`Authenticator`] can replace it.

use portcullis_config::TokenConfig;
use portcullis_core::{AuthError, Authenticator, BoxFuture, Identity};
use std::collections::HashMap;

/// Maps configured bearer tokens to identities.
#[derive(Clone, Default)]
pub struct StaticTokenAuthenticator {
    tokens: HashMap<String, Identity>,
}

impl StaticTokenAuthenticator {
    /// Creates an authenticator that accepts no tokens.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Accepts `token` as `identity`.
    #[must_use]
    pub fn with_token(mut self, token: impl Into<String>, identity: Identity) -> Self {
        self.tokens.insert(token.into(), identity);
        self
    }

    /// Builds an authenticator from configured tokens.
    pub fn from_config<'a>(tokens: impl IntoIterator<Item = &'a TokenConfig>) -> Self {
        tokens.into_iter().fold(Self::new(), |auth, config| {
            let mut identity =
                Identity::new(&config.subject).with_authorities(config.authorities.iter().cloned());
            if let Some(name) = &config.name {
                identity = identity.with_name(name);
            }
            auth.with_token(&config.token, identity)
        })
    }

    /// Returns the number of accepted tokens.
    #[must_use]
    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    /// Returns `true` if no tokens are accepted.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }
}

impl std::fmt::Debug for StaticTokenAuthenticator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StaticTokenAuthenticator")
            .field("tokens", &self.tokens.len())
            .finish()
    }
}

impl Authenticator for StaticTokenAuthenticator {
    fn validate<'a>(&'a self, token: &'a str) -> BoxFuture<'a, Result<Identity, AuthError>> {
        let result = self
            .tokens
            .get(token)
            .cloned()
            .ok_or_else(|| AuthError::rejected("unknown token"));
        Box::pin(async move { result })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> Vec<TokenConfig> {
        vec![
            TokenConfig {
                token: "tok-ada".to_string(),
                subject: "user123".to_string(),
                name: Some("Ada Lovelace".to_string()),
                authorities: vec!["legacy:write".to_string()],
            },
            TokenConfig {
                token: "tok-bob".to_string(),
                subject: "user456".to_string(),
                name: None,
                authorities: Vec::new(),
            },
        ]
    }

    #[tokio::test]
    async fn test_known_token_resolves_identity() {
        let auth = StaticTokenAuthenticator::from_config(&config());

        let identity = auth.validate("tok-ada").await.unwrap();
        assert_eq!(identity.subject, "user123");
        assert_eq!(identity.display_name(), "Ada Lovelace");
        assert!(identity.has_authority("legacy:write"));

        let identity = auth.validate("tok-bob").await.unwrap();
        assert_eq!(identity.display_name(), "user456");
    }

    #[tokio::test]
    async fn test_unknown_token_rejected() {
        let auth = StaticTokenAuthenticator::from_config(&config());

        let err = auth.validate("tok-eve").await.unwrap_err();
        assert_eq!(err.to_string(), "invalid token: unknown token");
    }

    #[test]
    fn test_debug_hides_tokens() {
        let auth = StaticTokenAuthenticator::from_config(&config());
        let rendered = format!("{auth:?}");
        assert!(!rendered.contains("tok-ada"));
        assert_eq!(auth.len(), 2);
    }
}
