use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

/// A bearer token usable against the third-party API right now.
///
/// `Debug` never prints the token itself.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessToken {
    pub access_token: String,
}

impl AccessToken {
    pub fn new(access_token: impl Into<String>) -> Self {
        Self {
            access_token: access_token.into(),
        }
    }

    /// Value for an `Authorization` header.
    pub fn bearer(&self) -> String {
        format!("Bearer {}", self.access_token)
    }
}

impl fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccessToken")
            .field("access_token", &"<redacted>")
            .finish()
    }
}

/// What is known about a principal's connection without touching the tokens.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenPresence {
    /// A credential record exists (valid or not).
    pub had_tokens: bool,

    /// The record carries a durable installation reference.
    pub has_installation_id: bool,
}

impl TokenPresence {
    /// True when the principal connected at some point, even if no usable
    /// token is left. Consumers use this to pick "reconnect" over "connect".
    pub fn was_connected(&self) -> bool {
        self.had_tokens || self.has_installation_id
    }
}

/// Resolves a principal to a usable access token.
///
/// Implementations return `Ok(None)` when the principal must (re-)authorize
/// and `Err` only for transient failures the caller should retry.
#[async_trait]
pub trait TokenGetter: Send + Sync {
    async fn get_token(&self, principal_id: &str) -> Result<Option<AccessToken>>;
}

/// Reports connection state for onboarding and support messaging.
#[async_trait]
pub trait TokenStatusChecker: Send + Sync {
    async fn check(&self, principal_id: &str) -> Result<TokenPresence>;
}
