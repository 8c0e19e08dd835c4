use crate::getter::{AccessToken, TokenGetter, TokenPresence, TokenStatusChecker};
use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;

/// Placeholder used until the owning application registers real
/// implementations. Answers "no token" and "never connected".
#[derive(Clone, Copy, Debug, Default)]
pub struct Unregistered;

#[async_trait]
impl TokenGetter for Unregistered {
    async fn get_token(&self, principal_id: &str) -> Result<Option<AccessToken>> {
        debug!(principal_id = %principal_id, "No token getter registered");
        Ok(None)
    }
}

#[async_trait]
impl TokenStatusChecker for Unregistered {
    async fn check(&self, principal_id: &str) -> Result<TokenPresence> {
        debug!(principal_id = %principal_id, "No token status checker registered");
        Ok(TokenPresence::default())
    }
}

/// Single-slot registry for the token getter and the status checker.
///
/// Built once at process start and cloned into every consumer. Either slot
/// left empty falls back to [`Unregistered`].
#[derive(Clone)]
pub struct TokenRegistry {
    getter: Arc<dyn TokenGetter>,
    status_checker: Arc<dyn TokenStatusChecker>,
}

impl Default for TokenRegistry {
    fn default() -> Self {
        Self {
            getter: Arc::new(Unregistered),
            status_checker: Arc::new(Unregistered),
        }
    }
}

impl TokenRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Installs the token getter, replacing any previous one.
    pub fn register_token_getter(mut self, getter: Arc<dyn TokenGetter>) -> Self {
        self.getter = getter;
        self
    }

    /// Installs the status checker, replacing any previous one.
    pub fn register_token_status_checker(mut self, checker: Arc<dyn TokenStatusChecker>) -> Self {
        self.status_checker = checker;
        self
    }

    /// Returns a usable access token for the principal, or `None` when the
    /// principal must (re-)authorize.
    pub async fn access_token(&self, principal_id: &str) -> Result<Option<AccessToken>> {
        self.getter.get_token(principal_id).await
    }

    pub async fn token_presence(&self, principal_id: &str) -> Result<TokenPresence> {
        self.status_checker.check(principal_id).await
    }
}
