//! Wiring between the credential manager and provider-agnostic consumers.
//!
//! Consumers only see a [`TokenRegistry`]; this module supplies the getter
//! and status checker behind it.

use crate::config::FallbackConfig;
use crate::manager::CredentialManager;
use anyhow::Result;
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use token_registry::{AccessToken, TokenGetter, TokenPresence, TokenRegistry, TokenStatusChecker};
use tracing::debug;

/// Environment variable holding the pre-shared development token.
pub const STATIC_TOKEN_ENV: &str = "TOKENWARDEN_STATIC_TOKEN";

/// Pre-shared token that bypasses stored credentials when policy allows.
#[derive(Clone)]
pub struct StaticFallback {
    token: String,
}

impl StaticFallback {
    /// Present only when the policy flag is on and the token is non-empty.
    pub fn from_config(config: &FallbackConfig) -> Option<Self> {
        Self::from_parts(config, std::env::var(STATIC_TOKEN_ENV).ok())
    }

    pub fn from_parts(config: &FallbackConfig, token: Option<String>) -> Option<Self> {
        if !config.allow_static_token {
            return None;
        }
        token
            .filter(|t| !t.trim().is_empty())
            .map(|token| Self { token })
    }
}

impl fmt::Debug for StaticFallback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StaticFallback").finish_non_exhaustive()
    }
}

/// Token getter honouring the static fallback before the manager.
pub struct TokenResolver {
    manager: CredentialManager,
    fallback: Option<StaticFallback>,
}

impl TokenResolver {
    pub fn new(manager: CredentialManager, fallback: Option<StaticFallback>) -> Self {
        Self { manager, fallback }
    }
}

#[async_trait]
impl TokenGetter for TokenResolver {
    async fn get_token(&self, principal_id: &str) -> Result<Option<AccessToken>> {
        // Checked before any store access
        if let Some(fallback) = &self.fallback {
            debug!(principal_id = %principal_id, "Using static fallback token");
            return Ok(Some(AccessToken::new(fallback.token.clone())));
        }

        let credential = self.manager.get_valid_credential(principal_id).await?;
        Ok(credential.map(|c| AccessToken::new(c.access_token)))
    }
}

#[async_trait]
impl TokenStatusChecker for CredentialManager {
    async fn check(&self, principal_id: &str) -> Result<TokenPresence> {
        Ok(self.token_presence(principal_id).await?)
    }
}

/// Builds the registry handed to consumers at construction time.
pub fn build_registry(manager: CredentialManager, fallback: Option<StaticFallback>) -> TokenRegistry {
    TokenRegistry::new()
        .register_token_getter(Arc::new(TokenResolver::new(manager.clone(), fallback)))
        .register_token_status_checker(Arc::new(manager))
}
