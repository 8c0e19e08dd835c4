//! Authorization server configuration.

use crate::config::{OAuthConfig, RefreshConfig};
use chrono::Duration;
use std::fmt;

/// GitHub's OAuth token endpoint.
pub const DEFAULT_TOKEN_URL: &str = "https://github.com/login/oauth/access_token";

/// OAuth client configuration used for refresh exchanges.
#[derive(Clone)]
pub struct OAuthProviderConfig {
    /// OAuth token endpoint URL
    pub token_url: String,

    /// Client ID (from environment variable)
    pub client_id: String,

    /// Client secret (from environment variable)
    pub client_secret: String,

    /// Access token lifetime assumed when the server omits `expires_in`
    pub token_lifetime: Duration,
}

impl OAuthProviderConfig {
    /// Builds the provider config from file settings plus
    /// `TOKENWARDEN_OAUTH_CLIENT_ID` / `TOKENWARDEN_OAUTH_CLIENT_SECRET`.
    ///
    /// Returns `None` if either secret is missing or empty.
    pub fn from_env(oauth: &OAuthConfig, refresh: &RefreshConfig) -> Option<Self> {
        Self::from_lookup(oauth, refresh, |name| std::env::var(name).ok())
    }

    pub(crate) fn from_lookup(
        oauth: &OAuthConfig,
        refresh: &RefreshConfig,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Option<Self> {
        let client_id = lookup("TOKENWARDEN_OAUTH_CLIENT_ID").filter(|v| !v.is_empty())?;
        let client_secret = lookup("TOKENWARDEN_OAUTH_CLIENT_SECRET").filter(|v| !v.is_empty())?;

        Some(Self {
            token_url: oauth.token_url.clone(),
            client_id,
            client_secret,
            token_lifetime: refresh.token_lifetime(),
        })
    }
}

impl fmt::Debug for OAuthProviderConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OAuthProviderConfig")
            .field("token_url", &self.token_url)
            .field("client_id", &self.client_id)
            .field("client_secret", &"<redacted>")
            .field("token_lifetime", &self.token_lifetime)
            .finish()
    }
}
