//! Refresh-token grant.

use super::OAuthProviderConfig;
use crate::credentials::{expiry_after, TokenGrant};
use crate::error::RefreshError;
use anyhow::Context;
use async_trait::async_trait;
use chrono::Utc;
use reqwest::StatusCode;
use serde::Deserialize;

/// Exchanges a refresh token for a fresh token pair.
///
/// Implementations hold no local state; the manager persists the result.
#[async_trait]
pub trait RefreshClient: Send + Sync {
    async fn refresh(&self, refresh_token: &str) -> Result<TokenGrant, RefreshError>;
}

/// Token endpoint response. Success and error bodies share one shape because
/// some servers (GitHub) report refresh errors with HTTP 200.
#[derive(Deserialize, Debug, Default)]
struct TokenEndpointResponse {
    #[serde(default)]
    access_token: Option<String>,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    expires_in: Option<i64>,
    #[serde(default)]
    scope: Option<String>,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    error_description: Option<String>,
}

/// Refresh client speaking form-encoded OAuth 2.0 over HTTPS.
pub struct HttpRefreshClient {
    provider: OAuthProviderConfig,
    http_client: reqwest::Client,
}

impl HttpRefreshClient {
    /// Creates a client whose requests give up after `timeout`.
    pub fn new(provider: OAuthProviderConfig, timeout: std::time::Duration) -> anyhow::Result<Self> {
        let http_client = reqwest::Client::builder()
            .user_agent(concat!("tokenwarden/", env!("CARGO_PKG_VERSION")))
            .timeout(timeout)
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            provider,
            http_client,
        })
    }
}

#[async_trait]
impl RefreshClient for HttpRefreshClient {
    /// POSTs `grant_type=refresh_token` to the provider's token endpoint.
    async fn refresh(&self, refresh_token: &str) -> Result<TokenGrant, RefreshError> {
        let form = [
            ("client_id", self.provider.client_id.as_str()),
            ("client_secret", self.provider.client_secret.as_str()),
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token),
        ];

        tracing::debug!(token_url = %self.provider.token_url, "Sending refresh token grant");

        let response = self
            .http_client
            .post(&self.provider.token_url)
            .header("Accept", "application/json")
            .form(&form)
            .send()
            .await
            .map_err(|e| RefreshError::Network(e.to_string()))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| RefreshError::Network(e.to_string()))?;

        if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
            return Err(RefreshError::Network(format!(
                "token endpoint returned {}",
                status
            )));
        }

        let parsed = serde_json::from_str::<TokenEndpointResponse>(&body);

        if let Ok(TokenEndpointResponse {
            error: Some(code), error_description, ..
        }) = &parsed
        {
            return Err(RefreshError::AuthServer {
                code: code.clone(),
                description: error_description.clone(),
            });
        }

        if !status.is_success() {
            return Err(RefreshError::AuthServer {
                code: format!("http_{}", status.as_u16()),
                description: Some(body).filter(|b| !b.is_empty()),
            });
        }

        let parsed = parsed.map_err(|e| RefreshError::InvalidResponse(e.to_string()))?;
        let access_token = parsed
            .access_token
            .filter(|t| !t.is_empty())
            .ok_or_else(|| RefreshError::InvalidResponse("missing access_token".to_string()))?;

        let now = Utc::now();
        let expires_at = match parsed.expires_in {
            Some(secs) => expiry_after(now, secs).ok_or_else(|| {
                RefreshError::InvalidResponse(format!("unusable expires_in: {}", secs))
            })?,
            None => now
                .checked_add_signed(self.provider.token_lifetime)
                .ok_or_else(|| {
                    RefreshError::InvalidResponse("token lifetime out of range".to_string())
                })?,
        };

        tracing::debug!(
            rotated = parsed.refresh_token.is_some(),
            expires_in = ?parsed.expires_in,
            "Refresh token grant succeeded"
        );

        Ok(TokenGrant {
            access_token,
            // Keep the existing refresh token if the provider did not rotate it
            refresh_token: parsed
                .refresh_token
                .filter(|t| !t.is_empty())
                .unwrap_or_else(|| refresh_token.to_string()),
            expires_at,
            scope: parsed.scope,
        })
    }
}
