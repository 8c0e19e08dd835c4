use anyhow::{ensure, Context, Result};
use chrono::Duration;
use serde::Deserialize;

use crate::credentials::DEFAULT_REFRESH_BUFFER_SECS;
use crate::oauth::DEFAULT_TOKEN_URL;

/// Complete tokenwarden configuration.
///
/// Secrets (encryption key, OAuth client secret, static token, admin token)
/// are never read from the file, only from the environment.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct WardenConfig {
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub refresh: RefreshConfig,
    #[serde(default)]
    pub oauth: OAuthConfig,
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub fallback: FallbackConfig,
}

/// Credential database location
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    /// SQLite file path, or ":memory:"
    #[serde(default = "default_db_path")]
    pub db_path: String,
}

fn default_db_path() -> String {
    "credentials.db".to_string()
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
        }
    }
}

/// Token refresh timing
#[derive(Debug, Clone, Deserialize)]
pub struct RefreshConfig {
    /// Refresh this many seconds before expiry
    #[serde(default = "default_buffer_seconds")]
    pub buffer_seconds: i64,
    /// Lifetime assumed when the token endpoint omits `expires_in`
    #[serde(default = "default_token_lifetime_seconds")]
    pub token_lifetime_seconds: i64,
    /// Upper bound on one refresh exchange
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: u64,
    /// Serialise concurrent refreshes for the same principal in-process
    #[serde(default = "default_single_flight")]
    pub single_flight: bool,
}

fn default_buffer_seconds() -> i64 {
    DEFAULT_REFRESH_BUFFER_SECS
}

fn default_token_lifetime_seconds() -> i64 {
    8 * 60 * 60
}

fn default_timeout_seconds() -> u64 {
    10
}

fn default_single_flight() -> bool {
    true
}

impl Default for RefreshConfig {
    fn default() -> Self {
        Self {
            buffer_seconds: default_buffer_seconds(),
            token_lifetime_seconds: default_token_lifetime_seconds(),
            timeout_seconds: default_timeout_seconds(),
            single_flight: default_single_flight(),
        }
    }
}

impl RefreshConfig {
    pub fn buffer(&self) -> Duration {
        Duration::seconds(self.buffer_seconds)
    }

    pub fn token_lifetime(&self) -> Duration {
        Duration::seconds(self.token_lifetime_seconds)
    }

    pub fn timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.timeout_seconds)
    }
}

/// Authorization server endpoint
#[derive(Debug, Clone, Deserialize)]
pub struct OAuthConfig {
    #[serde(default = "default_token_url")]
    pub token_url: String,
}

fn default_token_url() -> String {
    DEFAULT_TOKEN_URL.to_string()
}

impl Default for OAuthConfig {
    fn default() -> Self {
        Self {
            token_url: default_token_url(),
        }
    }
}

/// Internal HTTP API
#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_port() -> u16 {
    3001
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
        }
    }
}

/// Static pre-shared token policy (local development)
#[derive(Debug, Clone, Default, Deserialize)]
pub struct FallbackConfig {
    /// Allow `TOKENWARDEN_STATIC_TOKEN` to bypass stored credentials
    #[serde(default)]
    pub allow_static_token: bool,
}

impl WardenConfig {
    /// Applies `TOKENWARDEN_*` overrides from the process environment.
    pub fn apply_env(&mut self) {
        self.apply_overrides(|name| std::env::var(name).ok());
    }

    /// Applies overrides from `lookup`. Values that fail to parse are
    /// ignored and the current setting is kept.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(v) = lookup("TOKENWARDEN_DB_PATH") {
            self.storage.db_path = v;
        }
        if let Some(v) = lookup("TOKENWARDEN_REFRESH_BUFFER_SECONDS") {
            if let Ok(n) = v.parse::<i64>() {
                self.refresh.buffer_seconds = n;
            }
        }
        if let Some(v) = lookup("TOKENWARDEN_TOKEN_LIFETIME_SECONDS") {
            if let Ok(n) = v.parse::<i64>() {
                self.refresh.token_lifetime_seconds = n;
            }
        }
        if let Some(v) = lookup("TOKENWARDEN_REFRESH_TIMEOUT_SECONDS") {
            if let Ok(n) = v.parse::<u64>() {
                self.refresh.timeout_seconds = n;
            }
        }
        if let Some(v) = lookup("TOKENWARDEN_TOKEN_URL") {
            self.oauth.token_url = v;
        }
        if let Some(v) = lookup("TOKENWARDEN_API_PORT") {
            if let Ok(n) = v.parse::<u16>() {
                self.api.port = n;
            }
        }
        if let Some(v) = lookup("TOKENWARDEN_ALLOW_STATIC_TOKEN") {
            if let Ok(b) = v.parse::<bool>() {
                self.fallback.allow_static_token = b;
            }
        }
    }
}

/// Upper bound on the refresh buffer (1 day).
const MAX_BUFFER_SECONDS: i64 = 24 * 60 * 60;
/// Upper bound on the assumed token lifetime (1 year).
const MAX_TOKEN_LIFETIME_SECONDS: i64 = 365 * 24 * 60 * 60;
/// Upper bound on one refresh exchange.
const MAX_TIMEOUT_SECONDS: u64 = 300;

impl WardenConfig {
    /// Rejects refresh timings that are out of range or contradictory.
    pub fn validate(&self) -> Result<()> {
        let refresh = &self.refresh;
        ensure!(
            (0..=MAX_BUFFER_SECONDS).contains(&refresh.buffer_seconds),
            "refresh.buffer_seconds must be between 0 and {}, got {}",
            MAX_BUFFER_SECONDS,
            refresh.buffer_seconds
        );
        ensure!(
            (1..=MAX_TOKEN_LIFETIME_SECONDS).contains(&refresh.token_lifetime_seconds),
            "refresh.token_lifetime_seconds must be between 1 and {}, got {}",
            MAX_TOKEN_LIFETIME_SECONDS,
            refresh.token_lifetime_seconds
        );
        ensure!(
            refresh.token_lifetime_seconds > refresh.buffer_seconds,
            "refresh.token_lifetime_seconds ({}) must exceed refresh.buffer_seconds ({})",
            refresh.token_lifetime_seconds,
            refresh.buffer_seconds
        );
        ensure!(
            (1..=MAX_TIMEOUT_SECONDS).contains(&refresh.timeout_seconds),
            "refresh.timeout_seconds must be between 1 and {}, got {}",
            MAX_TIMEOUT_SECONDS,
            refresh.timeout_seconds
        );
        Ok(())
    }
}

/// Loads configuration from a TOML file (or defaults when `path` is None),
/// then applies environment overrides and validates the result.
pub fn load_config(path: Option<&str>) -> Result<WardenConfig> {
    let mut config = match path {
        Some(path) => {
            let contents = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file {}", path))?;
            toml::from_str(&contents)
                .with_context(|| format!("Failed to parse config file {}", path))?
        }
        None => WardenConfig::default(),
    };

    config.apply_env();
    config.validate().context("Invalid configuration")?;
    Ok(config)
}
