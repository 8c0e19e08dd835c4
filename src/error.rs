//! Error vocabulary for the credential lifecycle.
//!
//! Only [`CredentialError`] leaves the manager. Decryption and terminal
//! refresh failures are absorbed there and turned into "no credential" /
//! status values.

use thiserror::Error;

/// A stored token could not be opened.
#[derive(Debug, Error)]
pub enum DecryptionError {
    #[error("encrypted token is incomplete")]
    Incomplete,
    #[error("malformed {field}: {reason}")]
    Malformed { field: &'static str, reason: String },
    #[error("authentication tag did not verify (wrong key or tampered data)")]
    Authentication,
    #[error("decrypted token is not valid UTF-8")]
    InvalidUtf8,
}

/// The cipher refused to seal a plaintext.
#[derive(Debug, Error)]
#[error("token encryption failed")]
pub struct EncryptionError;

/// Outcome of a failed token refresh exchange.
#[derive(Debug, Error)]
pub enum RefreshError {
    /// The authorization server rejected the refresh token. Terminal.
    #[error("authorization server rejected refresh: {code}")]
    AuthServer {
        code: String,
        description: Option<String>,
    },
    /// Transport failure or timeout. The stored refresh token may still work.
    #[error("token endpoint unreachable: {0}")]
    Network(String),
    /// The server answered but the body was unusable.
    #[error("invalid token endpoint response: {0}")]
    InvalidResponse(String),
}

impl RefreshError {
    /// True when the refresh token is dead and the credential must be
    /// invalidated.
    pub fn is_terminal(&self) -> bool {
        matches!(self, RefreshError::AuthServer { .. })
    }
}

/// Failures the credential manager surfaces to its callers.
#[derive(Debug, Error)]
pub enum CredentialError {
    /// Reading or writing the credential store failed.
    #[error("credential store failure: {0:#}")]
    Store(anyhow::Error),

    /// Refresh could not complete for a transient reason.
    #[error("credential temporarily unavailable: {0}")]
    Unavailable(#[source] RefreshError),

    #[error(transparent)]
    Encryption(#[from] EncryptionError),

    #[error("refresh task failed: {0}")]
    RefreshTask(#[from] tokio::task::JoinError),
}

impl CredentialError {
    /// True for failures that warrant "try again" rather than "reconnect".
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            CredentialError::Store(_) | CredentialError::Unavailable(_)
        )
    }
}
