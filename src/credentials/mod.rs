//! Encrypted credential storage for delegated OAuth tokens.
//!
//! One record per principal holds the encrypted access/refresh token pair
//! plus plaintext metadata (expiry, scope, installation reference).
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │       CredentialManager                  │
//! │  - decrypt, decide, refresh, persist     │
//! └─────────────────────────────────────────┘
//!          ↓                    ↑
//!    (encrypt)            (decrypt)
//!          ↓                    ↑
//! ┌─────────────────────────────────────────┐
//! │       TokenCipher                        │
//! │  - AES-256-GCM                           │
//! │  - Fresh nonce per token                 │
//! └─────────────────────────────────────────┘
//!          ↓                    ↑
//! ┌─────────────────────────────────────────┐
//! │       CredentialStore                    │
//! │  - Opaque encrypted fields only          │
//! │  - Upsert keyed by principal             │
//! └─────────────────────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```no_run
//! use tokenwarden::credentials::{CredentialStore, SqliteCredentialStore, TokenCipher};
//! use tokenwarden::credentials::CredentialRecord;
//! use chrono::{Duration, Utc};
//!
//! # fn main() -> anyhow::Result<()> {
//! let cipher = TokenCipher::from_base64_key(&std::env::var("TOKENWARDEN_ENCRYPTION_KEY")?)?;
//! let store = SqliteCredentialStore::new("credentials.db")?;
//!
//! let now = Utc::now();
//! store.upsert(&CredentialRecord {
//!     principal_id: "user1".to_string(),
//!     access_token: Some(cipher.encrypt("ghu_access")?),
//!     refresh_token: Some(cipher.encrypt("ghr_refresh")?),
//!     expires_at: now + Duration::hours(8),
//!     scope: "repo read:user".to_string(),
//!     installation_id: None,
//!     updated_at: now,
//! })?;
//!
//! if let Some(record) = store.get("user1")? {
//!     let access = cipher.decrypt(record.access_token.as_ref().unwrap())?;
//!     println!("token length: {}", access.len());
//! }
//! # Ok(())
//! # }
//! ```
//!
//! # Security
//!
//! - All tokens encrypted at rest with AES-256-GCM
//! - Each token has a unique nonce (generated inside the cipher)
//! - Master key must be 32 bytes (256 bits), held in memory only
//! - Authenticated encryption (tampering detected)
//! - The store never sees plaintext tokens

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

mod encryption;
pub mod expiry;
mod memory;
mod storage;

pub use encryption::{validate_key, TokenCipher};
pub use expiry::{expiry_after, is_refresh_due, DEFAULT_REFRESH_BUFFER_SECS};
pub use memory::MemoryCredentialStore;
pub use storage::{CredentialStore, SqliteCredentialStore};

/// One encrypted token as persisted: all three fields base64-encoded.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptedToken {
    pub ciphertext: String,
    pub iv: String,
    pub auth_tag: String,
}

/// Persisted credential for one principal.
///
/// A token whose encryption fields were only partially stored is read back
/// as `None`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CredentialRecord {
    pub principal_id: String,
    pub access_token: Option<EncryptedToken>,
    pub refresh_token: Option<EncryptedToken>,
    pub expires_at: DateTime<Utc>,
    /// Space-delimited grant scope, opaque here.
    pub scope: String,
    /// Durable installation reference; survives invalidation.
    pub installation_id: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl CredentialRecord {
    /// True when a non-empty installation reference is attached.
    pub fn has_installation(&self) -> bool {
        self.installation_id
            .as_deref()
            .is_some_and(|id| !id.is_empty())
    }
}

/// Decrypted, usable credential handed to consumers.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential {
    pub principal_id: String,
    pub access_token: String,
    pub refresh_token: String,
    pub expires_at: DateTime<Utc>,
    pub scope: String,
    pub installation_id: Option<String>,
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("principal_id", &self.principal_id)
            .field("access_token", &"<redacted>")
            .field("refresh_token", &"<redacted>")
            .field("expires_at", &self.expires_at)
            .field("scope", &self.scope)
            .field("installation_id", &self.installation_id)
            .finish()
    }
}

/// Fresh token pair returned by the authorization server.
#[derive(Clone, PartialEq, Eq)]
pub struct TokenGrant {
    pub access_token: String,
    pub refresh_token: String,
    pub expires_at: DateTime<Utc>,
    /// `None` when the server did not echo a scope.
    pub scope: Option<String>,
}

impl fmt::Debug for TokenGrant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenGrant")
            .field("access_token", &"<redacted>")
            .field("refresh_token", &"<redacted>")
            .field("expires_at", &self.expires_at)
            .field("scope", &self.scope)
            .finish()
    }
}

/// UI-facing connection status.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CredentialStatus {
    /// A usable token is available.
    Valid,
    /// The principal was connected (installation kept) but must reconnect.
    Expired,
    /// Never connected, or nothing worth keeping.
    NoToken,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_serialization() {
        assert_eq!(serde_json::to_string(&CredentialStatus::Valid).unwrap(), "\"valid\"");
        assert_eq!(serde_json::to_string(&CredentialStatus::Expired).unwrap(), "\"expired\"");
        assert_eq!(serde_json::to_string(&CredentialStatus::NoToken).unwrap(), "\"no_token\"");
    }

    #[test]
    fn test_credential_debug_is_redacted() {
        let credential = Credential {
            principal_id: "user1".to_string(),
            access_token: "ghu_secret".to_string(),
            refresh_token: "ghr_secret".to_string(),
            expires_at: Utc::now(),
            scope: "repo".to_string(),
            installation_id: None,
        };

        let debug = format!("{:?}", credential);
        assert!(debug.contains("user1"));
        assert!(!debug.contains("ghu_secret"));
        assert!(!debug.contains("ghr_secret"));
    }

    #[test]
    fn test_empty_installation_id_is_not_an_installation() {
        let mut record = CredentialRecord {
            principal_id: "user1".to_string(),
            access_token: None,
            refresh_token: None,
            expires_at: Utc::now(),
            scope: String::new(),
            installation_id: Some(String::new()),
            updated_at: Utc::now(),
        };
        assert!(!record.has_installation());

        record.installation_id = Some("inst-1".to_string());
        assert!(record.has_installation());

        record.installation_id = None;
        assert!(!record.has_installation());
    }
}
