//! Credential lifecycle: fetch, decrypt, decide, refresh, persist.
//!
//! Per-request state machine for one principal:
//!
//! ```text
//! ABSENT           no record                      -> None / no_token
//! CORRUPT          decrypt failed, fields missing -> None / no_token
//! INVALIDATED      sentinel-empty tokens          -> None / expired|no_token
//! VALID            not due for refresh            -> credential as stored
//! DUE              due for refresh                -> refresh
//!   REFRESH_OK       re-encrypt, persist          -> new credential
//!   REFRESH_FAIL     invalidate                   -> None / expired|no_token
//!   transient        record untouched             -> Err(Unavailable)
//! ```
//!
//! Refresh is reactive only: there is no background sweep.


use crate::credentials::{
    is_refresh_due, Credential, CredentialRecord, CredentialStatus, CredentialStore, TokenCipher,
    TokenGrant, DEFAULT_REFRESH_BUFFER_SECS,
};
use crate::config::RefreshConfig;
use crate::error::{CredentialError, DecryptionError, RefreshError};
use crate::oauth::RefreshClient;
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use std::sync::Arc;
use token_registry::TokenPresence;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Plaintext written over both tokens on invalidation.
const INVALIDATED_SENTINEL: &str = "";

/// Tuning for the lifecycle manager.
#[derive(Clone, Debug)]
pub struct ManagerSettings {
    /// Refresh once `now > expires_at - refresh_buffer`.
    pub refresh_buffer: Duration,
    /// Upper bound on one refresh exchange; expiry counts as a network error.
    pub refresh_timeout: std::time::Duration,
    /// Serialise concurrent refreshes for one principal within this process.
    pub single_flight: bool,
}

impl Default for ManagerSettings {
    fn default() -> Self {
        Self {
            refresh_buffer: Duration::seconds(DEFAULT_REFRESH_BUFFER_SECS),
            refresh_timeout: std::time::Duration::from_secs(10),
            single_flight: true,
        }
    }
}

impl ManagerSettings {
    pub fn from_config(config: &RefreshConfig) -> Self {
        Self {
            refresh_buffer: config.buffer(),
            refresh_timeout: config.timeout(),
            single_flight: config.single_flight,
        }
    }
}

/// How a credential is made unusable.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Invalidation {
    /// Tokens overwritten with the sentinel; installation reference kept.
    PreserveInstallation,
    /// Nothing durable to keep; record removed.
    Delete,
}

impl Invalidation {
    pub fn for_record(record: &CredentialRecord) -> Self {
        if record.has_installation() {
            Invalidation::PreserveInstallation
        } else {
            Invalidation::Delete
        }
    }
}

/// What one pass over a principal's record found.
#[derive(Debug)]
enum Resolution {
    Absent,
    Corrupt,
    Invalidated { has_installation: bool },
    Valid(Credential),
    Refreshed(Credential),
    RefreshRejected(Invalidation),
}

impl Resolution {
    fn into_credential(self) -> Option<Credential> {
        match self {
            Resolution::Valid(credential) | Resolution::Refreshed(credential) => Some(credential),
            _ => None,
        }
    }

    fn status(&self) -> CredentialStatus {
        match self {
            Resolution::Valid(_) | Resolution::Refreshed(_) => CredentialStatus::Valid,
            Resolution::Invalidated {
                has_installation: true,
            }
            | Resolution::RefreshRejected(Invalidation::PreserveInstallation) => {
                CredentialStatus::Expired
            }
            _ => CredentialStatus::NoToken,
        }
    }
}

/// Outcome of re-reading a record under the refresh lock.
enum Recheck {
    Due(CredentialRecord, Credential),
    Settled(Resolution),
}

/// Decrypted view of a stored record, before the refresh decision.
enum Observed {
    Corrupt(DecryptionError),
    Invalidated,
    Usable(Credential),
}

/// Orchestrates storage, encryption and refresh for delegated credentials.
///
/// Cheap to clone; clones share the store, refresh client and locks.
#[derive(Clone)]
pub struct CredentialManager {
    store: Arc<dyn CredentialStore>,
    refresher: Arc<dyn RefreshClient>,
    cipher: TokenCipher,
    settings: ManagerSettings,
    refresh_locks: Arc<DashMap<String, Arc<Mutex<()>>>>,
}

impl CredentialManager {
    pub fn new(
        store: Arc<dyn CredentialStore>,
        refresher: Arc<dyn RefreshClient>,
        cipher: TokenCipher,
        settings: ManagerSettings,
    ) -> Self {
        Self {
            store,
            refresher,
            cipher,
            settings,
            refresh_locks: Arc::new(DashMap::new()),
        }
    }

    /// Returns a credential that is not due for refresh, refreshing it first
    /// when needed.
    ///
    /// `Ok(None)` means the principal must re-authorize (absent, corrupt,
    /// invalidated, or the refresh was rejected). Transient refresh failures
    /// and store failures are errors and leave the record untouched.
    pub async fn get_valid_credential(
        &self,
        principal_id: &str,
    ) -> Result<Option<Credential>, CredentialError> {
        Ok(self.resolve(principal_id).await?.into_credential())
    }

    /// Reports `valid`, `expired` or `no_token`, refreshing if needed.
    ///
    /// `expired` means a record with an installation reference exists but its
    /// tokens are invalidated or could not be refreshed.
    pub async fn get_credential_status(
        &self,
        principal_id: &str,
    ) -> Result<CredentialStatus, CredentialError> {
        Ok(self.resolve(principal_id).await?.status())
    }

    /// Forces invalidation. Returns the transition applied, or `None` when
    /// there was no record.
    pub async fn invalidate(
        &self,
        principal_id: &str,
    ) -> Result<Option<Invalidation>, CredentialError> {
        let Some(record) = self.load(principal_id)? else {
            return Ok(None);
        };

        let transition = self.apply_invalidation(&record)?;
        info!(principal_id = %principal_id, ?transition, "Credential invalidated on request");
        Ok(Some(transition))
    }

    /// Deletes the record outright, installation reference included.
    pub async fn disconnect(&self, principal_id: &str) -> Result<bool, CredentialError> {
        let deleted = self
            .store
            .delete(principal_id)
            .map_err(CredentialError::Store)?;

        if deleted {
            info!(principal_id = %principal_id, "Credential disconnected");
        }
        Ok(deleted)
    }

    /// Stores the result of a successful authorization exchange.
    ///
    /// With `installation_id = None` an existing installation reference is
    /// kept, so reconnecting does not lose it.
    pub async fn save_grant(
        &self,
        principal_id: &str,
        grant: TokenGrant,
        installation_id: Option<String>,
    ) -> Result<(), CredentialError> {
        let installation_id = match installation_id {
            Some(id) => Some(id),
            None => self
                .load(principal_id)?
                .and_then(|existing| existing.installation_id),
        };

        let credential = Credential {
            principal_id: principal_id.to_string(),
            access_token: grant.access_token,
            refresh_token: grant.refresh_token,
            expires_at: grant.expires_at,
            scope: grant.scope.unwrap_or_default(),
            installation_id,
        };

        self.persist(&credential, Utc::now())?;
        info!(
            principal_id = %principal_id,
            expires_at = %credential.expires_at,
            "Credential stored"
        );
        Ok(())
    }

    /// Store-only presence check: no decryption, no network.
    pub async fn token_presence(&self, principal_id: &str) -> Result<TokenPresence, CredentialError> {
        Ok(match self.load(principal_id)? {
            Some(record) => TokenPresence {
                had_tokens: true,
                has_installation_id: record.has_installation(),
            },
            None => TokenPresence::default(),
        })
    }

    async fn resolve(&self, principal_id: &str) -> Result<Resolution, CredentialError> {
        let Some(record) = self.load(principal_id)? else {
            debug!(principal_id = %principal_id, "No credential stored");
            return Ok(Resolution::Absent);
        };

        let credential = match self.observe(&record) {
            Observed::Usable(credential) => credential,
            other => return Ok(self.unusable(&record, other)),
        };

        if !is_refresh_due(credential.expires_at, Utc::now(), self.settings.refresh_buffer) {
            return Ok(Resolution::Valid(credential));
        }

        self.refresh_due(record, credential).await
    }

    /// Runs the refresh in its own task so a cancelled caller does not abandon
    /// a token rotation half way.
    async fn refresh_due(
        &self,
        record: CredentialRecord,
        credential: Credential,
    ) -> Result<Resolution, CredentialError> {
        let principal_id = record.principal_id.clone();
        let mut record = record;
        let mut credential = credential;

        let guard = if self.settings.single_flight {
            let guard = self.refresh_lock(&principal_id).lock_owned().await;

            let settled = match self.recheck(&principal_id) {
                Ok(Recheck::Due(latest, current)) => {
                    record = latest;
                    credential = current;
                    None
                }
                Ok(Recheck::Settled(resolution)) => Some(Ok(resolution)),
                Err(err) => Some(Err(err)),
            };
            if let Some(result) = settled {
                drop(guard);
                self.release_refresh_lock(&principal_id);
                return result;
            }
            Some(guard)
        } else {
            None
        };

        let manager = self.clone();
        let task = tokio::spawn(async move {
            let result = manager.rotate(record, credential).await;
            if let Some(guard) = guard {
                drop(guard);
                manager.release_refresh_lock(&principal_id);
            }
            result
        });

        task.await?
    }

    /// Re-reads the record after waiting for the refresh lock; another
    /// caller may have rotated the token in the meantime.
    fn recheck(&self, principal_id: &str) -> Result<Recheck, CredentialError> {
        let Some(latest) = self.load(principal_id)? else {
            return Ok(Recheck::Settled(Resolution::Absent));
        };

        Ok(match self.observe(&latest) {
            Observed::Usable(current)
                if !is_refresh_due(current.expires_at, Utc::now(), self.settings.refresh_buffer) =>
            {
                debug!(principal_id = %principal_id, "Credential refreshed concurrently");
                Recheck::Settled(Resolution::Valid(current))
            }
            Observed::Usable(current) => Recheck::Due(latest, current),
            other => Recheck::Settled(self.unusable(&latest, other)),
        })
    }

    async fn rotate(
        &self,
        record: CredentialRecord,
        credential: Credential,
    ) -> Result<Resolution, CredentialError> {
        let principal_id = record.principal_id.as_str();
        info!(
            principal_id = %principal_id,
            expires_at = %credential.expires_at,
            "Refreshing credential"
        );

        let attempt = tokio::time::timeout(
            self.settings.refresh_timeout,
            self.refresher.refresh(&credential.refresh_token),
        )
        .await
        .unwrap_or_else(|_| Err(RefreshError::Network("token refresh timed out".to_string())));

        match attempt {
            Ok(grant) => {
                let refreshed = Credential {
                    access_token: grant.access_token,
                    refresh_token: grant.refresh_token,
                    expires_at: grant.expires_at,
                    scope: grant.scope.unwrap_or(credential.scope),
                    ..credential
                };
                self.persist(&refreshed, Utc::now())?;

                // Rotation is kept, but a token already inside the buffer is
                // never handed out
                if is_refresh_due(refreshed.expires_at, Utc::now(), self.settings.refresh_buffer) {
                    warn!(
                        principal_id = %principal_id,
                        expires_at = %refreshed.expires_at,
                        "Refreshed credential expires within the refresh buffer"
                    );
                    return Err(CredentialError::Unavailable(RefreshError::InvalidResponse(
                        "refreshed token expires within the refresh buffer".to_string(),
                    )));
                }

                info!(
                    principal_id = %principal_id,
                    expires_at = %refreshed.expires_at,
                    "Credential refreshed"
                );
                Ok(Resolution::Refreshed(refreshed))
            }
            Err(err) if err.is_terminal() => {
                warn!(principal_id = %principal_id, error = %err, "Refresh rejected, invalidating credential");
                let transition = self.apply_invalidation(&record)?;
                Ok(Resolution::RefreshRejected(transition))
            }
            Err(err) => {
                warn!(principal_id = %principal_id, error = %err, "Refresh failed, credential left unchanged");
                Err(CredentialError::Unavailable(err))
            }
        }
    }

    fn observe(&self, record: &CredentialRecord) -> Observed {
        match self.open(record) {
            Ok((access_token, refresh_token)) => {
                if access_token == INVALIDATED_SENTINEL || refresh_token == INVALIDATED_SENTINEL {
                    return Observed::Invalidated;
                }
                Observed::Usable(Credential {
                    principal_id: record.principal_id.clone(),
                    access_token,
                    refresh_token,
                    expires_at: record.expires_at,
                    scope: record.scope.clone(),
                    installation_id: record.installation_id.clone(),
                })
            }
            Err(err) => Observed::Corrupt(err),
        }
    }

    fn unusable(&self, record: &CredentialRecord, observed: Observed) -> Resolution {
        match observed {
            Observed::Corrupt(err) => {
                warn!(
                    principal_id = %record.principal_id,
                    error = %err,
                    "Stored credential unreadable, treating as absent"
                );
                Resolution::Corrupt
            }
            Observed::Invalidated => Resolution::Invalidated {
                has_installation: record.has_installation(),
            },
            Observed::Usable(credential) => Resolution::Valid(credential),
        }
    }

    fn open(&self, record: &CredentialRecord) -> Result<(String, String), DecryptionError> {
        let access = record
            .access_token
            .as_ref()
            .ok_or(DecryptionError::Incomplete)?;
        let refresh = record
            .refresh_token
            .as_ref()
            .ok_or(DecryptionError::Incomplete)?;

        Ok((self.cipher.decrypt(access)?, self.cipher.decrypt(refresh)?))
    }

    fn apply_invalidation(&self, record: &CredentialRecord) -> Result<Invalidation, CredentialError> {
        let transition = Invalidation::for_record(record);

        match transition {
            Invalidation::PreserveInstallation => {
                let now = Utc::now();
                let sentinel = CredentialRecord {
                    access_token: Some(self.cipher.encrypt(INVALIDATED_SENTINEL)?),
                    refresh_token: Some(self.cipher.encrypt(INVALIDATED_SENTINEL)?),
                    expires_at: now,
                    updated_at: now,
                    ..record.clone()
                };
                self.store.upsert(&sentinel).map_err(CredentialError::Store)?;
            }
            Invalidation::Delete => {
                self.store
                    .delete(&record.principal_id)
                    .map_err(CredentialError::Store)?;
            }
        }

        Ok(transition)
    }

    fn persist(&self, credential: &Credential, now: DateTime<Utc>) -> Result<(), CredentialError> {
        let record = CredentialRecord {
            principal_id: credential.principal_id.clone(),
            access_token: Some(self.cipher.encrypt(&credential.access_token)?),
            refresh_token: Some(self.cipher.encrypt(&credential.refresh_token)?),
            expires_at: credential.expires_at,
            scope: credential.scope.clone(),
            installation_id: credential.installation_id.clone(),
            updated_at: now,
        };

        self.store.upsert(&record).map_err(CredentialError::Store)
    }

    fn load(&self, principal_id: &str) -> Result<Option<CredentialRecord>, CredentialError> {
        self.store.get(principal_id).map_err(|err| {
            tracing::error!(principal_id = %principal_id, error = ?err, "Credential store read failed");
            CredentialError::Store(err)
        })
    }

    /// Drops the principal's lock entry once no caller holds or waits on it.
    fn release_refresh_lock(&self, principal_id: &str) {
        self.refresh_locks
            .remove_if(principal_id, |_, lock| Arc::strong_count(lock) == 1);
    }

    fn refresh_lock(&self, principal_id: &str) -> Arc<Mutex<()>> {
        self.refresh_locks
            .entry(principal_id.to_string())
            .or_default()
            .clone()
    }
}
