//! Credential persistence.
//!
//! The store moves opaque encrypted fields plus plaintext metadata. It never
//! decrypts anything.

use super::{CredentialRecord, EncryptedToken};
use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

/// Durable record store keyed by principal.
///
/// `upsert` is insert-or-replace and must be atomic per principal
/// (last write wins).
pub trait CredentialStore: Send + Sync {
    fn upsert(&self, record: &CredentialRecord) -> Result<()>;

    fn get(&self, principal_id: &str) -> Result<Option<CredentialRecord>>;

    /// Returns true when a record was removed.
    fn delete(&self, principal_id: &str) -> Result<bool>;
}

/// Credential storage backed by SQLite.
///
/// # Schema
/// ```sql
/// CREATE TABLE credentials (
///     principal_id TEXT PRIMARY KEY,
///     access_token_ciphertext TEXT,    -- base64
///     access_token_iv TEXT,            -- base64, 12 bytes
///     access_token_auth_tag TEXT,      -- base64, 16 bytes
///     refresh_token_ciphertext TEXT,
///     refresh_token_iv TEXT,
///     refresh_token_auth_tag TEXT,
///     expires_at TEXT NOT NULL,        -- RFC 3339
///     scope TEXT NOT NULL,
///     installation_id TEXT,
///     created_at TEXT NOT NULL,        -- RFC 3339
///     updated_at TEXT NOT NULL         -- RFC 3339
/// );
/// ```
///
/// # Thread Safety
/// - Connection is wrapped in Mutex for safe concurrent access
/// - Upsert is a single statement, so concurrent writers for the same
///   principal never interleave fields
pub struct SqliteCredentialStore {
    conn: Mutex<Connection>,
}

impl SqliteCredentialStore {
    /// Creates or opens a credential store. `":memory:"` opens a private
    /// in-memory database.
    pub fn new<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        let db_path = db_path.as_ref();
        let conn = Connection::open(db_path)
            .with_context(|| format!("Failed to open credential DB at {}", db_path.display()))?;

        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS credentials (
                principal_id TEXT PRIMARY KEY,
                access_token_ciphertext TEXT,
                access_token_iv TEXT,
                access_token_auth_tag TEXT,
                refresh_token_ciphertext TEXT,
                refresh_token_iv TEXT,
                refresh_token_auth_tag TEXT,
                expires_at TEXT NOT NULL,
                scope TEXT NOT NULL DEFAULT '',
                installation_id TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );
            "#,
        )
        .context("Failed to create credentials table")?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| anyhow!("Credential store connection lock poisoned"))
    }
}

impl CredentialStore for SqliteCredentialStore {
    fn upsert(&self, record: &CredentialRecord) -> Result<()> {
        let (access_ciphertext, access_iv, access_tag) = split_token(&record.access_token);
        let (refresh_ciphertext, refresh_iv, refresh_tag) = split_token(&record.refresh_token);
        let updated_at = record.updated_at.to_rfc3339();

        self.conn()?
            .execute(
                r#"
                INSERT INTO credentials (
                    principal_id,
                    access_token_ciphertext, access_token_iv, access_token_auth_tag,
                    refresh_token_ciphertext, refresh_token_iv, refresh_token_auth_tag,
                    expires_at, scope, installation_id, created_at, updated_at
                )
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?11)
                ON CONFLICT(principal_id) DO UPDATE SET
                    access_token_ciphertext = excluded.access_token_ciphertext,
                    access_token_iv = excluded.access_token_iv,
                    access_token_auth_tag = excluded.access_token_auth_tag,
                    refresh_token_ciphertext = excluded.refresh_token_ciphertext,
                    refresh_token_iv = excluded.refresh_token_iv,
                    refresh_token_auth_tag = excluded.refresh_token_auth_tag,
                    expires_at = excluded.expires_at,
                    scope = excluded.scope,
                    installation_id = excluded.installation_id,
                    updated_at = excluded.updated_at
                "#,
                params![
                    record.principal_id,
                    access_ciphertext,
                    access_iv,
                    access_tag,
                    refresh_ciphertext,
                    refresh_iv,
                    refresh_tag,
                    record.expires_at.to_rfc3339(),
                    record.scope,
                    record.installation_id,
                    updated_at,
                ],
            )
            .context("Failed to store credential")?;

        Ok(())
    }

    fn get(&self, principal_id: &str) -> Result<Option<CredentialRecord>> {
        let conn = self.conn()?;
        let row = conn
            .query_row(
                r#"
                SELECT principal_id,
                       access_token_ciphertext, access_token_iv, access_token_auth_tag,
                       refresh_token_ciphertext, refresh_token_iv, refresh_token_auth_tag,
                       expires_at, scope, installation_id, updated_at
                FROM credentials
                WHERE principal_id = ?1
                "#,
                params![principal_id],
                RawRecord::from_row,
            )
            .optional()
            .context("Failed to read credential")?;

        row.map(RawRecord::into_record).transpose()
    }

    fn delete(&self, principal_id: &str) -> Result<bool> {
        let rows_affected = self
            .conn()?
            .execute(
                "DELETE FROM credentials WHERE principal_id = ?1",
                params![principal_id],
            )
            .context("Failed to delete credential")?;

        Ok(rows_affected > 0)
    }
}

/// Row as read from SQLite, before timestamps are parsed.
struct RawRecord {
    principal_id: String,
    access_token: Option<EncryptedToken>,
    refresh_token: Option<EncryptedToken>,
    expires_at: String,
    scope: String,
    installation_id: Option<String>,
    updated_at: String,
}

impl RawRecord {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            principal_id: row.get(0)?,
            access_token: join_token(row.get(1)?, row.get(2)?, row.get(3)?),
            refresh_token: join_token(row.get(4)?, row.get(5)?, row.get(6)?),
            expires_at: row.get(7)?,
            scope: row.get(8)?,
            installation_id: row.get(9)?,
            updated_at: row.get(10)?,
        })
    }

    fn into_record(self) -> Result<CredentialRecord> {
        Ok(CredentialRecord {
            expires_at: parse_timestamp(&self.expires_at).context("Failed to parse expires_at")?,
            updated_at: parse_timestamp(&self.updated_at).context("Failed to parse updated_at")?,
            principal_id: self.principal_id,
            access_token: self.access_token,
            refresh_token: self.refresh_token,
            scope: self.scope,
            installation_id: self.installation_id,
        })
    }
}

fn split_token(token: &Option<EncryptedToken>) -> (Option<&str>, Option<&str>, Option<&str>) {
    match token {
        Some(t) => (
            Some(t.ciphertext.as_str()),
            Some(t.iv.as_str()),
            Some(t.auth_tag.as_str()),
        ),
        None => (None, None, None),
    }
}

/// All three fields or nothing: partial state is no usable token.
fn join_token(
    ciphertext: Option<String>,
    iv: Option<String>,
    auth_tag: Option<String>,
) -> Option<EncryptedToken> {
    match (ciphertext, iv, auth_tag) {
        (Some(ciphertext), Some(iv), Some(auth_tag)) => Some(EncryptedToken {
            ciphertext,
            iv,
            auth_tag,
        }),
        _ => None,
    }
}

fn parse_timestamp(value: &str) -> Result<DateTime<Utc>> {
    Ok(DateTime::parse_from_rfc3339(value)?.with_timezone(&Utc))
}
