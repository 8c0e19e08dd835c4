// End-to-end credential lifecycle against an on-disk store and a mock token endpoint

use chrono::{Duration, Utc};
use std::sync::Arc;
use tempfile::TempDir;
use tokenwarden::credentials::{
    CredentialStatus, CredentialStore, SqliteCredentialStore, TokenCipher, TokenGrant,
};
use tokenwarden::manager::{CredentialManager, ManagerSettings};
use tokenwarden::oauth::{HttpRefreshClient, OAuthProviderConfig};

const TOKEN_PATH: &str = "/login/oauth/access_token";
const KEY: [u8; 32] = [3u8; 32];

struct Setup {
    _dir: TempDir,
    db_path: std::path::PathBuf,
}

impl Setup {
    fn new() -> Self {
        let dir = TempDir::new().unwrap();
        let db_path = dir.path().join("credentials.db");
        Self { _dir: dir, db_path }
    }

    fn store(&self) -> Arc<SqliteCredentialStore> {
        Arc::new(SqliteCredentialStore::new(&self.db_path).unwrap())
    }

    fn manager(&self, server: &mockito::Server, key: &[u8]) -> CredentialManager {
        let provider = OAuthProviderConfig {
            token_url: format!("{}{}", server.url(), TOKEN_PATH),
            client_id: "Iv1.client".to_string(),
            client_secret: "client-secret".to_string(),
            token_lifetime: Duration::hours(8),
        };
        let refresher =
            HttpRefreshClient::new(provider, std::time::Duration::from_secs(5)).unwrap();

        CredentialManager::new(
            self.store(),
            Arc::new(refresher),
            TokenCipher::new(key).unwrap(),
            ManagerSettings::default(),
        )
    }
}

fn expiring_grant() -> TokenGrant {
    TokenGrant {
        access_token: "gho_old".to_string(),
        refresh_token: "ghr_old".to_string(),
        expires_at: Utc::now() + Duration::seconds(30),
        scope: Some("repo".to_string()),
    }
}

/// A due token is rotated and the rotation survives a restart.
#[tokio::test]
async fn test_refresh_rotates_and_persists() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("POST", TOKEN_PATH)
        .match_body(mockito::Matcher::UrlEncoded(
            "refresh_token".into(),
            "ghr_old".into(),
        ))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{"access_token":"gho_new","refresh_token":"ghr_new","expires_in":28800,"token_type":"bearer"}"#)
        .expect(1)
        .create_async()
        .await;

    let setup = Setup::new();
    let manager = setup.manager(&server, &KEY);
    manager
        .save_grant("alice", expiring_grant(), Some("inst-1".to_string()))
        .await
        .unwrap();

    let credential = manager.get_valid_credential("alice").await.unwrap().unwrap();
    assert_eq!(credential.access_token, "gho_new");
    assert_eq!(credential.refresh_token, "ghr_new");
    // Scope not echoed by the server: stored scope kept
    assert_eq!(credential.scope, "repo");
    assert_eq!(credential.installation_id.as_deref(), Some("inst-1"));
    mock.assert_async().await;

    // New process, same database and key: no further refresh needed
    let restarted = setup.manager(&server, &KEY);
    let credential = restarted.get_valid_credential("alice").await.unwrap().unwrap();
    assert_eq!(credential.access_token, "gho_new");
    assert_eq!(
        restarted.get_credential_status("alice").await.unwrap(),
        CredentialStatus::Valid
    );
    mock.assert_async().await;

    // Ciphertext on disk differs from the plaintext
    let record = setup.store().get("alice").unwrap().unwrap();
    let access = record.access_token.unwrap();
    assert_ne!(access.ciphertext, "gho_new");
    assert!(!access.ciphertext.contains("gho_new"));
}

/// A rejected refresh keeps the installation; reconnecting restores validity.
#[tokio::test]
async fn test_rejected_refresh_then_reconnect() {
    let mut server = mockito::Server::new_async().await;
    // GitHub reports a dead refresh token with HTTP 200
    let mock = server
        .mock("POST", TOKEN_PATH)
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{"error":"bad_refresh_token","error_description":"The refresh token passed is incorrect or expired."}"#)
        .expect(1)
        .create_async()
        .await;

    let setup = Setup::new();
    let manager = setup.manager(&server, &KEY);
    manager
        .save_grant("alice", expiring_grant(), Some("inst-1".to_string()))
        .await
        .unwrap();

    assert_eq!(
        manager.get_credential_status("alice").await.unwrap(),
        CredentialStatus::Expired
    );
    mock.assert_async().await;

    // Sentinel state: no further network calls
    assert!(manager.get_valid_credential("alice").await.unwrap().is_none());
    mock.assert_async().await;

    let presence = manager.token_presence("alice").await.unwrap();
    assert!(presence.had_tokens);
    assert!(presence.has_installation_id);
    assert!(presence.was_connected());

    // Reconnect without re-sending the installation reference
    manager
        .save_grant(
            "alice",
            TokenGrant {
                access_token: "gho_fresh".to_string(),
                refresh_token: "ghr_fresh".to_string(),
                expires_at: Utc::now() + Duration::hours(8),
                scope: None,
            },
            None,
        )
        .await
        .unwrap();

    let credential = manager.get_valid_credential("alice").await.unwrap().unwrap();
    assert_eq!(credential.access_token, "gho_fresh");
    assert_eq!(credential.installation_id.as_deref(), Some("inst-1"));
}

/// A rejected refresh with nothing durable to keep removes the record.
#[tokio::test]
async fn test_rejected_refresh_without_installation_deletes() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("POST", TOKEN_PATH)
        .with_status(400)
        .with_header("content-type", "application/json")
        .with_body(r#"{"error":"invalid_grant"}"#)
        .expect(1)
        .create_async()
        .await;

    let setup = Setup::new();
    let manager = setup.manager(&server, &KEY);
    manager.save_grant("bob", expiring_grant(), None).await.unwrap();

    assert!(manager.get_valid_credential("bob").await.unwrap().is_none());
    mock.assert_async().await;

    assert!(setup.store().get("bob").unwrap().is_none());
    assert_eq!(
        manager.get_credential_status("bob").await.unwrap(),
        CredentialStatus::NoToken
    );
}

/// Rotating the encryption key makes old records unreadable but harmless.
#[tokio::test]
async fn test_key_rotation_reads_as_absent() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("POST", TOKEN_PATH)
        .expect(0)
        .create_async()
        .await;

    let setup = Setup::new();
    setup
        .manager(&server, &KEY)
        .save_grant("alice", expiring_grant(), Some("inst-1".to_string()))
        .await
        .unwrap();

    let rotated = setup.manager(&server, &[9u8; 32]);
    assert!(rotated.get_valid_credential("alice").await.unwrap().is_none());
    assert_eq!(
        rotated.get_credential_status("alice").await.unwrap(),
        CredentialStatus::NoToken
    );
    mock.assert_async().await;

    // Record is left in place for an operator to inspect
    assert!(setup.store().get("alice").unwrap().is_some());
}

/// An already-expired token from the endpoint is never handed out.
#[tokio::test]
async fn test_negative_expires_in_is_not_returned() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("POST", TOKEN_PATH)
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{"access_token":"gho_new","expires_in":-3600}"#)
        .expect(1)
        .create_async()
        .await;

    let setup = Setup::new();
    let manager = setup.manager(&server, &KEY);
    manager
        .save_grant("alice", expiring_grant(), Some("inst-1".to_string()))
        .await
        .unwrap();
    let before = setup.store().get("alice").unwrap();

    let err = manager.get_valid_credential("alice").await.unwrap_err();
    assert!(err.is_transient());
    mock.assert_async().await;

    // Transient: record untouched, installation kept
    assert_eq!(setup.store().get("alice").unwrap(), before);
}
