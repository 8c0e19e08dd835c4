// Integration tests for the /api/credentials routes

use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use chrono::{Duration, Utc};
use std::sync::Arc;
use tokenwarden::api::{create_credentials_router, CredentialsAppState};
use tokenwarden::config::FallbackConfig;
use tokenwarden::consumer::{build_registry, StaticFallback};
use tokenwarden::credentials::{MemoryCredentialStore, TokenCipher, TokenGrant};
use tokenwarden::manager::{CredentialManager, ManagerSettings};
use tokenwarden::oauth::{HttpRefreshClient, OAuthProviderConfig};
use tower::ServiceExt;

const TOKEN_PATH: &str = "/login/oauth/access_token";

fn manager_for(token_url: String) -> CredentialManager {
    let provider = OAuthProviderConfig {
        token_url,
        client_id: "Iv1.client".to_string(),
        client_secret: "client-secret".to_string(),
        token_lifetime: Duration::hours(8),
    };
    let refresher =
        HttpRefreshClient::new(provider, std::time::Duration::from_secs(5)).unwrap();

    CredentialManager::new(
        Arc::new(MemoryCredentialStore::new()),
        Arc::new(refresher),
        TokenCipher::new(&[7u8; 32]).unwrap(),
        ManagerSettings::default(),
    )
}

fn create_test_app(
    manager: CredentialManager,
    admin_token: Option<&str>,
    fallback: Option<StaticFallback>,
) -> Router {
    let state = CredentialsAppState {
        registry: build_registry(manager.clone(), fallback),
        manager,
        admin_token: admin_token.map(|t| t.to_string()),
        token_lifetime: Duration::hours(8),
    };
    create_credentials_router(state)
}

/// Manager whose token endpoint is never expected to be called.
fn offline_manager() -> CredentialManager {
    manager_for(format!("http://127.0.0.1:9{}", TOKEN_PATH))
}

fn grant(access: &str, expires_in: Duration) -> TokenGrant {
    TokenGrant {
        access_token: access.to_string(),
        refresh_token: "ghr_refresh".to_string(),
        expires_at: Utc::now() + expires_in,
        scope: Some("repo".to_string()),
    }
}

fn bearer(token: &str) -> String {
    format!("Bearer {}", token)
}

async fn send(
    app: Router,
    method: &str,
    uri: &str,
    body: Option<serde_json::Value>,
) -> (StatusCode, serde_json::Value) {
    let mut builder = Request::builder().method(method).uri(uri);
    let body = match body {
        Some(json) => {
            builder = builder.header("content-type", "application/json");
            Body::from(json.to_string())
        }
        None => Body::empty(),
    };

    let response = app.oneshot(builder.body(body).unwrap()).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let json = if bytes.is_empty() {
        serde_json::Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, json)
}

/// Unknown principals report no_token.
#[tokio::test]
async fn test_status_for_unknown_principal() {
    let app = create_test_app(offline_manager(), None, None);

    let (status, body) = send(app, "GET", "/api/credentials/alice/status", None).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "no_token");
}

/// PUT stores a grant; status then reports valid.
#[tokio::test]
async fn test_store_grant_then_status_valid() {
    let manager = offline_manager();
    let app = create_test_app(manager.clone(), None, None);

    let request = serde_json::json!({
        "access_token": "gho_new",
        "refresh_token": "ghr_new",
        "expires_in": 28800,
        "scope": "repo read:org",
        "installation_id": "inst-42"
    });
    let (status, _) = send(app.clone(), "PUT", "/api/credentials/alice", Some(request)).await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (status, body) = send(app, "GET", "/api/credentials/alice/status", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "valid");

    let credential = manager.get_valid_credential("alice").await.unwrap().unwrap();
    assert_eq!(credential.access_token, "gho_new");
    assert_eq!(credential.scope, "repo read:org");
    assert_eq!(credential.installation_id.as_deref(), Some("inst-42"));
}

/// PUT without expires_in uses the configured lifetime.
#[tokio::test]
async fn test_store_grant_defaults_lifetime() {
    let manager = offline_manager();
    let app = create_test_app(manager.clone(), None, None);

    let request = serde_json::json!({
        "access_token": "gho_new",
        "refresh_token": "ghr_new"
    });
    let (status, _) = send(app, "PUT", "/api/credentials/alice", Some(request)).await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let credential = manager.get_valid_credential("alice").await.unwrap().unwrap();
    let remaining = credential.expires_at - Utc::now();
    assert!(remaining > Duration::hours(7) + Duration::minutes(55));
    assert!(remaining <= Duration::hours(8));
}

/// Empty tokens are rejected before touching the store.
#[tokio::test]
async fn test_store_grant_rejects_empty_token() {
    let manager = offline_manager();
    let app = create_test_app(manager.clone(), None, None);

    let request = serde_json::json!({
        "access_token": "",
        "refresh_token": "ghr_new"
    });
    let (status, body) = send(app, "PUT", "/api/credentials/alice", Some(request)).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("access_token"));
    assert!(manager.get_valid_credential("alice").await.unwrap().is_none());
}

/// Out-of-range lifetimes are rejected instead of overflowing.
#[tokio::test]
async fn test_store_grant_rejects_unusable_expires_in() {
    let manager = offline_manager();
    let app = create_test_app(manager.clone(), None, None);

    for expires_in in [i64::MAX, 0, -60] {
        let request = serde_json::json!({
            "access_token": "gho_new",
            "refresh_token": "ghr_new",
            "expires_in": expires_in
        });
        let (status, body) =
            send(app.clone(), "PUT", "/api/credentials/alice", Some(request)).await;

        assert_eq!(status, StatusCode::BAD_REQUEST, "expires_in {}", expires_in);
        assert!(body["error"].as_str().unwrap().contains("expires_in"));
    }
    assert!(manager.get_valid_credential("alice").await.unwrap().is_none());
}

/// Missing or wrong admin token is rejected when one is configured.
#[tokio::test]
async fn test_admin_token_required() {
    let app = create_test_app(offline_manager(), Some("secret"), None);

    let (status, _) = send(app.clone(), "GET", "/api/credentials/alice/status", None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("GET")
                .uri("/api/credentials/alice/status")
                .header("authorization", bearer("wrong"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let response = app
        .oneshot(
            Request::builder()
                .method("GET")
                .uri("/api/credentials/alice/status")
                .header("authorization", bearer("secret"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

/// Invalidation keeps the installation, so the UI shows "expired".
#[tokio::test]
async fn test_invalidate_preserves_installation() {
    let manager = offline_manager();
    manager
        .save_grant("alice", grant("gho_a", Duration::hours(8)), Some("inst-1".to_string()))
        .await
        .unwrap();
    let app = create_test_app(manager, None, None);

    let (status, body) = send(app.clone(), "POST", "/api/credentials/alice/invalidate", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["invalidated"], true);
    assert_eq!(body["installation_preserved"], true);

    let (_, body) = send(app.clone(), "GET", "/api/credentials/alice/status", None).await;
    assert_eq!(body["status"], "expired");

    let (status, body) = send(app, "GET", "/api/internal/credentials/alice/token", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "reconnect required");
}

/// Invalidating an unknown principal is a no-op.
#[tokio::test]
async fn test_invalidate_unknown_principal() {
    let app = create_test_app(offline_manager(), None, None);

    let (status, body) = send(app, "POST", "/api/credentials/ghost/invalidate", None).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["invalidated"], false);
    assert_eq!(body["installation_preserved"], false);
}

/// DELETE removes the record; a second DELETE is 404.
#[tokio::test]
async fn test_disconnect() {
    let manager = offline_manager();
    manager
        .save_grant("alice", grant("gho_a", Duration::hours(8)), Some("inst-1".to_string()))
        .await
        .unwrap();
    let app = create_test_app(manager, None, None);

    let (status, _) = send(app.clone(), "DELETE", "/api/credentials/alice", None).await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (_, body) = send(app.clone(), "GET", "/api/credentials/alice/status", None).await;
    assert_eq!(body["status"], "no_token");

    let (status, _) = send(app, "DELETE", "/api/credentials/alice", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

/// Internal consumers get the decrypted access token.
#[tokio::test]
async fn test_internal_token_lookup() {
    let manager = offline_manager();
    manager
        .save_grant("alice", grant("gho_live", Duration::hours(8)), None)
        .await
        .unwrap();
    let app = create_test_app(manager, None, None);

    let (status, body) = send(app, "GET", "/api/internal/credentials/alice/token", None).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["access_token"], "gho_live");
}

/// A permitted static token wins even with nothing stored.
#[tokio::test]
async fn test_internal_token_uses_static_fallback() {
    let fallback = StaticFallback::from_parts(
        &FallbackConfig {
            allow_static_token: true,
        },
        Some("ghp_static".to_string()),
    );
    let app = create_test_app(offline_manager(), None, fallback);

    let (status, body) = send(app, "GET", "/api/internal/credentials/anyone/token", None).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["access_token"], "ghp_static");
}

/// A failing token endpoint is "try again", not "reconnect".
#[tokio::test]
async fn test_transient_refresh_failure_is_503() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("POST", TOKEN_PATH)
        .with_status(502)
        .with_body("bad gateway")
        .expect_at_least(1)
        .create_async()
        .await;

    let manager = manager_for(format!("{}{}", server.url(), TOKEN_PATH));
    // Inside the refresh buffer
    manager
        .save_grant("alice", grant("gho_old", Duration::seconds(60)), Some("inst-1".to_string()))
        .await
        .unwrap();
    let app = create_test_app(manager.clone(), None, None);

    let (status, body) = send(app.clone(), "GET", "/api/credentials/alice/status", None).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["retryable"], true);

    let (status, body) = send(app, "GET", "/api/internal/credentials/alice/token", None).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["retryable"], true);

    mock.assert_async().await;

    // Untouched: still the old token, still due
    let presence = manager.token_presence("alice").await.unwrap();
    assert!(presence.had_tokens);
    assert!(presence.has_installation_id);
}
