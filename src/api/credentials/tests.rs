//! Unit tests for credential API types

use super::*;
use crate::error::RefreshError;

#[test]
fn test_status_response_serialization() {
    let response = StatusResponse {
        status: CredentialStatus::NoToken,
    };

    let json = serde_json::to_string(&response).unwrap();
    assert_eq!(json, r#"{"status":"no_token"}"#);
}

#[test]
fn test_invalidate_response_serialization() {
    let response = InvalidateResponse {
        invalidated: true,
        installation_preserved: false,
    };

    let json = serde_json::to_string(&response).unwrap();
    assert!(json.contains("\"invalidated\":true"));
    assert!(json.contains("\"installation_preserved\":false"));
}

#[test]
fn test_store_grant_request_optional_fields() {
    let request: StoreGrantRequest =
        serde_json::from_str(r#"{"access_token":"a","refresh_token":"r"}"#).unwrap();

    assert_eq!(request.access_token, "a");
    assert!(request.expires_in.is_none());
    assert!(request.scope.is_none());
    assert!(request.installation_id.is_none());
}

#[test]
fn test_error_response_omits_retryable_when_false() {
    let json = serde_json::to_string(&ErrorResponse {
        error: "nope".to_string(),
        retryable: false,
    })
    .unwrap();
    assert_eq!(json, r#"{"error":"nope"}"#);
}

#[test]
fn test_transient_errors_map_to_unavailable() {
    let err = CredentialError::Unavailable(RefreshError::Network("timed out".to_string()));
    assert!(matches!(AppError::from(err), AppError::Unavailable(_)));

    let err = CredentialError::Store(anyhow::anyhow!("disk I/O error"));
    assert!(matches!(AppError::from(err), AppError::Unavailable(_)));
}

#[test]
fn test_anyhow_wrapped_credential_error_keeps_kind() {
    let err: anyhow::Error =
        CredentialError::Unavailable(RefreshError::Network("reset".to_string())).into();
    assert!(matches!(AppError::from(err), AppError::Unavailable(_)));

    let err = anyhow::anyhow!("something else");
    assert!(matches!(AppError::from(err), AppError::ServerError(_)));
}
