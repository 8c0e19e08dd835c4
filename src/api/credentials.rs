//! Credential API endpoints.
//!
//! Exposes the lifecycle manager to the rest of the dashboard: connection
//! status for the UI, storing a fresh grant after the authorization
//! callback, forced invalidation, explicit disconnect, and token retrieval
//! for internal consumers.

use crate::auth::authorize_admin;
use crate::credentials::{expiry_after, CredentialStatus, TokenGrant};
use crate::error::CredentialError;
use crate::manager::{CredentialManager, Invalidation};
use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::{get, post, put},
    Router,
};
use chrono::{Duration, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use token_registry::TokenRegistry;
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info, warn};

#[cfg(test)]
mod tests;

/// Shared application state for the credential API
#[derive(Clone)]
pub struct CredentialsAppState {
    pub manager: CredentialManager,
    pub registry: TokenRegistry,
    /// Required bearer token; `None` leaves the API open (development).
    pub admin_token: Option<String>,
    /// Lifetime assumed when a stored grant carries no `expires_in`.
    pub token_lifetime: Duration,
}

/// Response for GET /api/credentials/:principal_id/status
#[derive(Serialize, Debug, PartialEq)]
pub struct StatusResponse {
    pub status: CredentialStatus,
}

/// Request body for PUT /api/credentials/:principal_id
#[derive(Deserialize)]
pub struct StoreGrantRequest {
    pub access_token: String,
    pub refresh_token: String,
    /// Seconds until the access token expires.
    pub expires_in: Option<i64>,
    pub scope: Option<String>,
    pub installation_id: Option<String>,
}

/// Response for POST /api/credentials/:principal_id/invalidate
#[derive(Serialize, Debug, PartialEq)]
pub struct InvalidateResponse {
    pub invalidated: bool,
    pub installation_preserved: bool,
}

/// Response for GET /api/internal/credentials/:principal_id/token
#[derive(Serialize)]
pub struct TokenResponse {
    pub access_token: String,
}

/// Error response
#[derive(Serialize)]
struct ErrorResponse {
    error: String,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    retryable: bool,
}

/// Application error types for credential endpoints
#[derive(Debug)]
enum AppError {
    BadRequest(String),
    Unauthorized(String),
    NotFound(String),
    Unavailable(String),
    ServerError(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_message, retryable) = match self {
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg, false),
            AppError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, msg, false),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg, false),
            AppError::Unavailable(msg) => (StatusCode::SERVICE_UNAVAILABLE, msg, true),
            AppError::ServerError(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg, false),
        };

        let body = Json(ErrorResponse {
            error: error_message,
            retryable,
        });

        (status, body).into_response()
    }
}

impl From<CredentialError> for AppError {
    fn from(err: CredentialError) -> Self {
        if err.is_transient() {
            warn!(error = %err, "Credential temporarily unavailable");
            AppError::Unavailable(err.to_string())
        } else {
            error!(error = %err, "Credential operation failed");
            AppError::ServerError(err.to_string())
        }
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        match err.downcast::<CredentialError>() {
            Ok(err) => err.into(),
            Err(err) => {
                error!(error = %format!("{err:#}"), "Token lookup failed");
                AppError::ServerError(format!("{err:#}"))
            }
        }
    }
}

/// Create credential API router
pub fn create_credentials_router(state: CredentialsAppState) -> Router {
    Router::new()
        .route("/api/credentials/:principal_id/status", get(get_status))
        .route(
            "/api/credentials/:principal_id",
            put(store_grant).delete(disconnect),
        )
        .route("/api/credentials/:principal_id/invalidate", post(invalidate))
        .route(
            "/api/internal/credentials/:principal_id/token",
            get(get_token),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(Arc::new(state))
}

fn require_admin(state: &CredentialsAppState, headers: &HeaderMap) -> Result<(), AppError> {
    authorize_admin(headers, state.admin_token.as_deref())
        .map_err(|e| AppError::Unauthorized(format!("Invalid token: {}", e)))
}

/// GET /api/credentials/:principal_id/status
///
/// May trigger a refresh when the stored token is due.
async fn get_status(
    State(state): State<Arc<CredentialsAppState>>,
    Path(principal_id): Path<String>,
    headers: HeaderMap,
) -> Result<Json<StatusResponse>, AppError> {
    require_admin(&state, &headers)?;

    let status = state.manager.get_credential_status(&principal_id).await?;
    debug!(principal_id = %principal_id, ?status, "Credential status");

    Ok(Json(StatusResponse { status }))
}

/// PUT /api/credentials/:principal_id
///
/// Stores the grant from a completed authorization exchange.
async fn store_grant(
    State(state): State<Arc<CredentialsAppState>>,
    Path(principal_id): Path<String>,
    headers: HeaderMap,
    Json(request): Json<StoreGrantRequest>,
) -> Result<StatusCode, AppError> {
    require_admin(&state, &headers)?;

    if request.access_token.trim().is_empty() {
        return Err(AppError::BadRequest("access_token cannot be empty".to_string()));
    }
    if request.refresh_token.trim().is_empty() {
        return Err(AppError::BadRequest("refresh_token cannot be empty".to_string()));
    }

    let now = Utc::now();
    let expires_at = match request.expires_in {
        Some(secs) => expiry_after(now, secs).ok_or_else(|| {
            AppError::BadRequest(format!("expires_in out of range: {}", secs))
        })?,
        None => now
            .checked_add_signed(state.token_lifetime)
            .ok_or_else(|| AppError::ServerError("token lifetime out of range".to_string()))?,
    };

    let grant = TokenGrant {
        access_token: request.access_token,
        refresh_token: request.refresh_token,
        expires_at,
        scope: request.scope,
    };

    state
        .manager
        .save_grant(&principal_id, grant, request.installation_id)
        .await?;

    Ok(StatusCode::NO_CONTENT)
}

/// POST /api/credentials/:principal_id/invalidate
async fn invalidate(
    State(state): State<Arc<CredentialsAppState>>,
    Path(principal_id): Path<String>,
    headers: HeaderMap,
) -> Result<Json<InvalidateResponse>, AppError> {
    require_admin(&state, &headers)?;

    let transition = state.manager.invalidate(&principal_id).await?;

    Ok(Json(InvalidateResponse {
        invalidated: transition.is_some(),
        installation_preserved: transition == Some(Invalidation::PreserveInstallation),
    }))
}

/// DELETE /api/credentials/:principal_id
async fn disconnect(
    State(state): State<Arc<CredentialsAppState>>,
    Path(principal_id): Path<String>,
    headers: HeaderMap,
) -> Result<StatusCode, AppError> {
    require_admin(&state, &headers)?;

    if !state.manager.disconnect(&principal_id).await? {
        return Err(AppError::NotFound(format!(
            "No credential for '{}'",
            principal_id
        )));
    }

    info!(principal_id = %principal_id, "Disconnected via API");
    Ok(StatusCode::NO_CONTENT)
}

/// GET /api/internal/credentials/:principal_id/token
///
/// Goes through the registry so the static fallback applies.
async fn get_token(
    State(state): State<Arc<CredentialsAppState>>,
    Path(principal_id): Path<String>,
    headers: HeaderMap,
) -> Result<Json<TokenResponse>, AppError> {
    require_admin(&state, &headers)?;

    let token = state
        .registry
        .access_token(&principal_id)
        .await?
        .ok_or_else(|| AppError::NotFound("reconnect required".to_string()))?;

    Ok(Json(TokenResponse {
        access_token: token.access_token,
    }))
}
