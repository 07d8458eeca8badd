use axum::{extract::State, http::StatusCode, Json};
use chrono::Utc;
use service_core::error::AppError;
use validator::Validate;

use crate::dtos::{LoginRequest, MessageResponse, RegisterRequest, RegisterResponse};
use crate::middleware::AuthenticatedSubject;
use crate::models::NewSession;
use crate::services::ServiceError;
use crate::utils::{Password, PasswordHashString};
use crate::AppState;

/// Create an account by redeeming an invitation code.
///
/// POST /register
#[tracing::instrument(skip(state, _caller, req), fields(email = %req.email))]
pub async fn register(
    State(state): State<AppState>,
    _caller: AuthenticatedSubject,
    Json(req): Json<RegisterRequest>,
) -> Result<(StatusCode, Json<RegisterResponse>), AppError> {
    req.validate()?;

    let password_hash = state
        .hasher
        .hash(&Password::new(req.password))
        .await
        .map_err(ServiceError::Upstream)?;

    state
        .invitations
        .register_at(&req.code, &req.email, password_hash.into_string(), Utc::now())
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(RegisterResponse { email: req.email }),
    ))
}

/// Check credentials and bind a session to the presented bearer token.
///
/// POST /login
#[tracing::instrument(skip(state, caller, req), fields(email = %req.email))]
pub async fn login(
    State(state): State<AppState>,
    caller: AuthenticatedSubject,
    Json(req): Json<LoginRequest>,
) -> Result<Json<MessageResponse>, AppError> {
    req.validate()?;

    let credential = state
        .store
        .find_credential(&req.email)
        .await
        .map_err(ServiceError::Upstream)?;

    let Some(credential) = credential else {
        tracing::warn!("Login failed: unknown email");
        return Err(ServiceError::CredentialMismatch.into());
    };

    let matches = state
        .hasher
        .verify(
            &Password::new(req.password),
            &PasswordHashString::new(credential.password_hash),
        )
        .await
        .map_err(ServiceError::Upstream)?;

    if !matches {
        tracing::warn!(user_id = credential.id, "Login failed: password mismatch");
        return Err(ServiceError::CredentialMismatch.into());
    }

    state
        .store
        .insert_session(&NewSession {
            user_id: credential.id,
            token: caller.token,
            created_at: Utc::now(),
        })
        .await
        .map_err(ServiceError::Upstream)?;

    tracing::info!(user_id = credential.id, "User logged in");

    Ok(Json(MessageResponse {
        message: "Logged in successfully".to_string(),
    }))
}
