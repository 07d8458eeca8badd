use axum::{extract::State, Form, Json};
use service_core::error::AppError;

use crate::dtos::{TokenRequest, TokenResponse};
use crate::services::ServiceError;
use crate::AppState;

/// Issue an identity token for the submitted email.
///
/// POST /token
#[tracing::instrument(skip(state, req))]
pub async fn issue_token(
    State(state): State<AppState>,
    Form(req): Form<TokenRequest>,
) -> Result<Json<TokenResponse>, AppError> {
    let email = req.email.trim();
    if email.is_empty() {
        return Err(ServiceError::InvalidInput("Email is required".to_string()).into());
    }

    let issued = state
        .gate
        .tokens()
        .issue(email)
        .map_err(ServiceError::Upstream)?;

    tracing::info!(subject = %email, expires_at = %issued.expires_at, "Identity token issued");

    Ok(Json(TokenResponse {
        token: issued.token,
        expires_at: issued.expires_at,
    }))
}
