use axum::{extract::State, http::StatusCode, Form, Json};
use service_core::error::AppError;
use validator::Validate;

use crate::dtos::{InviteRequest, InviteResponse};
use crate::middleware::AuthenticatedSubject;
use crate::AppState;

/// Issue a single-use invitation code bound to an email.
///
/// POST /invite
#[tracing::instrument(skip(state, caller, req), fields(issued_by = %caller.subject))]
pub async fn create_invitation(
    State(state): State<AppState>,
    caller: AuthenticatedSubject,
    Form(req): Form<InviteRequest>,
) -> Result<(StatusCode, Json<InviteResponse>), AppError> {
    req.validate()?;

    let issued = state.invitations.issue_code(&req.email).await?;

    Ok((
        StatusCode::CREATED,
        Json(InviteResponse {
            code: issued.code,
            expires_at: issued.expires_at,
        }),
    ))
}
