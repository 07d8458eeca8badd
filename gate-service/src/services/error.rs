use service_core::error::AppError;
use std::time::Duration;
use thiserror::Error;

use crate::models::InvitationRejection;
use crate::services::gate::GateRejection;

#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("Authentication failed: {0}")]
    Authentication(GateRejection),

    #[error("Rate limited, retry after {retry_after:?}")]
    RateLimited { retry_after: Duration },

    #[error("Invitation rejected: {0}")]
    InvitationInvalid(InvitationRejection),

    #[error("Invalid credentials")]
    CredentialMismatch,

    #[error("Email already registered")]
    EmailTaken,

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Upstream failure: {0}")]
    Upstream(#[from] anyhow::Error),
}

impl From<GateRejection> for ServiceError {
    fn from(rejection: GateRejection) -> Self {
        match rejection {
            GateRejection::Throttled { retry_after } => ServiceError::RateLimited { retry_after },
            other => ServiceError::Authentication(other),
        }
    }
}

impl From<InvitationRejection> for ServiceError {
    fn from(rejection: InvitationRejection) -> Self {
        ServiceError::InvitationInvalid(rejection)
    }
}

/// Sub-reasons are collapsed here so callers cannot tell a missing header
/// from a bad signature, or a used code from an unknown one.
impl From<ServiceError> for AppError {
    fn from(err: ServiceError) -> Self {
        match err {
            ServiceError::Authentication(GateRejection::UnknownClient) => AppError::InternalError(
                anyhow::anyhow!("Client address unavailable for rate limiting"),
            ),
            ServiceError::Authentication(_) => {
                AppError::Unauthorized(anyhow::anyhow!("Authentication failed"))
            }
            ServiceError::RateLimited { retry_after } => AppError::TooManyRequests(
                "Rate limit exceeded".to_string(),
                Some(retry_after_secs(retry_after)),
            ),
            ServiceError::InvitationInvalid(_) => {
                AppError::BadRequest(anyhow::anyhow!("Invalid or expired invitation code"))
            }
            ServiceError::CredentialMismatch => {
                AppError::Unauthorized(anyhow::anyhow!("Invalid credentials"))
            }
            ServiceError::EmailTaken => {
                AppError::Conflict(anyhow::anyhow!("Email already registered"))
            }
            ServiceError::InvalidInput(msg) => AppError::BadRequest(anyhow::anyhow!(msg)),
            ServiceError::Upstream(e) => AppError::InternalError(e),
        }
    }
}

/// Whole seconds for `Retry-After`, rounded up and never zero.
fn retry_after_secs(wait: Duration) -> u64 {
    let secs = wait
        .as_secs()
        .saturating_add(u64::from(wait.subsec_nanos() > 0));
    secs.max(1)
}
