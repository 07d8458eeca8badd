//! Invitation codes: issued, then either used once or left to expire.

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::FromRow;

/// A persisted invitation code.
#[derive(Debug, Clone, FromRow)]
pub struct Invitation {
    pub id: i64,
    pub code: String,
    pub email: String,
    pub used: bool,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub reminder_sent_at: Option<DateTime<Utc>>,
}

impl Invitation {
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    /// Why this record cannot be consumed at `now`, or `None` if it can.
    /// `used` wins over expiry: a used code is terminal regardless of age.
    pub fn rejection_at(&self, now: DateTime<Utc>) -> Option<InvitationRejection> {
        if self.used {
            Some(InvitationRejection::AlreadyUsed)
        } else if self.is_expired_at(now) {
            Some(InvitationRejection::Expired)
        } else {
            None
        }
    }
}

/// Fields for a new invitation row; the store assigns the id.
#[derive(Debug, Clone)]
pub struct NewInvitation {
    pub code: String,
    pub email: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl NewInvitation {
    pub fn new(
        code: String,
        email: String,
        created_at: DateTime<Utc>,
        validity: chrono::Duration,
    ) -> Result<Self, anyhow::Error> {
        let expires_at = created_at
            .checked_add_signed(validity)
            .ok_or_else(|| anyhow::anyhow!("Invitation expiry out of range"))?;

        Ok(Self {
            code,
            email,
            created_at,
            expires_at,
        })
    }
}

/// Reasons a consumption attempt is refused, in the order they are checked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum InvitationRejection {
    NotFound,
    AlreadyUsed,
    Expired,
}

impl InvitationRejection {
    pub fn as_str(&self) -> &'static str {
        match self {
            InvitationRejection::NotFound => "not_found",
            InvitationRejection::AlreadyUsed => "already_used",
            InvitationRejection::Expired => "expired",
        }
    }
}

impl std::fmt::Display for InvitationRejection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of the combined "consume code + create user" write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistrationOutcome {
    Registered,
    /// The conditional update matched no row; nothing was written.
    InvitationUnavailable,
    /// An account already exists for the email; the code was left unused.
    EmailTaken,
}

/// An unused invitation old enough to warrant a reminder.
#[derive(Debug, Clone, FromRow)]
pub struct ReminderCandidate {
    pub id: i64,
    pub email: String,
    pub expires_at: DateTime<Utc>,
}
