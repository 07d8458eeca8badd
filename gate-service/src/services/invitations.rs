//! Invitation codes: issue, then consume at most once before expiry.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use chrono::{DateTime, Duration, Utc};
use metrics::counter;
use rand::Rng;
use std::sync::Arc;
use tracing::{info, instrument, warn};

use crate::models::{InvitationRejection, NewInvitation, NewUser, RegistrationOutcome};
use crate::services::error::ServiceError;
use crate::services::store::InvitationStore;

/// Random bytes per code, before encoding.
const CODE_BYTES: usize = 16;

#[derive(Debug, Clone)]
pub struct IssuedInvitation {
    pub code: String,
    pub email: String,
    pub expires_at: DateTime<Utc>,
}

#[derive(Clone)]
pub struct InvitationRegistry {
    store: Arc<dyn InvitationStore>,
    validity: Duration,
}

impl InvitationRegistry {
    pub fn new(store: Arc<dyn InvitationStore>, validity: Duration) -> Self {
        Self { store, validity }
    }

    pub async fn issue_code(&self, email: &str) -> Result<IssuedInvitation, ServiceError> {
        self.issue_code_at(email, Utc::now()).await
    }

    #[instrument(skip(self))]
    pub async fn issue_code_at(
        &self,
        email: &str,
        now: DateTime<Utc>,
    ) -> Result<IssuedInvitation, ServiceError> {
        let new = NewInvitation::new(generate_code(), email.to_string(), now, self.validity)?;
        self.store.insert_invitation(&new).await?;

        counter!("invitations_issued_total").increment(1);
        info!(email = %email, expires_at = %new.expires_at, "Invitation code issued");

        Ok(IssuedInvitation {
            code: new.code,
            email: new.email,
            expires_at: new.expires_at,
        })
    }

    pub async fn consume(&self, code: &str, email: &str) -> Result<(), ServiceError> {
        self.consume_at(code, email, Utc::now()).await
    }

    /// Mark the code used if it belongs to `email`, is unused and is not yet
    /// expired at `now`. Of any number of concurrent calls for the same code,
    /// exactly one succeeds.
    #[instrument(skip(self, code))]
    pub async fn consume_at(
        &self,
        code: &str,
        email: &str,
        now: DateTime<Utc>,
    ) -> Result<(), ServiceError> {
        if self.store.mark_invitation_used(code, email, now).await? {
            record_consumption("consumed");
            info!(email = %email, "Invitation code consumed");
            return Ok(());
        }

        Err(self.diagnose(code, email, now).await)
    }

    /// Consume the code and create the account in one write. The code stays
    /// unused if the account cannot be created.
    #[instrument(skip(self, code, password_hash))]
    pub async fn register_at(
        &self,
        code: &str,
        email: &str,
        password_hash: String,
        now: DateTime<Utc>,
    ) -> Result<(), ServiceError> {
        let user = NewUser {
            email: email.to_string(),
            password_hash,
        };

        match self
            .store
            .register_with_invitation(code, email, now, &user)
            .await?
        {
            RegistrationOutcome::Registered => {
                record_consumption("consumed");
                info!(email = %email, "User registered with invitation code");
                Ok(())
            }
            RegistrationOutcome::InvitationUnavailable => Err(self.diagnose(code, email, now).await),
            RegistrationOutcome::EmailTaken => {
                warn!(email = %email, "Registration refused, email already registered");
                Err(ServiceError::EmailTaken)
            }
        }
    }

    /// Work out why the conditional write matched nothing. The answer is for
    /// logs and metrics only; callers collapse it.
    async fn diagnose(&self, code: &str, email: &str, now: DateTime<Utc>) -> ServiceError {
        let rejection = match self.store.find_invitation(code, email).await {
            Ok(None) => InvitationRejection::NotFound,
            Ok(Some(invitation)) => match invitation.rejection_at(now) {
                Some(rejection) => rejection,
                None => {
                    return ServiceError::Upstream(anyhow::anyhow!(
                        "Invitation {} is consumable but the conditional update matched nothing",
                        invitation.id
                    ))
                }
            },
            Err(e) => return ServiceError::Upstream(e),
        };

        record_consumption(rejection.as_str());
        warn!(email = %email, reason = %rejection, "Invitation code rejected");
        ServiceError::InvitationInvalid(rejection)
    }
}

fn record_consumption(outcome: &'static str) {
    counter!("invitation_consumptions_total", "outcome" => outcome).increment(1);
}

fn generate_code() -> String {
    let mut rng = rand::thread_rng();
    let mut bytes = [0u8; CODE_BYTES];
    rng.fill(&mut bytes[..]);
    URL_SAFE_NO_PAD.encode(bytes)
}
