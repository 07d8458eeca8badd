//! PostgreSQL store.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use secrecy::ExposeSecret;
use sqlx::postgres::{PgPool, PgPoolOptions};
use std::time::Duration;
use tracing::{info, instrument};

use crate::config::DatabaseConfig;
use crate::models::{
    Invitation, NewInvitation, NewSession, NewUser, RegistrationOutcome, ReminderCandidate,
    UserCredential,
};
use crate::services::store::InvitationStore;

const CONSUME_INVITATION: &str = r#"
    UPDATE invitation_codes
    SET used = TRUE
    WHERE code = $1 AND email = $2 AND used = FALSE AND expires_at > $3
"#;

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(config: &DatabaseConfig) -> Result<Self, anyhow::Error> {
        info!("Connecting to PostgreSQL...");

        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(Duration::from_secs(30))
            .idle_timeout(Duration::from_secs(600))
            .connect(config.url.expose_secret())
            .await
            .map_err(|e| anyhow::anyhow!("Failed to connect to PostgreSQL: {}", e))?;

        info!("Successfully connected to PostgreSQL");
        Ok(Self::new(pool))
    }

    #[instrument(skip(self))]
    pub async fn run_migrations(&self) -> Result<(), anyhow::Error> {
        info!("Running database migrations");
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| anyhow::anyhow!("Migration failed: {}", e))?;
        info!("Database migrations completed");
        Ok(())
    }
}

#[async_trait]
impl InvitationStore for PgStore {
    async fn insert_invitation(&self, invitation: &NewInvitation) -> Result<i64, anyhow::Error> {
        let id: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO invitation_codes (code, email, used, created_at, expires_at)
            VALUES ($1, $2, FALSE, $3, $4)
            RETURNING id
            "#,
        )
        .bind(&invitation.code)
        .bind(&invitation.email)
        .bind(invitation.created_at)
        .bind(invitation.expires_at)
        .fetch_one(&self.pool)
        .await?;
        Ok(id)
    }

    async fn find_invitation(
        &self,
        code: &str,
        email: &str,
    ) -> Result<Option<Invitation>, anyhow::Error> {
        let invitation = sqlx::query_as::<_, Invitation>(
            r#"
            SELECT id, code, email, used, created_at, expires_at, reminder_sent_at
            FROM invitation_codes
            WHERE code = $1 AND email = $2
            "#,
        )
        .bind(code)
        .bind(email)
        .fetch_optional(&self.pool)
        .await?;
        Ok(invitation)
    }

    async fn mark_invitation_used(
        &self,
        code: &str,
        email: &str,
        now: DateTime<Utc>,
    ) -> Result<bool, anyhow::Error> {
        let result = sqlx::query(CONSUME_INVITATION)
            .bind(code)
            .bind(email)
            .bind(now)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn register_with_invitation(
        &self,
        code: &str,
        email: &str,
        now: DateTime<Utc>,
        user: &NewUser,
    ) -> Result<RegistrationOutcome, anyhow::Error> {
        let mut tx = self.pool.begin().await?;

        let consumed = sqlx::query(CONSUME_INVITATION)
            .bind(code)
            .bind(email)
            .bind(now)
            .execute(&mut *tx)
            .await?;
        if consumed.rows_affected() != 1 {
            tx.rollback().await?;
            return Ok(RegistrationOutcome::InvitationUnavailable);
        }

        let inserted = sqlx::query(
            r#"
            INSERT INTO users (email, password_hash)
            VALUES ($1, $2)
            ON CONFLICT (email) DO NOTHING
            "#,
        )
        .bind(&user.email)
        .bind(&user.password_hash)
        .execute(&mut *tx)
        .await?;
        if inserted.rows_affected() != 1 {
            // Undo the consumption so the code stays usable.
            tx.rollback().await?;
            return Ok(RegistrationOutcome::EmailTaken);
        }

        tx.commit().await?;
        Ok(RegistrationOutcome::Registered)
    }

    async fn find_reminder_candidates(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<ReminderCandidate>, anyhow::Error> {
        let candidates = sqlx::query_as::<_, ReminderCandidate>(
            r#"
            SELECT id, email, expires_at
            FROM invitation_codes
            WHERE used = FALSE AND reminder_sent_at IS NULL AND expires_at < $1
            ORDER BY expires_at
            "#,
        )
        .bind(cutoff)
        .fetch_all(&self.pool)
        .await?;
        Ok(candidates)
    }

    async fn mark_reminder_sent(&self, id: i64, now: DateTime<Utc>) -> Result<(), anyhow::Error> {
        sqlx::query("UPDATE invitation_codes SET reminder_sent_at = $1 WHERE id = $2")
            .bind(now)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn find_credential(&self, email: &str) -> Result<Option<UserCredential>, anyhow::Error> {
        let credential = sqlx::query_as::<_, UserCredential>(
            "SELECT id, email, password_hash FROM users WHERE email = $1",
        )
        .bind(email)
        .fetch_optional(&self.pool)
        .await?;
        Ok(credential)
    }

    async fn insert_session(&self, session: &NewSession) -> Result<(), anyhow::Error> {
        sqlx::query("INSERT INTO sessions (user_id, token, created_at) VALUES ($1, $2, $3)")
            .bind(session.user_id)
            .bind(&session.token)
            .bind(session.created_at)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn health_check(&self) -> Result<(), anyhow::Error> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| anyhow::anyhow!("Database health check failed: {}", e))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::Secret;

    #[tokio::test]
    #[ignore] // Requires running PostgreSQL
    async fn test_connect_and_migrate() {
        let config = DatabaseConfig {
            url: Secret::new("postgres://localhost/gate_test".to_string()),
            max_connections: 5,
        };

        let store = PgStore::connect(&config).await.unwrap();
        store.run_migrations().await.unwrap();
        assert!(store.health_check().await.is_ok());
    }
}
