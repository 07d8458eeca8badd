use async_trait::async_trait;
use chrono::{DateTime, Utc};
use lettre::{
    message::header::ContentType, transport::smtp::authentication::Credentials, Message,
    SmtpTransport, Transport,
};
use secrecy::ExposeSecret;
use std::sync::Mutex;
use std::time::Duration;

use crate::config::SmtpConfig;

/// What the recipient is reminded about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReminderContext {
    pub invitation_id: i64,
    pub expired_at: DateTime<Utc>,
}

/// Outbound channel for expired-invitation reminders.
#[async_trait]
pub trait InvitationNotifier: Send + Sync {
    async fn notify(&self, email: &str, context: &ReminderContext) -> Result<(), anyhow::Error>;
}

#[derive(Clone)]
pub struct SmtpNotifier {
    mailer: SmtpTransport,
    from_email: String,
}

impl SmtpNotifier {
    pub fn new(config: &SmtpConfig) -> Result<Self, anyhow::Error> {
        let creds = Credentials::new(
            config.user.clone(),
            config.password.expose_secret().clone(),
        );

        let mailer = SmtpTransport::starttls_relay(&config.host)
            .map_err(|e| anyhow::anyhow!("Invalid SMTP relay {}: {}", config.host, e))?
            .credentials(creds)
            .timeout(Some(Duration::from_secs(10)))
            .build();

        tracing::info!(host = %config.host, "SMTP notifier initialized");

        Ok(Self {
            mailer,
            from_email: config.from.clone(),
        })
    }
}

#[async_trait]
impl InvitationNotifier for SmtpNotifier {
    async fn notify(&self, email: &str, context: &ReminderContext) -> Result<(), anyhow::Error> {
        let body = format!(
            "Your invitation expired on {}.\n\n\
             Ask the person who invited you for a new code to finish registering.",
            context.expired_at.format("%Y-%m-%d %H:%M UTC")
        );

        let message = Message::builder()
            .from(self.from_email.parse()?)
            .to(email.parse()?)
            .subject("Your invitation has expired")
            .header(ContentType::TEXT_PLAIN)
            .body(body)?;

        // SmtpTransport is synchronous.
        let mailer = self.mailer.clone();
        tokio::task::spawn_blocking(move || mailer.send(&message))
            .await
            .map_err(|e| anyhow::anyhow!("Mail task failed: {}", e))?
            .map_err(|e| anyhow::anyhow!("Failed to send reminder: {}", e))?;

        tracing::info!(
            to = %email,
            invitation_id = context.invitation_id,
            "Reminder email sent"
        );
        Ok(())
    }
}

/// Used when no SMTP relay is configured.
#[derive(Clone, Default)]
pub struct LogNotifier;

#[async_trait]
impl InvitationNotifier for LogNotifier {
    async fn notify(&self, email: &str, context: &ReminderContext) -> Result<(), anyhow::Error> {
        tracing::info!(
            to = %email,
            invitation_id = context.invitation_id,
            expired_at = %context.expired_at,
            "Invitation expired, reminder logged"
        );
        Ok(())
    }
}

/// Records every call; addresses passed to [`MockNotifier::fail_for`] fail.
#[derive(Default)]
pub struct MockNotifier {
    sent: Mutex<Vec<(String, ReminderContext)>>,
    failing: Mutex<Vec<String>>,
}

impl MockNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_for(&self, email: &str) {
        if let Ok(mut failing) = self.failing.lock() {
            failing.push(email.to_string());
        }
    }

    pub fn sent(&self) -> Vec<(String, ReminderContext)> {
        self.sent.lock().map(|s| s.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl InvitationNotifier for MockNotifier {
    async fn notify(&self, email: &str, context: &ReminderContext) -> Result<(), anyhow::Error> {
        let fails = self
            .failing
            .lock()
            .map(|f| f.iter().any(|e| e == email))
            .unwrap_or(false);
        if fails {
            return Err(anyhow::anyhow!("Mock delivery to {} failed", email));
        }

        self.sent
            .lock()
            .map_err(|_| anyhow::anyhow!("Mock notifier lock poisoned"))?
            .push((email.to_string(), context.clone()));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::Secret;

    #[test]
    fn smtp_notifier_builds_from_config() {
        let config = SmtpConfig {
            host: "smtp.example.com".to_string(),
            user: "mailer@example.com".to_string(),
            password: Secret::new("app-password".to_string()),
            from: "noreply@example.com".to_string(),
        };
        assert!(SmtpNotifier::new(&config).is_ok());
    }

    #[tokio::test]
    async fn mock_records_and_fails_on_request() {
        let mock = MockNotifier::new();
        let context = ReminderContext {
            invitation_id: 7,
            expired_at: Utc::now(),
        };
        mock.fail_for("bad@x.com");

        assert!(mock.notify("ok@x.com", &context).await.is_ok());
        assert!(mock.notify("bad@x.com", &context).await.is_err());

        let sent = mock.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, "ok@x.com");
    }
}
