use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tokio::sync::Mutex;

use crate::models::{
    Invitation, NewInvitation, NewSession, NewUser, RegistrationOutcome, ReminderCandidate,
    UserCredential,
};

/// Persistence contract for invitations, credentials and sessions.
///
/// The consuming operations are single conditional writes: the store, not
/// the caller, decides whether the code is still unused and unexpired.
#[async_trait]
pub trait InvitationStore: Send + Sync {
    async fn insert_invitation(&self, invitation: &NewInvitation) -> Result<i64, anyhow::Error>;

    async fn find_invitation(
        &self,
        code: &str,
        email: &str,
    ) -> Result<Option<Invitation>, anyhow::Error>;

    /// Set `used` where code and email match, `used` is false and `now` is
    /// before expiry. True if a row changed.
    async fn mark_invitation_used(
        &self,
        code: &str,
        email: &str,
        now: DateTime<Utc>,
    ) -> Result<bool, anyhow::Error>;

    /// The conditional update above plus the user insert, committed together
    /// or not at all.
    async fn register_with_invitation(
        &self,
        code: &str,
        email: &str,
        now: DateTime<Utc>,
        user: &NewUser,
    ) -> Result<RegistrationOutcome, anyhow::Error>;

    /// Unused, not yet reminded invitations that expired before `cutoff`.
    async fn find_reminder_candidates(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<ReminderCandidate>, anyhow::Error>;

    async fn mark_reminder_sent(&self, id: i64, now: DateTime<Utc>) -> Result<(), anyhow::Error>;

    async fn find_credential(&self, email: &str) -> Result<Option<UserCredential>, anyhow::Error>;

    async fn insert_session(&self, session: &NewSession) -> Result<(), anyhow::Error>;

    async fn health_check(&self) -> Result<(), anyhow::Error>;
}

/// In-process store. One lock covers all tables, which is what makes the
/// combined registration write atomic here.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<MemoryTables>,
}

#[derive(Default)]
struct MemoryTables {
    next_id: i64,
    invitations: Vec<Invitation>,
    users: HashMap<String, UserCredential>,
    sessions: Vec<NewSession>,
}

impl MemoryTables {
    fn next_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }

    fn consumable(&mut self, code: &str, email: &str, now: DateTime<Utc>) -> Option<&mut Invitation> {
        self.invitations.iter_mut().find(|i| {
            i.code == code && i.email == email && i.rejection_at(now).is_none()
        })
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn sessions(&self) -> Vec<NewSession> {
        self.inner.lock().await.sessions.clone()
    }

    pub async fn invitations(&self) -> Vec<Invitation> {
        self.inner.lock().await.invitations.clone()
    }
}

#[async_trait]
impl InvitationStore for MemoryStore {
    async fn insert_invitation(&self, invitation: &NewInvitation) -> Result<i64, anyhow::Error> {
        let mut tables = self.inner.lock().await;
        if tables.invitations.iter().any(|i| i.code == invitation.code) {
            return Err(anyhow::anyhow!("Duplicate invitation code"));
        }
        let id = tables.next_id();
        tables.invitations.push(Invitation {
            id,
            code: invitation.code.clone(),
            email: invitation.email.clone(),
            used: false,
            created_at: invitation.created_at,
            expires_at: invitation.expires_at,
            reminder_sent_at: None,
        });
        Ok(id)
    }

    async fn find_invitation(
        &self,
        code: &str,
        email: &str,
    ) -> Result<Option<Invitation>, anyhow::Error> {
        let tables = self.inner.lock().await;
        Ok(tables
            .invitations
            .iter()
            .find(|i| i.code == code && i.email == email)
            .cloned())
    }

    async fn mark_invitation_used(
        &self,
        code: &str,
        email: &str,
        now: DateTime<Utc>,
    ) -> Result<bool, anyhow::Error> {
        let mut tables = self.inner.lock().await;
        Ok(match tables.consumable(code, email, now) {
            Some(invitation) => {
                invitation.used = true;
                true
            }
            None => false,
        })
    }

    async fn register_with_invitation(
        &self,
        code: &str,
        email: &str,
        now: DateTime<Utc>,
        user: &NewUser,
    ) -> Result<RegistrationOutcome, anyhow::Error> {
        let mut tables = self.inner.lock().await;

        if tables.consumable(code, email, now).is_none() {
            return Ok(RegistrationOutcome::InvitationUnavailable);
        }
        if tables.users.contains_key(&user.email) {
            return Ok(RegistrationOutcome::EmailTaken);
        }

        let id = tables.next_id();
        tables.users.insert(
            user.email.clone(),
            UserCredential {
                id,
                email: user.email.clone(),
                password_hash: user.password_hash.clone(),
            },
        );
        if let Some(invitation) = tables.consumable(code, email, now) {
            invitation.used = true;
        }

        Ok(RegistrationOutcome::Registered)
    }

    async fn find_reminder_candidates(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<ReminderCandidate>, anyhow::Error> {
        let tables = self.inner.lock().await;
        Ok(tables
            .invitations
            .iter()
            .filter(|i| !i.used && i.reminder_sent_at.is_none() && i.expires_at < cutoff)
            .map(|i| ReminderCandidate {
                id: i.id,
                email: i.email.clone(),
                expires_at: i.expires_at,
            })
            .collect())
    }

    async fn mark_reminder_sent(&self, id: i64, now: DateTime<Utc>) -> Result<(), anyhow::Error> {
        let mut tables = self.inner.lock().await;
        let invitation = tables
            .invitations
            .iter_mut()
            .find(|i| i.id == id)
            .ok_or_else(|| anyhow::anyhow!("Invitation {} not found", id))?;
        invitation.reminder_sent_at = Some(now);
        Ok(())
    }

    async fn find_credential(&self, email: &str) -> Result<Option<UserCredential>, anyhow::Error> {
        Ok(self.inner.lock().await.users.get(email).cloned())
    }

    async fn insert_session(&self, session: &NewSession) -> Result<(), anyhow::Error> {
        self.inner.lock().await.sessions.push(session.clone());
        Ok(())
    }

    async fn health_check(&self) -> Result<(), anyhow::Error> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn invitation(code: &str, email: &str, created_at: DateTime<Utc>) -> NewInvitation {
        NewInvitation::new(code.into(), email.into(), created_at, Duration::minutes(2))
            .unwrap()
    }

    fn user(email: &str) -> NewUser {
        NewUser {
            email: email.to_string(),
            password_hash: "hash".to_string(),
        }
    }

    #[tokio::test]
    async fn conditional_update_matches_once() {
        let store = MemoryStore::new();
        let t0 = Utc::now();
        store.insert_invitation(&invitation("abc", "a@x.com", t0)).await.unwrap();

        assert!(store.mark_invitation_used("abc", "a@x.com", t0).await.unwrap());
        assert!(!store.mark_invitation_used("abc", "a@x.com", t0).await.unwrap());
    }

    #[tokio::test]
    async fn conditional_update_requires_matching_email() {
        let store = MemoryStore::new();
        let t0 = Utc::now();
        store.insert_invitation(&invitation("abc", "a@x.com", t0)).await.unwrap();

        assert!(!store.mark_invitation_used("abc", "b@y.com", t0).await.unwrap());
        assert!(store.mark_invitation_used("abc", "a@x.com", t0).await.unwrap());
    }

    #[tokio::test]
    async fn duplicate_codes_are_refused() {
        let store = MemoryStore::new();
        let t0 = Utc::now();
        store.insert_invitation(&invitation("abc", "a@x.com", t0)).await.unwrap();
        assert!(store.insert_invitation(&invitation("abc", "b@y.com", t0)).await.is_err());
    }

    #[tokio::test]
    async fn taken_email_leaves_code_unused() {
        let store = MemoryStore::new();
        let t0 = Utc::now();
        store.insert_invitation(&invitation("one", "a@x.com", t0)).await.unwrap();
        store.insert_invitation(&invitation("two", "a@x.com", t0)).await.unwrap();

        assert_eq!(
            store.register_with_invitation("one", "a@x.com", t0, &user("a@x.com")).await.unwrap(),
            RegistrationOutcome::Registered
        );
        assert_eq!(
            store.register_with_invitation("two", "a@x.com", t0, &user("a@x.com")).await.unwrap(),
            RegistrationOutcome::EmailTaken
        );

        let two = store.find_invitation("two", "a@x.com").await.unwrap().unwrap();
        assert!(!two.used);
    }

    #[tokio::test]
    async fn reminder_candidates_exclude_used_reminded_and_recent() {
        let store = MemoryStore::new();
        let t0 = Utc::now() - Duration::hours(1);
        let stale = store.insert_invitation(&invitation("stale", "a@x.com", t0)).await.unwrap();
        store.insert_invitation(&invitation("used", "b@x.com", t0)).await.unwrap();
        store.insert_invitation(&invitation("fresh", "c@x.com", Utc::now())).await.unwrap();
        let reminded = store.insert_invitation(&invitation("reminded", "d@x.com", t0)).await.unwrap();

        store.mark_invitation_used("used", "b@x.com", t0).await.unwrap();
        store.mark_reminder_sent(reminded, Utc::now()).await.unwrap();

        let candidates = store.find_reminder_candidates(Utc::now()).await.unwrap();
        let ids: Vec<i64> = candidates.iter().map(|c| c.id).collect();
        assert_eq!(ids, vec![stale]);
    }
}
