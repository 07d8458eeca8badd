//! Domain records shared by the store, the registry and the handlers.

mod invitation;
mod user;

pub use invitation::{
    Invitation, InvitationRejection, NewInvitation, RegistrationOutcome, ReminderCandidate,
};
pub use user::{NewSession, NewUser, UserCredential};
