pub mod database;
pub mod error;
pub mod gate;
pub mod invitations;
pub mod notifier;
pub mod rate_limiter;
pub mod store;
pub mod sweeper;
pub mod tokens;

pub use database::PgStore;
pub use error::ServiceError;
pub use gate::{AccessGate, Admission, GatePolicy, GateRejection};
pub use invitations::{InvitationRegistry, IssuedInvitation};
pub use notifier::{InvitationNotifier, LogNotifier, MockNotifier, ReminderContext, SmtpNotifier};
pub use rate_limiter::{Acquire, ClientRateLimiter};
pub use store::{InvitationStore, MemoryStore};
pub use sweeper::{ExpirySweeper, SweepReport};
pub use tokens::{IdentityClaims, IssuedToken, TokenRejection, TokenService};
