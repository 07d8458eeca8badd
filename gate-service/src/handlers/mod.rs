pub mod auth;
pub mod invitation;
pub mod metrics;
pub mod token;
