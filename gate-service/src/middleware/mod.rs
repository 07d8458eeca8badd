pub mod auth;

pub use auth::{access_gate_middleware, client_ip, AuthenticatedSubject};
