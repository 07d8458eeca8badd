pub mod auth;

pub use auth::{
    InviteRequest, InviteResponse, LoginRequest, MessageResponse, RegisterRequest,
    RegisterResponse, TokenRequest, TokenResponse,
};
