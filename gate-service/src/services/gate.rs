//! Request admission: rate check, then token check, then the wrapped handler.

use chrono::{DateTime, Utc};
use governor::clock::{Clock, DefaultClock};
use std::net::IpAddr;
use std::time::Duration;

use crate::services::rate_limiter::{Acquire, ClientRateLimiter};
use crate::services::tokens::{TokenRejection, TokenService};

/// Why a request was turned away. Only the log sees the distinction between
/// the credential variants; callers get one "authentication failed".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateRejection {
    /// No `Authorization` header.
    MissingCredentials,
    /// Header present but not `Bearer <token>`.
    MalformedCredentials,
    /// Bearer token failed parsing or signature verification.
    InvalidToken,
    ExpiredToken,
    Throttled { retry_after: Duration },
    /// The client address could not be determined, so no bucket applies.
    UnknownClient,
}

impl GateRejection {
    pub fn reason(&self) -> &'static str {
        match self {
            GateRejection::MissingCredentials => "missing_credentials",
            GateRejection::MalformedCredentials => "malformed_credentials",
            GateRejection::InvalidToken => "invalid_token",
            GateRejection::ExpiredToken => "expired_token",
            GateRejection::Throttled { .. } => "throttled",
            GateRejection::UnknownClient => "unknown_client",
        }
    }
}

impl std::fmt::Display for GateRejection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.reason())
    }
}

impl From<TokenRejection> for GateRejection {
    fn from(rejection: TokenRejection) -> Self {
        match rejection {
            TokenRejection::Expired => GateRejection::ExpiredToken,
            TokenRejection::Malformed | TokenRejection::BadSignature => GateRejection::InvalidToken,
        }
    }
}

/// Which checks a route runs. The rate check always precedes the token check
/// so malformed tokens still spend a permit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GatePolicy {
    pub rate_limited: bool,
    pub token_required: bool,
}

impl GatePolicy {
    /// Login: throttle first, then require a token.
    pub const RATE_LIMITED_BEARER: GatePolicy = GatePolicy {
        rate_limited: true,
        token_required: true,
    };

    /// Invitation issuance and registration.
    pub const BEARER: GatePolicy = GatePolicy {
        rate_limited: false,
        token_required: true,
    };
}

/// What the gate knows about an admitted request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Admission {
    pub subject: Option<String>,
    pub token: Option<String>,
}

/// Composes the rate limiter and the token service.
pub struct AccessGate<C: Clock = DefaultClock> {
    tokens: TokenService,
    limiter: ClientRateLimiter<C>,
}

impl<C: Clock> Clone for AccessGate<C> {
    fn clone(&self) -> Self {
        Self {
            tokens: self.tokens.clone(),
            limiter: self.limiter.clone(),
        }
    }
}

impl<C: Clock> AccessGate<C> {
    pub fn new(tokens: TokenService, limiter: ClientRateLimiter<C>) -> Self {
        Self { tokens, limiter }
    }

    pub fn limiter(&self) -> &ClientRateLimiter<C> {
        &self.limiter
    }

    pub fn tokens(&self) -> &TokenService {
        &self.tokens
    }

    /// Run the checks `policy` asks for, in order, stopping at the first
    /// rejection. `authorization` is the raw header value, if any.
    pub fn admit(
        &self,
        policy: GatePolicy,
        client: Option<IpAddr>,
        authorization: Option<&[u8]>,
        now: DateTime<Utc>,
    ) -> Result<Admission, GateRejection> {
        if policy.rate_limited {
            self.check_rate(client)?;
        }

        if !policy.token_required {
            return Ok(Admission {
                subject: None,
                token: None,
            });
        }

        let token = bearer_token(authorization)?;
        let claims = self.tokens.validate_at(token, now)?;

        Ok(Admission {
            subject: Some(claims.sub),
            token: Some(token.to_string()),
        })
    }

    pub fn check_rate(&self, client: Option<IpAddr>) -> Result<(), GateRejection> {
        let client = client.ok_or(GateRejection::UnknownClient)?;
        match self.limiter.try_acquire(client) {
            Acquire::Admitted => Ok(()),
            Acquire::Throttled { retry_after } => Err(GateRejection::Throttled { retry_after }),
        }
    }
}

/// Extract the token from `Bearer <token>`. The scheme is case-insensitive;
/// anything other than exactly two space-separated parts is malformed.
pub fn bearer_token(authorization: Option<&[u8]>) -> Result<&str, GateRejection> {
    let raw = authorization.ok_or(GateRejection::MissingCredentials)?;
    let value = std::str::from_utf8(raw).map_err(|_| GateRejection::MalformedCredentials)?;

    let mut parts = value.split(' ');
    match (parts.next(), parts.next(), parts.next()) {
        (Some(scheme), Some(token), None)
            if scheme.eq_ignore_ascii_case("bearer") && !token.is_empty() =>
        {
            Ok(token)
        }
        _ => Err(GateRejection::MalformedCredentials),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use governor::clock::FakeRelativeClock;
    use secrecy::Secret;

    fn gate() -> (AccessGate<FakeRelativeClock>, FakeRelativeClock) {
        let tokens = TokenService::new(
            &Secret::new("gate-test-signing-key-0123456789ab".to_string()),
            chrono::Duration::hours(2),
        )
        .unwrap();
        let clock = FakeRelativeClock::default();
        let limiter = ClientRateLimiter::with_clock(1, 1.0, clock.clone()).unwrap();
        (AccessGate::new(tokens, limiter), clock)
    }

    fn client() -> Option<IpAddr> {
        Some("1.2.3.4".parse().unwrap())
    }

    #[test]
    fn bearer_parsing() {
        assert_eq!(bearer_token(Some("Bearer abc".as_bytes())), Ok("abc"));
        assert_eq!(bearer_token(Some("bearer abc".as_bytes())), Ok("abc"));
        assert_eq!(
            bearer_token(None),
            Err(GateRejection::MissingCredentials)
        );
        let bad: [&[u8]; 5] = [b"Token xyz", b"Bearer", b"Bearer ", b"Bearer a b", b"\xff\xfe"];
        for bad in bad {
            assert_eq!(
                bearer_token(Some(bad)),
                Err(GateRejection::MalformedCredentials)
            );
        }
    }

    #[test]
    fn admits_valid_token() {
        let (gate, _) = gate();
        let now = Utc::now();
        let issued = gate.tokens().issue_at("a@x.com", now).unwrap();
        let header = format!("Bearer {}", issued.token);

        let admission = gate
            .admit(GatePolicy::BEARER, None, Some(header.as_bytes()), now)
            .unwrap();
        assert_eq!(admission.subject.as_deref(), Some("a@x.com"));
        assert_eq!(admission.token.as_deref(), Some(issued.token.as_str()));
    }

    #[test]
    fn wrong_scheme_is_rejected_not_panicking() {
        let (gate, _) = gate();
        assert_eq!(
            gate.admit(GatePolicy::BEARER, client(), Some("Token xyz".as_bytes()), Utc::now()),
            Err(GateRejection::MalformedCredentials)
        );
    }

    #[test]
    fn expired_token_is_rejected() {
        let (gate, _) = gate();
        let now = Utc::now();
        let issued = gate.tokens().issue_at("a@x.com", now).unwrap();
        let header = format!("Bearer {}", issued.token);

        assert_eq!(
            gate.admit(
                GatePolicy::BEARER,
                client(),
                Some(header.as_bytes()),
                issued.expires_at
            ),
            Err(GateRejection::ExpiredToken)
        );
    }

    #[test]
    fn rate_check_runs_before_token_check() {
        let (gate, clock) = gate();
        let now = Utc::now();

        // The first request spends the only permit even though its token is bad.
        assert_eq!(
            gate.admit(GatePolicy::RATE_LIMITED_BEARER, client(), Some("Bearer junk".as_bytes()), now),
            Err(GateRejection::InvalidToken)
        );
        assert!(matches!(
            gate.admit(GatePolicy::RATE_LIMITED_BEARER, client(), None, now),
            Err(GateRejection::Throttled { .. })
        ));

        clock.advance(Duration::from_secs(1));
        assert_eq!(
            gate.admit(GatePolicy::RATE_LIMITED_BEARER, client(), None, now),
            Err(GateRejection::MissingCredentials)
        );
    }

    #[test]
    fn unknown_client_fails_closed() {
        let (gate, _) = gate();
        assert_eq!(
            gate.admit(GatePolicy::RATE_LIMITED_BEARER, None, None, Utc::now()),
            Err(GateRejection::UnknownClient)
        );
    }

    #[test]
    fn bearer_policy_skips_rate_check() {
        let (gate, _) = gate();
        for _ in 0..3 {
            assert_eq!(
                gate.admit(GatePolicy::BEARER, client(), None, Utc::now()),
                Err(GateRejection::MissingCredentials)
            );
        }
    }
}
