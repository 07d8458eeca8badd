use chrono::{DateTime, Duration, TimeZone, Utc};
use jsonwebtoken::{
    decode, encode, errors::ErrorKind, Algorithm, DecodingKey, EncodingKey, Header, Validation,
};
use secrecy::{ExposeSecret, Secret};
use serde::{Deserialize, Serialize};

/// Issues and validates HS256 identity tokens.
///
/// Tokens are stateless: there is no revocation list, so a token stays valid
/// until its `exp` passes.
#[derive(Clone)]
pub struct TokenService {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    validity: Duration,
}

/// Claims carried by an identity token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdentityClaims {
    /// Subject (email)
    pub sub: String,
    /// Issued at (Unix timestamp)
    pub iat: i64,
    /// Expiration time (Unix timestamp)
    pub exp: i64,
}

#[derive(Debug, Clone)]
pub struct IssuedToken {
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenRejection {
    /// Not a JWT, wrong algorithm, or claims missing/unparseable.
    Malformed,
    BadSignature,
    /// `exp` is zero or not after `now`.
    Expired,
}

impl TokenService {
    /// Build from the startup signing key. The key is copied into the
    /// jsonwebtoken key types and never read again.
    pub fn new(signing_key: &Secret<String>, validity: Duration) -> Result<Self, anyhow::Error> {
        let secret = signing_key.expose_secret().as_bytes();
        if secret.is_empty() {
            return Err(anyhow::anyhow!("Token signing key must not be empty"));
        }
        if validity <= Duration::zero() {
            return Err(anyhow::anyhow!("Token validity must be positive"));
        }

        Ok(Self {
            encoding_key: EncodingKey::from_secret(secret),
            decoding_key: DecodingKey::from_secret(secret),
            validity,
        })
    }

    pub fn issue(&self, subject: &str) -> Result<IssuedToken, anyhow::Error> {
        self.issue_at(subject, Utc::now())
    }

    pub fn issue_at(&self, subject: &str, now: DateTime<Utc>) -> Result<IssuedToken, anyhow::Error> {
        let exp = now
            .checked_add_signed(self.validity)
            .ok_or_else(|| anyhow::anyhow!("Token expiry out of range"))?
            .timestamp();
        let claims = IdentityClaims {
            sub: subject.to_string(),
            iat: now.timestamp(),
            exp,
        };

        let token = encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)
            .map_err(|e| anyhow::anyhow!("Failed to sign identity token: {}", e))?;

        let expires_at = Utc
            .timestamp_opt(exp, 0)
            .single()
            .ok_or_else(|| anyhow::anyhow!("Token expiry out of range"))?;

        Ok(IssuedToken { token, expires_at })
    }

    pub fn validate(&self, token: &str) -> Result<IdentityClaims, TokenRejection> {
        self.validate_at(token, Utc::now())
    }

    /// All-or-nothing: the claims are returned only if the signature verifies
    /// and `now` is strictly before `exp`.
    pub fn validate_at(
        &self,
        token: &str,
        now: DateTime<Utc>,
    ) -> Result<IdentityClaims, TokenRejection> {
        let mut validation = Validation::new(Algorithm::HS256);
        // Expiry is compared against the caller's `now` below, with no leeway.
        validation.validate_exp = false;
        validation.leeway = 0;

        let data = decode::<IdentityClaims>(token, &self.decoding_key, &validation).map_err(
            |e| match e.kind() {
                ErrorKind::InvalidSignature => TokenRejection::BadSignature,
                _ => TokenRejection::Malformed,
            },
        )?;

        let claims = data.claims;
        if claims.exp <= 0 || now.timestamp() >= claims.exp {
            return Err(TokenRejection::Expired);
        }
        if claims.sub.is_empty() {
            return Err(TokenRejection::Malformed);
        }

        Ok(claims)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const KEY: &str = "test-signing-key-0123456789abcdef";

    fn service() -> TokenService {
        TokenService::new(&Secret::new(KEY.to_string()), Duration::hours(2))
            .expect("valid key")
    }

    #[test]
    fn issued_token_validates_immediately() {
        let svc = service();
        let now = Utc::now();
        let issued = svc.issue_at("a@x.com", now).unwrap();

        let claims = svc.validate_at(&issued.token, now).unwrap();
        assert_eq!(claims.sub, "a@x.com");
        assert_eq!(issued.expires_at.timestamp(), (now + Duration::hours(2)).timestamp());
    }

    #[test]
    fn token_expires_at_the_issued_expiry() {
        let svc = service();
        let now = Utc::now();
        let issued = svc.issue_at("a@x.com", now).unwrap();

        assert!(svc
            .validate_at(&issued.token, issued.expires_at - Duration::seconds(1))
            .is_ok());
        assert_eq!(
            svc.validate_at(&issued.token, issued.expires_at).unwrap_err(),
            TokenRejection::Expired
        );
        assert_eq!(
            svc.validate_at(&issued.token, issued.expires_at + Duration::minutes(5))
                .unwrap_err(),
            TokenRejection::Expired
        );
    }

    #[test]
    fn token_signed_with_other_key_is_rejected() {
        let other = TokenService::new(
            &Secret::new("another-signing-key-fedcba9876543210".to_string()),
            Duration::hours(2),
        )
        .unwrap();
        let issued = other.issue("a@x.com").unwrap();

        assert_eq!(
            service().validate(&issued.token).unwrap_err(),
            TokenRejection::BadSignature
        );
    }

    #[test]
    fn garbage_is_malformed() {
        assert_eq!(
            service().validate("not-a-token").unwrap_err(),
            TokenRejection::Malformed
        );
        assert_eq!(service().validate("").unwrap_err(), TokenRejection::Malformed);
    }

    #[test]
    fn zero_expiry_is_rejected() {
        #[derive(Serialize)]
        struct Claims<'a> {
            sub: &'a str,
            iat: i64,
            exp: i64,
        }

        let token = encode(
            &Header::new(Algorithm::HS256),
            &Claims {
                sub: "a@x.com",
                iat: 0,
                exp: 0,
            },
            &EncodingKey::from_secret(KEY.as_bytes()),
        )
        .unwrap();

        assert_eq!(
            service().validate(&token).unwrap_err(),
            TokenRejection::Expired
        );
    }

    #[test]
    fn missing_expiry_is_rejected() {
        #[derive(Serialize)]
        struct Claims<'a> {
            sub: &'a str,
        }

        let token = encode(
            &Header::new(Algorithm::HS256),
            &Claims { sub: "a@x.com" },
            &EncodingKey::from_secret(KEY.as_bytes()),
        )
        .unwrap();

        assert!(service().validate(&token).is_err());
    }

    #[test]
    fn unrepresentable_expiry_is_an_error() {
        let svc = TokenService::new(&Secret::new(KEY.to_string()), Duration::MAX).unwrap();
        assert!(svc.issue("a@x.com").is_err());
    }

    #[test]
    fn empty_key_is_refused() {
        assert!(TokenService::new(&Secret::new(String::new()), Duration::hours(2)).is_err());
    }
}
