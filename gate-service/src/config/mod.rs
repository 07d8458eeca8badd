use secrecy::{ExposeSecret, Secret};
use service_core::config as core_config;
use service_core::error::AppError;
use std::env;
use std::time::Duration;

/// Shortest accepted HMAC signing key, in bytes.
pub const MIN_SIGNING_KEY_BYTES: usize = 32;

/// Upper bound for `TOKEN_VALIDITY_MINUTES` (30 days).
pub const MAX_TOKEN_VALIDITY_MINUTES: i64 = 30 * 24 * 60;

/// Upper bound for invitation validity and resend grace, in seconds (30 days).
pub const MAX_INVITATION_WINDOW_SECONDS: i64 = 30 * 24 * 60 * 60;

#[derive(Debug, Clone)]
pub struct GateConfig {
    pub common: core_config::Config,
    pub environment: Environment,
    pub service_name: String,
    pub service_version: String,
    pub log_level: String,
    pub otlp_endpoint: Option<String>,
    pub database: DatabaseConfig,
    pub token: TokenConfig,
    pub invitation: InvitationConfig,
    pub rate_limit: RateLimitConfig,
    pub smtp: Option<SmtpConfig>,
    pub security: SecurityConfig,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Environment {
    Dev,
    Prod,
}

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: Secret<String>,
    pub max_connections: u32,
}

#[derive(Debug, Clone)]
pub struct TokenConfig {
    /// HMAC-SHA256 key. Loaded once at startup, never mutated.
    pub signing_key: Secret<String>,
    pub validity_minutes: i64,
}

#[derive(Debug, Clone)]
pub struct InvitationConfig {
    /// How long a freshly issued code can be redeemed.
    pub validity_seconds: i64,
    /// How long past expiry an unused code waits before a reminder goes out.
    pub resend_grace_seconds: i64,
    pub sweep_interval_seconds: u64,
}

#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    pub capacity: u32,
    pub refill_per_second: f64,
    pub eviction_interval_seconds: u64,
    /// Key clients by the first `X-Forwarded-For` hop instead of the peer
    /// address. Only safe behind a proxy that overwrites the header.
    pub trust_forwarded_for: bool,
}

#[derive(Debug, Clone)]
pub struct SmtpConfig {
    pub host: String,
    pub user: String,
    pub password: Secret<String>,
    pub from: String,
}

#[derive(Debug, Clone)]
pub struct SecurityConfig {
    pub allowed_origins: Vec<String>,
}

impl InvitationConfig {
    pub fn validity(&self) -> chrono::Duration {
        chrono::Duration::try_seconds(self.validity_seconds).unwrap_or(chrono::Duration::MAX)
    }

    pub fn resend_grace(&self) -> chrono::Duration {
        chrono::Duration::try_seconds(self.resend_grace_seconds).unwrap_or(chrono::Duration::MAX)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_seconds)
    }
}

impl TokenConfig {
    pub fn validity(&self) -> chrono::Duration {
        chrono::Duration::try_minutes(self.validity_minutes).unwrap_or(chrono::Duration::MAX)
    }
}

impl RateLimitConfig {
    pub fn eviction_interval(&self) -> Duration {
        Duration::from_secs(self.eviction_interval_seconds)
    }
}

impl GateConfig {
    pub fn from_env() -> Result<Self, AppError> {
        let common_config = core_config::Config::load()?;

        let env_str = env::var("ENVIRONMENT").unwrap_or_else(|_| "dev".to_string());
        let environment: Environment = env_str
            .parse()
            .map_err(|e: String| AppError::ConfigError(anyhow::anyhow!(e)))?;

        let is_prod = environment == Environment::Prod;

        let smtp = match env::var("SMTP_HOST") {
            Ok(host) => Some(SmtpConfig {
                host,
                user: get_env("SMTP_USER", None, is_prod)?,
                password: Secret::new(get_env("SMTP_PASSWORD", None, is_prod)?),
                from: get_env("SMTP_FROM", None, is_prod)?,
            }),
            Err(_) => None,
        };

        let config = GateConfig {
            common: common_config,
            environment: environment.clone(),
            service_name: get_env("SERVICE_NAME", Some("gate-service"), is_prod)?,
            service_version: get_env("SERVICE_VERSION", Some(env!("CARGO_PKG_VERSION")), is_prod)?,
            log_level: get_env("LOG_LEVEL", Some("info"), is_prod)?,
            otlp_endpoint: env::var("OTLP_ENDPOINT").ok().filter(|s| !s.is_empty()),
            database: DatabaseConfig {
                url: Secret::new(get_env("DATABASE_URL", None, is_prod)?),
                max_connections: parse_env("DATABASE_MAX_CONNECTIONS", "10", is_prod)?,
            },
            token: TokenConfig {
                signing_key: Secret::new(get_env("TOKEN_SIGNING_KEY", None, is_prod)?),
                validity_minutes: parse_env("TOKEN_VALIDITY_MINUTES", "120", is_prod)?,
            },
            invitation: InvitationConfig {
                validity_seconds: parse_env("INVITATION_VALIDITY_SECONDS", "120", is_prod)?,
                resend_grace_seconds: parse_env("INVITATION_RESEND_GRACE_SECONDS", "120", is_prod)?,
                sweep_interval_seconds: parse_env("SWEEP_INTERVAL_SECONDS", "7200", is_prod)?,
            },
            rate_limit: RateLimitConfig {
                capacity: parse_env("RATE_LIMIT_CAPACITY", "1", is_prod)?,
                refill_per_second: parse_env("RATE_LIMIT_REFILL_PER_SECOND", "1.0", is_prod)?,
                eviction_interval_seconds: parse_env(
                    "RATE_LIMIT_EVICTION_INTERVAL_SECONDS",
                    "600",
                    is_prod,
                )?,
                trust_forwarded_for: parse_env("TRUST_FORWARDED_FOR", "false", is_prod)?,
            },
            smtp,
            security: SecurityConfig {
                allowed_origins: get_env("ALLOWED_ORIGINS", Some("http://localhost:3000"), is_prod)?
                    .split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect(),
            },
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), AppError> {
        if self.common.port == 0 {
            return Err(config_error("PORT must be greater than 0"));
        }

        if self.token.signing_key.expose_secret().len() < MIN_SIGNING_KEY_BYTES {
            return Err(config_error(&format!(
                "TOKEN_SIGNING_KEY must be at least {} bytes",
                MIN_SIGNING_KEY_BYTES
            )));
        }

        if !(1..=MAX_TOKEN_VALIDITY_MINUTES).contains(&self.token.validity_minutes) {
            return Err(config_error(&format!(
                "TOKEN_VALIDITY_MINUTES must be between 1 and {}",
                MAX_TOKEN_VALIDITY_MINUTES
            )));
        }

        if !(1..=MAX_INVITATION_WINDOW_SECONDS).contains(&self.invitation.validity_seconds) {
            return Err(config_error(&format!(
                "INVITATION_VALIDITY_SECONDS must be between 1 and {}",
                MAX_INVITATION_WINDOW_SECONDS
            )));
        }

        if !(0..=MAX_INVITATION_WINDOW_SECONDS).contains(&self.invitation.resend_grace_seconds) {
            return Err(config_error(&format!(
                "INVITATION_RESEND_GRACE_SECONDS must be between 0 and {}",
                MAX_INVITATION_WINDOW_SECONDS
            )));
        }

        if self.invitation.sweep_interval_seconds == 0 {
            return Err(config_error("SWEEP_INTERVAL_SECONDS must be positive"));
        }

        if self.rate_limit.capacity == 0 {
            return Err(config_error("RATE_LIMIT_CAPACITY must be at least 1"));
        }

        if !(self.rate_limit.refill_per_second.is_finite() && self.rate_limit.refill_per_second > 0.0)
        {
            return Err(config_error("RATE_LIMIT_REFILL_PER_SECOND must be positive"));
        }

        if self.rate_limit.eviction_interval_seconds == 0 {
            return Err(config_error(
                "RATE_LIMIT_EVICTION_INTERVAL_SECONDS must be positive",
            ));
        }

        if self.environment == Environment::Prod
            && self.security.allowed_origins.iter().any(|o| o == "*")
        {
            return Err(config_error(
                "Wildcard CORS origin not allowed in production",
            ));
        }

        Ok(())
    }
}

fn config_error(msg: &str) -> AppError {
    AppError::ConfigError(anyhow::anyhow!(msg.to_string()))
}

fn get_env(key: &str, default: Option<&str>, is_prod: bool) -> Result<String, AppError> {
    match env::var(key) {
        Ok(val) => Ok(val),
        Err(_) => {
            if is_prod {
                Err(config_error(&format!(
                    "{} is required in production but not set",
                    key
                )))
            } else if let Some(def) = default {
                Ok(def.to_string())
            } else {
                Err(config_error(&format!("{} is required but not set", key)))
            }
        }
    }
}

fn parse_env<T>(key: &str, default: &str, is_prod: bool) -> Result<T, AppError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    get_env(key, Some(default), is_prod)?
        .parse()
        .map_err(|e: T::Err| config_error(&format!("{} is invalid: {}", key, e)))
}

impl std::str::FromStr for Environment {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "dev" => Ok(Environment::Dev),
            "prod" => Ok(Environment::Prod),
            _ => Err(format!("Invalid environment: {}", s)),
        }
    }
}
