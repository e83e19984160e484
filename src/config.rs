//! Environment-driven configuration.
//!
//! `Config::from_env` is called once at startup after `dotenv` has loaded `.env`. Any
//! problem (missing signing secret, unparsable number, out-of-range bcrypt cost) is a
//! `ConfigError` and the process refuses to start rather than failing per request.

use chrono::Duration;
use std::env;
use std::str::FromStr;
use std::time::Duration as StdDuration;

use crate::rate_limit::{RateLimitConfig, WindowPolicy};

/// Shortest signing secret accepted for HS256.
pub const MIN_SECRET_LEN: usize = 32;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),
    #[error("{name} is invalid: {reason}")]
    Invalid { name: &'static str, reason: String },
}

/// Process-level settings.
#[derive(Debug, Clone)]
pub struct Config {
    /// Postgres URL. Without it the server falls back to the in-memory user store.
    pub database_url: Option<String>,
    pub server_port: u16,
    pub server_host: String,
    pub auth: AuthConfig,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(|name| env::var(name).ok())
    }

    pub fn from_vars<F>(var: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        Ok(Self {
            database_url: var("DATABASE_URL").filter(|url| !url.is_empty()),
            server_port: parse_or(&var, "SERVER_PORT", 8080)?,
            server_host: var("SERVER_HOST").unwrap_or_else(|| "127.0.0.1".to_string()),
            auth: AuthConfig::from_vars(&var)?,
        })
    }

    pub fn server_url(&self) -> String {
        format!("http://{}:{}", self.server_host, self.server_port)
    }
}

/// Settings for token signing, password hashing and throttling.
#[derive(Clone)]
pub struct AuthConfig {
    pub jwt_secret: String,
    pub jwt_key_id: String,
    /// Key that signed tokens before the last rotation.
    pub previous_jwt_secret: Option<String>,
    pub previous_jwt_key_id: String,
    /// How long after startup tokens signed with the previous key still verify.
    pub previous_key_grace: Duration,
    /// Tolerated clock drift for `iat` in the future.
    pub leeway: Duration,
    pub access_token_ttl: Duration,
    pub refresh_token_ttl: Duration,
    pub bcrypt_cost: u32,
    pub rate_limit: RateLimitConfig,
}

impl std::fmt::Debug for AuthConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthConfig")
            .field("jwt_key_id", &self.jwt_key_id)
            .field("previous_jwt_key_id", &self.previous_jwt_key_id)
            .field("has_previous_key", &self.previous_jwt_secret.is_some())
            .field("previous_key_grace", &self.previous_key_grace)
            .field("leeway", &self.leeway)
            .field("access_token_ttl", &self.access_token_ttl)
            .field("refresh_token_ttl", &self.refresh_token_ttl)
            .field("bcrypt_cost", &self.bcrypt_cost)
            .field("rate_limit", &self.rate_limit)
            .finish()
    }
}

impl AuthConfig {
    /// Defaults for everything except the secret, which has none.
    pub fn with_secret(secret: impl Into<String>) -> Self {
        Self {
            jwt_secret: secret.into(),
            jwt_key_id: "primary".to_string(),
            previous_jwt_secret: None,
            previous_jwt_key_id: "previous".to_string(),
            previous_key_grace: Duration::hours(24),
            leeway: Duration::seconds(30),
            access_token_ttl: Duration::minutes(30),
            refresh_token_ttl: Duration::days(7),
            bcrypt_cost: bcrypt::DEFAULT_COST,
            rate_limit: RateLimitConfig::default(),
        }
    }

    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(|name| env::var(name).ok())
    }

    pub fn from_vars<F>(var: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let secret = var("JWT_SECRET")
            .filter(|s| !s.is_empty())
            .ok_or(ConfigError::Missing("JWT_SECRET"))?;
        check_secret("JWT_SECRET", &secret)?;

        let previous_jwt_secret = var("JWT_PREVIOUS_SECRET").filter(|s| !s.is_empty());
        if let Some(previous) = &previous_jwt_secret {
            check_secret("JWT_PREVIOUS_SECRET", previous)?;
        }

        let bcrypt_cost: u32 = parse_or(&var, "BCRYPT_COST", bcrypt::DEFAULT_COST)?;
        if !(4..=31).contains(&bcrypt_cost) {
            return Err(ConfigError::Invalid {
                name: "BCRYPT_COST",
                reason: format!("{} is outside 4..=31", bcrypt_cost),
            });
        }

        let defaults = RateLimitConfig::default();
        let primary = WindowPolicy {
            limit: positive(
                "RATE_LIMIT_REQUESTS",
                parse_or(&var, "RATE_LIMIT_REQUESTS", defaults.primary.limit)?,
            )?,
            window: StdDuration::from_secs(positive(
                "RATE_LIMIT_WINDOW_SECS",
                parse_or(&var, "RATE_LIMIT_WINDOW_SECS", defaults.primary.window.as_secs())?,
            )?),
        };
        let burst = match var("RATE_LIMIT_BURST_REQUESTS") {
            Some(raw) => Some(WindowPolicy {
                limit: positive(
                    "RATE_LIMIT_BURST_REQUESTS",
                    parse("RATE_LIMIT_BURST_REQUESTS", &raw)?,
                )?,
                window: StdDuration::from_secs(positive(
                    "RATE_LIMIT_BURST_WINDOW_SECS",
                    parse_or(&var, "RATE_LIMIT_BURST_WINDOW_SECS", 1)?,
                )?),
            }),
            None => None,
        };
        let rate_limit = RateLimitConfig {
            primary,
            burst,
            idle_windows: parse_or(&var, "RATE_LIMIT_IDLE_WINDOWS", defaults.idle_windows)?,
            ..defaults
        };

        let access_minutes: i64 = parse_or(&var, "ACCESS_TOKEN_EXPIRE_MINUTES", 30)?;
        let refresh_days: i64 = parse_or(&var, "REFRESH_TOKEN_EXPIRE_DAYS", 7)?;
        let grace_secs: i64 = parse_or(&var, "JWT_PREVIOUS_KEY_GRACE_SECS", 86_400)?;
        let leeway_secs: i64 = parse_or(&var, "JWT_LEEWAY_SECS", 30)?;

        Ok(Self {
            jwt_secret: secret,
            jwt_key_id: var("JWT_KEY_ID").unwrap_or_else(|| "primary".to_string()),
            previous_jwt_secret,
            previous_jwt_key_id: var("JWT_PREVIOUS_KEY_ID")
                .unwrap_or_else(|| "previous".to_string()),
            previous_key_grace: Duration::seconds(non_negative(
                "JWT_PREVIOUS_KEY_GRACE_SECS",
                grace_secs,
            )?),
            leeway: Duration::seconds(non_negative("JWT_LEEWAY_SECS", leeway_secs)?),
            access_token_ttl: Duration::minutes(non_negative(
                "ACCESS_TOKEN_EXPIRE_MINUTES",
                access_minutes,
            )?),
            refresh_token_ttl: Duration::days(non_negative(
                "REFRESH_TOKEN_EXPIRE_DAYS",
                refresh_days,
            )?),
            bcrypt_cost,
            rate_limit,
        })
    }
}

fn check_secret(name: &'static str, secret: &str) -> Result<(), ConfigError> {
    if secret.len() < MIN_SECRET_LEN {
        return Err(ConfigError::Invalid {
            name,
            reason: format!("must be at least {} bytes", MIN_SECRET_LEN),
        });
    }
    Ok(())
}

fn parse<T: FromStr>(name: &'static str, raw: &str) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    raw.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
        name,
        reason: e.to_string(),
    })
}

fn parse_or<T, F>(var: &F, name: &'static str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    match var(name) {
        Some(raw) => parse(name, &raw),
        None => Ok(default),
    }
}

fn positive<T>(name: &'static str, value: T) -> Result<T, ConfigError>
where
    T: Copy + PartialOrd + Default,
{
    if value <= T::default() {
        return Err(ConfigError::Invalid {
            name,
            reason: "must be greater than zero".into(),
        });
    }
    Ok(value)
}

fn non_negative(name: &'static str, value: i64) -> Result<i64, ConfigError> {
    if value < 0 {
        return Err(ConfigError::Invalid {
            name,
            reason: "must not be negative".into(),
        });
    }
    Ok(value)
}
