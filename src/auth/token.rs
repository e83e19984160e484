//! Signed, time-bounded bearer tokens.
//!
//! Tokens are HS256 JWTs carrying `{sub, iat, exp, token_type}` and optionally the
//! account email. The `kid` header names the signing key so the service can keep
//! verifying tokens from the previous key for a grace period after a rotation.
//!
//! Verification is stateless: there is no record of issued tokens, so a token stays
//! usable until it expires even after logout. Account deactivation still takes effect
//! immediately because the identity resolver re-reads the account on every request.

use chrono::{DateTime, Duration, TimeZone, Utc};
use jsonwebtoken::{
    decode, decode_header, encode, errors::ErrorKind, Algorithm, DecodingKey, EncodingKey, Header,
    Validation,
};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use uuid::Uuid;

use crate::clock::Clock;
use crate::config::{AuthConfig, ConfigError};
use crate::error::AuthError;

/// What a token may be used for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenType {
    /// Presented on every API request.
    Access,
    /// Exchanged for a new token pair, never accepted as an access token.
    Refresh,
}

/// Represents the claims encoded within a token.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct Claims {
    /// Subject: the principal id.
    pub sub: String,
    /// Issued-at, seconds since the epoch.
    pub iat: i64,
    /// Expiry, seconds since the epoch. The token is valid strictly before this instant.
    pub exp: i64,
    pub token_type: TokenType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
}

/// Optional claims carried alongside the identity.
#[derive(Debug, Clone, Default)]
pub struct ExtraClaims {
    pub email: Option<String>,
}

/// A freshly issued token.
#[derive(Debug, Clone)]
pub struct Credential {
    pub token: String,
    pub token_type: TokenType,
    pub expires_at: DateTime<Utc>,
    pub expires_in: Duration,
}

/// The result of a successful verification.
#[derive(Debug, Clone)]
pub struct VerifiedToken {
    pub principal_id: Uuid,
    pub claims: Claims,
}

/// An HMAC key and the `kid` it is published under.
#[derive(Clone)]
pub struct SigningKey {
    id: String,
    encoding: EncodingKey,
    decoding: DecodingKey,
}

impl SigningKey {
    pub fn new(id: impl Into<String>, secret: impl AsRef<[u8]>) -> Result<Self, ConfigError> {
        let id = id.into();
        let secret = secret.as_ref();
        if id.is_empty() {
            return Err(ConfigError::Invalid {
                name: "JWT_KEY_ID",
                reason: "must not be empty".into(),
            });
        }
        if secret.is_empty() {
            return Err(ConfigError::Missing("JWT_SECRET"));
        }
        Ok(Self {
            id,
            encoding: EncodingKey::from_secret(secret),
            decoding: DecodingKey::from_secret(secret),
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }
}

impl fmt::Debug for SigningKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SigningKey")
            .field("id", &self.id)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone)]
struct RetiredKey {
    key: SigningKey,
    accepted_until: DateTime<Utc>,
}

/// Issues and verifies tokens. Read-only after construction; share it behind an `Arc`.
pub struct TokenService {
    current: SigningKey,
    previous: Option<RetiredKey>,
    leeway: Duration,
    validation: Validation,
    clock: Arc<dyn Clock>,
}

impl TokenService {
    pub fn new(current: SigningKey, clock: Arc<dyn Clock>) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        // Time checks run against the injected clock below, not the library's.
        validation.validate_exp = false;
        validation.validate_aud = false;
        validation.required_spec_claims.clear();

        Self {
            current,
            previous: None,
            leeway: Duration::zero(),
            validation,
            clock,
        }
    }

    /// Builds the service from configuration, including a retired key if one is set.
    pub fn from_config(config: &AuthConfig, clock: Arc<dyn Clock>) -> Result<Self, ConfigError> {
        let current = SigningKey::new(config.jwt_key_id.clone(), &config.jwt_secret)?;
        let mut service = Self::new(current, clock).with_leeway(config.leeway);
        if let Some(previous) = &config.previous_jwt_secret {
            let key = SigningKey::new(config.previous_jwt_key_id.clone(), previous)?;
            service = service.with_previous_key(key, config.previous_key_grace);
        }
        Ok(service)
    }

    /// Keeps accepting tokens signed by `key` for `grace` from now.
    pub fn with_previous_key(mut self, key: SigningKey, grace: Duration) -> Self {
        let accepted_until = self.clock.now() + grace;
        log::info!(
            "accepting tokens signed with retired key {} until {}",
            key.id(),
            accepted_until
        );
        self.previous = Some(RetiredKey {
            key,
            accepted_until,
        });
        self
    }

    /// Tolerated drift for `iat` in the future. Expiry never gets any slack.
    pub fn with_leeway(mut self, leeway: Duration) -> Self {
        self.leeway = leeway.max(Duration::zero());
        self
    }

    /// Issues a token for `principal_id` valid for `ttl` (whole seconds).
    ///
    /// A zero TTL is legal and yields a token that is already expired.
    pub fn issue(
        &self,
        principal_id: Uuid,
        extra: ExtraClaims,
        token_type: TokenType,
        ttl: Duration,
    ) -> Result<Credential, AuthError> {
        if ttl < Duration::zero() {
            return Err(AuthError::InvalidInput("token ttl must not be negative".into()));
        }

        let issued_at = self.clock.now().timestamp();
        let expires_at = issued_at.saturating_add(ttl.num_seconds());
        let claims = Claims {
            sub: principal_id.to_string(),
            iat: issued_at,
            exp: expires_at,
            token_type,
            email: extra.email,
        };

        let mut header = Header::new(Algorithm::HS256);
        header.kid = Some(self.current.id.clone());
        let token = encode(&header, &claims, &self.current.encoding)
            .map_err(|e| AuthError::Internal(format!("Failed to generate token: {}", e)))?;

        let expires_at = Utc
            .timestamp_opt(expires_at, 0)
            .single()
            .ok_or_else(|| AuthError::InvalidInput("token ttl out of range".into()))?;

        Ok(Credential {
            token,
            token_type,
            expires_at,
            expires_in: Duration::seconds(ttl.num_seconds()),
        })
    }

    /// Verifies `token` and checks it was issued for `expected` use.
    ///
    /// Checks run in a fixed order: structure and signature, then expiry and issue
    /// time, then token type. No claim is looked at before the signature verifies.
    pub fn verify(&self, token: &str, expected: TokenType) -> Result<VerifiedToken, AuthError> {
        let result = self.check(token, expected, self.clock.now());
        if let Err(err) = &result {
            log::debug!("token rejected: {}", err);
        }
        result
    }

    fn check(
        &self,
        token: &str,
        expected: TokenType,
        now: DateTime<Utc>,
    ) -> Result<VerifiedToken, AuthError> {
        if !is_compact_jws(token) {
            return Err(AuthError::MalformedCredential);
        }

        // Anything wrong past this point means the bytes were not ours.
        let header = decode_header(token).map_err(|_| AuthError::BadSignature)?;
        let key = self
            .key_for(header.kid.as_deref(), now)
            .ok_or(AuthError::BadSignature)?;
        let claims = decode::<Claims>(token, &key.decoding, &self.validation)
            .map_err(|e| match e.kind() {
                // Signature held but the payload is not a claim set we understand.
                ErrorKind::Json(_) | ErrorKind::Utf8(_) | ErrorKind::MissingRequiredClaim(_) => {
                    AuthError::MalformedCredential
                }
                _ => AuthError::BadSignature,
            })?
            .claims;

        let now_ms = now.timestamp_millis();
        if now_ms >= claims.exp.saturating_mul(1000) {
            return Err(AuthError::Expired);
        }
        if claims.iat.saturating_mul(1000) > now_ms + self.leeway.num_milliseconds() {
            return Err(AuthError::MalformedCredential);
        }
        if claims.token_type != expected {
            return Err(AuthError::WrongTokenType);
        }

        let principal_id =
            Uuid::parse_str(&claims.sub).map_err(|_| AuthError::MalformedCredential)?;
        Ok(VerifiedToken {
            principal_id,
            claims,
        })
    }

    fn key_for(&self, kid: Option<&str>, now: DateTime<Utc>) -> Option<&SigningKey> {
        match kid {
            None => Some(&self.current),
            Some(kid) if kid == self.current.id => Some(&self.current),
            Some(kid) => self
                .previous
                .as_ref()
                .filter(|retired| retired.key.id == kid && now < retired.accepted_until)
                .map(|retired| &retired.key),
        }
    }
}

/// Three non-empty base64url segments separated by dots.
fn is_compact_jws(token: &str) -> bool {
    let segments: Vec<&str> = token.split('.').collect();
    segments.len() == 3
        && segments.iter().all(|segment| {
            !segment.is_empty()
                && segment
                    .bytes()
                    .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_')
        })
}
