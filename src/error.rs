//!
//! # Error Handling
//!
//! Two layers of errors live here.
//!
//! `AuthError` is the rejection taxonomy of the authentication, authorization and
//! rate-limiting core. Every rejection is an ordinary return value; nothing in the core
//! panics on bad input. Credential failures are distinguished internally (and in debug
//! logs) but rendered identically to clients so an attacker cannot tell a bad signature
//! from an expired token.
//!
//! `AppError` is the HTTP-facing error used by route handlers. It wraps `AuthError` and
//! adds the request-validation and storage failures that only the routing layer sees.
//! Both implement `actix_web::error::ResponseError` so handlers can use `?` freely.

use actix_web::{error::ResponseError, http::header, http::StatusCode, HttpResponse};
use serde_json::json;
use std::fmt;
use std::time::Duration;
use validator::ValidationErrors;

use crate::rate_limit::whole_seconds_ceil;
use crate::store::StoreError;

const INVALID_CREDENTIALS: &str = "Could not validate credentials";

/// Rejections produced by the auth core.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AuthError {
    /// The credential is not a structurally valid token.
    #[error("malformed credential")]
    MalformedCredential,
    /// The signature does not verify under any accepted key.
    #[error("bad signature")]
    BadSignature,
    /// The token's validity window has closed.
    #[error("credential expired")]
    Expired,
    /// A valid token presented for the wrong purpose (e.g. refresh used as access).
    #[error("wrong token type")]
    WrongTokenType,
    /// No bearer credential was supplied.
    #[error("missing credential")]
    MissingCredential,
    /// The token names an account that no longer exists.
    #[error("unknown principal")]
    UnknownPrincipal,
    /// The token names an account that has been disabled.
    #[error("inactive principal")]
    InactivePrincipal,
    /// The principal does not own the resource.
    #[error("ownership denied")]
    OwnershipDenied,
    /// The caller exceeded its rate limit.
    #[error("throttled, retry after {retry_after:?}")]
    Throttled { retry_after: Duration },
    /// Input the core refuses to process (empty password, corrupted hash record, negative TTL).
    #[error("invalid input: {0}")]
    InvalidInput(String),
    /// The user store could not be reached.
    #[error("user lookup failed: {0}")]
    LookupFailed(String),
    /// Unexpected failure inside the core (e.g. token encoding).
    #[error("internal error: {0}")]
    Internal(String),
}

impl AuthError {
    /// True for the failures that mean "this credential does not authenticate anybody".
    pub fn is_credential_failure(&self) -> bool {
        matches!(
            self,
            AuthError::MalformedCredential
                | AuthError::BadSignature
                | AuthError::Expired
                | AuthError::WrongTokenType
                | AuthError::MissingCredential
                | AuthError::UnknownPrincipal
        )
    }

    fn public_message(&self) -> String {
        match self {
            AuthError::MissingCredential => "Not authenticated".into(),
            AuthError::InactivePrincipal => "Inactive user".into(),
            AuthError::OwnershipDenied => "Not found".into(),
            AuthError::Throttled { .. } => "Rate limit exceeded".into(),
            AuthError::InvalidInput(msg) => msg.clone(),
            AuthError::LookupFailed(_) => "Service temporarily unavailable".into(),
            AuthError::Internal(_) => "Internal server error".into(),
            _ => INVALID_CREDENTIALS.into(),
        }
    }
}

impl ResponseError for AuthError {
    fn status_code(&self) -> StatusCode {
        match self {
            AuthError::InactivePrincipal => StatusCode::BAD_REQUEST,
            // Not-owned and not-found must look the same from outside.
            AuthError::OwnershipDenied => StatusCode::NOT_FOUND,
            AuthError::Throttled { .. } => StatusCode::TOO_MANY_REQUESTS,
            AuthError::InvalidInput(_) => StatusCode::UNPROCESSABLE_ENTITY,
            AuthError::LookupFailed(_) => StatusCode::SERVICE_UNAVAILABLE,
            AuthError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            _ => StatusCode::UNAUTHORIZED,
        }
    }

    fn error_response(&self) -> HttpResponse {
        let mut builder = HttpResponse::build(self.status_code());
        match self {
            AuthError::Throttled { retry_after } => {
                let secs = whole_seconds_ceil(*retry_after);
                builder
                    .insert_header((header::RETRY_AFTER, secs.to_string()))
                    .json(json!({
                        "error": self.public_message(),
                        "retry_after": secs
                    }))
            }
            e if e.is_credential_failure() => builder
                .insert_header((header::WWW_AUTHENTICATE, "Bearer"))
                .json(json!({ "error": e.public_message() })),
            e => builder.json(json!({ "error": e.public_message() })),
        }
    }
}

/// Represents all possible errors that can occur within the HTTP layer.
///
/// Each variant corresponds to a specific type of error, often carrying a message
/// detailing the issue. These errors are then converted into appropriate HTTP responses.
#[derive(Debug)]
pub enum AppError {
    /// Authentication or authorization rejected the request.
    Auth(AuthError),
    /// Login failed (HTTP 401).
    Unauthorized(String),
    /// Represents a client-side error due to a malformed or invalid request (HTTP 400).
    BadRequest(String),
    /// Represents a situation where a requested resource was not found (HTTP 404).
    NotFound(String),
    /// Represents an unexpected server-side error (HTTP 500).
    InternalServerError(String),
    /// Represents an error originating from the user store (HTTP 500).
    DatabaseError(String),
    /// Represents an error due to failed input validation (HTTP 422 Unprocessable Entity).
    ValidationError(String),
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            AppError::Auth(err) => write!(f, "Auth: {}", err),
            AppError::Unauthorized(msg) => write!(f, "Unauthorized: {}", msg),
            AppError::BadRequest(msg) => write!(f, "Bad Request: {}", msg),
            AppError::NotFound(msg) => write!(f, "Not Found: {}", msg),
            AppError::InternalServerError(msg) => write!(f, "Internal Server Error: {}", msg),
            AppError::DatabaseError(msg) => write!(f, "Database Error: {}", msg),
            AppError::ValidationError(msg) => write!(f, "Validation Error: {}", msg),
        }
    }
}

impl ResponseError for AppError {
    fn status_code(&self) -> StatusCode {
        match self {
            AppError::Auth(err) => err.status_code(),
            AppError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::InternalServerError(_) | AppError::DatabaseError(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            AppError::ValidationError(_) => StatusCode::UNPROCESSABLE_ENTITY,
        }
    }

    fn error_response(&self) -> HttpResponse {
        match self {
            AppError::Auth(err) => err.error_response(),
            AppError::Unauthorized(msg) => HttpResponse::Unauthorized()
                .insert_header((header::WWW_AUTHENTICATE, "Bearer"))
                .json(json!({ "error": msg })),
            // Storage details stay in the logs.
            AppError::DatabaseError(_) => HttpResponse::InternalServerError().json(json!({
                "error": "Database error"
            })),
            AppError::BadRequest(msg)
            | AppError::NotFound(msg)
            | AppError::InternalServerError(msg)
            | AppError::ValidationError(msg) => {
                HttpResponse::build(self.status_code()).json(json!({ "error": msg }))
            }
        }
    }
}

impl From<AuthError> for AppError {
    fn from(error: AuthError) -> AppError {
        AppError::Auth(error)
    }
}

/// Duplicate accounts are a client error; everything else from the store is logged
/// and hidden behind a generic response.
impl From<StoreError> for AppError {
    fn from(error: StoreError) -> AppError {
        match error {
            StoreError::DuplicateEmail => AppError::BadRequest("Email already registered".into()),
            StoreError::DuplicateUsername => AppError::BadRequest("Username already taken".into()),
            StoreError::NotFound => AppError::NotFound("User not found".into()),
            StoreError::Database(e) => {
                log::error!("user store failure: {}", e);
                AppError::DatabaseError(e.to_string())
            }
        }
    }
}

/// Converts `validator::ValidationErrors` into `AppError::ValidationError`.
impl From<ValidationErrors> for AppError {
    fn from(error: ValidationErrors) -> AppError {
        AppError::ValidationError(error.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_credential_failures_render_identically() {
        for err in [
            AuthError::MalformedCredential,
            AuthError::BadSignature,
            AuthError::Expired,
            AuthError::WrongTokenType,
            AuthError::UnknownPrincipal,
        ] {
            let response = err.error_response();
            assert_eq!(response.status(), 401);
            assert_eq!(
                response.headers().get(header::WWW_AUTHENTICATE).unwrap(),
                "Bearer"
            );
            assert_eq!(err.public_message(), INVALID_CREDENTIALS);
        }
    }

    #[test]
    fn test_error_responses() {
        assert_eq!(AuthError::MissingCredential.error_response().status(), 401);
        assert_eq!(AuthError::InactivePrincipal.error_response().status(), 400);
        assert_eq!(AuthError::OwnershipDenied.error_response().status(), 404);
        assert_eq!(
            AuthError::LookupFailed("down".into()).error_response().status(),
            503
        );

        let error = AppError::BadRequest("Invalid input".into());
        assert_eq!(error.error_response().status(), 400);

        let error = AppError::ValidationError("too short".into());
        assert_eq!(error.error_response().status(), 422);

        let error = AppError::from(AuthError::Expired);
        assert_eq!(error.error_response().status(), 401);

        let error = AppError::from(StoreError::DuplicateEmail);
        assert_eq!(error.error_response().status(), 400);
    }

    #[test]
    fn test_throttled_sets_retry_after() {
        let err = AuthError::Throttled {
            retry_after: Duration::from_millis(12_300),
        };
        let response = err.error_response();
        assert_eq!(response.status(), 429);
        assert_eq!(response.headers().get(header::RETRY_AFTER).unwrap(), "13");
    }
}
