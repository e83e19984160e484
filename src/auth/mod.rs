pub mod accounts;
pub mod extractors;
pub mod middleware;
pub mod ownership;
pub mod password;
pub mod resolver;
pub mod token;

use async_trait::async_trait;
use lazy_static::lazy_static;
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

use crate::error::AuthError;
use crate::models::{Principal, UserProfile};

// Re-export necessary items
pub use accounts::AccountService;
pub use extractors::CurrentUser;
pub use middleware::AuthMiddleware;
pub use ownership::{Action, AuthorizationDecision, DecisionReason, OwnershipGuard};
pub use password::{PasswordHasher, PasswordRecord};
pub use resolver::{bearer_token, IdentityResolver};
pub use token::{Claims, Credential, ExtraClaims, SigningKey, TokenService, TokenType};

lazy_static! {
    // Regex for username validation: alphanumeric, underscores, hyphens
    static ref USERNAME_REGEX: regex::Regex = regex::Regex::new(r"^[a-zA-Z0-9_-]+$").unwrap();
}

/// Answers "who is making this request?" for the HTTP layer.
#[async_trait]
pub trait RequestAuthenticator: Send + Sync {
    /// `authorization` is the raw `Authorization` header value, if present.
    async fn authenticate(&self, authorization: Option<&str>) -> Result<Principal, AuthError>;
}

/// Answers "may this principal touch a resource owned by `owner_id`?".
pub trait ResourceAuthorizer: Send + Sync {
    fn authorize(&self, principal: &Principal, owner_id: Uuid) -> bool;
}

/// Represents the payload for a user login request.
#[derive(Debug, Deserialize, Validate)]
pub struct LoginRequest {
    /// Email address or username.
    #[validate(length(min = 1, max = 255))]
    pub username: String,
    #[validate(length(min = 1))]
    pub password: String,
}

/// Represents the payload for a new user registration request.
#[derive(Debug, Deserialize, Validate)]
pub struct RegisterRequest {
    /// Desired username for the new account.
    /// Must be between 3 and 50 characters, alphanumeric, and can include underscores or hyphens.
    #[validate(
        length(min = 3, max = 50),
        regex(
            path = "USERNAME_REGEX",
            message = "Username must be alphanumeric, underscores, or hyphens"
        )
    )]
    pub username: String,
    /// Email address for the new account.
    /// Must be a valid email format.
    #[validate(email)]
    pub email: String,
    /// Password for the new account.
    /// Must be at least 8 characters long.
    #[validate(length(min = 8))]
    pub password: String,
}

#[derive(Debug, Deserialize)]
pub struct RefreshRequest {
    pub refresh_token: String,
}

#[derive(Debug, Deserialize, Validate)]
pub struct ChangePasswordRequest {
    #[validate(length(min = 1))]
    pub current_password: String,
    #[validate(length(min = 8))]
    pub new_password: String,
}

/// Response structure after a successful login, registration or refresh.
#[derive(Debug, Serialize, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    pub refresh_token: String,
    /// Always `"bearer"`.
    pub token_type: String,
    /// Access token lifetime in seconds.
    pub expires_in: i64,
    pub user_id: Uuid,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RegisterResponse {
    pub user: UserProfile,
    #[serde(flatten)]
    pub tokens: TokenResponse,
}

#[cfg(test)]
mod tests {
    use super::*;
    use validator::Validate;

    #[test]
    fn test_login_request_validation() {
        let valid_login = LoginRequest {
            username: "test@example.com".to_string(),
            password: "password123".to_string(),
        };
        assert!(valid_login.validate().is_ok());

        let by_username = LoginRequest {
            username: "test_user".to_string(),
            password: "password123".to_string(),
        };
        assert!(by_username.validate().is_ok());

        let empty_password = LoginRequest {
            username: "test@example.com".to_string(),
            password: "".to_string(),
        };
        assert!(empty_password.validate().is_err());
    }

    #[test]
    fn test_register_request_validation() {
        let valid_register = RegisterRequest {
            username: "test_user-123".to_string(),
            email: "test@example.com".to_string(),
            password: "password123".to_string(),
        };
        assert!(valid_register.validate().is_ok());

        let invalid_username_register = RegisterRequest {
            username: "test user!".to_string(), // Contains space and exclamation
            email: "test@example.com".to_string(),
            password: "password123".to_string(),
        };
        assert!(invalid_username_register.validate().is_err());

        let short_username_register = RegisterRequest {
            username: "tu".to_string(),
            email: "test@example.com".to_string(),
            password: "password123".to_string(),
        };
        assert!(short_username_register.validate().is_err());

        let long_username_register = RegisterRequest {
            username: "u".repeat(51),
            email: "test@example.com".to_string(),
            password: "password123".to_string(),
        };
        assert!(long_username_register.validate().is_err());

        let short_password_register = RegisterRequest {
            username: "test_user".to_string(),
            email: "test@example.com".to_string(),
            password: "1234567".to_string(),
        };
        assert!(short_password_register.validate().is_err());

        let invalid_email_register = RegisterRequest {
            username: "test_user".to_string(),
            email: "testexample.com".to_string(),
            password: "password123".to_string(),
        };
        assert!(invalid_email_register.validate().is_err());
    }

    #[test]
    fn test_register_response_is_flat() {
        let response = RegisterResponse {
            user: UserProfile {
                id: Uuid::new_v4(),
                username: "test_user".to_string(),
                email: "test@example.com".to_string(),
                is_active: true,
            },
            tokens: TokenResponse {
                access_token: "a".to_string(),
                refresh_token: "r".to_string(),
                token_type: "bearer".to_string(),
                expires_in: 1800,
                user_id: Uuid::new_v4(),
            },
        };
        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["token_type"], "bearer");
        assert_eq!(json["user"]["username"], "test_user");
    }
}
