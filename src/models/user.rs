use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::auth::password::PasswordRecord;

/// An authenticated account as seen by the auth core.
///
/// Loaded fresh from the user store on every request and dropped with it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Principal {
    pub id: Uuid,
    pub username: String,
    pub email: String,
    pub is_active: bool,
    /// Explicit administrative flag. Never inferred from anything else.
    #[serde(default)]
    pub is_admin: bool,
}

/// A stored account: the principal plus what only the login flow may read.
#[derive(Debug, Clone)]
pub struct Account {
    pub principal: Principal,
    pub password: PasswordRecord,
    pub created_at: DateTime<Utc>,
}

/// An account about to be created. The password is already hashed.
#[derive(Debug, Clone)]
pub struct NewAccount {
    pub username: String,
    pub email: String,
    pub password: PasswordRecord,
}

/// Public view of an account. Password material is never serialized.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserProfile {
    pub id: Uuid,
    pub username: String,
    pub email: String,
    pub is_active: bool,
}

impl From<&Principal> for UserProfile {
    fn from(principal: &Principal) -> Self {
        Self {
            id: principal.id,
            username: principal.username.clone(),
            email: principal.email.clone(),
            is_active: principal.is_active,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_profile_has_no_password_fields() {
        let principal = Principal {
            id: Uuid::new_v4(),
            username: "testuser".to_string(),
            email: "test@example.com".to_string(),
            is_active: true,
            is_admin: false,
        };
        let json = serde_json::to_value(UserProfile::from(&principal)).unwrap();

        assert_eq!(json["username"], "testuser");
        assert!(json.get("password").is_none());
        assert!(json.get("salted_hash").is_none());
    }
}
