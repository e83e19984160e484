use async_trait::async_trait;
use std::sync::Arc;
use uuid::Uuid;

use super::token::{TokenService, TokenType};
use super::RequestAuthenticator;
use crate::error::AuthError;
use crate::models::Principal;
use crate::store::UserLookup;

/// Pulls the credential out of an `Authorization: Bearer <token>` header value.
///
/// The scheme is matched case-insensitively. Anything else counts as no credential.
pub fn bearer_token(header: &str) -> Option<&str> {
    let (scheme, token) = header.trim().split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }
    let token = token.trim();
    (!token.is_empty()).then_some(token)
}

/// Turns an inbound credential into the live principal it names.
///
/// Every call re-reads the account, so a deactivated user is locked out on their
/// next request even though their tokens are still cryptographically valid.
#[derive(Clone)]
pub struct IdentityResolver {
    tokens: Arc<TokenService>,
    users: Arc<dyn UserLookup>,
}

impl IdentityResolver {
    pub fn new(tokens: Arc<TokenService>, users: Arc<dyn UserLookup>) -> Self {
        Self { tokens, users }
    }

    /// Resolves the raw `Authorization` header value, if any.
    pub async fn resolve(&self, authorization: Option<&str>) -> Result<Principal, AuthError> {
        let token = authorization
            .and_then(bearer_token)
            .ok_or(AuthError::MissingCredential)?;
        self.resolve_token(token).await
    }

    /// Like [`resolve`](Self::resolve) but treats a missing credential as anonymous.
    /// A credential that is present and bad is still an error.
    pub async fn resolve_optional(
        &self,
        authorization: Option<&str>,
    ) -> Result<Option<Principal>, AuthError> {
        match authorization.and_then(bearer_token) {
            Some(token) => self.resolve_token(token).await.map(Some),
            None => Ok(None),
        }
    }

    pub async fn resolve_token(&self, token: &str) -> Result<Principal, AuthError> {
        let verified = self.tokens.verify(token, TokenType::Access)?;
        load_active(self.users.as_ref(), verified.principal_id).await
    }
}

/// Reads the principal fresh from the store and insists it is still active.
pub(crate) async fn load_active<U>(users: &U, id: Uuid) -> Result<Principal, AuthError>
where
    U: UserLookup + ?Sized,
{
    let principal = match users.find_by_id(id).await {
        Ok(Some(principal)) => principal,
        Ok(None) => {
            log::debug!("token names unknown principal {}", id);
            return Err(AuthError::UnknownPrincipal);
        }
        Err(e) => {
            log::warn!("user lookup failed: {}", e);
            return Err(AuthError::LookupFailed(e.to_string()));
        }
    };

    if !principal.is_active {
        log::debug!("inactive principal {} rejected", principal.id);
        return Err(AuthError::InactivePrincipal);
    }
    Ok(principal)
}

#[async_trait]
impl RequestAuthenticator for IdentityResolver {
    async fn authenticate(&self, authorization: Option<&str>) -> Result<Principal, AuthError> {
        self.resolve(authorization).await
    }
}
