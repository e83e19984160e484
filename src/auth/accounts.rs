use chrono::Duration;
use std::sync::Arc;
use tokio::sync::OnceCell;
use uuid::Uuid;
use validator::Validate;

use super::password::{PasswordHasher, PasswordRecord};
use super::resolver::load_active;
use super::token::{ExtraClaims, TokenService, TokenType};
use super::{ChangePasswordRequest, LoginRequest, RegisterRequest, RegisterResponse, TokenResponse};
use crate::config::{AuthConfig, ConfigError};
use crate::error::{AppError, AuthError};
use crate::models::{NewAccount, Principal, UserProfile};
use crate::store::AccountStore;

const BAD_LOGIN: &str = "Incorrect username or password";
const DECOY_PASSWORD: &str = "taskguard-decoy-password";

/// Registration, login, token refresh and password changes.
///
/// This is the only place a password is hashed or a `PasswordRecord` written.
pub struct AccountService {
    store: Arc<dyn AccountStore>,
    hasher: PasswordHasher,
    tokens: Arc<TokenService>,
    access_ttl: Duration,
    refresh_ttl: Duration,
    /// Hashed at the configured cost on first use; checked against logins that match no account.
    decoy: OnceCell<PasswordRecord>,
}

impl AccountService {
    pub fn new(
        store: Arc<dyn AccountStore>,
        hasher: PasswordHasher,
        tokens: Arc<TokenService>,
        access_ttl: Duration,
        refresh_ttl: Duration,
    ) -> Self {
        Self {
            store,
            hasher,
            tokens,
            access_ttl,
            refresh_ttl,
            decoy: OnceCell::new(),
        }
    }

    pub fn from_config(
        config: &AuthConfig,
        store: Arc<dyn AccountStore>,
        tokens: Arc<TokenService>,
    ) -> Result<Self, ConfigError> {
        Ok(Self::new(
            store,
            PasswordHasher::new(config.bcrypt_cost)?,
            tokens,
            config.access_token_ttl,
            config.refresh_token_ttl,
        ))
    }

    pub async fn register(&self, request: RegisterRequest) -> Result<RegisterResponse, AppError> {
        request.validate()?;

        let password = self.hash(request.password).await?;
        let account = self
            .store
            .create(NewAccount {
                username: request.username,
                email: request.email,
                password,
            })
            .await?;
        log::info!(
            "registered user {} ({})",
            account.principal.username,
            account.principal.id
        );

        let tokens = self.issue_pair(&account.principal)?;
        Ok(RegisterResponse {
            user: UserProfile::from(&account.principal),
            tokens,
        })
    }

    /// `request.username` may hold either the email or the username.
    pub async fn login(&self, request: LoginRequest) -> Result<TokenResponse, AppError> {
        request.validate()?;

        let account = match self.store.find_by_login(&request.username).await? {
            Some(account) => account,
            None => {
                log::debug!("login for unknown account");
                // Unknown logins pay for one bcrypt verify, same as a wrong password.
                self.verify_decoy(request.password).await;
                return Err(AppError::Unauthorized(BAD_LOGIN.into()));
            }
        };
        let id = account.principal.id;

        if !self
            .verify(id, request.password.clone(), account.password.clone())
            .await?
        {
            log::debug!("wrong password for {}", id);
            return Err(AppError::Unauthorized(BAD_LOGIN.into()));
        }
        if !account.principal.is_active {
            return Err(AuthError::InactivePrincipal.into());
        }

        if self.hasher.needs_rehash(&account.password) {
            // The login itself already succeeded; a failed upgrade is retried next time.
            match self.hash(request.password).await {
                Ok(record) => match self.store.update_password(id, record).await {
                    Ok(()) => log::info!("upgraded password hash for {}", id),
                    Err(e) => log::warn!("failed to store upgraded hash for {}: {}", id, e),
                },
                Err(e) => log::warn!("failed to rehash password for {}: {}", id, e),
            }
        }

        Ok(self.issue_pair(&account.principal)?)
    }

    /// Trades a refresh token for a new pair. The account is re-checked, so a
    /// deactivated user cannot keep refreshing.
    pub async fn refresh(&self, refresh_token: &str) -> Result<TokenResponse, AppError> {
        let verified = self.tokens.verify(refresh_token, TokenType::Refresh)?;
        let principal = load_active(self.store.as_ref(), verified.principal_id).await?;
        Ok(self.issue_pair(&principal)?)
    }

    pub async fn change_password(
        &self,
        principal_id: Uuid,
        request: ChangePasswordRequest,
    ) -> Result<(), AppError> {
        request.validate()?;

        let account = self
            .store
            .find_account(principal_id)
            .await?
            .ok_or_else(|| AppError::NotFound("User not found".into()))?;
        if !self
            .verify(principal_id, request.current_password, account.password)
            .await?
        {
            return Err(AppError::Unauthorized("Incorrect password".into()));
        }

        let record = self.hash(request.new_password).await?;
        self.store.update_password(principal_id, record).await?;
        log::info!("password changed for {}", principal_id);
        Ok(())
    }

    /// Enables or disables an account. Takes effect on the account's next request.
    pub async fn set_active(&self, principal_id: Uuid, active: bool) -> Result<(), AppError> {
        self.store.set_active(principal_id, active).await?;
        log::info!("account {} active={}", principal_id, active);
        Ok(())
    }

    fn issue_pair(&self, principal: &Principal) -> Result<TokenResponse, AuthError> {
        let extra = ExtraClaims {
            email: Some(principal.email.clone()),
        };
        let access = self
            .tokens
            .issue(principal.id, extra.clone(), TokenType::Access, self.access_ttl)?;
        let refresh = self
            .tokens
            .issue(principal.id, extra, TokenType::Refresh, self.refresh_ttl)?;

        Ok(TokenResponse {
            access_token: access.token,
            refresh_token: refresh.token,
            token_type: "bearer".to_string(),
            expires_in: access.expires_in.num_seconds(),
            user_id: principal.id,
        })
    }

    async fn hash(&self, password: String) -> Result<PasswordRecord, AuthError> {
        let hasher = self.hasher;
        tokio::task::spawn_blocking(move || hasher.hash(&password))
            .await
            .map_err(|e| AuthError::Internal(format!("hashing task failed: {}", e)))?
    }

    async fn verify_decoy(&self, password: String) {
        let record = match self
            .decoy
            .get_or_try_init(|| self.hash(DECOY_PASSWORD.to_string()))
            .await
        {
            Ok(record) => record.clone(),
            Err(e) => {
                log::warn!("failed to build decoy password hash: {}", e);
                return;
            }
        };
        let hasher = self.hasher;
        if let Err(e) = tokio::task::spawn_blocking(move || hasher.verify(&password, &record)).await
        {
            log::warn!("decoy verify task failed: {}", e);
        }
    }

    /// A stored record bcrypt cannot read is our problem, not the caller's.
    async fn verify(
        &self,
        principal_id: Uuid,
        password: String,
        record: PasswordRecord,
    ) -> Result<bool, AuthError> {
        let hasher = self.hasher;
        tokio::task::spawn_blocking(move || hasher.verify(&password, &record))
            .await
            .map_err(|e| AuthError::Internal(format!("verify task failed: {}", e)))?
            .map_err(|e| {
                log::error!("unusable password record for {}: {}", principal_id, e);
                AuthError::Internal("unusable password record".into())
            })
    }
}
