use std::sync::Arc;

use crate::auth::{AccountService, IdentityResolver, OwnershipGuard, TokenService};
use crate::clock::Clock;
use crate::config::{AuthConfig, ConfigError};
use crate::rate_limit::RateLimiter;
use crate::store::{AccountStore, UserLookup};

/// Everything the HTTP layer needs, built once at startup and shared by every worker.
#[derive(Clone)]
pub struct AppState {
    pub accounts: Arc<AccountService>,
    pub authenticator: Arc<IdentityResolver>,
    pub throttle: Arc<RateLimiter>,
    pub users: Arc<dyn UserLookup>,
    pub guard: OwnershipGuard,
}

impl AppState {
    pub fn new<S>(config: &AuthConfig, store: Arc<S>, clock: Arc<dyn Clock>) -> Result<Self, ConfigError>
    where
        S: AccountStore + 'static,
    {
        let tokens = Arc::new(TokenService::from_config(config, clock.clone())?);
        let users: Arc<dyn UserLookup> = store.clone();
        let accounts = AccountService::from_config(config, store, tokens.clone())?;

        Ok(Self {
            accounts: Arc::new(accounts),
            authenticator: Arc::new(IdentityResolver::new(tokens, users.clone())),
            throttle: Arc::new(RateLimiter::new(config.rate_limit.clone(), clock)),
            users,
            guard: OwnershipGuard::strict(),
        })
    }
}
