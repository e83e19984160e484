use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{AccountStore, StoreError, UserLookup};
use crate::auth::password::PasswordRecord;
use crate::models::{Account, NewAccount, Principal};

/// Process-local account store. Used by the tests and when no database is configured.
#[derive(Debug, Default)]
pub struct MemoryUserStore {
    accounts: RwLock<HashMap<Uuid, Account>>,
}

impl MemoryUserStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Grants or revokes the administrative flag.
    pub async fn set_admin(&self, id: Uuid, admin: bool) -> Result<(), StoreError> {
        let mut accounts = self.accounts.write().await;
        let account = accounts.get_mut(&id).ok_or(StoreError::NotFound)?;
        account.principal.is_admin = admin;
        Ok(())
    }

    pub async fn len(&self) -> usize {
        self.accounts.read().await.len()
    }
}

#[async_trait]
impl UserLookup for MemoryUserStore {
    async fn find_by_id(&self, id: Uuid) -> Result<Option<Principal>, StoreError> {
        Ok(self
            .accounts
            .read()
            .await
            .get(&id)
            .map(|account| account.principal.clone()))
    }
}

#[async_trait]
impl AccountStore for MemoryUserStore {
    async fn find_account(&self, id: Uuid) -> Result<Option<Account>, StoreError> {
        Ok(self.accounts.read().await.get(&id).cloned())
    }

    async fn find_by_login(&self, login: &str) -> Result<Option<Account>, StoreError> {
        let accounts = self.accounts.read().await;
        let by_email = accounts.values().find(|a| a.principal.email == login);
        let found = by_email.or_else(|| accounts.values().find(|a| a.principal.username == login));
        Ok(found.cloned())
    }

    async fn create(&self, account: NewAccount) -> Result<Account, StoreError> {
        let mut accounts = self.accounts.write().await;
        if accounts.values().any(|a| a.principal.email == account.email) {
            return Err(StoreError::DuplicateEmail);
        }
        if accounts
            .values()
            .any(|a| a.principal.username == account.username)
        {
            return Err(StoreError::DuplicateUsername);
        }

        let created = Account {
            principal: Principal {
                id: Uuid::new_v4(),
                username: account.username,
                email: account.email,
                is_active: true,
                is_admin: false,
            },
            password: account.password,
            created_at: Utc::now(),
        };
        accounts.insert(created.principal.id, created.clone());
        Ok(created)
    }

    async fn update_password(&self, id: Uuid, password: PasswordRecord) -> Result<(), StoreError> {
        let mut accounts = self.accounts.write().await;
        let account = accounts.get_mut(&id).ok_or(StoreError::NotFound)?;
        account.password = password;
        Ok(())
    }

    async fn set_active(&self, id: Uuid, active: bool) -> Result<(), StoreError> {
        let mut accounts = self.accounts.write().await;
        let account = accounts.get_mut(&id).ok_or(StoreError::NotFound)?;
        account.principal.is_active = active;
        Ok(())
    }
}
