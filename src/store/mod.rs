//! User storage seen from the auth core.
//!
//! The core only ever reads principals through [`UserLookup`]. The account flows
//! (registration, login, password change) additionally need [`AccountStore`], which is
//! the only path through which a `PasswordRecord` is written.

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use uuid::Uuid;

use crate::auth::password::PasswordRecord;
use crate::models::{Account, NewAccount, Principal};

pub use memory::MemoryUserStore;
pub use postgres::PgUserStore;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("email already registered")]
    DuplicateEmail,
    #[error("username already taken")]
    DuplicateUsername,
    #[error("account not found")]
    NotFound,
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Live account state by id.
#[async_trait]
pub trait UserLookup: Send + Sync {
    async fn find_by_id(&self, id: Uuid) -> Result<Option<Principal>, StoreError>;
}

#[async_trait]
pub trait AccountStore: UserLookup {
    /// Full account, password record included.
    async fn find_account(&self, id: Uuid) -> Result<Option<Account>, StoreError>;

    /// Looks the login up as an email first, then as a username.
    async fn find_by_login(&self, login: &str) -> Result<Option<Account>, StoreError>;

    async fn create(&self, account: NewAccount) -> Result<Account, StoreError>;

    async fn update_password(&self, id: Uuid, password: PasswordRecord) -> Result<(), StoreError>;

    async fn set_active(&self, id: Uuid, active: bool) -> Result<(), StoreError>;
}
