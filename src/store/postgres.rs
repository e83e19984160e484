use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

use super::{AccountStore, StoreError, UserLookup};
use crate::auth::password::PasswordRecord;
use crate::models::{Account, NewAccount, Principal};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS users (
    id UUID PRIMARY KEY,
    username VARCHAR(50) NOT NULL UNIQUE,
    email VARCHAR(255) NOT NULL UNIQUE,
    password_hash TEXT NOT NULL,
    password_cost INTEGER NOT NULL,
    is_active BOOLEAN NOT NULL DEFAULT TRUE,
    is_admin BOOLEAN NOT NULL DEFAULT FALSE,
    created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
)
"#;

const COLUMNS: &str =
    "id, username, email, password_hash, password_cost, is_active, is_admin, created_at";

#[derive(Debug, FromRow)]
struct UserRow {
    id: Uuid,
    username: String,
    email: String,
    password_hash: String,
    password_cost: i32,
    is_active: bool,
    is_admin: bool,
    created_at: DateTime<Utc>,
}

impl From<UserRow> for Account {
    fn from(row: UserRow) -> Self {
        Account {
            principal: Principal {
                id: row.id,
                username: row.username,
                email: row.email,
                is_active: row.is_active,
                is_admin: row.is_admin,
            },
            password: PasswordRecord {
                salted_hash: row.password_hash,
                // A negative cost can only be a damaged row; verification rejects it.
                work_factor: u32::try_from(row.password_cost).unwrap_or(0),
            },
            created_at: row.created_at,
        }
    }
}

/// Postgres-backed account store.
#[derive(Debug, Clone)]
pub struct PgUserStore {
    pool: PgPool,
}

impl PgUserStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        let pool = PgPool::connect(database_url).await?;
        Ok(Self::new(pool))
    }

    /// Creates the `users` table if it does not exist yet.
    pub async fn ensure_schema(&self) -> Result<(), StoreError> {
        sqlx::query(SCHEMA).execute(&self.pool).await?;
        Ok(())
    }

    async fn fetch_one_where(&self, clause: &str, value: &str) -> Result<Option<Account>, StoreError> {
        let row = sqlx::query_as::<_, UserRow>(&format!(
            "SELECT {} FROM users WHERE {} = $1",
            COLUMNS, clause
        ))
        .bind(value)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(Account::from))
    }
}

fn map_unique_violation(error: sqlx::Error) -> StoreError {
    if let sqlx::Error::Database(db) = &error {
        match db.constraint() {
            Some("users_email_key") => return StoreError::DuplicateEmail,
            Some("users_username_key") => return StoreError::DuplicateUsername,
            _ => {}
        }
    }
    StoreError::Database(error)
}

#[async_trait]
impl UserLookup for PgUserStore {
    async fn find_by_id(&self, id: Uuid) -> Result<Option<Principal>, StoreError> {
        Ok(self.find_account(id).await?.map(|account| account.principal))
    }
}

#[async_trait]
impl AccountStore for PgUserStore {
    async fn find_account(&self, id: Uuid) -> Result<Option<Account>, StoreError> {
        let row = sqlx::query_as::<_, UserRow>(&format!(
            "SELECT {} FROM users WHERE id = $1",
            COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(Account::from))
    }

    async fn find_by_login(&self, login: &str) -> Result<Option<Account>, StoreError> {
        match self.fetch_one_where("email", login).await? {
            Some(account) => Ok(Some(account)),
            None => self.fetch_one_where("username", login).await,
        }
    }

    async fn create(&self, account: NewAccount) -> Result<Account, StoreError> {
        let row = sqlx::query_as::<_, UserRow>(&format!(
            "INSERT INTO users (id, username, email, password_hash, password_cost) \
             VALUES ($1, $2, $3, $4, $5) RETURNING {}",
            COLUMNS
        ))
        .bind(Uuid::new_v4())
        .bind(&account.username)
        .bind(&account.email)
        .bind(&account.password.salted_hash)
        .bind(account.password.work_factor as i32)
        .fetch_one(&self.pool)
        .await
        .map_err(map_unique_violation)?;
        Ok(row.into())
    }

    async fn update_password(&self, id: Uuid, password: PasswordRecord) -> Result<(), StoreError> {
        let result =
            sqlx::query("UPDATE users SET password_hash = $1, password_cost = $2 WHERE id = $3")
                .bind(&password.salted_hash)
                .bind(password.work_factor as i32)
                .bind(id)
                .execute(&self.pool)
                .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    async fn set_active(&self, id: Uuid, active: bool) -> Result<(), StoreError> {
        let result = sqlx::query("UPDATE users SET is_active = $1 WHERE id = $2")
            .bind(active)
            .bind(id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;

    // Needs a reachable Postgres in DATABASE_URL.
    #[ignore]
    #[actix_rt::test]
    async fn test_pg_store_round_trip() {
        dotenv::dotenv().ok();
        let store = PgUserStore::connect(&env::var("DATABASE_URL").expect("DATABASE_URL not set"))
            .await
            .unwrap();
        store.ensure_schema().await.unwrap();

        let suffix = Uuid::new_v4().simple().to_string();
        let username = format!("pg_{}", &suffix[..12]);
        let email = format!("{}@example.com", username);
        let record = PasswordRecord {
            salted_hash: bcrypt::hash("password123", 4).unwrap(),
            work_factor: 4,
        };
        let account = store
            .create(NewAccount {
                username: username.clone(),
                email: email.clone(),
                password: record.clone(),
            })
            .await
            .unwrap();

        let found = store.find_by_login(&username).await.unwrap().unwrap();
        assert_eq!(found.principal.id, account.principal.id);
        assert_eq!(found.password, record);

        let duplicate = store
            .create(NewAccount {
                username: format!("{}x", username),
                email,
                password: record,
            })
            .await;
        assert!(matches!(duplicate, Err(StoreError::DuplicateEmail)));

        store.set_active(account.principal.id, false).await.unwrap();
        let principal = store.find_by_id(account.principal.id).await.unwrap().unwrap();
        assert!(!principal.is_active);
    }
}
