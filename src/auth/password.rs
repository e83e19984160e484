use crate::config::ConfigError;
use crate::error::AuthError;
use serde::{Deserialize, Serialize};

/// A stored password: bcrypt output (salt embedded) plus the cost it was made with.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PasswordRecord {
    pub salted_hash: String,
    pub work_factor: u32,
}

/// Hashes and verifies passwords with bcrypt at a configurable cost.
///
/// Both operations are deliberately slow and CPU-bound; async callers should run them on the
/// blocking pool.
#[derive(Debug, Clone, Copy)]
pub struct PasswordHasher {
    cost: u32,
}

impl Default for PasswordHasher {
    fn default() -> Self {
        Self {
            cost: bcrypt::DEFAULT_COST,
        }
    }
}

impl PasswordHasher {
    pub fn new(cost: u32) -> Result<Self, ConfigError> {
        if !(4..=31).contains(&cost) {
            return Err(ConfigError::Invalid {
                name: "BCRYPT_COST",
                reason: format!("{} is outside 4..=31", cost),
            });
        }
        Ok(Self { cost })
    }

    pub fn cost(&self) -> u32 {
        self.cost
    }

    /// Hashes with a fresh random salt, so two calls never produce the same record.
    pub fn hash(&self, plaintext: &str) -> Result<PasswordRecord, AuthError> {
        if plaintext.is_empty() {
            return Err(AuthError::InvalidInput("password must not be empty".into()));
        }
        let salted_hash = bcrypt::hash(plaintext, self.cost)
            .map_err(|e| AuthError::Internal(format!("Failed to hash password: {}", e)))?;
        Ok(PasswordRecord {
            salted_hash,
            work_factor: self.cost,
        })
    }

    /// Checks `plaintext` against `record`. A wrong password is `Ok(false)`; only
    /// empty input or a damaged record is an error. bcrypt compares in constant time.
    pub fn verify(&self, plaintext: &str, record: &PasswordRecord) -> Result<bool, AuthError> {
        if plaintext.is_empty() {
            return Err(AuthError::InvalidInput("password must not be empty".into()));
        }
        if embedded_cost(&record.salted_hash) != Some(record.work_factor) {
            return Err(AuthError::InvalidInput("corrupted password record".into()));
        }
        bcrypt::verify(plaintext, &record.salted_hash)
            .map_err(|e| AuthError::InvalidInput(format!("corrupted password record: {}", e)))
    }

    /// True when the record was made with a lower cost than the current setting.
    pub fn needs_rehash(&self, record: &PasswordRecord) -> bool {
        record.work_factor < self.cost
    }
}

/// Reads the cost out of a modular-crypt bcrypt string (`$2b$12$...`).
fn embedded_cost(hash: &str) -> Option<u32> {
    let mut parts = hash.split('$');
    if !parts.next()?.is_empty() {
        return None;
    }
    let _version = parts.next()?;
    parts.next()?.parse().ok()
}
