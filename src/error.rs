use thiserror::Error;

use crate::dao::key_record::KeyPool;

/// Errors raised below the inventory boundary
#[derive(Debug, Error)]
pub enum InventoryError {
    #[error("key already present in {pool} pool: {value}")]
    DuplicateKey { pool: KeyPool, value: String },

    #[error("rejected {pool} key: {reason}")]
    InvalidKey { pool: KeyPool, reason: String },

    #[error("no unused keys left in {0} pool")]
    PoolExhausted(KeyPool),

    #[error("storage failure: {0}")]
    Storage(#[from] sqlx::Error),
}

impl InventoryError {
    /// Map a failed insert, telling unique-constraint violations apart from real storage failures.
    pub(crate) fn from_insert(pool: KeyPool, value: &str, err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::Database(db_err) if db_err.is_unique_violation() => {
                InventoryError::DuplicateKey {
                    pool,
                    value: value.to_string(),
                }
            }
            _ => InventoryError::Storage(err),
        }
    }
}

/// Startup configuration errors. These are the only fatal ones.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ConfigError {
    #[error("required setting {0} is not set")]
    Missing(&'static str),

    #[error("invalid value for {var}: {message}")]
    Invalid { var: &'static str, message: String },
}
