use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum GuardError {
    #[error("Record not found: {0}")]
    NotFound(String),
    #[error("Transaction {id} still locked after {waited:?}")]
    TransactionTimeout { id: String, waited: Duration },
    #[error("Record {0} is no longer available")]
    NotActive(String),
    #[error("Record {id} has kind '{found}', expected '{expected}'")]
    InvalidType {
        id: String,
        expected: &'static str,
        found: String,
    },
    #[error("Stale lock force-released: {0}")]
    StaleLock(String),
    #[error("Admission deadline elapsed before a rate-limit token was available")]
    RateLimited,
    #[error("Validation error: {0}")]
    Validation(String),
    #[error("Wallet error: {0}")]
    Wallet(String),
    #[error("Storage error: {0}")]
    Storage(String),
    #[cfg(feature = "storage-rocksdb")]
    #[error("RocksDB error: {0}")]
    RocksDB(#[from] rocksdb::Error),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl GuardError {
    /// Whether the caller may retry the same operation later.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            GuardError::TransactionTimeout { .. } | GuardError::RateLimited
        )
    }
}

pub type Result<T> = std::result::Result<T, GuardError>;
