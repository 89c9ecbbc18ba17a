use thiserror::Error;

use crate::storage::StoreError;

impl From<serde_json::Error> for LedgerError {
    fn from(err: serde_json::Error) -> Self {
        Self::ValidationError(format!("JSON serialization error: {}", err))
    }
}

impl From<sqlx::Error> for LedgerError {
    fn from(err: sqlx::Error) -> Self {
        Self::StorageError(format!("Database error: {}", err))
    }
}

impl From<config::ConfigError> for LedgerError {
    fn from(err: config::ConfigError) -> Self {
        Self::ConfigError(err.to_string())
    }
}

impl From<StoreError> for LedgerError {
    fn from(err: StoreError) -> Self {
        Self::StorageError(err.to_string())
    }
}

#[derive(Error, Debug)]
pub enum LedgerError {
    /// Payload could not be canonicalized, or an idempotency key was misused.
    /// Nothing was hashed or stored.
    #[error("Validation error: {0}")]
    ValidationError(String),

    /// Lock contention or storage failure on the append path. Always safe to
    /// retry: the tail is re-read on every attempt.
    #[error("Writer unavailable: {0}")]
    WriterUnavailable(String),

    #[error("Invalid stream: {0}")]
    InvalidStream(String),

    #[error("Storage error: {0}")]
    StorageError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),
}

impl LedgerError {
    pub fn lock_timeout(stream: &str, waited_ms: u64) -> Self {
        Self::WriterUnavailable(format!(
            "Timed out after {}ms waiting for the tail lock of stream '{}'",
            waited_ms, stream
        ))
    }

    pub fn retries_exhausted(stream: &str, attempts: u32, last: &str) -> Self {
        Self::WriterUnavailable(format!(
            "Append to stream '{}' failed after {} attempts: {}",
            stream, attempts, last
        ))
    }

    pub fn idempotency_conflict(stream: &str, key: &str, sequence: u64) -> Self {
        Self::ValidationError(format!(
            "Idempotency key '{}' already used in stream '{}' (sequence {}) with a different payload",
            key, stream, sequence
        ))
    }

    /// Whether the caller may retry the same operation unchanged.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::WriterUnavailable(_))
    }
}
