use std::time::Duration;

use thiserror::Error;

/// Errors that can occur when interacting with the sale store.
///
/// Outcomes that belong to an operation's contract (insufficient stock,
/// duplicate key, order already terminal) are returned as values, not
/// errors; these variants cover the store machinery itself.
#[derive(Debug, Error)]
pub enum StoreError {
    /// A row lock could not be acquired within the bounded wait.
    ///
    /// Retryable: the caller should back off and try again.
    #[error("lock wait exceeded {0:?}")]
    LockTimeout(Duration),

    /// Stored state contradicts an invariant the paired-transaction
    /// discipline guarantees. Never recovered silently.
    #[error("integrity violation: {0}")]
    Integrity(String),

    /// A database error occurred.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A database migration error occurred.
    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
}

impl StoreError {
    /// Returns true if the caller may retry the operation after backoff.
    pub fn is_retryable(&self) -> bool {
        matches!(self, StoreError::LockTimeout(_))
    }
}

/// Result type for sale store operations.
pub type Result<T> = std::result::Result<T, StoreError>;
