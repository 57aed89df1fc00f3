//! Storage errors.
//!
//! Inability to reach the persisted state is the only failure the core lets
//! escape. Evidence, suggestion and execution failures are reported as values.

/// Errors raised by the SQLite-backed store
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("invalid snapshot payload: {0}")]
    Payload(#[from] serde_json::Error),

    #[error("database connection lock poisoned")]
    LockPoisoned,
}

pub type StoreResult<T> = Result<T, StoreError>;
