//! Common error types for ReviewSync.

use thiserror::Error;

/// Top-level error type for ReviewSync operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Embedded database operation failed.
    #[error("Database error: {0}")]
    Database(String),

    /// The database is locked by another writer.
    #[error("Database busy: {0}")]
    Busy(String),

    /// Invalid input provided.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Resource not found.
    #[error("Not found: {0}")]
    NotFound(String),
}

impl Error {
    /// Whether the error is transient lock contention on the local store.
    pub fn is_busy(&self) -> bool {
        matches!(self, Error::Busy(_))
    }
}

/// Result type alias using the common Error.
pub type Result<T> = std::result::Result<T, Error>;
