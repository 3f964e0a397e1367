//! Error types for the storage engine.

use thiserror::Error;

/// Result type alias for storage operations
pub type Result<T> = std::result::Result<T, StorageError>;

/// Errors that can occur in the storage engine
#[derive(Error, Debug)]
pub enum StorageError {
    /// I/O error from the underlying block file
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Every resident frame is pinned and the requested page is not
    /// resident. Transient: the caller may retry after unfixing pages.
    #[error("buffer is full: all frames are pinned")]
    BufferFull,

    /// A structural invariant does not hold (e.g. a descent reached a
    /// malformed node). Indicates a bug or a bad checkpoint.
    #[error("invariant violated: {0}")]
    InvariantViolated(String),
}

impl StorageError {
    /// Create an invariant violation error with a message
    pub fn invariant(msg: impl Into<String>) -> Self {
        Self::InvariantViolated(msg.into())
    }
}
