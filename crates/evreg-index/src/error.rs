//! Error types for the index crate.

use evreg_types::Cid;

/// Errors that can occur during index operations.
#[derive(Debug, thiserror::Error)]
pub enum IndexError {
    /// No record is stored under the CID.
    #[error("no index record for {0}")]
    NotFound(Cid),

    /// A stored value could not be decoded.
    #[error("corrupt index entry {key}: {reason}")]
    Corrupt { key: String, reason: String },

    /// A record could not be encoded.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// The underlying database failed.
    #[error("database error: {0}")]
    Database(#[from] sled::Error),

    #[error("lock poisoned")]
    LockPoisoned,
}

/// Convenience alias for index results.
pub type IndexResult<T> = Result<T, IndexError>;
