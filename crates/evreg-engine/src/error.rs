//! Error types for the registry engine.

use std::fmt;

use evreg_index::IndexError;
use evreg_ledger::LedgerError;
use evreg_store::StoreError;
use evreg_types::{Cid, Status, TypeError};

/// Caller-facing classification of a [`RegistryError`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Malformed input or a refused status value.
    InvalidArgument,
    /// The CID is unknown where the operation looked for it.
    NotFound,
    /// A required capability (ledger binding, pinning service) is missing.
    NotConfigured,
    /// Submission, confirmation, or read failure on the ledger.
    LedgerError,
    /// Every content source was exhausted.
    ContentUnavailable,
    /// The local index could not be read or written.
    IndexUnavailable,
    Internal,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InvalidArgument => "InvalidArgument",
            Self::NotFound => "NotFound",
            Self::NotConfigured => "NotConfigured",
            Self::LedgerError => "LedgerError",
            Self::ContentUnavailable => "ContentUnavailable",
            Self::IndexUnavailable => "IndexUnavailable",
            Self::Internal => "Internal",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors produced by registry operations.
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    /// The payload failed schema validation.
    #[error("payload failed validation: {}", .0.join("; "))]
    Validation(Vec<String>),

    /// Not one of `active`, `rejected`, `inactive`.
    #[error("invalid status {0:?}: expected active, rejected or inactive")]
    InvalidStatus(String),

    /// The lifecycle policy refuses this status change.
    #[error("status change {from} -> {to} is not allowed")]
    Transition { from: Status, to: Status },

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// No index record exists for the CID.
    #[error("no record for {0}")]
    NotIndexed(Cid),

    #[error("not configured: {0}")]
    NotConfigured(String),

    /// The configuration is unusable.
    #[error("invalid configuration: {0}")]
    Config(String),

    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("index: {0}")]
    Index(#[from] IndexError),

    /// The ledger write succeeded but mirroring it into the index failed.
    /// The ledger is authoritative; `reconcile` repairs the index.
    #[error("ledger updated for {cid} but index write failed: {source}")]
    IndexWrite {
        cid: Cid,
        #[source]
        source: IndexError,
    },

    /// Content bytes are not a JSON document.
    #[error("payload encoding: {0}")]
    Encoding(String),
}

impl RegistryError {
    /// Map to the caller-facing taxonomy.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Validation(_)
            | Self::InvalidStatus(_)
            | Self::Transition { .. }
            | Self::InvalidArgument(_) => ErrorKind::InvalidArgument,
            Self::NotIndexed(_) => ErrorKind::NotFound,
            Self::NotConfigured(_) | Self::Config(_) => ErrorKind::NotConfigured,
            Self::Ledger(e) => match e {
                LedgerError::NotFound(_) => ErrorKind::NotFound,
                LedgerError::NotConfigured(_) => ErrorKind::NotConfigured,
                _ => ErrorKind::LedgerError,
            },
            Self::Store(e) => match e {
                StoreError::NotFound(_) => ErrorKind::NotFound,
                StoreError::NotConfigured(_) => ErrorKind::NotConfigured,
                StoreError::InvalidCid(_) => ErrorKind::InvalidArgument,
                StoreError::Io(_) | StoreError::LockPoisoned => ErrorKind::Internal,
                _ => ErrorKind::ContentUnavailable,
            },
            Self::Index(IndexError::NotFound(_)) => ErrorKind::NotFound,
            Self::Index(_) | Self::IndexWrite { .. } => ErrorKind::IndexUnavailable,
            Self::Encoding(_) => ErrorKind::Internal,
        }
    }

    /// Whether the caller may retry the same operation later.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Ledger(e) => e.is_retryable(),
            Self::Store(e) => e.is_retryable(),
            _ => false,
        }
    }
}

impl From<TypeError> for RegistryError {
    fn from(err: TypeError) -> Self {
        match err {
            TypeError::InvalidStatus(s) => Self::InvalidStatus(s),
            other => Self::InvalidArgument(other.to_string()),
        }
    }
}

/// Convenience alias for registry results.
pub type RegistryResult<T> = Result<T, RegistryError>;
