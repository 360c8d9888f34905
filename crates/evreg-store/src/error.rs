use std::fmt;
use std::time::Duration;

use evreg_types::{Cid, TypeError};

/// Why one content source failed to answer during resolution.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SourceFailure {
    /// Source name, e.g. `"pinata"`, `"ipfs"`, `"gateway"`.
    pub name: String,
    pub reason: String,
}

impl fmt::Display for SourceFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.name, self.reason)
    }
}

fn join_failures(failures: &[SourceFailure]) -> String {
    failures
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Errors from content addressing operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Every source answered and none holds the content.
    #[error("content not found: {0}")]
    NotFound(Cid),

    /// No source yielded the content and at least one of them failed.
    #[error("content for {cid} unavailable: {}", join_failures(.failures))]
    ContentUnavailable {
        cid: Cid,
        failures: Vec<SourceFailure>,
    },

    /// A pinning service rejected or failed a request.
    #[error("pinning service {service} failed: {reason}")]
    Pinning { service: String, reason: String },

    /// Transport-level HTTP failure.
    #[error("HTTP request to {endpoint} failed: {source}")]
    Http {
        endpoint: String,
        #[source]
        source: reqwest::Error,
    },

    /// Non-success HTTP status from a remote service.
    #[error("{endpoint} returned {status}: {body}")]
    Api {
        endpoint: String,
        status: u16,
        body: String,
    },

    /// A response body could not be decoded.
    #[error("unexpected response from {endpoint}: {reason}")]
    Decode { endpoint: String, reason: String },

    /// An external call exceeded its time budget.
    #[error("{operation} timed out after {after:?}")]
    Timeout { operation: String, after: Duration },

    /// A required capability is not configured.
    #[error("not configured: {0}")]
    NotConfigured(String),

    /// Invalid content identifier.
    #[error(transparent)]
    InvalidCid(#[from] TypeError),

    /// I/O error from the local cache.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// An in-memory lock was poisoned by a panicking writer.
    #[error("lock poisoned")]
    LockPoisoned,
}

impl StoreError {
    /// Whether retrying the same call later may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Http { .. } | Self::Timeout { .. } | Self::ContentUnavailable { .. } => true,
            Self::Api { status, .. } => *status == 429 || *status >= 500,
            Self::Io(_) => true,
            _ => false,
        }
    }
}

/// Result alias for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Run `fut` under a deadline, mapping expiry to [`StoreError::Timeout`].
pub(crate) async fn with_timeout<T, F>(operation: &str, after: Duration, fut: F) -> StoreResult<T>
where
    F: std::future::Future<Output = StoreResult<T>>,
{
    match tokio::time::timeout(after, fut).await {
        Ok(result) => result,
        Err(_) => Err(StoreError::Timeout {
            operation: operation.to_string(),
            after,
        }),
    }
}
