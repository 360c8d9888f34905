use std::time::Duration;

use evreg_types::{Cid, TxHash};

/// Errors produced by ledger operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LedgerError {
    /// No contract is bound, or the binding is unusable.
    #[error("ledger not configured: {0}")]
    NotConfigured(String),

    /// The CID has never been anchored.
    #[error("no ledger entry for {0}")]
    NotFound(Cid),

    /// The node refused the transaction before execution.
    #[error("transaction submission failed: {0}")]
    Submission(String),

    /// The transaction was mined but execution reverted.
    #[error("transaction {tx} reverted: {reason}")]
    Reverted { tx: TxHash, reason: String },

    #[error("insufficient funds: {0}")]
    InsufficientFunds(String),

    /// The submitted nonce does not match the account's next sequence number.
    #[error("nonce conflict: expected {expected}, got {got}")]
    NonceConflict { expected: u64, got: u64 },

    /// JSON-RPC error object returned by the node.
    #[error("rpc error {code}: {message}")]
    Rpc { code: i64, message: String },

    /// Transport-level failure talking to the node.
    #[error("transport error: {0}")]
    Transport(String),

    #[error("{operation} timed out after {after:?}")]
    Timeout { operation: String, after: Duration },

    #[error("invalid contract ABI: {0}")]
    InvalidAbi(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("lock poisoned")]
    LockPoisoned,
}

impl LedgerError {
    /// Whether retrying the same call later may succeed.
    ///
    /// Reverts, missing funds, and configuration problems are permanent
    /// until something else changes.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Transport(_)
                | Self::Timeout { .. }
                | Self::NonceConflict { .. }
                | Self::Rpc { .. }
        )
    }
}

/// Result alias for ledger operations.
pub type LedgerResult<T> = Result<T, LedgerError>;

/// Run `fut` under a deadline, mapping expiry to [`LedgerError::Timeout`].
pub(crate) async fn with_timeout<T, F>(operation: &str, after: Duration, fut: F) -> LedgerResult<T>
where
    F: std::future::Future<Output = LedgerResult<T>>,
{
    match tokio::time::timeout(after, fut).await {
        Ok(result) => result,
        Err(_) => Err(LedgerError::Timeout {
            operation: operation.to_string(),
            after,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_classification() {
        assert!(LedgerError::Transport("reset".into()).is_retryable());
        assert!(LedgerError::NonceConflict {
            expected: 1,
            got: 0
        }
        .is_retryable());
        assert!(!LedgerError::Reverted {
            tx: TxHash::from_bytes([0; 32]),
            reason: "already registered".into()
        }
        .is_retryable());
        assert!(!LedgerError::InsufficientFunds("0 < 21000".into()).is_retryable());
        assert!(!LedgerError::NotConfigured("contract address".into()).is_retryable());
    }

    #[test]
    fn revert_message_names_transaction() {
        let err = LedgerError::Reverted {
            tx: TxHash::from_bytes([0xab; 32]),
            reason: "not registered".into(),
        };
        let msg = err.to_string();
        assert!(msg.contains("0xabab"));
        assert!(msg.contains("not registered"));
    }
}
