use thiserror::Error;

/// Errors produced by type parsing and conversion.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TypeError {
    #[error("invalid hex string: {0}")]
    InvalidHex(String),

    #[error("invalid byte length: expected {expected}, got {actual}")]
    InvalidLength { expected: usize, actual: usize },

    #[error("invalid content identifier {input:?}: {reason}")]
    InvalidCid { input: String, reason: String },

    #[error("invalid status {0:?}: expected one of active, rejected, inactive")]
    InvalidStatus(String),

    #[error("serialization error: {0}")]
    Serialization(String),
}
