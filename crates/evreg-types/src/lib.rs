//! Foundation types for the event registry.
//!
//! Every other `evreg` crate depends on `evreg-types`. The types here describe
//! the three sources of truth the registry reconciles: content (identified by
//! [`Cid`]), the ledger (entries, [`TxHash`], [`LedgerReceipt`]), and the
//! local index ([`Record`] and its append-only [`StatusChange`] history).
//!
//! # Key Types
//!
//! - [`Cid`] - Content identifier in canonical multibase text form
//! - [`ContentHash`] - SHA-256 digest of the canonical payload bytes
//! - [`Status`] - Ledger-controlled lifecycle state
//! - [`DerivedStatus`] - Status computed at read time (adds `expired`, `notfound`)
//! - [`LedgerReceipt`] - Confirmation data for a state-changing transaction
//! - [`Record`] - The index's full view of one registered document

pub mod chain;
pub mod content_id;
pub mod error;
pub mod record;
pub mod status;
pub mod time;

pub use chain::{Address, LedgerReceipt, TxHash};
pub use content_id::{Cid, ContentHash, Multihash, DAG_PB_CODEC, RAW_CODEC, SHA2_256};
pub use error::TypeError;
pub use record::{ContentMeta, Record, StatusChange};
pub use status::{DerivedStatus, Status};
