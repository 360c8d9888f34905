//! Local index for the event registry.
//!
//! The index mirrors ledger-confirmed state keyed by CID: the content
//! metadata, the anchor receipt, and the append-only status history of each
//! record. It serves fast reads and the audit trail, but it is never the
//! source of truth; the ledger is.
//!
//! # Backends
//!
//! - [`SledIndex`] -- persistent, JSON values, CAS-loop merges
//! - [`InMemoryIndex`] -- `BTreeMap`-based index for tests and embedding

pub mod error;
pub mod memory;
pub mod sled_index;
pub mod traits;
pub mod update;

pub use error::{IndexError, IndexResult};
pub use memory::InMemoryIndex;
pub use sled_index::SledIndex;
pub use traits::{RecordIndex, Records};
pub use update::RecordUpdate;

#[cfg(test)]
pub(crate) mod test_support {
    use chrono::Utc;
    use evreg_crypto::ContentHasher;
    use evreg_types::{Address, ContentMeta, LedgerReceipt, Record, Status, StatusChange, TxHash};

    fn receipt(block: u64) -> LedgerReceipt {
        LedgerReceipt {
            tx_hash: TxHash::from_bytes([block as u8; 32]),
            block_number: block,
            gas_used: 94_000,
            success: true,
            signer: Address::from_bytes([7; 20]),
            confirmed_at: Utc::now(),
        }
    }

    pub fn record(data: &[u8]) -> Record {
        Record::anchored(
            ContentHasher::default().cid(data),
            ContentHasher::content_hash(data),
            serde_json::json!({ "type": "ObjectEvent" }),
            ContentMeta {
                size: data.len() as u64,
                local_cid: None,
                pinned: false,
                gateway_url: None,
            },
            None,
            receipt(1),
            Utc::now(),
        )
    }

    pub fn rejected_change() -> StatusChange {
        StatusChange {
            status: Status::Rejected,
            at: Utc::now(),
            receipt: Some(receipt(2)),
        }
    }
}
