use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::chain::LedgerReceipt;
use crate::content_id::{Cid, ContentHash};
use crate::status::Status;

/// Where and how a document's bytes were stored.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentMeta {
    /// Size of the canonical bytes.
    pub size: u64,
    /// Locally computed CID, recorded only when it differs from the
    /// canonical one adopted from a pinning service or content network.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub local_cid: Option<Cid>,
    /// Whether an external service holds a pin.
    pub pinned: bool,
    /// Public gateway link, if a gateway is configured.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gateway_url: Option<String>,
}

/// One entry in a record's append-only status history.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusChange {
    pub status: Status,
    pub at: DateTime<Utc>,
    /// Receipt of the ledger transaction that made this change. `None` only
    /// for entries written by reconciliation, which mirror ledger state
    /// without a transaction of their own.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub receipt: Option<LedgerReceipt>,
}

/// The index's full view of one registered document.
///
/// Created exactly once at first successful anchor, then mutated only by
/// status changes, each of which appends to `status_history`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub cid: Cid,
    pub content_hash: ContentHash,
    /// The original structured document.
    pub payload: serde_json::Value,
    pub content: ContentMeta,
    /// Expiry instant. `None` means the document never expires.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub valid_to: Option<DateTime<Utc>>,
    /// Last ledger-confirmed status mirrored by the index.
    pub status: Status,
    pub status_history: Vec<StatusChange>,
    /// Receipt of the anchoring transaction.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ledger_receipt: Option<LedgerReceipt>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Record {
    /// Build the record for a freshly anchored document.
    ///
    /// Status starts `active` with a single history entry carrying the
    /// anchor receipt.
    pub fn anchored(
        cid: Cid,
        content_hash: ContentHash,
        payload: serde_json::Value,
        content: ContentMeta,
        valid_to: Option<DateTime<Utc>>,
        receipt: LedgerReceipt,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            cid,
            content_hash,
            payload,
            content,
            valid_to,
            status: Status::Active,
            status_history: vec![StatusChange {
                status: Status::Active,
                at: now,
                receipt: Some(receipt.clone()),
            }],
            ledger_receipt: Some(receipt),
            created_at: now,
            updated_at: now,
        }
    }

    /// The most recent history entry.
    pub fn latest_change(&self) -> Option<&StatusChange> {
        self.status_history.last()
    }

    /// Whether `valid_to` has elapsed at `now`.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.valid_to.is_some_and(|expiry| now > expiry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::{Address, TxHash};
    use chrono::Duration;

    fn sample(valid_to: Option<DateTime<Utc>>) -> Record {
        let receipt = LedgerReceipt {
            tx_hash: TxHash::from_bytes([1; 32]),
            block_number: 1,
            gas_used: 21_000,
            success: true,
            signer: Address::from_bytes([2; 20]),
            confirmed_at: Utc::now(),
        };
        Record::anchored(
            Cid::v0_sha256(&[7; 32]),
            ContentHash::from_digest([3; 32]),
            serde_json::json!({"type": "ObjectEvent"}),
            ContentMeta {
                size: 2,
                local_cid: None,
                pinned: false,
                gateway_url: None,
            },
            valid_to,
            receipt,
            Utc::now(),
        )
    }

    #[test]
    fn anchored_starts_active_with_one_entry() {
        let record = sample(None);
        assert_eq!(record.status, Status::Active);
        assert_eq!(record.status_history.len(), 1);
        let first = record.latest_change().unwrap();
        assert_eq!(first.status, Status::Active);
        assert_eq!(first.receipt, record.ledger_receipt);
        assert_eq!(record.created_at, record.updated_at);
    }

    #[test]
    fn expiry_check() {
        let now = Utc::now();
        assert!(!sample(None).is_expired_at(now));
        assert!(sample(Some(now - Duration::seconds(1))).is_expired_at(now));
        assert!(!sample(Some(now + Duration::seconds(1))).is_expired_at(now));
    }

    #[test]
    fn serde_roundtrip_skips_empty_options() {
        let record = sample(None);
        let json = serde_json::to_string(&record).unwrap();
        assert!(!json.contains("valid_to"));
        assert!(!json.contains("local_cid"));
        let parsed: Record = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, record);
    }
}
