use chrono::{DateTime, Utc};
use evreg_store::{CidMismatch, PinReceipt};
use evreg_types::{Cid, ContentHash, DerivedStatus, LedgerReceipt, Record, Status, StatusChange};
use serde::Serialize;

/// Non-fatal condition reported next to a successful result.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Warning {
    /// The pinning service or content network assigned a different CID than
    /// the local hasher. The remote one was adopted.
    CidMismatch {
        local: Cid,
        remote: Cid,
        service: String,
    },
}

impl From<CidMismatch> for Warning {
    fn from(m: CidMismatch) -> Self {
        Self::CidMismatch {
            local: m.local,
            remote: m.remote,
            service: m.service,
        }
    }
}

impl std::fmt::Display for Warning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::CidMismatch {
                local,
                remote,
                service,
            } => write!(f, "CID mismatch: local {local}, {service} returned {remote}"),
        }
    }
}

/// Result of a successful ingestion.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Ingestion {
    pub record: Record,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<Warning>,
}

/// Result of re-pinning stored content.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Pinned {
    pub cid: Cid,
    pub pinned_cid: Cid,
    pub size: u64,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<Warning>,
}

impl Pinned {
    pub(crate) fn new(cid: Cid, receipt: PinReceipt, mismatch: Option<CidMismatch>) -> Self {
        Self {
            cid,
            pinned_cid: receipt.cid,
            size: receipt.size,
            warnings: mismatch.into_iter().map(Warning::from).collect(),
        }
    }
}

/// Whether resolved bytes still hash to the indexed content hash.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum Integrity {
    Verified,
    Mismatch {
        expected: ContentHash,
        actual: ContentHash,
    },
    /// No index record to compare against, or no content.
    Unchecked,
}

/// What the ledger says about a CID.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct LedgerState {
    pub status: Status,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub valid_to: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub registered_at: Option<DateTime<Utc>>,
}

/// One history entry with its explorer link.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct HistoryEntry {
    #[serde(flatten)]
    pub change: StatusChange,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub explorer_url: Option<String>,
}

/// The merged answer to `query(cid)`.
///
/// `status` comes from the ledger and the clock only. Everything under the
/// audit fields is index data and never overrides it.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct DerivedView {
    pub cid: Cid,
    pub status: DerivedStatus,
    /// `None` when the ledger has no entry.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ledger: Option<LedgerState>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    pub integrity: Integrity,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gateway_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub anchor_receipt: Option<LedgerReceipt>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub explorer_url: Option<String>,
    pub history: Vec<HistoryEntry>,
    /// `false` when the index mirrors a different status than the ledger
    /// holds, or has no record for an anchored CID.
    pub index_in_sync: bool,
    pub queried_at: DateTime<Utc>,
}

/// Outcome of [`reconcile`](crate::RegistryEngine::reconcile).
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ReconcileOutcome {
    /// Index and ledger agree.
    InSync,
    /// The index mirrored a stale status; a reconciled entry was appended.
    Repaired { from: Status, to: Status },
    /// The index had no record; one was rebuilt from ledger and content.
    Created { record: Box<Record> },
    /// The ledger has no entry. `indexed` tells whether the index
    /// nevertheless holds a record.
    NotOnLedger { indexed: bool },
}
