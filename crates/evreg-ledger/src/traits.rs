use async_trait::async_trait;
use chrono::{DateTime, Utc};
use evreg_types::{time, Address, Cid, Status, TxHash};
use serde::{Deserialize, Serialize};

use crate::error::LedgerResult;
use crate::transaction::SignedTransaction;

/// A registry entry as returned by `getRegistry(cid)`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistryEntry {
    /// `false` when the CID was never anchored. Every other field is then
    /// meaningless.
    pub exists: bool,
    pub status: Status,
    /// Expiry as unix seconds, `0` for none.
    pub valid_to: u64,
    /// Block time of the anchor, unix seconds.
    pub timestamp: u64,
}

impl RegistryEntry {
    /// The answer for a CID the contract has never seen.
    pub fn missing() -> Self {
        Self {
            exists: false,
            status: Status::Active,
            valid_to: 0,
            timestamp: 0,
        }
    }

    pub fn valid_to_instant(&self) -> Option<DateTime<Utc>> {
        time::from_unix_seconds(self.valid_to)
    }

    pub fn registered_at(&self) -> Option<DateTime<Utc>> {
        time::from_unix_seconds(self.timestamp)
    }
}

/// Execution result of a mined transaction.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TxReceipt {
    pub tx_hash: TxHash,
    pub block_number: u64,
    pub gas_used: u64,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub revert_reason: Option<String>,
}

/// Capability boundary to the ledger node hosting the registry contract.
///
/// Implementations are opaque authorities: the client never assumes how
/// consensus or storage works behind them.
#[async_trait]
pub trait RegistryChain: Send + Sync {
    /// Next sequence number the node expects from `account`.
    async fn nonce(&self, account: &Address) -> LedgerResult<u64>;

    /// Submit a signed transaction. Returns once the node has accepted it
    /// for inclusion, not once it is confirmed.
    async fn send_transaction(&self, tx: &SignedTransaction) -> LedgerResult<TxHash>;

    /// Receipt for a mined transaction. `Ok(None)` while still pending.
    async fn transaction_receipt(&self, hash: &TxHash) -> LedgerResult<Option<TxReceipt>>;

    /// Read-only `getRegistry(cid)` against `contract`.
    async fn get_registry(&self, contract: &Address, cid: &Cid) -> LedgerResult<RegistryEntry>;
}
