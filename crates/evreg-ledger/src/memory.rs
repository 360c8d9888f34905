use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use evreg_types::{Address, Cid, Status, TxHash};
use tracing::debug;

use crate::error::{LedgerError, LedgerResult};
use crate::traits::{RegistryChain, RegistryEntry, TxReceipt};
use crate::transaction::{ContractCall, SignedTransaction};

const GAS_REGISTRY: u64 = 94_000;
const GAS_CHANGE_STATUS: u64 = 38_000;

fn gas_for(call: &ContractCall) -> u64 {
    match call {
        ContractCall::Registry { .. } => GAS_REGISTRY,
        ContractCall::ChangeStatus { .. } => GAS_CHANGE_STATUS,
    }
}

/// In-memory registry chain for tests, local demos, and embedding.
///
/// Every accepted transaction is mined into its own block immediately.
/// Signatures, chain id, and nonces are checked the way a real node would;
/// duplicate anchors, status changes on unknown CIDs, and calls to
/// undeployed contracts revert. Faults can be injected to exercise the
/// client's failure paths.
pub struct InMemoryChain {
    chain_id: u64,
    inner: RwLock<ChainState>,
}

struct PendingReceipt {
    receipt: TxReceipt,
    polls_left: u32,
}

#[derive(Default)]
struct ChainState {
    block_number: u64,
    nonces: HashMap<Address, u64>,
    /// Only enforced once any account has been funded.
    balances: HashMap<Address, u64>,
    metered: bool,
    contracts: HashSet<Address>,
    entries: HashMap<(Address, Cid), RegistryEntry>,
    receipts: HashMap<TxHash, PendingReceipt>,
    /// Successful calls in confirmation order.
    confirmed: Vec<ContractCall>,
    send_faults: VecDeque<LedgerError>,
    read_faults: VecDeque<LedgerError>,
    confirmation_polls: u32,
    send_latency: Duration,
}

impl InMemoryChain {
    pub fn new(chain_id: u64) -> Self {
        Self {
            chain_id,
            inner: RwLock::new(ChainState::default()),
        }
    }

    pub fn chain_id(&self) -> u64 {
        self.chain_id
    }

    fn read(&self) -> LedgerResult<RwLockReadGuard<'_, ChainState>> {
        self.inner.read().map_err(|_| LedgerError::LockPoisoned)
    }

    fn write(&self) -> LedgerResult<RwLockWriteGuard<'_, ChainState>> {
        self.inner.write().map_err(|_| LedgerError::LockPoisoned)
    }

    /// Mark `address` as hosting a registry contract.
    pub fn deploy(&self, address: Address) -> LedgerResult<()> {
        self.write()?.contracts.insert(address);
        Ok(())
    }

    /// Credit `account` with gas. Once any account is funded, every sender
    /// pays for gas and unfunded senders fail with insufficient funds.
    pub fn fund(&self, account: Address, amount: u64) -> LedgerResult<()> {
        let mut state = self.write()?;
        state.metered = true;
        *state.balances.entry(account).or_default() += amount;
        Ok(())
    }

    /// Make the next `send_transaction` fail with `err` before execution.
    pub fn fail_next_send(&self, err: LedgerError) -> LedgerResult<()> {
        self.write()?.send_faults.push_back(err);
        Ok(())
    }

    /// Make the next `get_registry` fail with `err`.
    pub fn fail_next_read(&self, err: LedgerError) -> LedgerResult<()> {
        self.write()?.read_faults.push_back(err);
        Ok(())
    }

    /// Number of receipt polls that answer "pending" before a receipt shows.
    pub fn set_confirmation_polls(&self, polls: u32) -> LedgerResult<()> {
        self.write()?.confirmation_polls = polls;
        Ok(())
    }

    /// Delay applied to every submission before it reaches the mempool.
    pub fn set_send_latency(&self, latency: Duration) -> LedgerResult<()> {
        self.write()?.send_latency = latency;
        Ok(())
    }

    /// Overwrite an entry's status as if another signer had changed it.
    pub fn force_status(&self, contract: &Address, cid: &Cid, status: Status) -> LedgerResult<()> {
        let mut state = self.write()?;
        let entry = state
            .entries
            .get_mut(&(*contract, cid.clone()))
            .ok_or_else(|| LedgerError::NotFound(cid.clone()))?;
        entry.status = status;
        Ok(())
    }

    /// Successful calls touching `cid`, in confirmation order.
    pub fn confirmed_calls(&self, cid: &Cid) -> LedgerResult<Vec<ContractCall>> {
        Ok(self
            .read()?
            .confirmed
            .iter()
            .filter(|call| call.cid() == cid)
            .cloned()
            .collect())
    }

    /// Status after each confirmed call touching `cid`.
    pub fn status_log(&self, cid: &Cid) -> LedgerResult<Vec<Status>> {
        Ok(self
            .confirmed_calls(cid)?
            .iter()
            .map(ContractCall::resulting_status)
            .collect())
    }

    pub fn block_number(&self) -> LedgerResult<u64> {
        Ok(self.read()?.block_number)
    }

    /// Total confirmed transactions.
    pub fn transaction_count(&self) -> LedgerResult<usize> {
        Ok(self.read()?.confirmed.len())
    }
}

impl ChainState {
    fn execute(&mut self, contract: Address, call: &ContractCall, now: u64) -> Result<(), String> {
        if !self.contracts.contains(&contract) {
            return Err("no contract deployed at target address".into());
        }
        let key = (contract, call.cid().clone());
        match call {
            ContractCall::Registry { valid_to, .. } => {
                if self.entries.contains_key(&key) {
                    return Err("CID already registered".into());
                }
                self.entries.insert(
                    key,
                    RegistryEntry {
                        exists: true,
                        status: Status::Active,
                        valid_to: *valid_to,
                        timestamp: now,
                    },
                );
            }
            ContractCall::ChangeStatus { status, .. } => {
                let entry = self
                    .entries
                    .get_mut(&key)
                    .ok_or_else(|| "CID not registered".to_string())?;
                entry.status = *status;
            }
        }
        Ok(())
    }
}

#[async_trait]
impl RegistryChain for InMemoryChain {
    async fn nonce(&self, account: &Address) -> LedgerResult<u64> {
        Ok(self.read()?.nonces.get(account).copied().unwrap_or(0))
    }

    async fn send_transaction(&self, signed: &SignedTransaction) -> LedgerResult<TxHash> {
        let latency = self.read()?.send_latency;
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }

        let mut state = self.write()?;
        if let Some(err) = state.send_faults.pop_front() {
            return Err(err);
        }
        signed.verify()?;
        let tx = &signed.tx;
        if tx.chain_id != self.chain_id {
            return Err(LedgerError::Submission(format!(
                "wrong chain id: expected {}, got {}",
                self.chain_id, tx.chain_id
            )));
        }
        if state.receipts.contains_key(&signed.hash) {
            return Err(LedgerError::Submission("transaction already known".into()));
        }
        let expected = state.nonces.get(&tx.from).copied().unwrap_or(0);
        if tx.nonce != expected {
            return Err(LedgerError::NonceConflict {
                expected,
                got: tx.nonce,
            });
        }

        let gas = gas_for(&tx.call);
        if state.metered {
            let balance = state.balances.get(&tx.from).copied().unwrap_or(0);
            if balance < gas {
                return Err(LedgerError::InsufficientFunds(format!(
                    "{} has {balance}, needs {gas}",
                    tx.from
                )));
            }
            state.balances.insert(tx.from, balance - gas);
        }

        state.nonces.insert(tx.from, expected + 1);
        state.block_number += 1;
        let now = u64::try_from(Utc::now().timestamp()).unwrap_or(0);
        let outcome = state.execute(tx.contract, &tx.call, now);
        if outcome.is_ok() {
            state.confirmed.push(tx.call.clone());
        }
        let receipt = TxReceipt {
            tx_hash: signed.hash,
            block_number: state.block_number,
            gas_used: gas,
            success: outcome.is_ok(),
            revert_reason: outcome.err(),
        };
        debug!(
            tx = %signed.hash,
            block = receipt.block_number,
            success = receipt.success,
            function = tx.call.function(),
            "mined transaction"
        );
        let polls_left = state.confirmation_polls;
        state
            .receipts
            .insert(signed.hash, PendingReceipt { receipt, polls_left });
        Ok(signed.hash)
    }

    async fn transaction_receipt(&self, hash: &TxHash) -> LedgerResult<Option<TxReceipt>> {
        let mut state = self.write()?;
        let Some(pending) = state.receipts.get_mut(hash) else {
            return Ok(None);
        };
        if pending.polls_left > 0 {
            pending.polls_left -= 1;
            return Ok(None);
        }
        Ok(Some(pending.receipt.clone()))
    }

    async fn get_registry(&self, contract: &Address, cid: &Cid) -> LedgerResult<RegistryEntry> {
        let mut state = self.write()?;
        if let Some(err) = state.read_faults.pop_front() {
            return Err(err);
        }
        if !state.contracts.contains(contract) {
            return Err(LedgerError::Rpc {
                code: -32000,
                message: "execution reverted: no contract at address".into(),
            });
        }
        Ok(state
            .entries
            .get(&(*contract, cid.clone()))
            .cloned()
            .unwrap_or_else(RegistryEntry::missing))
    }
}
