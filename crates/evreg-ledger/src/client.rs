use std::sync::{Arc, RwLock};
use std::time::Duration;

use chrono::Utc;
use evreg_crypto::SigningKey;
use evreg_types::{Address, Cid, LedgerReceipt, Status, TxHash};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::contract::ContractBinding;
use crate::error::{with_timeout, LedgerError, LedgerResult};
use crate::traits::{RegistryChain, RegistryEntry, TxReceipt};
use crate::transaction::{ContractCall, Transaction};

/// Timing parameters for [`LedgerClient`].
#[derive(Clone, Debug)]
pub struct LedgerClientConfig {
    pub chain_id: u64,
    /// Budget for each individual RPC call.
    pub rpc_timeout: Duration,
    /// Pause between receipt polls.
    pub poll_interval: Duration,
    /// Total budget from submission until a receipt appears.
    pub confirmation_timeout: Duration,
}

impl Default for LedgerClientConfig {
    fn default() -> Self {
        Self {
            chain_id: 1337,
            rpc_timeout: Duration::from_secs(10),
            poll_interval: Duration::from_millis(500),
            confirmation_timeout: Duration::from_secs(120),
        }
    }
}

/// Client for the registry contract.
///
/// All state-changing calls go through one async mutex that owns the
/// signer's cached next nonce. The lock is held from nonce assignment until
/// the transaction is confirmed, so writes from this process reach the
/// ledger strictly one after another. Reads take no lock.
pub struct LedgerClient {
    chain: Arc<dyn RegistryChain>,
    signer: SigningKey,
    config: LedgerClientConfig,
    binding: RwLock<Option<ContractBinding>>,
    /// Next nonce to use, `None` when it must be re-read from the node.
    writer: Mutex<Option<u64>>,
}

impl LedgerClient {
    pub fn new(chain: Arc<dyn RegistryChain>, signer: SigningKey, config: LedgerClientConfig) -> Self {
        Self {
            chain,
            signer,
            config,
            binding: RwLock::new(None),
            writer: Mutex::new(None),
        }
    }

    /// Associate the client with a deployed contract.
    pub fn bind(&self, binding: ContractBinding) -> LedgerResult<()> {
        info!(contract = %binding.address, signer = %self.signer_address(), "bound registry contract");
        *self.binding.write().map_err(|_| LedgerError::LockPoisoned)? = Some(binding);
        Ok(())
    }

    pub fn is_bound(&self) -> bool {
        self.binding.read().map(|b| b.is_some()).unwrap_or(false)
    }

    pub fn binding(&self) -> Option<ContractBinding> {
        self.binding.read().ok().and_then(|b| b.clone())
    }

    pub fn signer_address(&self) -> Address {
        self.signer.address()
    }

    fn require_binding(&self) -> LedgerResult<ContractBinding> {
        self.binding()
            .ok_or_else(|| LedgerError::NotConfigured("no registry contract bound".into()))
    }

    /// Register `(cid, valid_to)` and wait for confirmation.
    pub async fn anchor(&self, cid: &Cid, valid_to: u64) -> LedgerResult<LedgerReceipt> {
        let receipt = self
            .submit(ContractCall::Registry {
                cid: cid.clone(),
                valid_to,
            })
            .await?;
        info!(cid = %cid, tx = %receipt.tx_hash, block = receipt.block_number, "anchored CID");
        Ok(receipt)
    }

    /// Change the status of an anchored CID and wait for confirmation.
    ///
    /// Fails with [`LedgerError::NotFound`] when the ledger has no entry.
    pub async fn set_status(&self, cid: &Cid, status: Status) -> LedgerResult<LedgerReceipt> {
        let entry = self.read_entry(cid).await?;
        if !entry.exists {
            return Err(LedgerError::NotFound(cid.clone()));
        }
        let receipt = self
            .submit(ContractCall::ChangeStatus {
                cid: cid.clone(),
                status,
            })
            .await?;
        info!(cid = %cid, status = %status, tx = %receipt.tx_hash, "changed status on ledger");
        Ok(receipt)
    }

    /// Read-only lookup of a registry entry.
    pub async fn read_entry(&self, cid: &Cid) -> LedgerResult<RegistryEntry> {
        let binding = self.require_binding()?;
        with_timeout(
            "getRegistry",
            self.config.rpc_timeout,
            self.chain.get_registry(&binding.address, cid),
        )
        .await
    }

    async fn submit(&self, call: ContractCall) -> LedgerResult<LedgerReceipt> {
        let binding = self.require_binding()?;
        let mut next_nonce = self.writer.lock().await;
        let result = self.submit_locked(&binding, call, &mut next_nonce).await;
        if let Err(e) = &result {
            // The node's view of our nonce is unknown after a failure.
            *next_nonce = None;
            warn!(error = %e, "ledger write failed");
        }
        result
    }

    async fn submit_locked(
        &self,
        binding: &ContractBinding,
        call: ContractCall,
        next_nonce: &mut Option<u64>,
    ) -> LedgerResult<LedgerReceipt> {
        let from = self.signer.address();
        let nonce = match *next_nonce {
            Some(n) => n,
            None => {
                with_timeout("nonce", self.config.rpc_timeout, self.chain.nonce(&from)).await?
            }
        };

        let signed = Transaction {
            chain_id: self.config.chain_id,
            contract: binding.address,
            from,
            nonce,
            call,
        }
        .sign(&self.signer)?;
        let function = signed.tx.call.function();

        let hash = with_timeout(
            "sendTransaction",
            self.config.rpc_timeout,
            self.chain.send_transaction(&signed),
        )
        .await?;
        *next_nonce = Some(nonce + 1);
        debug!(tx = %hash, nonce, function, "submitted transaction");

        let receipt = self.wait_for_receipt(&hash).await?;
        if !receipt.success {
            return Err(LedgerError::Reverted {
                tx: hash,
                reason: receipt
                    .revert_reason
                    .unwrap_or_else(|| "execution reverted".into()),
            });
        }
        Ok(LedgerReceipt {
            tx_hash: receipt.tx_hash,
            block_number: receipt.block_number,
            gas_used: receipt.gas_used,
            success: true,
            signer: from,
            confirmed_at: Utc::now(),
        })
    }

    async fn wait_for_receipt(&self, hash: &TxHash) -> LedgerResult<TxReceipt> {
        let poll = async {
            loop {
                let receipt = with_timeout(
                    "getTransactionReceipt",
                    self.config.rpc_timeout,
                    self.chain.transaction_receipt(hash),
                )
                .await?;
                if let Some(receipt) = receipt {
                    return Ok(receipt);
                }
                tokio::time::sleep(self.config.poll_interval).await;
            }
        };
        with_timeout("confirmation", self.config.confirmation_timeout, poll).await
    }
}
