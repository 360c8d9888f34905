use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use evreg_crypto::{canonical_json, ContentHasher, SigningKey};
use evreg_index::{InMemoryIndex, IndexError, RecordIndex, RecordUpdate, SledIndex};
use evreg_ledger::{
    AbiDescriptor, ContractBinding, InMemoryChain, JsonRpcChain, LedgerClient, LedgerClientConfig,
    LedgerError, RegistryChain,
};
use evreg_store::{
    gateway_url, ContentAddressor, ContentCache, FsCache, GatewayClient, IpfsApiClient,
    PinMetadata, PinataClient,
};
use evreg_types::{
    time, Address, Cid, ContentHash, ContentMeta, DerivedStatus, Record, Status, StatusChange,
    TxHash,
};
use serde_json::Value;
use tracing::{debug, error, info, warn};
use url::Url;

use crate::clock::{Clock, SystemClock};
use crate::config::{parse_url, IndexBackend, LedgerBackend, RegistryConfig, TransitionPolicy};
use crate::error::{RegistryError, RegistryResult};
use crate::locks::KeyedLocks;
use crate::validator::{EpcisValidator, SchemaValidator};
use crate::view::{
    DerivedView, HistoryEntry, Ingestion, Integrity, LedgerState, Pinned, ReconcileOutcome,
    Warning,
};

/// Contract address used by the process-local ledger when none is configured.
pub const LOCAL_CONTRACT: Address = Address::from_bytes([0xee; 20]);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum StatusRequest {
    Change,
    Reactivate,
}

/// Orchestrates content store, ledger, and index.
///
/// The ledger is authoritative for existence and status. The index mirrors
/// what the ledger confirmed and carries the audit trail. Every mutation of
/// a record runs under that record's [`KeyedLocks`] guard, from the ledger
/// write through the index write.
pub struct RegistryEngine {
    addressor: ContentAddressor,
    ledger: LedgerClient,
    index: Arc<dyn RecordIndex>,
    validator: Arc<dyn SchemaValidator>,
    clock: Arc<dyn Clock>,
    locks: KeyedLocks,
    policy: TransitionPolicy,
    gateway: Option<Url>,
    explorer: Option<Url>,
    pin_name: String,
}

impl RegistryEngine {
    pub fn new(
        addressor: ContentAddressor,
        ledger: LedgerClient,
        index: Arc<dyn RecordIndex>,
        validator: Arc<dyn SchemaValidator>,
    ) -> Self {
        Self {
            addressor,
            ledger,
            index,
            validator,
            clock: Arc::new(SystemClock),
            locks: KeyedLocks::new(),
            policy: TransitionPolicy::default(),
            gateway: None,
            explorer: None,
            pin_name: PinMetadata::default().name,
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_policy(mut self, policy: TransitionPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Base URLs for gateway and explorer links in records and views.
    pub fn with_links(mut self, gateway: Option<Url>, explorer: Option<Url>) -> Self {
        self.gateway = gateway;
        self.explorer = explorer;
        self
    }

    pub fn with_pin_name(mut self, name: impl Into<String>) -> Self {
        self.pin_name = name.into();
        self
    }

    /// Wire every component from configuration.
    pub async fn open(config: &RegistryConfig) -> RegistryResult<Self> {
        config.validate()?;
        let fetch_timeout = config.fetch_timeout();
        let pin_timeout = config.pin_timeout();

        let cache: Arc<dyn ContentCache> = Arc::new(FsCache::open(config.content_dir()).await?);
        let mut addressor = ContentAddressor::new(ContentHasher::new(config.cid_version()?), cache);

        // Source order: pinning service gateway, content network, public gateway.
        if config.pinning.enabled {
            let auth = config.pinning.auth().ok_or_else(|| {
                RegistryError::Config("pinning enabled without credentials".into())
            })?;
            let pinata = Arc::new(PinataClient::new(
                parse_url("pinning.api_url", &config.pinning.api_url)?,
                parse_url("pinning.gateway_url", &config.pinning.gateway_url)?,
                auth,
                pin_timeout,
            )?);
            addressor = addressor
                .with_pinning(pinata.clone(), pin_timeout)
                .with_source(pinata, fetch_timeout);
        }
        if let Some(api) = &config.content.ipfs_api_url {
            let ipfs = Arc::new(IpfsApiClient::new(
                parse_url("content.ipfs_api_url", api)?,
                fetch_timeout,
            )?);
            if !config.pinning.enabled {
                addressor = addressor.with_pinning(ipfs.clone(), pin_timeout);
            }
            addressor = addressor.with_source(ipfs, fetch_timeout);
        }
        let gateway = config.gateway()?;
        if let Some(base) = &gateway {
            let client = Arc::new(GatewayClient::new(base.clone(), fetch_timeout)?);
            addressor = addressor.with_source(client, fetch_timeout);
        }

        let ledger = open_ledger(config)?;

        let index: Arc<dyn RecordIndex> = match config.registry.index {
            IndexBackend::Sled => Arc::new(SledIndex::open(config.index_path())?),
            IndexBackend::Memory => Arc::new(InMemoryIndex::new()),
        };

        info!(
            data_dir = %config.data_dir.display(),
            sources = ?addressor.source_names(),
            pinning = addressor.pinning_service().unwrap_or("none"),
            ledger_bound = ledger.is_bound(),
            policy = ?config.transition_policy(),
            "registry engine opened"
        );

        Ok(Self::new(addressor, ledger, index, Arc::new(EpcisValidator::new()?))
            .with_policy(config.transition_policy())
            .with_links(gateway, config.explorer()?)
            .with_pin_name(config.pinning.pin_name.clone()))
    }

    /// Flush the index. The engine stays usable.
    pub fn close(&self) -> RegistryResult<()> {
        self.index.flush()?;
        info!("registry engine closed");
        Ok(())
    }

    pub fn addressor(&self) -> &ContentAddressor {
        &self.addressor
    }

    pub fn ledger(&self) -> &LedgerClient {
        &self.ledger
    }

    pub fn index(&self) -> &dyn RecordIndex {
        self.index.as_ref()
    }

    pub fn policy(&self) -> TransitionPolicy {
        self.policy
    }

    /// `{explorer}/tx/{hash}` when an explorer is configured.
    pub fn explorer_url(&self, tx: &TxHash) -> Option<String> {
        self.explorer
            .as_ref()
            .map(|base| format!("{}/tx/{}", base.as_str().trim_end_matches('/'), tx))
    }

    /// `{gateway}/ipfs/{cid}` when a gateway is configured.
    pub fn gateway_url(&self, cid: &Cid) -> Option<String> {
        self.gateway.as_ref().map(|base| gateway_url(base, cid))
    }

    // ---- Ingestion ----

    /// Validate, store, anchor, and index a new document.
    ///
    /// If anchoring fails the content stays stored and no record is
    /// created; re-ingesting the same payload yields the same CID. An index
    /// record that already exists is never replaced: the new anchor is
    /// appended to its history.
    pub async fn ingest(
        &self,
        payload: Value,
        valid_to: Option<DateTime<Utc>>,
    ) -> RegistryResult<Ingestion> {
        self.validator.validate(&payload)?;
        if let Some(t) = valid_to {
            if t.timestamp() <= 0 {
                return Err(RegistryError::InvalidArgument(format!(
                    "valid_to {t} is not after the unix epoch"
                )));
            }
        }
        // The ledger keeps whole seconds.
        let valid_to_secs = time::to_unix_seconds(valid_to);
        let valid_to = time::from_unix_seconds(valid_to_secs);

        let bytes = canonical_json(&payload).map_err(|e| RegistryError::Encoding(e.to_string()))?;
        let content_hash = ContentHasher::content_hash(&bytes);
        let stored = self
            .addressor
            .store(&bytes, &self.pin_metadata(&payload, &content_hash))
            .await?;
        let cid = stored.cid.clone();

        if !self.ledger.is_bound() {
            return Err(RegistryError::NotConfigured(format!(
                "no registry contract bound; content kept as {cid}"
            )));
        }

        let _guard = self.locks.lock(&cid).await;
        let existing = self.index.get(&cid)?;
        let receipt = self.ledger.anchor(&cid, valid_to_secs).await?;
        let now = self.clock.now();
        let index_failed = |source: IndexError| {
            error!(cid = %cid, error = %source, "anchored on ledger but index write failed");
            RegistryError::IndexWrite {
                cid: cid.clone(),
                source,
            }
        };

        let record = if existing.is_some() {
            // The ledger had lost this CID while the index kept it. Its
            // history stays; the new anchor is appended.
            warn!(cid = %cid, "re-anchored a CID the index already held");
            let change = StatusChange {
                status: Status::Active,
                at: now,
                receipt: Some(receipt),
            };
            self.index
                .merge(&cid, &RecordUpdate::status_change(change))
                .map_err(index_failed)?
        } else {
            let content = ContentMeta {
                size: stored.size,
                local_cid: (stored.local_cid != cid).then(|| stored.local_cid.clone()),
                pinned: stored.pinned,
                gateway_url: self.gateway_url(&cid),
            };
            let record =
                Record::anchored(cid.clone(), content_hash, payload, content, valid_to, receipt, now);
            self.index.put(&record).map_err(index_failed)?;
            record
        };

        info!(cid = %cid, valid_to = valid_to_secs, "ingested document");
        Ok(Ingestion {
            record,
            warnings: stored.mismatch.into_iter().map(Warning::from).collect(),
        })
    }

    fn pin_metadata(&self, payload: &Value, content_hash: &ContentHash) -> PinMetadata {
        let mut meta = PinMetadata::named(&self.pin_name).with("contentHash", content_hash.to_hex());
        for key in ["type", "eventTime"] {
            if let Some(value) = payload.get(key).and_then(Value::as_str) {
                meta = meta.with(key, value);
            }
        }
        meta
    }

    // ---- Status changes ----

    /// Move a record to `status` (`active`, `rejected`, or `inactive`).
    ///
    /// The index record is the existence check. The ledger client
    /// additionally refuses CIDs the ledger has never seen.
    pub async fn change_status(&self, cid: &Cid, status: &str) -> RegistryResult<Record> {
        let target: Status = status.parse()?;
        self.apply_status(cid, target, StatusRequest::Change).await
    }

    /// Return a rejected or inactive record to `active`.
    pub async fn reactivate(&self, cid: &Cid) -> RegistryResult<Record> {
        self.apply_status(cid, Status::Active, StatusRequest::Reactivate)
            .await
    }

    async fn apply_status(
        &self,
        cid: &Cid,
        target: Status,
        request: StatusRequest,
    ) -> RegistryResult<Record> {
        let _guard = self.locks.lock(cid).await;
        let current = self
            .index
            .get(cid)?
            .ok_or_else(|| RegistryError::NotIndexed(cid.clone()))?;
        self.check_transition(current.status, target, request)?;

        let receipt = self.ledger.set_status(cid, target).await.map_err(|e| {
            if matches!(e, LedgerError::NotFound(_)) {
                warn!(cid = %cid, "index holds a record the ledger does not know; reconcile it");
            }
            e
        })?;

        let change = StatusChange {
            status: target,
            at: self.clock.now(),
            receipt: Some(receipt),
        };
        let record = self
            .index
            .merge(cid, &RecordUpdate::status_change(change))
            .map_err(|source| {
                error!(cid = %cid, status = %target, error = %source, "ledger updated but index merge failed");
                RegistryError::IndexWrite {
                    cid: cid.clone(),
                    source,
                }
            })?;
        info!(cid = %cid, from = %current.status, to = %target, "status changed");
        Ok(record)
    }

    fn check_transition(
        &self,
        from: Status,
        to: Status,
        request: StatusRequest,
    ) -> RegistryResult<()> {
        let allowed = match (request, self.policy) {
            (StatusRequest::Reactivate, _) => from.is_reversal(to),
            (StatusRequest::Change, TransitionPolicy::Open) => true,
            (StatusRequest::Change, TransitionPolicy::Lifecycle) => from.can_transition_to(to),
        };
        if allowed {
            Ok(())
        } else {
            Err(RegistryError::Transition { from, to })
        }
    }

    // ---- Reads ----

    /// Merge content, ledger, and index into one view.
    ///
    /// Content and ledger are read concurrently. A CID the ledger has never
    /// seen is `notfound` whether or not its content exists.
    pub async fn query(&self, cid: &Cid) -> RegistryResult<DerivedView> {
        let (content, entry) =
            tokio::join!(self.addressor.resolve(cid), self.ledger.read_entry(cid));
        let entry = entry?;
        let now = self.clock.now();

        let content = match content {
            Ok(bytes) => Some(bytes),
            Err(e) if !entry.exists => {
                debug!(cid = %cid, error = %e, "no content for unregistered CID");
                None
            }
            Err(e) => return Err(e.into()),
        };

        let record = match self.index.get(cid) {
            Ok(record) => record,
            Err(e) => {
                warn!(cid = %cid, error = %e, "index read failed, answering without audit data");
                None
            }
        };

        let status = DerivedStatus::from_ledger(
            entry.exists,
            entry.status,
            entry.valid_to_instant(),
            now,
        );

        let integrity = match (&content, &record) {
            (Some(bytes), Some(record)) => {
                let actual = ContentHasher::content_hash(bytes);
                if actual == record.content_hash {
                    Integrity::Verified
                } else {
                    warn!(cid = %cid, expected = %record.content_hash, actual = %actual, "content hash mismatch");
                    Integrity::Mismatch {
                        expected: record.content_hash,
                        actual,
                    }
                }
            }
            _ => Integrity::Unchecked,
        };

        let index_in_sync = match (&record, entry.exists) {
            (Some(record), true) => record.status == entry.status,
            (None, false) => true,
            _ => false,
        };
        if !index_in_sync {
            warn!(cid = %cid, ledger_exists = entry.exists, "index diverges from ledger");
        }

        let payload = content
            .as_ref()
            .and_then(|bytes| serde_json::from_slice(bytes).ok())
            .or_else(|| record.as_ref().map(|r| r.payload.clone()));
        let size = content
            .as_ref()
            .map(|bytes| bytes.len() as u64)
            .or_else(|| record.as_ref().map(|r| r.content.size));

        let (anchor_receipt, history) = match record {
            Some(record) => {
                let history = record
                    .status_history
                    .into_iter()
                    .map(|change| HistoryEntry {
                        explorer_url: change
                            .receipt
                            .as_ref()
                            .and_then(|r| self.explorer_url(&r.tx_hash)),
                        change,
                    })
                    .collect();
                (record.ledger_receipt, history)
            }
            None => (None, Vec::new()),
        };

        debug!(cid = %cid, status = %status, "query answered");
        Ok(DerivedView {
            cid: cid.clone(),
            status,
            ledger: entry.exists.then(|| LedgerState {
                status: entry.status,
                valid_to: entry.valid_to_instant(),
                registered_at: entry.registered_at(),
            }),
            payload,
            size,
            integrity,
            gateway_url: self.gateway_url(cid),
            explorer_url: anchor_receipt
                .as_ref()
                .and_then(|r| self.explorer_url(&r.tx_hash)),
            anchor_receipt,
            history,
            index_in_sync,
            queried_at: now,
        })
    }

    /// Raw content bytes for `cid`.
    pub async fn resolve_content(&self, cid: &Cid) -> RegistryResult<Bytes> {
        Ok(self.addressor.resolve(cid).await?)
    }

    /// All index records in CID order.
    pub fn list(&self) -> RegistryResult<Vec<Record>> {
        Ok(self.index.list().collect::<Result<Vec<_>, _>>()?)
    }

    // ---- Maintenance ----

    /// Re-read the ledger and repair the index to match it.
    pub async fn reconcile(&self, cid: &Cid) -> RegistryResult<ReconcileOutcome> {
        let _guard = self.locks.lock(cid).await;
        let entry = self.ledger.read_entry(cid).await?;
        let record = self.index.get(cid)?;
        let now = self.clock.now();

        if !entry.exists {
            if record.is_some() {
                warn!(cid = %cid, "index record has no ledger entry");
            }
            return Ok(ReconcileOutcome::NotOnLedger {
                indexed: record.is_some(),
            });
        }

        match record {
            Some(record) if record.status == entry.status => Ok(ReconcileOutcome::InSync),
            Some(record) => {
                let change = StatusChange {
                    status: entry.status,
                    at: now,
                    receipt: None,
                };
                self.index
                    .merge(cid, &RecordUpdate::status_change(change))?;
                info!(cid = %cid, from = %record.status, to = %entry.status, "index repaired from ledger");
                Ok(ReconcileOutcome::Repaired {
                    from: record.status,
                    to: entry.status,
                })
            }
            None => {
                let bytes = self.addressor.resolve(cid).await?;
                let payload: Value = serde_json::from_slice(&bytes)
                    .map_err(|e| RegistryError::Encoding(format!("content of {cid}: {e}")))?;
                let local = self.addressor.compute_cid(&bytes);

                let mut status_history = vec![StatusChange {
                    status: Status::Active,
                    at: entry.registered_at().unwrap_or(now),
                    receipt: None,
                }];
                if entry.status != Status::Active {
                    status_history.push(StatusChange {
                        status: entry.status,
                        at: now,
                        receipt: None,
                    });
                }
                let record = Record {
                    cid: cid.clone(),
                    content_hash: ContentHasher::content_hash(&bytes),
                    payload,
                    content: ContentMeta {
                        size: bytes.len() as u64,
                        local_cid: (local != *cid).then_some(local),
                        pinned: false,
                        gateway_url: self.gateway_url(cid),
                    },
                    valid_to: entry.valid_to_instant(),
                    status: entry.status,
                    status_history,
                    ledger_receipt: None,
                    created_at: now,
                    updated_at: now,
                };
                self.index.put(&record)?;
                info!(cid = %cid, status = %entry.status, "index record rebuilt from ledger");
                Ok(ReconcileOutcome::Created {
                    record: Box::new(record),
                })
            }
        }
    }

    /// Pin already stored content with the configured pinning service and
    /// mark the index record as pinned.
    pub async fn pin_existing(&self, cid: &Cid) -> RegistryResult<Pinned> {
        let _guard = self.locks.lock(cid).await;
        let meta = PinMetadata::named(&self.pin_name).with("cid", cid.as_str());
        let outcome = self.addressor.pin_existing(cid, &meta).await?;
        if let Some(record) = self.index.get(cid)? {
            if !record.content.pinned {
                let content = ContentMeta {
                    pinned: true,
                    ..record.content
                };
                self.index
                    .merge(cid, &RecordUpdate::content(content, self.clock.now()))?;
            }
        }
        info!(cid = %cid, pinned_cid = %outcome.receipt.cid, "content pinned");
        Ok(Pinned::new(cid.clone(), outcome.receipt, outcome.mismatch))
    }
}

fn open_ledger(config: &RegistryConfig) -> RegistryResult<LedgerClient> {
    let ledger_config = LedgerClientConfig {
        chain_id: config.ledger.chain_id,
        rpc_timeout: Duration::from_secs(config.ledger.rpc_timeout_secs),
        poll_interval: Duration::from_millis(config.ledger.poll_interval_ms),
        confirmation_timeout: Duration::from_secs(config.ledger.confirmation_timeout_secs),
    };
    let signer = config.signer_key()?;
    let contract = config.contract_address()?;

    // Unbound clients never sign, so a throwaway key is enough for them.
    let signer = signer.unwrap_or_else(SigningKey::generate);
    let (chain, contract): (Arc<dyn RegistryChain>, Option<Address>) = match config.ledger.backend {
        LedgerBackend::Rpc => {
            let url = parse_url("ledger.rpc_url", &config.ledger.rpc_url)?;
            let chain: Arc<dyn RegistryChain> =
                Arc::new(JsonRpcChain::new(url, ledger_config.rpc_timeout)?);
            (chain, contract)
        }
        LedgerBackend::Memory => {
            let address = contract.unwrap_or(LOCAL_CONTRACT);
            let chain = InMemoryChain::new(config.ledger.chain_id);
            chain.deploy(address)?;
            warn!(contract = %address, "using process-local ledger; state is lost on exit");
            let chain: Arc<dyn RegistryChain> = Arc::new(chain);
            (chain, Some(address))
        }
    };

    let client = LedgerClient::new(chain, signer, ledger_config);
    if let Some(address) = contract {
        let abi = match &config.ledger.abi_path {
            Some(path) => {
                let json = std::fs::read_to_string(path).map_err(|e| {
                    RegistryError::Config(format!("ledger.abi_path {}: {e}", path.display()))
                })?;
                AbiDescriptor::from_json(&json)?
            }
            None => AbiDescriptor::registry_default()?,
        };
        client.bind(ContractBinding::new(address, abi)?)?;
    }
    Ok(client)
}
