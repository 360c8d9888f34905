//! Ledger client for the event registry.
//!
//! The registry contract keeps one entry per CID: `(status, validTo,
//! timestamp, exists)`. This crate binds a signer to that contract and
//! exposes its three operations:
//!
//! - [`LedgerClient::anchor`] -- `registry(cid, validTo)`
//! - [`LedgerClient::set_status`] -- `changeStatus(cid, status)`
//! - [`LedgerClient::read_entry`] -- `getRegistry(cid)`
//!
//! The node itself sits behind the [`RegistryChain`] trait. [`InMemoryChain`]
//! executes the contract locally and is used in tests and offline mode;
//! [`JsonRpcChain`] talks to a node over HTTP.
//!
//! # Ordering
//!
//! Every transaction from the signer carries a strictly increasing nonce.
//! The client funnels all writes through a single async mutex and keeps it
//! until the receipt is in, so two writes from one process never race for
//! the same nonce. Reads bypass the mutex.

pub mod client;
pub mod contract;
pub mod error;
pub mod memory;
pub mod rpc;
pub mod traits;
pub mod transaction;

pub use client::{LedgerClient, LedgerClientConfig};
pub use contract::{AbiDescriptor, ContractBinding, DEFAULT_REGISTRY_ABI, REQUIRED_FUNCTIONS};
pub use error::{LedgerError, LedgerResult};
pub use memory::InMemoryChain;
pub use rpc::JsonRpcChain;
pub use traits::{RegistryChain, RegistryEntry, TxReceipt};
pub use transaction::{ContractCall, SignedTransaction, Transaction};
