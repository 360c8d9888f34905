//! Registry engine for anchored event documents.
//!
//! [`RegistryEngine`] ties together the three sources of truth:
//!
//! - the content store ([`evreg_store::ContentAddressor`]): CID to bytes
//! - the ledger ([`evreg_ledger::LedgerClient`]): existence, status, expiry
//! - the local index ([`evreg_index::RecordIndex`]): mirrored records and
//!   their audit history
//!
//! Ingestion stores, anchors, then indexes. Status changes write the ledger,
//! then mirror into the index. Queries read content and ledger concurrently
//! and derive the status from the ledger and the clock; the index only adds
//! audit data.
//!
//! # Derived status
//!
//! | Ledger entry | `validTo` | Derived |
//! |--------------|-----------|---------|
//! | missing | any | `notfound` |
//! | present | elapsed | `expired` |
//! | present | none or future | stored status |

pub mod clock;
pub mod config;
pub mod engine;
pub mod error;
pub mod locks;
pub mod validator;
pub mod view;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{
    ContentConfig, IndexBackend, LedgerBackend, LedgerConfig, PinningConfig, PolicyConfig,
    RegistryConfig, TransitionPolicy,
};
pub use engine::{RegistryEngine, LOCAL_CONTRACT};
pub use error::{ErrorKind, RegistryError, RegistryResult};
pub use locks::KeyedLocks;
pub use validator::{AcceptAll, EpcisValidator, SchemaValidator, EPCIS_EVENT_SCHEMA};
pub use view::{
    DerivedView, HistoryEntry, Ingestion, Integrity, LedgerState, Pinned, ReconcileOutcome,
    Warning,
};
