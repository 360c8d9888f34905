//! Content addressing for the event registry.
//!
//! The [`ContentAddressor`] turns payload bytes into a CID and back. Storing
//! writes through a [`PinningService`] when one is configured (its identifier
//! wins) and always into a local [`ContentCache`]. Resolving checks the cache
//! and then each [`ContentSource`] in priority order: pinning service
//! gateway, content network, public gateway.
//!
//! # Backends
//!
//! - [`FsCache`] -- one file per CID, atomic rename on write
//! - [`InMemoryCache`] -- `HashMap`-based cache for tests and embedding
//! - [`PinataClient`] -- Pinata pinning API and gateway
//! - [`IpfsApiClient`] -- IPFS-compatible HTTP API (`add` / `cat`)
//! - [`GatewayClient`] -- read-only public gateway
//!
//! # Rules
//!
//! 1. Identical bytes always produce the identical local CID.
//! 2. A pinning failure never fails a store; the local CID is used instead.
//! 3. A CID mismatch is reported, never silently dropped.
//! 4. Every remote call runs under a timeout and reports a retryable error.

pub mod addressor;
pub mod cache;
pub mod error;
pub mod pinning;
pub mod remote;
pub mod source;

pub use addressor::{CidMismatch, ContentAddressor, PinOutcome, StoreOutcome, DEFAULT_PIN_TIMEOUT};
pub use cache::{ContentCache, FsCache, InMemoryCache};
pub use error::{SourceFailure, StoreError, StoreResult};
pub use pinning::{PinMetadata, PinReceipt, PinataAuth, PinataClient, PinningService};
pub use remote::{gateway_url, GatewayClient, IpfsApiClient};
pub use source::ContentSource;
