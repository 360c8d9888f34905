//! Hashing and signing primitives for the event registry.
//!
//! Provides CID computation over SHA2-256 multihashes, canonical JSON
//! serialization with its content hash, domain-separated BLAKE3 hashing for
//! ledger transactions, and the Ed25519 signer credential.
//!
//! All crypto operations wrap established libraries.

pub mod hasher;
pub mod signer;

pub use hasher::{canonical_json, CidVersion, ContentHasher, DomainHasher, HasherError};
pub use signer::{Signature, SignatureError, SigningKey, VerifyingKey};
