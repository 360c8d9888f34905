use std::fmt;

use evreg_types::{Cid, ContentHash, RAW_CODEC, SHA2_256};
use sha2::{Digest, Sha256};

/// CID scheme used for locally computed identifiers.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum CidVersion {
    /// Base58 `Qm...` identifiers, as issued by most pinning services.
    #[default]
    V0,
    /// Base32 CIDv1 with the raw codec.
    V1,
}

impl TryFrom<u8> for CidVersion {
    type Error = HasherError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::V0),
            1 => Ok(Self::V1),
            other => Err(HasherError::UnsupportedVersion(other)),
        }
    }
}

impl fmt::Display for CidVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::V0 => write!(f, "v0"),
            Self::V1 => write!(f, "v1"),
        }
    }
}

/// Content hasher: computes CIDs and content hashes for stored bytes.
///
/// Both are pure functions of the input bytes. Two calls with the same bytes
/// and version always produce the same CID.
#[derive(Clone, Copy, Debug, Default)]
pub struct ContentHasher {
    version: CidVersion,
}

impl ContentHasher {
    pub const fn new(version: CidVersion) -> Self {
        Self { version }
    }

    pub fn version(&self) -> CidVersion {
        self.version
    }

    /// Compute the CID of `data` under this hasher's version.
    pub fn cid(&self, data: &[u8]) -> Cid {
        let digest = Self::content_hash(data);
        match self.version {
            CidVersion::V0 => Cid::v0_sha256(digest.as_bytes()),
            CidVersion::V1 => Cid::v1(RAW_CODEC, SHA2_256, digest.as_bytes()),
        }
    }

    /// Whether `cid` is a SHA2-256 address of exactly these bytes.
    ///
    /// Version-independent: a v0 and a v1 CID over the same digest both
    /// verify. CIDs issued for wrapped content (e.g. DAG-PB files) do not.
    pub fn verify(data: &[u8], cid: &Cid) -> bool {
        let Ok(hash) = cid.multihash() else {
            return false;
        };
        hash.code == SHA2_256 && hash.digest == Sha256::digest(data).as_slice()
    }

    /// SHA-256 digest of `data`.
    pub fn content_hash(data: &[u8]) -> ContentHash {
        let mut digest = [0u8; 32];
        digest.copy_from_slice(&Sha256::digest(data));
        ContentHash::from_digest(digest)
    }
}

/// Domain-separated BLAKE3 hasher.
///
/// The domain tag is prepended to every computation so that identical bytes
/// hashed for different purposes never collide.
pub struct DomainHasher {
    domain: &'static str,
}

impl DomainHasher {
    /// Hasher for signed ledger transactions.
    pub const TRANSACTION: Self = Self {
        domain: "evreg-tx-v1",
    };
    /// Hasher for signer address derivation.
    pub const ADDRESS: Self = Self {
        domain: "evreg-address-v1",
    };

    pub const fn new(domain: &'static str) -> Self {
        Self { domain }
    }

    pub fn hash(&self, data: &[u8]) -> [u8; 32] {
        let mut hasher = blake3::Hasher::new();
        hasher.update(self.domain.as_bytes());
        hasher.update(b":");
        hasher.update(data);
        *hasher.finalize().as_bytes()
    }

    pub fn domain(&self) -> &str {
        self.domain
    }
}

/// Serialize a JSON value canonically: compact, object keys sorted
/// lexicographically at every depth.
///
/// Independent of whether `serde_json` preserves insertion order, so the
/// result is stable across feature unification.
pub fn canonical_json(value: &serde_json::Value) -> Result<Vec<u8>, HasherError> {
    let mut out = Vec::new();
    write_canonical(value, &mut out)?;
    Ok(out)
}

fn write_canonical(value: &serde_json::Value, out: &mut Vec<u8>) -> Result<(), HasherError> {
    use serde_json::Value;
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push(b'{');
            for (i, key) in keys.into_iter().enumerate() {
                if i > 0 {
                    out.push(b',');
                }
                serde_json::to_writer(&mut *out, key)
                    .map_err(|e| HasherError::Serialization(e.to_string()))?;
                out.push(b':');
                if let Some(v) = map.get(key) {
                    write_canonical(v, out)?;
                }
            }
            out.push(b'}');
        }
        Value::Array(items) => {
            out.push(b'[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(b',');
                }
                write_canonical(item, out)?;
            }
            out.push(b']');
        }
        scalar => serde_json::to_writer(&mut *out, scalar)
            .map_err(|e| HasherError::Serialization(e.to_string()))?,
    }
    Ok(())
}

/// Errors from hashing operations.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum HasherError {
    #[error("serialization error: {0}")]
    Serialization(String),
    #[error("unsupported CID version {0}: expected 0 or 1")]
    UnsupportedVersion(u8),
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    #[test]
    fn v0_cid_is_qm() {
        let cid = ContentHasher::new(CidVersion::V0).cid(b"hello");
        assert!(cid.as_str().starts_with("Qm"));
    }

    #[test]
    fn v1_cid_is_base32_raw() {
        let cid = ContentHasher::new(CidVersion::V1).cid(b"hello");
        assert!(cid.as_str().starts_with("bafkrei"));
    }

    #[test]
    fn versions_differ_but_both_verify() {
        let v0 = ContentHasher::new(CidVersion::V0).cid(b"payload");
        let v1 = ContentHasher::new(CidVersion::V1).cid(b"payload");
        assert_ne!(v0, v1);
        assert!(ContentHasher::verify(b"payload", &v0));
        assert!(ContentHasher::verify(b"payload", &v1));
    }

    #[test]
    fn verify_rejects_tampered_bytes() {
        let cid = ContentHasher::default().cid(b"original");
        assert!(!ContentHasher::verify(b"tampered", &cid));
    }

    #[test]
    fn content_hash_matches_known_vector() {
        let hash = ContentHasher::content_hash(b"abc");
        assert_eq!(
            hash.to_hex(),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn version_from_u8() {
        assert_eq!(CidVersion::try_from(0).unwrap(), CidVersion::V0);
        assert_eq!(CidVersion::try_from(1).unwrap(), CidVersion::V1);
        assert_eq!(
            CidVersion::try_from(2),
            Err(HasherError::UnsupportedVersion(2))
        );
    }

    // --- domain hashing ---

    #[test]
    fn domains_separate_hashes() {
        let a = DomainHasher::TRANSACTION.hash(b"same");
        let b = DomainHasher::ADDRESS.hash(b"same");
        assert_ne!(a, b);
        assert_eq!(a, DomainHasher::TRANSACTION.hash(b"same"));
    }

    // --- canonical json ---

    #[test]
    fn canonical_sorts_keys_recursively() {
        let value = json!({"b": 1, "a": {"z": true, "m": [3, {"y": null, "x": "s"}]}});
        let bytes = canonical_json(&value).unwrap();
        assert_eq!(
            String::from_utf8(bytes).unwrap(),
            r#"{"a":{"m":[3,{"x":"s","y":null}],"z":true},"b":1}"#
        );
    }

    #[test]
    fn canonical_escapes_strings() {
        let value = json!({"k\"ey": "line\nbreak"});
        let bytes = canonical_json(&value).unwrap();
        let back: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(back, value);
    }

    #[test]
    fn canonical_is_insensitive_to_key_order() {
        let a: serde_json::Value =
            serde_json::from_str(r#"{"type":"ObjectEvent","eventTime":"2024-01-01T00:00:00Z"}"#)
                .unwrap();
        let b: serde_json::Value =
            serde_json::from_str(r#"{"eventTime":"2024-01-01T00:00:00Z","type":"ObjectEvent"}"#)
                .unwrap();
        assert_eq!(canonical_json(&a).unwrap(), canonical_json(&b).unwrap());
    }

    proptest! {
        #[test]
        fn cid_is_deterministic(data in proptest::collection::vec(any::<u8>(), 0..512)) {
            let hasher = ContentHasher::default();
            prop_assert_eq!(hasher.cid(&data), hasher.cid(&data));
            prop_assert!(ContentHasher::verify(&data, &hasher.cid(&data)));
        }
    }
}
