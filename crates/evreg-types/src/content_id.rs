use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::TypeError;

/// Multicodec code for raw binary content.
pub const RAW_CODEC: u64 = 0x55;
/// Multicodec code for DAG-PB, the codec of CIDv0.
pub const DAG_PB_CODEC: u64 = 0x70;
/// Multihash code for SHA2-256.
pub const SHA2_256: u64 = 0x12;

const BASE32_ALPHABET: &[u8; 32] = b"abcdefghijklmnopqrstuvwxyz234567";

/// Content identifier for a stored document.
///
/// Holds the canonical multibase text form of a CID: `Qm...` (base58btc) for
/// version 0 and `b...` (base32) for version 1. Parsing validates the
/// multihash framing and re-renders the identifier, so two `Cid`s compare
/// equal exactly when they name the same content under the same scheme.
///
/// Ordering is lexical on the text form. The local index iterates in this
/// order.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Cid(String);

/// The self-describing digest inside a CID.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Multihash {
    pub code: u64,
    pub digest: Vec<u8>,
}

/// Decoded binary form of a CID.
struct Parts {
    version: u64,
    codec: u64,
    hash: Multihash,
}

impl Cid {
    /// CIDv0 over a SHA2-256 digest.
    pub fn v0_sha256(digest: &[u8; 32]) -> Self {
        let mut bytes = Vec::with_capacity(34);
        bytes.extend_from_slice(&[SHA2_256 as u8, 32]);
        bytes.extend_from_slice(digest);
        Self(bs58::encode(bytes).into_string())
    }

    /// CIDv1 with the given content codec and multihash.
    pub fn v1(codec: u64, hash_code: u64, digest: &[u8]) -> Self {
        let parts = Parts {
            version: 1,
            codec,
            hash: Multihash {
                code: hash_code,
                digest: digest.to_vec(),
            },
        };
        Self(render_v1(&parts))
    }

    /// Parse and normalise a CID from its text form.
    pub fn parse(input: &str) -> Result<Self, TypeError> {
        let trimmed = input.trim();
        let invalid = |reason: String| TypeError::InvalidCid {
            input: trimmed.to_string(),
            reason,
        };
        if trimmed.is_empty() {
            return Err(invalid("empty identifier".into()));
        }
        let parts = decode(trimmed).map_err(invalid)?;
        if parts.version == 0 {
            Ok(Self(trimmed.to_string()))
        } else {
            Ok(Self(render_v1(&parts)))
        }
    }

    /// The canonical text form.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// CID version (0 or 1).
    pub fn version(&self) -> u8 {
        if self.0.starts_with("Qm") {
            0
        } else {
            1
        }
    }

    /// Content codec: DAG-PB for every v0 CID.
    pub fn codec(&self) -> Result<u64, TypeError> {
        self.parts().map(|p| p.codec)
    }

    /// The multihash this CID addresses.
    pub fn multihash(&self) -> Result<Multihash, TypeError> {
        self.parts().map(|p| p.hash)
    }

    fn parts(&self) -> Result<Parts, TypeError> {
        decode(&self.0).map_err(|reason| TypeError::InvalidCid {
            input: self.0.clone(),
            reason,
        })
    }

    /// Abbreviated form for log lines and terminal output.
    pub fn short(&self) -> String {
        if self.0.len() <= 14 {
            self.0.clone()
        } else {
            format!("{}..{}", &self.0[..8], &self.0[self.0.len() - 4..])
        }
    }
}

impl fmt::Display for Cid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for Cid {
    type Err = TypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Cid::parse(s)
    }
}

impl Serialize for Cid {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for Cid {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Cid::parse(&raw).map_err(serde::de::Error::custom)
    }
}

// ---- multibase / varint framing ----

fn decode(text: &str) -> Result<Parts, String> {
    if text.len() == 46 && text.starts_with("Qm") {
        let bytes = bs58::decode(text)
            .into_vec()
            .map_err(|e| format!("base58: {e}"))?;
        let hash = decode_multihash(&bytes)?;
        if hash.code != SHA2_256 || hash.digest.len() != 32 {
            return Err("CIDv0 must carry a 32-byte SHA2-256 digest".into());
        }
        return Ok(Parts {
            version: 0,
            codec: DAG_PB_CODEC,
            hash,
        });
    }

    let mut chars = text.chars();
    let bytes = match chars.next() {
        Some('b') => base32_decode(chars.as_str())?,
        Some('B') => base32_decode(&chars.as_str().to_ascii_lowercase())?,
        Some('z') => bs58::decode(chars.as_str())
            .into_vec()
            .map_err(|e| format!("base58: {e}"))?,
        _ => return Err("unsupported multibase prefix".into()),
    };
    let (version, rest) = read_varint(&bytes)?;
    if version != 1 {
        return Err(format!("unsupported CID version {version}"));
    }
    let (codec, rest) = read_varint(rest)?;
    Ok(Parts {
        version,
        codec,
        hash: decode_multihash(rest)?,
    })
}

fn decode_multihash(bytes: &[u8]) -> Result<Multihash, String> {
    let (code, rest) = read_varint(bytes)?;
    let (len, digest) = read_varint(rest)?;
    if digest.len() as u64 != len {
        return Err(format!(
            "multihash declares {len} digest bytes, found {}",
            digest.len()
        ));
    }
    Ok(Multihash {
        code,
        digest: digest.to_vec(),
    })
}

fn render_v1(parts: &Parts) -> String {
    let mut bytes = Vec::with_capacity(parts.hash.digest.len() + 8);
    write_varint(parts.version, &mut bytes);
    write_varint(parts.codec, &mut bytes);
    write_varint(parts.hash.code, &mut bytes);
    write_varint(parts.hash.digest.len() as u64, &mut bytes);
    bytes.extend_from_slice(&parts.hash.digest);
    format!("b{}", base32_encode(&bytes))
}

fn read_varint(bytes: &[u8]) -> Result<(u64, &[u8]), String> {
    let mut value = 0u64;
    for (i, byte) in bytes.iter().enumerate().take(9) {
        value |= u64::from(byte & 0x7f) << (7 * i);
        if byte & 0x80 == 0 {
            return Ok((value, &bytes[i + 1..]));
        }
    }
    Err("truncated or oversized varint".into())
}

fn write_varint(mut value: u64, out: &mut Vec<u8>) {
    while value >= 0x80 {
        out.push((value as u8) | 0x80);
        value >>= 7;
    }
    out.push(value as u8);
}

/// RFC 4648 base32, lowercase, unpadded.
fn base32_encode(bytes: &[u8]) -> String {
    let mut out = String::with_capacity((bytes.len() * 8).div_ceil(5));
    let mut buffer = 0u32;
    let mut bits = 0;
    for &byte in bytes {
        buffer = (buffer << 8) | u32::from(byte);
        bits += 8;
        while bits >= 5 {
            bits -= 5;
            out.push(BASE32_ALPHABET[((buffer >> bits) & 0x1f) as usize] as char);
        }
    }
    if bits > 0 {
        out.push(BASE32_ALPHABET[((buffer << (5 - bits)) & 0x1f) as usize] as char);
    }
    out
}

fn base32_decode(text: &str) -> Result<Vec<u8>, String> {
    let mut out = Vec::with_capacity(text.len() * 5 / 8);
    let mut buffer = 0u32;
    let mut bits = 0;
    for c in text.bytes() {
        let value = BASE32_ALPHABET
            .iter()
            .position(|&a| a == c)
            .ok_or_else(|| format!("invalid base32 character {:?}", c as char))?;
        buffer = (buffer << 5) | value as u32;
        bits += 5;
        if bits >= 8 {
            bits -= 8;
            out.push((buffer >> bits) as u8);
        }
    }
    if bits >= 5 || buffer & ((1 << bits) - 1) != 0 {
        return Err("non-canonical base32 tail".into());
    }
    Ok(out)
}

/// SHA-256 digest of a payload's canonical serialization.
///
/// Independent of the CID scheme: a pinning service may wrap content before
/// hashing, so the CID alone cannot always verify the bytes. The content hash
/// can.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ContentHash([u8; 32]);

impl ContentHash {
    /// Create from a pre-computed digest.
    pub const fn from_digest(digest: [u8; 32]) -> Self {
        Self(digest)
    }

    /// The raw 32-byte digest.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Lowercase hex representation.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Parse from a 64-character hex string.
    pub fn from_hex(s: &str) -> Result<Self, TypeError> {
        let bytes = hex::decode(s).map_err(|e| TypeError::InvalidHex(e.to_string()))?;
        let arr: [u8; 32] = bytes
            .as_slice()
            .try_into()
            .map_err(|_| TypeError::InvalidLength {
                expected: 32,
                actual: bytes.len(),
            })?;
        Ok(Self(arr))
    }
}

impl fmt::Debug for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ContentHash({})", hex::encode(&self.0[..4]))
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl Serialize for ContentHash {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for ContentHash {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        ContentHash::from_hex(&raw).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn v0(seed: u8) -> Cid {
        Cid::v0_sha256(&[seed; 32])
    }

    fn v1(seed: u8) -> Cid {
        Cid::v1(RAW_CODEC, SHA2_256, &[seed; 32])
    }

    #[test]
    fn v0_renders_as_qm() {
        let cid = v0(1);
        assert!(cid.as_str().starts_with("Qm"));
        assert_eq!(cid.as_str().len(), 46);
        assert_eq!(cid.version(), 0);
        assert_eq!(cid.codec().unwrap(), DAG_PB_CODEC);
    }

    #[test]
    fn v1_raw_sha256_renders_as_bafkrei() {
        let cid = v1(1);
        assert!(cid.as_str().starts_with("bafkrei"));
        assert_eq!(cid.as_str().len(), 59);
        assert_eq!(cid.version(), 1);
        assert_eq!(cid.codec().unwrap(), RAW_CODEC);
    }

    #[test]
    fn multihash_exposes_the_digest() {
        for cid in [v0(9), v1(9)] {
            let hash = cid.multihash().unwrap();
            assert_eq!(hash.code, SHA2_256);
            assert_eq!(hash.digest, vec![9; 32]);
        }
    }

    #[test]
    fn parse_roundtrips_text_form() {
        for cid in [v0(2), v1(2)] {
            assert_eq!(Cid::parse(cid.as_str()).unwrap(), cid);
        }
    }

    #[test]
    fn parse_normalises_other_v1_multibases() {
        let cid = v1(3);
        let upper = cid.as_str().to_ascii_uppercase();
        assert_eq!(Cid::parse(&upper).unwrap(), cid);

        let mut bytes = vec![0x01, 0x55, 0x12, 0x20];
        bytes.extend_from_slice(&[3; 32]);
        let base58 = format!("z{}", bs58::encode(bytes).into_string());
        assert_eq!(Cid::parse(&base58).unwrap(), cid);
    }

    #[test]
    fn parse_trims_whitespace() {
        let cid = v0(4);
        assert_eq!(Cid::parse(&format!("  {cid}\n")).unwrap(), cid);
    }

    #[test]
    fn parse_rejects_garbage() {
        for input in ["banana", "", "Qm123", "bafy!!!", "x123"] {
            assert!(
                matches!(Cid::parse(input), Err(TypeError::InvalidCid { .. })),
                "{input}"
            );
        }
    }

    #[test]
    fn parse_rejects_truncated_digest() {
        let mut bytes = vec![0x01, 0x55, 0x12, 0x20];
        bytes.extend_from_slice(&[5; 31]);
        let text = format!("b{}", base32_encode(&bytes));
        assert!(Cid::parse(&text).is_err());
    }

    #[test]
    fn varints_span_multiple_bytes() {
        let mut out = Vec::new();
        write_varint(300, &mut out);
        assert_eq!(out, vec![0xac, 0x02]);
        assert_eq!(read_varint(&out).unwrap().0, 300);
        assert!(read_varint(&[0x80]).is_err());
    }

    #[test]
    fn base32_matches_rfc4648_vectors() {
        assert_eq!(base32_encode(b"foobar"), "mzxw6ytboi");
        assert_eq!(base32_decode("mzxw6ytboi").unwrap(), b"foobar");
        assert_eq!(base32_encode(b"f"), "my");
    }

    #[test]
    fn ordering_is_lexical() {
        let mut cids = vec![v0(3), v0(1), v0(2)];
        cids.sort();
        for w in cids.windows(2) {
            assert!(w[0].as_str() <= w[1].as_str());
        }
    }

    #[test]
    fn short_form_is_abbreviated() {
        let cid = v0(5);
        assert!(cid.short().len() < cid.as_str().len());
        assert!(cid.short().contains(".."));
    }

    #[test]
    fn serde_uses_text_form() {
        let cid = v1(6);
        let json = serde_json::to_string(&cid).unwrap();
        assert_eq!(json, format!("\"{cid}\""));
        let parsed: Cid = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, cid);
    }

    #[test]
    fn serde_rejects_invalid_cid() {
        let result: Result<Cid, _> = serde_json::from_str("\"not-a-cid\"");
        assert!(result.is_err());
    }

    #[test]
    fn content_hash_hex_roundtrip() {
        let hash = ContentHash::from_digest([0xab; 32]);
        let parsed = ContentHash::from_hex(&hash.to_hex()).unwrap();
        assert_eq!(hash, parsed);
        assert_eq!(hash.to_hex().len(), 64);
    }

    #[test]
    fn content_hash_rejects_wrong_length() {
        let err = ContentHash::from_hex("abcd").unwrap_err();
        assert_eq!(
            err,
            TypeError::InvalidLength {
                expected: 32,
                actual: 2
            }
        );
    }
}
