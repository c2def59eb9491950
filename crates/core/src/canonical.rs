//! Canonical hashing pipeline.
//!
//! Every hashed object in the system (a step, an input commitment, a tree leaf,
//! a credential envelope) goes through the same two stages:
//!
//! 1. [`canonicalize`]: the value is lowered into a JSON value tree and written
//!    as compact UTF-8 JSON with object keys sorted by byte order.
//! 2. [`digest`]: Keccak-256 over those bytes.
//!
//! Keccak-256 is the function the ledger uses for `bytes32` anchors and event
//! topics, so roots computed here can be compared with anchored values directly.
//!
//! SECURITY: Any change to this module changes every root ever produced.

use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;
use sha3::{Digest as _, Keccak256};
use std::fmt;
use std::str::FromStr;

use crate::error::{CoreError, Result};

/// Length of a digest in bytes.
pub const DIGEST_LEN: usize = 32;

/// Input whose digest stands in for the root of an empty tree.
pub const EMPTY_SENTINEL_INPUT: &[u8] = b"empty";

/// A 32-byte Keccak-256 digest.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Digest([u8; DIGEST_LEN]);

impl Digest {
    pub const fn from_bytes(bytes: [u8; DIGEST_LEN]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; DIGEST_LEN] {
        &self.0
    }

    /// `0x`-prefixed lowercase hex.
    pub fn to_hex(&self) -> String {
        format!("0x{}", hex::encode(self.0))
    }

    /// Parses hex with or without the `0x` prefix.
    pub fn from_hex(s: &str) -> Result<Self> {
        let trimmed = s.strip_prefix("0x").unwrap_or(s);
        let bytes = hex::decode(trimmed)
            .map_err(|e| CoreError::InvalidDigest(format!("{}: {}", s, e)))?;
        let array: [u8; DIGEST_LEN] = bytes.try_into().map_err(|b: Vec<u8>| {
            CoreError::InvalidDigest(format!(
                "expected {} bytes, got {}",
                DIGEST_LEN,
                b.len()
            ))
        })?;
        Ok(Self(array))
    }

    /// Root reported for a tree with no leaves.
    pub fn empty_sentinel() -> Self {
        digest(EMPTY_SENTINEL_INPUT)
    }
}

impl AsRef<[u8]> for Digest {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl From<[u8; DIGEST_LEN]> for Digest {
    fn from(bytes: [u8; DIGEST_LEN]) -> Self {
        Self(bytes)
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Digest({})", self.to_hex())
    }
}

impl FromStr for Digest {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self> {
        Self::from_hex(s)
    }
}

impl Serialize for Digest {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Digest {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Digest::from_hex(&s).map_err(de::Error::custom)
    }
}

/// Keccak-256 over raw bytes.
pub fn digest(bytes: &[u8]) -> Digest {
    let out: [u8; DIGEST_LEN] = Keccak256::digest(bytes).into();
    Digest(out)
}

/// Hash of two child nodes: `digest(left ‖ right)` over the raw digest bytes.
pub fn combine(left: &Digest, right: &Digest) -> Digest {
    let mut hasher = Keccak256::new();
    hasher.update(left.as_bytes());
    hasher.update(right.as_bytes());
    Digest(hasher.finalize().into())
}

/// Produces the canonical byte form of any serializable value.
///
/// Keys are sorted explicitly while writing, so the output does not depend on
/// how the value's maps happen to be ordered in memory.
pub fn canonicalize<T: Serialize + ?Sized>(value: &T) -> Result<Vec<u8>> {
    let tree = serde_json::to_value(value)?;
    let mut out = Vec::with_capacity(128);
    write_canonical(&tree, &mut out)?;
    Ok(out)
}

/// `digest(canonicalize(value))`.
pub fn hash_canonical<T: Serialize + ?Sized>(value: &T) -> Result<Digest> {
    Ok(digest(&canonicalize(value)?))
}

fn write_canonical(value: &Value, out: &mut Vec<u8>) -> Result<()> {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<(&String, &Value)> = map.iter().collect();
            entries.sort_by(|a, b| a.0.as_bytes().cmp(b.0.as_bytes()));
            out.push(b'{');
            for (i, (key, item)) in entries.into_iter().enumerate() {
                if i > 0 {
                    out.push(b',');
                }
                serde_json::to_writer(&mut *out, key)?;
                out.push(b':');
                write_canonical(item, out)?;
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
        // Scalars already have a single serde_json rendering.
        scalar => serde_json::to_writer(&mut *out, scalar)?,
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::HashMap;

    #[test]
    fn test_keccak_known_vector() {
        assert_eq!(
            digest(b"").to_hex(),
            "0xc5d2460186f7233c927e7db2dcc703c0e500b653ca82273b7bfad8045d85a470"
        );
    }

    #[test]
    fn test_canonical_key_order() {
        let mut map = HashMap::new();
        map.insert("zeta", json!(1));
        map.insert("alpha", json!({"y": true, "b": null}));
        map.insert("mid", json!([3, "x"]));

        let bytes = canonicalize(&map).unwrap();
        assert_eq!(
            String::from_utf8(bytes).unwrap(),
            r#"{"alpha":{"b":null,"y":true},"mid":[3,"x"],"zeta":1}"#
        );
    }

    #[test]
    fn test_canonical_struct_fields_sorted() {
        #[derive(Serialize)]
        struct Sample {
            timestamp: u64,
            kind: &'static str,
        }

        let bytes = canonicalize(&Sample {
            timestamp: 7,
            kind: "prompt",
        })
        .unwrap();
        assert_eq!(bytes, br#"{"kind":"prompt","timestamp":7}"#.to_vec());
    }

    #[test]
    fn test_canonical_unicode_verbatim() {
        let bytes = canonicalize(&json!({"text": "héllo \"q\""})).unwrap();
        assert_eq!(
            String::from_utf8(bytes).unwrap(),
            "{\"text\":\"héllo \\\"q\\\"\"}"
        );
    }

    #[test]
    fn test_hash_canonical_ignores_insertion_order() {
        let mut a = serde_json::Map::new();
        a.insert("one".into(), json!(1));
        a.insert("two".into(), json!(2));
        let mut b = serde_json::Map::new();
        b.insert("two".into(), json!(2));
        b.insert("one".into(), json!(1));

        assert_eq!(hash_canonical(&a).unwrap(), hash_canonical(&b).unwrap());
    }

    #[test]
    fn test_combine_is_concatenation_hash() {
        let left = digest(b"left");
        let right = digest(b"right");
        let mut joined = left.as_bytes().to_vec();
        joined.extend_from_slice(right.as_bytes());

        assert_eq!(combine(&left, &right), digest(&joined));
        assert_ne!(combine(&left, &right), combine(&right, &left));
    }

    #[test]
    fn test_digest_hex_roundtrip_and_prefix() {
        let d = digest(b"abc");
        let hex = d.to_hex();
        assert!(hex.starts_with("0x"));
        assert_eq!(Digest::from_hex(&hex).unwrap(), d);
        assert_eq!(Digest::from_hex(&hex[2..]).unwrap(), d);
        assert!(Digest::from_hex("0x1234").is_err());
        assert!(Digest::from_hex("zz").is_err());
    }

    #[test]
    fn test_digest_serde_as_string() {
        let d = digest(b"abc");
        let encoded = serde_json::to_string(&d).unwrap();
        assert_eq!(encoded, format!("\"{}\"", d.to_hex()));
        let decoded: Digest = serde_json::from_str(&encoded).unwrap();
        assert_eq!(decoded, d);
    }

    #[test]
    fn test_empty_sentinel_stable() {
        assert_eq!(Digest::empty_sentinel(), Digest::empty_sentinel());
        assert_eq!(Digest::empty_sentinel(), digest(b"empty"));
    }
}
