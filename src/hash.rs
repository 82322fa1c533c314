//! RFC 6962 domain-separated leaf/node hashing.
//!
//! This module is deliberately pure: no I/O, no async, nothing but byte
//! plumbing around SHA-256. Every other module that needs a hash goes
//! through here so the domain separation tags never drift apart.

use std::fmt;

use serde::{de::Error as _, Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};

const LEAF_HASH_PREFIX: u8 = 0x00;
const NODE_HASH_PREFIX: u8 = 0x01;

/// A 32-byte SHA-256 digest, either a leaf hash or an internal node hash.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct NodeHash([u8; 32]);

impl NodeHash {
    pub const LEN: usize = 32;

    #[must_use]
    pub const fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn from_slice(bytes: &[u8]) -> Option<Self> {
        let arr: [u8; 32] = bytes.try_into().ok()?;
        Some(Self(arr))
    }
}

impl fmt::Debug for NodeHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NodeHash({})", hex::encode(self.0))
    }
}

impl fmt::Display for NodeHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

impl AsRef<[u8]> for NodeHash {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl Serialize for NodeHash {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        if serializer.is_human_readable() {
            hex::encode(self.0).serialize(serializer)
        } else {
            self.0.serialize(serializer)
        }
    }
}

impl<'de> Deserialize<'de> for NodeHash {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        if deserializer.is_human_readable() {
            let s = String::deserialize(deserializer)?;
            let mut out = [0_u8; 32];
            hex::decode_to_slice(s.trim_start_matches("0x"), &mut out)
                .map_err(|e| D::Error::custom(format!("invalid hex hash: {e}")))?;
            Ok(Self(out))
        } else {
            let bytes = <[u8; 32]>::deserialize(deserializer)?;
            Ok(Self(bytes))
        }
    }
}

/// Hash of an empty tree, per RFC 6962: `SHA256()`.
pub fn empty_root() -> NodeHash {
    NodeHash(Sha256::digest([]).into())
}

/// `leaf_hash = H(0x00 || entry)`.
pub fn leaf_hash(entry: &[u8]) -> NodeHash {
    let mut hasher = Sha256::new();
    hasher.update([LEAF_HASH_PREFIX]);
    hasher.update(entry);
    NodeHash(hasher.finalize().into())
}

/// `node_hash = H(0x01 || left || right)`.
pub fn node_hash(left: &NodeHash, right: &NodeHash) -> NodeHash {
    let mut hasher = Sha256::new();
    hasher.update([NODE_HASH_PREFIX]);
    hasher.update(left.0);
    hasher.update(right.0);
    NodeHash(hasher.finalize().into())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_root_matches_rfc6962_constant() {
        // base64("47DEQpj8HBSa-_TImW-5JCeuQeRkm5NMpJWZG3hSuFU")
        let expected =
            hex::decode("e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b85")
                .unwrap();
        assert_eq!(empty_root().as_bytes().as_slice(), expected.as_slice());
    }

    #[test]
    fn single_leaf_root_is_leaf_hash() {
        let h = leaf_hash(b"hello");
        assert_eq!(h.as_bytes().len(), 32);
        // Domain separation: leaf hash must not equal a bare sha256.
        let bare: [u8; 32] = Sha256::digest(b"hello").into();
        assert_ne!(h.as_bytes(), &bare);
    }

    #[test]
    fn two_leaf_root_matches_manual_composition() {
        let a = leaf_hash(b"a");
        let b = leaf_hash(b"b");
        let root = node_hash(&a, &b);

        let mut hasher = Sha256::new();
        hasher.update([0x01]);
        hasher.update(a.as_bytes());
        hasher.update(b.as_bytes());
        let expected: [u8; 32] = hasher.finalize().into();
        assert_eq!(root.as_bytes(), &expected);
    }

    #[test]
    fn hex_roundtrip() {
        let h = leaf_hash(b"roundtrip");
        let s = serde_json::to_string(&h).unwrap();
        let back: NodeHash = serde_json::from_str(&s).unwrap();
        assert_eq!(h, back);
    }
}
