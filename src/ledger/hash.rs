//! Chain Hash
//!
//! Fixed-width SHA-256 digests linking each record to its predecessor.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};
use std::fmt;
use std::str::FromStr;

const PREFIX: &str = "sha256:";

/// A SHA-256 digest, rendered as `sha256:<64 hex chars>`.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChainHash([u8; 32]);

impl ChainHash {
    /// `previous_hash` of every stream's first record.
    pub const GENESIS: ChainHash = ChainHash([0u8; 32]);

    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn is_genesis(&self) -> bool {
        *self == Self::GENESIS
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

/// Hash arbitrary bytes.
pub fn digest(bytes: &[u8]) -> ChainHash {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    ChainHash(hasher.finalize().into())
}

/// `digest(canonical || previous)`, the record hash.
pub fn link(canonical: &[u8], previous: &ChainHash) -> ChainHash {
    let mut hasher = Sha256::new();
    hasher.update(canonical);
    hasher.update(previous.0);
    ChainHash(hasher.finalize().into())
}

impl fmt::Display for ChainHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", PREFIX, self.to_hex())
    }
}

impl fmt::Debug for ChainHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ChainHash({})", self)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseHashError(String);

impl fmt::Display for ParseHashError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid chain hash: {}", self.0)
    }
}

impl std::error::Error for ParseHashError {}

impl FromStr for ChainHash {
    type Err = ParseHashError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let hex_part = s
            .strip_prefix(PREFIX)
            .ok_or_else(|| ParseHashError(format!("missing '{}' prefix in '{}'", PREFIX, s)))?;
        let bytes = hex::decode(hex_part).map_err(|e| ParseHashError(e.to_string()))?;
        let array: [u8; 32] = bytes
            .try_into()
            .map_err(|v: Vec<u8>| ParseHashError(format!("expected 32 bytes, got {}", v.len())))?;
        Ok(Self(array))
    }
}

impl Serialize for ChainHash {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for ChainHash {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}
