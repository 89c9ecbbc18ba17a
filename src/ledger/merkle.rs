//! Merkle Roots over Record Hashes
//!
//! Compresses a verified stream prefix into one hash that can be anchored
//! outside the store. Leaves are record hashes in sequence order; an odd
//! node at any level is paired with itself.

use sha2::{Digest, Sha256};

use crate::ledger::hash::ChainHash;

fn parent(left: &ChainHash, right: &ChainHash) -> ChainHash {
    let mut hasher = Sha256::new();
    hasher.update(left.as_bytes());
    hasher.update(right.as_bytes());
    ChainHash::from_bytes(hasher.finalize().into())
}

/// Root over `leaves`, or `None` when there are none.
pub fn merkle_root(leaves: &[ChainHash]) -> Option<ChainHash> {
    if leaves.is_empty() {
        return None;
    }

    let mut level: Vec<ChainHash> = leaves.to_vec();
    while level.len() > 1 {
        level = level
            .chunks(2)
            .map(|pair| match pair {
                [left, right] => parent(left, right),
                [single] => parent(single, single),
                _ => unreachable!("chunks(2) yields one or two items"),
            })
            .collect();
    }
    level.first().copied()
}

/// Check `leaves` against an expected root.
pub fn verify_merkle_root(leaves: &[ChainHash], expected: &ChainHash) -> bool {
    merkle_root(leaves).as_ref() == Some(expected)
}
