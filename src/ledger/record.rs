//! Ledger Record
//!
//! One immutable, hash-linked entry of a stream.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ledger::canonical;
use crate::ledger::hash::{self, ChainHash};
use crate::ledger::payload::Payload;
use crate::ledger::stream::StreamId;

/// A chained record as persisted by a store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub stream_id: StreamId,
    pub sequence: u64,
    pub payload: Payload,
    /// Informational only; never used for ordering or hashing.
    pub created_at: DateTime<Utc>,
    pub previous_hash: ChainHash,
    pub record_hash: ChainHash,
    /// Caller supplied deduplication key, outside the integrity guarantee.
    pub idempotency_key: Option<String>,
}

/// Head of a stream: the last sequence and its record hash.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainTail {
    pub sequence: u64,
    pub hash: ChainHash,
}

impl ChainTail {
    /// Sequence and previous hash for the record following `tail`.
    pub fn successor(tail: Option<&ChainTail>) -> (u64, ChainHash) {
        match tail {
            Some(t) => (t.sequence + 1, t.hash),
            None => (0, ChainHash::GENESIS),
        }
    }
}

/// Record hash for the given content at the given position.
pub fn compute_hash(
    payload: &Payload,
    stream_id: &StreamId,
    sequence: u64,
    previous_hash: &ChainHash,
) -> ChainHash {
    hash::link(&canonical::encode(payload, stream_id, sequence), previous_hash)
}

impl Record {
    /// Build the record that extends `tail`.
    pub fn chained(
        stream_id: StreamId,
        payload: Payload,
        tail: Option<&ChainTail>,
        idempotency_key: Option<String>,
    ) -> Self {
        let (sequence, previous_hash) = ChainTail::successor(tail);
        let record_hash = compute_hash(&payload, &stream_id, sequence, &previous_hash);
        Self {
            stream_id,
            sequence,
            payload,
            created_at: Utc::now(),
            previous_hash,
            record_hash,
            idempotency_key,
        }
    }

    /// Hash this record's content against a given predecessor hash.
    pub fn expected_hash(&self, previous_hash: &ChainHash) -> ChainHash {
        compute_hash(&self.payload, &self.stream_id, self.sequence, previous_hash)
    }

    /// Self-consistency against its own stored `previous_hash`.
    pub fn verify_hash(&self) -> bool {
        self.record_hash == self.expected_hash(&self.previous_hash)
    }

    pub fn tail(&self) -> ChainTail {
        ChainTail {
            sequence: self.sequence,
            hash: self.record_hash,
        }
    }

    /// Get a human-readable summary
    pub fn summary(&self) -> String {
        format!("{}#{} ({})", self.stream_id, self.sequence, self.record_hash)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn payload(action: &str) -> Payload {
        Payload::from_json(&json!({ "action": action })).unwrap()
    }

    #[test]
    fn test_first_record_links_to_genesis() {
        let stream = StreamId::new("governance").unwrap();
        let record = Record::chained(stream, payload("approve"), None, None);
        assert_eq!(record.sequence, 0);
        assert!(record.previous_hash.is_genesis());
        assert!(record.verify_hash());
    }

    #[test]
    fn test_successor_links_to_tail() {
        let stream = StreamId::new("governance").unwrap();
        let first = Record::chained(stream.clone(), payload("approve"), None, None);
        let second = Record::chained(stream, payload("reject"), Some(&first.tail()), None);
        assert_eq!(second.sequence, 1);
        assert_eq!(second.previous_hash, first.record_hash);
        assert!(second.verify_hash());
    }

    #[test]
    fn test_hash_ignores_informational_fields() {
        let stream = StreamId::new("governance").unwrap();
        let mut record = Record::chained(stream, payload("approve"), None, Some("req-1".into()));
        record.created_at = record.created_at - chrono::Duration::days(30);
        record.idempotency_key = None;
        assert!(record.verify_hash());
    }

    #[test]
    fn test_payload_edit_breaks_self_consistency() {
        let stream = StreamId::new("governance").unwrap();
        let mut record = Record::chained(stream, payload("approve"), None, None);
        record.payload = payload("APPROVE");
        assert!(!record.verify_hash());
    }

    #[test]
    fn test_record_storage_form() {
        let stream = StreamId::new("governance").unwrap();
        let record = Record::chained(stream, payload("approve"), None, None);
        let json = serde_json::to_string(&record).unwrap();
        assert!(json.contains("\"stream_id\":\"governance\""));
        let restored: Record = serde_json::from_str(&json).unwrap();
        assert_eq!(restored, record);
    }
}
