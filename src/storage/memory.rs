//! In-memory Stream Store
//!
//! Deterministic backend for tests and embedded use. Also exposes raw
//! access for fault injection (tampering, outages) that bypasses the ledger.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, RwLock};
use tracing::debug;

use super::{InsertOutcome, StoreError, StreamStore};
use crate::ledger::record::{ChainTail, Record};
use crate::ledger::stream::StreamId;

#[derive(Debug, Default)]
struct MemoryStream {
    records: Vec<Record>,
    tail: Option<ChainTail>,
}

#[derive(Debug, Default, Clone)]
pub struct MemoryStore {
    streams: Arc<RwLock<HashMap<StreamId, MemoryStream>>>,
    failing_inserts: Arc<AtomicU32>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mutate stored records directly, as an attacker with storage access
    /// would. The tail pointer is left untouched.
    pub fn tamper<F>(&self, stream: &StreamId, f: F)
    where
        F: FnOnce(&mut Vec<Record>),
    {
        let mut streams = self.streams.write().unwrap_or_else(|e| e.into_inner());
        let entry = streams.entry(stream.clone()).or_default();
        f(&mut entry.records);
    }

    /// Overwrite the tail pointer directly.
    pub fn set_tail(&self, stream: &StreamId, tail: Option<ChainTail>) {
        let mut streams = self.streams.write().unwrap_or_else(|e| e.into_inner());
        streams.entry(stream.clone()).or_default().tail = tail;
    }

    /// Make the next `count` conditional writes fail as if storage were down.
    pub fn fail_next_inserts(&self, count: u32) {
        self.failing_inserts.store(count, Ordering::SeqCst);
    }

    pub fn record_count(&self, stream: &StreamId) -> usize {
        self.streams
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(stream)
            .map(|s| s.records.len())
            .unwrap_or(0)
    }

    fn take_injected_failure(&self) -> bool {
        self.failing_inserts
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

impl StreamStore for MemoryStore {
    async fn tail(&self, stream: &StreamId) -> Result<Option<ChainTail>, StoreError> {
        let streams = self.streams.read().unwrap_or_else(|e| e.into_inner());
        Ok(streams.get(stream).and_then(|s| s.tail))
    }

    async fn insert_if_tail(
        &self,
        record: &Record,
        expected: Option<&ChainTail>,
    ) -> Result<InsertOutcome, StoreError> {
        if self.take_injected_failure() {
            return Err(StoreError::Unavailable("injected storage failure".to_string()));
        }

        let mut streams = self.streams.write().unwrap_or_else(|e| e.into_inner());
        let stream = streams.entry(record.stream_id.clone()).or_default();

        if stream.tail.as_ref() != expected {
            debug!("Tail moved for stream '{}', rejecting write", record.stream_id);
            return Ok(InsertOutcome::Conflict);
        }
        let taken = stream.records.iter().any(|r| {
            r.sequence == record.sequence
                || (record.idempotency_key.is_some() && r.idempotency_key == record.idempotency_key)
        });
        if taken {
            return Ok(InsertOutcome::Conflict);
        }

        stream.records.push(record.clone());
        stream.tail = Some(record.tail());
        Ok(InsertOutcome::Inserted)
    }

    async fn find_by_idempotency_key(
        &self,
        stream: &StreamId,
        key: &str,
    ) -> Result<Option<Record>, StoreError> {
        let streams = self.streams.read().unwrap_or_else(|e| e.into_inner());
        Ok(streams.get(stream).and_then(|s| {
            s.records
                .iter()
                .find(|r| r.idempotency_key.as_deref() == Some(key))
                .cloned()
        }))
    }

    async fn range(&self, stream: &StreamId, from: u64, to: u64) -> Result<Vec<Record>, StoreError> {
        let streams = self.streams.read().unwrap_or_else(|e| e.into_inner());
        let mut records: Vec<Record> = streams
            .get(stream)
            .map(|s| {
                s.records
                    .iter()
                    .filter(|r| r.sequence >= from && r.sequence < to)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        // Stable: duplicates keep insertion order
        records.sort_by_key(|r| r.sequence);
        Ok(records)
    }

    async fn last_sequence(&self, stream: &StreamId) -> Result<Option<u64>, StoreError> {
        let streams = self.streams.read().unwrap_or_else(|e| e.into_inner());
        Ok(streams
            .get(stream)
            .and_then(|s| s.records.iter().map(|r| r.sequence).max()))
    }

    async fn streams(&self) -> Result<Vec<StreamId>, StoreError> {
        let streams = self.streams.read().unwrap_or_else(|e| e.into_inner());
        let mut ids: Vec<StreamId> = streams
            .iter()
            .filter(|(_, s)| s.tail.is_some() || !s.records.is_empty())
            .map(|(id, _)| id.clone())
            .collect();
        ids.sort();
        Ok(ids)
    }
}
