//! Ledger Writer
//!
//! Serializes appends per stream so a chain never forks. Within a process a
//! per-stream async mutex admits one append at a time; across processes the
//! store's conditional write rejects any append whose tail went stale, and
//! the whole read-compute-write cycle is retried.
//!
//! Idempotency: an append carrying an idempotency key that already exists
//! in the stream returns the stored record instead of writing a new one.
//! Appends without a key always produce a new record.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, warn};

use crate::config::WriterConfig;
use crate::error::LedgerError;
use crate::ledger::canonical;
use crate::ledger::payload::Payload;
use crate::ledger::record::Record;
use crate::ledger::stream::StreamId;
use crate::storage::{InsertOutcome, StoreError, StreamStore};

enum Attempt {
    Appended(Record),
    Deduplicated(Record),
    Conflict,
}

#[derive(Debug)]
pub struct LedgerWriter {
    locks: Mutex<HashMap<StreamId, Arc<AsyncMutex<()>>>>,
    config: WriterConfig,
}

impl LedgerWriter {
    pub fn new(config: WriterConfig) -> Self {
        Self {
            locks: Mutex::new(HashMap::new()),
            config,
        }
    }

    fn lock_for(&self, stream: &StreamId) -> Arc<AsyncMutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        locks.entry(stream.clone()).or_default().clone()
    }

    /// Append `payload` to `stream`. Once this returns `Ok`, the record's
    /// position is final.
    pub async fn append<S: StreamStore>(
        &self,
        store: &S,
        stream: &StreamId,
        payload: Payload,
        idempotency_key: Option<&str>,
    ) -> Result<Record, LedgerError> {
        let lock = self.lock_for(stream);
        let timeout = Duration::from_millis(self.config.lock_timeout_ms);
        // Dropped on every exit path, including cancellation of this future
        let _guard = tokio::time::timeout(timeout, lock.lock_owned())
            .await
            .map_err(|_| LedgerError::lock_timeout(stream.as_str(), self.config.lock_timeout_ms))?;

        let max_attempts = self.config.max_attempts.max(1);
        let mut last_failure = String::new();

        for attempt in 1..=max_attempts {
            match self.try_append(store, stream, &payload, idempotency_key).await {
                Ok(Attempt::Appended(record)) => {
                    debug!("Appended {}", record.summary());
                    return Ok(record);
                }
                Ok(Attempt::Deduplicated(record)) => {
                    debug!(
                        "Idempotent replay on stream '{}' resolved to sequence {}",
                        stream, record.sequence
                    );
                    return Ok(record);
                }
                Ok(Attempt::Conflict) => {
                    last_failure = "tail moved during append".to_string();
                    warn!(
                        "Append conflict on stream '{}' (attempt {}/{})",
                        stream, attempt, max_attempts
                    );
                }
                Err(AttemptError::Rejected(e)) => return Err(e),
                Err(AttemptError::Storage(e)) => {
                    last_failure = e.to_string();
                    warn!(
                        "Storage failure appending to stream '{}' (attempt {}/{}): {}",
                        stream, attempt, max_attempts, e
                    );
                }
            }

            if attempt < max_attempts {
                let backoff = self.config.retry_backoff_ms.saturating_mul(u64::from(attempt));
                tokio::time::sleep(Duration::from_millis(backoff)).await;
            }
        }

        Err(LedgerError::retries_exhausted(
            stream.as_str(),
            max_attempts,
            &last_failure,
        ))
    }

    /// One read-compute-write cycle. Re-reads everything it depends on.
    async fn try_append<S: StreamStore>(
        &self,
        store: &S,
        stream: &StreamId,
        payload: &Payload,
        idempotency_key: Option<&str>,
    ) -> Result<Attempt, AttemptError> {
        if let Some(key) = idempotency_key {
            if let Some(existing) = store.find_by_idempotency_key(stream, key).await? {
                let same = canonical::encode(&existing.payload, stream, existing.sequence)
                    == canonical::encode(payload, stream, existing.sequence);
                if !same {
                    return Err(AttemptError::Rejected(LedgerError::idempotency_conflict(
                        stream.as_str(),
                        key,
                        existing.sequence,
                    )));
                }
                return Ok(Attempt::Deduplicated(existing));
            }
        }

        let tail = store.tail(stream).await?;
        let record = Record::chained(
            stream.clone(),
            payload.clone(),
            tail.as_ref(),
            idempotency_key.map(str::to_string),
        );

        match store.insert_if_tail(&record, tail.as_ref()).await? {
            InsertOutcome::Inserted => Ok(Attempt::Appended(record)),
            InsertOutcome::Conflict => Ok(Attempt::Conflict),
        }
    }
}

enum AttemptError {
    /// Not retryable; surfaced as-is.
    Rejected(LedgerError),
    Storage(StoreError),
}

impl From<StoreError> for AttemptError {
    fn from(err: StoreError) -> Self {
        Self::Storage(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStore;
    use serde_json::json;

    fn writer() -> LedgerWriter {
        LedgerWriter::new(WriterConfig {
            lock_timeout_ms: 200,
            max_attempts: 3,
            retry_backoff_ms: 1,
        })
    }

    fn payload(action: &str) -> Payload {
        Payload::from_json(&json!({ "action": action })).unwrap()
    }

    #[tokio::test]
    async fn test_sequences_are_contiguous() {
        let store = MemoryStore::new();
        let stream = StreamId::new("admin-log").unwrap();
        let writer = writer();
        for expected in 0..5u64 {
            let record = writer.append(&store, &stream, payload("grant"), None).await.unwrap();
            assert_eq!(record.sequence, expected);
        }
    }

    #[tokio::test]
    async fn test_duplicate_without_key_creates_two_records() {
        let store = MemoryStore::new();
        let stream = StreamId::new("admin-log").unwrap();
        let writer = writer();
        let a = writer.append(&store, &stream, payload("grant"), None).await.unwrap();
        let b = writer.append(&store, &stream, payload("grant"), None).await.unwrap();
        assert_ne!(a.sequence, b.sequence);
        assert_ne!(a.record_hash, b.record_hash);
    }

    #[tokio::test]
    async fn test_idempotent_replay_returns_original() {
        let store = MemoryStore::new();
        let stream = StreamId::new("admin-log").unwrap();
        let writer = writer();
        let first = writer
            .append(&store, &stream, payload("grant"), Some("req-7"))
            .await
            .unwrap();
        let replay = writer
            .append(&store, &stream, payload("grant"), Some("req-7"))
            .await
            .unwrap();
        assert_eq!(first, replay);
        assert_eq!(store.record_count(&stream), 1);
    }

    #[tokio::test]
    async fn test_idempotency_key_reuse_with_other_payload_is_rejected() {
        let store = MemoryStore::new();
        let stream = StreamId::new("admin-log").unwrap();
        let writer = writer();
        writer
            .append(&store, &stream, payload("grant"), Some("req-7"))
            .await
            .unwrap();
        let err = writer
            .append(&store, &stream, payload("revoke"), Some("req-7"))
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::ValidationError(_)));
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn test_transient_failures_are_retried() {
        let store = MemoryStore::new();
        let stream = StreamId::new("admin-log").unwrap();
        store.fail_next_inserts(2);
        let record = writer().append(&store, &stream, payload("grant"), None).await.unwrap();
        assert_eq!(record.sequence, 0);
        assert_eq!(store.record_count(&stream), 1);
    }

    #[tokio::test]
    async fn test_exhausted_retries_report_writer_unavailable() {
        let store = MemoryStore::new();
        let stream = StreamId::new("admin-log").unwrap();
        store.fail_next_inserts(10);
        let err = writer()
            .append(&store, &stream, payload("grant"), None)
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::WriterUnavailable(_)));
        assert!(err.is_retryable());
        assert_eq!(store.record_count(&stream), 0);
    }

    #[tokio::test]
    async fn test_lock_timeout_reports_writer_unavailable() {
        let store = MemoryStore::new();
        let stream = StreamId::new("admin-log").unwrap();
        let writer = writer();

        let held = writer.lock_for(&stream);
        let _guard = held.lock().await;

        let err = writer
            .append(&store, &stream, payload("grant"), None)
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::WriterUnavailable(_)));
        assert!(store.tail(&stream).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_other_streams_are_not_blocked() {
        let store = MemoryStore::new();
        let writer = writer();
        let busy = StreamId::new("admin-log").unwrap();
        let free = StreamId::new("quality-runs").unwrap();

        let held = writer.lock_for(&busy);
        let _guard = held.lock().await;

        let record = writer.append(&store, &free, payload("run"), None).await.unwrap();
        assert_eq!(record.sequence, 0);
    }

    #[tokio::test]
    async fn test_append_follows_foreign_tail() {
        let store = MemoryStore::new();
        let stream = StreamId::new("admin-log").unwrap();
        let writer = writer();
        writer.append(&store, &stream, payload("grant"), None).await.unwrap();

        // Another process advances the tail behind this writer's back
        let tail = store.tail(&stream).await.unwrap();
        let foreign = Record::chained(stream.clone(), payload("foreign"), tail.as_ref(), None);
        store.insert_if_tail(&foreign, tail.as_ref()).await.unwrap();

        let record = writer.append(&store, &stream, payload("grant"), None).await.unwrap();
        assert_eq!(record.sequence, 2);
        assert_eq!(record.previous_hash, foreign.record_hash);
    }
}
