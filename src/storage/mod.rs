//! Stream Storage
//!
//! The ledger is a logical layer over any ordered store that can perform a
//! conditional write: persist a record and advance the stream tail, but only
//! if the tail is still the one the writer read.

pub mod memory;
pub mod sqlite;

use std::future::Future;
use thiserror::Error;

use crate::ledger::record::{ChainTail, Record};
use crate::ledger::stream::StreamId;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

#[derive(Debug, Error)]
pub enum StoreError {
    /// Transient failure; the operation may be retried.
    #[error("storage unavailable: {0}")]
    Unavailable(String),

    /// Stored data could not be decoded. Carries the sequence when known.
    #[error("corrupt record in stream '{stream}' at sequence {sequence:?}: {reason}")]
    Corrupt {
        stream: String,
        sequence: Option<u64>,
        reason: String,
    },
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        Self::Unavailable(err.to_string())
    }
}

/// Result of a conditional write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    Inserted,
    /// The tail moved, or the sequence or idempotency key is already taken.
    /// Nothing was written.
    Conflict,
}

/// Ordered storage for chained records.
///
/// Implementations must write the record and advance the tail atomically,
/// record first; a tail must never reference an unpersisted record.
pub trait StreamStore: Send + Sync + 'static {
    /// Current head of `stream`, `None` for a stream with no records.
    fn tail(
        &self,
        stream: &StreamId,
    ) -> impl Future<Output = Result<Option<ChainTail>, StoreError>> + Send;

    /// Persist `record` and advance the tail to it if the tail still equals
    /// `expected`.
    fn insert_if_tail(
        &self,
        record: &Record,
        expected: Option<&ChainTail>,
    ) -> impl Future<Output = Result<InsertOutcome, StoreError>> + Send;

    fn find_by_idempotency_key(
        &self,
        stream: &StreamId,
        key: &str,
    ) -> impl Future<Output = Result<Option<Record>, StoreError>> + Send;

    /// Records with `from <= sequence < to`, ascending by sequence.
    /// Duplicated sequences, if storage was tampered with, are all returned.
    fn range(
        &self,
        stream: &StreamId,
        from: u64,
        to: u64,
    ) -> impl Future<Output = Result<Vec<Record>, StoreError>> + Send;

    /// Highest stored sequence, independent of the tail pointer.
    fn last_sequence(
        &self,
        stream: &StreamId,
    ) -> impl Future<Output = Result<Option<u64>, StoreError>> + Send;

    /// Every stream with at least one record or tail entry.
    fn streams(&self) -> impl Future<Output = Result<Vec<StreamId>, StoreError>> + Send;
}
