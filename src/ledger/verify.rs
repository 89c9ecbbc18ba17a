//! Chain Verification
//!
//! Read-only linear scan of a stream that recomputes every record hash from
//! stored content and localizes the first divergence. The scan covers the
//! records up to the tail observed when it starts: records appended while it
//! runs lie past that snapshot and are not examined.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info};

use crate::error::LedgerError;
use crate::ledger::hash::ChainHash;
use crate::ledger::merkle;
use crate::ledger::record::{compute_hash, ChainTail, Record};
use crate::ledger::stream::StreamId;
use crate::storage::{StoreError, StreamStore};

/// The two severities a break is escalated under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Finding {
    ChainBroken,
    SequenceGap,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BreakKind {
    /// Content changed; the link to the prior record still matches.
    PayloadMismatch,
    /// Stored `previous_hash` differs from the prior record's hash:
    /// reordering, insertion or deletion of history.
    ChainLinkMismatch,
    SequenceGap,
    DuplicateSequence,
    /// History ends before the tail pointer.
    Truncated,
    /// Tail pointer missing or not matching the last record.
    TailMismatch,
    /// Stored row could not be decoded.
    Unreadable,
    /// Record claims to belong to a different stream.
    StreamMismatch,
    /// Prefix no longer matches a previously taken checkpoint.
    CheckpointMismatch,
}

impl BreakKind {
    pub fn finding(&self) -> Finding {
        match self {
            BreakKind::SequenceGap | BreakKind::DuplicateSequence | BreakKind::Truncated => {
                Finding::SequenceGap
            }
            _ => Finding::ChainBroken,
        }
    }
}

/// One integrity violation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainBreak {
    pub sequence: u64,
    pub kind: BreakKind,
    pub message: String,
}

impl ChainBreak {
    fn new(sequence: u64, kind: BreakKind, message: String) -> Self {
        Self {
            sequence,
            kind,
            message,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerificationReport {
    pub stream_id: StreamId,
    pub is_valid: bool,
    pub broken_at: Option<u64>,
    pub message: String,
    pub kind: Option<BreakKind>,
    pub records_checked: u64,
    /// Tail snapshot the scan was bounded by.
    pub head: Option<ChainTail>,
    pub verified_at: DateTime<Utc>,
}

impl VerificationReport {
    fn from_scan(stream: &StreamId, scan: &Scan) -> Self {
        match scan.breaks.first() {
            Some(b) => Self {
                stream_id: stream.clone(),
                is_valid: false,
                broken_at: Some(b.sequence),
                message: b.message.clone(),
                kind: Some(b.kind),
                records_checked: scan.records_checked,
                head: scan.snapshot,
                verified_at: Utc::now(),
            },
            None => Self {
                stream_id: stream.clone(),
                is_valid: true,
                broken_at: None,
                message: format!("chain intact ({} records)", scan.records_checked),
                kind: None,
                records_checked: scan.records_checked,
                head: scan.snapshot,
                verified_at: Utc::now(),
            },
        }
    }

    pub fn finding(&self) -> Option<Finding> {
        self.kind.map(|k| k.finding())
    }

    /// Get a human-readable summary
    pub fn summary(&self) -> String {
        if self.is_valid {
            format!("✅ {}: {}", self.stream_id, self.message)
        } else {
            format!("❌ {}: {}", self.stream_id, self.message)
        }
    }
}

/// Snapshot of a verified prefix, suitable for anchoring outside the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub stream_id: StreamId,
    pub sequence: u64,
    pub head_hash: ChainHash,
    pub merkle_root: ChainHash,
    pub taken_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct Scan {
    breaks: Vec<ChainBreak>,
    records_checked: u64,
    snapshot: Option<ChainTail>,
    /// Hash of the last record examined.
    running: Option<ChainHash>,
    /// Record hashes in order, when requested.
    hashes: Vec<ChainHash>,
}

struct ScanState<'a> {
    stream: &'a StreamId,
    exhaustive: bool,
    collect_hashes: bool,
    next_sequence: u64,
    previous: ChainHash,
    scan: Scan,
}

impl<'a> ScanState<'a> {
    fn new(stream: &'a StreamId, exhaustive: bool, collect_hashes: bool) -> Self {
        Self {
            stream,
            exhaustive,
            collect_hashes,
            next_sequence: 0,
            previous: ChainHash::GENESIS,
            scan: Scan::default(),
        }
    }

    fn stopped(&self) -> bool {
        !self.exhaustive && !self.scan.breaks.is_empty()
    }

    fn report(&mut self, sequence: u64, kind: BreakKind, message: String) {
        debug!("Break in stream '{}': {}", self.stream, message);
        self.scan.breaks.push(ChainBreak::new(sequence, kind, message));
    }

    /// Check one record. Returns false once the scan must stop.
    fn visit(&mut self, record: &Record) -> bool {
        if record.sequence < self.next_sequence {
            self.report(
                record.sequence,
                BreakKind::DuplicateSequence,
                format!("duplicate sequence {}", record.sequence),
            );
            return !self.stopped();
        }

        if record.sequence > self.next_sequence {
            self.report(
                self.next_sequence,
                BreakKind::SequenceGap,
                format!(
                    "sequence gap at sequence {}: next stored record is {}",
                    self.next_sequence, record.sequence
                ),
            );
            if self.stopped() {
                return false;
            }
            // Re-anchor past the hole
            self.next_sequence = record.sequence;
            self.previous = record.previous_hash;
        }

        let sequence = record.sequence;
        let link_ok = record.previous_hash == self.previous;
        let expected = compute_hash(&record.payload, self.stream, sequence, &self.previous);

        if record.stream_id != *self.stream {
            self.report(
                sequence,
                BreakKind::StreamMismatch,
                format!(
                    "stream mismatch at sequence {}: record claims stream '{}'",
                    sequence, record.stream_id
                ),
            );
        } else if !link_ok {
            let predecessor = if self.previous.is_genesis() {
                "genesis".to_string()
            } else {
                self.previous.to_string()
            };
            let content = if record.verify_hash() {
                "record is self-consistent"
            } else {
                "record content also altered"
            };
            self.report(
                sequence,
                BreakKind::ChainLinkMismatch,
                format!(
                    "chain link mismatch at sequence {}: stored previous_hash {} does not match {} ({})",
                    sequence, record.previous_hash, predecessor, content
                ),
            );
        } else if expected != record.record_hash {
            self.report(
                sequence,
                BreakKind::PayloadMismatch,
                format!("payload hash mismatch at sequence {}", sequence),
            );
        }
        if self.stopped() {
            return false;
        }

        self.previous = record.record_hash;
        self.next_sequence = sequence + 1;
        self.scan.records_checked += 1;
        self.scan.running = Some(record.record_hash);
        if self.collect_hashes {
            self.scan.hashes.push(record.record_hash);
        }
        true
    }

    fn finish(self) -> Scan {
        self.scan
    }
}

/// Linear-scan verifier. Holds no locks and never writes.
#[derive(Debug, Clone)]
pub struct ChainVerifier {
    page_size: u64,
}

impl ChainVerifier {
    pub fn new(page_size: u64) -> Self {
        Self {
            page_size: page_size.max(1),
        }
    }

    pub fn page_size(&self) -> u64 {
        self.page_size
    }

    /// Verify a stream, stopping at the first break.
    pub async fn verify<S: StreamStore>(
        &self,
        store: &S,
        stream: &StreamId,
    ) -> Result<VerificationReport, LedgerError> {
        let scan = self.scan(store, stream, None, false, false).await?;
        let report = VerificationReport::from_scan(stream, &scan);
        if report.is_valid {
            info!("Stream '{}' verified: {}", stream, report.message);
        } else {
            error!(
                "Stream '{}' failed verification at sequence {:?}: {}",
                stream, report.broken_at, report.message
            );
        }
        Ok(report)
    }

    /// Every independent break in a stream. After each break the scan
    /// re-anchors on the stored hashes and keeps going.
    pub async fn survey<S: StreamStore>(
        &self,
        store: &S,
        stream: &StreamId,
    ) -> Result<Vec<ChainBreak>, LedgerError> {
        let scan = self.scan(store, stream, None, true, false).await?;
        if !scan.breaks.is_empty() {
            error!("Stream '{}' has {} breaks", stream, scan.breaks.len());
        }
        Ok(scan.breaks)
    }

    /// Verify the whole stream and snapshot it for external anchoring.
    pub async fn checkpoint<S: StreamStore>(
        &self,
        store: &S,
        stream: &StreamId,
    ) -> Result<Checkpoint, LedgerError> {
        let scan = self.scan(store, stream, None, false, true).await?;
        if let Some(b) = scan.breaks.first() {
            return Err(LedgerError::ValidationError(format!(
                "cannot checkpoint stream '{}': {}",
                stream, b.message
            )));
        }
        let (head, root) = match (scan.snapshot, merkle::merkle_root(&scan.hashes)) {
            (Some(head), Some(root)) => (head, root),
            _ => {
                return Err(LedgerError::ValidationError(format!(
                    "cannot checkpoint empty stream '{}'",
                    stream
                )))
            }
        };
        info!("Checkpointed stream '{}' at sequence {}", stream, head.sequence);
        Ok(Checkpoint {
            stream_id: stream.clone(),
            sequence: head.sequence,
            head_hash: head.hash,
            merkle_root: root,
            taken_at: Utc::now(),
        })
    }

    /// Re-verify the prefix covered by `checkpoint`.
    pub async fn verify_checkpoint<S: StreamStore>(
        &self,
        store: &S,
        checkpoint: &Checkpoint,
    ) -> Result<VerificationReport, LedgerError> {
        let stream = &checkpoint.stream_id;
        let mut scan = self
            .scan(store, stream, Some(checkpoint.sequence), false, true)
            .await?;

        if scan.breaks.is_empty() {
            let head_ok = scan.running == Some(checkpoint.head_hash);
            let root_ok = merkle::verify_merkle_root(&scan.hashes, &checkpoint.merkle_root);
            if !head_ok || !root_ok {
                scan.breaks.push(ChainBreak::new(
                    checkpoint.sequence,
                    BreakKind::CheckpointMismatch,
                    format!(
                        "checkpoint mismatch at sequence {}: history no longer matches head {}",
                        checkpoint.sequence, checkpoint.head_hash
                    ),
                ));
            }
        }

        let report = VerificationReport::from_scan(stream, &scan);
        if !report.is_valid {
            error!("Checkpoint of stream '{}' failed: {}", stream, report.message);
        }
        Ok(report)
    }

    async fn scan<S: StreamStore>(
        &self,
        store: &S,
        stream: &StreamId,
        upto: Option<u64>,
        exhaustive: bool,
        collect_hashes: bool,
    ) -> Result<Scan, LedgerError> {
        let snapshot = store.tail(stream).await?;
        let mut state = ScanState::new(stream, exhaustive, collect_hashes);

        let end = match (upto, snapshot) {
            (Some(seq), _) => seq.saturating_add(1),
            (None, Some(tail)) => tail.sequence.saturating_add(1),
            // No tail: bound the scan by what is actually stored
            (None, None) => match store.last_sequence(stream).await? {
                Some(last) => last.saturating_add(1),
                None => return Ok(state.finish()),
            },
        };

        let mut from = 0u64;
        'pages: while from < end {
            let to = from.saturating_add(self.page_size).min(end);
            let Some(page) = self.read_page(store, stream, from, to, &mut state).await? else {
                break 'pages;
            };
            for record in &page {
                if !state.visit(record) {
                    break 'pages;
                }
            }
            from = to;
        }

        if !state.stopped() && state.scan.breaks.iter().all(|b| b.kind != BreakKind::Unreadable) {
            if state.next_sequence < end {
                let target = end - 1;
                state.report(
                    state.next_sequence,
                    BreakKind::Truncated,
                    format!(
                        "history ends at sequence {} but the chain extends to {}",
                        state.next_sequence, target
                    ),
                );
            } else if upto.is_none() {
                match snapshot {
                    Some(tail) if state.scan.running != Some(tail.hash) => {
                        state.report(
                            tail.sequence,
                            BreakKind::TailMismatch,
                            format!("tail pointer mismatch at sequence {}", tail.sequence),
                        );
                    }
                    Some(_) => {}
                    None => {
                        let last = end - 1;
                        state.report(
                            last,
                            BreakKind::TailMismatch,
                            format!("tail pointer missing but records exist up to sequence {}", last),
                        );
                    }
                }
            }
        }

        let mut scan = state.finish();
        scan.snapshot = snapshot;
        Ok(scan)
    }

    /// Fetch a page. Undecodable rows become an `Unreadable` break and end
    /// the scan (`None`).
    async fn read_page<S: StreamStore>(
        &self,
        store: &S,
        stream: &StreamId,
        from: u64,
        to: u64,
        state: &mut ScanState<'_>,
    ) -> Result<Option<Vec<Record>>, LedgerError> {
        match store.range(stream, from, to).await {
            Ok(page) => Ok(Some(page)),
            Err(StoreError::Corrupt {
                sequence, reason, ..
            }) => {
                let at = sequence.unwrap_or(state.next_sequence);
                state.report(
                    at,
                    BreakKind::Unreadable,
                    format!("unreadable record at sequence {}: {}", at, reason),
                );
                Ok(None)
            }
            Err(e) => Err(e.into()),
        }
    }
}
