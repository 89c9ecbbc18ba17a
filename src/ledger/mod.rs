//! Hash-Chained Ledger
//!
//! Tamper-evident, append-only streams of business records. Every domain
//! (admin actions, governance decisions, quality runs, report issuance,
//! deployment attestations) plugs into the same writer and verifier as its
//! own independently chained stream.

pub mod audit;
pub mod canonical;
pub mod hash;
pub mod merkle;
pub mod payload;
pub mod record;
pub mod stream;
pub mod verify;
pub mod writer;

pub use audit::{audit_streams, StreamAudit};
pub use hash::ChainHash;
pub use payload::Payload;
pub use record::{ChainTail, Record};
pub use stream::{Domain, StreamId, StreamRegistry};
pub use verify::{BreakKind, ChainBreak, ChainVerifier, Checkpoint, Finding, VerificationReport};
pub use writer::LedgerWriter;

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::marker::PhantomData;
use std::sync::Arc;
use tokio::task::JoinSet;
use tracing::{error, info};

use crate::config::LedgerConfig;
use crate::error::LedgerError;
use crate::storage::StreamStore;

/// Writer, verifier and registry over one injected store.
#[derive(Debug)]
pub struct Ledger<S: StreamStore> {
    store: S,
    registry: StreamRegistry,
    writer: LedgerWriter,
    verifier: ChainVerifier,
}

impl<S: StreamStore> Ledger<S> {
    pub fn new(store: S, config: LedgerConfig) -> Result<Self, LedgerError> {
        let registry = StreamRegistry::new(config.streams.strict);
        for name in &config.streams.known {
            registry.register(StreamId::new(name.as_str())?);
        }
        Ok(Self {
            store,
            registry,
            writer: LedgerWriter::new(config.writer),
            verifier: ChainVerifier::new(config.verifier.page_size),
        })
    }

    /// Like `new`, and registers every stream already present in the store.
    pub async fn open(store: S, config: LedgerConfig) -> Result<Self, LedgerError> {
        let ledger = Self::new(store, config)?;
        let existing = ledger.store.streams().await?;
        info!("Bootstrapping registry with {} persisted streams", existing.len());
        for stream in existing {
            ledger.registry.register(stream);
        }
        Ok(ledger)
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn registry(&self) -> &StreamRegistry {
        &self.registry
    }

    /// Append any serializable payload. Hash-chain fields are computed here
    /// and can never be supplied by the caller.
    pub async fn append<P: Serialize + ?Sized>(
        &self,
        stream: &StreamId,
        payload: &P,
        idempotency_key: Option<&str>,
    ) -> Result<Record, LedgerError> {
        let payload = Payload::from_serialize(payload)
            .map_err(|e| LedgerError::ValidationError(e.to_string()))?;
        self.append_payload(stream, payload, idempotency_key).await
    }

    pub async fn append_payload(
        &self,
        stream: &StreamId,
        payload: Payload,
        idempotency_key: Option<&str>,
    ) -> Result<Record, LedgerError> {
        if let Some(key) = idempotency_key {
            if key.trim().is_empty() {
                return Err(LedgerError::ValidationError(
                    "idempotency key must not be blank".to_string(),
                ));
            }
        }
        self.registry.admit(stream)?;
        self.writer
            .append(&self.store, stream, payload, idempotency_key)
            .await
    }

    /// Verify one stream, stopping at the first break.
    pub async fn verify(&self, stream: &StreamId) -> Result<VerificationReport, LedgerError> {
        self.verifier.verify(&self.store, stream).await
    }

    /// Every break in a stream, not just the first.
    pub async fn survey(&self, stream: &StreamId) -> Result<Vec<ChainBreak>, LedgerError> {
        self.verifier.survey(&self.store, stream).await
    }

    pub async fn get_tail(&self, stream: &StreamId) -> Result<Option<ChainTail>, LedgerError> {
        Ok(self.store.tail(stream).await?)
    }

    /// Records with `from <= sequence < to`, at most one verifier page.
    pub async fn read_range(
        &self,
        stream: &StreamId,
        from: u64,
        to: u64,
    ) -> Result<Vec<Record>, LedgerError> {
        let to = to.min(from.saturating_add(self.verifier.page_size()));
        Ok(self.store.range(stream, from, to).await?)
    }

    pub async fn checkpoint(&self, stream: &StreamId) -> Result<Checkpoint, LedgerError> {
        self.verifier.checkpoint(&self.store, stream).await
    }

    pub async fn verify_checkpoint(
        &self,
        checkpoint: &Checkpoint,
    ) -> Result<VerificationReport, LedgerError> {
        self.verifier.verify_checkpoint(&self.store, checkpoint).await
    }

    /// Typed handle for one domain's stream.
    pub fn stream<P>(self: &Arc<Self>, stream: impl Into<StreamId>) -> StreamHandle<S, P> {
        StreamHandle {
            ledger: Arc::clone(self),
            stream: stream.into(),
            _payload: PhantomData,
        }
    }

    /// Verify every registered stream, one task per stream.
    pub async fn verify_all(self: &Arc<Self>) -> Result<Vec<VerificationReport>, LedgerError> {
        let mut tasks = JoinSet::new();
        for stream in self.registry.streams() {
            let ledger = Arc::clone(self);
            tasks.spawn(async move { ledger.verify(&stream).await });
        }

        let mut reports = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            let report = joined
                .map_err(|e| LedgerError::StorageError(format!("verification task failed: {}", e)))??;
            reports.push(report);
        }
        reports.sort_by(|a, b| a.stream_id.cmp(&b.stream_id));

        let broken = reports.iter().filter(|r| !r.is_valid).count();
        if broken > 0 {
            error!("{} of {} streams failed verification", broken, reports.len());
        } else {
            info!("All {} streams verified", reports.len());
        }
        Ok(reports)
    }
}

/// A stream bound to one payload type.
pub struct StreamHandle<S: StreamStore, P> {
    ledger: Arc<Ledger<S>>,
    stream: StreamId,
    _payload: PhantomData<fn() -> P>,
}

impl<S: StreamStore, P> Clone for StreamHandle<S, P> {
    fn clone(&self) -> Self {
        Self {
            ledger: Arc::clone(&self.ledger),
            stream: self.stream.clone(),
            _payload: PhantomData,
        }
    }
}

impl<S: StreamStore, P: Serialize + DeserializeOwned> StreamHandle<S, P> {
    pub fn id(&self) -> &StreamId {
        &self.stream
    }

    pub async fn append(&self, payload: &P) -> Result<Record, LedgerError> {
        self.ledger.append(&self.stream, payload, None).await
    }

    /// Append deduplicated by `key`: replays return the original record.
    pub async fn append_once(&self, payload: &P, key: &str) -> Result<Record, LedgerError> {
        self.ledger.append(&self.stream, payload, Some(key)).await
    }

    /// Records in `[from, to)` with their payloads decoded.
    pub async fn records(&self, from: u64, to: u64) -> Result<Vec<(Record, P)>, LedgerError> {
        let records = self.ledger.read_range(&self.stream, from, to).await?;
        records
            .into_iter()
            .map(|record| {
                let decoded = record.payload.decode::<P>().map_err(|e| {
                    LedgerError::ValidationError(format!(
                        "record {} of stream '{}' does not decode: {}",
                        record.sequence, self.stream, e
                    ))
                })?;
                Ok((record, decoded))
            })
            .collect()
    }

    pub async fn tail(&self) -> Result<Option<ChainTail>, LedgerError> {
        self.ledger.get_tail(&self.stream).await
    }

    pub async fn verify(&self) -> Result<VerificationReport, LedgerError> {
        self.ledger.verify(&self.stream).await
    }
}
