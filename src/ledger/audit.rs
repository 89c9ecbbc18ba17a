//! Batch verification of several streams, optionally against a checkpoint.

use serde::Serialize;
use tracing::debug;

use super::{ChainBreak, Checkpoint, Ledger, StreamId, VerificationReport};
use crate::error::LedgerError;
use crate::storage::StreamStore;

/// Outcome for one stream.
#[derive(Debug, Clone, Serialize)]
pub struct StreamAudit {
    pub report: VerificationReport,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub breaks: Vec<ChainBreak>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub checkpoint: Option<VerificationReport>,
}

impl StreamAudit {
    pub fn is_valid(&self) -> bool {
        self.report.is_valid && self.checkpoint.as_ref().map_or(true, |c| c.is_valid)
    }
}

/// Verify `streams` (every registered stream when empty).
///
/// A checkpoint is always checked against its own stream, which is added to
/// the audit if the selection does not already name it.
pub async fn audit_streams<S: StreamStore>(
    ledger: &Ledger<S>,
    streams: &[StreamId],
    all_breaks: bool,
    checkpoint: Option<&Checkpoint>,
) -> Result<Vec<StreamAudit>, LedgerError> {
    let mut selected = if streams.is_empty() {
        ledger.registry().streams()
    } else {
        streams.to_vec()
    };
    if let Some(cp) = checkpoint {
        if !selected.contains(&cp.stream_id) {
            selected.push(cp.stream_id.clone());
        }
    }

    let mut results = Vec::with_capacity(selected.len());
    for stream in selected {
        debug!("Verifying stream '{}'", stream);
        let report = ledger.verify(&stream).await?;
        let breaks = if all_breaks && !report.is_valid {
            ledger.survey(&stream).await?
        } else {
            Vec::new()
        };
        let checkpoint = match checkpoint {
            Some(cp) if cp.stream_id == stream => Some(ledger.verify_checkpoint(cp).await?),
            _ => None,
        };
        results.push(StreamAudit {
            report,
            breaks,
            checkpoint,
        });
    }
    Ok(results)
}

/// Process exit status for a finished audit: 0 when clean, 1 on any break.
pub fn exit_code(results: &[StreamAudit]) -> i32 {
    if results.iter().all(StreamAudit::is_valid) {
        0
    } else {
        1
    }
}
