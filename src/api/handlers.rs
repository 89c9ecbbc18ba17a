use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::Json,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tracing::{info, warn};

use crate::error::LedgerError;
use crate::ledger::{ChainHash, Ledger, Payload, Record, StreamId};
use crate::storage::StreamStore;

type ApiResult = Result<(StatusCode, Json<Value>), LedgerError>;

#[derive(Debug, Deserialize)]
pub struct AppendRequest {
    pub payload: Value,
    #[serde(default)]
    pub idempotency_key: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct RangeQuery {
    pub from: Option<u64>,
    pub to: Option<u64>,
}

/// Wire form of a record; the payload is rendered as plain JSON.
#[derive(Debug, Serialize)]
pub struct RecordView {
    pub stream_id: String,
    pub sequence: u64,
    pub payload: Value,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub previous_hash: ChainHash,
    pub record_hash: ChainHash,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub idempotency_key: Option<String>,
}

impl From<&Record> for RecordView {
    fn from(record: &Record) -> Self {
        Self {
            stream_id: record.stream_id.to_string(),
            sequence: record.sequence,
            payload: record.payload.to_json(),
            created_at: record.created_at,
            previous_hash: record.previous_hash,
            record_hash: record.record_hash,
            idempotency_key: record.idempotency_key.clone(),
        }
    }
}

fn success<T: Serialize>(status: StatusCode, data: T) -> ApiResult {
    let data = serde_json::to_value(data)
        .map_err(|e| LedgerError::StorageError(format!("response encoding: {}", e)))?;
    Ok((
        status,
        Json(serde_json::json!({
            "status": "success",
            "data": data
        })),
    ))
}

/// Health check endpoint
pub async fn health_check() -> Json<Value> {
    Json(serde_json::json!({
        "status": "healthy",
        "service": "chain-ledger",
        "timestamp": chrono::Utc::now()
    }))
}

pub async fn list_streams<S: StreamStore>(State(ledger): State<Arc<Ledger<S>>>) -> ApiResult {
    let streams: Vec<String> = ledger
        .registry()
        .streams()
        .iter()
        .map(|s| s.to_string())
        .collect();
    success(StatusCode::OK, streams)
}

/// Append a record to a stream
pub async fn append_record<S: StreamStore>(
    Path(stream): Path<String>,
    State(ledger): State<Arc<Ledger<S>>>,
    Json(request): Json<AppendRequest>,
) -> ApiResult {
    let stream = StreamId::new(stream)?;
    let payload = Payload::from_json(&request.payload)
        .map_err(|e| LedgerError::ValidationError(e.to_string()))?;

    let record = ledger
        .append_payload(&stream, payload, request.idempotency_key.as_deref())
        .await?;
    info!("Appended {} via API", record.summary());
    success(StatusCode::CREATED, RecordView::from(&record))
}

/// Read records in `[from, to)`
pub async fn read_records<S: StreamStore>(
    Path(stream): Path<String>,
    Query(range): Query<RangeQuery>,
    State(ledger): State<Arc<Ledger<S>>>,
) -> ApiResult {
    let stream = StreamId::new(stream)?;
    let from = range.from.unwrap_or(0);
    let to = range.to.unwrap_or(u64::MAX);
    if to < from {
        return Err(LedgerError::ValidationError(format!(
            "invalid range: from {} is after to {}",
            from, to
        )));
    }

    let records = ledger.read_range(&stream, from, to).await?;
    let views: Vec<RecordView> = records.iter().map(RecordView::from).collect();
    success(StatusCode::OK, views)
}

pub async fn get_tail<S: StreamStore>(
    Path(stream): Path<String>,
    State(ledger): State<Arc<Ledger<S>>>,
) -> ApiResult {
    let stream = StreamId::new(stream)?;
    let tail = ledger.get_tail(&stream).await?;
    success(StatusCode::OK, tail)
}

/// Verify a stream's chain
pub async fn verify_stream<S: StreamStore>(
    Path(stream): Path<String>,
    State(ledger): State<Arc<Ledger<S>>>,
) -> ApiResult {
    let stream = StreamId::new(stream)?;
    let report = ledger.verify(&stream).await?;
    if !report.is_valid {
        warn!("Verification requested for broken stream: {}", report.summary());
    }
    success(StatusCode::OK, report)
}

pub async fn take_checkpoint<S: StreamStore>(
    Path(stream): Path<String>,
    State(ledger): State<Arc<Ledger<S>>>,
) -> ApiResult {
    let stream = StreamId::new(stream)?;
    let checkpoint = ledger.checkpoint(&stream).await?;
    info!(
        "Checkpoint for stream '{}' at sequence {}: {}",
        stream, checkpoint.sequence, checkpoint.merkle_root
    );
    success(StatusCode::CREATED, checkpoint)
}
