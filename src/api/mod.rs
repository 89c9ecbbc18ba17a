//! Ledger HTTP API
//!
//! JSON endpoints for appending, reading and verifying streams.

pub mod handlers;

use axum::{
    http::{header, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;
use tracing::error;

use crate::error::LedgerError;
use crate::ledger::Ledger;
use crate::storage::StreamStore;

/// Build the router over a shared ledger.
pub fn router<S: StreamStore>(ledger: Arc<Ledger<S>>) -> Router {
    Router::new()
        .route("/health", get(handlers::health_check))
        .route("/streams", get(handlers::list_streams::<S>))
        .route(
            "/streams/:stream/records",
            post(handlers::append_record::<S>).get(handlers::read_records::<S>),
        )
        .route("/streams/:stream/tail", get(handlers::get_tail::<S>))
        .route("/streams/:stream/verify", get(handlers::verify_stream::<S>))
        .route("/streams/:stream/checkpoint", post(handlers::take_checkpoint::<S>))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .into_inner(),
        )
        .with_state(ledger)
}

impl LedgerError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            LedgerError::ValidationError(_) => StatusCode::UNPROCESSABLE_ENTITY,
            LedgerError::WriterUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            LedgerError::InvalidStream(_) => StatusCode::BAD_REQUEST,
            LedgerError::StorageError(_) | LedgerError::ConfigError(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for LedgerError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            error!("Request failed: {}", self);
        }
        let body = Json(serde_json::json!({
            "status": "error",
            "error": self.to_string(),
            "retryable": self.is_retryable(),
        }));
        if self.is_retryable() {
            return (status, [(header::RETRY_AFTER, "1")], body).into_response();
        }
        (status, body).into_response()
    }
}
