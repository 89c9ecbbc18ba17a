#![allow(dead_code)]

use chain_ledger::config::{LedgerConfig, WriterConfig};
use chain_ledger::ledger::{Ledger, Payload, StreamId};
use chain_ledger::storage::{MemoryStore, SqliteStore};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Ledger config with short timeouts for tests
pub fn test_config() -> LedgerConfig {
    LedgerConfig {
        writer: WriterConfig {
            lock_timeout_ms: 2_000,
            max_attempts: 5,
            retry_backoff_ms: 1,
        },
        ..LedgerConfig::default()
    }
}

pub fn memory_ledger() -> Arc<Ledger<MemoryStore>> {
    Arc::new(Ledger::new(MemoryStore::new(), test_config()).expect("Failed to create ledger"))
}

/// Setup a ledger over an in-memory SQLite database
pub async fn sqlite_ledger() -> Arc<Ledger<SqliteStore>> {
    let store = SqliteStore::new_in_memory()
        .await
        .expect("Failed to create test database");
    store.run_migrations().await.expect("Failed to run migrations");
    Arc::new(
        Ledger::open(store, test_config())
            .await
            .expect("Failed to open ledger"),
    )
}

pub fn stream(name: &str) -> StreamId {
    StreamId::new(name).expect("valid stream id")
}

pub fn payload(value: serde_json::Value) -> Payload {
    Payload::from_json(&value).expect("canonicalizable payload")
}

/// Governance decision as recorded by the decision ledger
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Decision {
    pub action: String,
    pub proposal_id: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reviewer: Option<String>,
}

pub fn decisions(count: u32) -> Vec<Decision> {
    (0..count)
        .map(|i| Decision {
            action: if i % 2 == 0 { "approve" } else { "reject" }.to_string(),
            proposal_id: i,
            reviewer: Some(format!("reviewer-{}", i % 3)),
        })
        .collect()
}
