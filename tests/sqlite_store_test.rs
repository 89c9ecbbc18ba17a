//! Ledger over SQLite: tampering through raw SQL and file-backed persistence

mod common;

use chain_ledger::ledger::{BreakKind, Domain, Ledger};
use chain_ledger::storage::{SqliteStore, StreamStore};
use common::*;
use serde_json::json;
use std::sync::Arc;

#[tokio::test]
async fn test_governance_tamper_scenario_sqlite() {
    let ledger = sqlite_ledger().await;
    let governance = stream("governance");

    for action in ["approve", "reject", "override"] {
        ledger
            .append(&governance, &json!({ "action": action }), None)
            .await
            .unwrap();
    }
    assert!(ledger.verify(&governance).await.unwrap().is_valid);

    let forged = serde_json::to_string(&payload(json!({"action": "REJECT-TAMPERED"}))).unwrap();
    let updated = sqlx::query(
        "UPDATE ledger_records SET payload = ? WHERE stream_id = 'governance' AND sequence = 1",
    )
    .bind(forged)
    .execute(ledger.store().pool())
    .await
    .unwrap();
    assert_eq!(updated.rows_affected(), 1);

    let report = ledger.verify(&governance).await.unwrap();
    assert!(!report.is_valid);
    assert_eq!(report.broken_at, Some(1));
    assert_eq!(report.message, "payload hash mismatch at sequence 1");
}

#[tokio::test]
async fn test_deleted_row_is_detected_sqlite() {
    let ledger = sqlite_ledger().await;
    let admin = Domain::AdminLog.stream_id();
    for i in 0..4 {
        ledger.append(&admin, &json!({"op": i}), None).await.unwrap();
    }

    sqlx::query("DELETE FROM ledger_records WHERE stream_id = 'admin-log' AND sequence = 1")
        .execute(ledger.store().pool())
        .await
        .unwrap();

    let report = ledger.verify(&admin).await.unwrap();
    assert_eq!(report.broken_at, Some(1));
    assert_eq!(report.kind, Some(BreakKind::SequenceGap));
}

#[tokio::test]
async fn test_unreadable_row_is_a_break_not_an_error() {
    let ledger = sqlite_ledger().await;
    let quality = Domain::QualityRuns.stream_id();
    for i in 0..3 {
        ledger.append(&quality, &json!({"run": i}), None).await.unwrap();
    }

    sqlx::query("UPDATE ledger_records SET record_hash = 'garbage' WHERE sequence = 2")
        .execute(ledger.store().pool())
        .await
        .unwrap();

    let report = ledger.verify(&quality).await.unwrap();
    assert!(!report.is_valid);
    assert_eq!(report.kind, Some(BreakKind::Unreadable));
    assert_eq!(report.broken_at, Some(2));
}

#[tokio::test]
async fn test_idempotency_survives_sqlite_round_trip() {
    let ledger = sqlite_ledger().await;
    let reports = Domain::ReportLedger.stream_id();
    let body = json!({"report": "q3-revenue", "version": 2, "signed_off": null});

    let first = ledger.append(&reports, &body, Some("issue-q3")).await.unwrap();
    let replay = ledger.append(&reports, &body, Some("issue-q3")).await.unwrap();
    assert_eq!(first, replay);

    let records = ledger.read_range(&reports, 0, 10).await.unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].idempotency_key.as_deref(), Some("issue-q3"));
}

#[tokio::test]
async fn test_file_backed_ledger_persists_across_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let url = format!("sqlite://{}", dir.path().join("ledger.db").display());
    let custom = stream("model-cards");

    let head = {
        let store = SqliteStore::new(&url).await.unwrap();
        store.run_migrations().await.unwrap();
        let ledger = Ledger::open(store, test_config()).await.unwrap();
        for i in 0..3 {
            ledger.append(&custom, &json!({"card": i}), None).await.unwrap();
        }
        ledger.get_tail(&custom).await.unwrap().unwrap()
    };

    let store = SqliteStore::new(&url).await.unwrap();
    store.run_migrations().await.unwrap();
    assert_eq!(store.streams().await.unwrap(), vec![custom.clone()]);

    let ledger = Arc::new(Ledger::open(store, test_config()).await.unwrap());
    assert!(ledger.registry().contains(&custom));
    assert_eq!(ledger.get_tail(&custom).await.unwrap(), Some(head));

    let next = ledger.append(&custom, &json!({"card": 3}), None).await.unwrap();
    assert_eq!(next.sequence, 3);
    assert_eq!(next.previous_hash, head.hash);

    let reports = ledger.verify_all().await.unwrap();
    assert!(reports.iter().all(|r| r.is_valid));
}

#[tokio::test]
async fn test_computed_floats_keep_their_hash_through_sqlite() {
    let ledger = sqlite_ledger().await;
    let quality = Domain::QualityRuns.stream_id();

    let mut bodies = vec![json!({"ratio": 1.0 / 27000.0})];
    for (a, b) in [(1u32, 3u32), (2, 7), (13, 9), (997, 1013)] {
        bodies.push(json!({"score": a as f64 / b as f64 * 1e-3, "pass": a < b}));
    }

    for (i, body) in bodies.iter().enumerate() {
        let key = format!("run-{}", i);
        let first = ledger.append(&quality, body, Some(&key)).await.unwrap();
        let replay = ledger.append(&quality, body, Some(&key)).await.unwrap();
        assert_eq!(first, replay);
    }

    let report = ledger.verify(&quality).await.unwrap();
    assert!(report.is_valid, "{}", report.message);
    assert_eq!(report.records_checked, bodies.len() as u64);

    let records = ledger.read_range(&quality, 0, 10).await.unwrap();
    for (record, body) in records.iter().zip(&bodies) {
        assert_eq!(&record.payload.to_json(), body);
    }
}
