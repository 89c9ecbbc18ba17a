//! HTTP routes exercised in-process

mod common;

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use axum::Router;
use chain_ledger::api;
use common::*;
use serde_json::{json, Value};
use tower::ServiceExt;

async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, body)
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

fn post_json(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

#[tokio::test]
async fn test_health() {
    let app = api::router(memory_ledger());
    let (status, body) = send(&app, get("/health")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
}

#[tokio::test]
async fn test_append_read_and_verify() {
    let app = api::router(memory_ledger());

    for action in ["approve", "reject"] {
        let (status, body) = send(
            &app,
            post_json(
                "/streams/governance/records",
                json!({"payload": {"action": action}}),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["data"]["payload"]["action"], action);
    }

    let (status, body) = send(&app, get("/streams/governance/records?from=0&to=10")).await;
    assert_eq!(status, StatusCode::OK);
    let records = body["data"].as_array().unwrap();
    assert_eq!(records.len(), 2);
    assert_eq!(records[1]["sequence"], 1);
    assert_eq!(records[1]["previous_hash"], records[0]["record_hash"]);
    assert!(records[0]["record_hash"].as_str().unwrap().starts_with("sha256:"));

    let (status, body) = send(&app, get("/streams/governance/tail")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["sequence"], 1);

    let (status, body) = send(&app, get("/streams/governance/verify")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["is_valid"], true);
    assert_eq!(body["data"]["broken_at"], Value::Null);

    let (_, body) = send(&app, get("/streams")).await;
    let streams: Vec<&str> = body["data"]
        .as_array()
        .unwrap()
        .iter()
        .filter_map(Value::as_str)
        .collect();
    assert!(streams.contains(&"governance"));
    assert!(streams.contains(&"admin-log"));
}

#[tokio::test]
async fn test_broken_stream_is_reported_not_failed() {
    let ledger = memory_ledger();
    let app = api::router(ledger.clone());
    let s = stream("governance");
    for action in ["approve", "reject", "override"] {
        ledger.append(&s, &json!({ "action": action }), None).await.unwrap();
    }
    ledger.store().tamper(&s, |records| {
        records[1].payload = payload(json!({"action": "REJECT-TAMPERED"}));
    });

    let (status, body) = send(&app, get("/streams/governance/verify")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["is_valid"], false);
    assert_eq!(body["data"]["broken_at"], 1);
    assert_eq!(body["data"]["message"], "payload hash mismatch at sequence 1");
    assert_eq!(body["data"]["kind"], "payload_mismatch");
}

#[tokio::test]
async fn test_error_status_mapping() {
    let app = api::router(memory_ledger());

    let (status, body) = send(&app, get("/streams/Not%20Valid/tail")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["status"], "error");

    let (status, _) = send(
        &app,
        post_json(
            "/streams/admin-log/records",
            json!({"payload": {"a": 1}, "idempotency_key": "k1"}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, body) = send(
        &app,
        post_json(
            "/streams/admin-log/records",
            json!({"payload": {"a": 2}, "idempotency_key": "k1"}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["retryable"], false);

    let (status, _) = send(&app, post_json("/streams/empty-stream/checkpoint", json!({}))).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
}

#[tokio::test]
async fn test_writer_unavailable_maps_to_503() {
    let ledger = memory_ledger();
    ledger.store().fail_next_inserts(100);
    let app = api::router(ledger);

    let request = post_json("/streams/admin-log/records", json!({"payload": {"a": 1}}));
    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    assert!(response.headers().contains_key(header::RETRY_AFTER));
}

#[tokio::test]
async fn test_checkpoint_route() {
    let ledger = memory_ledger();
    let app = api::router(ledger.clone());
    let s = stream("report-ledger");
    for i in 0..3 {
        ledger.append(&s, &json!({"report": i}), None).await.unwrap();
    }

    let (status, body) = send(&app, post_json("/streams/report-ledger/checkpoint", json!({}))).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["data"]["sequence"], 2);
    assert!(body["data"]["merkle_root"].as_str().unwrap().starts_with("sha256:"));
}
