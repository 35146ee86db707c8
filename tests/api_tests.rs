use axum::{
    body::Body,
    http::{header, Request, StatusCode},
    Router,
};
use http_body_util::BodyExt;
use serde_json::{json, Value};
use std::sync::Arc;
use tower::ServiceExt;

use batch_lite::api::{router, ApiState};
use batch_lite::attribute::Permission;
use batch_lite::config::ServerConfig;
use batch_lite::refresh::CachedStatusGate;
use batch_lite::scheduler::{Job, JobState, JobTable, Queue, QueueKind};
use batch_lite::select::{Criterion, Op, QueryKind, Reply, Requester, SelectEngine, SelectRequest};
use batch_lite::wire::{decode_reply, encode_select_request};

/// Helper to create a router over a small table
fn create_test_app() -> Router {
    let table = JobTable::new("s");
    table.add_queue(Queue::new("batch", QueueKind::Execution));
    table.add_queue(Queue::new("route", QueueKind::Route));
    table
        .insert_job(Job::new("1.s", "batch", "alice@h").with_state(JobState::Running))
        .unwrap();
    table.insert_job(Job::new("2.s", "route", "bob@h")).unwrap();

    let engine = SelectEngine::new(
        Arc::new(table),
        Arc::new(CachedStatusGate),
        ServerConfig::default(),
    );
    router(ApiState {
        engine: Arc::new(engine),
    })
}

async fn post_json(app: Router, uri: &str, body: Value) -> (StatusCode, Value) {
    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri(uri)
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
        )
        .await
        .unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    (status, serde_json::from_slice(&bytes).unwrap())
}

#[tokio::test]
async fn test_health_endpoint() {
    let app = create_test_app();

    let response = app
        .oneshot(Request::builder().uri("/api/health").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = response.into_body().collect().await.unwrap().to_bytes();
    let json: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json["status"], "ok");
    assert_eq!(json["server"], "s");
    assert_eq!(json["jobs"], 2);
    assert_eq!(json["queues"], json!(["batch", "route"]));
}

#[tokio::test]
async fn test_select_returns_ids() {
    let (status, json) = post_json(
        create_test_app(),
        "/api/select",
        json!({
            "user": "root",
            "role": "manager",
            "criteria": [{ "name": "job_state", "op": "eq", "value": "QR" }]
        }),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["count"], 2);
    assert_eq!(json["selected_ids"], json!(["1.s", "2.s"]));
}

#[tokio::test]
async fn test_select_status_returns_records() {
    let (status, json) = post_json(
        create_test_app(),
        "/api/select",
        json!({
            "user": "alice",
            "kind": "select_status",
            "exec_queue_only": true
        }),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["count"], 1);
    let records = json["status_records"].as_array().unwrap();
    assert_eq!(records[0]["job_id"], "1.s");
    let state = records[0]["attributes"]
        .as_array()
        .unwrap()
        .iter()
        .find(|a| a["name"] == "job_state")
        .unwrap();
    assert_eq!(state["value"], "R");
}

#[tokio::test]
async fn test_select_error_carries_index() {
    let (status, json) = post_json(
        create_test_app(),
        "/api/select",
        json!({
            "user": "root",
            "role": "manager",
            "criteria": [
                { "name": "job_state", "value": "R" },
                { "name": "queue", "value": "nosuch" }
            ]
        }),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["code"], 15018);
    assert_eq!(json["index"], 2);
}

#[tokio::test]
async fn test_select_rejects_malformed_json() {
    let app = create_test_app();

    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/select")
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from("{\"criteria\": 5}"))
                .unwrap(),
        )
        .await
        .unwrap();

    assert!(response.status().is_client_error());
}

#[tokio::test]
async fn test_dis_select_round_trip() {
    let app = create_test_app();
    let request = SelectRequest::new(
        Requester::new("root", "h", Permission::MANAGER),
        QueryKind::Select,
        vec![Criterion::new("job_state", Op::Eq, "R")],
    );

    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/select/dis")
                .body(Body::from(encode_select_request(&request)))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers()[header::CONTENT_TYPE],
        "application/octet-stream"
    );
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let frame = decode_reply(&bytes).unwrap();
    assert_eq!(frame.code, 0);
    assert_eq!(frame.body, Some(Reply::SelectedIds(vec!["1.s".into()])));
}

#[tokio::test]
async fn test_dis_error_reply() {
    let app = create_test_app();
    let request = SelectRequest::new(
        Requester::new("root", "h", Permission::MANAGER),
        QueryKind::Select,
        vec![Criterion::new("Bogus", Op::Eq, "1")],
    );

    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/select/dis")
                .body(Body::from(encode_select_request(&request)))
                .unwrap(),
        )
        .await
        .unwrap();

    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let frame = decode_reply(&bytes).unwrap();
    assert_eq!(frame.code, 15002);
    assert_eq!(frame.auxcode, 1);
    assert_eq!(frame.body, None);
}

#[tokio::test]
async fn test_dis_garbage_is_rejected() {
    let app = create_test_app();

    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/select/dis")
                .body(Body::from("not dis"))
                .unwrap(),
        )
        .await
        .unwrap();

    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let frame = decode_reply(&bytes).unwrap();
    assert_eq!(frame.code, 15004);
    assert_eq!(frame.body, None);
}
