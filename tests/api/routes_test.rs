//! Router tests driven through `tower::ServiceExt::oneshot`.

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use serde_json::{json, Value};
use tower::ServiceExt;

use pondside::api::{create_router, AppState};

use crate::support::{test_config, Harness};

fn router(harness: &Harness) -> Router {
    create_router(AppState::new(std::sync::Arc::clone(&harness.ingestor)))
}

async fn send(router: Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = router.oneshot(request).await.expect("router is infallible");
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("should read body");
    let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, body)
}

fn post(uri: &str, body: impl Into<Body>) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(body.into())
        .expect("valid request")
}

fn get(uri: &str) -> Request<Body> {
    Request::builder()
        .uri(uri)
        .body(Body::empty())
        .expect("valid request")
}

#[tokio::test]
async fn root_reports_ok() {
    let dir = tempfile::tempdir().expect("should create temp dir");
    let harness = Harness::new(test_config(dir.path()));

    let (status, body) = send(router(&harness), get("/")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({"status": "ok"}));
}

#[tokio::test]
async fn sensor_post_missing_field_is_bad_request() {
    let dir = tempfile::tempdir().expect("should create temp dir");
    let harness = Harness::new(test_config(dir.path()));

    let (status, body) = send(
        router(&harness),
        post("/data", json!({"pond_id": 1, "ph": 7.0}).to_string()),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    let message = body["error"].as_str().expect("error message");
    assert!(message.contains("temperature"), "got {message}");
}

#[tokio::test]
async fn malformed_json_is_bad_request() {
    let dir = tempfile::tempdir().expect("should create temp dir");
    let harness = Harness::new(test_config(dir.path()));

    let (status, body) = send(router(&harness), post("/heartbeat", "{oops")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"]
        .as_str()
        .expect("error message")
        .starts_with("invalid JSON"));
}

#[tokio::test]
async fn sensor_post_is_stored_and_doses() {
    let dir = tempfile::tempdir().expect("should create temp dir");
    let harness = Harness::new(test_config(dir.path()));

    let reading = json!({"pond_id": 1, "ph": 6.5, "temperature": 31, "do": 5, "timestamp": "2025-01-01T08:00:00"});
    let (status, body) = send(router(&harness), post("/data", reading.to_string())).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "success");
    assert_eq!(body["commands_published"], 2);
    assert!(body["saved_file"].as_str().is_some_and(|p| p.ends_with(".json")));
}

#[tokio::test]
async fn unknown_result_category_is_bad_request() {
    let dir = tempfile::tempdir().expect("should create temp dir");
    let harness = Harness::new(test_config(dir.path()));

    let (status, _) = send(
        router(&harness),
        post("/results/plankton", json!({"pond_id": 1}).to_string()),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, body) = send(
        router(&harness),
        post("/results/water", json!({"pond_id": 1, "text_content": "green"}).to_string()),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "success");
}

#[tokio::test]
async fn heartbeat_echoes_device() {
    let dir = tempfile::tempdir().expect("should create temp dir");
    let harness = Harness::new(test_config(dir.path()));

    let beat = json!({"device_id": "raspi_pond_1", "status": "ok", "timestamp": "t", "pond_id": 1});
    let (status, body) = send(router(&harness), post("/heartbeat", beat.to_string())).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["device_id"], "raspi_pond_1");
    assert_eq!(body["pond_id"], 1);
}

#[tokio::test]
async fn snapshot_reads_404_until_written() {
    let dir = tempfile::tempdir().expect("should create temp dir");
    let harness = Harness::new(test_config(dir.path()));

    let (status, body) = send(router(&harness), get("/ponds/1/status")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(body["error"].is_string());

    let snapshot = json!({"pondId": 1, "Size_CM": 4.0});
    pondside::status::store::write_json_atomic(&harness.store.size_snapshot_path(1), &snapshot)
        .await
        .expect("should write snapshot");
    let (status, body) = send(router(&harness), get("/ponds/1/shrimp_size")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, snapshot);

    let (status, _) = send(router(&harness), get("/ponds/abc/status")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}
