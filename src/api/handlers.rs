//! Axum request handlers.
//!
//! Bodies are taken as raw bytes and parsed here so that malformed JSON
//! gets the same `{"error": ...}` 400 as a missing field.

use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::Json;
use chrono::Utc;
use serde_json::{json, Value};

use super::error::{ApiError, ApiResult};
use super::AppState;

/// `GET /`
pub async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

/// `POST /data`
pub async fn receive_sensor(State(state): State<AppState>, body: Bytes) -> ApiResult<Json<Value>> {
    let body = parse_json(&body)?;
    let ingested = state.ingestor().sensor_record(body, Utc::now()).await?;
    let published = ingested.dose.as_ref().map_or(0, |d| d.published.len());
    Ok(Json(json!({
        "status": "success",
        "saved_file": ingested.saved.display().to_string(),
        "commands_published": published,
    })))
}

/// `POST /data_ponds`
pub async fn receive_pond_info(State(state): State<AppState>, body: Bytes) -> ApiResult<Json<Value>> {
    let body = parse_json(&body)?;
    let ingested = state.ingestor().pond_info(body, Utc::now()).await?;
    Ok(Json(json!({
        "status": "success",
        "saved_file": ingested.saved.display().to_string(),
    })))
}

/// `POST /heartbeat`
pub async fn receive_heartbeat(State(state): State<AppState>, body: Bytes) -> ApiResult<Json<Value>> {
    let body = parse_json(&body)?;
    let device_id = state.ingestor().heartbeat(&body, Utc::now()).await?;
    Ok(Json(json!({
        "status": "success",
        "message": format!("Heartbeat received from {device_id}"),
        "device_id": device_id,
        "pond_id": body.get("pond_id").cloned().unwrap_or(Value::Null),
    })))
}

/// `POST /results/:category`
pub async fn receive_result(
    State(state): State<AppState>,
    Path(category): Path<String>,
    body: Bytes,
) -> ApiResult<Json<Value>> {
    let body = parse_json(&body)?;
    let ingested = state
        .ingestor()
        .analysis_result(&category, body, Utc::now())
        .await?;
    Ok(Json(json!({
        "status": "success",
        "saved_file": ingested.saved.display().to_string(),
    })))
}

/// `GET /ponds/:pond_id/status`
pub async fn pond_status(State(state): State<AppState>, Path(pond_id): Path<String>) -> ApiResult<Json<Value>> {
    let pond_id = parse_pond_id(&pond_id)?;
    let path = state.ingestor().store().status_snapshot_path(pond_id);
    read_snapshot(&state, &path, "no pond status yet").await
}

/// `GET /ponds/:pond_id/shrimp_size`
pub async fn shrimp_size(State(state): State<AppState>, Path(pond_id): Path<String>) -> ApiResult<Json<Value>> {
    let pond_id = parse_pond_id(&pond_id)?;
    let path = state.ingestor().store().size_snapshot_path(pond_id);
    read_snapshot(&state, &path, "no shrimp size yet").await
}

async fn read_snapshot(state: &AppState, path: &std::path::Path, missing: &str) -> ApiResult<Json<Value>> {
    match state.ingestor().store().read_snapshot(path).await {
        Ok(Some(snapshot)) => Ok(Json(snapshot)),
        Ok(None) => Err(ApiError::NotFound(missing.to_owned())),
        Err(e) => Err(ApiError::Internal(format!("{e:#}"))),
    }
}

fn parse_json(body: &[u8]) -> ApiResult<Value> {
    serde_json::from_slice(body).map_err(|e| ApiError::BadRequest(format!("invalid JSON: {e}")))
}

fn parse_pond_id(raw: &str) -> ApiResult<i64> {
    raw.parse()
        .map_err(|_| ApiError::BadRequest(format!("invalid pond id `{raw}`")))
}
