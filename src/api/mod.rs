//! HTTP ingestion surface.
//!
//! ## Endpoints
//!
//! - `GET /` - liveness
//! - `POST /data` - water sensor reading (triggers auto-dose)
//! - `POST /data_ponds` - pond info
//! - `POST /heartbeat` - device heartbeat
//! - `POST /results/:category` - analysis result (`water`, `shrimp`, `size`, `din`)
//! - `GET /ponds/:pond_id/status` - last persisted PondStatus
//! - `GET /ponds/:pond_id/shrimp_size` - last persisted ShrimpSize

pub mod error;
pub mod handlers;

use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;
use tower_http::trace::TraceLayer;

use crate::ingest::Ingestor;

pub use error::ApiError;

/// State shared by every handler.
#[derive(Clone)]
pub struct AppState {
    inner: Arc<Ingestor>,
}

impl AppState {
    /// Wrap the ingestor.
    pub fn new(ingestor: Arc<Ingestor>) -> Self {
        Self { inner: ingestor }
    }

    /// The ingestion entry point.
    pub fn ingestor(&self) -> &Ingestor {
        &self.inner
    }
}

/// Build the router.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/", get(handlers::health))
        .route("/data", post(handlers::receive_sensor))
        .route("/data_ponds", post(handlers::receive_pond_info))
        .route("/heartbeat", post(handlers::receive_heartbeat))
        .route("/results/:category", post(handlers::receive_result))
        .route("/ponds/:pond_id/status", get(handlers::pond_status))
        .route("/ponds/:pond_id/shrimp_size", get(handlers::shrimp_size))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
