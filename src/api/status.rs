//! Server status and health endpoints

use axum::{Json, extract::State as AxumState};
use serde::Serialize;
use serde_json::json;

use crate::SharedState;
use crate::job::JobCounts;

#[derive(Debug, Serialize)]
pub struct ServerStatus {
    pub name: &'static str,
    pub version: &'static str,
    pub uptime_seconds: u64,
    pub started_at: String,
    pub total_projects: usize,
    /// Where operators reach this service; display only
    pub public_uri: Vec<String>,
    pub stream_subscribers: usize,
}

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub server: ServerStatus,
    pub jobs: JobCounts,
}

/// GET /api/status - Server and job statistics
pub async fn status(AxumState(state): AxumState<SharedState>) -> Json<StatusResponse> {
    let jobs = state.job_store.lock().await.counts();

    let server = ServerStatus {
        name: env!("CARGO_PKG_NAME"),
        version: env!("CARGO_PKG_VERSION"),
        uptime_seconds: state.start_time.elapsed().as_secs(),
        started_at: state.started_at.to_rfc3339(),
        total_projects: state.registry.projects().len(),
        public_uri: state.config.server.public_uri.clone(),
        stream_subscribers: state.publisher.subscriber_count(),
    };

    Json(StatusResponse { server, jobs })
}

/// GET /health
pub async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}
