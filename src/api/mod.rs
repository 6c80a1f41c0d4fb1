//! API module for all HTTP handlers

pub mod jobs;
pub mod projects;
pub mod status;
pub mod stream;
pub mod webhook;

use axum::{Router, routing};

use crate::SharedState;

// Re-export handlers
pub use jobs::{get_job, get_jobs};
pub use projects::get_projects;
pub use status::{health, status};
pub use stream::stream_jobs;
pub use webhook::handle_webhook;

/// Every route the service exposes
pub fn router(state: SharedState) -> Router {
    Router::new()
        .route("/", routing::post(handle_webhook))
        .route("/webhook", routing::post(handle_webhook))
        .route("/health", routing::get(health))
        .route("/api/status", routing::get(status))
        .route("/api/jobs", routing::get(get_jobs))
        .route("/api/jobs/{id}", routing::get(get_job))
        .route("/api/projects", routing::get(get_projects))
        .route("/api/stream/jobs", routing::get(stream_jobs))
        .with_state(state)
}
