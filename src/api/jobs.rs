//! Jobs API endpoints

use axum::{
    Json,
    extract::{Path, Query, State as AxumState},
    http::StatusCode,
    response::IntoResponse,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::error;

use crate::SharedState;
use crate::job::{Job, JobFilter, JobStatus};

const DEFAULT_LIMIT: usize = 50;

/// Query parameters for job listing
#[derive(Debug, Deserialize)]
pub struct JobsQuery {
    /// Filter by project name
    pub project: Option<String>,
    /// Filter by status (queued, running, succeeded, failed, superseded)
    pub status: Option<String>,
    /// Number of jobs to return (default: 50)
    pub limit: Option<usize>,
}

#[derive(Debug, Serialize)]
pub struct JobsResponse {
    pub jobs: Vec<Job>,
    pub total: usize,
    pub limit: usize,
}

/// GET /api/jobs - Job listing with filters, newest first
pub async fn get_jobs(
    AxumState(state): AxumState<SharedState>,
    Query(params): Query<JobsQuery>,
) -> impl IntoResponse {
    let status = match params.status.as_deref().map(str::parse::<JobStatus>) {
        Some(Ok(status)) => Some(status),
        Some(Err(msg)) => {
            return (StatusCode::BAD_REQUEST, Json(json!({ "error": msg }))).into_response();
        }
        None => None,
    };
    let limit = params.limit.unwrap_or(DEFAULT_LIMIT);

    let jobs = state.job_store.lock().await.list(&JobFilter {
        project: params.project,
        status,
        limit: Some(limit),
    });
    let total = jobs.len();

    Json(JobsResponse { jobs, total, limit }).into_response()
}

/// GET /api/jobs/{id} - Get a specific job by ID. Jobs that have aged out
/// of memory are looked up in the archive.
pub async fn get_job(
    AxumState(state): AxumState<SharedState>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    let mut job = state.job_store.lock().await.get(&id);
    if job.is_none() {
        if let Some(archive) = &state.archive {
            match archive.get_job(&id).await {
                Ok(archived) => job = archived,
                Err(e) => {
                    error!("Archive lookup for job {} failed: {}", id, e);
                    return (
                        StatusCode::INTERNAL_SERVER_ERROR,
                        Json(json!({"error": "Failed to fetch job"})),
                    )
                        .into_response();
                }
            }
        }
    }

    match job {
        Some(job) => Json(job).into_response(),
        None => (
            StatusCode::NOT_FOUND,
            Json(json!({"error": "Job not found"})),
        )
            .into_response(),
    }
}
