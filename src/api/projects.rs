//! Projects API endpoint

use axum::{Json, extract::State as AxumState};
use serde::Serialize;

use crate::SharedState;
use crate::job::{JobFilter, JobStatus};
use crate::project::RateLimitConfig;

/// Public view of a configured project. Never includes the secret.
#[derive(Debug, Serialize)]
pub struct ProjectSummary {
    pub name: String,
    pub repositories: Vec<String>,
    pub branches: Vec<String>,
    pub has_secret: bool,
    pub rate_limit: Option<RateLimitConfig>,
    pub last_job_status: Option<JobStatus>,
    pub last_job_at: Option<String>,
}

/// GET /api/projects - Get all projects with their latest job
pub async fn get_projects(AxumState(state): AxumState<SharedState>) -> Json<serde_json::Value> {
    let store = state.job_store.lock().await;

    let summaries: Vec<ProjectSummary> = state
        .registry
        .projects()
        .iter()
        .map(|project| {
            let last = store
                .list(&JobFilter {
                    project: Some(project.name.clone()),
                    limit: Some(1),
                    ..Default::default()
                })
                .into_iter()
                .next();
            ProjectSummary {
                name: project.name.clone(),
                repositories: project.repositories.clone(),
                branches: project.branches.clone(),
                has_secret: project.is_protected(),
                rate_limit: project.rate_limit,
                last_job_status: last.as_ref().map(|j| j.status),
                last_job_at: last.map(|j| j.queued_at.to_rfc3339()),
            }
        })
        .collect();

    Json(serde_json::json!({
        "projects": summaries,
        "count": summaries.len()
    }))
}
