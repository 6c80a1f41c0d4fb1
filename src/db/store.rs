use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::{FromRow, SqlitePool};

use crate::error::HookError;
use crate::job::{Job, JobFilter, JobStatus};

const JOB_COLUMNS: &str = "id, project_name, provider, repository, git_ref, branch, \
     commit_sha, commit_message, pusher, status, queued_at, started_at, completed_at, \
     output, output_truncated, error";

/// Finished jobs kept in SQLite so history outlives a restart
#[derive(Clone)]
pub struct SqlJobStore {
    pool: SqlitePool,
}

fn timestamp(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

impl SqlJobStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Insert a job, or overwrite the stored copy with the same id
    pub async fn save_job(&self, job: &Job) -> Result<(), HookError> {
        sqlx::query(&format!(
            "INSERT OR REPLACE INTO jobs ({JOB_COLUMNS}) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"
        ))
        .bind(&job.id)
        .bind(&job.project_name)
        .bind(&job.provider)
        .bind(&job.repository)
        .bind(&job.git_ref)
        .bind(&job.branch)
        .bind(&job.commit_sha)
        .bind(&job.commit_message)
        .bind(&job.pusher)
        .bind(job.status.as_str())
        .bind(timestamp(&job.queued_at))
        .bind(job.started_at.as_ref().map(timestamp))
        .bind(job.completed_at.as_ref().map(timestamp))
        .bind(&job.output)
        .bind(job.output_truncated)
        .bind(&job.error)
        .execute(&self.pool)
        .await
        .map_err(|e| HookError::Database(format!("Failed to save job: {}", e)))?;

        Ok(())
    }

    /// Get a job by ID
    pub async fn get_job(&self, id: &str) -> Result<Option<Job>, HookError> {
        let row = sqlx::query_as::<_, JobRow>(&format!(
            "SELECT {JOB_COLUMNS} FROM jobs WHERE id = ?"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| HookError::Database(format!("Failed to fetch job: {}", e)))?;

        Ok(row.map(Job::from))
    }

    /// Newest first. Job ids are UUIDv7, so id order is creation order.
    pub async fn list_jobs(&self, filter: &JobFilter) -> Result<Vec<Job>, HookError> {
        let limit = filter
            .limit
            .map(|l| i64::try_from(l).unwrap_or(i64::MAX))
            .unwrap_or(-1);

        let rows = sqlx::query_as::<_, JobRow>(&format!(
            "SELECT {JOB_COLUMNS} FROM jobs \
             WHERE (?1 IS NULL OR project_name = ?1) AND (?2 IS NULL OR status = ?2) \
             ORDER BY id DESC LIMIT ?3"
        ))
        .bind(filter.project.as_deref())
        .bind(filter.status.map(JobStatus::as_str))
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| HookError::Database(format!("Failed to list jobs: {}", e)))?;

        Ok(rows.into_iter().map(Job::from).collect())
    }
}

// Helper struct to map DB row to Job struct
#[derive(FromRow)]
struct JobRow {
    id: String,
    project_name: String,
    provider: String,
    repository: String,
    git_ref: Option<String>,
    branch: Option<String>,
    commit_sha: Option<String>,
    commit_message: Option<String>,
    pusher: Option<String>,
    status: String,
    queued_at: String,
    started_at: Option<String>,
    completed_at: Option<String>,
    output: Option<String>,
    output_truncated: bool,
    error: Option<String>,
}

fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .ok()
}

impl From<JobRow> for Job {
    fn from(row: JobRow) -> Self {
        Job {
            id: row.id,
            project_name: row.project_name,
            provider: row.provider,
            repository: row.repository,
            git_ref: row.git_ref,
            branch: row.branch,
            commit_sha: row.commit_sha,
            commit_message: row.commit_message,
            pusher: row.pusher,
            // rows are only written by save_job
            status: row.status.parse().unwrap_or(JobStatus::Failed),
            queued_at: parse_timestamp(&row.queued_at).unwrap_or_else(Utc::now),
            started_at: row.started_at.as_deref().and_then(parse_timestamp),
            completed_at: row.completed_at.as_deref().and_then(parse_timestamp),
            output: row.output,
            output_truncated: row.output_truncated,
            error: row.error,
        }
    }
}
