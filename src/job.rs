use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use uuid::Uuid;

use crate::webhook::CanonicalEvent;

/// Maximum size for job output before truncation (1MB)
pub const MAX_OUTPUT_SIZE: usize = 1024 * 1024;

/// Lifecycle state of a deploy job
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Queued,
    Running,
    Succeeded,
    Failed,
    /// Displaced from a full queue by a newer trigger; never ran
    Superseded,
}

impl JobStatus {
    pub const ALL: [JobStatus; 5] = [
        JobStatus::Queued,
        JobStatus::Running,
        JobStatus::Succeeded,
        JobStatus::Failed,
        JobStatus::Superseded,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Running => "running",
            JobStatus::Succeeded => "succeeded",
            JobStatus::Failed => "failed",
            JobStatus::Superseded => "superseded",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobStatus::Succeeded | JobStatus::Failed | JobStatus::Superseded
        )
    }
}

impl std::str::FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        JobStatus::ALL
            .into_iter()
            .find(|status| status.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| {
                "Invalid status. Use: queued, running, succeeded, failed, superseded".to_string()
            })
    }
}

/// One execution of a project's deploy command
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: String,
    pub project_name: String,
    pub provider: String,
    pub repository: String,
    pub git_ref: Option<String>,
    pub branch: Option<String>,
    pub commit_sha: Option<String>,
    pub commit_message: Option<String>,
    pub pusher: Option<String>,
    pub status: JobStatus,
    pub queued_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub output: Option<String>,
    pub output_truncated: bool,
    pub error: Option<String>,
}

impl Job {
    /// Create a new job in Queued status for an authorized event
    pub fn from_event(project_name: &str, event: &CanonicalEvent) -> Self {
        Self {
            id: Uuid::now_v7().to_string(),
            project_name: project_name.to_string(),
            provider: event.provider.to_string(),
            repository: event.primary_repository().to_string(),
            git_ref: event.git_ref.clone(),
            branch: event.branch().map(String::from),
            commit_sha: event.commit.clone(),
            commit_message: event.commit_message.clone(),
            pusher: event.pusher.clone(),
            status: JobStatus::Queued,
            queued_at: Utc::now(),
            started_at: None,
            completed_at: None,
            output: None,
            output_truncated: false,
            error: None,
        }
    }

    pub fn mark_running(&mut self) {
        self.status = JobStatus::Running;
        self.started_at = Some(Utc::now());
    }

    /// Mark job as successful with output (truncates if too large)
    pub fn mark_succeeded(&mut self, output: String) {
        self.status = JobStatus::Succeeded;
        self.completed_at = Some(Utc::now());
        self.set_output(output);
    }

    /// Mark job as failed with error and whatever output was captured
    pub fn mark_failed(&mut self, error: String, output: Option<String>) {
        self.status = JobStatus::Failed;
        self.completed_at = Some(Utc::now());
        self.error = Some(error);
        if let Some(output) = output {
            self.set_output(output);
        }
    }

    pub fn mark_superseded(&mut self) {
        self.status = JobStatus::Superseded;
        self.completed_at = Some(Utc::now());
    }

    fn set_output(&mut self, mut output: String) {
        if output.len() > MAX_OUTPUT_SIZE {
            let mut end = MAX_OUTPUT_SIZE;
            while !output.is_char_boundary(end) {
                end -= 1;
            }
            output.truncate(end);
            output.push_str("\n... (output truncated)");
            self.output_truncated = true;
        }
        self.output = Some(output);
    }
}

/// Filters for [`JobStore::list`]
#[derive(Debug, Default, Clone)]
pub struct JobFilter {
    pub project: Option<String>,
    pub status: Option<JobStatus>,
    pub limit: Option<usize>,
}

/// Job counts by status
#[derive(Debug, Default, Clone, Copy, Serialize, PartialEq, Eq)]
pub struct JobCounts {
    pub queued: usize,
    pub running: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub superseded: usize,
}

impl JobCounts {
    pub fn total(&self) -> usize {
        self.queued + self.running + self.succeeded + self.failed + self.superseded
    }
}

/// Bounded in-memory job history, oldest first.
#[derive(Debug)]
pub struct JobStore {
    jobs: VecDeque<Job>,
    capacity: usize,
}

impl JobStore {
    pub fn new(capacity: usize) -> Self {
        Self {
            jobs: VecDeque::with_capacity(capacity),
            capacity: capacity.max(1),
        }
    }

    /// Adds a job, evicting the oldest finished jobs when over capacity.
    /// Queued and running jobs are never evicted, so the store may grow
    /// past capacity while they are all live.
    pub fn insert(&mut self, job: Job) {
        self.jobs.push_back(job);
        while self.jobs.len() > self.capacity {
            match self.jobs.iter().position(|j| j.status.is_terminal()) {
                Some(idx) => {
                    self.jobs.remove(idx);
                }
                None => break,
            }
        }
    }

    /// Replaces the stored copy of a job. Returns false if it was evicted.
    pub fn update(&mut self, job: &Job) -> bool {
        match self.jobs.iter_mut().find(|j| j.id == job.id) {
            Some(slot) => {
                *slot = job.clone();
                true
            }
            None => false,
        }
    }

    pub fn get(&self, id: &str) -> Option<Job> {
        self.jobs.iter().find(|j| j.id == id).cloned()
    }

    /// Most recent first
    pub fn list(&self, filter: &JobFilter) -> Vec<Job> {
        let matching = self
            .jobs
            .iter()
            .rev()
            .filter(|j| filter.project.as_deref().is_none_or(|p| j.project_name == p))
            .filter(|j| filter.status.is_none_or(|s| j.status == s))
            .cloned();
        match filter.limit {
            Some(limit) => matching.take(limit).collect(),
            None => matching.collect(),
        }
    }

    pub fn counts(&self) -> JobCounts {
        let mut counts = JobCounts::default();
        for job in &self.jobs {
            match job.status {
                JobStatus::Queued => counts.queued += 1,
                JobStatus::Running => counts.running += 1,
                JobStatus::Succeeded => counts.succeeded += 1,
                JobStatus::Failed => counts.failed += 1,
                JobStatus::Superseded => counts.superseded += 1,
            }
        }
        counts
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }
}
