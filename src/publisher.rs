//! Job status fan-out to live subscribers

use std::collections::VecDeque;
use std::sync::Mutex;

use chrono::Utc;
use serde::Serialize;
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_stream::{Stream, StreamExt};
use tracing::warn;

use crate::job::{Job, JobStatus};

/// Job event for SSE broadcasting
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct JobEvent {
    pub job_id: String,
    pub project: String,
    #[serde(rename = "ref")]
    pub git_ref: Option<String>,
    pub commit: Option<String>,
    pub state: JobStatus,
    pub timestamp: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl JobEvent {
    /// Snapshot of a job's current state
    pub fn from_job(job: &Job) -> Self {
        Self {
            job_id: job.id.clone(),
            project: job.project_name.clone(),
            git_ref: job.git_ref.clone(),
            commit: job.commit_sha.clone(),
            state: job.status,
            timestamp: Utc::now().to_rfc3339(),
            output: job.output.clone(),
            error: job.error.clone(),
        }
    }
}

/// Broadcasts job transitions. Publishing never waits on subscribers;
/// one that falls more than `buffer` events behind is dropped.
#[derive(Debug)]
pub struct StatusPublisher {
    sender: broadcast::Sender<JobEvent>,
    replay: Mutex<VecDeque<JobEvent>>,
    replay_len: usize,
}

/// Events a new subscriber starts with, followed by live ones
#[derive(Debug)]
pub struct Subscription {
    pub replay: Vec<JobEvent>,
    pub receiver: broadcast::Receiver<JobEvent>,
}

impl Subscription {
    /// Replayed events, then live events until the subscriber lags or the
    /// publisher goes away.
    pub fn into_stream(self) -> impl Stream<Item = JobEvent> + Send + 'static {
        let live = BroadcastStream::new(self.receiver).map_while(|result| match result {
            Ok(event) => Some(event),
            Err(BroadcastStreamRecvError::Lagged(missed)) => {
                warn!("Dropping status subscriber that missed {} events", missed);
                None
            }
        });
        tokio_stream::iter(self.replay).chain(live)
    }
}

impl StatusPublisher {
    pub fn new(buffer: usize, replay: usize) -> Self {
        let (sender, _) = broadcast::channel(buffer.max(1));
        Self {
            sender,
            replay: Mutex::new(VecDeque::with_capacity(replay)),
            replay_len: replay,
        }
    }

    pub fn publish(&self, event: JobEvent) {
        // The replay lock also orders sends, so a subscriber registered
        // under it sees each event exactly once.
        let mut replay = self.replay.lock().unwrap_or_else(|e| e.into_inner());
        if self.replay_len > 0 {
            if replay.len() == self.replay_len {
                replay.pop_front();
            }
            replay.push_back(event.clone());
        }
        // Err only means nobody is listening
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> Subscription {
        let replay = self.replay.lock().unwrap_or_else(|e| e.into_inner());
        Subscription {
            replay: replay.iter().cloned().collect(),
            receiver: self.sender.subscribe(),
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}
