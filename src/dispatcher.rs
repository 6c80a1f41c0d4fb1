//! Per-project deploy queues.
//!
//! Each project gets a lane: a short FIFO of waiting jobs and at most one
//! worker task draining it. Jobs for one project run one at a time and in
//! arrival order; different projects run concurrently. When a lane's queue
//! is full, the oldest waiting job is superseded by the newest trigger, so a
//! burst of pushes collapses into one deploy of the latest commit.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use tokio::sync::Mutex;
use tracing::{error, info, warn};

use crate::DispatcherConfig;
use crate::db::SqlJobStore;
use crate::job::{Job, JobStore};
use crate::project::Project;
use crate::publisher::{JobEvent, StatusPublisher};
use crate::runner::ShellRunner;
use crate::error::DeployError;
use crate::webhook::CanonicalEvent;

/// Identifies a job created by [`Dispatcher::dispatch`]
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct JobHandle {
    pub id: String,
    pub project: String,
}

struct Pending {
    job: Job,
    project: Arc<Project>,
    event: Arc<CanonicalEvent>,
}

#[derive(Default)]
struct LaneState {
    queue: VecDeque<Pending>,
    /// A worker task owns this lane
    running: bool,
}

#[derive(Default)]
struct Lane {
    state: StdMutex<LaneState>,
}

struct Inner {
    lanes: StdMutex<HashMap<String, Arc<Lane>>>,
    queue_depth: usize,
    default_timeout: Duration,
    runner: ShellRunner,
    jobs: Arc<Mutex<JobStore>>,
    archive: Option<SqlJobStore>,
    publisher: Arc<StatusPublisher>,
}

#[derive(Clone)]
pub struct Dispatcher {
    inner: Arc<Inner>,
}

impl Dispatcher {
    /// Finished jobs are also written to `archive` when one is given.
    pub fn new(
        config: &DispatcherConfig,
        jobs: Arc<Mutex<JobStore>>,
        archive: Option<SqlJobStore>,
        publisher: Arc<StatusPublisher>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                lanes: StdMutex::new(HashMap::new()),
                queue_depth: config.queue_depth.max(1),
                default_timeout: Duration::from_secs(config.timeout_secs),
                runner: ShellRunner::new(config.shell.clone()),
                jobs,
                archive,
                publisher,
            }),
        }
    }

    /// Queues a deploy of `project` for `event` and returns immediately.
    pub async fn dispatch(&self, project: Arc<Project>, event: Arc<CanonicalEvent>) -> JobHandle {
        let job = Job::from_event(&project.name, &event);
        let handle = JobHandle {
            id: job.id.clone(),
            project: project.name.clone(),
        };

        self.inner.jobs.lock().await.insert(job.clone());
        self.inner.publisher.publish(JobEvent::from_job(&job));
        info!(
            "Queued job {} for project '{}' ref {:?}",
            job.id, project.name, job.git_ref
        );

        let lane = self.inner.lane(&project.name);
        let (spawn_worker, displaced) = {
            let mut state = lane.state.lock().unwrap_or_else(|e| e.into_inner());
            let displaced = if state.queue.len() >= self.inner.queue_depth {
                state.queue.pop_front()
            } else {
                None
            };
            state.queue.push_back(Pending {
                job,
                project,
                event,
            });
            let spawn_worker = !state.running;
            state.running = true;
            (spawn_worker, displaced)
        };

        if let Some(mut pending) = displaced {
            pending.job.mark_superseded();
            info!(
                "Job {} superseded by {} for project '{}'",
                pending.job.id, handle.id, handle.project
            );
            self.inner.record(&pending.job).await;
        }

        if spawn_worker {
            let inner = Arc::clone(&self.inner);
            tokio::spawn(async move { inner.drain(lane).await });
        }

        handle
    }

    /// Number of jobs waiting (not running) for a project
    pub fn pending(&self, project: &str) -> usize {
        let lanes = self.inner.lanes.lock().unwrap_or_else(|e| e.into_inner());
        lanes
            .get(project)
            .map(|lane| lane.state.lock().unwrap_or_else(|e| e.into_inner()).queue.len())
            .unwrap_or(0)
    }
}

impl Inner {
    fn lane(&self, project: &str) -> Arc<Lane> {
        let mut lanes = self.lanes.lock().unwrap_or_else(|e| e.into_inner());
        Arc::clone(lanes.entry(project.to_string()).or_default())
    }

    async fn record(&self, job: &Job) {
        if !self.jobs.lock().await.update(job) {
            warn!("Job {} was evicted from history before it finished", job.id);
        }
        if let Some(archive) = self.archive.as_ref().filter(|_| job.status.is_terminal()) {
            if let Err(e) = archive.save_job(job).await {
                error!("Failed to archive job {}: {}", job.id, e);
            }
        }
        self.publisher.publish(JobEvent::from_job(job));
    }

    async fn drain(self: Arc<Self>, lane: Arc<Lane>) {
        loop {
            let next = {
                let mut state = lane.state.lock().unwrap_or_else(|e| e.into_inner());
                match state.queue.pop_front() {
                    Some(pending) => pending,
                    None => {
                        state.running = false;
                        return;
                    }
                }
            };
            self.execute(next).await;
        }
    }

    async fn execute(&self, pending: Pending) {
        let Pending {
            mut job,
            project,
            event,
        } = pending;

        job.mark_running();
        self.record(&job).await;
        info!(
            "Job {} - deploying project '{}' at {:?}",
            job.id, project.name, job.commit_sha
        );

        let env = deploy_env(&project, &event);
        let result = self
            .runner
            .run(
                &project.deploy,
                &project.path,
                &env,
                project.timeout(self.default_timeout),
            )
            .await;

        match result {
            Ok(output) => {
                info!("Job {} completed successfully.", job.id);
                job.mark_succeeded(output);
            }
            Err(e) => {
                error!("Job {} failed: {}", job.id, e);
                let output = match e {
                    DeployError::NonZeroExit { ref output, .. } => Some(output.clone()),
                    _ => None,
                };
                job.mark_failed(e.to_string(), output);
            }
        }
        self.record(&job).await;
    }
}

/// Environment handed to the deploy command. Unknown values are left unset.
fn deploy_env(project: &Project, event: &CanonicalEvent) -> Vec<(String, String)> {
    let mut env = vec![
        ("DEPLOY_PROJECT".to_string(), project.name.clone()),
        ("DEPLOY_PROVIDER".to_string(), event.provider.to_string()),
        (
            "DEPLOY_REPOSITORY".to_string(),
            event.primary_repository().to_string(),
        ),
    ];
    let optional = [
        ("DEPLOY_REF", event.git_ref.as_deref()),
        ("DEPLOY_BRANCH", event.branch()),
        ("DEPLOY_COMMIT", event.commit.as_deref()),
        ("DEPLOY_PUSHER", event.pusher.as_deref()),
        ("DEPLOY_COMMIT_MESSAGE", event.commit_message.as_deref()),
    ];
    for (key, value) in optional {
        if let Some(value) = value {
            env.push((key.to_string(), value.to_string()));
        }
    }
    env
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::JobStatus;
    use crate::project::test_project;
    use crate::webhook::Provider;
    use tokio_stream::StreamExt;

    struct Harness {
        dispatcher: Dispatcher,
        jobs: Arc<Mutex<JobStore>>,
        publisher: Arc<StatusPublisher>,
    }

    fn harness(queue_depth: usize) -> Harness {
        let jobs = Arc::new(Mutex::new(JobStore::new(100)));
        let publisher = Arc::new(StatusPublisher::new(256, 0));
        let config = DispatcherConfig {
            queue_depth,
            timeout_secs: 10,
            ..Default::default()
        };
        Harness {
            dispatcher: Dispatcher::new(&config, Arc::clone(&jobs), None, Arc::clone(&publisher)),
            jobs,
            publisher,
        }
    }

    fn project(dir: &std::path::Path, deploy: &str) -> Arc<Project> {
        named_project("site", dir, deploy)
    }

    fn named_project(name: &str, dir: &std::path::Path, deploy: &str) -> Arc<Project> {
        let mut project = test_project(name, "example/repo");
        project.path = dir.to_path_buf();
        project.deploy = deploy.to_string();
        Arc::new(project)
    }

    fn event(commit: &str) -> Arc<CanonicalEvent> {
        let mut event = CanonicalEvent::new(Provider::GitHub, vec!["example/repo".into()]);
        event.git_ref = Some("refs/heads/main".into());
        event.commit = Some(commit.to_string());
        Arc::new(event)
    }

    /// Collects events until `terminal` jobs have finished
    async fn collect_until(
        stream: &mut (impl tokio_stream::Stream<Item = JobEvent> + Unpin),
        terminal: usize,
    ) -> Vec<JobEvent> {
        let mut events = Vec::new();
        let mut done = 0;
        while done < terminal {
            let event = tokio::time::timeout(Duration::from_secs(10), stream.next())
                .await
                .expect("timed out waiting for job events")
                .expect("publisher closed");
            if event.state.is_terminal() {
                done += 1;
            }
            events.push(event);
        }
        events
    }

    #[tokio::test]
    async fn job_runs_in_project_directory() {
        let dir = tempfile::tempdir().unwrap();
        let h = harness(1);
        let mut stream = Box::pin(h.publisher.subscribe().into_stream());

        let handle = h
            .dispatcher
            .dispatch(project(dir.path(), "echo \"$DEPLOY_COMMIT\" > deployed"), event("abc"))
            .await;
        let events = collect_until(&mut stream, 1).await;

        let states: Vec<JobStatus> = events.iter().map(|e| e.state).collect();
        assert_eq!(
            states,
            vec![JobStatus::Queued, JobStatus::Running, JobStatus::Succeeded]
        );
        assert!(events.iter().all(|e| e.job_id == handle.id));
        let deployed = std::fs::read_to_string(dir.path().join("deployed")).unwrap();
        assert_eq!(deployed.trim(), "abc");
        assert_eq!(
            h.jobs.lock().await.get(&handle.id).unwrap().status,
            JobStatus::Succeeded
        );
    }

    #[tokio::test]
    async fn burst_while_running_coalesces_to_latest() {
        let dir = tempfile::tempdir().unwrap();
        let h = harness(1);
        let mut stream = Box::pin(h.publisher.subscribe().into_stream());
        let project = project(dir.path(), "echo \"$DEPLOY_COMMIT\" >> runs; sleep 0.3");

        let first = h.dispatcher.dispatch(Arc::clone(&project), event("a")).await;
        // wait until the first job is running
        loop {
            let e = stream.next().await.unwrap();
            if e.job_id == first.id && e.state == JobStatus::Running {
                break;
            }
        }
        let second = h.dispatcher.dispatch(Arc::clone(&project), event("b")).await;
        let third = h.dispatcher.dispatch(Arc::clone(&project), event("c")).await;

        // first and third finish, second is superseded
        let events = collect_until(&mut stream, 3).await;
        let final_state = |id: &str| {
            events
                .iter()
                .filter(|e| e.job_id == id)
                .last()
                .map(|e| e.state)
        };
        assert_eq!(final_state(&first.id), Some(JobStatus::Succeeded));
        assert_eq!(final_state(&second.id), Some(JobStatus::Superseded));
        assert_eq!(final_state(&third.id), Some(JobStatus::Succeeded));
        assert!(
            !events
                .iter()
                .any(|e| e.job_id == second.id && e.state == JobStatus::Running)
        );

        let runs = std::fs::read_to_string(dir.path().join("runs")).unwrap();
        assert_eq!(runs.lines().collect::<Vec<_>>(), vec!["a", "c"]);
    }

    #[tokio::test]
    async fn failures_are_recorded_and_lane_keeps_draining() {
        let dir = tempfile::tempdir().unwrap();
        let h = harness(4);
        let mut stream = Box::pin(h.publisher.subscribe().into_stream());
        let failing = project(dir.path(), "echo oops; exit 1");

        let a = h.dispatcher.dispatch(Arc::clone(&failing), event("a")).await;
        let b = h.dispatcher.dispatch(failing, event("b")).await;
        let events = collect_until(&mut stream, 2).await;

        let terminal: Vec<&JobEvent> = events.iter().filter(|e| e.state.is_terminal()).collect();
        assert_eq!(terminal[0].job_id, a.id);
        assert_eq!(terminal[1].job_id, b.id);
        assert!(terminal.iter().all(|e| e.state == JobStatus::Failed));
        assert_eq!(terminal[0].output.as_deref().map(str::trim), Some("oops"));

        let stored = h.jobs.lock().await.get(&a.id).unwrap();
        assert!(stored.error.unwrap().contains("code 1"));
        assert_eq!(h.dispatcher.pending("site"), 0);
    }

    #[tokio::test]
    async fn timed_out_job_is_failed_and_its_children_are_killed() {
        let dir = tempfile::tempdir().unwrap();
        let h = harness(1);
        let mut stream = Box::pin(h.publisher.subscribe().into_stream());
        let mut slow = test_project("site", "example/repo");
        slow.path = dir.path().to_path_buf();
        slow.deploy = "true; sh -c 'sleep 2; echo late > after_timeout'".into();
        slow.timeout_secs = Some(1);

        let handle = h.dispatcher.dispatch(Arc::new(slow), event("a")).await;
        let events = collect_until(&mut stream, 1).await;

        let last = events.last().unwrap();
        assert_eq!(last.job_id, handle.id);
        assert_eq!(last.state, JobStatus::Failed);
        assert!(last.error.as_deref().is_some_and(|e| e.contains("timed out")));
        let stored = h.jobs.lock().await.get(&handle.id).unwrap();
        assert_eq!(stored.status, JobStatus::Failed);
        assert!(stored.error.unwrap().contains("timed out after 1s"));

        tokio::time::sleep(Duration::from_millis(2500)).await;
        assert!(!dir.path().join("after_timeout").exists());
    }

    #[tokio::test]
    async fn different_projects_run_concurrently() {
        let dir = tempfile::tempdir().unwrap();
        let h = harness(1);
        let mut stream = Box::pin(h.publisher.subscribe().into_stream());
        // each side only succeeds if it sees the other one start
        let waits_for = |mine: &str, theirs: &str| {
            format!(
                "touch {mine}; i=0; while [ ! -e {theirs} ] && [ $i -lt 50 ]; \
                 do sleep 0.1; i=$((i+1)); done; test -e {theirs}"
            )
        };

        let a = h
            .dispatcher
            .dispatch(named_project("alpha", dir.path(), &waits_for("a", "b")), event("a"))
            .await;
        let b = h
            .dispatcher
            .dispatch(named_project("beta", dir.path(), &waits_for("b", "a")), event("b"))
            .await;
        let events = collect_until(&mut stream, 2).await;

        for handle in [&a, &b] {
            let last = events.iter().filter(|e| e.job_id == handle.id).last().unwrap();
            assert_eq!(last.state, JobStatus::Succeeded, "project {}", handle.project);
        }
    }

    #[tokio::test]
    async fn finished_jobs_are_archived() {
        let dir = tempfile::tempdir().unwrap();
        let pool = crate::db::init_db(dir.path().join("jobs.db")).await.unwrap();
        let archive = SqlJobStore::new(pool);
        let jobs = Arc::new(Mutex::new(JobStore::new(10)));
        let publisher = Arc::new(StatusPublisher::new(64, 0));
        let dispatcher = Dispatcher::new(
            &DispatcherConfig::default(),
            jobs,
            Some(archive.clone()),
            Arc::clone(&publisher),
        );
        let mut stream = Box::pin(publisher.subscribe().into_stream());

        let handle = dispatcher.dispatch(project(dir.path(), "echo hi"), event("a")).await;
        collect_until(&mut stream, 1).await;

        let archived = archive.get_job(&handle.id).await.unwrap().unwrap();
        assert_eq!(archived.status, JobStatus::Succeeded);
        assert_eq!(archived.output.as_deref().map(str::trim), Some("hi"));
    }

    #[test]
    fn env_omits_unknown_values() {
        let project = test_project("site", "example/repo");
        let mut event = CanonicalEvent::new(Provider::GenericJson, vec!["example/repo".into()]);
        event.git_ref = Some("refs/heads/main".into());
        let env = deploy_env(&project, &event);
        let keys: Vec<&str> = env.iter().map(|(k, _)| k.as_str()).collect();
        assert!(keys.contains(&"DEPLOY_BRANCH"));
        assert!(!keys.contains(&"DEPLOY_COMMIT"));
        assert!(env.contains(&("DEPLOY_PROVIDER".to_string(), "generic-json".to_string())));
    }
}
