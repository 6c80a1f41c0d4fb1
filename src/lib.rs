pub mod api;
pub mod auth;
pub mod classifier;
pub mod db;
pub mod dispatcher;
pub mod error;
pub mod job;
pub mod logging;
pub mod parsers;
pub mod project;
pub mod publisher;
pub mod rate_limit;
pub mod runner;
pub mod signature;
pub mod webhook;

use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::collections::HashSet;
use std::fs;
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Mutex;

use crate::auth::Authorizer;
use crate::classifier::Classifier;
use crate::db::SqlJobStore;
use crate::dispatcher::Dispatcher;
use crate::error::{HookError, Result};
use crate::job::{JobFilter, JobStore};
use crate::logging::LoggingConfig;
use crate::project::{Project, ProjectRegistry};
use crate::publisher::StatusPublisher;
use crate::rate_limit::RateLimiter;

pub const DEFAULT_BIND_ADDRESS: &str = "0.0.0.0:8001";

/// Top-level TOML configuration
#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub dispatcher: DispatcherConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub project: Vec<Project>,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ServerConfig {
    pub bind_address: String,
    /// Externally visible URLs of this service, reported by `/api/status`
    pub public_uri: Vec<String>,
    pub stream: StreamConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: DEFAULT_BIND_ADDRESS.to_string(),
            public_uri: Vec::new(),
            stream: StreamConfig::default(),
        }
    }
}

/// `[server.stream]`: the job status event stream
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct StreamConfig {
    pub enabled: bool,
    /// Only serve subscribers that arrive through a TLS-terminating proxy
    pub require_tls: bool,
    /// Events a subscriber may fall behind before it is dropped
    pub buffer: usize,
    /// Recent events replayed to each new subscriber
    pub replay: usize,
    /// Client addresses allowed to subscribe; empty allows any
    pub whitelist: Vec<IpAddr>,
    /// Shared key subscribers pass as `?key=` or `X-Auth-Key`
    pub auth_key: Option<String>,
    pub basic_auth: Option<BasicAuthConfig>,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            require_tls: false,
            buffer: 256,
            replay: 0,
            whitelist: Vec::new(),
            auth_key: None,
            basic_auth: None,
        }
    }
}

/// `[server.stream.basic_auth]`
#[derive(Deserialize, Clone)]
pub struct BasicAuthConfig {
    pub username: String,
    pub password: String,
}

impl std::fmt::Debug for BasicAuthConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BasicAuthConfig")
            .field("username", &self.username)
            .field("password", &"<REDACTED>")
            .finish()
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct DispatcherConfig {
    /// Jobs allowed to wait behind a running one, per project
    pub queue_depth: usize,
    pub timeout_secs: u64,
    /// Jobs kept in memory for the API
    pub history: usize,
    pub shell: String,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            queue_depth: 1,
            timeout_secs: 600,
            history: 100,
            shell: "sh".to_string(),
        }
    }
}

/// `[storage]`: optional SQLite archive of finished jobs
#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct StorageConfig {
    pub database: Option<PathBuf>,
}

impl AppConfig {
    /// Parse and validate a TOML document
    pub fn from_toml(source: &str) -> Result<Self> {
        let config: AppConfig = toml::from_str(source)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.project.is_empty() {
            return Err(HookError::Config("No [[project]] configured".into()));
        }
        let mut names = HashSet::new();
        for project in &self.project {
            if project.name.trim().is_empty() {
                return Err(HookError::Config("Project with empty name".into()));
            }
            if !names.insert(project.name.as_str()) {
                return Err(HookError::Config(format!(
                    "Duplicate project name '{}'",
                    project.name
                )));
            }
            if project.repositories.iter().all(|r| r.trim().is_empty()) {
                return Err(HookError::Config(format!(
                    "Project '{}' has no repositories",
                    project.name
                )));
            }
            if project.deploy.trim().is_empty() {
                return Err(HookError::Config(format!(
                    "Project '{}' has an empty deploy command",
                    project.name
                )));
            }
            if project.path.as_os_str().is_empty() {
                return Err(HookError::Config(format!(
                    "Project '{}' has an empty path",
                    project.name
                )));
            }
            if project.secret.as_deref().is_some_and(str::is_empty) {
                return Err(HookError::Config(format!(
                    "Project '{}' has an empty secret; remove it or set a value",
                    project.name
                )));
            }
        }
        if self.dispatcher.queue_depth == 0 {
            return Err(HookError::Config(
                "dispatcher.queue_depth must be at least 1".into(),
            ));
        }
        let stream = &self.server.stream;
        if stream.buffer == 0 {
            return Err(HookError::Config(
                "server.stream.buffer must be at least 1".into(),
            ));
        }
        if stream.auth_key.as_deref().is_some_and(str::is_empty) {
            return Err(HookError::Config(
                "server.stream.auth_key is empty; remove it or set a value".into(),
            ));
        }
        if stream
            .basic_auth
            .as_ref()
            .is_some_and(|auth| auth.username.is_empty() || auth.password.is_empty())
        {
            return Err(HookError::Config(
                "server.stream.basic_auth needs a username and a password".into(),
            ));
        }
        Ok(())
    }
}

/// Load and parse the configuration file
pub fn load_config(path: impl AsRef<Path>) -> Result<AppConfig> {
    let path = path.as_ref();
    let config_str = fs::read_to_string(path).map_err(|e| {
        HookError::Config(format!(
            "Failed to read config file '{}': {}",
            path.display(),
            e
        ))
    })?;
    AppConfig::from_toml(&config_str).map_err(|e| match e {
        HookError::TomlParse(e) => HookError::Config(format!(
            "Failed to parse config file '{}': {}",
            path.display(),
            e
        )),
        other => other,
    })
}

pub struct AppState {
    pub config: AppConfig,
    pub registry: Arc<ProjectRegistry>,
    pub classifier: Classifier,
    pub authorizer: Authorizer,
    pub dispatcher: Dispatcher,
    pub job_store: Arc<Mutex<JobStore>>,
    pub archive: Option<SqlJobStore>,
    pub publisher: Arc<StatusPublisher>,
    pub rate_limiter: Mutex<RateLimiter>,
    pub start_time: Instant,
    pub started_at: DateTime<Utc>,
}

impl AppState {
    /// Must be called within a tokio runtime; the dispatcher spawns tasks.
    pub fn new(config: AppConfig) -> Self {
        Self::with_archive(config, None)
    }

    pub fn with_archive(config: AppConfig, archive: Option<SqlJobStore>) -> Self {
        let registry = Arc::new(ProjectRegistry::new(config.project.clone()));
        let job_store = Arc::new(Mutex::new(JobStore::new(config.dispatcher.history)));
        let publisher = Arc::new(StatusPublisher::new(
            config.server.stream.buffer,
            config.server.stream.replay,
        ));
        let dispatcher = Dispatcher::new(
            &config.dispatcher,
            Arc::clone(&job_store),
            archive.clone(),
            Arc::clone(&publisher),
        );

        Self {
            authorizer: Authorizer::new(Arc::clone(&registry)),
            classifier: Classifier::default(),
            registry,
            dispatcher,
            job_store,
            archive,
            publisher,
            rate_limiter: Mutex::new(RateLimiter::new()),
            start_time: Instant::now(),
            started_at: Utc::now(),
            config,
        }
    }
}

impl AppState {
    /// Loads the most recent archived jobs into the in-memory history.
    /// Returns how many were restored.
    pub async fn restore_history(&self) -> Result<usize> {
        let Some(archive) = &self.archive else {
            return Ok(0);
        };
        let recent = archive
            .list_jobs(&JobFilter {
                limit: Some(self.config.dispatcher.history),
                ..Default::default()
            })
            .await?;

        let mut store = self.job_store.lock().await;
        let restored = recent.len();
        for job in recent.into_iter().rev() {
            store.insert(job);
        }
        Ok(restored)
    }
}

pub type SharedState = Arc<AppState>;

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
        [[project]]
        name = "site"
        repositories = ["https://github.com/example/repo.git"]
        deploy = "./deploy.sh"
        path = "/srv/site"
    "#;

    #[test]
    fn defaults_apply() {
        let config = AppConfig::from_toml(MINIMAL).unwrap();
        assert_eq!(config.server.bind_address, DEFAULT_BIND_ADDRESS);
        assert!(config.server.stream.enabled);
        assert_eq!(config.server.stream.buffer, 256);
        assert_eq!(config.dispatcher.queue_depth, 1);
        assert_eq!(config.dispatcher.timeout_secs, 600);
        assert_eq!(config.dispatcher.shell, "sh");
        assert!(config.project[0].branches.is_empty());
        assert!(config.project[0].secret.is_none());
    }

    #[test]
    fn full_config_parses() {
        let source = r#"
            [server]
            bind_address = "127.0.0.1:9000"
            public_uri = ["https://deploy.example.com"]

            [server.stream]
            require_tls = true
            replay = 10

            [dispatcher]
            queue_depth = 2
            timeout_secs = 60

            [logging]
            level = "debug"

            [[project]]
            name = "site"
            repositories = ["example/repo"]
            branches = ["main"]
            secret = "s3cr3t"
            deploy = "make deploy"
            path = "/srv/site"
            timeout_secs = 120
            rate_limit = { max = 10, window_secs = 60 }
        "#;
        let config = AppConfig::from_toml(source).unwrap();
        assert!(config.server.stream.require_tls);
        assert_eq!(config.server.stream.replay, 10);
        assert_eq!(config.dispatcher.queue_depth, 2);
        let project = &config.project[0];
        assert_eq!(project.secret(), Some("s3cr3t"));
        assert_eq!(project.rate_limit.unwrap().max, 10);
    }

    #[test]
    fn rejects_invalid_configs() {
        let no_projects = "[server]\nbind_address = \"0.0.0.0:1\"";
        assert!(matches!(
            AppConfig::from_toml(no_projects),
            Err(HookError::Config(_))
        ));

        let duplicate = format!("{MINIMAL}\n{MINIMAL}");
        assert!(matches!(
            AppConfig::from_toml(&duplicate),
            Err(HookError::Config(msg)) if msg.contains("Duplicate")
        ));

        let empty_secret = format!("{MINIMAL}secret = \"\"\n");
        assert!(matches!(
            AppConfig::from_toml(&empty_secret),
            Err(HookError::Config(msg)) if msg.contains("empty secret")
        ));

        let zero_depth = format!("[dispatcher]\nqueue_depth = 0\n{MINIMAL}");
        assert!(matches!(
            AppConfig::from_toml(&zero_depth),
            Err(HookError::Config(_))
        ));

        assert!(matches!(
            AppConfig::from_toml("[[project]]\nname = 1"),
            Err(HookError::TomlParse(_))
        ));
    }

    #[test]
    fn stream_access_settings_parse_and_validate() {
        let source = format!(
            r#"
            [server.stream]
            whitelist = ["127.0.0.1", "::1"]
            auth_key = "k3y"
            basic_auth = {{ username = "ops", password = "pa55" }}

            [storage]
            database = "data/jobs.db"
            {MINIMAL}"#
        );
        let config = AppConfig::from_toml(&source).unwrap();
        let stream = &config.server.stream;
        assert_eq!(stream.whitelist.len(), 2);
        assert_eq!(stream.auth_key.as_deref(), Some("k3y"));
        assert!(!format!("{:?}", stream.basic_auth).contains("pa55"));
        assert_eq!(
            config.storage.database.as_deref(),
            Some(Path::new("data/jobs.db"))
        );

        let empty_key = format!("[server.stream]\nauth_key = \"\"\n{MINIMAL}");
        assert!(matches!(
            AppConfig::from_toml(&empty_key),
            Err(HookError::Config(_))
        ));
        let empty_password = format!(
            "[server.stream.basic_auth]\nusername = \"ops\"\npassword = \"\"\n{MINIMAL}"
        );
        assert!(matches!(
            AppConfig::from_toml(&empty_password),
            Err(HookError::Config(_))
        ));
    }

    #[tokio::test]
    async fn restores_archived_jobs_into_history() {
        use crate::job::{Job, JobStatus};
        use crate::webhook::{CanonicalEvent, Provider};

        let dir = tempfile::tempdir().unwrap();
        let archive = SqlJobStore::new(db::init_db(dir.path().join("jobs.db")).await.unwrap());
        let event = CanonicalEvent::new(Provider::GitHub, vec!["example/repo".into()]);
        let mut ids = Vec::new();
        for _ in 0..3 {
            let mut job = Job::from_event("site", &event);
            job.mark_succeeded(String::new());
            archive.save_job(&job).await.unwrap();
            ids.push(job.id);
        }

        let mut config = AppConfig::from_toml(MINIMAL).unwrap();
        config.dispatcher.history = 2;
        let state = AppState::with_archive(config, Some(archive));
        assert_eq!(state.restore_history().await.unwrap(), 2);

        let store = state.job_store.lock().await;
        let listed: Vec<String> = store
            .list(&JobFilter::default())
            .into_iter()
            .map(|j| j.id)
            .collect();
        assert_eq!(listed, vec![ids[2].clone(), ids[1].clone()]);
        assert_eq!(store.counts().succeeded, 2);
        assert!(store.get(&ids[0]).is_none());
        drop(store);
        assert_eq!(
            state.archive.as_ref().unwrap().get_job(&ids[0]).await.unwrap().map(|j| j.status),
            Some(JobStatus::Succeeded)
        );
    }

    #[test]
    fn load_config_reports_missing_file() {
        let err = load_config("/nonexistent/hookdeploy.toml").unwrap_err();
        assert!(err.to_string().contains("Failed to read config file"));
    }
}
