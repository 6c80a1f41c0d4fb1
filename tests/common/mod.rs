//! Shared fixtures for the HTTP-level tests

use axum::Router;
use axum::body::Body;
use axum::http::{Request, Response, StatusCode};
use hookdeploy::job::JobStatus;
use hookdeploy::publisher::JobEvent;
use hookdeploy::{AppConfig, AppState, SharedState, api};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio_stream::{Stream, StreamExt};
use tower::ServiceExt;

pub struct TestApp {
    pub state: SharedState,
    pub router: Router,
}

impl TestApp {
    /// Builds the app from a TOML document
    pub fn from_toml(source: &str) -> Self {
        let config = AppConfig::from_toml(source).expect("test config is valid");
        let state = Arc::new(AppState::new(config));
        let router = api::router(Arc::clone(&state));
        Self { state, router }
    }

    pub async fn send(&self, request: Request<Body>) -> (StatusCode, String) {
        let response: Response<Body> = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, String::from_utf8(bytes.to_vec()).unwrap())
    }

    #[allow(dead_code)]
    pub async fn get(&self, uri: &str) -> (StatusCode, String) {
        self.send(Request::get(uri).body(Body::empty()).unwrap())
            .await
    }

    #[allow(dead_code)]
    pub async fn job_count(&self) -> usize {
        self.state.job_store.lock().await.len()
    }
}

/// One `[[project]]` table deploying into `dir`
#[allow(dead_code)]
pub fn project_toml(name: &str, dir: &Path, deploy: &str, extra: &str) -> String {
    format!(
        r#"
[[project]]
name = "{name}"
repositories = ["example/repo"]
deploy = '{deploy}'
path = '{}'
{extra}
"#,
        dir.display()
    )
}

#[allow(dead_code)]
pub fn post(headers: &[(&str, &str)], body: impl Into<Body>) -> Request<Body> {
    let mut builder = Request::post("/webhook");
    for (name, value) in headers {
        builder = builder.header(*name, *value);
    }
    builder.body(body.into()).unwrap()
}

/// Waits for `count` jobs to reach a terminal state
#[allow(dead_code)]
pub async fn wait_for_terminal(
    stream: &mut (impl Stream<Item = JobEvent> + Unpin),
    count: usize,
) -> Vec<JobEvent> {
    let mut events = Vec::new();
    let mut done = 0;
    while done < count {
        let event = tokio::time::timeout(Duration::from_secs(10), stream.next())
            .await
            .expect("timed out waiting for job events")
            .expect("publisher closed");
        if matches!(
            event.state,
            JobStatus::Succeeded | JobStatus::Failed | JobStatus::Superseded
        ) {
            done += 1;
        }
        events.push(event);
    }
    events
}
