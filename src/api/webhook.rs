//! Webhook handler for every supported provider

use axum::{
    Json,
    body::Bytes,
    extract::State as AxumState,
    http::{HeaderMap, StatusCode},
};
use serde_json::{Value, json};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::SharedState;
use crate::auth::AuthorizationVerdict;
use crate::error::WebhookError;
use crate::webhook::InboundRequest;

/// POST /webhook - classify, authorize, then queue one deploy per
/// authorized project. Responds as soon as the jobs are queued.
pub async fn handle_webhook(
    AxumState(state): AxumState<SharedState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<(StatusCode, Json<Value>), WebhookError> {
    let request = InboundRequest::new(headers, body);

    let event = state
        .classifier
        .route(&request, &state.registry)
        .inspect_err(log_rejection)?;
    debug!("{:#?}", &event);

    let projects = match state.authorizer.authorize(&event, &request.body) {
        AuthorizationVerdict::Authorized(projects) => projects,
        AuthorizationVerdict::Rejected(reason) => {
            return Err(WebhookError::AuthorizationRejected(reason));
        }
        AuthorizationVerdict::NoMatch => {
            info!(
                "No matching project for repo '{}' and ref {:?}, skipping.",
                event.primary_repository(),
                event.git_ref
            );
            return Err(WebhookError::NoMatchingProject);
        }
    };

    // check rate limits after authorization so strangers cannot spend a
    // project's budget
    let mut allowed = Vec::with_capacity(projects.len());
    let mut limited = None;
    {
        let mut rate_limiter = state.rate_limiter.lock().await;
        for project in projects {
            if let Some(limit) = project.rate_limit {
                if rate_limiter.check_rate_limit(&project.name, limit) {
                    warn!(
                        "Too many requests for project {:?} - {:?} requests per {:?} seconds",
                        &project.name, limit.max, limit.window_secs
                    );
                    limited.get_or_insert_with(|| project.name.clone());
                    continue;
                }
            }
            allowed.push(project);
        }
    }
    if allowed.is_empty() {
        return Err(WebhookError::RateLimited(limited.unwrap_or_default()));
    }

    let event = Arc::new(event);
    let mut job_ids = Vec::with_capacity(allowed.len());
    for project in allowed {
        let handle = state.dispatcher.dispatch(project, Arc::clone(&event)).await;
        job_ids.push(handle.id);
    }

    Ok((
        StatusCode::ACCEPTED,
        Json(json!({ "status": "accepted", "jobs": job_ids })),
    ))
}

fn log_rejection(err: &WebhookError) {
    match err {
        WebhookError::MalformedPayload(msg) => warn!("Malformed webhook payload: {}", msg),
        WebhookError::UnsupportedEvent(event) => info!("Ignoring {:?} event", event),
        // logged where they are detected
        _ => {}
    }
}
