use std::io;
use std::time::Duration;

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;

/// Startup-level errors (configuration and IO)
#[derive(Debug, thiserror::Error)]
pub enum HookError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("TOML parsing error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("Database error: {0}")]
    Database(String),
}

/// Helper type for Results that use HookError
pub type Result<T> = std::result::Result<T, HookError>;

/// Failure of a provider parser on a request it claimed
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    #[error("malformed payload: {0}")]
    MalformedPayload(String),

    #[error("unsupported event '{0}'")]
    UnsupportedEvent(String),
}

/// Why an event was refused by the authorizer or the bypass guard
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    /// A matching project has a secret but the request carried no credential
    MissingCredential,
    /// A credential was present but validated against none of the candidates
    InvalidCredential,
    /// A generic (unsigned) source named a repository with a protected project
    GenericSource,
}

impl std::fmt::Display for RejectReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            RejectReason::MissingCredential => "missing signature or token",
            RejectReason::InvalidCredential => "signature or token mismatch",
            RejectReason::GenericSource => "unsigned source for protected repository",
        };
        f.write_str(s)
    }
}

/// Per-request outcome that ends webhook handling without a deployment
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WebhookError {
    #[error("unrecognized source")]
    UnrecognizedSource,

    #[error("malformed payload: {0}")]
    MalformedPayload(String),

    #[error("ignored event '{0}'")]
    UnsupportedEvent(String),

    #[error("authorization rejected: {0}")]
    AuthorizationRejected(RejectReason),

    #[error("no matching project")]
    NoMatchingProject,

    #[error("rate limit exceeded for project '{0}'")]
    RateLimited(String),
}

impl From<ParseError> for WebhookError {
    fn from(err: ParseError) -> Self {
        match err {
            ParseError::MalformedPayload(msg) => WebhookError::MalformedPayload(msg),
            ParseError::UnsupportedEvent(event) => WebhookError::UnsupportedEvent(event),
        }
    }
}

impl WebhookError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            WebhookError::UnrecognizedSource | WebhookError::MalformedPayload(_) => {
                StatusCode::BAD_REQUEST
            }
            WebhookError::UnsupportedEvent(_) => StatusCode::NO_CONTENT,
            WebhookError::AuthorizationRejected(_) => StatusCode::FORBIDDEN,
            WebhookError::NoMatchingProject => StatusCode::NOT_FOUND,
            WebhookError::RateLimited(_) => StatusCode::TOO_MANY_REQUESTS,
        }
    }

    /// Short, state-free message returned to the sender
    fn public_message(&self) -> &'static str {
        match self {
            WebhookError::UnrecognizedSource => "Unrecognized service",
            WebhookError::MalformedPayload(_) => "Malformed payload",
            WebhookError::UnsupportedEvent(_) => "Event ignored",
            WebhookError::AuthorizationRejected(_) => "Forbidden",
            WebhookError::NoMatchingProject => "No matching project",
            WebhookError::RateLimited(_) => "Too many requests",
        }
    }
}

impl IntoResponse for WebhookError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status == StatusCode::NO_CONTENT {
            return status.into_response();
        }
        (status, Json(json!({ "error": self.public_message() }))).into_response()
    }
}

/// Job-level failure of a deploy command
#[derive(Debug, thiserror::Error)]
pub enum DeployError {
    #[error("deploy command failed to start: {0}")]
    Spawn(#[source] io::Error),

    #[error("deploy command timed out after {0:?}")]
    Timeout(Duration),

    #[error("deploy command exited with {}", describe_exit(.code))]
    NonZeroExit { code: Option<i32>, output: String },
}

fn describe_exit(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!("code {code}"),
        None => "a signal".to_string(),
    }
}
