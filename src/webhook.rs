//! Webhook related structures

use axum::body::Bytes;
use axum::http::{HeaderMap, header};

use crate::error::ParseError;

/// Raw webhook request as received by the HTTP layer.
/// Owned by the handling request and dropped with it.
#[derive(Debug, Clone)]
pub struct InboundRequest {
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl InboundRequest {
    pub fn new(headers: HeaderMap, body: Bytes) -> Self {
        Self { headers, body }
    }

    /// Header value as a string, if present and valid UTF-8
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    pub fn has_header(&self, name: &str) -> bool {
        self.headers.contains_key(name)
    }

    pub fn user_agent(&self) -> Option<&str> {
        self.header(header::USER_AGENT.as_str())
    }

    /// Media type without parameters, lowercased (`application/json`)
    pub fn media_type(&self) -> Option<String> {
        self.header(header::CONTENT_TYPE.as_str()).map(|ct| {
            ct.split(';')
                .next()
                .unwrap_or_default()
                .trim()
                .to_ascii_lowercase()
        })
    }

    pub fn is_json(&self) -> bool {
        self.media_type().as_deref() == Some("application/json")
    }

    pub fn is_form(&self) -> bool {
        self.media_type().as_deref() == Some("application/x-www-form-urlencoded")
    }

    /// Decoded form fields; empty unless the body is form-encoded
    pub fn form_fields(&self) -> Vec<(String, String)> {
        if !self.is_form() {
            return Vec::new();
        }
        url::form_urlencoded::parse(&self.body)
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect()
    }

    /// The JSON object carried by the request. Form bodies are unwrapped
    /// from their `payload` field, which is how GitHub delivers JSON when
    /// the hook is set to `application/x-www-form-urlencoded`.
    pub fn json_payload(&self) -> Result<serde_json::Value, ParseError> {
        let parsed: Result<serde_json::Value, serde_json::Error> = if self.is_form() {
            let payload = self
                .form_fields()
                .into_iter()
                .find(|(k, _)| k == "payload")
                .map(|(_, v)| v)
                .ok_or_else(|| {
                    ParseError::MalformedPayload("form body without payload field".into())
                })?;
            serde_json::from_str(&payload)
        } else {
            serde_json::from_slice(&self.body)
        };
        let value =
            parsed.map_err(|e| ParseError::MalformedPayload(format!("invalid JSON: {e}")))?;

        if !value.is_object() {
            return Err(ParseError::MalformedPayload(
                "payload is not a JSON object".into(),
            ));
        }
        Ok(value)
    }
}

/// Which parser produced an event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Provider {
    GitHub,
    GitLab,
    GitLabCi,
    Bitbucket,
    Gogs,
    Coding,
    Harbor,
    GenericJson,
    GenericForm,
}

impl Provider {
    /// Generic providers have no native way to prove who sent the request
    pub fn is_generic(self) -> bool {
        matches!(self, Provider::GenericJson | Provider::GenericForm)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Provider::GitHub => "github",
            Provider::GitLab => "gitlab",
            Provider::GitLabCi => "gitlab-ci",
            Provider::Bitbucket => "bitbucket",
            Provider::Gogs => "gogs",
            Provider::Coding => "coding",
            Provider::Harbor => "harbor",
            Provider::GenericJson => "generic-json",
            Provider::GenericForm => "generic-form",
        }
    }
}

impl std::fmt::Display for Provider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Secret-bearing material taken from the request, verified later
/// against each candidate project's secret.
#[derive(Clone, PartialEq, Eq)]
pub enum Credential {
    /// `sha256=<hex>` HMAC over the raw body (GitHub, Bitbucket)
    HubSignature256(String),
    /// `sha1=<hex>` HMAC over the raw body (legacy GitHub)
    HubSignature1(String),
    /// Bare hex HMAC-SHA256 over the raw body (Gogs, Gitea)
    HexSignature256(String),
    /// Shared token compared verbatim (GitLab header, Coding body field,
    /// Harbor `Authorization` header)
    Token(String),
    None,
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let kind = match self {
            Credential::HubSignature256(_) => "HubSignature256",
            Credential::HubSignature1(_) => "HubSignature1",
            Credential::HexSignature256(_) => "HexSignature256",
            Credential::Token(_) => "Token",
            Credential::None => return f.write_str("None"),
        };
        write!(f, "{kind}(<REDACTED>)")
    }
}

impl Credential {
    pub fn is_present(&self) -> bool {
        !matches!(self, Credential::None)
    }
}

/// Provider-independent description of a push notification
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CanonicalEvent {
    pub provider: Provider,
    /// Provider event name (`push`, `Push Hook`, `repo:push`, ...)
    pub event: Option<String>,
    /// Every URL or `owner/name` the payload offers for the repository
    pub repository: Vec<String>,
    pub git_ref: Option<String>,
    pub commit: Option<String>,
    pub commit_message: Option<String>,
    pub pusher: Option<String>,
    pub credential: Credential,
}

impl CanonicalEvent {
    pub fn new(provider: Provider, repository: Vec<String>) -> Self {
        Self {
            provider,
            event: None,
            repository,
            git_ref: None,
            commit: None,
            commit_message: None,
            pusher: None,
            credential: Credential::None,
        }
    }

    /// Short branch name for `refs/heads/*` refs, otherwise the ref itself
    pub fn branch(&self) -> Option<&str> {
        self.git_ref
            .as_deref()
            .map(|r| r.strip_prefix("refs/heads/").unwrap_or(r))
    }

    /// The identity used in logs and job records
    pub fn primary_repository(&self) -> &str {
        self.repository.first().map(String::as_str).unwrap_or("")
    }
}

/// Reads `obj[key]` as a non-empty string
pub(crate) fn str_field<'a>(value: &'a serde_json::Value, key: &str) -> Option<&'a str> {
    value.get(key).and_then(|v| v.as_str()).filter(|s| !s.is_empty())
}

/// Collects the non-empty string fields `keys` of `value`, skipping duplicates
pub(crate) fn collect_strings(value: &serde_json::Value, keys: &[&str], out: &mut Vec<String>) {
    for key in keys {
        if let Some(s) = str_field(value, key) {
            if !out.iter().any(|existing| existing == s) {
                out.push(s.to_string());
            }
        }
    }
}

/// Commit messages can be arbitrarily long; keep them bounded
pub(crate) fn truncate_message(message: &str) -> String {
    const MAX_COMMIT_MSG_LEN: usize = 500;
    if message.len() > MAX_COMMIT_MSG_LEN {
        let mut end = MAX_COMMIT_MSG_LEN;
        while !message.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}... (truncated)", &message[..end])
    } else {
        message.to_string()
    }
}
