//! Provider-specific webhook parsers.
//!
//! Each parser answers two questions about a request: "is this mine?"
//! ([`ProviderParser::can_handle`]) and "what push does it describe?"
//! ([`ProviderParser::parse`]). The [`crate::classifier::Classifier`] asks
//! them in order of [`Specificity`].

mod bitbucket;
mod coding;
mod generic;
mod github;
mod gitlab;
mod gitlab_ci;
mod gogs;
mod harbor;

pub use bitbucket::BitbucketParser;
pub use coding::CodingParser;
pub use generic::{GenericFormParser, GenericJsonParser};
pub use github::GitHubParser;
pub use gitlab::GitLabParser;
pub use gitlab_ci::GitLabCiParser;
pub use gogs::GogsParser;
pub use harbor::HarborParser;

use crate::error::ParseError;
use crate::webhook::{CanonicalEvent, InboundRequest, Provider};

/// How confidently a parser identifies its provider. Higher ranks are
/// consulted first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Specificity {
    /// Claims any request of a content type; carries no proof of origin
    Generic,
    /// Identified by a marker field in the JSON body
    Payload,
    /// Identified by a provider-specific header (an event header, or a
    /// user agent naming the provider)
    Header,
    /// A provider header shared with another parser plus something of its
    /// own (Gitea sends `X-GitHub-Event` alongside `X-Gitea-Event`, GitLab
    /// job hooks carry `build_status`)
    Refined,
}

pub trait ProviderParser: Send + Sync {
    fn provider(&self) -> Provider;

    fn specificity(&self) -> Specificity;

    fn can_handle(&self, request: &InboundRequest) -> bool;

    fn parse(&self, request: &InboundRequest) -> Result<CanonicalEvent, ParseError>;
}

/// Event headers that identify a specific provider. Generic parsers never
/// claim a request carrying one of these.
pub const PROVIDER_EVENT_HEADERS: &[&str] = &[
    "x-github-event",
    "x-gitlab-event",
    "x-gogs-event",
    "x-gitea-event",
    "x-coding-event",
    "x-event-key",
];

/// True if the request names its provider through a header
pub fn has_provider_header(request: &InboundRequest) -> bool {
    PROVIDER_EVENT_HEADERS
        .iter()
        .any(|name| request.has_header(name))
}

/// The standard parser set
pub fn default_parsers() -> Vec<Box<dyn ProviderParser>> {
    vec![
        Box::new(GogsParser),
        Box::new(GitLabCiParser),
        Box::new(GitHubParser),
        Box::new(GitLabParser),
        Box::new(CodingParser),
        Box::new(BitbucketParser),
        Box::new(HarborParser),
        Box::new(GenericJsonParser),
        Box::new(GenericFormParser),
    ]
}

pub(crate) fn missing_repository() -> ParseError {
    ParseError::MalformedPayload("no repository identity in payload".into())
}

#[cfg(test)]
pub(crate) mod test_support {
    use crate::webhook::InboundRequest;
    use axum::body::Bytes;
    use axum::http::{HeaderMap, HeaderName, HeaderValue};

    pub fn request(headers: &[(&str, &str)], body: &str) -> InboundRequest {
        let mut map = HeaderMap::new();
        for (name, value) in headers {
            map.insert(
                HeaderName::from_bytes(name.as_bytes()).unwrap(),
                HeaderValue::from_str(value).unwrap(),
            );
        }
        InboundRequest::new(map, Bytes::from(body.to_string()))
    }
}
