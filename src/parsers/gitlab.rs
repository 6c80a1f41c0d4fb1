use super::{ProviderParser, Specificity, missing_repository};
use crate::error::ParseError;
use crate::webhook::{
    CanonicalEvent, Credential, InboundRequest, Provider, collect_strings, str_field,
    truncate_message,
};

const EVENT_HEADER: &str = "x-gitlab-event";
const PUSH_EVENTS: &[&str] = &["Push Hook", "Tag Push Hook"];

/// GitLab push and tag push hooks, authenticated by `X-Gitlab-Token`.
#[derive(Debug, Default)]
pub struct GitLabParser;

impl ProviderParser for GitLabParser {
    fn provider(&self) -> Provider {
        Provider::GitLab
    }

    fn specificity(&self) -> Specificity {
        Specificity::Header
    }

    fn can_handle(&self, request: &InboundRequest) -> bool {
        request.has_header(EVENT_HEADER)
    }

    fn parse(&self, request: &InboundRequest) -> Result<CanonicalEvent, ParseError> {
        let event_name = request.header(EVENT_HEADER).unwrap_or_default();
        if !PUSH_EVENTS.contains(&event_name) {
            return Err(ParseError::UnsupportedEvent(event_name.to_string()));
        }

        let payload = request.json_payload()?;

        let mut identities = Vec::new();
        if let Some(repo) = payload.get("repository") {
            collect_strings(
                repo,
                &["git_http_url", "git_ssh_url", "url", "homepage"],
                &mut identities,
            );
        }
        if let Some(project) = payload.get("project") {
            collect_strings(
                project,
                &["git_http_url", "git_ssh_url", "web_url", "path_with_namespace"],
                &mut identities,
            );
        }
        if identities.is_empty() {
            return Err(missing_repository());
        }

        let commit = str_field(&payload, "checkout_sha")
            .or_else(|| str_field(&payload, "after"))
            .map(String::from);

        let commit_message = payload
            .get("commits")
            .and_then(|c| c.as_array())
            .and_then(|commits| {
                commits
                    .iter()
                    .find(|c| str_field(c, "id") == commit.as_deref())
                    .or_else(|| commits.last())
            })
            .and_then(|c| str_field(c, "message"))
            .map(truncate_message);

        let mut event = CanonicalEvent::new(Provider::GitLab, identities);
        event.event = Some(event_name.to_string());
        event.git_ref = str_field(&payload, "ref").map(String::from);
        event.commit = commit;
        event.commit_message = commit_message;
        event.pusher = str_field(&payload, "user_username")
            .or_else(|| str_field(&payload, "user_name"))
            .map(String::from);
        event.credential = match request.header("x-gitlab-token") {
            Some(token) => Credential::Token(token.to_string()),
            None => Credential::None,
        };

        Ok(event)
    }
}
