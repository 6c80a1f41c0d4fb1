use super::{ProviderParser, Specificity, missing_repository};
use crate::error::ParseError;
use crate::webhook::{
    CanonicalEvent, Credential, InboundRequest, Provider, collect_strings, str_field,
    truncate_message,
};

const EVENT_HEADER: &str = "x-gitlab-event";

/// GitLab CI job hooks. Only a successful build deploys, so a project can
/// deploy after its pipeline has passed instead of on every push.
#[derive(Debug, Default)]
pub struct GitLabCiParser;

impl ProviderParser for GitLabCiParser {
    fn provider(&self) -> Provider {
        Provider::GitLabCi
    }

    fn specificity(&self) -> Specificity {
        Specificity::Refined
    }

    fn can_handle(&self, request: &InboundRequest) -> bool {
        request.has_header(EVENT_HEADER)
            && request.is_json()
            && request
                .json_payload()
                .is_ok_and(|payload| payload.get("build_status").is_some())
    }

    fn parse(&self, request: &InboundRequest) -> Result<CanonicalEvent, ParseError> {
        let payload = request.json_payload()?;
        let event_name = request.header(EVENT_HEADER).unwrap_or_default();

        let status = str_field(&payload, "build_status").unwrap_or_default();
        if status != "success" {
            return Err(ParseError::UnsupportedEvent(format!(
                "{event_name} (build {status})"
            )));
        }

        let mut identities = Vec::new();
        if let Some(repo) = payload.get("repository") {
            collect_strings(
                repo,
                &["git_http_url", "git_ssh_url", "url", "homepage"],
                &mut identities,
            );
        }
        if identities.is_empty() {
            return Err(missing_repository());
        }

        // job hooks carry the short ref name
        let git_ref = str_field(&payload, "ref").map(|name| {
            if name.starts_with("refs/") {
                name.to_string()
            } else if payload.get("tag").and_then(|t| t.as_bool()) == Some(true) {
                format!("refs/tags/{name}")
            } else {
                format!("refs/heads/{name}")
            }
        });

        let commit = payload.get("commit");
        let mut event = CanonicalEvent::new(Provider::GitLabCi, identities);
        event.event = Some(event_name.to_string());
        event.git_ref = git_ref;
        event.commit = str_field(&payload, "sha")
            .or_else(|| commit.and_then(|c| str_field(c, "sha")))
            .map(String::from);
        event.commit_message = commit
            .and_then(|c| str_field(c, "message"))
            .map(truncate_message);
        event.pusher = payload
            .get("user")
            .and_then(|u| str_field(u, "username").or_else(|| str_field(u, "name")))
            .map(String::from);
        event.credential = match request.header("x-gitlab-token") {
            Some(token) => Credential::Token(token.to_string()),
            None => Credential::None,
        };

        Ok(event)
    }
}
