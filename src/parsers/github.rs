use super::{ProviderParser, Specificity, missing_repository};
use crate::error::ParseError;
use crate::webhook::{
    CanonicalEvent, Credential, InboundRequest, Provider, collect_strings, str_field,
    truncate_message,
};

const EVENT_HEADER: &str = "x-github-event";

/// GitHub push hooks, JSON or form-encoded.
#[derive(Debug, Default)]
pub struct GitHubParser;

impl ProviderParser for GitHubParser {
    fn provider(&self) -> Provider {
        Provider::GitHub
    }

    fn specificity(&self) -> Specificity {
        Specificity::Header
    }

    fn can_handle(&self, request: &InboundRequest) -> bool {
        request.has_header(EVENT_HEADER)
    }

    fn parse(&self, request: &InboundRequest) -> Result<CanonicalEvent, ParseError> {
        let event_name = request.header(EVENT_HEADER).unwrap_or_default();
        if event_name != "push" {
            return Err(ParseError::UnsupportedEvent(event_name.to_string()));
        }

        let payload = request.json_payload()?;
        let repo = payload.get("repository").ok_or_else(missing_repository)?;

        // One repository is reachable through several protocols
        let mut identities = Vec::new();
        collect_strings(
            repo,
            &["clone_url", "ssh_url", "git_url", "html_url", "url", "full_name"],
            &mut identities,
        );
        if identities.is_empty() {
            return Err(missing_repository());
        }

        if payload.get("deleted").and_then(|v| v.as_bool()) == Some(true) {
            return Err(ParseError::UnsupportedEvent("push (ref deleted)".into()));
        }

        let mut event = CanonicalEvent::new(Provider::GitHub, identities);
        event.event = Some(event_name.to_string());
        event.git_ref = str_field(&payload, "ref").map(String::from);
        event.commit = str_field(&payload, "after").map(String::from);
        event.commit_message = payload
            .get("head_commit")
            .and_then(|c| str_field(c, "message"))
            .map(truncate_message);
        event.pusher = payload
            .get("pusher")
            .and_then(|p| str_field(p, "name"))
            .map(String::from);

        event.credential = if let Some(sig) = request.header("x-hub-signature-256") {
            Credential::HubSignature256(sig.to_string())
        } else if let Some(sig) = request.header("x-hub-signature") {
            Credential::HubSignature1(sig.to_string())
        } else {
            Credential::None
        };

        Ok(event)
    }
}
