use serde_json::Value;

use super::{ProviderParser, Specificity, missing_repository};
use crate::error::ParseError;
use crate::webhook::{
    CanonicalEvent, Credential, InboundRequest, Provider, str_field, truncate_message,
};

const EVENT_HEADER: &str = "x-event-key";
const PUSH_EVENTS: &[&str] = &["repo:push", "repo:refs_changed"];

/// Bitbucket Cloud (`repo:push`) and Bitbucket Server
/// (`repo:refs_changed`) push hooks.
#[derive(Debug, Default)]
pub struct BitbucketParser;

impl BitbucketParser {
    fn repository_identities(payload: &Value) -> Vec<String> {
        let mut identities = Vec::new();
        let Some(repo) = payload.get("repository") else {
            return identities;
        };
        let mut push = |s: &str| {
            if !s.is_empty() && !identities.iter().any(|i| i == s) {
                identities.push(s.to_string());
            }
        };

        if let Some(name) = str_field(repo, "full_name") {
            push(name);
        }
        let links = repo.get("links");
        if let Some(href) = links
            .and_then(|l| l.get("html"))
            .and_then(|h| str_field(h, "href"))
        {
            push(href);
        }
        // Server lists clone URLs per protocol
        if let Some(clones) = links
            .and_then(|l| l.get("clone"))
            .and_then(|c| c.as_array())
        {
            for clone in clones {
                if let Some(href) = str_field(clone, "href") {
                    push(href);
                }
            }
        }
        // Server: project key + slug form `PROJ/repo`
        if let (Some(key), Some(slug)) = (
            repo.get("project").and_then(|p| str_field(p, "key")),
            str_field(repo, "slug"),
        ) {
            push(&format!("{key}/{slug}"));
        }
        identities
    }

    /// Ref, commit and commit message of the first surviving change
    fn first_change(
        payload: &Value,
    ) -> Result<(Option<String>, Option<String>, Option<String>), ParseError> {
        // Cloud
        if let Some(changes) = payload
            .get("push")
            .and_then(|p| p.get("changes"))
            .and_then(|c| c.as_array())
        {
            let new = changes
                .iter()
                .filter_map(|c| c.get("new"))
                .find(|n| !n.is_null());
            let Some(new) = new else {
                if changes.is_empty() {
                    return Ok((None, None, None));
                }
                return Err(ParseError::UnsupportedEvent("repo:push (ref deleted)".into()));
            };
            let git_ref = str_field(new, "name").map(|name| match str_field(new, "type") {
                Some("tag") => format!("refs/tags/{name}"),
                _ => format!("refs/heads/{name}"),
            });
            let target = new.get("target");
            let commit = target.and_then(|t| str_field(t, "hash")).map(String::from);
            let message = target
                .and_then(|t| str_field(t, "message"))
                .map(truncate_message);
            return Ok((git_ref, commit, message));
        }

        // Server
        if let Some(change) = payload
            .get("changes")
            .and_then(|c| c.as_array())
            .and_then(|c| c.first())
        {
            if str_field(change, "type") == Some("DELETE") {
                return Err(ParseError::UnsupportedEvent(
                    "repo:refs_changed (ref deleted)".into(),
                ));
            }
            let git_ref = str_field(change, "refId").map(String::from);
            let commit = str_field(change, "toHash").map(String::from);
            return Ok((git_ref, commit, None));
        }

        Ok((None, None, None))
    }
}

impl ProviderParser for BitbucketParser {
    fn provider(&self) -> Provider {
        Provider::Bitbucket
    }

    fn specificity(&self) -> Specificity {
        Specificity::Header
    }

    // some Server versions send only `User-Agent: Bitbucket-Webhooks/2.0`
    fn can_handle(&self, request: &InboundRequest) -> bool {
        request.has_header(EVENT_HEADER)
            || request
                .user_agent()
                .is_some_and(|ua| ua.to_ascii_lowercase().contains("bitbucket"))
    }

    fn parse(&self, request: &InboundRequest) -> Result<CanonicalEvent, ParseError> {
        let event_name = request.header(EVENT_HEADER);
        if let Some(name) = event_name {
            if !PUSH_EVENTS.contains(&name) {
                return Err(ParseError::UnsupportedEvent(name.to_string()));
            }
        }

        let payload = request.json_payload()?;
        let identities = Self::repository_identities(&payload);
        if identities.is_empty() {
            return Err(missing_repository());
        }
        let (git_ref, commit, commit_message) = Self::first_change(&payload)?;

        let mut event = CanonicalEvent::new(Provider::Bitbucket, identities);
        event.event = event_name.map(String::from);
        event.git_ref = git_ref;
        event.commit = commit;
        event.commit_message = commit_message;
        event.pusher = payload.get("actor").and_then(|a| {
            str_field(a, "display_name")
                .or_else(|| str_field(a, "name"))
                .map(String::from)
        });
        event.credential = match request.header("x-hub-signature") {
            Some(sig) => Credential::HubSignature256(sig.to_string()),
            None => Credential::None,
        };

        Ok(event)
    }
}
