use super::{ProviderParser, Specificity, missing_repository};
use crate::error::ParseError;
use crate::webhook::{
    CanonicalEvent, Credential, InboundRequest, Provider, collect_strings, str_field,
    truncate_message,
};

/// Gogs and Gitea push hooks. Gitea also sends GitHub's headers, so this
/// parser must be consulted before [`super::GitHubParser`].
#[derive(Debug, Default)]
pub struct GogsParser;

impl GogsParser {
    fn event_name<'a>(&self, request: &'a InboundRequest) -> Option<&'a str> {
        request
            .header("x-gitea-event")
            .or_else(|| request.header("x-gogs-event"))
    }
}

impl ProviderParser for GogsParser {
    fn provider(&self) -> Provider {
        Provider::Gogs
    }

    fn specificity(&self) -> Specificity {
        Specificity::Refined
    }

    fn can_handle(&self, request: &InboundRequest) -> bool {
        request.has_header("x-gogs-event") || request.has_header("x-gitea-event")
    }

    fn parse(&self, request: &InboundRequest) -> Result<CanonicalEvent, ParseError> {
        let event_name = self.event_name(request).unwrap_or_default();
        if event_name != "push" {
            return Err(ParseError::UnsupportedEvent(event_name.to_string()));
        }

        let payload = request.json_payload()?;
        let repo = payload.get("repository").ok_or_else(missing_repository)?;

        let mut identities = Vec::new();
        collect_strings(
            repo,
            &["clone_url", "ssh_url", "html_url", "full_name"],
            &mut identities,
        );
        if identities.is_empty() {
            return Err(missing_repository());
        }

        let mut event = CanonicalEvent::new(Provider::Gogs, identities);
        event.event = Some(event_name.to_string());
        event.git_ref = str_field(&payload, "ref").map(String::from);
        event.commit = str_field(&payload, "after").map(String::from);
        event.commit_message = payload
            .get("head_commit")
            .filter(|c| !c.is_null())
            .or_else(|| payload.get("commits").and_then(|c| c.get(0)))
            .and_then(|c| str_field(c, "message"))
            .map(truncate_message);
        event.pusher = payload.get("pusher").and_then(|p| {
            str_field(p, "username")
                .or_else(|| str_field(p, "login"))
                .map(String::from)
        });

        event.credential = match request
            .header("x-gitea-signature")
            .or_else(|| request.header("x-gogs-signature"))
        {
            Some(sig) => Credential::HexSignature256(sig.to_string()),
            None => Credential::None,
        };

        Ok(event)
    }
}
