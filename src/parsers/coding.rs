use super::{ProviderParser, Specificity, missing_repository};
use crate::error::ParseError;
use crate::webhook::{
    CanonicalEvent, Credential, InboundRequest, Provider, collect_strings, str_field,
    truncate_message,
};

const EVENT_HEADER: &str = "x-coding-event";

/// Coding.net push hooks; the shared token travels in the JSON body.
#[derive(Debug, Default)]
pub struct CodingParser;

impl ProviderParser for CodingParser {
    fn provider(&self) -> Provider {
        Provider::Coding
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

        let mut identities = Vec::new();
        collect_strings(repo, &["https_url", "ssh_url", "web_url"], &mut identities);
        if identities.is_empty() {
            return Err(missing_repository());
        }

        let mut event = CanonicalEvent::new(Provider::Coding, identities);
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
        event.credential = match str_field(&payload, "token") {
            Some(token) => Credential::Token(token.to_string()),
            None => Credential::None,
        };

        Ok(event)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parsers::test_support::request;

    #[test]
    fn reads_token_from_body() {
        let body = r#"{
            "ref": "refs/heads/master",
            "after": "abc",
            "token": "s3cr3t",
            "repository": {
                "web_url": "https://coding.net/u/example/p/repo",
                "https_url": "https://git.coding.net/example/repo.git",
                "ssh_url": "git@git.coding.net:example/repo.git"
            }
        }"#;
        let req = request(&[("x-coding-event", "push")], body);
        let event = CodingParser.parse(&req).unwrap();
        assert_eq!(event.provider, Provider::Coding);
        assert_eq!(event.branch(), Some("master"));
        assert_eq!(event.repository.len(), 3);
        assert_eq!(event.credential, Credential::Token("s3cr3t".into()));
    }

    #[test]
    fn missing_token_yields_no_credential() {
        let body = r#"{"ref":"refs/heads/master","repository":{"web_url":"https://coding.net/u/a/p/b"}}"#;
        let req = request(&[("x-coding-event", "push")], body);
        assert_eq!(CodingParser.parse(&req).unwrap().credential, Credential::None);
    }
}
