use serde_json::Value;

use super::{ProviderParser, Specificity, has_provider_header, missing_repository};
use crate::error::ParseError;
use crate::webhook::{CanonicalEvent, Credential, InboundRequest, Provider, str_field};

const PUSH_EVENT: &str = "PUSH_ARTIFACT";

/// Harbor container registry webhooks. An image push deploys the projects
/// whose pattern names the image repository; the tag stands in for the ref.
#[derive(Debug, Default)]
pub struct HarborParser;

impl HarborParser {
    /// Harbor payloads are `{type, occur_at, operator, event_data}`
    fn is_harbor_payload(payload: &Value) -> bool {
        str_field(payload, "type").is_some()
            && payload.get("occur_at").is_some()
            && payload.get("event_data").is_some_and(Value::is_object)
    }
}

/// `registry/ns/app:tag@sha256:...` without digest and tag
fn image_repository(resource_url: &str) -> &str {
    let without_digest = resource_url.split('@').next().unwrap_or(resource_url);
    let name_start = without_digest.rfind('/').map_or(0, |i| i + 1);
    match without_digest[name_start..].find(':') {
        Some(colon) => &without_digest[..name_start + colon],
        None => without_digest,
    }
}

impl ProviderParser for HarborParser {
    fn provider(&self) -> Provider {
        Provider::Harbor
    }

    fn specificity(&self) -> Specificity {
        Specificity::Payload
    }

    fn can_handle(&self, request: &InboundRequest) -> bool {
        request.is_json()
            && !has_provider_header(request)
            && request
                .json_payload()
                .is_ok_and(|payload| Self::is_harbor_payload(&payload))
    }

    fn parse(&self, request: &InboundRequest) -> Result<CanonicalEvent, ParseError> {
        let payload = request.json_payload()?;
        let event_type = str_field(&payload, "type").unwrap_or_default();
        if event_type != PUSH_EVENT {
            return Err(ParseError::UnsupportedEvent(event_type.to_string()));
        }

        let data = &payload["event_data"];
        let resource = data
            .get("resources")
            .and_then(Value::as_array)
            .and_then(|resources| resources.first())
            .ok_or_else(|| ParseError::MalformedPayload("no pushed resources".into()))?;

        let mut identities = Vec::new();
        if let Some(url) = str_field(resource, "resource_url") {
            identities.push(image_repository(url).to_string());
        }
        if let Some(name) = data
            .get("repository")
            .and_then(|r| str_field(r, "repo_full_name"))
        {
            if !identities.iter().any(|i| i == name) {
                identities.push(name.to_string());
            }
        }
        if identities.is_empty() {
            return Err(missing_repository());
        }

        let mut event = CanonicalEvent::new(Provider::Harbor, identities);
        event.event = Some(event_type.to_string());
        event.git_ref = str_field(resource, "tag").map(String::from);
        event.commit = str_field(resource, "digest").map(String::from);
        event.pusher = str_field(&payload, "operator").map(String::from);
        event.credential = match request.header("authorization") {
            Some(token) => Credential::Token(token.to_string()),
            None => Credential::None,
        };

        Ok(event)
    }
}
