use serde_json::Value;

use super::{ProviderParser, Specificity, has_provider_header, missing_repository};
use crate::error::ParseError;
use crate::webhook::{
    CanonicalEvent, InboundRequest, Provider, collect_strings, str_field, truncate_message,
};

const REPOSITORY_KEYS: &[&str] = &[
    "url",
    "html_url",
    "clone_url",
    "git_http_url",
    "git_ssh_url",
    "ssh_url",
    "full_name",
];

fn looks_like_bitbucket(request: &InboundRequest) -> bool {
    request
        .user_agent()
        .is_some_and(|ua| ua.to_ascii_lowercase().contains("bitbucket"))
}

/// Builds an event from a loosely shaped JSON object. Generic events never
/// carry a credential; any `secret` or `token` field is ignored.
fn parse_generic_value(payload: &Value, provider: Provider) -> Result<CanonicalEvent, ParseError> {
    let mut identities = Vec::new();
    match payload.get("repository") {
        Some(Value::String(s)) if !s.is_empty() => identities.push(s.clone()),
        Some(repo @ Value::Object(_)) => collect_strings(repo, REPOSITORY_KEYS, &mut identities),
        _ => {}
    }
    if identities.is_empty() {
        return Err(missing_repository());
    }

    let mut event = CanonicalEvent::new(provider, identities);
    event.git_ref = str_field(payload, "ref").map(String::from);
    event.commit = ["after", "checkout_sha", "commit"]
        .iter()
        .find_map(|key| str_field(payload, key))
        .map(String::from);
    event.commit_message = str_field(payload, "message").map(truncate_message);
    event.pusher = str_field(payload, "pusher")
        .or_else(|| payload.get("pusher").and_then(|p| str_field(p, "name")))
        .map(String::from);
    Ok(event)
}

/// Any JSON poster that identifies itself with nothing but its content type.
#[derive(Debug, Default)]
pub struct GenericJsonParser;

impl ProviderParser for GenericJsonParser {
    fn provider(&self) -> Provider {
        Provider::GenericJson
    }

    fn specificity(&self) -> Specificity {
        Specificity::Generic
    }

    fn can_handle(&self, request: &InboundRequest) -> bool {
        request.is_json() && !has_provider_header(request) && !looks_like_bitbucket(request)
    }

    fn parse(&self, request: &InboundRequest) -> Result<CanonicalEvent, ParseError> {
        let payload = request.json_payload()?;
        parse_generic_value(&payload, Provider::GenericJson)
    }
}

/// Form posts: either a `payload` field holding JSON or flat
/// `repository`/`ref`/`commit` fields.
#[derive(Debug, Default)]
pub struct GenericFormParser;

impl ProviderParser for GenericFormParser {
    fn provider(&self) -> Provider {
        Provider::GenericForm
    }

    fn specificity(&self) -> Specificity {
        Specificity::Generic
    }

    fn can_handle(&self, request: &InboundRequest) -> bool {
        request.is_form() && !has_provider_header(request) && !looks_like_bitbucket(request)
    }

    fn parse(&self, request: &InboundRequest) -> Result<CanonicalEvent, ParseError> {
        let fields = request.form_fields();
        if fields.iter().any(|(k, _)| k == "payload") {
            let payload = request.json_payload()?;
            return parse_generic_value(&payload, Provider::GenericForm);
        }

        let field = |name: &str| {
            fields
                .iter()
                .find(|(k, v)| k == name && !v.is_empty())
                .map(|(_, v)| v.clone())
        };
        let repository = field("repository").ok_or_else(missing_repository)?;

        let mut event = CanonicalEvent::new(Provider::GenericForm, vec![repository]);
        event.git_ref = field("ref");
        event.commit = field("commit");
        Ok(event)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parsers::test_support::request;
    use crate::webhook::Credential;

    const JSON: &[(&str, &str)] = &[("content-type", "application/json")];
    const FORM: &[(&str, &str)] = &[("content-type", "application/x-www-form-urlencoded")];

    #[test]
    fn json_claims_only_plain_requests() {
        assert!(GenericJsonParser.can_handle(&request(JSON, "{}")));
        assert!(!GenericJsonParser.can_handle(&request(
            &[("content-type", "application/json"), ("x-github-event", "push")],
            "{}"
        )));
        assert!(!GenericJsonParser.can_handle(&request(
            &[("content-type", "application/json"), ("user-agent", "Bitbucket-Webhooks/2.0")],
            "{}"
        )));
        assert!(!GenericJsonParser.can_handle(&request(&[("content-type", "text/plain")], "{}")));
    }

    #[test]
    fn repository_as_string() {
        let req = request(
            JSON,
            r#"{"repository":"example/repo","ref":"refs/heads/main","after":"abc"}"#,
        );
        let event = GenericJsonParser.parse(&req).unwrap();
        assert_eq!(event.provider, Provider::GenericJson);
        assert_eq!(event.repository, vec!["example/repo".to_string()]);
        assert_eq!(event.branch(), Some("main"));
        assert_eq!(event.commit.as_deref(), Some("abc"));
    }

    #[test]
    fn repository_as_object_ignores_bare_name() {
        let req = request(
            JSON,
            r#"{"repository":{"name":"repo","clone_url":"https://git.example.com/example/repo.git"},"checkout_sha":"def"}"#,
        );
        let event = GenericJsonParser.parse(&req).unwrap();
        assert_eq!(
            event.repository,
            vec!["https://git.example.com/example/repo.git".to_string()]
        );
        assert_eq!(event.commit.as_deref(), Some("def"));

        let req = request(JSON, r#"{"repository":{"name":"repo"}}"#);
        assert!(matches!(
            GenericJsonParser.parse(&req),
            Err(ParseError::MalformedPayload(_))
        ));
    }

    #[test]
    fn secret_like_fields_are_not_credentials() {
        let req = request(
            JSON,
            r#"{"repository":"example/repo","secret":"s3cr3t","token":"s3cr3t"}"#,
        );
        assert_eq!(GenericJsonParser.parse(&req).unwrap().credential, Credential::None);
    }

    #[test]
    fn form_flat_fields() {
        let req = request(FORM, "repository=example%2Frepo&ref=refs%2Fheads%2Fmain&commit=abc");
        let event = GenericFormParser.parse(&req).unwrap();
        assert_eq!(event.provider, Provider::GenericForm);
        assert_eq!(event.repository, vec!["example/repo".to_string()]);
        assert_eq!(event.git_ref.as_deref(), Some("refs/heads/main"));
        assert_eq!(event.commit.as_deref(), Some("abc"));
    }

    #[test]
    fn form_payload_field() {
        let body: String = url::form_urlencoded::Serializer::new(String::new())
            .append_pair("payload", r#"{"repository":"example/repo","ref":"refs/heads/dev"}"#)
            .finish();
        let event = GenericFormParser.parse(&request(FORM, &body)).unwrap();
        assert_eq!(event.branch(), Some("dev"));
    }

    #[test]
    fn form_without_repository_is_malformed() {
        assert!(matches!(
            GenericFormParser.parse(&request(FORM, "ref=main")),
            Err(ParseError::MalformedPayload(_))
        ));
    }
}
