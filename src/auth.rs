//! Per-project authorization of canonical events

use std::sync::Arc;

use tracing::{debug, error};

use crate::error::RejectReason;
use crate::project::{Project, ProjectRegistry};
use crate::signature::{
    tokens_match, verify_hex_signature256, verify_hub_signature1, verify_hub_signature256,
};
use crate::webhook::{CanonicalEvent, Credential};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthorizationVerdict {
    /// Projects the event may deploy, in registry order
    Authorized(Vec<Arc<Project>>),
    Rejected(RejectReason),
    /// No project matches the repository and ref
    NoMatch,
}

/// Decides which projects an event is allowed to trigger.
#[derive(Debug, Clone)]
pub struct Authorizer {
    registry: Arc<ProjectRegistry>,
}

impl Authorizer {
    pub fn new(registry: Arc<ProjectRegistry>) -> Self {
        Self { registry }
    }

    /// `body` is the raw request body, as signed by the sender.
    pub fn authorize(&self, event: &CanonicalEvent, body: &[u8]) -> AuthorizationVerdict {
        let matching = self.registry.matching(&event.repository);
        if matching.is_empty() {
            debug!("No project for repository '{}'", event.primary_repository());
            return AuthorizationVerdict::NoMatch;
        }

        if event.provider.is_generic() && matching.iter().any(|p| p.is_protected()) {
            error!(
                "Unsigned {} event for protected repository '{}'",
                event.provider,
                event.primary_repository()
            );
            return AuthorizationVerdict::Rejected(RejectReason::GenericSource);
        }

        let git_ref = event.git_ref.as_deref();
        let candidates: Vec<Arc<Project>> = matching
            .into_iter()
            .filter(|p| {
                let keep = p.matches_ref(git_ref);
                if !keep {
                    debug!("Project '{}' skips ref {:?}", p.name, git_ref);
                }
                keep
            })
            .collect();
        if candidates.is_empty() {
            return AuthorizationVerdict::NoMatch;
        }

        let failed: Vec<&Arc<Project>> = candidates
            .iter()
            .filter(|project| {
                project
                    .secret()
                    .is_some_and(|secret| !credential_valid(&event.credential, secret, body))
            })
            .collect();

        if !failed.is_empty() {
            let reason = if event.credential.is_present() {
                RejectReason::InvalidCredential
            } else {
                RejectReason::MissingCredential
            };
            for project in &failed {
                error!(
                    "Authorization failed for project '{}' ({}): {}",
                    project.name, event.provider, reason
                );
            }
            return AuthorizationVerdict::Rejected(reason);
        }

        AuthorizationVerdict::Authorized(candidates)
    }
}

/// Checks the request's credential against one project's secret.
pub fn credential_valid(credential: &Credential, secret: &str, body: &[u8]) -> bool {
    match credential {
        Credential::HubSignature256(header) => verify_hub_signature256(secret, body, header),
        Credential::HubSignature1(header) => verify_hub_signature1(secret, body, header),
        Credential::HexSignature256(sig) => verify_hex_signature256(secret, body, sig),
        Credential::Token(token) => tokens_match(secret, token),
        Credential::None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::project::test_project;
    use crate::signature::sign_sha256;
    use crate::webhook::Provider;

    const BODY: &[u8] = br#"{"ref":"refs/heads/main"}"#;

    fn event(provider: Provider, git_ref: &str, credential: Credential) -> CanonicalEvent {
        let mut event = CanonicalEvent::new(provider, vec!["https://github.com/example/repo".into()]);
        event.git_ref = Some(git_ref.to_string());
        event.credential = credential;
        event
    }

    fn authorizer(projects: Vec<Project>) -> Authorizer {
        Authorizer::new(Arc::new(ProjectRegistry::new(projects)))
    }

    fn names(verdict: &AuthorizationVerdict) -> Vec<&str> {
        match verdict {
            AuthorizationVerdict::Authorized(projects) => {
                projects.iter().map(|p| p.name.as_str()).collect()
            }
            other => panic!("expected Authorized, got {other:?}"),
        }
    }

    #[test]
    fn generic_source_never_reaches_protected_project() {
        let mut locked = test_project("locked", "example/repo");
        locked.secret = Some("s3cr3t".into());
        let auth = authorizer(vec![locked, test_project("open", "example/repo")]);

        let verdict = auth.authorize(
            &event(Provider::GenericJson, "refs/heads/main", Credential::None),
            b"{\"secret\":\"s3cr3t\"}",
        );
        assert_eq!(
            verdict,
            AuthorizationVerdict::Rejected(RejectReason::GenericSource)
        );
    }

    #[test]
    fn signed_request_authorizes_every_candidate_it_validates_for() {
        let mut a = test_project("a", "example/repo");
        a.secret = Some("alpha".into());
        let auth = authorizer(vec![a, test_project("open", "example/repo")]);

        let header = format!("sha256={}", sign_sha256("alpha", BODY));
        let verdict = auth.authorize(
            &event(Provider::GitHub, "refs/heads/main", Credential::HubSignature256(header)),
            BODY,
        );
        assert_eq!(names(&verdict), vec!["a", "open"]);
    }

    #[test]
    fn one_failing_secret_rejects_the_whole_request() {
        let mut a = test_project("a", "example/repo");
        a.secret = Some("alpha".into());
        let mut b = test_project("b", "example/repo");
        b.secret = Some("beta".into());
        let auth = authorizer(vec![a, b]);

        let header = format!("sha256={}", sign_sha256("alpha", BODY));
        let verdict = auth.authorize(
            &event(Provider::GitHub, "refs/heads/main", Credential::HubSignature256(header)),
            BODY,
        );
        assert_eq!(
            verdict,
            AuthorizationVerdict::Rejected(RejectReason::InvalidCredential)
        );
    }

    #[test]
    fn unsigned_push_does_not_deploy_open_sibling_of_protected_project() {
        let mut prod = test_project("prod", "example/repo");
        prod.secret = Some("s3cr3t".into());
        let auth = authorizer(vec![prod, test_project("staging", "example/repo")]);

        let verdict = auth.authorize(&event(Provider::GitHub, "refs/heads/main", Credential::None), BODY);
        assert_eq!(
            verdict,
            AuthorizationVerdict::Rejected(RejectReason::MissingCredential)
        );
    }

    #[test]
    fn wrong_or_missing_credential_is_rejected() {
        let mut locked = test_project("locked", "example/repo");
        locked.secret = Some("s3cr3t".into());
        let auth = authorizer(vec![locked]);

        assert_eq!(
            auth.authorize(
                &event(Provider::GitLab, "refs/heads/main", Credential::Token("nope".into())),
                BODY
            ),
            AuthorizationVerdict::Rejected(RejectReason::InvalidCredential)
        );
        assert_eq!(
            auth.authorize(&event(Provider::GitLab, "refs/heads/main", Credential::None), BODY),
            AuthorizationVerdict::Rejected(RejectReason::MissingCredential)
        );
        assert_eq!(
            names(&auth.authorize(
                &event(Provider::GitLab, "refs/heads/main", Credential::Token("s3cr3t".into())),
                BODY
            )),
            vec!["locked"]
        );
    }

    #[test]
    fn open_project_accepts_any_valid_event() {
        let auth = authorizer(vec![test_project("open", "example/repo")]);
        for provider in [Provider::GitHub, Provider::GenericJson, Provider::GenericForm] {
            let verdict = auth.authorize(&event(provider, "refs/heads/x", Credential::None), BODY);
            assert_eq!(names(&verdict), vec!["open"]);
        }
    }

    #[test]
    fn branch_filter_selects_sibling() {
        let mut main = test_project("main-site", "example/repo");
        main.branches = vec!["main".into()];
        let mut dev = test_project("dev-site", "example/repo");
        dev.branches = vec!["dev".into()];
        let auth = authorizer(vec![main, dev]);

        let verdict = auth.authorize(&event(Provider::GitHub, "refs/heads/dev", Credential::None), BODY);
        assert_eq!(names(&verdict), vec!["dev-site"]);

        let verdict =
            auth.authorize(&event(Provider::GitHub, "refs/heads/feature", Credential::None), BODY);
        assert_eq!(verdict, AuthorizationVerdict::NoMatch);
    }

    #[test]
    fn branch_filter_runs_before_secret_check() {
        let mut locked = test_project("locked", "example/repo");
        locked.secret = Some("s3cr3t".into());
        locked.branches = vec!["main".into()];
        let auth = authorizer(vec![locked, test_project("open", "example/repo")]);

        // the protected project is filtered out by branch, so the missing
        // credential does not matter
        let verdict = auth.authorize(&event(Provider::GitHub, "refs/heads/dev", Credential::None), BODY);
        assert_eq!(names(&verdict), vec!["open"]);
    }

    #[test]
    fn unknown_repository_is_no_match() {
        let auth = authorizer(vec![test_project("other", "example/other")]);
        assert_eq!(
            auth.authorize(&event(Provider::GitHub, "refs/heads/main", Credential::None), BODY),
            AuthorizationVerdict::NoMatch
        );
    }

    #[test]
    fn credential_kinds_dispatch_to_matching_check() {
        let sig = sign_sha256("k", BODY);
        assert!(credential_valid(&Credential::HexSignature256(sig.clone()), "k", BODY));
        assert!(credential_valid(
            &Credential::HubSignature256(format!("sha256={sig}")),
            "k",
            BODY
        ));
        assert!(!credential_valid(&Credential::HubSignature1(format!("sha1={sig}")), "k", BODY));
        assert!(!credential_valid(&Credential::None, "k", BODY));
    }
}
