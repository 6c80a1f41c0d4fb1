//! Provider detection and the unsigned-source guard

use tracing::{debug, error, warn};

use crate::error::{RejectReason, WebhookError};
use crate::parsers::{ProviderParser, Specificity, default_parsers};
use crate::project::ProjectRegistry;
use crate::webhook::{CanonicalEvent, InboundRequest};

/// Ordered set of provider parsers. The first parser, by descending
/// specificity, that claims a request parses it.
pub struct Classifier {
    parsers: Vec<Box<dyn ProviderParser>>,
}

impl Default for Classifier {
    fn default() -> Self {
        Self::new(default_parsers())
    }
}

impl Classifier {
    /// Parsers of equal specificity keep the order they were given in.
    pub fn new(mut parsers: Vec<Box<dyn ProviderParser>>) -> Self {
        parsers.sort_by(|a, b| b.specificity().cmp(&a.specificity()));
        Self { parsers }
    }

    pub fn select(&self, request: &InboundRequest) -> Option<&dyn ProviderParser> {
        self.parsers
            .iter()
            .find(|p| p.can_handle(request))
            .map(|p| p.as_ref())
    }

    /// Classifies and parses a request. Events from generic parsers pass
    /// through [`bypass_guard`] before they are returned.
    pub fn route(
        &self,
        request: &InboundRequest,
        registry: &ProjectRegistry,
    ) -> Result<CanonicalEvent, WebhookError> {
        let Some(parser) = self.select(request) else {
            warn!(
                "Unrecognized webhook source (user-agent: {:?}, content-type: {:?})",
                request.user_agent(),
                request.media_type()
            );
            return Err(WebhookError::UnrecognizedSource);
        };
        debug!("Request claimed by {} parser", parser.provider());

        let event = parser.parse(request)?;
        if parser.specificity() == Specificity::Generic {
            bypass_guard(&event, registry)?;
        }
        Ok(event)
    }
}

/// Refuses a generic-source event when any project whose repository
/// pattern matches it has a secret, whatever its branch filter. Generic
/// sources carry no credential, so such a project can only be reached
/// through its provider's signed path.
pub fn bypass_guard(event: &CanonicalEvent, registry: &ProjectRegistry) -> Result<(), WebhookError> {
    if event.provider.is_generic() && registry.any_protected(&event.repository) {
        error!(
            "Rejected {} request for protected repository '{}'",
            event.provider,
            event.primary_repository()
        );
        return Err(WebhookError::AuthorizationRejected(
            RejectReason::GenericSource,
        ));
    }
    Ok(())
}
