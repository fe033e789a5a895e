//! Error types for webhook validation.
//!
//! All of these abort the current webhook firing without changing any
//! trigger state.

use std::fmt;
use tripwire_trigger::WebhookSource;

/// Errors raised while validating an inbound webhook.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WebhookError {
    /// The headers identify a different provider, or none.
    ProviderMismatch {
        /// Provider the trigger is configured for.
        expected: WebhookSource,
        /// Provider detected from the headers.
        actual: Option<WebhookSource>,
    },
    /// The trigger does not accept this event or sub-action.
    EventNotAccepted {
        /// Event name as sent by the provider.
        event: String,
        /// Sub-action, when the event carries one.
        action: Option<String>,
    },
    /// A custom payload filter did not match.
    PayloadFilterMismatch {
        /// Payload selector.
        selector: String,
        /// Expected pattern.
        expected: String,
        /// Value found at the selector.
        actual: Option<String>,
    },
    /// The pushed branch does not match the configured expression.
    BranchNotMatched {
        /// Configured expression.
        branch_regex: String,
        /// Branch found in the payload.
        branch: Option<String>,
    },
    /// A configured pattern does not compile.
    InvalidPattern {
        /// The pattern text.
        pattern: String,
        /// Compiler message.
        reason: String,
    },
    /// Placeholders in the trigger arguments are missing from the payload.
    UnresolvedPlaceholders {
        /// Variable or binding names.
        variables: Vec<String>,
    },
}

impl fmt::Display for WebhookError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ProviderMismatch { expected, actual } => match actual {
                Some(actual) => write!(f, "expected a {expected} webhook, received {actual}"),
                None => write!(f, "expected a {expected} webhook, provider not recognized"),
            },
            Self::EventNotAccepted { event, action } => match action {
                Some(action) => write!(f, "event {event} ({action}) is not accepted"),
                None => write!(f, "event {event} is not accepted"),
            },
            Self::PayloadFilterMismatch {
                selector,
                expected,
                actual,
            } => write!(
                f,
                "payload value at {selector} ({}) does not match {expected}",
                actual.as_deref().unwrap_or("missing")
            ),
            Self::BranchNotMatched {
                branch_regex,
                branch,
            } => write!(
                f,
                "branch {} does not match {branch_regex}",
                branch.as_deref().unwrap_or("(none)")
            ),
            Self::InvalidPattern { pattern, reason } => {
                write!(f, "invalid pattern {pattern}: {reason}")
            }
            Self::UnresolvedPlaceholders { variables } => write!(
                f,
                "payload does not supply placeholders for: {}",
                variables.join(", ")
            ),
        }
    }
}

impl std::error::Error for WebhookError {}
