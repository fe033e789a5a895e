//! Webhook validation for tripwire.
//!
//! Inbound webhooks are checked against the stored [`WebhookCondition`] of
//! the trigger they address:
//!
//! 1. The provider is detected from header markers and must match.
//! 2. The event and sub-action must be accepted by the condition.
//! 3. Every custom payload filter must match.
//! 4. An optional branch expression must match the extracted branch.
//!
//! Custom webhooks have no provider, so only the payload filters apply.
//!
//! Only then are placeholders in the trigger arguments filled from the
//! payload.
//!
//! [`WebhookCondition`]: tripwire_trigger::WebhookCondition

pub mod error;
pub mod event;
pub mod headers;
pub mod token;
pub mod validator;

pub use error::WebhookError;
pub use event::{DetectedEvent, detect_event, extract_details};
pub use headers::WebhookHeaders;
pub use token::{generate_token, issue_token, payload_sample};
pub use validator::{ValidatedWebhook, WebhookValidator, compile_full_match};
