//! NATS integration.
//!
//! - [`EventIntake`]: subscribes to the event subjects and feeds the
//!   trigger service
//! - [`NatsCollaborators`]: reaches the catalogs, the execution engine and
//!   the content checker through request/reply
//!
//! Every subject starts with the configured prefix. Payloads are JSON.

mod intake;
mod remote;

pub use intake::{
    ArtifactCollectedEvent, ContentCheckResultEvent, EventIntake, PipelineCompletedEvent,
    WebhookReceivedEvent, WebhookReply,
};
pub use remote::NatsCollaborators;

/// Queue group shared by every dispatcher, so each event is handled once.
const QUEUE_GROUP: &str = "tripwire-dispatcher";

/// Builds subject names under a common prefix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subjects {
    prefix: String,
}

impl Subjects {
    #[must_use]
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    /// Subject an inbound event arrives on.
    #[must_use]
    pub fn event(&self, name: &str) -> String {
        format!("{}.events.{name}", self.prefix)
    }

    /// Subject of a request to an external service.
    #[must_use]
    pub fn request(&self, service: &str, operation: &str) -> String {
        format!("{}.{service}.{operation}", self.prefix)
    }
}
