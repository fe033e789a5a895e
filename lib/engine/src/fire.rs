//! Events, firing requests and their outcomes.

use crate::error::TriggerServiceError;
use chrono::{DateTime, Utc};
use serde_json::Value;
use tripwire_core::{ArtifactStreamId, ExecutionId, PipelineId, TriggerExecutionId, TriggerId};
use tripwire_resolver::Artifact;
use tripwire_trigger::{ContentCheck, ResolvedArgs, Trigger, WebhookEventDetails};
use tripwire_webhook::WebhookHeaders;

/// An upstream event offered to a condition processor.
#[derive(Debug, Clone, Copy)]
pub enum TriggerEvent<'a> {
    /// New builds were collected on a stream, in collection order.
    ArtifactCollected {
        stream: ArtifactStreamId,
        artifacts: &'a [Artifact],
    },
    PipelineCompleted { pipeline_id: PipelineId },
    /// A scheduled tick is due.
    ScheduleDue { fire_time: DateTime<Utc> },
    WebhookReceived {
        headers: &'a WebhookHeaders,
        payload: &'a Value,
    },
}

impl TriggerEvent<'_> {
    /// Short name for logs.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::ArtifactCollected { .. } => "artifact_collected",
            Self::PipelineCompleted { .. } => "pipeline_completed",
            Self::ScheduleDue { .. } => "schedule_due",
            Self::WebhookReceived { .. } => "webhook_received",
        }
    }
}

/// Everything a processor learned from an event, ready for execution
/// assembly.
#[derive(Debug, Clone)]
pub struct FireRequest {
    pub trigger: Trigger,
    /// Arguments with every placeholder filled.
    pub args: ResolvedArgs,
    /// Artifacts that caused the firing, newest first.
    pub triggering_artifacts: Vec<Artifact>,
    /// Pipeline whose completion caused the firing.
    pub upstream_pipeline: Option<PipelineId>,
    pub webhook_event: Option<WebhookEventDetails>,
    /// Gate submission on a file content change.
    pub content_check: Option<ContentCheck>,
    /// Skip unless a resolved artifact differs from the last deployment.
    pub only_if_new_artifacts: bool,
}

impl FireRequest {
    #[must_use]
    pub fn new(trigger: &Trigger, args: ResolvedArgs) -> Self {
        Self {
            trigger: trigger.clone(),
            args,
            triggering_artifacts: Vec::new(),
            upstream_pipeline: None,
            webhook_event: None,
            content_check: None,
            only_if_new_artifacts: false,
        }
    }

    #[must_use]
    pub fn with_triggering_artifacts(mut self, artifacts: Vec<Artifact>) -> Self {
        self.triggering_artifacts = artifacts;
        self
    }

    #[must_use]
    pub const fn with_upstream_pipeline(mut self, pipeline_id: PipelineId) -> Self {
        self.upstream_pipeline = Some(pipeline_id);
        self
    }

    #[must_use]
    pub fn with_webhook_event(mut self, details: WebhookEventDetails) -> Self {
        self.webhook_event = Some(details);
        self
    }

    #[must_use]
    pub fn with_content_check(mut self, check: Option<ContentCheck>) -> Self {
        self.content_check = check;
        self
    }

    #[must_use]
    pub const fn only_if_new_artifacts(mut self, only: bool) -> Self {
        self.only_if_new_artifacts = only;
        self
    }
}

/// What happened to one trigger for one event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FireOutcome {
    /// The execution engine accepted the request.
    Submitted {
        trigger_execution_id: TriggerExecutionId,
        execution_id: ExecutionId,
    },
    /// Waiting on a content-change check.
    AwaitingContentCheck {
        trigger_execution_id: TriggerExecutionId,
    },
    /// The tracked files did not change; nothing was submitted.
    ContentUnchanged {
        trigger_execution_id: TriggerExecutionId,
    },
    /// The trigger did not fire.
    Skipped { reason: String },
    Failed(TriggerServiceError),
}

impl FireOutcome {
    pub(crate) fn skipped(reason: impl Into<String>) -> Self {
        Self::Skipped {
            reason: reason.into(),
        }
    }

    /// True if an execution was submitted.
    #[must_use]
    pub const fn is_submitted(&self) -> bool {
        matches!(self, Self::Submitted { .. })
    }
}

/// Per-trigger result of handling an event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FireReport {
    pub trigger_id: TriggerId,
    pub trigger_name: String,
    pub outcome: FireOutcome,
}

impl FireReport {
    #[must_use]
    pub fn new(trigger: &Trigger, outcome: FireOutcome) -> Self {
        Self {
            trigger_id: trigger.id,
            trigger_name: trigger.name.clone(),
            outcome,
        }
    }
}
