//! Trigger conditions: the events that make a trigger fire.

use crate::artifact::ArtifactFilterSpec;
use crate::error::TriggerError;
use crate::webhook::WebhookCondition;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use tripwire_core::{ArtifactStreamId, PipelineId, ServiceId};

/// The type of a trigger condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerConditionType {
    /// A new artifact was collected.
    Artifact,
    /// An upstream pipeline finished.
    PipelineCompletion,
    /// A cron schedule came due.
    Scheduled,
    /// A webhook was received.
    Webhook,
}

impl TriggerConditionType {
    /// Returns the string representation.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Artifact => "artifact",
            Self::PipelineCompletion => "pipeline_completion",
            Self::Scheduled => "scheduled",
            Self::Webhook => "webhook",
        }
    }
}

impl fmt::Display for TriggerConditionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TriggerConditionType {
    type Err = TriggerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "artifact" => Ok(Self::Artifact),
            "pipeline_completion" => Ok(Self::PipelineCompletion),
            "scheduled" => Ok(Self::Scheduled),
            "webhook" => Ok(Self::Webhook),
            other => Err(TriggerError::InvalidTriggerCondition {
                tag: other.to_string(),
            }),
        }
    }
}

/// Fires when an artifact is collected on a stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactCondition {
    /// Stream being watched.
    pub artifact_stream_id: ArtifactStreamId,
    /// Optional build filter.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artifact_filter: Option<ArtifactFilterSpec>,
    /// Service the stream is bound to, cached at save time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_id: Option<ServiceId>,
    /// Display name, `"<source> (<service>)"`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artifact_source_name: Option<String>,
}

impl ArtifactCondition {
    /// Creates a condition watching `artifact_stream_id`.
    #[must_use]
    pub fn new(artifact_stream_id: ArtifactStreamId) -> Self {
        Self {
            artifact_stream_id,
            artifact_filter: None,
            service_id: None,
            artifact_source_name: None,
        }
    }
}

/// Fires when an upstream pipeline completes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineCompletionCondition {
    /// Upstream pipeline.
    pub pipeline_id: PipelineId,
    /// Display name, cached at save time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pipeline_name: Option<String>,
}

/// Fires on a cron schedule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduledCondition {
    /// Cron expression with five or six fields.
    pub cron_expression: String,
    /// Human-readable description computed at save time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cron_description: Option<String>,
    /// Fire only when a selected artifact differs from the last deployment.
    #[serde(default)]
    pub on_new_artifact_only: bool,
}

impl ScheduledCondition {
    /// Creates a condition for `cron_expression`.
    #[must_use]
    pub fn new(cron_expression: impl Into<String>) -> Self {
        Self {
            cron_expression: cron_expression.into(),
            cron_description: None,
            on_new_artifact_only: false,
        }
    }
}

/// The condition of a trigger, tagged by type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TriggerCondition {
    /// New artifact collected.
    Artifact(ArtifactCondition),
    /// Upstream pipeline completed.
    PipelineCompletion(PipelineCompletionCondition),
    /// Cron schedule.
    Scheduled(ScheduledCondition),
    /// Inbound webhook.
    Webhook(WebhookCondition),
}

impl TriggerCondition {
    /// Returns the condition type.
    #[must_use]
    pub const fn condition_type(&self) -> TriggerConditionType {
        match self {
            Self::Artifact(_) => TriggerConditionType::Artifact,
            Self::PipelineCompletion(_) => TriggerConditionType::PipelineCompletion,
            Self::Scheduled(_) => TriggerConditionType::Scheduled,
            Self::Webhook(_) => TriggerConditionType::Webhook,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::webhook::{WebhookEventType, WebhookSource};

    #[test]
    fn condition_type_roundtrip() {
        for ty in [
            TriggerConditionType::Artifact,
            TriggerConditionType::PipelineCompletion,
            TriggerConditionType::Scheduled,
            TriggerConditionType::Webhook,
        ] {
            assert_eq!(ty.as_str().parse::<TriggerConditionType>(), Ok(ty));
        }
    }

    #[test]
    fn unknown_tag_is_invalid_condition() {
        assert_eq!(
            "new_instance".parse::<TriggerConditionType>(),
            Err(TriggerError::InvalidTriggerCondition {
                tag: "new_instance".to_string()
            })
        );
    }

    #[test]
    fn unknown_tag_fails_deserialization() {
        let json = serde_json::json!({"type": "new_instance", "cron_expression": "* * * * *"});
        assert!(serde_json::from_value::<TriggerCondition>(json).is_err());
    }

    #[test]
    fn webhook_condition_serde() {
        let condition = TriggerCondition::Webhook(WebhookCondition::new(
            WebhookSource::GitHub,
            vec![WebhookEventType::Push],
        ));
        let json = serde_json::to_value(&condition).expect("serialize");
        assert_eq!(json["type"], "webhook");
        assert_eq!(json["source"], "github");
        let parsed: TriggerCondition = serde_json::from_value(json).expect("deserialize");
        assert_eq!(parsed.condition_type(), TriggerConditionType::Webhook);
    }
}
