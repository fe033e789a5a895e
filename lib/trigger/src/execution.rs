//! Firing records and execution requests.

use crate::action::DeploymentTarget;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use tripwire_core::{
    AppId, ArtifactId, ArtifactStreamId, ConnectorId, EnvironmentId, ExecutionId, ServiceId,
    TriggerExecutionId, TriggerId,
};

/// An artifact chosen for an execution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedArtifact {
    /// Artifact variable this artifact fills, when bound by name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub variable: Option<String>,
    /// The artifact.
    pub artifact_id: ArtifactId,
    /// Stream it was collected on.
    pub artifact_stream_id: ArtifactStreamId,
    /// Build number or tag.
    pub build_number: String,
    /// Service the stream is bound to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_id: Option<ServiceId>,
}

/// Identifies the trigger that created an execution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TriggeredBy {
    /// Trigger id.
    pub trigger_id: TriggerId,
    /// Trigger name at fire time.
    pub trigger_name: String,
}

/// A complete request handed to the execution engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionRequest {
    /// Owning application.
    pub app_id: AppId,
    /// Pipeline or workflow to run.
    pub target: DeploymentTarget,
    /// Resolved environment, when the target has one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub env_id: Option<EnvironmentId>,
    /// Variable values after entity resolution.
    pub variables: BTreeMap<String, String>,
    /// Artifacts, de-duplicated by id.
    pub artifacts: Vec<ResolvedArtifact>,
    /// Skip hosts that already run the selected artifact.
    pub exclude_hosts_with_same_artifact: bool,
    /// Let the execution engine fall back to variable defaults.
    pub continue_with_default_values: bool,
    /// Trigger that produced this request.
    pub triggered_by: TriggeredBy,
}

/// An execution accepted by the execution engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionHandle {
    /// Engine-assigned execution id.
    pub execution_id: ExecutionId,
    /// Engine-reported initial status.
    pub status: String,
}

/// Status of a firing attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerExecutionStatus {
    /// Firing in progress.
    Running,
    /// Request accepted, or deliberately skipped.
    Success,
    /// Request rejected or check failed.
    Failed,
}

impl TriggerExecutionStatus {
    /// Returns the string representation.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Success => "success",
            Self::Failed => "failed",
        }
    }

    /// Returns true for `Success` and `Failed`.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Success | Self::Failed)
    }
}

impl fmt::Display for TriggerExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TriggerExecutionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "running" => Ok(Self::Running),
            "success" => Ok(Self::Success),
            "failed" => Ok(Self::Failed),
            other => Err(format!("unknown trigger execution status: {other}")),
        }
    }
}

/// Source-control details captured from a webhook.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct WebhookEventDetails {
    /// Provider event name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event: Option<String>,
    /// Provider sub-action.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<String>,
    /// Branch name, without `refs/heads/`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branch: Option<String>,
    /// Head commit.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub commit_id: Option<String>,
    /// Commit before the push.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous_commit_id: Option<String>,
    /// Repository full name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repo_name: Option<String>,
    /// Connector used for content checks.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub git_connector_id: Option<ConnectorId>,
    /// Files tracked by a content check.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub file_paths: Vec<String>,
}

/// Audit and idempotency record of one firing attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TriggerExecution {
    /// Unique identifier.
    pub id: TriggerExecutionId,
    /// Owning application.
    pub app_id: AppId,
    /// Trigger that fired.
    pub trigger_id: TriggerId,
    /// Trigger name at fire time.
    pub trigger_name: String,
    /// Webhook token, for webhook firings.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub webhook_token: Option<String>,
    /// Current status.
    pub status: TriggerExecutionStatus,
    /// Outcome message.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Webhook details, for webhook firings.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub webhook_event: Option<WebhookEventDetails>,
    /// Request snapshot used for this firing.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub execution_request: Option<ExecutionRequest>,
    /// Execution accepted by the engine.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub execution_id: Option<ExecutionId>,
    /// When the firing began.
    pub created_at: DateTime<Utc>,
    /// When the record last changed.
    pub updated_at: DateTime<Utc>,
}

impl TriggerExecution {
    /// Starts a `Running` record for `request`.
    #[must_use]
    pub fn running(trigger_name: impl Into<String>, request: ExecutionRequest) -> Self {
        let now = Utc::now();
        Self {
            id: TriggerExecutionId::new(),
            app_id: request.app_id,
            trigger_id: request.triggered_by.trigger_id,
            trigger_name: trigger_name.into(),
            webhook_token: None,
            status: TriggerExecutionStatus::Running,
            message: None,
            webhook_event: None,
            execution_request: Some(request),
            execution_id: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Moves the record to `status` with an optional message.
    pub fn finish(&mut self, status: TriggerExecutionStatus, message: Option<String>) {
        self.status = status;
        self.message = message;
        self.updated_at = Utc::now();
    }
}
