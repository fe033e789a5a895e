//! The trigger entity.
//!
//! Triggers belong to an application and are unique by name within it. The
//! condition tag decides which condition processor owns the trigger; the
//! action tag decides whether a pipeline or a workflow is started.

use crate::action::{DeploymentTarget, TriggerAction};
use crate::artifact::ArtifactSelection;
use crate::condition::{TriggerCondition, TriggerConditionType};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tripwire_core::{AccountId, AppId, ArtifactStreamId, PipelineId, TriggerId, WorkflowId};

/// A stored rule binding a condition to a deployable action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Trigger {
    /// Unique identifier for this trigger.
    pub id: TriggerId,
    /// Owning application.
    pub app_id: AppId,
    /// Owning account.
    pub account_id: AccountId,
    /// Name, unique within the application.
    pub name: String,
    /// Optional free-form description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// What makes the trigger fire.
    pub condition: TriggerCondition,
    /// What runs when it fires.
    pub action: TriggerAction,
    /// Disabled triggers are kept but never fire.
    #[serde(default)]
    pub disabled: bool,
    /// Webhook token, mirrored from a webhook condition.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub webhook_token: Option<String>,
    /// Next due time of a scheduled trigger; `None` when nothing is pending.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_fire_at: Option<DateTime<Utc>>,
    /// When this trigger was created.
    pub created_at: DateTime<Utc>,
    /// When this trigger was last updated.
    pub updated_at: DateTime<Utc>,
}

impl Trigger {
    /// Creates a new, enabled trigger.
    #[must_use]
    pub fn new(
        app_id: AppId,
        account_id: AccountId,
        name: impl Into<String>,
        condition: TriggerCondition,
        action: TriggerAction,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: TriggerId::new(),
            app_id,
            account_id,
            name: name.into(),
            description: None,
            condition,
            action,
            disabled: false,
            webhook_token: None,
            next_fire_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Returns the condition type.
    #[must_use]
    pub const fn condition_type(&self) -> TriggerConditionType {
        self.condition.condition_type()
    }

    /// Enables this trigger.
    pub fn enable(&mut self) {
        self.disabled = false;
        self.updated_at = Utc::now();
    }

    /// Disables this trigger.
    pub fn disable(&mut self) {
        self.disabled = true;
        self.updated_at = Utc::now();
    }

    /// Returns true if this trigger starts, or is fired by, `pipeline_id`.
    #[must_use]
    pub fn references_pipeline(&self, pipeline_id: PipelineId) -> bool {
        let upstream = matches!(
            &self.condition,
            TriggerCondition::PipelineCompletion(c) if c.pipeline_id == pipeline_id
        );
        upstream
            || self.action.target() == DeploymentTarget::Pipeline(pipeline_id)
            || self.reads_history_of(DeploymentTarget::Pipeline(pipeline_id))
    }

    /// Returns true if this trigger starts `workflow_id` or reads its
    /// deployment history.
    #[must_use]
    pub fn references_workflow(&self, workflow_id: WorkflowId) -> bool {
        self.action.target() == DeploymentTarget::Workflow(workflow_id)
            || self.reads_history_of(DeploymentTarget::Workflow(workflow_id))
    }

    /// Returns true if this trigger watches or selects from `stream_id`.
    #[must_use]
    pub fn references_artifact_stream(&self, stream_id: ArtifactStreamId) -> bool {
        let watched = matches!(
            &self.condition,
            TriggerCondition::Artifact(c) if c.artifact_stream_id == stream_id
        );
        watched
            || self
                .action
                .args()
                .artifact_variables
                .iter()
                .any(|binding| match &binding.selection {
                    ArtifactSelection::LastCollected {
                        artifact_stream, ..
                    }
                    | ArtifactSelection::FromWebhookPayload {
                        artifact_stream, ..
                    } => artifact_stream.literal() == Some(&stream_id),
                    _ => false,
                })
    }

    fn reads_history_of(&self, target: DeploymentTarget) -> bool {
        self.action
            .args()
            .artifact_variables
            .iter()
            .any(|binding| {
                matches!(
                    &binding.selection,
                    ArtifactSelection::LastDeployed { source, .. } if *source == target
                )
            })
    }
}
