//! Trigger actions: what runs when a trigger fires.

use crate::artifact::TriggerArtifactVariable;
use crate::template::TemplateValue;
use serde::{Deserialize, Serialize};
use std::fmt;
use tripwire_core::{PipelineId, WorkflowId};

/// A pipeline or workflow that can be deployed or whose history can be read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum DeploymentTarget {
    /// A pipeline.
    Pipeline(PipelineId),
    /// A workflow.
    Workflow(WorkflowId),
}

impl DeploymentTarget {
    /// Returns the kind of target.
    #[must_use]
    pub const fn kind(&self) -> ActionKind {
        match self {
            Self::Pipeline(_) => ActionKind::Pipeline,
            Self::Workflow(_) => ActionKind::Workflow,
        }
    }
}

impl fmt::Display for DeploymentTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pipeline(id) => id.fmt(f),
            Self::Workflow(id) => id.fmt(f),
        }
    }
}

/// Whether an action targets a pipeline or a workflow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    /// Runs a pipeline.
    Pipeline,
    /// Runs a workflow.
    Workflow,
}

impl ActionKind {
    /// Returns the string representation.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Pipeline => "pipeline",
            Self::Workflow => "workflow",
        }
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A named variable override supplied by the trigger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TriggerVariable {
    /// Variable name as declared by the pipeline or workflow.
    pub name: String,
    /// Literal value or placeholder.
    pub value: TemplateValue<String>,
}

impl TriggerVariable {
    /// Creates a variable, treating `${...}` text as a placeholder.
    #[must_use]
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: TemplateValue::text(value),
        }
    }
}

/// Arguments passed to the deployment when the trigger fires.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TriggerArgs {
    /// Variable overrides.
    #[serde(default)]
    pub variables: Vec<TriggerVariable>,
    /// Skip hosts that already run the selected artifact.
    #[serde(default)]
    pub exclude_hosts_with_same_artifact: bool,
    /// Let the execution engine fall back to variable defaults.
    #[serde(default)]
    pub continue_with_default_values: bool,
    /// Artifact variable bindings.
    #[serde(default)]
    pub artifact_variables: Vec<TriggerArtifactVariable>,
}

impl TriggerArgs {
    /// Returns the configured value of `name`, if any.
    #[must_use]
    pub fn variable(&self, name: &str) -> Option<&TemplateValue<String>> {
        self.variables
            .iter()
            .find(|variable| variable.name == name)
            .map(|variable| &variable.value)
    }
}

/// The deployable action of a trigger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TriggerAction {
    /// Start a pipeline.
    Pipeline {
        /// Target pipeline.
        pipeline_id: PipelineId,
        /// Display name, cached at save time.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pipeline_name: Option<String>,
        /// Trigger-time arguments.
        #[serde(default)]
        args: TriggerArgs,
    },
    /// Start a workflow.
    Workflow {
        /// Target workflow.
        workflow_id: WorkflowId,
        /// Display name, cached at save time.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        workflow_name: Option<String>,
        /// Trigger-time arguments.
        #[serde(default)]
        args: TriggerArgs,
    },
}

impl TriggerAction {
    /// Creates a pipeline action with the given arguments.
    #[must_use]
    pub fn pipeline(pipeline_id: PipelineId, args: TriggerArgs) -> Self {
        Self::Pipeline {
            pipeline_id,
            pipeline_name: None,
            args,
        }
    }

    /// Creates a workflow action with the given arguments.
    #[must_use]
    pub fn workflow(workflow_id: WorkflowId, args: TriggerArgs) -> Self {
        Self::Workflow {
            workflow_id,
            workflow_name: None,
            args,
        }
    }

    /// Returns the target of this action.
    #[must_use]
    pub const fn target(&self) -> DeploymentTarget {
        match self {
            Self::Pipeline { pipeline_id, .. } => DeploymentTarget::Pipeline(*pipeline_id),
            Self::Workflow { workflow_id, .. } => DeploymentTarget::Workflow(*workflow_id),
        }
    }

    /// Returns the kind of action.
    #[must_use]
    pub const fn kind(&self) -> ActionKind {
        self.target().kind()
    }

    /// Returns the trigger-time arguments.
    #[must_use]
    pub const fn args(&self) -> &TriggerArgs {
        match self {
            Self::Pipeline { args, .. } | Self::Workflow { args, .. } => args,
        }
    }

    /// Returns the trigger-time arguments mutably.
    pub fn args_mut(&mut self) -> &mut TriggerArgs {
        match self {
            Self::Pipeline { args, .. } | Self::Workflow { args, .. } => args,
        }
    }

    /// Returns the cached display name of the target.
    #[must_use]
    pub fn target_name(&self) -> Option<&str> {
        match self {
            Self::Pipeline { pipeline_name, .. } => pipeline_name.as_deref(),
            Self::Workflow { workflow_name, .. } => workflow_name.as_deref(),
        }
    }

    /// Caches the display name of the target.
    pub fn set_target_name(&mut self, name: impl Into<String>) {
        let name = Some(name.into());
        match self {
            Self::Pipeline { pipeline_name, .. } => *pipeline_name = name,
            Self::Workflow { workflow_name, .. } => *workflow_name = name,
        }
    }
}
