//! Artifact variable bindings and selection policies.

use crate::action::DeploymentTarget;
use crate::template::TemplateValue;
use serde::{Deserialize, Serialize};
use std::fmt;
use tripwire_core::{ArtifactServerId, ArtifactStreamId};

/// A build filter applied to artifact build numbers and file names.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ArtifactFilterSpec {
    /// The filter text.
    pub pattern: String,
    /// Interpret `pattern` as a regular expression instead of a glob.
    #[serde(default)]
    pub regex: bool,
}

impl ArtifactFilterSpec {
    /// A glob filter (`*` any run, `?` one character).
    #[must_use]
    pub fn glob(pattern: impl Into<String>) -> Self {
        Self {
            pattern: pattern.into(),
            regex: false,
        }
    }

    /// A regular-expression filter.
    #[must_use]
    pub fn regex(pattern: impl Into<String>) -> Self {
        Self {
            pattern: pattern.into(),
            regex: true,
        }
    }
}

/// The kind of entity an artifact variable is scoped to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScopeEntityType {
    /// Scoped to a service.
    Service,
    /// Scoped to an environment.
    Environment,
    /// Scoped to a workflow.
    Workflow,
}

/// The entity an artifact variable belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct VariableScope {
    /// Kind of entity.
    pub entity_type: ScopeEntityType,
    /// Id of the entity, in its display form.
    pub entity_id: String,
}

/// How the artifact for a variable is chosen at fire time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "policy", rename_all = "snake_case")]
pub enum ArtifactSelection {
    /// The newest artifact collected on a stream.
    LastCollected {
        /// Stream to read.
        artifact_stream: TemplateValue<ArtifactStreamId>,
        /// Optional build filter.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        filter: Option<ArtifactFilterSpec>,
        /// Display name, filled on read.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        artifact_stream_name: Option<String>,
    },
    /// Whatever a pipeline or workflow last deployed.
    LastDeployed {
        /// Deployment whose history is consulted.
        source: DeploymentTarget,
        /// Display name, filled on save and read.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        source_name: Option<String>,
    },
    /// The artifact that caused this trigger to fire.
    FromTriggeringArtifactSource,
    /// Whatever the completing upstream pipeline deployed.
    FromUpstreamPipeline,
    /// A build named by the inbound webhook payload.
    FromWebhookPayload {
        /// Artifact server.
        artifact_server: TemplateValue<ArtifactServerId>,
        /// Artifact stream on that server.
        artifact_stream: TemplateValue<ArtifactStreamId>,
        /// Build number or tag.
        build_number: TemplateValue<String>,
        /// Display name of a literal stream, filled on save and read.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        artifact_stream_name: Option<String>,
    },
}

impl ArtifactSelection {
    /// Returns the policy name.
    #[must_use]
    pub const fn policy(&self) -> &'static str {
        match self {
            Self::LastCollected { .. } => "last_collected",
            Self::LastDeployed { .. } => "last_deployed",
            Self::FromTriggeringArtifactSource => "from_triggering_artifact_source",
            Self::FromUpstreamPipeline => "from_upstream_pipeline",
            Self::FromWebhookPayload { .. } => "from_webhook_payload",
        }
    }

    /// Returns true if any part of the selection is a placeholder.
    #[must_use]
    pub fn has_placeholder(&self) -> bool {
        match self {
            Self::LastCollected {
                artifact_stream, ..
            } => artifact_stream.is_placeholder(),
            Self::FromWebhookPayload {
                artifact_server,
                artifact_stream,
                build_number,
                ..
            } => {
                artifact_server.is_placeholder()
                    || artifact_stream.is_placeholder()
                    || build_number.is_placeholder()
            }
            Self::LastDeployed { .. }
            | Self::FromTriggeringArtifactSource
            | Self::FromUpstreamPipeline => false,
        }
    }
}

impl fmt::Display for ArtifactSelection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.policy())
    }
}

/// Binds a deployment-level artifact variable to a selection policy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TriggerArtifactVariable {
    /// Artifact variable name as declared by the deployment.
    pub name: String,
    /// Entity the variable is scoped to; `None` matches any scope.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<VariableScope>,
    /// Selection policy.
    pub selection: ArtifactSelection,
}

impl TriggerArtifactVariable {
    /// Creates an unscoped binding.
    #[must_use]
    pub fn new(name: impl Into<String>, selection: ArtifactSelection) -> Self {
        Self {
            name: name.into(),
            scope: None,
            selection,
        }
    }

    /// Returns true if this binding applies to a variable declared as
    /// `name` within `scope`.
    #[must_use]
    pub fn binds(&self, name: &str, scope: Option<&VariableScope>) -> bool {
        self.name == name
            && match (&self.scope, scope) {
                (None, _) => true,
                (Some(own), Some(other)) => own == other,
                (Some(_), None) => false,
            }
    }
}
