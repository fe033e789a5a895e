//! Narrow interfaces onto external metadata.
//!
//! Artifact collection, pipeline/workflow definitions and the entity
//! inventory are owned by other services. The trigger engine only reads
//! them, through the three traits in this module.

use crate::error::CatalogError;
use crate::filter::ArtifactFilter;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tripwire_core::{
    AppId, ArtifactId, ArtifactServerId, ArtifactStreamId, EnvironmentId, InfraDefinitionId,
    InfraMappingId, PipelineId, ServiceId, WorkflowId,
};
use tripwire_trigger::{DeploymentTarget, VariableScope};

/// A collected build.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Artifact {
    pub id: ArtifactId,
    pub artifact_stream_id: ArtifactStreamId,
    /// Build number or tag.
    pub build_number: String,
    /// Names of the files in the build, when the source lists them.
    #[serde(default)]
    pub file_names: Vec<String>,
    /// Service the stream is bound to.
    #[serde(default)]
    pub service_id: Option<ServiceId>,
    pub collected_at: DateTime<Utc>,
    /// Set when the collector saw this build before.
    #[serde(default)]
    pub duplicate: bool,
}

/// A source of artifacts on an artifact server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactStream {
    pub id: ArtifactStreamId,
    pub app_id: AppId,
    pub name: String,
    /// Source description, e.g. the image or job name.
    pub source_name: String,
    pub artifact_server_id: ArtifactServerId,
    pub artifact_server_name: String,
    /// Service the stream is bound to.
    #[serde(default)]
    pub service_id: Option<ServiceId>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Service {
    pub id: ServiceId,
    pub app_id: AppId,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Environment {
    pub id: EnvironmentId,
    pub app_id: AppId,
    pub name: String,
}

/// Infrastructure addressed by definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InfraDefinition {
    pub id: InfraDefinitionId,
    pub env_id: EnvironmentId,
    pub name: String,
}

/// Legacy service infrastructure mapping.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InfraMapping {
    pub id: InfraMappingId,
    pub env_id: EnvironmentId,
    pub name: String,
    /// Definition this mapping was migrated to, if any.
    #[serde(default)]
    pub infra_definition_id: Option<InfraDefinitionId>,
}

/// Kinds of entity a templated variable can stand for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Environment,
    Service,
    InfraMapping,
    InfraDefinition,
}

/// Kind of a declared variable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "entity", rename_all = "snake_case")]
pub enum VariableKind {
    /// Free text.
    Text,
    /// Stands for an entity id.
    Entity(EntityKind),
}

/// A variable declared by a pipeline or workflow.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Variable {
    pub name: String,
    pub kind: VariableKind,
    #[serde(default)]
    pub mandatory: bool,
    /// Value is supplied by a person when the execution starts.
    #[serde(default)]
    pub runtime_input: bool,
    /// Accepts a comma-separated list.
    #[serde(default)]
    pub allow_multiple_values: bool,
    #[serde(default)]
    pub default_value: Option<String>,
    /// Environment an infrastructure variable is pinned to.
    #[serde(default)]
    pub env_id: Option<EnvironmentId>,
}

impl Variable {
    /// Creates an optional free-text variable.
    #[must_use]
    pub fn text(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: VariableKind::Text,
            mandatory: false,
            runtime_input: false,
            allow_multiple_values: false,
            default_value: None,
            env_id: None,
        }
    }

    /// Creates a mandatory entity variable.
    #[must_use]
    pub fn entity(name: impl Into<String>, kind: EntityKind) -> Self {
        Self {
            kind: VariableKind::Entity(kind),
            mandatory: true,
            ..Self::text(name)
        }
    }

    /// Returns the entity kind for entity variables.
    #[must_use]
    pub const fn entity_kind(&self) -> Option<EntityKind> {
        match self.kind {
            VariableKind::Entity(kind) => Some(kind),
            VariableKind::Text => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowKind {
    Deployment,
    /// Builds artifacts instead of deploying them.
    Build,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Workflow {
    pub id: WorkflowId,
    pub app_id: AppId,
    pub name: String,
    pub kind: WorkflowKind,
    /// Environment of a non-templated workflow.
    #[serde(default)]
    pub env_id: Option<EnvironmentId>,
    /// Any of environment, service or infrastructure is templated.
    #[serde(default)]
    pub templatized: bool,
    #[serde(default)]
    pub variables: Vec<Variable>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pipeline {
    pub id: PipelineId,
    pub app_id: AppId,
    pub name: String,
    #[serde(default)]
    pub variables: Vec<Variable>,
    /// A stage runs a build workflow.
    #[serde(default)]
    pub has_build_workflow: bool,
    /// A stage's environment is templated.
    #[serde(default)]
    pub env_parameterized: bool,
}

/// An artifact variable a deployment needs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactVariableRequirement {
    pub name: String,
    #[serde(default)]
    pub scope: Option<VariableScope>,
    /// Service the variable feeds.
    #[serde(default)]
    pub service_id: Option<ServiceId>,
    /// Streams the service accepts; empty accepts any stream.
    #[serde(default)]
    pub allowed_artifact_streams: Vec<ArtifactStreamId>,
}

impl ArtifactVariableRequirement {
    /// Returns true if `stream` is legal for this variable.
    #[must_use]
    pub fn allows(&self, stream: ArtifactStreamId) -> bool {
        self.allowed_artifact_streams.is_empty() || self.allowed_artifact_streams.contains(&stream)
    }
}

/// Artifact needs of a deployment, given its resolved variables.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DeploymentMetadata {
    #[serde(default)]
    pub artifact_variables: Vec<ArtifactVariableRequirement>,
    /// Services that need an artifact.
    #[serde(default)]
    pub required_service_ids: Vec<ServiceId>,
}

/// Artifact collection metadata.
#[async_trait]
pub trait ArtifactCatalog: Send + Sync {
    async fn artifact_stream(
        &self,
        id: ArtifactStreamId,
    ) -> Result<Option<ArtifactStream>, CatalogError>;

    async fn artifact_stream_by_name(
        &self,
        app_id: AppId,
        name: &str,
    ) -> Result<Option<ArtifactStream>, CatalogError>;

    /// Returns the most recently collected artifact of a stream.
    async fn last_collected_artifact(
        &self,
        stream: ArtifactStreamId,
    ) -> Result<Option<Artifact>, CatalogError>;

    /// Returns the most recently collected artifact accepted by `filter`.
    async fn artifact_by_build_filter(
        &self,
        stream: ArtifactStreamId,
        filter: &ArtifactFilter,
    ) -> Result<Option<Artifact>, CatalogError>;

    async fn artifact_by_build_number(
        &self,
        stream: ArtifactStreamId,
        build_number: &str,
    ) -> Result<Option<Artifact>, CatalogError>;

    /// Asks the collector to fetch a build that has not been collected yet.
    async fn collect_build(
        &self,
        _stream: ArtifactStreamId,
        _build_number: &str,
    ) -> Result<Option<Artifact>, CatalogError> {
        Ok(None)
    }

    /// Returns the artifacts of the last successful execution of `source`.
    async fn last_deployed_artifacts(
        &self,
        app_id: AppId,
        source: DeploymentTarget,
    ) -> Result<Vec<Artifact>, CatalogError>;
}

/// Pipeline and workflow definitions.
#[async_trait]
pub trait DeploymentCatalog: Send + Sync {
    async fn pipeline(&self, app_id: AppId, id: PipelineId)
    -> Result<Option<Pipeline>, CatalogError>;

    async fn workflow(&self, app_id: AppId, id: WorkflowId)
    -> Result<Option<Workflow>, CatalogError>;

    /// Returns the artifact needs of `target` once `variables` are applied.
    async fn deployment_metadata(
        &self,
        app_id: AppId,
        target: DeploymentTarget,
        variables: &BTreeMap<String, String>,
    ) -> Result<DeploymentMetadata, CatalogError>;
}

/// Services, environments and infrastructure.
#[async_trait]
pub trait EntityCatalog: Send + Sync {
    async fn service(&self, app_id: AppId, id: ServiceId) -> Result<Option<Service>, CatalogError>;

    async fn service_by_name(
        &self,
        app_id: AppId,
        name: &str,
    ) -> Result<Option<Service>, CatalogError>;

    async fn environment(
        &self,
        app_id: AppId,
        id: EnvironmentId,
    ) -> Result<Option<Environment>, CatalogError>;

    async fn environment_by_name(
        &self,
        app_id: AppId,
        name: &str,
    ) -> Result<Option<Environment>, CatalogError>;

    async fn infra_definition(
        &self,
        app_id: AppId,
        env_id: EnvironmentId,
        id: InfraDefinitionId,
    ) -> Result<Option<InfraDefinition>, CatalogError>;

    async fn infra_definition_by_name(
        &self,
        app_id: AppId,
        env_id: EnvironmentId,
        name: &str,
    ) -> Result<Option<InfraDefinition>, CatalogError>;

    async fn infra_mapping(
        &self,
        app_id: AppId,
        env_id: EnvironmentId,
        id: InfraMappingId,
    ) -> Result<Option<InfraMapping>, CatalogError>;

    async fn infra_mapping_by_name(
        &self,
        app_id: AppId,
        env_id: EnvironmentId,
        name: &str,
    ) -> Result<Option<InfraMapping>, CatalogError>;
}
