//! Request/reply clients for the services the engine depends on.

use super::Subjects;
use async_nats::Client;
use async_trait::async_trait;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use std::collections::BTreeMap;
use std::fmt;
use tracing::trace;
use tripwire_core::{
    AppId, ArtifactStreamId, EnvironmentId, InfraDefinitionId, InfraMappingId, PipelineId,
    ServiceId, WorkflowId,
};
use tripwire_engine::{
    ContentChangeChecker, ContentCheckError, ExecutionEngine, ExecutionEngineError,
};
use tripwire_resolver::{
    Artifact, ArtifactCatalog, ArtifactFilter, ArtifactStream, CatalogError, DeploymentCatalog,
    DeploymentMetadata, EntityCatalog, Environment, InfraDefinition, InfraMapping, Pipeline,
    Service, Workflow,
};
use tripwire_trigger::{
    ContentCheck, DeploymentTarget, ExecutionHandle, ExecutionRequest, TriggerExecution,
};

const ARTIFACTS: &str = "catalog.artifacts";
const DEPLOYMENTS: &str = "catalog.deployments";
const ENTITIES: &str = "catalog.entities";
const EXECUTIONS: &str = "executions";
const CONTENT_CHECKS: &str = "content_checks";

#[derive(Debug)]
enum CallError {
    Unavailable(String),
    Decode(String),
}

impl fmt::Display for CallError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unavailable(message) | Self::Decode(message) => f.write_str(message),
        }
    }
}

impl From<CallError> for CatalogError {
    fn from(e: CallError) -> Self {
        match e {
            CallError::Unavailable(message) => Self::Unavailable { message },
            CallError::Decode(message) => Self::Decode { message },
        }
    }
}

impl From<CallError> for ExecutionEngineError {
    fn from(e: CallError) -> Self {
        Self::Unavailable {
            message: e.to_string(),
        }
    }
}

impl From<CallError> for ContentCheckError {
    fn from(e: CallError) -> Self {
        Self::Unavailable {
            message: e.to_string(),
        }
    }
}

/// Answer to a submission.
#[derive(Debug, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
enum SubmitReply {
    Accepted(ExecutionHandle),
    Rejected { message: String },
}

/// Answer to a content-check request.
#[derive(Debug, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
enum CheckReply {
    Accepted,
    Failed { message: String },
}

/// NATS request/reply implementation of every outbound collaborator.
#[derive(Clone)]
pub struct NatsCollaborators {
    client: Client,
    subjects: Subjects,
}

impl NatsCollaborators {
    #[must_use]
    pub fn new(client: Client, subjects: Subjects) -> Self {
        Self { client, subjects }
    }

    async fn call<R: DeserializeOwned>(
        &self,
        service: &str,
        operation: &str,
        body: Value,
    ) -> Result<R, CallError> {
        let subject = self.subjects.request(service, operation);
        trace!(%subject, "request");
        let payload = serde_json::to_vec(&body).map_err(|e| CallError::Decode(e.to_string()))?;
        let reply = self
            .client
            .request(subject.clone(), payload.into())
            .await
            .map_err(|e| CallError::Unavailable(format!("{subject}: {e}")))?;
        serde_json::from_slice(&reply.payload)
            .map_err(|e| CallError::Decode(format!("{subject}: {e}")))
    }
}

#[async_trait]
impl ArtifactCatalog for NatsCollaborators {
    async fn artifact_stream(
        &self,
        id: ArtifactStreamId,
    ) -> Result<Option<ArtifactStream>, CatalogError> {
        Ok(self
            .call(ARTIFACTS, "artifact_stream", json!({ "id": id }))
            .await?)
    }

    async fn artifact_stream_by_name(
        &self,
        app_id: AppId,
        name: &str,
    ) -> Result<Option<ArtifactStream>, CatalogError> {
        Ok(self
            .call(
                ARTIFACTS,
                "artifact_stream_by_name",
                json!({ "app_id": app_id, "name": name }),
            )
            .await?)
    }

    async fn last_collected_artifact(
        &self,
        stream: ArtifactStreamId,
    ) -> Result<Option<Artifact>, CatalogError> {
        Ok(self
            .call(
                ARTIFACTS,
                "last_collected_artifact",
                json!({ "artifact_stream_id": stream }),
            )
            .await?)
    }

    async fn artifact_by_build_filter(
        &self,
        stream: ArtifactStreamId,
        filter: &ArtifactFilter,
    ) -> Result<Option<Artifact>, CatalogError> {
        Ok(self
            .call(
                ARTIFACTS,
                "artifact_by_build_filter",
                json!({ "artifact_stream_id": stream, "filter": filter.spec() }),
            )
            .await?)
    }

    async fn artifact_by_build_number(
        &self,
        stream: ArtifactStreamId,
        build_number: &str,
    ) -> Result<Option<Artifact>, CatalogError> {
        Ok(self
            .call(
                ARTIFACTS,
                "artifact_by_build_number",
                json!({ "artifact_stream_id": stream, "build_number": build_number }),
            )
            .await?)
    }

    async fn collect_build(
        &self,
        stream: ArtifactStreamId,
        build_number: &str,
    ) -> Result<Option<Artifact>, CatalogError> {
        Ok(self
            .call(
                ARTIFACTS,
                "collect_build",
                json!({ "artifact_stream_id": stream, "build_number": build_number }),
            )
            .await?)
    }

    async fn last_deployed_artifacts(
        &self,
        app_id: AppId,
        source: DeploymentTarget,
    ) -> Result<Vec<Artifact>, CatalogError> {
        Ok(self
            .call(
                ARTIFACTS,
                "last_deployed_artifacts",
                json!({ "app_id": app_id, "source": source }),
            )
            .await?)
    }
}

#[async_trait]
impl DeploymentCatalog for NatsCollaborators {
    async fn pipeline(
        &self,
        app_id: AppId,
        id: PipelineId,
    ) -> Result<Option<Pipeline>, CatalogError> {
        Ok(self
            .call(DEPLOYMENTS, "pipeline", json!({ "app_id": app_id, "id": id }))
            .await?)
    }

    async fn workflow(
        &self,
        app_id: AppId,
        id: WorkflowId,
    ) -> Result<Option<Workflow>, CatalogError> {
        Ok(self
            .call(DEPLOYMENTS, "workflow", json!({ "app_id": app_id, "id": id }))
            .await?)
    }

    async fn deployment_metadata(
        &self,
        app_id: AppId,
        target: DeploymentTarget,
        variables: &BTreeMap<String, String>,
    ) -> Result<DeploymentMetadata, CatalogError> {
        Ok(self
            .call(
                DEPLOYMENTS,
                "deployment_metadata",
                json!({ "app_id": app_id, "target": target, "variables": variables }),
            )
            .await?)
    }
}

#[async_trait]
impl EntityCatalog for NatsCollaborators {
    async fn service(&self, app_id: AppId, id: ServiceId) -> Result<Option<Service>, CatalogError> {
        Ok(self
            .call(ENTITIES, "service", json!({ "app_id": app_id, "id": id }))
            .await?)
    }

    async fn service_by_name(
        &self,
        app_id: AppId,
        name: &str,
    ) -> Result<Option<Service>, CatalogError> {
        Ok(self
            .call(
                ENTITIES,
                "service_by_name",
                json!({ "app_id": app_id, "name": name }),
            )
            .await?)
    }

    async fn environment(
        &self,
        app_id: AppId,
        id: EnvironmentId,
    ) -> Result<Option<Environment>, CatalogError> {
        Ok(self
            .call(ENTITIES, "environment", json!({ "app_id": app_id, "id": id }))
            .await?)
    }

    async fn environment_by_name(
        &self,
        app_id: AppId,
        name: &str,
    ) -> Result<Option<Environment>, CatalogError> {
        Ok(self
            .call(
                ENTITIES,
                "environment_by_name",
                json!({ "app_id": app_id, "name": name }),
            )
            .await?)
    }

    async fn infra_definition(
        &self,
        app_id: AppId,
        env_id: EnvironmentId,
        id: InfraDefinitionId,
    ) -> Result<Option<InfraDefinition>, CatalogError> {
        Ok(self
            .call(
                ENTITIES,
                "infra_definition",
                json!({ "app_id": app_id, "env_id": env_id, "id": id }),
            )
            .await?)
    }

    async fn infra_definition_by_name(
        &self,
        app_id: AppId,
        env_id: EnvironmentId,
        name: &str,
    ) -> Result<Option<InfraDefinition>, CatalogError> {
        Ok(self
            .call(
                ENTITIES,
                "infra_definition_by_name",
                json!({ "app_id": app_id, "env_id": env_id, "name": name }),
            )
            .await?)
    }

    async fn infra_mapping(
        &self,
        app_id: AppId,
        env_id: EnvironmentId,
        id: InfraMappingId,
    ) -> Result<Option<InfraMapping>, CatalogError> {
        Ok(self
            .call(
                ENTITIES,
                "infra_mapping",
                json!({ "app_id": app_id, "env_id": env_id, "id": id }),
            )
            .await?)
    }

    async fn infra_mapping_by_name(
        &self,
        app_id: AppId,
        env_id: EnvironmentId,
        name: &str,
    ) -> Result<Option<InfraMapping>, CatalogError> {
        Ok(self
            .call(
                ENTITIES,
                "infra_mapping_by_name",
                json!({ "app_id": app_id, "env_id": env_id, "name": name }),
            )
            .await?)
    }
}

#[async_trait]
impl ExecutionEngine for NatsCollaborators {
    async fn submit(
        &self,
        app_id: AppId,
        env_id: Option<EnvironmentId>,
        request: &ExecutionRequest,
    ) -> Result<ExecutionHandle, ExecutionEngineError> {
        let reply: SubmitReply = self
            .call(
                EXECUTIONS,
                "submit",
                json!({ "app_id": app_id, "env_id": env_id, "request": request }),
            )
            .await?;
        match reply {
            SubmitReply::Accepted(handle) => Ok(handle),
            SubmitReply::Rejected { message } => Err(ExecutionEngineError::Rejected { message }),
        }
    }
}

#[async_trait]
impl ContentChangeChecker for NatsCollaborators {
    async fn request_check(
        &self,
        execution: &TriggerExecution,
        previous: &TriggerExecution,
        check: &ContentCheck,
    ) -> Result<(), ContentCheckError> {
        let reply: CheckReply = self
            .call(
                CONTENT_CHECKS,
                "request",
                json!({
                    "app_id": execution.app_id,
                    "trigger_execution_id": execution.id,
                    "previous_trigger_execution_id": previous.id,
                    "current": execution.webhook_event,
                    "previous": previous.webhook_event,
                    "check": check,
                }),
            )
            .await?;
        match reply {
            CheckReply::Accepted => Ok(()),
            CheckReply::Failed { message } => Err(ContentCheckError::Failed { message }),
        }
    }
}
