//! In-memory catalog.
//!
//! Holds artifact, deployment and entity metadata in process. Used by tests
//! and by local runs without the backing services.

use crate::catalog::{
    Artifact, ArtifactCatalog, ArtifactStream, DeploymentCatalog, DeploymentMetadata,
    EntityCatalog, Environment, InfraDefinition, InfraMapping, Pipeline, Service, Workflow,
};
use crate::error::CatalogError;
use crate::filter::ArtifactFilter;
use async_trait::async_trait;
use chrono::Utc;
use std::collections::{BTreeMap, HashMap};
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tripwire_core::{
    AppId, ArtifactId, ArtifactStreamId, EnvironmentId, InfraDefinitionId, InfraMappingId,
    PipelineId, ServiceId, WorkflowId,
};
use tripwire_trigger::DeploymentTarget;

#[derive(Default)]
struct State {
    streams: HashMap<ArtifactStreamId, ArtifactStream>,
    /// Collected artifacts per stream, oldest first.
    artifacts: HashMap<ArtifactStreamId, Vec<Artifact>>,
    deployed: HashMap<(AppId, DeploymentTarget), Vec<Artifact>>,
    pipelines: HashMap<PipelineId, Pipeline>,
    workflows: HashMap<WorkflowId, Workflow>,
    metadata: HashMap<DeploymentTarget, DeploymentMetadata>,
    services: HashMap<ServiceId, Service>,
    environments: HashMap<EnvironmentId, Environment>,
    infra_definitions: HashMap<InfraDefinitionId, InfraDefinition>,
    infra_mappings: HashMap<InfraMappingId, InfraMapping>,
}

/// Catalog backed by in-process maps.
#[derive(Default)]
pub struct InMemoryCatalog {
    state: RwLock<State>,
}

impl InMemoryCatalog {
    /// Creates an empty catalog.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, State> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, State> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn add_artifact_stream(&self, stream: ArtifactStream) {
        self.write().streams.insert(stream.id, stream);
    }

    /// Records a newly collected artifact and returns it. The artifact is
    /// bound to the stream's service when the stream is known.
    pub fn collect(&self, stream: ArtifactStreamId, build_number: &str) -> Artifact {
        let service_id = self
            .read()
            .streams
            .get(&stream)
            .and_then(|s| s.service_id);
        let artifact = Artifact {
            id: ArtifactId::new(),
            artifact_stream_id: stream,
            build_number: build_number.to_string(),
            file_names: Vec::new(),
            service_id,
            collected_at: Utc::now(),
            duplicate: false,
        };
        self.push_artifact(artifact.clone());
        artifact
    }

    /// Like [`Self::collect`], without a service binding.
    pub fn collect_unbound(&self, stream: ArtifactStreamId, build_number: &str) -> Artifact {
        let mut artifact = self.collect(stream, build_number);
        artifact.service_id = None;
        artifact
    }

    /// Records an artifact built elsewhere.
    pub fn push_artifact(&self, artifact: Artifact) {
        self.write()
            .artifacts
            .entry(artifact.artifact_stream_id)
            .or_default()
            .push(artifact);
    }

    /// Records the artifacts of the last successful execution of `target`.
    pub fn record_deployment(&self, app_id: AppId, target: DeploymentTarget, artifacts: Vec<Artifact>) {
        self.write().deployed.insert((app_id, target), artifacts);
    }

    pub fn add_pipeline(&self, pipeline: Pipeline) {
        self.write().pipelines.insert(pipeline.id, pipeline);
    }

    pub fn add_workflow(&self, workflow: Workflow) {
        self.write().workflows.insert(workflow.id, workflow);
    }

    pub fn set_deployment_metadata(&self, target: DeploymentTarget, metadata: DeploymentMetadata) {
        self.write().metadata.insert(target, metadata);
    }

    pub fn add_service(&self, service: Service) {
        self.write().services.insert(service.id, service);
    }

    pub fn add_environment(&self, environment: Environment) {
        self.write().environments.insert(environment.id, environment);
    }

    pub fn add_infra_definition(&self, definition: InfraDefinition) {
        self.write().infra_definitions.insert(definition.id, definition);
    }

    pub fn add_infra_mapping(&self, mapping: InfraMapping) {
        self.write().infra_mappings.insert(mapping.id, mapping);
    }

    fn newest_where(
        &self,
        stream: ArtifactStreamId,
        accept: impl Fn(&Artifact) -> bool,
    ) -> Option<Artifact> {
        self.read()
            .artifacts
            .get(&stream)
            .and_then(|artifacts| artifacts.iter().rev().find(|a| accept(a)).cloned())
    }
}

#[async_trait]
impl ArtifactCatalog for InMemoryCatalog {
    async fn artifact_stream(
        &self,
        id: ArtifactStreamId,
    ) -> Result<Option<ArtifactStream>, CatalogError> {
        Ok(self.read().streams.get(&id).cloned())
    }

    async fn artifact_stream_by_name(
        &self,
        app_id: AppId,
        name: &str,
    ) -> Result<Option<ArtifactStream>, CatalogError> {
        Ok(self
            .read()
            .streams
            .values()
            .find(|s| s.app_id == app_id && s.name == name)
            .cloned())
    }

    async fn last_collected_artifact(
        &self,
        stream: ArtifactStreamId,
    ) -> Result<Option<Artifact>, CatalogError> {
        Ok(self.newest_where(stream, |_| true))
    }

    async fn artifact_by_build_filter(
        &self,
        stream: ArtifactStreamId,
        filter: &ArtifactFilter,
    ) -> Result<Option<Artifact>, CatalogError> {
        Ok(self.newest_where(stream, |a| filter.matches(a)))
    }

    async fn artifact_by_build_number(
        &self,
        stream: ArtifactStreamId,
        build_number: &str,
    ) -> Result<Option<Artifact>, CatalogError> {
        Ok(self.newest_where(stream, |a| a.build_number == build_number))
    }

    async fn last_deployed_artifacts(
        &self,
        app_id: AppId,
        source: DeploymentTarget,
    ) -> Result<Vec<Artifact>, CatalogError> {
        Ok(self
            .read()
            .deployed
            .get(&(app_id, source))
            .cloned()
            .unwrap_or_default())
    }
}

#[async_trait]
impl DeploymentCatalog for InMemoryCatalog {
    async fn pipeline(
        &self,
        app_id: AppId,
        id: PipelineId,
    ) -> Result<Option<Pipeline>, CatalogError> {
        Ok(self
            .read()
            .pipelines
            .get(&id)
            .filter(|p| p.app_id == app_id)
            .cloned())
    }

    async fn workflow(
        &self,
        app_id: AppId,
        id: WorkflowId,
    ) -> Result<Option<Workflow>, CatalogError> {
        Ok(self
            .read()
            .workflows
            .get(&id)
            .filter(|w| w.app_id == app_id)
            .cloned())
    }

    async fn deployment_metadata(
        &self,
        _app_id: AppId,
        target: DeploymentTarget,
        _variables: &BTreeMap<String, String>,
    ) -> Result<DeploymentMetadata, CatalogError> {
        Ok(self.read().metadata.get(&target).cloned().unwrap_or_default())
    }
}

#[async_trait]
impl EntityCatalog for InMemoryCatalog {
    async fn service(&self, app_id: AppId, id: ServiceId) -> Result<Option<Service>, CatalogError> {
        Ok(self
            .read()
            .services
            .get(&id)
            .filter(|s| s.app_id == app_id)
            .cloned())
    }

    async fn service_by_name(
        &self,
        app_id: AppId,
        name: &str,
    ) -> Result<Option<Service>, CatalogError> {
        Ok(self
            .read()
            .services
            .values()
            .find(|s| s.app_id == app_id && s.name == name)
            .cloned())
    }

    async fn environment(
        &self,
        app_id: AppId,
        id: EnvironmentId,
    ) -> Result<Option<Environment>, CatalogError> {
        Ok(self
            .read()
            .environments
            .get(&id)
            .filter(|e| e.app_id == app_id)
            .cloned())
    }

    async fn environment_by_name(
        &self,
        app_id: AppId,
        name: &str,
    ) -> Result<Option<Environment>, CatalogError> {
        Ok(self
            .read()
            .environments
            .values()
            .find(|e| e.app_id == app_id && e.name == name)
            .cloned())
    }

    async fn infra_definition(
        &self,
        _app_id: AppId,
        env_id: EnvironmentId,
        id: InfraDefinitionId,
    ) -> Result<Option<InfraDefinition>, CatalogError> {
        Ok(self
            .read()
            .infra_definitions
            .get(&id)
            .filter(|d| d.env_id == env_id)
            .cloned())
    }

    async fn infra_definition_by_name(
        &self,
        _app_id: AppId,
        env_id: EnvironmentId,
        name: &str,
    ) -> Result<Option<InfraDefinition>, CatalogError> {
        Ok(self
            .read()
            .infra_definitions
            .values()
            .find(|d| d.env_id == env_id && d.name == name)
            .cloned())
    }

    async fn infra_mapping(
        &self,
        _app_id: AppId,
        env_id: EnvironmentId,
        id: InfraMappingId,
    ) -> Result<Option<InfraMapping>, CatalogError> {
        Ok(self
            .read()
            .infra_mappings
            .get(&id)
            .filter(|m| m.env_id == env_id)
            .cloned())
    }

    async fn infra_mapping_by_name(
        &self,
        _app_id: AppId,
        env_id: EnvironmentId,
        name: &str,
    ) -> Result<Option<InfraMapping>, CatalogError> {
        Ok(self
            .read()
            .infra_mappings
            .values()
            .find(|m| m.env_id == env_id && m.name == name)
            .cloned())
    }
}
