//! Artifact variable resolution.

use crate::catalog::{Artifact, ArtifactCatalog, ArtifactStream, ArtifactVariableRequirement};
use crate::error::ResolveError;
use crate::filter::ArtifactFilter;
use std::sync::Arc;
use tracing::{debug, warn};
use tripwire_core::{AppId, ArtifactServerId, ArtifactStreamId, PipelineId};
use tripwire_trigger::{DeploymentTarget, EntityRef, ResolvedSelection};

/// What the current firing knows about its cause.
#[derive(Debug, Clone, Copy)]
pub struct FiringContext<'a> {
    /// Application of the trigger.
    pub app_id: AppId,
    /// Artifacts carried by the event, newest first.
    pub triggering_artifacts: &'a [Artifact],
    /// Pipeline whose completion caused the firing.
    pub upstream_pipeline: Option<PipelineId>,
}

/// Turns artifact selection policies into concrete artifacts.
#[derive(Clone)]
pub struct ArtifactVariableResolver {
    artifacts: Arc<dyn ArtifactCatalog>,
}

impl ArtifactVariableResolver {
    /// Creates a resolver over `artifacts`.
    #[must_use]
    pub fn new(artifacts: Arc<dyn ArtifactCatalog>) -> Self {
        Self { artifacts }
    }

    /// Resolves `selection` for the deployment variable `requirement`.
    ///
    /// The chosen artifact's stream must be allowed by the requirement.
    pub async fn resolve(
        &self,
        context: &FiringContext<'_>,
        requirement: &ArtifactVariableRequirement,
        selection: &ResolvedSelection,
    ) -> Result<Artifact, ResolveError> {
        match selection {
            ResolvedSelection::LastCollected {
                artifact_stream,
                filter,
            } => {
                let stream = self.stream(context.app_id, artifact_stream).await?;
                ensure_allowed(requirement, stream.id)?;
                match filter {
                    None => self
                        .artifacts
                        .last_collected_artifact(stream.id)
                        .await?
                        .ok_or_else(|| ResolveError::NoMatchingArtifact {
                            artifact_stream: stream.name.clone(),
                            filter: None,
                        }),
                    Some(spec) => {
                        let compiled = ArtifactFilter::compile(spec)?;
                        self.artifacts
                            .artifact_by_build_filter(stream.id, &compiled)
                            .await?
                            .ok_or_else(|| ResolveError::NoMatchingArtifact {
                                artifact_stream: stream.name.clone(),
                                filter: Some(spec.pattern.clone()),
                            })
                    }
                }
            }
            ResolvedSelection::LastDeployed { source } => {
                let deployed = self
                    .artifacts
                    .last_deployed_artifacts(context.app_id, *source)
                    .await?;
                pick_allowed(requirement, deployed, || {
                    ResolveError::NoLastDeployedArtifact {
                        source: source.to_string(),
                    }
                })
            }
            ResolvedSelection::FromTriggeringArtifactSource => {
                pick_allowed(requirement, context.triggering_artifacts.to_vec(), || {
                    ResolveError::NoTriggeringArtifact {
                        variable: requirement.name.clone(),
                    }
                })
            }
            ResolvedSelection::FromUpstreamPipeline => {
                let Some(pipeline) = context.upstream_pipeline else {
                    return Err(ResolveError::NoLastDeployedArtifact {
                        source: "upstream pipeline".to_string(),
                    });
                };
                let deployed = self
                    .artifacts
                    .last_deployed_artifacts(context.app_id, DeploymentTarget::Pipeline(pipeline))
                    .await?;
                pick_allowed(requirement, deployed, || {
                    ResolveError::NoLastDeployedArtifact {
                        source: pipeline.to_string(),
                    }
                })
            }
            ResolvedSelection::FromWebhookPayload {
                artifact_server,
                artifact_stream,
                build_number,
            } => {
                let stream = self.stream(context.app_id, artifact_stream).await?;
                ensure_same_server(&stream, artifact_server)?;
                ensure_allowed(requirement, stream.id)?;
                self.build(&stream, build_number).await
            }
        }
    }

    /// Returns the last deployed artifacts of `source`, logging instead of
    /// failing when there are none.
    pub async fn last_deployed_or_empty(
        &self,
        app_id: AppId,
        source: DeploymentTarget,
    ) -> Result<Vec<Artifact>, ResolveError> {
        let deployed = self.artifacts.last_deployed_artifacts(app_id, source).await?;
        if deployed.is_empty() {
            warn!(source = %source, "no last deployed artifacts found, continuing without");
        }
        Ok(deployed)
    }

    async fn stream(
        &self,
        app_id: AppId,
        reference: &EntityRef<ArtifactStreamId>,
    ) -> Result<ArtifactStream, ResolveError> {
        let found = match reference {
            EntityRef::Id(id) => self.artifacts.artifact_stream(*id).await?,
            EntityRef::Name(name) => self.artifacts.artifact_stream_by_name(app_id, name).await?,
        };
        found.ok_or_else(|| ResolveError::ArtifactStreamNotFound {
            reference: reference.to_string(),
        })
    }

    async fn build(
        &self,
        stream: &ArtifactStream,
        build_number: &str,
    ) -> Result<Artifact, ResolveError> {
        if let Some(artifact) = self
            .artifacts
            .artifact_by_build_number(stream.id, build_number)
            .await?
        {
            return Ok(artifact);
        }
        debug!(artifact_stream = %stream.id, build_number, "build not collected yet, requesting collection");
        self.artifacts
            .collect_build(stream.id, build_number)
            .await?
            .ok_or_else(|| ResolveError::NoMatchingArtifact {
                artifact_stream: stream.name.clone(),
                filter: Some(build_number.to_string()),
            })
    }
}

fn ensure_allowed(
    requirement: &ArtifactVariableRequirement,
    stream: ArtifactStreamId,
) -> Result<(), ResolveError> {
    if requirement.allows(stream) {
        Ok(())
    } else {
        Err(ResolveError::ArtifactStreamNotAllowed {
            variable: requirement.name.clone(),
            artifact_stream: stream.to_string(),
        })
    }
}

fn ensure_same_server(
    stream: &ArtifactStream,
    server: &EntityRef<ArtifactServerId>,
) -> Result<(), ResolveError> {
    let same = match server {
        EntityRef::Id(id) => stream.artifact_server_id == *id,
        EntityRef::Name(name) => stream.artifact_server_name == *name,
    };
    if same {
        Ok(())
    } else {
        Err(ResolveError::ArtifactServerMismatch {
            artifact_stream: stream.name.clone(),
            artifact_server: server.to_string(),
        })
    }
}

/// Picks the first candidate whose stream is allowed. An empty candidate
/// list yields `none`; candidates that are all disallowed yield
/// `ArtifactStreamNotAllowed` for the first of them.
fn pick_allowed(
    requirement: &ArtifactVariableRequirement,
    candidates: Vec<Artifact>,
    none: impl FnOnce() -> ResolveError,
) -> Result<Artifact, ResolveError> {
    let Some(first_stream) = candidates.first().map(|a| a.artifact_stream_id) else {
        return Err(none());
    };
    candidates
        .into_iter()
        .find(|artifact| requirement.allows(artifact.artifact_stream_id))
        .ok_or_else(|| ResolveError::ArtifactStreamNotAllowed {
            variable: requirement.name.clone(),
            artifact_stream: first_stream.to_string(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryCatalog;
    use tripwire_core::{ServiceId, WorkflowId};
    use tripwire_trigger::ArtifactFilterSpec;

    struct Fixture {
        catalog: Arc<InMemoryCatalog>,
        resolver: ArtifactVariableResolver,
        app_id: AppId,
        stream: ArtifactStream,
    }

    fn fixture() -> Fixture {
        let catalog = Arc::new(InMemoryCatalog::new());
        let app_id = AppId::new();
        let stream = ArtifactStream {
            id: ArtifactStreamId::new(),
            app_id,
            name: "api-image".to_string(),
            source_name: "registry/api".to_string(),
            artifact_server_id: ArtifactServerId::new(),
            artifact_server_name: "registry".to_string(),
            service_id: Some(ServiceId::new()),
        };
        catalog.add_artifact_stream(stream.clone());
        Fixture {
            resolver: ArtifactVariableResolver::new(catalog.clone()),
            catalog,
            app_id,
            stream,
        }
    }

    fn requirement(allowed: &[ArtifactStreamId]) -> ArtifactVariableRequirement {
        ArtifactVariableRequirement {
            name: "artifact".to_string(),
            scope: None,
            service_id: None,
            allowed_artifact_streams: allowed.to_vec(),
        }
    }

    fn context(app_id: AppId) -> FiringContext<'static> {
        FiringContext {
            app_id,
            triggering_artifacts: &[],
            upstream_pipeline: None,
        }
    }

    fn last_collected(stream: ArtifactStreamId, filter: Option<&str>) -> ResolvedSelection {
        ResolvedSelection::LastCollected {
            artifact_stream: EntityRef::Id(stream),
            filter: filter.map(ArtifactFilterSpec::glob),
        }
    }

    #[tokio::test]
    async fn last_collected_without_filter_is_newest() {
        let f = fixture();
        f.catalog.collect(f.stream.id, "1.0");
        f.catalog.collect(f.stream.id, "1.1");
        let newest = f.catalog.collect(f.stream.id, "0.9-hotfix");

        let artifact = f
            .resolver
            .resolve(
                &context(f.app_id),
                &requirement(&[f.stream.id]),
                &last_collected(f.stream.id, None),
            )
            .await
            .expect("resolves");
        assert_eq!(artifact.id, newest.id);
    }

    #[tokio::test]
    async fn glob_filter_picks_matching_build() {
        let f = fixture();
        f.catalog.collect(f.stream.id, "v1.0");
        f.catalog.collect(f.stream.id, "v2.0");

        let artifact = f
            .resolver
            .resolve(
                &context(f.app_id),
                &requirement(&[f.stream.id]),
                &last_collected(f.stream.id, Some("v1.*")),
            )
            .await
            .expect("resolves");
        assert_eq!(artifact.build_number, "v1.0");
    }

    #[tokio::test]
    async fn glob_filter_without_match_fails() {
        let f = fixture();
        f.catalog.collect(f.stream.id, "v1.0");
        f.catalog.collect(f.stream.id, "v2.0");

        let err = f
            .resolver
            .resolve(
                &context(f.app_id),
                &requirement(&[f.stream.id]),
                &last_collected(f.stream.id, Some("v3.*")),
            )
            .await
            .unwrap_err();
        assert_eq!(
            err,
            ResolveError::NoMatchingArtifact {
                artifact_stream: "api-image".to_string(),
                filter: Some("v3.*".to_string()),
            }
        );
    }

    #[tokio::test]
    async fn disallowed_stream_is_rejected_before_lookup() {
        let f = fixture();
        f.catalog.collect(f.stream.id, "1.0");

        let err = f
            .resolver
            .resolve(
                &context(f.app_id),
                &requirement(&[ArtifactStreamId::new()]),
                &last_collected(f.stream.id, None),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ResolveError::ArtifactStreamNotAllowed { .. }));
    }

    #[tokio::test]
    async fn stream_can_be_named() {
        let f = fixture();
        let built = f.catalog.collect(f.stream.id, "7");

        let artifact = f
            .resolver
            .resolve(
                &context(f.app_id),
                &requirement(&[]),
                &ResolvedSelection::LastCollected {
                    artifact_stream: EntityRef::Name("api-image".to_string()),
                    filter: None,
                },
            )
            .await
            .expect("resolves");
        assert_eq!(artifact.id, built.id);
    }

    #[tokio::test]
    async fn last_deployed_requires_history() {
        let f = fixture();
        let workflow = DeploymentTarget::Workflow(WorkflowId::new());

        let err = f
            .resolver
            .resolve(
                &context(f.app_id),
                &requirement(&[]),
                &ResolvedSelection::LastDeployed { source: workflow },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ResolveError::NoLastDeployedArtifact { .. }));

        let deployed = f.catalog.collect(f.stream.id, "3");
        f.catalog
            .record_deployment(f.app_id, workflow, vec![deployed.clone()]);
        let artifact = f
            .resolver
            .resolve(
                &context(f.app_id),
                &requirement(&[f.stream.id]),
                &ResolvedSelection::LastDeployed { source: workflow },
            )
            .await
            .expect("resolves");
        assert_eq!(artifact.id, deployed.id);
    }

    #[tokio::test]
    async fn triggering_artifact_must_exist() {
        let f = fixture();
        let err = f
            .resolver
            .resolve(
                &context(f.app_id),
                &requirement(&[]),
                &ResolvedSelection::FromTriggeringArtifactSource,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ResolveError::NoTriggeringArtifact { .. }));
    }

    #[tokio::test]
    async fn triggering_artifact_skips_disallowed_streams() {
        let f = fixture();
        let other = ArtifactStreamId::new();
        let foreign = f.catalog.collect_unbound(other, "x");
        let wanted = f.catalog.collect(f.stream.id, "y");
        let triggering = vec![foreign, wanted.clone()];

        let artifact = f
            .resolver
            .resolve(
                &FiringContext {
                    app_id: f.app_id,
                    triggering_artifacts: &triggering,
                    upstream_pipeline: None,
                },
                &requirement(&[f.stream.id]),
                &ResolvedSelection::FromTriggeringArtifactSource,
            )
            .await
            .expect("resolves");
        assert_eq!(artifact.id, wanted.id);
    }

    #[tokio::test]
    async fn upstream_pipeline_uses_its_last_deployment() {
        let f = fixture();
        let pipeline = PipelineId::new();
        let deployed = f.catalog.collect(f.stream.id, "9");
        f.catalog.record_deployment(
            f.app_id,
            DeploymentTarget::Pipeline(pipeline),
            vec![deployed.clone()],
        );

        let artifact = f
            .resolver
            .resolve(
                &FiringContext {
                    app_id: f.app_id,
                    triggering_artifacts: &[],
                    upstream_pipeline: Some(pipeline),
                },
                &requirement(&[]),
                &ResolvedSelection::FromUpstreamPipeline,
            )
            .await
            .expect("resolves");
        assert_eq!(artifact.id, deployed.id);
    }

    #[tokio::test]
    async fn webhook_build_checks_server() {
        let f = fixture();
        f.catalog.collect(f.stream.id, "2024.1");

        let err = f
            .resolver
            .resolve(
                &context(f.app_id),
                &requirement(&[]),
                &ResolvedSelection::FromWebhookPayload {
                    artifact_server: EntityRef::Name("other-registry".to_string()),
                    artifact_stream: EntityRef::Id(f.stream.id),
                    build_number: "2024.1".to_string(),
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ResolveError::ArtifactServerMismatch { .. }));

        let artifact = f
            .resolver
            .resolve(
                &context(f.app_id),
                &requirement(&[]),
                &ResolvedSelection::FromWebhookPayload {
                    artifact_server: EntityRef::Id(f.stream.artifact_server_id),
                    artifact_stream: EntityRef::Name("api-image".to_string()),
                    build_number: "2024.1".to_string(),
                },
            )
            .await
            .expect("resolves");
        assert_eq!(artifact.build_number, "2024.1");
    }

    #[tokio::test]
    async fn webhook_build_must_exist() {
        let f = fixture();
        let err = f
            .resolver
            .resolve(
                &context(f.app_id),
                &requirement(&[]),
                &ResolvedSelection::FromWebhookPayload {
                    artifact_server: EntityRef::Name("registry".to_string()),
                    artifact_stream: EntityRef::Id(f.stream.id),
                    build_number: "404".to_string(),
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ResolveError::NoMatchingArtifact { filter: Some(build), .. } if build == "404"
        ));
    }

    #[tokio::test]
    async fn tolerant_last_deployed_returns_empty() {
        let f = fixture();
        let deployed = f
            .resolver
            .last_deployed_or_empty(f.app_id, DeploymentTarget::Pipeline(PipelineId::new()))
            .await
            .expect("lookup succeeds");
        assert!(deployed.is_empty());
    }
}
