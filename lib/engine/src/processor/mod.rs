//! Condition processors.
//!
//! One processor per condition type. Each validates its condition when a
//! trigger is saved, fills display names on read, and turns a matching
//! upstream event into [`FireRequest`]s. [`ConditionProcessors`] holds one of
//! each and dispatches on the condition tag with an exhaustive match.

mod action;
mod artifact;
mod pipeline;
mod scheduled;
mod webhook;

pub use action::ActionValidator;
pub use artifact::ArtifactConditionProcessor;
pub use pipeline::PipelineCompletionProcessor;
pub use scheduled::ScheduledConditionProcessor;
pub use webhook::WebhookConditionProcessor;

use crate::config::EngineConfig;
use crate::error::{TriggerServiceError, ValidationError};
use crate::fire::{FireRequest, TriggerEvent};
use async_trait::async_trait;
use std::sync::Arc;
use tripwire_resolver::{ArtifactCatalog, ArtifactFilter, DeploymentCatalog, EntityCatalog};
use tripwire_trigger::{ArtifactFilterSpec, Trigger, TriggerConditionType, TriggerError};

/// Read access to the external metadata the processors validate against.
#[derive(Clone)]
pub struct Catalogs {
    pub artifacts: Arc<dyn ArtifactCatalog>,
    pub deployments: Arc<dyn DeploymentCatalog>,
    pub entities: Arc<dyn EntityCatalog>,
}

/// Save-time validation and run-time reaction for one condition type.
#[async_trait]
pub trait ConditionProcessor: Send + Sync {
    fn condition_type(&self) -> TriggerConditionType;

    fn actions(&self) -> &ActionValidator;

    /// Checks the action target and artifact bindings, caching names.
    async fn validate_action(&self, trigger: &mut Trigger) -> Result<(), TriggerServiceError> {
        self.actions().validate(trigger).await
    }

    /// Checks the condition, caching derived fields on `trigger`.
    ///
    /// `existing` is the stored version on update.
    async fn validate_condition(
        &self,
        trigger: &mut Trigger,
        existing: Option<&Trigger>,
    ) -> Result<(), TriggerServiceError>;

    /// Fills display names. Lookup failures leave names unset.
    async fn rehydrate(&self, trigger: &mut Trigger);

    /// Turns `event` into zero or more firings of `trigger`.
    async fn on_event(
        &self,
        trigger: &Trigger,
        event: &TriggerEvent<'_>,
    ) -> Result<Vec<FireRequest>, TriggerServiceError>;
}

/// One processor per condition type.
pub struct ConditionProcessors {
    artifact: ArtifactConditionProcessor,
    pipeline: PipelineCompletionProcessor,
    scheduled: ScheduledConditionProcessor,
    webhook: WebhookConditionProcessor,
}

impl ConditionProcessors {
    #[must_use]
    pub fn new(catalogs: &Catalogs, config: &EngineConfig) -> Self {
        let actions = ActionValidator::new(catalogs);
        Self {
            artifact: ArtifactConditionProcessor::new(
                catalogs,
                actions.clone(),
                config.trigger_for_all_artifacts,
            ),
            pipeline: PipelineCompletionProcessor::new(catalogs, actions.clone()),
            scheduled: ScheduledConditionProcessor::new(
                actions.clone(),
                config.min_cron_interval_secs,
            ),
            webhook: WebhookConditionProcessor::new(actions),
        }
    }

    /// Returns the processor owning conditions of type `condition`.
    #[must_use]
    pub fn get(&self, condition: TriggerConditionType) -> &dyn ConditionProcessor {
        match condition {
            TriggerConditionType::Artifact => &self.artifact,
            TriggerConditionType::PipelineCompletion => &self.pipeline,
            TriggerConditionType::Scheduled => &self.scheduled,
            TriggerConditionType::Webhook => &self.webhook,
        }
    }
}

/// Compiles an artifact filter, reporting failures as configuration errors.
pub(crate) fn compile_filter(spec: &ArtifactFilterSpec) -> Result<ArtifactFilter, ValidationError> {
    ArtifactFilter::compile(spec).map_err(|e| ValidationError::InvalidArtifactFilter {
        pattern: spec.pattern.clone(),
        reason: e.to_string(),
    })
}

/// The error for a trigger handed to the processor of another type.
pub(crate) fn wrong_condition(trigger: &Trigger) -> TriggerServiceError {
    TriggerError::InvalidTriggerCondition {
        tag: trigger.condition_type().to_string(),
    }
    .into()
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::Catalogs;
    use std::sync::Arc;
    use tripwire_core::{
        AccountId, AppId, ArtifactServerId, ArtifactStreamId, PipelineId, ServiceId, WorkflowId,
    };
    use tripwire_resolver::memory::InMemoryCatalog;
    use tripwire_resolver::{ArtifactStream, Pipeline, Service, Workflow, WorkflowKind};
    use tripwire_trigger::{Trigger, TriggerAction, TriggerArgs, TriggerCondition};

    /// A catalog with one service, one bound stream, one pipeline and one
    /// workflow in a single application.
    pub struct World {
        pub catalog: Arc<InMemoryCatalog>,
        pub app_id: AppId,
        pub service: Service,
        pub stream: ArtifactStream,
        pub pipeline: Pipeline,
        pub workflow: Workflow,
    }

    impl World {
        pub fn new() -> Self {
            let catalog = Arc::new(InMemoryCatalog::new());
            let app_id = AppId::new();
            let service = Service {
                id: ServiceId::new(),
                app_id,
                name: "checkout".to_string(),
            };
            let stream = ArtifactStream {
                id: ArtifactStreamId::new(),
                app_id,
                name: "checkout-images".to_string(),
                source_name: "registry/checkout".to_string(),
                artifact_server_id: ArtifactServerId::new(),
                artifact_server_name: "registry".to_string(),
                service_id: Some(service.id),
            };
            let pipeline = Pipeline {
                id: PipelineId::new(),
                app_id,
                name: "release".to_string(),
                variables: Vec::new(),
                has_build_workflow: false,
                env_parameterized: false,
            };
            let workflow = Workflow {
                id: WorkflowId::new(),
                app_id,
                name: "deploy-checkout".to_string(),
                kind: WorkflowKind::Deployment,
                env_id: None,
                templatized: false,
                variables: Vec::new(),
            };
            catalog.add_service(service.clone());
            catalog.add_artifact_stream(stream.clone());
            catalog.add_pipeline(pipeline.clone());
            catalog.add_workflow(workflow.clone());
            Self {
                catalog,
                app_id,
                service,
                stream,
                pipeline,
                workflow,
            }
        }

        pub fn catalogs(&self) -> Catalogs {
            Catalogs {
                artifacts: self.catalog.clone(),
                deployments: self.catalog.clone(),
                entities: self.catalog.clone(),
            }
        }

        /// A trigger starting the workflow with `args`.
        pub fn trigger(&self, condition: TriggerCondition, args: TriggerArgs) -> Trigger {
            Trigger::new(
                self.app_id,
                AccountId::new(),
                "deploy-on-event",
                condition,
                TriggerAction::workflow(self.workflow.id, args),
            )
        }
    }
}
