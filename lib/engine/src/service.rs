//! The trigger service: CRUD for triggers and the entry points upstream
//! producers call when something happens.

use crate::collaborator::{ContentChangeChecker, ContentCheckResult, ExecutionEngine};
use crate::config::EngineConfig;
use crate::deployment::{DeploymentCollaborators, DeploymentExecutionResolver};
use crate::error::{TriggerServiceError, ValidationError};
use crate::fire::{FireOutcome, FireReport, TriggerEvent};
use crate::pool::WorkerPool;
use crate::processor::{Catalogs, ConditionProcessors};
use crate::store::{TriggerExecutionStore, TriggerStore};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};
use tripwire_core::{AppId, ArtifactStreamId, PipelineId, TriggerExecutionId, TriggerId, WorkflowId};
use tripwire_resolver::{
    Artifact, ArtifactCatalog, ArtifactVariableResolver, DeploymentCatalog, EntityCatalog,
    EntityResolver,
};
use tripwire_scheduler::{FireLedger, HandlerError, ScheduledFireHandler};
use tripwire_trigger::{Trigger, TriggerConditionType, TriggerExecution};
use tripwire_webhook::WebhookHeaders;

/// Everything the trigger service talks to.
#[derive(Clone)]
pub struct Collaborators {
    pub triggers: Arc<dyn TriggerStore>,
    pub executions: Arc<dyn TriggerExecutionStore>,
    pub ledger: Arc<dyn FireLedger>,
    pub artifacts: Arc<dyn ArtifactCatalog>,
    pub deployments: Arc<dyn DeploymentCatalog>,
    pub entities: Arc<dyn EntityCatalog>,
    pub engine: Arc<dyn ExecutionEngine>,
    pub content_checker: Arc<dyn ContentChangeChecker>,
}

struct Inner {
    triggers: Arc<dyn TriggerStore>,
    executions: Arc<dyn TriggerExecutionStore>,
    ledger: Arc<dyn FireLedger>,
    processors: ConditionProcessors,
    resolver: DeploymentExecutionResolver,
    pool: Arc<WorkerPool>,
}

/// Trigger orchestrator.
///
/// Cheap to clone; clones share stores, processors and the worker pool.
#[derive(Clone)]
pub struct TriggerService {
    inner: Arc<Inner>,
}

impl TriggerService {
    #[must_use]
    pub fn new(collaborators: Collaborators, config: &EngineConfig, pool: Arc<WorkerPool>) -> Self {
        let catalogs = Catalogs {
            artifacts: collaborators.artifacts.clone(),
            deployments: collaborators.deployments.clone(),
            entities: collaborators.entities.clone(),
        };
        let resolver = DeploymentExecutionResolver::new(
            DeploymentCollaborators {
                deployments: collaborators.deployments,
                artifacts: ArtifactVariableResolver::new(collaborators.artifacts),
                entities: EntityResolver::new(collaborators.entities, config.infra_addressing),
                engine: collaborators.engine,
                content_checker: collaborators.content_checker,
                executions: collaborators.executions.clone(),
            },
            config.artifact_match_policy,
        );
        Self {
            inner: Arc::new(Inner {
                triggers: collaborators.triggers,
                executions: collaborators.executions,
                ledger: collaborators.ledger,
                processors: ConditionProcessors::new(&catalogs, config),
                resolver,
                pool,
            }),
        }
    }

    // CRUD

    /// Validates and stores a new trigger.
    ///
    /// Returns the stored trigger with derived fields filled: display
    /// names, cron description, next fire time and webhook token.
    #[instrument(skip_all, fields(app_id = %trigger.app_id, trigger = %trigger.name))]
    pub async fn save(&self, trigger: Trigger) -> tripwire_core::Result<Trigger, TriggerServiceError> {
        Ok(self.save_trigger(trigger).await?)
    }

    async fn save_trigger(&self, mut trigger: Trigger) -> Result<Trigger, TriggerServiceError> {
        self.validate(&mut trigger, None).await?;
        if self
            .inner
            .triggers
            .find_by_name(trigger.app_id, &trigger.name)
            .await?
            .is_some()
        {
            return Err(ValidationError::DuplicateTriggerName { name: trigger.name }.into());
        }
        self.inner.triggers.insert(&trigger).await?;
        info!(trigger_id = %trigger.id, condition = %trigger.condition_type(), "trigger saved");
        Ok(trigger)
    }

    /// Re-validates and replaces a stored trigger.
    #[instrument(skip_all, fields(app_id = %trigger.app_id, trigger_id = %trigger.id))]
    pub async fn update(&self, trigger: Trigger) -> tripwire_core::Result<Trigger, TriggerServiceError> {
        Ok(self.update_trigger(trigger).await?)
    }

    async fn update_trigger(&self, mut trigger: Trigger) -> Result<Trigger, TriggerServiceError> {
        let existing = self
            .inner
            .triggers
            .get(trigger.app_id, trigger.id)
            .await?
            .ok_or(TriggerServiceError::TriggerNotFound {
                trigger_id: trigger.id,
            })?;
        let (from, to) = (existing.action.kind(), trigger.action.kind());
        if from != to {
            return Err(ValidationError::ActionTypeChanged { from, to }.into());
        }

        self.validate(&mut trigger, Some(&existing)).await?;
        if let Some(other) = self
            .inner
            .triggers
            .find_by_name(trigger.app_id, &trigger.name)
            .await?
            && other.id != trigger.id
        {
            return Err(ValidationError::DuplicateTriggerName { name: trigger.name }.into());
        }
        trigger.created_at = existing.created_at;
        trigger.updated_at = Utc::now();
        self.inner.triggers.replace(&trigger).await?;

        if existing.next_fire_at.is_some() && trigger.next_fire_at.is_none() {
            debug!(trigger_id = %trigger.id, "schedule cancelled");
            self.inner.ledger.forget(trigger.id).await?;
        }
        info!(trigger_id = %trigger.id, "trigger updated");
        Ok(trigger)
    }

    async fn validate(
        &self,
        trigger: &mut Trigger,
        existing: Option<&Trigger>,
    ) -> Result<(), TriggerServiceError> {
        trigger.name = trigger.name.trim().to_string();
        if trigger.name.is_empty() {
            return Err(ValidationError::NameRequired.into());
        }
        let processor = self.inner.processors.get(trigger.condition_type());
        processor.validate_action(trigger).await?;
        processor.validate_condition(trigger, existing).await?;
        if trigger.disabled || trigger.condition_type() != TriggerConditionType::Scheduled {
            trigger.next_fire_at = None;
        }
        if trigger.condition_type() != TriggerConditionType::Webhook {
            trigger.webhook_token = None;
        }
        Ok(())
    }

    /// Deletes a trigger and cancels its schedule.
    #[instrument(skip(self))]
    pub async fn delete(
        &self,
        app_id: AppId,
        trigger_id: TriggerId,
    ) -> tripwire_core::Result<(), TriggerServiceError> {
        Ok(self.delete_trigger(app_id, trigger_id).await?)
    }

    async fn delete_trigger(
        &self,
        app_id: AppId,
        trigger_id: TriggerId,
    ) -> Result<(), TriggerServiceError> {
        if !self.inner.triggers.delete(app_id, trigger_id).await? {
            return Err(TriggerServiceError::TriggerNotFound { trigger_id });
        }
        self.inner.ledger.forget(trigger_id).await?;
        info!("trigger deleted");
        Ok(())
    }

    /// Returns a trigger with display names filled.
    #[instrument(skip(self))]
    pub async fn get(
        &self,
        app_id: AppId,
        trigger_id: TriggerId,
    ) -> tripwire_core::Result<Trigger, TriggerServiceError> {
        let mut trigger = self
            .inner
            .triggers
            .get(app_id, trigger_id)
            .await
            .map_err(TriggerServiceError::from)?
            .ok_or(TriggerServiceError::TriggerNotFound { trigger_id })?;
        self.rehydrate(&mut trigger).await;
        Ok(trigger)
    }

    /// Returns every trigger of an application with display names filled.
    #[instrument(skip(self))]
    pub async fn list(&self, app_id: AppId) -> tripwire_core::Result<Vec<Trigger>, TriggerServiceError> {
        let mut triggers = self
            .inner
            .triggers
            .list(app_id)
            .await
            .map_err(TriggerServiceError::from)?;
        for trigger in &mut triggers {
            self.rehydrate(trigger).await;
        }
        Ok(triggers)
    }

    async fn rehydrate(&self, trigger: &mut Trigger) {
        self.inner
            .processors
            .get(trigger.condition_type())
            .rehydrate(trigger)
            .await;
    }

    /// Firing records of a trigger, newest first.
    #[instrument(skip(self))]
    pub async fn executions(
        &self,
        app_id: AppId,
        trigger_id: TriggerId,
    ) -> tripwire_core::Result<Vec<TriggerExecution>, TriggerServiceError> {
        Ok(self
            .inner
            .executions
            .list_for_trigger(app_id, trigger_id)
            .await
            .map_err(TriggerServiceError::from)?)
    }

    // Pruning

    /// Deletes every trigger of an application.
    #[instrument(skip(self))]
    pub async fn prune_for_app(&self, app_id: AppId) -> tripwire_core::Result<usize, TriggerServiceError> {
        Ok(self.prune_where(app_id, |_| true).await?)
    }

    /// Deletes every trigger that starts or waits on `pipeline_id`.
    #[instrument(skip(self))]
    pub async fn prune_for_pipeline(
        &self,
        app_id: AppId,
        pipeline_id: PipelineId,
    ) -> tripwire_core::Result<usize, TriggerServiceError> {
        Ok(self
            .prune_where(app_id, |t| t.references_pipeline(pipeline_id))
            .await?)
    }

    /// Deletes every trigger that starts or reads from `workflow_id`.
    #[instrument(skip(self))]
    pub async fn prune_for_workflow(
        &self,
        app_id: AppId,
        workflow_id: WorkflowId,
    ) -> tripwire_core::Result<usize, TriggerServiceError> {
        Ok(self
            .prune_where(app_id, |t| t.references_workflow(workflow_id))
            .await?)
    }

    /// Deletes every trigger that watches or reads from `stream_id`.
    #[instrument(skip(self))]
    pub async fn prune_for_artifact_stream(
        &self,
        app_id: AppId,
        stream_id: ArtifactStreamId,
    ) -> tripwire_core::Result<usize, TriggerServiceError> {
        Ok(self
            .prune_where(app_id, |t| t.references_artifact_stream(stream_id))
            .await?)
    }

    async fn prune_where(
        &self,
        app_id: AppId,
        references: impl Fn(&Trigger) -> bool,
    ) -> Result<usize, TriggerServiceError> {
        let mut pruned = 0;
        for trigger in self.inner.triggers.list(app_id).await? {
            if !references(&trigger) {
                continue;
            }
            if self.inner.triggers.delete(app_id, trigger.id).await? {
                self.inner.ledger.forget(trigger.id).await?;
                pruned += 1;
            }
        }
        if pruned > 0 {
            info!(pruned, "pruned triggers");
        }
        Ok(pruned)
    }

    // Events

    /// Fires the artifact triggers watching `stream`.
    #[instrument(skip(self, artifacts), fields(artifacts = artifacts.len()))]
    pub async fn handle_artifact_collected(
        &self,
        stream: ArtifactStreamId,
        artifacts: Vec<Artifact>,
    ) -> tripwire_core::Result<Vec<FireReport>, TriggerServiceError> {
        let triggers = self
            .inner
            .triggers
            .list_watching_stream(stream)
            .await
            .map_err(TriggerServiceError::from)?;
        let event = TriggerEvent::ArtifactCollected {
            stream,
            artifacts: &artifacts,
        };
        Ok(self.dispatch(triggers, &event).await)
    }

    /// Fires the pipeline-completion triggers waiting on `pipeline_id`.
    #[instrument(skip(self))]
    pub async fn handle_pipeline_completed(
        &self,
        app_id: AppId,
        pipeline_id: PipelineId,
    ) -> tripwire_core::Result<Vec<FireReport>, TriggerServiceError> {
        let triggers = self
            .inner
            .triggers
            .list_after_pipeline(app_id, pipeline_id)
            .await
            .map_err(TriggerServiceError::from)?;
        Ok(self
            .dispatch(triggers, &TriggerEvent::PipelineCompleted { pipeline_id })
            .await)
    }

    /// Fires one scheduled tick.
    #[instrument(skip(self))]
    pub async fn handle_schedule_due(
        &self,
        trigger_id: TriggerId,
        fire_time: DateTime<Utc>,
    ) -> tripwire_core::Result<FireReport, TriggerServiceError> {
        Ok(self.schedule_due(trigger_id, fire_time).await?)
    }

    async fn schedule_due(
        &self,
        trigger_id: TriggerId,
        fire_time: DateTime<Utc>,
    ) -> Result<FireReport, TriggerServiceError> {
        let trigger = self
            .inner
            .triggers
            .find(trigger_id)
            .await?
            .ok_or(TriggerServiceError::TriggerNotFound { trigger_id })?;
        let reports = self
            .fire_trigger(&trigger, &TriggerEvent::ScheduleDue { fire_time })
            .await?;
        single(&trigger, reports)
    }

    /// Validates an inbound webhook against the trigger owning `token` and
    /// fires it. Returns once the execution was submitted or refused.
    #[instrument(skip(self, token, headers, payload))]
    pub async fn on_webhook_received(
        &self,
        app_id: AppId,
        token: &str,
        headers: &WebhookHeaders,
        payload: &Value,
    ) -> tripwire_core::Result<FireReport, TriggerServiceError> {
        Ok(self.webhook_received(app_id, token, headers, payload).await?)
    }

    async fn webhook_received(
        &self,
        app_id: AppId,
        token: &str,
        headers: &WebhookHeaders,
        payload: &Value,
    ) -> Result<FireReport, TriggerServiceError> {
        let trigger = self
            .inner
            .triggers
            .find_by_webhook_token(app_id, token)
            .await?
            .ok_or(TriggerServiceError::WebhookTokenNotFound)?;
        let event = TriggerEvent::WebhookReceived { headers, payload };
        let reports = match self.fire_trigger(&trigger, &event).await {
            Ok(reports) => reports,
            Err(e) => {
                warn!(trigger_id = %trigger.id, error = %e, "webhook rejected");
                return Err(e);
            }
        };
        single(&trigger, reports)
    }

    /// Completes a content-gated firing.
    #[instrument(skip(self, result))]
    pub async fn handle_content_check_result(
        &self,
        app_id: AppId,
        trigger_execution_id: TriggerExecutionId,
        result: ContentCheckResult,
    ) -> tripwire_core::Result<FireReport, TriggerServiceError> {
        Ok(self
            .inner
            .resolver
            .handle_content_check_result(app_id, trigger_execution_id, result)
            .await?)
    }

    /// Queues [`Self::handle_artifact_collected`] on the worker pool.
    ///
    /// # Errors
    ///
    /// Fails only if the pool is shut down.
    pub fn on_artifact_collected(
        &self,
        stream: ArtifactStreamId,
        artifacts: Vec<Artifact>,
    ) -> tripwire_core::Result<(), TriggerServiceError> {
        let service = self.clone();
        self.queue("artifact_collected", async move {
            service.handle_artifact_collected(stream, artifacts).await.map(drop)
        })
    }

    /// Queues [`Self::handle_pipeline_completed`] on the worker pool.
    ///
    /// # Errors
    ///
    /// Fails only if the pool is shut down.
    pub fn on_pipeline_completed(
        &self,
        app_id: AppId,
        pipeline_id: PipelineId,
    ) -> tripwire_core::Result<(), TriggerServiceError> {
        let service = self.clone();
        self.queue("pipeline_completed", async move {
            service
                .handle_pipeline_completed(app_id, pipeline_id)
                .await
                .map(drop)
        })
    }

    /// Queues [`Self::handle_schedule_due`] on the worker pool.
    ///
    /// # Errors
    ///
    /// Fails only if the pool is shut down.
    pub fn on_schedule_due(
        &self,
        trigger_id: TriggerId,
        fire_time: DateTime<Utc>,
    ) -> tripwire_core::Result<(), TriggerServiceError> {
        let service = self.clone();
        self.queue("schedule_due", async move {
            service
                .handle_schedule_due(trigger_id, fire_time)
                .await
                .map(drop)
        })
    }

    /// Queues [`Self::handle_content_check_result`] on the worker pool.
    ///
    /// # Errors
    ///
    /// Fails only if the pool is shut down.
    pub fn on_content_check_result(
        &self,
        app_id: AppId,
        trigger_execution_id: TriggerExecutionId,
        result: ContentCheckResult,
    ) -> tripwire_core::Result<(), TriggerServiceError> {
        let service = self.clone();
        self.queue("content_check_result", async move {
            service
                .handle_content_check_result(app_id, trigger_execution_id, result)
                .await
                .map(drop)
        })
    }

    fn queue<F>(&self, event: &'static str, work: F) -> tripwire_core::Result<(), TriggerServiceError>
    where
        F: Future<Output = tripwire_core::Result<(), TriggerServiceError>> + Send + 'static,
    {
        self.inner
            .pool
            .submit(async move {
                if let Err(report) = work.await {
                    warn!(event, error = %report, "event handling failed");
                }
            })
            .map_err(TriggerServiceError::from)?;
        Ok(())
    }

    /// Stops accepting events and waits for queued ones to finish.
    pub async fn shutdown(&self) {
        self.inner.pool.shutdown().await;
    }

    async fn dispatch(&self, triggers: Vec<Trigger>, event: &TriggerEvent<'_>) -> Vec<FireReport> {
        let mut reports = Vec::with_capacity(triggers.len());
        for trigger in triggers {
            match self.fire_trigger(&trigger, event).await {
                Ok(fired) => reports.extend(fired),
                Err(e) => {
                    warn!(trigger_id = %trigger.id, event = event.kind(), error = %e, "trigger did not fire");
                    reports.push(FireReport::new(&trigger, FireOutcome::Failed(e)));
                }
            }
        }
        reports
    }

    /// Runs `trigger`'s processor on `event` and fires every resulting
    /// request. Failures of individual requests are reported, not returned.
    async fn fire_trigger(
        &self,
        trigger: &Trigger,
        event: &TriggerEvent<'_>,
    ) -> Result<Vec<FireReport>, TriggerServiceError> {
        if trigger.disabled {
            info!(trigger_id = %trigger.id, event = event.kind(), "trigger is disabled, skipping");
            return Ok(vec![FireReport::new(
                trigger,
                FireOutcome::skipped("trigger is disabled"),
            )]);
        }
        let requests = self
            .inner
            .processors
            .get(trigger.condition_type())
            .on_event(trigger, event)
            .await?;
        if requests.is_empty() {
            debug!(trigger_id = %trigger.id, event = event.kind(), "event does not fire the trigger");
            return Ok(vec![FireReport::new(
                trigger,
                FireOutcome::skipped("event does not match the condition"),
            )]);
        }

        let mut reports = Vec::with_capacity(requests.len());
        for request in requests {
            match self.inner.resolver.fire(request).await {
                Ok(report) => reports.push(report),
                Err(e) => {
                    warn!(trigger_id = %trigger.id, event = event.kind(), error = %e, "firing failed");
                    reports.push(FireReport::new(trigger, FireOutcome::Failed(e)));
                }
            }
        }
        Ok(reports)
    }
}

/// The report of a single-request event, with a failure lifted to an error.
fn single(trigger: &Trigger, reports: Vec<FireReport>) -> Result<FireReport, TriggerServiceError> {
    let report = reports.into_iter().next().unwrap_or_else(|| {
        FireReport::new(trigger, FireOutcome::skipped("event does not match the condition"))
    });
    match report.outcome {
        FireOutcome::Failed(e) => Err(e),
        _ => Ok(report),
    }
}

#[async_trait]
impl ScheduledFireHandler for TriggerService {
    async fn fire_scheduled(
        &self,
        trigger_id: TriggerId,
        fire_time: DateTime<Utc>,
    ) -> Result<(), HandlerError> {
        let report = self
            .schedule_due(trigger_id, fire_time)
            .await
            .map_err(|e| HandlerError {
                trigger_id,
                reason: e.to_string(),
            })?;
        debug!(%trigger_id, outcome = ?report.outcome, "scheduled tick handled");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{ExecutionEngineError, PoolError};
    use crate::memory::{
        InMemoryTriggerExecutionStore, InMemoryTriggerStore, RecordingContentChecker,
        RecordingExecutionEngine,
    };
    use crate::processor::fixtures::World;
    use chrono::Duration;
    use serde_json::json;
    use tripwire_resolver::{ArtifactVariableRequirement, DeploymentMetadata};
    use tripwire_scheduler::{Claim, FireKey, InMemoryFireLedger, ScheduleError};
    use tripwire_trigger::{
        ArtifactCondition, ArtifactSelection, DeploymentTarget, PayloadFilter,
        PipelineCompletionCondition, ScheduledCondition, TemplateValue, TriggerAction,
        TriggerArgs, TriggerArtifactVariable, TriggerCondition, TriggerExecutionStatus,
        WebhookCondition, WebhookEventType, WebhookSource,
    };
    use tripwire_webhook::WebhookError;

    struct Harness {
        world: World,
        triggers: Arc<InMemoryTriggerStore>,
        executions: Arc<InMemoryTriggerExecutionStore>,
        ledger: Arc<InMemoryFireLedger>,
        engine: Arc<RecordingExecutionEngine>,
        service: TriggerService,
    }

    impl Harness {
        fn new() -> Self {
            let world = World::new();
            let triggers = Arc::new(InMemoryTriggerStore::new());
            let executions = Arc::new(InMemoryTriggerExecutionStore::new());
            let ledger = Arc::new(InMemoryFireLedger::new());
            let engine = Arc::new(RecordingExecutionEngine::new());
            let service = TriggerService::new(
                Collaborators {
                    triggers: triggers.clone(),
                    executions: executions.clone(),
                    ledger: ledger.clone(),
                    artifacts: world.catalog.clone(),
                    deployments: world.catalog.clone(),
                    entities: world.catalog.clone(),
                    engine: engine.clone(),
                    content_checker: Arc::new(RecordingContentChecker::new()),
                },
                &EngineConfig::default(),
                Arc::new(WorkerPool::new(2)),
            );
            Self {
                world,
                triggers,
                executions,
                ledger,
                engine,
                service,
            }
        }

        /// The workflow needs one artifact of the world's service.
        fn require_artifact(&self) {
            self.world.catalog.set_deployment_metadata(
                DeploymentTarget::Workflow(self.world.workflow.id),
                DeploymentMetadata {
                    artifact_variables: vec![ArtifactVariableRequirement {
                        name: "artifact".to_string(),
                        scope: None,
                        service_id: Some(self.world.service.id),
                        allowed_artifact_streams: vec![self.world.stream.id],
                    }],
                    required_service_ids: vec![self.world.service.id],
                },
            );
        }
    }

    fn nightly() -> TriggerCondition {
        TriggerCondition::Scheduled(ScheduledCondition::new("0 3 * * *"))
    }

    fn context(report: &rootcause::Report<TriggerServiceError>) -> &TriggerServiceError {
        report.current_context()
    }

    #[tokio::test]
    async fn saved_stream_binding_reads_back_with_its_name() {
        let h = Harness::new();
        let args = TriggerArgs {
            artifact_variables: vec![TriggerArtifactVariable::new(
                "artifact",
                ArtifactSelection::LastCollected {
                    artifact_stream: TemplateValue::Literal(h.world.stream.id),
                    filter: None,
                    artifact_stream_name: None,
                },
            )],
            ..TriggerArgs::default()
        };
        let saved = h.service.save(h.world.trigger(nightly(), args)).await.unwrap();

        let read = h.service.get(h.world.app_id, saved.id).await.unwrap();
        let ArtifactSelection::LastCollected {
            artifact_stream,
            artifact_stream_name,
            ..
        } = &read.action.args().artifact_variables[0].selection
        else {
            panic!("selection changed");
        };
        assert_eq!(artifact_stream, &TemplateValue::Literal(h.world.stream.id));
        assert_eq!(artifact_stream_name.as_deref(), Some("checkout-images"));
        assert_eq!(read.action.target_name(), Some("deploy-checkout"));
    }

    #[tokio::test]
    async fn unparsable_cron_is_never_stored() {
        let h = Harness::new();
        let trigger = h.world.trigger(
            TriggerCondition::Scheduled(ScheduledCondition::new("at noon")),
            TriggerArgs::default(),
        );
        let trigger_id = trigger.id;

        let err = h.service.save(trigger).await.unwrap_err();
        assert!(matches!(
            context(&err),
            TriggerServiceError::Validation(ValidationError::Schedule(
                ScheduleError::InvalidCronExpression { .. }
            ))
        ));
        assert!(h.service.list(h.world.app_id).await.unwrap().is_empty());
        let horizon = Utc::now() + Duration::days(365);
        assert!(h.triggers.due_scheduled(horizon, 10).await.unwrap().is_empty());
        assert!(h.executions.all().is_empty());
        assert!(
            h.service
                .handle_schedule_due(trigger_id, Utc::now())
                .await
                .is_err()
        );
        assert!(h.engine.submitted().is_empty());
    }

    #[tokio::test]
    async fn names_are_unique_and_required() {
        let h = Harness::new();
        h.service
            .save(h.world.trigger(nightly(), TriggerArgs::default()))
            .await
            .unwrap();

        let err = h
            .service
            .save(h.world.trigger(nightly(), TriggerArgs::default()))
            .await
            .unwrap_err();
        assert_eq!(
            context(&err),
            &TriggerServiceError::Validation(ValidationError::DuplicateTriggerName {
                name: "deploy-on-event".to_string()
            })
        );

        let mut unnamed = h.world.trigger(nightly(), TriggerArgs::default());
        unnamed.name = "  ".to_string();
        let err = h.service.save(unnamed).await.unwrap_err();
        assert_eq!(
            context(&err),
            &TriggerServiceError::Validation(ValidationError::NameRequired)
        );
    }

    #[tokio::test]
    async fn update_keeps_action_kind() {
        let h = Harness::new();
        let mut saved = h
            .service
            .save(h.world.trigger(nightly(), TriggerArgs::default()))
            .await
            .unwrap();
        saved.action = TriggerAction::pipeline(h.world.pipeline.id, TriggerArgs::default());

        let err = h.service.update(saved).await.unwrap_err();
        assert!(matches!(
            context(&err),
            TriggerServiceError::Validation(ValidationError::ActionTypeChanged { .. })
        ));

        let missing = h.world.trigger(nightly(), TriggerArgs::default());
        let trigger_id = missing.id;
        let err = h.service.update(missing).await.unwrap_err();
        assert_eq!(
            context(&err),
            &TriggerServiceError::TriggerNotFound { trigger_id }
        );
    }

    #[tokio::test]
    async fn disabling_or_deleting_cancels_the_schedule() {
        let h = Harness::new();
        let saved = h
            .service
            .save(h.world.trigger(nightly(), TriggerArgs::default()))
            .await
            .unwrap();
        let fire_time = saved.next_fire_at.unwrap();
        let Claim::Acquired(lease) = h
            .ledger
            .try_acquire(
                FireKey {
                    trigger_id: saved.id,
                    fire_time,
                },
                "sweeper",
                Duration::seconds(10),
            )
            .await
            .unwrap()
        else {
            panic!("tick should be free");
        };
        h.ledger.mark_fired(&lease).await.unwrap();

        let mut disabled = saved.clone();
        disabled.disabled = true;
        let updated = h.service.update(disabled).await.unwrap();
        assert_eq!(updated.next_fire_at, None);
        assert_eq!(h.ledger.last_fired(saved.id), None);

        h.service.delete(h.world.app_id, saved.id).await.unwrap();
        let err = h.service.get(h.world.app_id, saved.id).await.unwrap_err();
        assert_eq!(
            context(&err),
            &TriggerServiceError::TriggerNotFound {
                trigger_id: saved.id
            }
        );
        let err = h.service.delete(h.world.app_id, saved.id).await.unwrap_err();
        assert!(matches!(
            context(&err),
            TriggerServiceError::TriggerNotFound { .. }
        ));
    }

    #[tokio::test]
    async fn pipeline_completion_deploys_upstream_artifacts() {
        let h = Harness::new();
        h.require_artifact();
        let deployed = h.world.catalog.collect(h.world.stream.id, "1.4.0");
        h.world.catalog.record_deployment(
            h.world.app_id,
            DeploymentTarget::Pipeline(h.world.pipeline.id),
            vec![deployed.clone()],
        );
        let trigger = h
            .service
            .save(h.world.trigger(
                TriggerCondition::PipelineCompletion(PipelineCompletionCondition {
                    pipeline_id: h.world.pipeline.id,
                    pipeline_name: None,
                }),
                TriggerArgs::default(),
            ))
            .await
            .unwrap();

        let reports = h
            .service
            .handle_pipeline_completed(h.world.app_id, h.world.pipeline.id)
            .await
            .unwrap();

        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].trigger_id, trigger.id);
        assert!(reports[0].outcome.is_submitted());
        let submitted = h.engine.submitted();
        assert_eq!(
            submitted[0].request.target,
            DeploymentTarget::Workflow(h.world.workflow.id)
        );
        assert_eq!(submitted[0].request.artifacts[0].artifact_id, deployed.id);
        assert_eq!(submitted[0].request.triggered_by.trigger_id, trigger.id);
    }

    async fn main_branch_webhook(h: &Harness) -> Trigger {
        let mut condition =
            WebhookCondition::new(WebhookSource::GitHub, vec![WebhookEventType::Push]);
        condition.payload_filters = vec![PayloadFilter::new("ref", "refs/heads/main")];
        h.service
            .save(h.world.trigger(TriggerCondition::Webhook(condition), TriggerArgs::default()))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn webhook_filters_decide_firing() {
        let h = Harness::new();
        let trigger = main_branch_webhook(&h).await;
        let token = trigger.webhook_token.clone().unwrap();
        let headers = WebhookHeaders::new().with("X-GitHub-Event", "push");

        let report = h
            .service
            .on_webhook_received(
                h.world.app_id,
                &token,
                &headers,
                &json!({"ref": "refs/heads/main", "after": "abc"}),
            )
            .await
            .unwrap();
        assert!(report.outcome.is_submitted());
        let record = &h.executions.all()[0];
        assert_eq!(record.webhook_token.as_deref(), Some(token.as_str()));
        assert_eq!(
            record.webhook_event.as_ref().and_then(|e| e.branch.as_deref()),
            Some("main")
        );

        let err = h
            .service
            .on_webhook_received(
                h.world.app_id,
                &token,
                &headers,
                &json!({"ref": "refs/heads/dev"}),
            )
            .await
            .unwrap_err();
        assert!(matches!(
            context(&err),
            TriggerServiceError::Webhook(WebhookError::PayloadFilterMismatch { .. })
        ));
        assert_eq!(h.engine.submitted().len(), 1);
    }

    #[tokio::test]
    async fn webhook_from_other_provider_is_refused() {
        let h = Harness::new();
        let trigger = main_branch_webhook(&h).await;
        let token = trigger.webhook_token.unwrap();

        let err = h
            .service
            .on_webhook_received(
                h.world.app_id,
                &token,
                &WebhookHeaders::new().with("X-Gitlab-Event", "Push Hook"),
                &json!({"ref": "refs/heads/main"}),
            )
            .await
            .unwrap_err();
        assert!(matches!(
            context(&err),
            TriggerServiceError::Webhook(WebhookError::ProviderMismatch { .. })
        ));

        let err = h
            .service
            .on_webhook_received(
                h.world.app_id,
                "unknown",
                &WebhookHeaders::new(),
                &json!({}),
            )
            .await
            .unwrap_err();
        assert_eq!(context(&err), &TriggerServiceError::WebhookTokenNotFound);
        assert!(h.executions.all().is_empty());
    }

    #[tokio::test]
    async fn rejected_submission_is_reported_per_trigger() {
        let h = Harness::new();
        h.require_artifact();
        h.service
            .save(h.world.trigger(
                TriggerCondition::Artifact(ArtifactCondition::new(h.world.stream.id)),
                TriggerArgs::default(),
            ))
            .await
            .unwrap();
        h.engine.reject_with("workflow is locked");
        let artifact = h.world.catalog.collect(h.world.stream.id, "88");

        let reports = h
            .service
            .handle_artifact_collected(h.world.stream.id, vec![artifact])
            .await
            .unwrap();

        assert_eq!(reports.len(), 1);
        assert_eq!(
            reports[0].outcome,
            FireOutcome::Failed(TriggerServiceError::Submission(
                ExecutionEngineError::Rejected {
                    message: "workflow is locked".to_string()
                }
            ))
        );
        assert_eq!(h.executions.all()[0].status, TriggerExecutionStatus::Failed);
    }

    #[tokio::test]
    async fn disabled_triggers_do_not_fire() {
        let h = Harness::new();
        let mut trigger = h.world.trigger(
            TriggerCondition::Artifact(ArtifactCondition::new(h.world.stream.id)),
            TriggerArgs::default(),
        );
        trigger.disabled = true;
        h.service.save(trigger).await.unwrap();
        let artifact = h.world.catalog.collect(h.world.stream.id, "5");

        let reports = h
            .service
            .handle_artifact_collected(h.world.stream.id, vec![artifact])
            .await
            .unwrap();
        assert!(matches!(reports[0].outcome, FireOutcome::Skipped { .. }));
        assert!(h.engine.submitted().is_empty());
    }

    #[tokio::test]
    async fn scheduled_handler_fires_the_tick() {
        let h = Harness::new();
        let saved = h
            .service
            .save(h.world.trigger(nightly(), TriggerArgs::default()))
            .await
            .unwrap();

        h.service
            .fire_scheduled(saved.id, saved.next_fire_at.unwrap())
            .await
            .unwrap();
        assert_eq!(h.engine.submitted().len(), 1);

        h.engine.reject_with("quota exceeded");
        let err = h
            .service
            .fire_scheduled(saved.id, Utc::now())
            .await
            .unwrap_err();
        assert_eq!(err.trigger_id, saved.id);
        assert!(err.reason.contains("quota exceeded"));
    }

    #[tokio::test]
    async fn queued_events_finish_before_shutdown() {
        let h = Harness::new();
        h.require_artifact();
        h.service
            .save(h.world.trigger(
                TriggerCondition::Artifact(ArtifactCondition::new(h.world.stream.id)),
                TriggerArgs::default(),
            ))
            .await
            .unwrap();
        let artifact = h.world.catalog.collect(h.world.stream.id, "12");

        h.service
            .on_artifact_collected(h.world.stream.id, vec![artifact])
            .unwrap();
        h.service.shutdown().await;
        assert_eq!(h.engine.submitted().len(), 1);

        let err = h
            .service
            .on_pipeline_completed(h.world.app_id, h.world.pipeline.id)
            .unwrap_err();
        assert_eq!(
            context(&err),
            &TriggerServiceError::Pool(PoolError::PoolClosed)
        );
    }

    #[tokio::test]
    async fn pruning_follows_references() {
        let h = Harness::new();
        h.service
            .save(h.world.trigger(
                TriggerCondition::PipelineCompletion(PipelineCompletionCondition {
                    pipeline_id: h.world.pipeline.id,
                    pipeline_name: None,
                }),
                TriggerArgs::default(),
            ))
            .await
            .unwrap();
        let mut starts_pipeline = h.world.trigger(nightly(), TriggerArgs::default());
        starts_pipeline.name = "nightly-release".to_string();
        starts_pipeline.action = TriggerAction::pipeline(h.world.pipeline.id, TriggerArgs::default());
        h.service.save(starts_pipeline).await.unwrap();
        let mut unrelated = h.world.trigger(
            TriggerCondition::Artifact(ArtifactCondition::new(h.world.stream.id)),
            TriggerArgs::default(),
        );
        unrelated.name = "on-build".to_string();
        let unrelated = h.service.save(unrelated).await.unwrap();

        let pruned = h
            .service
            .prune_for_pipeline(h.world.app_id, h.world.pipeline.id)
            .await
            .unwrap();
        assert_eq!(pruned, 2);
        let left: Vec<TriggerId> = h
            .service
            .list(h.world.app_id)
            .await
            .unwrap()
            .into_iter()
            .map(|t| t.id)
            .collect();
        assert_eq!(left, vec![unrelated.id]);

        let pruned = h
            .service
            .prune_for_artifact_stream(h.world.app_id, h.world.stream.id)
            .await
            .unwrap();
        assert_eq!(pruned, 1);
        assert_eq!(h.service.prune_for_app(h.world.app_id).await.unwrap(), 0);
    }
}
