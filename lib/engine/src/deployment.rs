//! Assembly and submission of execution requests.
//!
//! A [`FireRequest`] becomes an [`ExecutionRequest`] in fixed steps:
//!
//! 1. Merge configured literals with event-supplied values.
//! 2. Fill mandatory defaults.
//! 3. Resolve environment, service and infrastructure variables.
//! 4. Resolve one artifact per artifact variable the deployment needs.
//! 5. Cross-check artifact services against the services the deployment
//!    needs.
//!
//! Any failure aborts before submission. Each attempt is recorded as a
//! [`TriggerExecution`].

use crate::collaborator::{ContentChangeChecker, ContentCheckResult, ExecutionEngine};
use crate::config::ArtifactMatchPolicy;
use crate::error::{ContentCheckError, TriggerServiceError, ValidationError};
use crate::fire::{FireOutcome, FireReport, FireRequest};
use crate::store::TriggerExecutionStore;
use crate::target::{self, TargetShape};
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::Arc;
use tracing::{debug, info, warn};
use tripwire_core::{AppId, ExecutionId, ServiceId, TriggerExecutionId};
use tripwire_resolver::{
    Artifact, ArtifactVariableRequirement, ArtifactVariableResolver, DeploymentCatalog,
    EntityResolver, FiringContext, ResolveError, VariableKind,
};
use tripwire_trigger::{
    DeploymentTarget, ExecutionRequest, ResolvedArtifact, ResolvedArtifactVariable, TemplateValue,
    TriggerConditionType, TriggerExecution, TriggerExecutionStatus, TriggeredBy,
};

const CONTENT_CHANGED: &str = "File content changed";
const CONTENT_UNCHANGED: &str = "File content not changed. Skipped deployment";

/// Collaborators of the deployment execution resolver.
#[derive(Clone)]
pub struct DeploymentCollaborators {
    pub deployments: Arc<dyn DeploymentCatalog>,
    pub artifacts: ArtifactVariableResolver,
    pub entities: EntityResolver,
    pub engine: Arc<dyn ExecutionEngine>,
    pub content_checker: Arc<dyn ContentChangeChecker>,
    pub executions: Arc<dyn TriggerExecutionStore>,
}

/// Builds execution requests and hands them to the execution engine.
pub struct DeploymentExecutionResolver {
    deployments: Arc<dyn DeploymentCatalog>,
    artifacts: ArtifactVariableResolver,
    entities: EntityResolver,
    engine: Arc<dyn ExecutionEngine>,
    content_checker: Arc<dyn ContentChangeChecker>,
    executions: Arc<dyn TriggerExecutionStore>,
    match_policy: ArtifactMatchPolicy,
}

impl DeploymentExecutionResolver {
    #[must_use]
    pub fn new(collaborators: DeploymentCollaborators, match_policy: ArtifactMatchPolicy) -> Self {
        Self {
            deployments: collaborators.deployments,
            artifacts: collaborators.artifacts,
            entities: collaborators.entities,
            engine: collaborators.engine,
            content_checker: collaborators.content_checker,
            executions: collaborators.executions,
            match_policy,
        }
    }

    /// Builds the execution request for `request` without submitting it.
    ///
    /// # Errors
    ///
    /// Returns the first validation or resolution failure.
    pub async fn assemble(
        &self,
        request: &FireRequest,
    ) -> Result<ExecutionRequest, TriggerServiceError> {
        let trigger = &request.trigger;
        let app_id = trigger.app_id;
        let target = trigger.action.target();
        let shape = target::load(self.deployments.as_ref(), app_id, target).await?;

        let mut values = merge_variables(request);
        apply_defaults(&shape, &mut values)?;
        let env_id = self
            .entities
            .resolve(app_id, &shape.variables, &mut values, shape.default_env)
            .await?;

        let artifacts = if shape.build {
            debug!(trigger_id = %trigger.id, "build workflow takes no artifacts");
            Vec::new()
        } else {
            let metadata = self
                .deployments
                .deployment_metadata(app_id, target, &values)
                .await?;
            let context = FiringContext {
                app_id,
                triggering_artifacts: &request.triggering_artifacts,
                upstream_pipeline: request.upstream_pipeline,
            };
            let mut artifacts = Vec::with_capacity(metadata.artifact_variables.len());
            for requirement in &metadata.artifact_variables {
                if let Some(artifact) = self.artifact_for(request, &context, requirement).await? {
                    artifacts.push(resolved(requirement, artifact));
                }
            }
            let artifacts = dedup_by_id(artifacts);
            if !shape.skip_service_check {
                self.check_services(request, &metadata.required_service_ids, &artifacts)?;
            }
            artifacts
        };

        Ok(ExecutionRequest {
            app_id,
            target,
            env_id,
            variables: values,
            artifacts,
            exclude_hosts_with_same_artifact: request.args.exclude_hosts_with_same_artifact,
            continue_with_default_values: request.args.continue_with_default_values,
            triggered_by: TriggeredBy {
                trigger_id: trigger.id,
                trigger_name: trigger.name.clone(),
            },
        })
    }

    /// Picks the artifact for one required variable: the bound selection
    /// when there is one, otherwise a default that depends on the
    /// condition.
    async fn artifact_for(
        &self,
        request: &FireRequest,
        context: &FiringContext<'_>,
        requirement: &ArtifactVariableRequirement,
    ) -> Result<Option<Artifact>, TriggerServiceError> {
        if let Some(binding) = request
            .args
            .artifact_variables
            .iter()
            .find(|b| binds(b, requirement))
        {
            let artifact = self
                .artifacts
                .resolve(context, requirement, &binding.selection)
                .await?;
            return Ok(Some(artifact));
        }

        let trigger = &request.trigger;
        match trigger.condition_type() {
            TriggerConditionType::Artifact => {
                let found = request
                    .triggering_artifacts
                    .iter()
                    .find(|a| requirement.allows(a.artifact_stream_id))
                    .cloned();
                if found.is_none() {
                    debug!(trigger_id = %trigger.id, variable = %requirement.name, "triggering artifact is not allowed for variable");
                }
                Ok(found)
            }
            TriggerConditionType::PipelineCompletion => {
                let Some(upstream) = request.upstream_pipeline else {
                    return Ok(None);
                };
                let deployed = self
                    .artifacts
                    .last_deployed_or_empty(
                        context.app_id,
                        DeploymentTarget::Pipeline(upstream),
                    )
                    .await?;
                let found = deployed
                    .into_iter()
                    .find(|a| requirement.allows(a.artifact_stream_id));
                if found.is_none() {
                    warn!(trigger_id = %trigger.id, variable = %requirement.name, pipeline_id = %upstream, "upstream pipeline deployed no artifact for variable");
                }
                Ok(found)
            }
            TriggerConditionType::Scheduled | TriggerConditionType::Webhook => Ok(None),
        }
    }

    fn check_services(
        &self,
        request: &FireRequest,
        required: &[ServiceId],
        artifacts: &[ResolvedArtifact],
    ) -> Result<(), ResolveError> {
        let required: BTreeSet<ServiceId> = required.iter().copied().collect();
        let supplied: BTreeSet<ServiceId> = artifacts.iter().filter_map(|a| a.service_id).collect();
        let missing: Vec<ServiceId> = required.difference(&supplied).copied().collect();
        let unexpected: Vec<ServiceId> = supplied.difference(&required).copied().collect();
        if missing.is_empty() && unexpected.is_empty() {
            return Ok(());
        }
        match self.match_policy {
            ArtifactMatchPolicy::Lenient => {
                warn!(
                    trigger_id = %request.trigger.id,
                    ?missing,
                    ?unexpected,
                    "artifacts do not match the services the deployment needs, submitting anyway"
                );
                Ok(())
            }
            ArtifactMatchPolicy::Strict => Err(ResolveError::ArtifactServiceMismatch {
                missing,
                unexpected,
            }),
        }
    }

    /// Fires `request`: assembles, records and submits it, or hands it to
    /// the content checker.
    ///
    /// # Errors
    ///
    /// Returns assembly failures, store failures and submission rejections.
    /// A rejected submission is recorded as `Failed` before returning.
    pub async fn fire(&self, request: FireRequest) -> Result<FireReport, TriggerServiceError> {
        let trigger = &request.trigger;
        if trigger.disabled {
            info!(trigger_id = %trigger.id, "trigger is disabled, skipping");
            return Ok(FireReport::new(trigger, FireOutcome::skipped("trigger is disabled")));
        }

        let execution_request = self.assemble(&request).await?;

        if request.only_if_new_artifacts && !execution_request.artifacts.is_empty() {
            let deployed: HashSet<_> = self
                .artifacts
                .last_deployed_or_empty(trigger.app_id, execution_request.target)
                .await?
                .into_iter()
                .map(|a| a.id)
                .collect();
            if execution_request
                .artifacts
                .iter()
                .all(|a| deployed.contains(&a.artifact_id))
            {
                info!(trigger_id = %trigger.id, "no new artifacts since the last deployment, skipping");
                return Ok(FireReport::new(
                    trigger,
                    FireOutcome::skipped("no new artifacts since the last deployment"),
                ));
            }
        }

        let mut record = TriggerExecution::running(&trigger.name, execution_request.clone());
        record.webhook_token.clone_from(&trigger.webhook_token);
        record.webhook_event.clone_from(&request.webhook_event);
        self.executions.insert(&record).await?;

        if let Some(check) = &request.content_check {
            let previous = self
                .executions
                .last_successful(trigger.app_id, trigger.id)
                .await?;
            if let Some(previous) = previous {
                if let Err(e) = self
                    .content_checker
                    .request_check(&record, &previous, check)
                    .await
                {
                    record.finish(TriggerExecutionStatus::Failed, Some(e.to_string()));
                    self.executions.update(&record).await?;
                    return Err(e.into());
                }
                debug!(trigger_id = %trigger.id, trigger_execution_id = %record.id, "awaiting content check");
                return Ok(FireReport::new(
                    trigger,
                    FireOutcome::AwaitingContentCheck {
                        trigger_execution_id: record.id,
                    },
                ));
            }
            debug!(trigger_id = %trigger.id, "no previous successful run, submitting without content check");
        }

        let execution_id = self.submit(&mut record, &execution_request, None).await?;
        Ok(FireReport::new(
            trigger,
            FireOutcome::Submitted {
                trigger_execution_id: record.id,
                execution_id,
            },
        ))
    }

    /// Completes a content-gated firing.
    ///
    /// # Errors
    ///
    /// Returns `TriggerExecutionNotFound` or `TriggerExecutionNotRunning`
    /// for unknown or finished records, and submission failures.
    pub async fn handle_content_check_result(
        &self,
        app_id: AppId,
        id: TriggerExecutionId,
        result: ContentCheckResult,
    ) -> Result<FireReport, TriggerServiceError> {
        let mut record = self
            .executions
            .get(app_id, id)
            .await?
            .ok_or(TriggerServiceError::TriggerExecutionNotFound { id })?;
        if record.status != TriggerExecutionStatus::Running {
            return Err(TriggerServiceError::TriggerExecutionNotRunning { id });
        }

        let outcome = match result {
            ContentCheckResult::Changed => {
                let Some(request) = record.execution_request.clone() else {
                    let message = "execution request was not recorded".to_string();
                    record.finish(TriggerExecutionStatus::Failed, Some(message.clone()));
                    self.executions.update(&record).await?;
                    return Ok(report(&record, FireOutcome::Skipped { reason: message }));
                };
                let execution_id = self
                    .submit(&mut record, &request, Some(CONTENT_CHANGED))
                    .await?;
                FireOutcome::Submitted {
                    trigger_execution_id: id,
                    execution_id,
                }
            }
            ContentCheckResult::Unchanged => {
                info!(trigger_execution_id = %id, "tracked files unchanged, skipping deployment");
                record.finish(
                    TriggerExecutionStatus::Success,
                    Some(CONTENT_UNCHANGED.to_string()),
                );
                self.executions.update(&record).await?;
                FireOutcome::ContentUnchanged {
                    trigger_execution_id: id,
                }
            }
            ContentCheckResult::Failed { message } => {
                warn!(trigger_execution_id = %id, %message, "content check failed");
                record.finish(TriggerExecutionStatus::Failed, Some(message.clone()));
                self.executions.update(&record).await?;
                FireOutcome::Failed(ContentCheckError::Failed { message }.into())
            }
        };
        Ok(report(&record, outcome))
    }

    async fn submit(
        &self,
        record: &mut TriggerExecution,
        request: &ExecutionRequest,
        success_message: Option<&str>,
    ) -> Result<ExecutionId, TriggerServiceError> {
        match self
            .engine
            .submit(request.app_id, request.env_id, request)
            .await
        {
            Ok(handle) => {
                record.execution_id = Some(handle.execution_id);
                record.finish(
                    TriggerExecutionStatus::Success,
                    success_message.map(str::to_string),
                );
                self.executions.update(record).await?;
                info!(
                    trigger_id = %record.trigger_id,
                    execution_id = %handle.execution_id,
                    status = %handle.status,
                    "execution submitted"
                );
                Ok(handle.execution_id)
            }
            Err(e) => {
                warn!(trigger_id = %record.trigger_id, error = %e, "execution rejected");
                record.finish(TriggerExecutionStatus::Failed, Some(e.to_string()));
                self.executions.update(record).await?;
                Err(e.into())
            }
        }
    }
}

fn report(record: &TriggerExecution, outcome: FireOutcome) -> FireReport {
    FireReport {
        trigger_id: record.trigger_id,
        trigger_name: record.trigger_name.clone(),
        outcome,
    }
}

/// Configured literals, overridden by non-empty event-supplied values.
fn merge_variables(request: &FireRequest) -> BTreeMap<String, String> {
    let mut values = BTreeMap::new();
    for variable in &request.trigger.action.args().variables {
        let supplied = request
            .args
            .variables
            .get(&variable.name)
            .filter(|v| !v.is_empty());
        match (&variable.value, supplied) {
            (_, Some(value)) => {
                values.insert(variable.name.clone(), value.clone());
            }
            (TemplateValue::Literal(value), None) => {
                values.insert(variable.name.clone(), value.clone());
            }
            (TemplateValue::Placeholder(_), None) => {}
        }
    }
    values
}

/// Fills missing mandatory values from defaults.
fn apply_defaults(
    shape: &TargetShape,
    values: &mut BTreeMap<String, String>,
) -> Result<(), ValidationError> {
    let mut missing = Vec::new();
    for variable in shape.variables.iter().filter(|v| v.mandatory) {
        if values.get(&variable.name).is_some_and(|v| !v.trim().is_empty()) {
            continue;
        }
        match &variable.default_value {
            Some(default) if !default.is_empty() => {
                values.insert(variable.name.clone(), default.clone());
            }
            _ if variable.runtime_input => {}
            _ if variable.kind == VariableKind::Text => missing.push(variable.name.clone()),
            _ => {}
        }
    }
    if missing.is_empty() {
        Ok(())
    } else {
        Err(ValidationError::MandatoryVariablesMissing { variables: missing })
    }
}

fn binds(binding: &ResolvedArtifactVariable, requirement: &ArtifactVariableRequirement) -> bool {
    binding.name == requirement.name
        && match (&binding.scope, &requirement.scope) {
            (None, _) => true,
            (Some(own), Some(other)) => own == other,
            (Some(_), None) => false,
        }
}

fn resolved(requirement: &ArtifactVariableRequirement, artifact: Artifact) -> ResolvedArtifact {
    ResolvedArtifact {
        variable: Some(requirement.name.clone()),
        artifact_id: artifact.id,
        artifact_stream_id: artifact.artifact_stream_id,
        build_number: artifact.build_number,
        service_id: artifact.service_id.or(requirement.service_id),
    }
}

fn dedup_by_id(artifacts: Vec<ResolvedArtifact>) -> Vec<ResolvedArtifact> {
    let mut seen = HashSet::new();
    artifacts
        .into_iter()
        .filter(|a| seen.insert(a.artifact_id))
        .collect()
}
