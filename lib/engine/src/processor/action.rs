//! Validation of trigger actions and their artifact bindings.

use super::{Catalogs, compile_filter};
use crate::error::{TriggerServiceError, ValidationError};
use crate::target;
use std::sync::Arc;
use tracing::debug;
use tripwire_core::{AppId, ArtifactStreamId};
use tripwire_resolver::{ArtifactCatalog, DeploymentCatalog, Variable};
use tripwire_trigger::{
    ArtifactSelection, DeploymentTarget, TemplateValue, Trigger, TriggerArgs, TriggerCondition,
    TriggerConditionType,
};

/// Custom webhooks name their artifact streams directly, so literal
/// streams get a cached display name.
fn is_custom_webhook(trigger: &Trigger) -> bool {
    matches!(&trigger.condition, TriggerCondition::Webhook(c) if !c.source.is_provider())
}

/// Checks the deployment a trigger starts.
#[derive(Clone)]
pub struct ActionValidator {
    artifacts: Arc<dyn ArtifactCatalog>,
    deployments: Arc<dyn DeploymentCatalog>,
}

impl ActionValidator {
    #[must_use]
    pub fn new(catalogs: &Catalogs) -> Self {
        Self {
            artifacts: catalogs.artifacts.clone(),
            deployments: catalogs.deployments.clone(),
        }
    }

    /// Validates the action of `trigger`, caching the target name and the
    /// display names of artifact bindings.
    pub async fn validate(&self, trigger: &mut Trigger) -> Result<(), TriggerServiceError> {
        let app_id = trigger.app_id;
        let condition = trigger.condition_type();
        let custom_webhook = is_custom_webhook(trigger);
        let shape = target::load(self.deployments.as_ref(), app_id, trigger.action.target()).await?;
        trigger.action.set_target_name(shape.name);

        let args = trigger.action.args_mut();
        if condition != TriggerConditionType::Webhook {
            reject_entity_placeholders(&shape.variables, args)?;
        }
        if args.continue_with_default_values {
            require_mandatory(&shape.variables, args)?;
        }

        for binding in &mut args.artifact_variables {
            check_policy(&binding.name, &binding.selection, condition)?;
            match &mut binding.selection {
                ArtifactSelection::LastCollected {
                    artifact_stream,
                    filter,
                    artifact_stream_name,
                } => {
                    match artifact_stream {
                        TemplateValue::Placeholder(_) => {
                            if condition != TriggerConditionType::Webhook {
                                return Err(ValidationError::EntityPlaceholderNotAllowed {
                                    variable: binding.name.clone(),
                                }
                                .into());
                            }
                        }
                        TemplateValue::Literal(stream_id) => {
                            *artifact_stream_name = Some(self.stream_name(*stream_id).await?);
                        }
                    }
                    if let Some(spec) = filter {
                        compile_filter(spec)?;
                    }
                }
                ArtifactSelection::LastDeployed {
                    source,
                    source_name,
                } => {
                    let shape = target::load(self.deployments.as_ref(), app_id, *source).await?;
                    *source_name = Some(shape.name);
                }
                ArtifactSelection::FromWebhookPayload {
                    artifact_server,
                    artifact_stream,
                    artifact_stream_name,
                    ..
                } => {
                    if artifact_server.is_placeholder() != artifact_stream.is_placeholder() {
                        return Err(ValidationError::InconsistentPlaceholders {
                            variable: binding.name.clone(),
                        }
                        .into());
                    }
                    if custom_webhook && let TemplateValue::Literal(stream_id) = artifact_stream {
                        *artifact_stream_name = Some(self.stream_name(*stream_id).await?);
                    }
                }
                ArtifactSelection::FromTriggeringArtifactSource
                | ArtifactSelection::FromUpstreamPipeline => {}
            }
        }
        Ok(())
    }

    async fn stream_name(
        &self,
        stream_id: ArtifactStreamId,
    ) -> Result<String, TriggerServiceError> {
        let stream = self
            .artifacts
            .artifact_stream(stream_id)
            .await?
            .ok_or_else(|| ValidationError::ArtifactStreamNotFound {
                reference: stream_id.to_string(),
            })?;
        Ok(stream.name)
    }

    /// Fills the target name and the display names of artifact bindings.
    pub async fn rehydrate(&self, trigger: &mut Trigger) {
        let app_id = trigger.app_id;
        let custom_webhook = is_custom_webhook(trigger);
        if let Some(name) = self.target_name(app_id, trigger.action.target()).await {
            trigger.action.set_target_name(name);
        }
        for binding in &mut trigger.action.args_mut().artifact_variables {
            match &mut binding.selection {
                ArtifactSelection::LastCollected {
                    artifact_stream: TemplateValue::Literal(stream_id),
                    artifact_stream_name,
                    ..
                } => match self.artifacts.artifact_stream(*stream_id).await {
                    Ok(Some(stream)) => *artifact_stream_name = Some(stream.name),
                    Ok(None) => debug!(artifact_stream = %stream_id, "artifact stream is gone"),
                    Err(e) => debug!(artifact_stream = %stream_id, error = %e, "stream lookup failed"),
                },
                ArtifactSelection::FromWebhookPayload {
                    artifact_stream: TemplateValue::Literal(stream_id),
                    artifact_stream_name,
                    ..
                } if custom_webhook => match self.stream_name(*stream_id).await {
                    Ok(name) => *artifact_stream_name = Some(name),
                    Err(e) => debug!(artifact_stream = %stream_id, error = %e, "stream lookup failed"),
                },
                ArtifactSelection::LastDeployed {
                    source,
                    source_name,
                } => {
                    if let Some(name) = self.target_name(app_id, *source).await {
                        *source_name = Some(name);
                    }
                }
                _ => {}
            }
        }
    }

    async fn target_name(&self, app_id: AppId, target: DeploymentTarget) -> Option<String> {
        match target::load(self.deployments.as_ref(), app_id, target).await {
            Ok(shape) => Some(shape.name),
            Err(e) => {
                debug!(target = %target, error = %e, "target lookup failed");
                None
            }
        }
    }
}

fn check_policy(
    variable: &str,
    selection: &ArtifactSelection,
    condition: TriggerConditionType,
) -> Result<(), ValidationError> {
    let required = match selection {
        ArtifactSelection::FromTriggeringArtifactSource => TriggerConditionType::Artifact,
        ArtifactSelection::FromUpstreamPipeline => TriggerConditionType::PipelineCompletion,
        ArtifactSelection::FromWebhookPayload { .. } => TriggerConditionType::Webhook,
        ArtifactSelection::LastCollected { .. } | ArtifactSelection::LastDeployed { .. } => {
            return Ok(());
        }
    };
    if required == condition {
        Ok(())
    } else {
        Err(ValidationError::SelectionNotAllowed {
            variable: variable.to_string(),
            policy: selection.policy(),
            condition,
        })
    }
}

fn reject_entity_placeholders(
    variables: &[Variable],
    args: &TriggerArgs,
) -> Result<(), ValidationError> {
    for variable in variables.iter().filter(|v| v.entity_kind().is_some()) {
        if args
            .variable(&variable.name)
            .is_some_and(TemplateValue::is_placeholder)
        {
            return Err(ValidationError::EntityPlaceholderNotAllowed {
                variable: variable.name.clone(),
            });
        }
    }
    Ok(())
}

fn require_mandatory(variables: &[Variable], args: &TriggerArgs) -> Result<(), ValidationError> {
    let missing: Vec<String> = variables
        .iter()
        .filter(|v| v.mandatory && v.default_value.as_deref().is_none_or(str::is_empty))
        .filter(|v| match args.variable(&v.name) {
            None => true,
            Some(TemplateValue::Literal(value)) => value.trim().is_empty(),
            Some(TemplateValue::Placeholder(_)) => false,
        })
        .map(|v| v.name.clone())
        .collect();
    if missing.is_empty() {
        Ok(())
    } else {
        Err(ValidationError::MandatoryVariablesMissing { variables: missing })
    }
}
