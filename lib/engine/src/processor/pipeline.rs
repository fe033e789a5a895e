//! Pipeline-completion triggers.

use super::{ActionValidator, Catalogs, ConditionProcessor, wrong_condition};
use crate::error::{TriggerServiceError, ValidationError};
use crate::fire::{FireRequest, TriggerEvent};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;
use tripwire_resolver::DeploymentCatalog;
use tripwire_trigger::{DeploymentTarget, Trigger, TriggerCondition, TriggerConditionType};

/// Fires when an upstream pipeline completes.
pub struct PipelineCompletionProcessor {
    deployments: Arc<dyn DeploymentCatalog>,
    actions: ActionValidator,
}

impl PipelineCompletionProcessor {
    #[must_use]
    pub fn new(catalogs: &Catalogs, actions: ActionValidator) -> Self {
        Self {
            deployments: catalogs.deployments.clone(),
            actions,
        }
    }
}

#[async_trait]
impl ConditionProcessor for PipelineCompletionProcessor {
    fn condition_type(&self) -> TriggerConditionType {
        TriggerConditionType::PipelineCompletion
    }

    fn actions(&self) -> &ActionValidator {
        &self.actions
    }

    async fn validate_condition(
        &self,
        trigger: &mut Trigger,
        _existing: Option<&Trigger>,
    ) -> Result<(), TriggerServiceError> {
        let app_id = trigger.app_id;
        let target = trigger.action.target();
        let TriggerCondition::PipelineCompletion(condition) = &mut trigger.condition else {
            return Err(wrong_condition(trigger));
        };
        let pipeline_id = condition.pipeline_id;
        if target == DeploymentTarget::Pipeline(pipeline_id) {
            return Err(ValidationError::SelfReferencingPipeline { pipeline_id }.into());
        }
        let pipeline = self
            .deployments
            .pipeline(app_id, pipeline_id)
            .await?
            .ok_or(ValidationError::PipelineNotFound { pipeline_id })?;
        condition.pipeline_name = Some(pipeline.name);
        Ok(())
    }

    async fn rehydrate(&self, trigger: &mut Trigger) {
        let app_id = trigger.app_id;
        if let TriggerCondition::PipelineCompletion(condition) = &mut trigger.condition {
            match self.deployments.pipeline(app_id, condition.pipeline_id).await {
                Ok(Some(pipeline)) => condition.pipeline_name = Some(pipeline.name),
                Ok(None) => debug!(pipeline_id = %condition.pipeline_id, "upstream pipeline is gone"),
                Err(e) => debug!(error = %e, "upstream pipeline lookup failed"),
            }
        }
        self.actions.rehydrate(trigger).await;
    }

    async fn on_event(
        &self,
        trigger: &Trigger,
        event: &TriggerEvent<'_>,
    ) -> Result<Vec<FireRequest>, TriggerServiceError> {
        let TriggerCondition::PipelineCompletion(condition) = &trigger.condition else {
            return Err(wrong_condition(trigger));
        };
        match *event {
            TriggerEvent::PipelineCompleted { pipeline_id } if pipeline_id == condition.pipeline_id => {
                let args = trigger.action.args().resolve(None)?;
                Ok(vec![
                    FireRequest::new(trigger, args).with_upstream_pipeline(pipeline_id),
                ])
            }
            _ => Ok(Vec::new()),
        }
    }
}
