//! New-artifact triggers.

use super::{ActionValidator, Catalogs, ConditionProcessor, compile_filter, wrong_condition};
use crate::error::{TriggerServiceError, ValidationError};
use crate::fire::{FireRequest, TriggerEvent};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, warn};
use tripwire_core::AppId;
use tripwire_resolver::{Artifact, ArtifactCatalog, ArtifactStream, EntityCatalog};
use tripwire_trigger::{Trigger, TriggerCondition, TriggerConditionType};

/// Fires when builds are collected on a watched stream.
pub struct ArtifactConditionProcessor {
    artifacts: Arc<dyn ArtifactCatalog>,
    entities: Arc<dyn EntityCatalog>,
    actions: ActionValidator,
    fire_for_each: bool,
}

impl ArtifactConditionProcessor {
    /// With `fire_for_each`, every matching artifact of a batch fires
    /// separately.
    #[must_use]
    pub fn new(catalogs: &Catalogs, actions: ActionValidator, fire_for_each: bool) -> Self {
        Self {
            artifacts: catalogs.artifacts.clone(),
            entities: catalogs.entities.clone(),
            actions,
            fire_for_each,
        }
    }

    async fn source_name(
        &self,
        app_id: AppId,
        stream: &ArtifactStream,
    ) -> Result<String, TriggerServiceError> {
        let service_id = stream
            .service_id
            .ok_or_else(|| ValidationError::ArtifactStreamNotBound {
                artifact_stream: stream.name.clone(),
            })?;
        let service = self
            .entities
            .service(app_id, service_id)
            .await?
            .ok_or_else(|| ValidationError::ServiceNotFound {
                service: service_id.to_string(),
            })?;
        Ok(format!("{} ({})", stream.source_name, service.name))
    }
}

#[async_trait]
impl ConditionProcessor for ArtifactConditionProcessor {
    fn condition_type(&self) -> TriggerConditionType {
        TriggerConditionType::Artifact
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
        let TriggerCondition::Artifact(condition) = &mut trigger.condition else {
            return Err(wrong_condition(trigger));
        };
        let stream = self
            .artifacts
            .artifact_stream(condition.artifact_stream_id)
            .await?
            .ok_or_else(|| ValidationError::ArtifactStreamNotFound {
                reference: condition.artifact_stream_id.to_string(),
            })?;
        let source_name = self.source_name(app_id, &stream).await?;
        if let Some(spec) = &condition.artifact_filter {
            compile_filter(spec)?;
        }
        condition.service_id = stream.service_id;
        condition.artifact_source_name = Some(source_name);
        Ok(())
    }

    async fn rehydrate(&self, trigger: &mut Trigger) {
        let app_id = trigger.app_id;
        if let TriggerCondition::Artifact(condition) = &mut trigger.condition {
            match self.artifacts.artifact_stream(condition.artifact_stream_id).await {
                Ok(Some(stream)) => match self.source_name(app_id, &stream).await {
                    Ok(name) => condition.artifact_source_name = Some(name),
                    Err(e) => debug!(error = %e, "artifact source name unavailable"),
                },
                Ok(None) => debug!(artifact_stream = %condition.artifact_stream_id, "artifact stream is gone"),
                Err(e) => debug!(error = %e, "artifact stream lookup failed"),
            }
        }
        self.actions.rehydrate(trigger).await;
    }

    async fn on_event(
        &self,
        trigger: &Trigger,
        event: &TriggerEvent<'_>,
    ) -> Result<Vec<FireRequest>, TriggerServiceError> {
        let TriggerCondition::Artifact(condition) = &trigger.condition else {
            return Err(wrong_condition(trigger));
        };
        let TriggerEvent::ArtifactCollected { stream, artifacts } = *event else {
            return Ok(Vec::new());
        };
        if stream != condition.artifact_stream_id {
            return Ok(Vec::new());
        }

        let mut newest_first: Vec<&Artifact> = artifacts.iter().collect();
        newest_first.sort_by(|a, b| b.collected_at.cmp(&a.collected_at));

        let matching: Vec<Artifact> = match &condition.artifact_filter {
            None if self.fire_for_each => newest_first
                .into_iter()
                .filter(|a| !a.duplicate)
                .cloned()
                .collect(),
            None => match newest_first.first() {
                Some(last) if last.duplicate => {
                    debug!(trigger_id = %trigger.id, build = %last.build_number, "last collected artifact is a duplicate");
                    Vec::new()
                }
                Some(last) => vec![(*last).clone()],
                None => Vec::new(),
            },
            Some(spec) => {
                let filter = compile_filter(spec)?;
                newest_first
                    .into_iter()
                    .filter(|a| !a.duplicate && filter.matches(a))
                    .cloned()
                    .collect()
            }
        };

        if matching.is_empty() {
            warn!(
                trigger_id = %trigger.id,
                artifact_stream = %stream,
                filter = ?condition.artifact_filter.as_ref().map(|f| &f.pattern),
                "no collected artifact matches the trigger, skipping"
            );
            return Ok(Vec::new());
        }

        let args = trigger.action.args().resolve(None)?;
        if self.fire_for_each {
            return Ok(matching
                .into_iter()
                .map(|artifact| {
                    FireRequest::new(trigger, args.clone()).with_triggering_artifacts(vec![artifact])
                })
                .collect());
        }
        let newest = matching.into_iter().take(1).collect();
        Ok(vec![
            FireRequest::new(trigger, args).with_triggering_artifacts(newest),
        ])
    }
}
