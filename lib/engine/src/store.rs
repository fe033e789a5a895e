//! Trigger and trigger-execution storage.

use crate::error::StoreError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::warn;
use tripwire_core::{AppId, ArtifactStreamId, PipelineId, TriggerExecutionId, TriggerId};
use tripwire_scheduler::{DueTrigger, DueTriggerSource, SourceError};
use tripwire_trigger::{Trigger, TriggerCondition, TriggerExecution};

/// Persisted triggers.
#[async_trait]
pub trait TriggerStore: Send + Sync {
    async fn insert(&self, trigger: &Trigger) -> Result<(), StoreError>;

    /// Replaces the stored trigger with the same id.
    async fn replace(&self, trigger: &Trigger) -> Result<(), StoreError>;

    /// Returns false if nothing was deleted.
    async fn delete(&self, app_id: AppId, id: TriggerId) -> Result<bool, StoreError>;

    async fn get(&self, app_id: AppId, id: TriggerId) -> Result<Option<Trigger>, StoreError>;

    /// Looks a trigger up without its application, for schedule ticks.
    async fn find(&self, id: TriggerId) -> Result<Option<Trigger>, StoreError>;

    async fn find_by_name(&self, app_id: AppId, name: &str)
    -> Result<Option<Trigger>, StoreError>;

    async fn find_by_webhook_token(
        &self,
        app_id: AppId,
        token: &str,
    ) -> Result<Option<Trigger>, StoreError>;

    async fn list(&self, app_id: AppId) -> Result<Vec<Trigger>, StoreError>;

    /// Artifact triggers watching `stream`.
    async fn list_watching_stream(
        &self,
        stream: ArtifactStreamId,
    ) -> Result<Vec<Trigger>, StoreError>;

    /// Pipeline-completion triggers fired by `pipeline_id`.
    async fn list_after_pipeline(
        &self,
        app_id: AppId,
        pipeline_id: PipelineId,
    ) -> Result<Vec<Trigger>, StoreError>;

    /// Enabled scheduled triggers with a next fire time at or before `now`,
    /// oldest first.
    async fn due_scheduled(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Trigger>, StoreError>;

    /// Sets the next fire time to `next` if it is still `expected`.
    async fn advance_next_fire(
        &self,
        id: TriggerId,
        expected: DateTime<Utc>,
        next: Option<DateTime<Utc>>,
    ) -> Result<bool, StoreError>;
}

/// Firing records.
#[async_trait]
pub trait TriggerExecutionStore: Send + Sync {
    async fn insert(&self, execution: &TriggerExecution) -> Result<(), StoreError>;

    async fn update(&self, execution: &TriggerExecution) -> Result<(), StoreError>;

    async fn get(
        &self,
        app_id: AppId,
        id: TriggerExecutionId,
    ) -> Result<Option<TriggerExecution>, StoreError>;

    /// Newest `Success` record of a trigger.
    async fn last_successful(
        &self,
        app_id: AppId,
        trigger_id: TriggerId,
    ) -> Result<Option<TriggerExecution>, StoreError>;

    /// Records of a trigger, newest first.
    async fn list_for_trigger(
        &self,
        app_id: AppId,
        trigger_id: TriggerId,
    ) -> Result<Vec<TriggerExecution>, StoreError>;
}

/// Feeds the scheduled-fire loop from a trigger store.
#[derive(Clone)]
pub struct StoreDueSource {
    triggers: Arc<dyn TriggerStore>,
}

impl StoreDueSource {
    #[must_use]
    pub fn new(triggers: Arc<dyn TriggerStore>) -> Self {
        Self { triggers }
    }
}

fn unavailable(e: StoreError) -> SourceError {
    SourceError::Unavailable {
        message: e.to_string(),
    }
}

#[async_trait]
impl DueTriggerSource for StoreDueSource {
    async fn due(&self, now: DateTime<Utc>, limit: usize) -> Result<Vec<DueTrigger>, SourceError> {
        let triggers = self
            .triggers
            .due_scheduled(now, limit)
            .await
            .map_err(unavailable)?;

        Ok(triggers
            .into_iter()
            .filter_map(|trigger| {
                let TriggerCondition::Scheduled(condition) = &trigger.condition else {
                    warn!(trigger_id = %trigger.id, "non-scheduled trigger has a next fire time");
                    return None;
                };
                Some(DueTrigger {
                    trigger_id: trigger.id,
                    fire_time: trigger.next_fire_at?,
                    cron_expression: condition.cron_expression.clone(),
                })
            })
            .collect())
    }

    async fn advance(
        &self,
        trigger_id: TriggerId,
        expected: DateTime<Utc>,
        next: Option<DateTime<Utc>>,
    ) -> Result<bool, SourceError> {
        self.triggers
            .advance_next_fire(trigger_id, expected, next)
            .await
            .map_err(unavailable)
    }
}
