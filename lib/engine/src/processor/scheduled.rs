//! Cron triggers.

use super::{ActionValidator, ConditionProcessor, wrong_condition};
use crate::error::TriggerServiceError;
use crate::fire::{FireRequest, TriggerEvent};
use async_trait::async_trait;
use chrono::Utc;
use tracing::debug;
use tripwire_scheduler::CronSchedule;
use tripwire_trigger::{Trigger, TriggerCondition, TriggerConditionType};

/// Fires on a cron schedule. Ticks arrive from the scheduled-fire loop.
pub struct ScheduledConditionProcessor {
    actions: ActionValidator,
    min_interval_secs: i64,
}

impl ScheduledConditionProcessor {
    #[must_use]
    pub const fn new(actions: ActionValidator, min_interval_secs: i64) -> Self {
        Self {
            actions,
            min_interval_secs,
        }
    }
}

#[async_trait]
impl ConditionProcessor for ScheduledConditionProcessor {
    fn condition_type(&self) -> TriggerConditionType {
        TriggerConditionType::Scheduled
    }

    fn actions(&self) -> &ActionValidator {
        &self.actions
    }

    async fn validate_condition(
        &self,
        trigger: &mut Trigger,
        _existing: Option<&Trigger>,
    ) -> Result<(), TriggerServiceError> {
        let TriggerCondition::Scheduled(condition) = &mut trigger.condition else {
            return Err(wrong_condition(trigger));
        };
        let schedule = CronSchedule::parse(&condition.cron_expression)?;
        let next = schedule.validate(Utc::now(), self.min_interval_secs)?;
        condition.cron_description = Some(schedule.describe());
        trigger.next_fire_at = (!trigger.disabled).then_some(next);
        Ok(())
    }

    async fn rehydrate(&self, trigger: &mut Trigger) {
        if let TriggerCondition::Scheduled(condition) = &mut trigger.condition
            && condition.cron_description.is_none()
        {
            match CronSchedule::parse(&condition.cron_expression) {
                Ok(schedule) => condition.cron_description = Some(schedule.describe()),
                Err(e) => debug!(error = %e, "stored cron expression no longer parses"),
            }
        }
        self.actions.rehydrate(trigger).await;
    }

    async fn on_event(
        &self,
        trigger: &Trigger,
        event: &TriggerEvent<'_>,
    ) -> Result<Vec<FireRequest>, TriggerServiceError> {
        let TriggerCondition::Scheduled(condition) = &trigger.condition else {
            return Err(wrong_condition(trigger));
        };
        let TriggerEvent::ScheduleDue { fire_time } = *event else {
            return Ok(Vec::new());
        };
        debug!(trigger_id = %trigger.id, %fire_time, "scheduled tick");
        let args = trigger.action.args().resolve(None)?;
        Ok(vec![
            FireRequest::new(trigger, args).only_if_new_artifacts(condition.on_new_artifact_only),
        ])
    }
}
