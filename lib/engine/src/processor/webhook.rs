//! Webhook triggers.

use super::{ActionValidator, ConditionProcessor, wrong_condition};
use crate::error::{TriggerServiceError, ValidationError};
use crate::fire::{FireRequest, TriggerEvent};
use async_trait::async_trait;
use tripwire_trigger::{
    ContentCheck, Trigger, TriggerCondition, TriggerConditionType, WebhookCondition,
    WebhookEventType, WebhookSource,
};
use tripwire_webhook::{WebhookError, WebhookValidator, compile_full_match, issue_token};

/// Fires on inbound webhooks addressed to the trigger's token.
pub struct WebhookConditionProcessor {
    actions: ActionValidator,
}

impl WebhookConditionProcessor {
    #[must_use]
    pub const fn new(actions: ActionValidator) -> Self {
        Self { actions }
    }
}

fn invalid_pattern(e: WebhookError) -> ValidationError {
    match e {
        WebhookError::InvalidPattern { pattern, reason } => {
            ValidationError::InvalidPattern { pattern, reason }
        }
        other => ValidationError::InvalidPattern {
            pattern: String::new(),
            reason: other.to_string(),
        },
    }
}

fn invalid_check(reason: &str) -> ValidationError {
    ValidationError::InvalidContentCheck {
        reason: reason.to_string(),
    }
}

fn validate_patterns(condition: &WebhookCondition) -> Result<(), ValidationError> {
    for filter in &condition.payload_filters {
        compile_full_match(&filter.expected).map_err(invalid_pattern)?;
    }
    if let Some(branch_regex) = &condition.branch_regex {
        compile_full_match(branch_regex).map_err(invalid_pattern)?;
    }
    Ok(())
}

/// Custom webhooks only filter on their payload.
fn validate_custom(condition: &WebhookCondition) -> Result<(), ValidationError> {
    let any_event = condition
        .event_types
        .iter()
        .all(|t| *t == WebhookEventType::Any);
    if !any_event
        || !condition.actions.is_empty()
        || !condition.release_actions.is_empty()
        || !condition.bitbucket_events.is_empty()
        || condition.branch_regex.is_some()
    {
        return Err(ValidationError::ProviderFiltersNotSupported);
    }
    Ok(())
}

/// Checks a content check and trims its branch.
fn validate_content_check(
    source: WebhookSource,
    event_types: &[WebhookEventType],
    check: &mut ContentCheck,
) -> Result<(), ValidationError> {
    if !matches!(source, WebhookSource::GitHub | WebhookSource::GitLab) {
        return Err(invalid_check("only GitHub and GitLab triggers support content checks"));
    }
    if event_types != [WebhookEventType::Push] {
        return Err(invalid_check("content checks require the push event only"));
    }
    let branch = check.branch.trim();
    if branch.is_empty() {
        return Err(invalid_check("branch name is required"));
    }
    check.branch = branch.to_string();
    if check.repo_name.as_deref().is_none_or(|r| r.trim().is_empty()) {
        return Err(invalid_check("repository name is required"));
    }
    if check.file_paths.iter().all(|p| p.trim().is_empty()) {
        return Err(invalid_check("at least one file path is required"));
    }
    Ok(())
}

#[async_trait]
impl ConditionProcessor for WebhookConditionProcessor {
    fn condition_type(&self) -> TriggerConditionType {
        TriggerConditionType::Webhook
    }

    fn actions(&self) -> &ActionValidator {
        &self.actions
    }

    async fn validate_condition(
        &self,
        trigger: &mut Trigger,
        existing: Option<&Trigger>,
    ) -> Result<(), TriggerServiceError> {
        let previous = existing.and_then(|t| match &t.condition {
            TriggerCondition::Webhook(c) => Some(c),
            _ => None,
        });
        let TriggerCondition::Webhook(condition) = &mut trigger.condition else {
            return Err(wrong_condition(trigger));
        };

        if condition.source == WebhookSource::Bitbucket
            && (!condition.actions.is_empty() || !condition.release_actions.is_empty())
        {
            return Err(ValidationError::ActionsNotSupported {
                source: condition.source,
            }
            .into());
        }
        if !condition.source.is_provider() {
            validate_custom(condition)?;
        }
        validate_patterns(condition)?;

        if let Some(check) = &mut condition.content_check {
            validate_content_check(condition.source, &condition.event_types, check)?;
        }
        if let Some(old) = previous.and_then(|p| p.content_check.as_ref())
            && matches!(condition.source, WebhookSource::GitHub | WebhookSource::GitLab)
            && condition.content_check.as_ref() != Some(old)
        {
            return Err(ValidationError::ContentCheckImmutable.into());
        }

        let current = condition
            .token
            .as_ref()
            .or_else(|| previous.and_then(|p| p.token.as_ref()));
        let token = issue_token(current, trigger.action.args());
        trigger.webhook_token = Some(token.token.clone());
        condition.token = Some(token);
        Ok(())
    }

    async fn rehydrate(&self, trigger: &mut Trigger) {
        self.actions.rehydrate(trigger).await;
    }

    async fn on_event(
        &self,
        trigger: &Trigger,
        event: &TriggerEvent<'_>,
    ) -> Result<Vec<FireRequest>, TriggerServiceError> {
        let TriggerCondition::Webhook(condition) = &trigger.condition else {
            return Err(wrong_condition(trigger));
        };
        let TriggerEvent::WebhookReceived { headers, payload } = *event else {
            return Ok(Vec::new());
        };

        let validator = WebhookValidator::new(condition)?;
        let validated = validator.validate(headers, payload)?;
        let args = validator.resolve_args(trigger.action.args(), payload)?;

        let mut details = validated.details;
        if let Some(check) = &condition.content_check {
            details.git_connector_id = Some(check.git_connector_id);
            details.file_paths.clone_from(&check.file_paths);
        }
        Ok(vec![
            FireRequest::new(trigger, args)
                .with_webhook_event(details)
                .with_content_check(condition.content_check.clone()),
        ])
    }
}
