//! Validation of inbound webhooks against a webhook condition.

use crate::error::WebhookError;
use crate::event::{DetectedEvent, detect_event, extract_details};
use crate::headers::WebhookHeaders;
use regex::Regex;
use serde_json::Value;
use tracing::debug;
use tripwire_trigger::selector::select_string;
use tripwire_trigger::{
    PayloadFilter, PullRequestAction, ReleaseAction, ResolvedArgs, TriggerArgs, TriggerError,
    WebhookCondition, WebhookEventDetails, WebhookEventType, WebhookSource,
};

/// Compiles `pattern` so that it must match a whole value.
///
/// # Errors
///
/// Returns `InvalidPattern` if the pattern is not a valid expression.
pub fn compile_full_match(pattern: &str) -> Result<Regex, WebhookError> {
    Regex::new(&format!("^(?:{pattern})$")).map_err(|e| WebhookError::InvalidPattern {
        pattern: pattern.to_string(),
        reason: e.to_string(),
    })
}

/// A webhook that passed validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedWebhook {
    /// Detected provider and event.
    pub event: DetectedEvent,
    /// Branch, commit and repository details.
    pub details: WebhookEventDetails,
}

/// Validates webhooks for one trigger condition.
#[derive(Debug, Clone)]
pub struct WebhookValidator<'a> {
    condition: &'a WebhookCondition,
    filters: Vec<(&'a PayloadFilter, Regex)>,
    branch: Option<(&'a str, Regex)>,
}

impl<'a> WebhookValidator<'a> {
    /// Creates a validator for `condition`, compiling its expressions.
    ///
    /// # Errors
    ///
    /// Returns `InvalidPattern` if a stored payload filter or branch
    /// expression does not compile.
    pub fn new(condition: &'a WebhookCondition) -> Result<Self, WebhookError> {
        let filters = condition
            .payload_filters
            .iter()
            .map(|filter| Ok((filter, compile_full_match(&filter.expected)?)))
            .collect::<Result<Vec<_>, WebhookError>>()?;
        let branch = condition
            .branch_regex
            .as_deref()
            .map(|pattern| Ok::<_, WebhookError>((pattern, compile_full_match(pattern)?)))
            .transpose()?;
        Ok(Self {
            condition,
            filters,
            branch,
        })
    }

    /// Checks provider, event, payload filters and branch.
    ///
    /// Custom webhooks skip provider and event detection; only their
    /// payload filters apply.
    ///
    /// # Errors
    ///
    /// Returns the first check that fails.
    pub fn validate(
        &self,
        headers: &WebhookHeaders,
        payload: &Value,
    ) -> Result<ValidatedWebhook, WebhookError> {
        let event = if self.condition.source.is_provider() {
            self.detect(headers, payload)?
        } else {
            DetectedEvent::custom()
        };

        for (filter, re) in &self.filters {
            let actual = select_string(payload, &filter.selector);
            if !actual.as_deref().is_some_and(|value| re.is_match(value)) {
                return Err(WebhookError::PayloadFilterMismatch {
                    selector: filter.selector.clone(),
                    expected: filter.expected.clone(),
                    actual,
                });
            }
        }

        let details = extract_details(&event, payload);

        if let Some((branch_regex, re)) = &self.branch
            && !details.branch.as_deref().is_some_and(|b| re.is_match(b))
        {
            return Err(WebhookError::BranchNotMatched {
                branch_regex: (*branch_regex).to_string(),
                branch: details.branch,
            });
        }

        debug!(
            source = %event.source,
            event = %event.event,
            branch = ?details.branch,
            "webhook accepted"
        );
        Ok(ValidatedWebhook { event, details })
    }

    fn detect(
        &self,
        headers: &WebhookHeaders,
        payload: &Value,
    ) -> Result<DetectedEvent, WebhookError> {
        let expected = self.condition.source;
        let event = detect_event(headers, payload).ok_or(WebhookError::ProviderMismatch {
            expected,
            actual: None,
        })?;
        if event.source != expected {
            return Err(WebhookError::ProviderMismatch {
                expected,
                actual: Some(event.source),
            });
        }
        if !self.accepts(&event) {
            return Err(WebhookError::EventNotAccepted {
                event: event.event.clone(),
                action: event.action.clone(),
            });
        }
        Ok(event)
    }

    /// Fills the placeholders of `args` from the payload.
    ///
    /// # Errors
    ///
    /// Returns `UnresolvedPlaceholders` naming every variable or binding the
    /// payload could not supply.
    pub fn resolve_args(
        &self,
        args: &TriggerArgs,
        payload: &Value,
    ) -> Result<ResolvedArgs, WebhookError> {
        args.resolve(Some(payload)).map_err(|e| match e {
            TriggerError::UnresolvedPlaceholders { variables } => {
                WebhookError::UnresolvedPlaceholders { variables }
            }
            TriggerError::InvalidTriggerCondition { tag } => {
                WebhookError::UnresolvedPlaceholders {
                    variables: vec![tag],
                }
            }
        })
    }

    fn accepts(&self, event: &DetectedEvent) -> bool {
        let condition = self.condition;
        let type_accepted = condition.event_types.is_empty()
            || condition.event_types.iter().any(|t| {
                *t == WebhookEventType::Any || *t == event.event_type
            });
        if !type_accepted {
            return false;
        }

        if event.source == WebhookSource::Bitbucket {
            return condition.bitbucket_events.is_empty()
                || event.bitbucket.is_some_and(|actual| {
                    condition
                        .bitbucket_events
                        .iter()
                        .any(|configured| configured.accepts(actual))
                });
        }

        match event.event_type {
            WebhookEventType::PullRequest if !condition.actions.is_empty() => event
                .action
                .as_deref()
                .and_then(PullRequestAction::from_provider)
                .is_some_and(|action| condition.actions.contains(&action)),
            WebhookEventType::Release if !condition.release_actions.is_empty() => event
                .action
                .as_deref()
                .and_then(ReleaseAction::from_provider)
                .is_some_and(|action| condition.release_actions.contains(&action)),
            _ => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tripwire_trigger::{BitbucketEvent, TriggerVariable};

    fn github_push_condition() -> WebhookCondition {
        let mut condition =
            WebhookCondition::new(WebhookSource::GitHub, vec![WebhookEventType::Push]);
        condition.payload_filters = vec![PayloadFilter::new("ref", "refs/heads/main")];
        condition
    }

    fn github(event: &str) -> WebhookHeaders {
        WebhookHeaders::new().with("X-GitHub-Event", event)
    }

    #[test]
    fn matching_push_is_accepted() {
        let condition = github_push_condition();
        let validated = WebhookValidator::new(&condition)
            .unwrap()
            .validate(&github("push"), &json!({"ref": "refs/heads/main"}))
            .expect("accepted");
        assert_eq!(validated.details.branch.as_deref(), Some("main"));
    }

    #[test]
    fn other_branch_fails_payload_filter() {
        let condition = github_push_condition();
        let err = WebhookValidator::new(&condition)
            .unwrap()
            .validate(&github("push"), &json!({"ref": "refs/heads/dev"}))
            .unwrap_err();
        assert_eq!(
            err,
            WebhookError::PayloadFilterMismatch {
                selector: "ref".to_string(),
                expected: "refs/heads/main".to_string(),
                actual: Some("refs/heads/dev".to_string()),
            }
        );
    }

    #[test]
    fn missing_filter_value_fails() {
        let condition = github_push_condition();
        let err = WebhookValidator::new(&condition)
            .unwrap()
            .validate(&github("push"), &json!({}))
            .unwrap_err();
        assert!(matches!(
            err,
            WebhookError::PayloadFilterMismatch { actual: None, .. }
        ));
    }

    #[test]
    fn filter_values_are_patterns() {
        let mut condition = github_push_condition();
        condition.payload_filters = vec![PayloadFilter::new("ref", "refs/heads/release-.*")];
        let validator = WebhookValidator::new(&condition).unwrap();
        assert!(
            validator
                .validate(&github("push"), &json!({"ref": "refs/heads/release-2"}))
                .is_ok()
        );
        assert!(
            validator
                .validate(&github("push"), &json!({"ref": "x/refs/heads/release-2"}))
                .is_err()
        );
    }

    #[test]
    fn wrong_provider_is_rejected() {
        let condition = github_push_condition();
        let headers = WebhookHeaders::new().with("X-Gitlab-Event", "Push Hook");
        let err = WebhookValidator::new(&condition)
            .unwrap()
            .validate(&headers, &json!({"ref": "refs/heads/main"}))
            .unwrap_err();
        assert_eq!(
            err,
            WebhookError::ProviderMismatch {
                expected: WebhookSource::GitHub,
                actual: Some(WebhookSource::GitLab),
            }
        );
    }

    #[test]
    fn missing_provider_is_rejected() {
        let condition = github_push_condition();
        let err = WebhookValidator::new(&condition)
            .unwrap()
            .validate(&WebhookHeaders::new(), &json!({"ref": "refs/heads/main"}))
            .unwrap_err();
        assert!(matches!(
            err,
            WebhookError::ProviderMismatch { actual: None, .. }
        ));
    }

    #[test]
    fn unlisted_event_is_rejected() {
        let condition = github_push_condition();
        let err = WebhookValidator::new(&condition)
            .unwrap()
            .validate(
                &github("pull_request"),
                &json!({"action": "opened", "ref": "refs/heads/main"}),
            )
            .unwrap_err();
        assert!(matches!(err, WebhookError::EventNotAccepted { .. }));
    }

    #[test]
    fn any_wildcard_accepts_every_event() {
        let condition = WebhookCondition::new(WebhookSource::GitHub, vec![WebhookEventType::Any]);
        assert!(
            WebhookValidator::new(&condition)
                .unwrap()
                .validate(&github("issues"), &json!({"action": "opened"}))
                .is_ok()
        );
    }

    #[test]
    fn pull_request_actions_are_matched() {
        let mut condition =
            WebhookCondition::new(WebhookSource::GitHub, vec![WebhookEventType::PullRequest]);
        condition.actions = vec![PullRequestAction::Closed];
        let validator = WebhookValidator::new(&condition).unwrap();

        assert!(
            validator
                .validate(&github("pull_request"), &json!({"action": "closed"}))
                .is_ok()
        );
        let err = validator
            .validate(&github("pull_request"), &json!({"action": "opened"}))
            .unwrap_err();
        assert_eq!(
            err,
            WebhookError::EventNotAccepted {
                event: "pull_request".to_string(),
                action: Some("opened".to_string()),
            }
        );
    }

    #[test]
    fn release_actions_are_matched() {
        let mut condition =
            WebhookCondition::new(WebhookSource::GitHub, vec![WebhookEventType::Release]);
        condition.release_actions = vec![ReleaseAction::Published];
        let validator = WebhookValidator::new(&condition).unwrap();
        assert!(
            validator
                .validate(&github("release"), &json!({"action": "published"}))
                .is_ok()
        );
        assert!(
            validator
                .validate(&github("release"), &json!({"action": "deleted"}))
                .is_err()
        );
    }

    #[test]
    fn bitbucket_event_keys_are_matched() {
        let mut condition =
            WebhookCondition::new(WebhookSource::Bitbucket, vec![WebhookEventType::PullRequest]);
        condition.bitbucket_events = vec![BitbucketEvent::PullRequestMerged];
        let validator = WebhookValidator::new(&condition).unwrap();
        let headers = |key: &str| WebhookHeaders::new().with("X-Event-Key", key);

        assert!(
            validator
                .validate(&headers("pullrequest:fulfilled"), &json!({}))
                .is_ok()
        );
        assert!(
            validator
                .validate(&headers("pullrequest:created"), &json!({}))
                .is_err()
        );
    }

    #[test]
    fn branch_regex_must_match() {
        let mut condition =
            WebhookCondition::new(WebhookSource::GitHub, vec![WebhookEventType::Push]);
        condition.branch_regex = Some("release/.*".to_string());
        let validator = WebhookValidator::new(&condition).unwrap();

        assert!(
            validator
                .validate(&github("push"), &json!({"ref": "refs/heads/release/1.2"}))
                .is_ok()
        );
        let err = validator
            .validate(&github("push"), &json!({"ref": "refs/heads/main"}))
            .unwrap_err();
        assert_eq!(
            err,
            WebhookError::BranchNotMatched {
                branch_regex: "release/.*".to_string(),
                branch: Some("main".to_string()),
            }
        );
    }

    #[test]
    fn custom_webhook_accepts_any_sender() {
        let mut condition = WebhookCondition::new(WebhookSource::Custom, Vec::new());
        condition.payload_filters = vec![PayloadFilter::new("env", "prod|staging")];
        let validator = WebhookValidator::new(&condition).unwrap();

        let validated = validator
            .validate(&WebhookHeaders::new(), &json!({"env": "prod"}))
            .expect("accepted");
        assert_eq!(validated.event.source, WebhookSource::Custom);
        assert_eq!(validated.details.branch, None);

        // provider markers are ignored rather than matched
        assert!(
            validator
                .validate(&github("push"), &json!({"env": "staging"}))
                .is_ok()
        );
        let err = validator
            .validate(&WebhookHeaders::new(), &json!({"env": "dev"}))
            .unwrap_err();
        assert!(matches!(err, WebhookError::PayloadFilterMismatch { .. }));
    }

    #[test]
    fn stored_filter_that_does_not_compile_is_invalid_pattern() {
        let mut condition = github_push_condition();
        condition.payload_filters = vec![PayloadFilter::new("ref", "refs/heads/(")];

        let err = WebhookValidator::new(&condition).unwrap_err();
        assert!(matches!(
            err,
            WebhookError::InvalidPattern { ref pattern, .. } if pattern == "refs/heads/("
        ));
    }

    #[test]
    fn resolve_args_reports_missing_placeholders() {
        let condition = github_push_condition();
        let args = TriggerArgs {
            variables: vec![
                TriggerVariable::new("sha", "${after}"),
                TriggerVariable::new("tag", "${release.tag_name}"),
            ],
            ..TriggerArgs::default()
        };
        let validator = WebhookValidator::new(&condition).unwrap();

        let err = validator
            .resolve_args(&args, &json!({"after": "abc"}))
            .unwrap_err();
        assert_eq!(
            err,
            WebhookError::UnresolvedPlaceholders {
                variables: vec!["tag".to_string()],
            }
        );

        let resolved = validator
            .resolve_args(
                &args,
                &json!({"after": "abc", "release": {"tag_name": "v1"}}),
            )
            .expect("resolves");
        assert_eq!(resolved.variables["sha"], "abc");
    }
}
