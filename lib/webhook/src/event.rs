//! Provider and event detection, and branch/commit extraction.

use crate::headers::{BITBUCKET_EVENT, GITHUB_EVENT, GITLAB_EVENT, WebhookHeaders};
use serde_json::Value;
use tripwire_trigger::selector::select_string;
use tripwire_trigger::{BitbucketEvent, WebhookEventDetails, WebhookEventType, WebhookSource};

/// The provider and event an inbound webhook represents.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DetectedEvent {
    /// Provider, from its header marker.
    pub source: WebhookSource,
    /// Provider-independent category.
    pub event_type: WebhookEventType,
    /// Event name as sent by the provider.
    pub event: String,
    /// Sub-action from the payload, for pull requests and releases.
    pub action: Option<String>,
    /// Parsed Bitbucket event key.
    pub bitbucket: Option<BitbucketEvent>,
}

impl DetectedEvent {
    /// The event recorded for a custom webhook, which carries no provider
    /// markers.
    #[must_use]
    pub fn custom() -> Self {
        Self {
            source: WebhookSource::Custom,
            event_type: WebhookEventType::Other,
            event: WebhookSource::Custom.as_str().to_string(),
            action: None,
            bitbucket: None,
        }
    }
}

/// Detects the provider and event. Returns `None` if no provider marker
/// is present.
#[must_use]
pub fn detect_event(headers: &WebhookHeaders, payload: &Value) -> Option<DetectedEvent> {
    if let Some(event) = headers.get(GITHUB_EVENT) {
        let (event_type, action) = match event {
            "push" => (WebhookEventType::Push, None),
            "pull_request" => (WebhookEventType::PullRequest, select_string(payload, "action")),
            "release" => (WebhookEventType::Release, select_string(payload, "action")),
            "issues" | "issue_comment" => (WebhookEventType::Issue, select_string(payload, "action")),
            "delete" => (WebhookEventType::Delete, None),
            _ => (WebhookEventType::Other, None),
        };
        return Some(DetectedEvent {
            source: WebhookSource::GitHub,
            event_type,
            event: event.to_string(),
            action,
            bitbucket: None,
        });
    }

    if let Some(event) = headers.get(GITLAB_EVENT) {
        let (event_type, action) = match event {
            "Push Hook" | "Tag Push Hook" => (WebhookEventType::Push, None),
            "Merge Request Hook" => (
                WebhookEventType::PullRequest,
                select_string(payload, "object_attributes.action"),
            ),
            "Release Hook" => (WebhookEventType::Release, select_string(payload, "action")),
            "Issue Hook" => (
                WebhookEventType::Issue,
                select_string(payload, "object_attributes.action"),
            ),
            _ => (WebhookEventType::Other, None),
        };
        return Some(DetectedEvent {
            source: WebhookSource::GitLab,
            event_type,
            event: event.to_string(),
            action,
            bitbucket: None,
        });
    }

    let key = headers.get(BITBUCKET_EVENT)?;
    let bitbucket = BitbucketEvent::from_key(key);
    let event_type = match bitbucket {
        Some(BitbucketEvent::Push) => WebhookEventType::Push,
        Some(e) if e.is_pull_request() => WebhookEventType::PullRequest,
        _ => WebhookEventType::Other,
    };
    Some(DetectedEvent {
        source: WebhookSource::Bitbucket,
        event_type,
        event: key.to_string(),
        action: key.split_once(':').map(|(_, action)| action.to_string()),
        bitbucket,
    })
}

/// Extracts branch, commit and repository details from the payload.
#[must_use]
pub fn extract_details(event: &DetectedEvent, payload: &Value) -> WebhookEventDetails {
    let pick = |paths: &[&str]| paths.iter().find_map(|p| select_string(payload, p));

    let (branch, commit_id, previous_commit_id, repo_name) = match (event.source, event.event_type)
    {
        (WebhookSource::GitHub, WebhookEventType::PullRequest) => (
            pick(&["pull_request.head.ref"]),
            pick(&["pull_request.head.sha"]),
            None,
            pick(&["repository.full_name"]),
        ),
        (WebhookSource::GitHub, WebhookEventType::Release) => (
            pick(&["release.target_commitish"]),
            None,
            None,
            pick(&["repository.full_name"]),
        ),
        (WebhookSource::GitHub, _) => (
            pick(&["ref"]),
            pick(&["after", "head_commit.id"]),
            pick(&["before"]),
            pick(&["repository.full_name"]),
        ),
        (WebhookSource::GitLab, WebhookEventType::PullRequest) => (
            pick(&["object_attributes.source_branch"]),
            pick(&["object_attributes.last_commit.id"]),
            None,
            pick(&["project.path_with_namespace"]),
        ),
        (WebhookSource::GitLab, _) => (
            pick(&["ref"]),
            pick(&["checkout_sha", "after"]),
            pick(&["before"]),
            pick(&["project.path_with_namespace"]),
        ),
        (WebhookSource::Bitbucket, WebhookEventType::PullRequest) => (
            pick(&["pullrequest.source.branch.name"]),
            pick(&["pullrequest.source.commit.hash"]),
            None,
            pick(&["repository.full_name"]),
        ),
        (WebhookSource::Bitbucket, _) => (
            pick(&["push.changes[0].new.name"]),
            pick(&["push.changes[0].new.target.hash"]),
            pick(&["push.changes[0].old.target.hash"]),
            pick(&["repository.full_name"]),
        ),
        (WebhookSource::Custom, _) => (None, None, None, None),
    };

    WebhookEventDetails {
        event: Some(event.event.clone()),
        action: event.action.clone(),
        branch: branch.map(|b| strip_ref(&b).to_string()),
        commit_id,
        previous_commit_id,
        repo_name,
        git_connector_id: None,
        file_paths: Vec::new(),
    }
}

fn strip_ref(reference: &str) -> &str {
    reference
        .strip_prefix("refs/heads/")
        .or_else(|| reference.strip_prefix("refs/tags/"))
        .unwrap_or(reference)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn github_push() {
        let headers = WebhookHeaders::new().with("X-GitHub-Event", "push");
        let payload = json!({
            "ref": "refs/heads/main",
            "before": "aaa",
            "after": "bbb",
            "repository": {"full_name": "acme/api"}
        });

        let event = detect_event(&headers, &payload).expect("detected");
        assert_eq!(event.source, WebhookSource::GitHub);
        assert_eq!(event.event_type, WebhookEventType::Push);

        let details = extract_details(&event, &payload);
        assert_eq!(details.branch.as_deref(), Some("main"));
        assert_eq!(details.commit_id.as_deref(), Some("bbb"));
        assert_eq!(details.previous_commit_id.as_deref(), Some("aaa"));
        assert_eq!(details.repo_name.as_deref(), Some("acme/api"));
    }

    #[test]
    fn github_pull_request_action() {
        let headers = WebhookHeaders::new().with("X-GitHub-Event", "pull_request");
        let payload = json!({
            "action": "closed",
            "pull_request": {"head": {"ref": "feature/x", "sha": "ccc"}}
        });

        let event = detect_event(&headers, &payload).expect("detected");
        assert_eq!(event.event_type, WebhookEventType::PullRequest);
        assert_eq!(event.action.as_deref(), Some("closed"));
        let details = extract_details(&event, &payload);
        assert_eq!(details.branch.as_deref(), Some("feature/x"));
        assert_eq!(details.commit_id.as_deref(), Some("ccc"));
    }

    #[test]
    fn gitlab_merge_request() {
        let headers = WebhookHeaders::new().with("X-Gitlab-Event", "Merge Request Hook");
        let payload = json!({
            "object_attributes": {
                "action": "merge",
                "source_branch": "fix",
                "last_commit": {"id": "ddd"}
            },
            "project": {"path_with_namespace": "acme/web"}
        });

        let event = detect_event(&headers, &payload).expect("detected");
        assert_eq!(event.source, WebhookSource::GitLab);
        assert_eq!(event.action.as_deref(), Some("merge"));
        let details = extract_details(&event, &payload);
        assert_eq!(details.branch.as_deref(), Some("fix"));
        assert_eq!(details.repo_name.as_deref(), Some("acme/web"));
    }

    #[test]
    fn bitbucket_push() {
        let headers = WebhookHeaders::new().with("X-Event-Key", "repo:push");
        let payload = json!({
            "push": {"changes": [{
                "new": {"name": "develop", "target": {"hash": "eee"}},
                "old": {"name": "develop", "target": {"hash": "ddd"}}
            }]},
            "repository": {"full_name": "acme/infra"}
        });

        let event = detect_event(&headers, &payload).expect("detected");
        assert_eq!(event.source, WebhookSource::Bitbucket);
        assert_eq!(event.bitbucket, Some(BitbucketEvent::Push));
        assert_eq!(event.action.as_deref(), Some("push"));
        let details = extract_details(&event, &payload);
        assert_eq!(details.branch.as_deref(), Some("develop"));
        assert_eq!(details.previous_commit_id.as_deref(), Some("ddd"));
    }

    #[test]
    fn bitbucket_pull_request() {
        let headers = WebhookHeaders::new().with("X-Event-Key", "pullrequest:approved");
        let event = detect_event(&headers, &json!({})).expect("detected");
        assert_eq!(event.event_type, WebhookEventType::PullRequest);
        assert_eq!(event.bitbucket, Some(BitbucketEvent::PullRequestApproved));
    }

    #[test]
    fn custom_event_has_no_git_details() {
        let payload = json!({"ref": "refs/heads/main", "after": "fff"});
        let details = extract_details(&DetectedEvent::custom(), &payload);
        assert_eq!(details.event.as_deref(), Some("custom"));
        assert_eq!(details.branch, None);
        assert_eq!(details.commit_id, None);
    }

    #[test]
    fn unknown_provider() {
        let headers = WebhookHeaders::new().with("X-Custom-Event", "push");
        assert_eq!(detect_event(&headers, &json!({})), None);
    }
}
