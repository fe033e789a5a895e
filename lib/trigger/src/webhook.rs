//! Webhook condition types.

use serde::{Deserialize, Serialize};
use std::fmt;
use tripwire_core::ConnectorId;

/// Senders that can deliver webhooks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WebhookSource {
    /// GitHub (`X-GitHub-Event`).
    #[serde(rename = "github")]
    GitHub,
    /// GitLab (`X-Gitlab-Event`).
    #[serde(rename = "gitlab")]
    GitLab,
    /// Bitbucket (`X-Event-Key`).
    Bitbucket,
    /// Any sender. No provider or event detection, every payload is a
    /// candidate.
    Custom,
}

impl WebhookSource {
    /// Returns the string representation.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::GitHub => "github",
            Self::GitLab => "gitlab",
            Self::Bitbucket => "bitbucket",
            Self::Custom => "custom",
        }
    }

    /// Returns true for source-control providers identified by headers.
    #[must_use]
    pub const fn is_provider(&self) -> bool {
        !matches!(self, Self::Custom)
    }
}

impl fmt::Display for WebhookSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Provider-independent webhook event categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WebhookEventType {
    /// Commits pushed to a branch or tag.
    Push,
    /// Pull/merge request activity.
    PullRequest,
    /// Release activity.
    Release,
    /// Issue activity.
    Issue,
    /// Branch or tag deletion.
    Delete,
    /// Any other repository event.
    Other,
    /// Wildcard accepting every event.
    Any,
}

impl WebhookEventType {
    /// Returns the string representation.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Push => "push",
            Self::PullRequest => "pull_request",
            Self::Release => "release",
            Self::Issue => "issue",
            Self::Delete => "delete",
            Self::Other => "other",
            Self::Any => "any",
        }
    }
}

impl fmt::Display for WebhookEventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Pull/merge request sub-actions (GitHub `action`, GitLab
/// `object_attributes.action`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PullRequestAction {
    Opened,
    Closed,
    Reopened,
    Edited,
    Synchronized,
    Assigned,
    Unassigned,
    Labeled,
    Unlabeled,
    ReviewRequested,
    ReadyForReview,
    Merged,
}

impl PullRequestAction {
    /// Parses a provider action string.
    #[must_use]
    pub fn from_provider(action: &str) -> Option<Self> {
        match action {
            "opened" | "open" => Some(Self::Opened),
            "closed" | "close" => Some(Self::Closed),
            "reopened" | "reopen" => Some(Self::Reopened),
            "edited" => Some(Self::Edited),
            "synchronize" | "update" => Some(Self::Synchronized),
            "assigned" => Some(Self::Assigned),
            "unassigned" => Some(Self::Unassigned),
            "labeled" => Some(Self::Labeled),
            "unlabeled" => Some(Self::Unlabeled),
            "review_requested" => Some(Self::ReviewRequested),
            "ready_for_review" => Some(Self::ReadyForReview),
            "merge" | "merged" => Some(Self::Merged),
            _ => None,
        }
    }
}

/// GitHub release sub-actions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReleaseAction {
    Published,
    Unpublished,
    Created,
    Edited,
    Deleted,
    Prereleased,
    Released,
}

impl ReleaseAction {
    /// Parses a provider action string.
    #[must_use]
    pub fn from_provider(action: &str) -> Option<Self> {
        match action {
            "published" => Some(Self::Published),
            "unpublished" => Some(Self::Unpublished),
            "created" => Some(Self::Created),
            "edited" => Some(Self::Edited),
            "deleted" => Some(Self::Deleted),
            "prereleased" => Some(Self::Prereleased),
            "released" => Some(Self::Released),
            _ => None,
        }
    }
}

/// Bitbucket event keys, including wildcards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BitbucketEvent {
    Push,
    Fork,
    Updated,
    CommitCommentCreated,
    PullRequestCreated,
    PullRequestUpdated,
    PullRequestApproved,
    PullRequestUnapproved,
    PullRequestMerged,
    PullRequestDeclined,
    PullRequestCommentCreated,
    PullRequestCommentUpdated,
    PullRequestCommentDeleted,
    /// Any `pullrequest:*` key.
    AnyPullRequest,
    /// Any `repo:*` key.
    AnyRepository,
    /// Every key.
    Any,
}

impl BitbucketEvent {
    /// Parses an `X-Event-Key` header value.
    #[must_use]
    pub fn from_key(key: &str) -> Option<Self> {
        match key {
            "repo:push" => Some(Self::Push),
            "repo:fork" => Some(Self::Fork),
            "repo:updated" => Some(Self::Updated),
            "repo:commit_comment_created" => Some(Self::CommitCommentCreated),
            "pullrequest:created" => Some(Self::PullRequestCreated),
            "pullrequest:updated" => Some(Self::PullRequestUpdated),
            "pullrequest:approved" => Some(Self::PullRequestApproved),
            "pullrequest:unapproved" => Some(Self::PullRequestUnapproved),
            "pullrequest:fulfilled" => Some(Self::PullRequestMerged),
            "pullrequest:rejected" => Some(Self::PullRequestDeclined),
            "pullrequest:comment_created" => Some(Self::PullRequestCommentCreated),
            "pullrequest:comment_updated" => Some(Self::PullRequestCommentUpdated),
            "pullrequest:comment_deleted" => Some(Self::PullRequestCommentDeleted),
            _ => None,
        }
    }

    /// Returns true if this (possibly wildcard) configured event accepts
    /// the concrete `event`.
    #[must_use]
    pub fn accepts(&self, event: Self) -> bool {
        match self {
            Self::Any => true,
            Self::AnyPullRequest => event.is_pull_request(),
            Self::AnyRepository => !event.is_pull_request(),
            configured => *configured == event,
        }
    }

    /// Returns true for `pullrequest:*` keys.
    #[must_use]
    pub const fn is_pull_request(&self) -> bool {
        matches!(
            self,
            Self::PullRequestCreated
                | Self::PullRequestUpdated
                | Self::PullRequestApproved
                | Self::PullRequestUnapproved
                | Self::PullRequestMerged
                | Self::PullRequestDeclined
                | Self::PullRequestCommentCreated
                | Self::PullRequestCommentUpdated
                | Self::PullRequestCommentDeleted
                | Self::AnyPullRequest
        )
    }
}

/// A custom expression evaluated against the webhook payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PayloadFilter {
    /// Path-like selector into the payload.
    pub selector: String,
    /// Regular expression the selected value must fully match.
    pub expected: String,
}

impl PayloadFilter {
    /// Creates a payload filter.
    #[must_use]
    pub fn new(selector: impl Into<String>, expected: impl Into<String>) -> Self {
        Self {
            selector: selector.into(),
            expected: expected.into(),
        }
    }
}

/// Gate a push trigger on a change to tracked files.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentCheck {
    /// Connector used to read the repository.
    pub git_connector_id: ConnectorId,
    /// Branch whose files are compared.
    pub branch: String,
    /// Repository name, for connectors scoped to an organization.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repo_name: Option<String>,
    /// Files whose content is tracked.
    pub file_paths: Vec<String>,
}

/// Token and invocation details handed to webhook senders.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WebhookToken {
    /// The secret token embedded in the webhook URL.
    pub token: String,
    /// HTTP method the sender should use.
    pub http_method: String,
    /// Sample JSON body listing the values the trigger reads.
    pub payload_sample: serde_json::Value,
}

/// Fires on an inbound webhook, from a source-control provider or a
/// custom sender.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WebhookCondition {
    /// Provider the webhook must come from.
    pub source: WebhookSource,
    /// Token details, generated on first save.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<WebhookToken>,
    /// Accepted events; empty accepts every event.
    #[serde(default)]
    pub event_types: Vec<WebhookEventType>,
    /// Accepted pull request actions; empty accepts every action.
    #[serde(default)]
    pub actions: Vec<PullRequestAction>,
    /// Accepted release actions; empty accepts every action.
    #[serde(default)]
    pub release_actions: Vec<ReleaseAction>,
    /// Accepted Bitbucket event keys; empty accepts every key.
    #[serde(default)]
    pub bitbucket_events: Vec<BitbucketEvent>,
    /// Custom payload expressions that must all match.
    #[serde(default)]
    pub payload_filters: Vec<PayloadFilter>,
    /// Regular expression the pushed branch must match.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branch_regex: Option<String>,
    /// Fire only when tracked files changed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_check: Option<ContentCheck>,
}

impl WebhookCondition {
    /// Creates a condition for `source` accepting `event_types`.
    #[must_use]
    pub fn new(source: WebhookSource, event_types: Vec<WebhookEventType>) -> Self {
        Self {
            source,
            token: None,
            event_types,
            actions: Vec::new(),
            release_actions: Vec::new(),
            bitbucket_events: Vec::new(),
            payload_filters: Vec::new(),
            branch_regex: None,
            content_check: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bitbucket_keys_parse() {
        assert_eq!(
            BitbucketEvent::from_key("pullrequest:fulfilled"),
            Some(BitbucketEvent::PullRequestMerged)
        );
        assert_eq!(BitbucketEvent::from_key("issue:created"), None);
    }

    #[test]
    fn bitbucket_wildcards() {
        assert!(BitbucketEvent::Any.accepts(BitbucketEvent::Push));
        assert!(BitbucketEvent::AnyPullRequest.accepts(BitbucketEvent::PullRequestApproved));
        assert!(!BitbucketEvent::AnyPullRequest.accepts(BitbucketEvent::Push));
        assert!(BitbucketEvent::AnyRepository.accepts(BitbucketEvent::Fork));
        assert!(!BitbucketEvent::PullRequestCreated.accepts(BitbucketEvent::PullRequestUpdated));
    }

    #[test]
    fn provider_actions_parse() {
        assert_eq!(
            PullRequestAction::from_provider("synchronize"),
            Some(PullRequestAction::Synchronized)
        );
        assert_eq!(
            PullRequestAction::from_provider("merge"),
            Some(PullRequestAction::Merged)
        );
        assert_eq!(
            ReleaseAction::from_provider("published"),
            Some(ReleaseAction::Published)
        );
    }

    #[test]
    fn source_serde_names() {
        let json = serde_json::to_string(&WebhookSource::GitHub).expect("serialize");
        assert_eq!(json, "\"github\"");
        let custom: WebhookSource = serde_json::from_str("\"custom\"").expect("deserialize");
        assert_eq!(custom, WebhookSource::Custom);
        assert!(!custom.is_provider());
    }
}
