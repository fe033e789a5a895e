//! Error types for the trigger engine.
//!
//! - `ValidationError`: a trigger is rejected at save or update time
//! - `StoreError`: trigger or execution storage failed
//! - `ExecutionEngineError`: the execution engine refused or could not be reached
//! - `ContentCheckError`: the content-change checker could not be reached
//! - `PoolError`: work was submitted to a closed worker pool
//! - `TriggerServiceError`: everything the orchestrator surfaces, wrapped in
//!   a `rootcause::Report` by public operations

use std::fmt;
use tripwire_core::{PipelineId, TriggerExecutionId, TriggerId, WorkflowId};
use tripwire_resolver::{CatalogError, ResolveError};
use tripwire_scheduler::{LedgerError, ScheduleError};
use tripwire_trigger::{ActionKind, TriggerConditionType, TriggerError, WebhookSource};
use tripwire_webhook::WebhookError;

/// Configuration errors. The trigger is never persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// The trigger has no name.
    NameRequired,
    /// Another trigger of the application has the same name.
    DuplicateTriggerName { name: String },
    /// An update changed the action between pipeline and workflow.
    ActionTypeChanged { from: ActionKind, to: ActionKind },
    PipelineNotFound { pipeline_id: PipelineId },
    WorkflowNotFound { workflow_id: WorkflowId },
    ArtifactStreamNotFound { reference: String },
    /// The artifact stream is not attached to a service.
    ArtifactStreamNotBound { artifact_stream: String },
    ServiceNotFound { service: String },
    /// A pipeline-completion trigger would start the pipeline it watches.
    SelfReferencingPipeline { pipeline_id: PipelineId },
    /// Cron expression problems.
    Schedule(ScheduleError),
    InvalidArtifactFilter { pattern: String, reason: String },
    /// A payload filter or branch expression does not compile.
    InvalidPattern { pattern: String, reason: String },
    /// Artifact server and stream must both be placeholders or both literals.
    InconsistentPlaceholders { variable: String },
    /// Bitbucket triggers cannot filter on pull request or release actions.
    ActionsNotSupported { source: WebhookSource },
    /// Custom webhooks have no provider events or branches to filter on.
    ProviderFiltersNotSupported,
    InvalidContentCheck { reason: String },
    /// Content check settings cannot change once set.
    ContentCheckImmutable,
    /// An entity variable holds a placeholder outside a webhook trigger.
    EntityPlaceholderNotAllowed { variable: String },
    MandatoryVariablesMissing { variables: Vec<String> },
    /// The artifact selection policy cannot be used with the condition.
    SelectionNotAllowed {
        variable: String,
        policy: &'static str,
        condition: TriggerConditionType,
    },
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NameRequired => write!(f, "trigger name is required"),
            Self::DuplicateTriggerName { name } => {
                write!(f, "a trigger named '{name}' already exists")
            }
            Self::ActionTypeChanged { from, to } => {
                write!(f, "action type cannot change from {from} to {to}")
            }
            Self::PipelineNotFound { pipeline_id } => write!(f, "pipeline not found: {pipeline_id}"),
            Self::WorkflowNotFound { workflow_id } => write!(f, "workflow not found: {workflow_id}"),
            Self::ArtifactStreamNotFound { reference } => {
                write!(f, "artifact stream not found: {reference}")
            }
            Self::ArtifactStreamNotBound { artifact_stream } => {
                write!(f, "artifact stream '{artifact_stream}' is not attached to a service")
            }
            Self::ServiceNotFound { service } => write!(f, "service not found: {service}"),
            Self::SelfReferencingPipeline { pipeline_id } => {
                write!(f, "pipeline {pipeline_id} cannot trigger itself")
            }
            Self::Schedule(e) => e.fmt(f),
            Self::InvalidArtifactFilter { pattern, reason } => {
                write!(f, "invalid artifact filter '{pattern}': {reason}")
            }
            Self::InvalidPattern { pattern, reason } => {
                write!(f, "invalid pattern '{pattern}': {reason}")
            }
            Self::InconsistentPlaceholders { variable } => write!(
                f,
                "artifact variable '{variable}': artifact server and stream must both be placeholders or both be literals"
            ),
            Self::ActionsNotSupported { source } => {
                write!(f, "{source} webhooks do not support action filters")
            }
            Self::ProviderFiltersNotSupported => {
                write!(f, "custom webhooks cannot filter on provider events or branches")
            }
            Self::InvalidContentCheck { reason } => write!(f, "invalid content check: {reason}"),
            Self::ContentCheckImmutable => write!(f, "content check settings cannot be changed"),
            Self::EntityPlaceholderNotAllowed { variable } => {
                write!(f, "variable '{variable}' cannot be a placeholder for this trigger")
            }
            Self::MandatoryVariablesMissing { variables } => {
                write!(f, "mandatory variables missing: {}", variables.join(", "))
            }
            Self::SelectionNotAllowed {
                variable,
                policy,
                condition,
            } => write!(
                f,
                "artifact variable '{variable}': {policy} cannot be used with {condition} triggers"
            ),
        }
    }
}

impl std::error::Error for ValidationError {}

impl From<ScheduleError> for ValidationError {
    fn from(e: ScheduleError) -> Self {
        Self::Schedule(e)
    }
}

/// Storage errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// The store could not be reached or the query failed.
    Unavailable { message: String },
    /// A uniqueness constraint was violated.
    Conflict { message: String },
    /// A stored document could not be decoded.
    Decode { message: String },
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unavailable { message } => write!(f, "store unavailable: {message}"),
            Self::Conflict { message } => write!(f, "store conflict: {message}"),
            Self::Decode { message } => write!(f, "stored document is invalid: {message}"),
        }
    }
}

impl std::error::Error for StoreError {}

/// Errors from the external execution engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutionEngineError {
    /// The engine refused the request.
    Rejected { message: String },
    /// The engine could not be reached.
    Unavailable { message: String },
}

impl fmt::Display for ExecutionEngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Rejected { message } => write!(f, "execution rejected: {message}"),
            Self::Unavailable { message } => write!(f, "execution engine unavailable: {message}"),
        }
    }
}

impl std::error::Error for ExecutionEngineError {}

/// Errors from the content-change checker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContentCheckError {
    Unavailable { message: String },
    /// The checker ran and reported an error.
    Failed { message: String },
}

impl fmt::Display for ContentCheckError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unavailable { message } => write!(f, "content checker unavailable: {message}"),
            Self::Failed { message } => write!(f, "content check failed: {message}"),
        }
    }
}

impl std::error::Error for ContentCheckError {}

/// Worker pool errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolError {
    /// The pool was shut down.
    PoolClosed,
}

impl fmt::Display for PoolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PoolClosed => write!(f, "worker pool is closed"),
        }
    }
}

impl std::error::Error for PoolError {}

/// Errors surfaced by the trigger service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TriggerServiceError {
    TriggerNotFound { trigger_id: TriggerId },
    /// No trigger of the application has the webhook token.
    WebhookTokenNotFound,
    TriggerExecutionNotFound { id: TriggerExecutionId },
    /// A content-check result arrived for a finished execution.
    TriggerExecutionNotRunning { id: TriggerExecutionId },
    Validation(ValidationError),
    Trigger(TriggerError),
    Resolution(ResolveError),
    Webhook(WebhookError),
    Submission(ExecutionEngineError),
    ContentCheck(ContentCheckError),
    Store(StoreError),
    Ledger(LedgerError),
    Pool(PoolError),
}

impl TriggerServiceError {
    /// True for configuration, resolution and payload errors, which abort
    /// one firing; false for infrastructure errors.
    #[must_use]
    pub const fn is_firing_error(&self) -> bool {
        match self {
            Self::Resolution(ResolveError::Catalog(_)) => false,
            Self::Validation(_) | Self::Trigger(_) | Self::Resolution(_) | Self::Webhook(_) => true,
            _ => false,
        }
    }
}

impl fmt::Display for TriggerServiceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TriggerNotFound { trigger_id } => write!(f, "trigger not found: {trigger_id}"),
            Self::WebhookTokenNotFound => write!(f, "no trigger has this webhook token"),
            Self::TriggerExecutionNotFound { id } => {
                write!(f, "trigger execution not found: {id}")
            }
            Self::TriggerExecutionNotRunning { id } => {
                write!(f, "trigger execution {id} is not running")
            }
            Self::Validation(e) => e.fmt(f),
            Self::Trigger(e) => e.fmt(f),
            Self::Resolution(e) => e.fmt(f),
            Self::Webhook(e) => e.fmt(f),
            Self::Submission(e) => e.fmt(f),
            Self::ContentCheck(e) => e.fmt(f),
            Self::Store(e) => e.fmt(f),
            Self::Ledger(e) => e.fmt(f),
            Self::Pool(e) => e.fmt(f),
        }
    }
}

impl std::error::Error for TriggerServiceError {}

macro_rules! lift {
    ($($source:ty => $variant:ident),* $(,)?) => {
        $(
            impl From<$source> for TriggerServiceError {
                fn from(e: $source) -> Self {
                    Self::$variant(e)
                }
            }
        )*
    };
}

lift! {
    ValidationError => Validation,
    TriggerError => Trigger,
    ResolveError => Resolution,
    WebhookError => Webhook,
    ExecutionEngineError => Submission,
    ContentCheckError => ContentCheck,
    StoreError => Store,
    LedgerError => Ledger,
    PoolError => Pool,
}

impl From<CatalogError> for TriggerServiceError {
    fn from(e: CatalogError) -> Self {
        Self::Resolution(ResolveError::Catalog(e))
    }
}

impl From<ScheduleError> for TriggerServiceError {
    fn from(e: ScheduleError) -> Self {
        Self::Validation(ValidationError::Schedule(e))
    }
}
