//! Trigger model for the tripwire trigger engine.
//!
//! A trigger is a stored rule that binds a [`TriggerCondition`] (what has to
//! happen) to a [`TriggerAction`] (which pipeline or workflow to run). This
//! crate holds the data types only: validation, resolution and dispatch live
//! in the resolver, webhook, scheduler and engine crates.
//!
//! Values that are deferred to fire time are modelled as
//! [`TemplateValue::Placeholder`]; [`TriggerArgs::resolve`] walks the
//! argument bundle once and produces a fully literal [`ResolvedArgs`].

pub mod action;
pub mod artifact;
pub mod condition;
pub mod error;
pub mod execution;
pub mod selector;
pub mod template;
pub mod trigger;
pub mod webhook;

pub use action::{ActionKind, DeploymentTarget, TriggerAction, TriggerArgs, TriggerVariable};
pub use artifact::{
    ArtifactFilterSpec, ArtifactSelection, ScopeEntityType, TriggerArtifactVariable, VariableScope,
};
pub use condition::{
    ArtifactCondition, PipelineCompletionCondition, ScheduledCondition, TriggerCondition,
    TriggerConditionType,
};
pub use error::TriggerError;
pub use execution::{
    ExecutionHandle, ExecutionRequest, ResolvedArtifact, TriggerExecution,
    TriggerExecutionStatus, TriggeredBy, WebhookEventDetails,
};
pub use template::{
    EntityRef, PlaceholderSource, ResolvedArgs, ResolvedArtifactVariable, ResolvedSelection,
    Template, TemplateValue,
};
pub use trigger::Trigger;
pub use webhook::{
    BitbucketEvent, ContentCheck, PayloadFilter, PullRequestAction, ReleaseAction,
    WebhookCondition, WebhookEventType, WebhookSource, WebhookToken,
};
