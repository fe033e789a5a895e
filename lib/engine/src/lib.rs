//! Trigger orchestration for tripwire.
//!
//! [`TriggerService`] is the entry point. It validates triggers on save and
//! update by delegating to the [`processor::ConditionProcessor`] that owns
//! the trigger's condition type, and reacts to upstream events:
//!
//! - artifacts collected on a stream
//! - a pipeline completing
//! - a scheduled tick coming due
//! - a webhook arriving
//!
//! Each matching trigger becomes a [`FireRequest`], which the
//! [`DeploymentExecutionResolver`] turns into an execution request and
//! submits to the [`ExecutionEngine`]. Every attempt is recorded as a
//! `TriggerExecution`.
//!
//! Event handling runs on an explicitly constructed [`WorkerPool`] so
//! shutdown can wait for in-flight firings.

pub mod collaborator;
pub mod config;
pub mod deployment;
pub mod error;
pub mod fire;
pub mod memory;
pub mod pool;
pub mod processor;
pub mod service;
pub mod store;
mod target;

pub use collaborator::{ContentChangeChecker, ContentCheckResult, ExecutionEngine};
pub use config::{ArtifactMatchPolicy, EngineConfig};
pub use deployment::{DeploymentCollaborators, DeploymentExecutionResolver};
pub use error::{
    ContentCheckError, ExecutionEngineError, PoolError, StoreError, TriggerServiceError,
    ValidationError,
};
pub use fire::{FireOutcome, FireReport, FireRequest, TriggerEvent};
pub use pool::WorkerPool;
pub use service::{Collaborators, TriggerService};
pub use store::{StoreDueSource, TriggerExecutionStore, TriggerStore};
