//! Core domain types and utilities for the tripwire trigger engine.
//!
//! This crate provides the identifiers and error-handling foundation shared
//! by every other tripwire crate.

pub mod error;
pub mod id;

pub use error::Result;
pub use id::{
    AccountId, AppId, ArtifactId, ArtifactServerId, ArtifactStreamId, ConnectorId,
    EnvironmentId, ExecutionId, InfraDefinitionId, InfraMappingId, ParseIdError, PipelineId,
    ServiceId, TriggerExecutionId, TriggerId, WorkflowId,
};
