//! In-process stores and collaborators.
//!
//! Used by tests and by local runs without a database or execution engine.

use crate::collaborator::{ContentChangeChecker, ExecutionEngine};
use crate::error::{ContentCheckError, ExecutionEngineError, StoreError};
use crate::store::{TriggerExecutionStore, TriggerStore};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Mutex, PoisonError, RwLock};
use tripwire_core::{
    AppId, ArtifactStreamId, EnvironmentId, ExecutionId, PipelineId, TriggerExecutionId,
    TriggerId,
};
use tripwire_trigger::{
    ContentCheck, ExecutionHandle, ExecutionRequest, Trigger, TriggerCondition, TriggerExecution,
    TriggerExecutionStatus,
};

/// Trigger store backed by a map.
#[derive(Default)]
pub struct InMemoryTriggerStore {
    triggers: RwLock<HashMap<TriggerId, Trigger>>,
}

impl InMemoryTriggerStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn filtered(&self, keep: impl Fn(&Trigger) -> bool) -> Vec<Trigger> {
        let mut found: Vec<Trigger> = self
            .triggers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .filter(|t| keep(t))
            .cloned()
            .collect();
        found.sort_by_key(|t| t.created_at);
        found
    }
}

#[async_trait]
impl TriggerStore for InMemoryTriggerStore {
    async fn insert(&self, trigger: &Trigger) -> Result<(), StoreError> {
        let mut triggers = self.triggers.write().unwrap_or_else(PoisonError::into_inner);
        let clash = triggers
            .values()
            .any(|t| t.app_id == trigger.app_id && t.name == trigger.name);
        if clash || triggers.contains_key(&trigger.id) {
            return Err(StoreError::Conflict {
                message: format!("trigger '{}' already exists", trigger.name),
            });
        }
        triggers.insert(trigger.id, trigger.clone());
        Ok(())
    }

    async fn replace(&self, trigger: &Trigger) -> Result<(), StoreError> {
        let mut triggers = self.triggers.write().unwrap_or_else(PoisonError::into_inner);
        match triggers.get_mut(&trigger.id) {
            Some(stored) => {
                *stored = trigger.clone();
                Ok(())
            }
            None => Err(StoreError::Conflict {
                message: format!("trigger {} does not exist", trigger.id),
            }),
        }
    }

    async fn delete(&self, app_id: AppId, id: TriggerId) -> Result<bool, StoreError> {
        let mut triggers = self.triggers.write().unwrap_or_else(PoisonError::into_inner);
        if triggers.get(&id).is_some_and(|t| t.app_id == app_id) {
            triggers.remove(&id);
            return Ok(true);
        }
        Ok(false)
    }

    async fn get(&self, app_id: AppId, id: TriggerId) -> Result<Option<Trigger>, StoreError> {
        Ok(self
            .triggers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&id)
            .filter(|t| t.app_id == app_id)
            .cloned())
    }

    async fn find(&self, id: TriggerId) -> Result<Option<Trigger>, StoreError> {
        Ok(self
            .triggers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&id)
            .cloned())
    }

    async fn find_by_name(
        &self,
        app_id: AppId,
        name: &str,
    ) -> Result<Option<Trigger>, StoreError> {
        Ok(self
            .filtered(|t| t.app_id == app_id && t.name == name)
            .into_iter()
            .next())
    }

    async fn find_by_webhook_token(
        &self,
        app_id: AppId,
        token: &str,
    ) -> Result<Option<Trigger>, StoreError> {
        Ok(self
            .filtered(|t| t.app_id == app_id && t.webhook_token.as_deref() == Some(token))
            .into_iter()
            .next())
    }

    async fn list(&self, app_id: AppId) -> Result<Vec<Trigger>, StoreError> {
        Ok(self.filtered(|t| t.app_id == app_id))
    }

    async fn list_watching_stream(
        &self,
        stream: ArtifactStreamId,
    ) -> Result<Vec<Trigger>, StoreError> {
        Ok(self.filtered(|t| {
            matches!(&t.condition, TriggerCondition::Artifact(c) if c.artifact_stream_id == stream)
        }))
    }

    async fn list_after_pipeline(
        &self,
        app_id: AppId,
        pipeline_id: PipelineId,
    ) -> Result<Vec<Trigger>, StoreError> {
        Ok(self.filtered(|t| {
            t.app_id == app_id
                && matches!(
                    &t.condition,
                    TriggerCondition::PipelineCompletion(c) if c.pipeline_id == pipeline_id
                )
        }))
    }

    async fn due_scheduled(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Trigger>, StoreError> {
        let mut due = self.filtered(|t| {
            !t.disabled
                && matches!(t.condition, TriggerCondition::Scheduled(_))
                && t.next_fire_at.is_some_and(|at| at <= now)
        });
        due.sort_by_key(|t| t.next_fire_at);
        due.truncate(limit);
        Ok(due)
    }

    async fn advance_next_fire(
        &self,
        id: TriggerId,
        expected: DateTime<Utc>,
        next: Option<DateTime<Utc>>,
    ) -> Result<bool, StoreError> {
        let mut triggers = self.triggers.write().unwrap_or_else(PoisonError::into_inner);
        match triggers.get_mut(&id) {
            Some(trigger) if trigger.next_fire_at == Some(expected) => {
                trigger.next_fire_at = next;
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

/// Trigger execution store backed by a map.
#[derive(Default)]
pub struct InMemoryTriggerExecutionStore {
    executions: RwLock<HashMap<TriggerExecutionId, TriggerExecution>>,
}

impl InMemoryTriggerExecutionStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Every stored record, oldest first.
    #[must_use]
    pub fn all(&self) -> Vec<TriggerExecution> {
        let mut all: Vec<TriggerExecution> = self
            .executions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect();
        all.sort_by_key(|e| e.created_at);
        all
    }
}

#[async_trait]
impl TriggerExecutionStore for InMemoryTriggerExecutionStore {
    async fn insert(&self, execution: &TriggerExecution) -> Result<(), StoreError> {
        self.executions
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(execution.id, execution.clone());
        Ok(())
    }

    async fn update(&self, execution: &TriggerExecution) -> Result<(), StoreError> {
        let mut executions = self
            .executions
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        match executions.get_mut(&execution.id) {
            Some(stored) => {
                *stored = execution.clone();
                Ok(())
            }
            None => Err(StoreError::Conflict {
                message: format!("trigger execution {} does not exist", execution.id),
            }),
        }
    }

    async fn get(
        &self,
        app_id: AppId,
        id: TriggerExecutionId,
    ) -> Result<Option<TriggerExecution>, StoreError> {
        Ok(self
            .executions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&id)
            .filter(|e| e.app_id == app_id)
            .cloned())
    }

    async fn last_successful(
        &self,
        app_id: AppId,
        trigger_id: TriggerId,
    ) -> Result<Option<TriggerExecution>, StoreError> {
        Ok(self
            .list_for_trigger(app_id, trigger_id)
            .await?
            .into_iter()
            .find(|e| e.status == TriggerExecutionStatus::Success))
    }

    async fn list_for_trigger(
        &self,
        app_id: AppId,
        trigger_id: TriggerId,
    ) -> Result<Vec<TriggerExecution>, StoreError> {
        let mut found: Vec<TriggerExecution> = self
            .executions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .filter(|e| e.app_id == app_id && e.trigger_id == trigger_id)
            .cloned()
            .collect();
        found.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(found)
    }
}

/// A request the recording engine received.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmittedExecution {
    pub app_id: AppId,
    pub env_id: Option<EnvironmentId>,
    pub request: ExecutionRequest,
    pub execution_id: ExecutionId,
}

/// Execution engine that accepts and records every request, or rejects all
/// of them once told to.
#[derive(Default)]
pub struct RecordingExecutionEngine {
    submitted: Mutex<Vec<SubmittedExecution>>,
    rejection: Mutex<Option<String>>,
}

impl RecordingExecutionEngine {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Rejects subsequent submissions with `message`.
    pub fn reject_with(&self, message: impl Into<String>) {
        *self.rejection.lock().unwrap_or_else(PoisonError::into_inner) = Some(message.into());
    }

    #[must_use]
    pub fn submitted(&self) -> Vec<SubmittedExecution> {
        self.submitted
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl ExecutionEngine for RecordingExecutionEngine {
    async fn submit(
        &self,
        app_id: AppId,
        env_id: Option<EnvironmentId>,
        request: &ExecutionRequest,
    ) -> Result<ExecutionHandle, ExecutionEngineError> {
        if let Some(message) = self
            .rejection
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
        {
            return Err(ExecutionEngineError::Rejected { message });
        }
        let execution_id = ExecutionId::new();
        self.submitted
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(SubmittedExecution {
                app_id,
                env_id,
                request: request.clone(),
                execution_id,
            });
        Ok(ExecutionHandle {
            execution_id,
            status: "queued".to_string(),
        })
    }
}

/// A check the recording checker received.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestedCheck {
    pub trigger_execution_id: TriggerExecutionId,
    pub previous_execution_id: TriggerExecutionId,
    pub check: ContentCheck,
}

/// Content checker that records requests without answering them.
#[derive(Default)]
pub struct RecordingContentChecker {
    requested: Mutex<Vec<RequestedCheck>>,
}

impl RecordingContentChecker {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn requested(&self) -> Vec<RequestedCheck> {
        self.requested
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl ContentChangeChecker for RecordingContentChecker {
    async fn request_check(
        &self,
        execution: &TriggerExecution,
        previous: &TriggerExecution,
        check: &ContentCheck,
    ) -> Result<(), ContentCheckError> {
        self.requested
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(RequestedCheck {
                trigger_execution_id: execution.id,
                previous_execution_id: previous.id,
                check: check.clone(),
            });
        Ok(())
    }
}
