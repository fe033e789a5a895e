//! Capabilities consumed from outside the engine.

use crate::error::{ContentCheckError, ExecutionEngineError};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tripwire_core::{AppId, EnvironmentId};
use tripwire_trigger::{ContentCheck, ExecutionHandle, ExecutionRequest, TriggerExecution};

/// Starts pipeline and workflow executions.
#[async_trait]
pub trait ExecutionEngine: Send + Sync {
    /// Submits `request`. Returns once the engine accepted or refused it;
    /// the execution itself runs on.
    async fn submit(
        &self,
        app_id: AppId,
        env_id: Option<EnvironmentId>,
        request: &ExecutionRequest,
    ) -> Result<ExecutionHandle, ExecutionEngineError>;
}

/// Compares tracked file content between two pushes.
///
/// The check runs asynchronously; its verdict comes back through
/// `TriggerService::on_content_check_result`.
#[async_trait]
pub trait ContentChangeChecker: Send + Sync {
    /// Requests a comparison of the files in `check` between the commit of
    /// `previous` and the commit of `execution`.
    async fn request_check(
        &self,
        execution: &TriggerExecution,
        previous: &TriggerExecution,
        check: &ContentCheck,
    ) -> Result<(), ContentCheckError>;
}

/// Verdict of a content-change check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum ContentCheckResult {
    /// At least one tracked file changed.
    Changed,
    Unchanged,
    /// The check itself failed.
    Failed { message: String },
}
