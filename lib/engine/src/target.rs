//! Pipeline and workflow targets seen through one shape.

use crate::error::{TriggerServiceError, ValidationError};
use tripwire_core::{AppId, EnvironmentId};
use tripwire_resolver::{DeploymentCatalog, Variable, WorkflowKind};
use tripwire_trigger::DeploymentTarget;

const TEMPLATE_SUFFIX: &str = " (TEMPLATE)";

/// What the engine needs to know about a deployment target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetShape {
    /// Display name; templated workflows carry a suffix.
    pub name: String,
    pub variables: Vec<Variable>,
    /// Environment of a non-templated workflow.
    pub default_env: Option<EnvironmentId>,
    /// A build workflow, which takes no artifacts.
    pub build: bool,
    /// Skip the artifact/service cross-check.
    pub skip_service_check: bool,
}

/// Loads `target`.
///
/// # Errors
///
/// Returns `PipelineNotFound` or `WorkflowNotFound` if the target does not
/// exist in the application.
pub async fn load(
    deployments: &dyn DeploymentCatalog,
    app_id: AppId,
    target: DeploymentTarget,
) -> Result<TargetShape, TriggerServiceError> {
    match target {
        DeploymentTarget::Pipeline(pipeline_id) => {
            let pipeline = deployments
                .pipeline(app_id, pipeline_id)
                .await?
                .ok_or(ValidationError::PipelineNotFound { pipeline_id })?;
            Ok(TargetShape {
                name: pipeline.name,
                variables: pipeline.variables,
                default_env: None,
                build: false,
                skip_service_check: pipeline.has_build_workflow || pipeline.env_parameterized,
            })
        }
        DeploymentTarget::Workflow(workflow_id) => {
            let workflow = deployments
                .workflow(app_id, workflow_id)
                .await?
                .ok_or(ValidationError::WorkflowNotFound { workflow_id })?;
            let name = if workflow.templatized {
                format!("{}{TEMPLATE_SUFFIX}", workflow.name)
            } else {
                workflow.name
            };
            let build = workflow.kind == WorkflowKind::Build;
            Ok(TargetShape {
                name,
                variables: workflow.variables,
                default_env: workflow.env_id,
                build,
                skip_service_check: build,
            })
        }
    }
}
