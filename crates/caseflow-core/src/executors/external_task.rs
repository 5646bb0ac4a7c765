use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use uuid::Uuid;

use crate::executor::{StepConfig, StepExecutor, StepResult};
use crate::store::TaskStore;
use crate::tasks::{PendingTask, TaskKind, TaskStatus};
use crate::types::{CaseWorkflow, StepExecution, WorkflowStep};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExternalTaskConfig {
    pub title: String,
    #[serde(default)]
    pub assignee: Option<String>,
    #[serde(default)]
    pub instructions: Option<String>,
}

impl StepConfig for ExternalTaskConfig {}

/// Creates a pending task and pauses the workflow until it is resolved.
///
/// Used for both human tasks and client approvals; only the task kind differs.
pub struct ExternalTaskExecutor {
    tasks: Arc<dyn TaskStore>,
    kind: TaskKind,
}

impl ExternalTaskExecutor {
    pub fn human_task(tasks: Arc<dyn TaskStore>) -> Self {
        Self {
            tasks,
            kind: TaskKind::HumanTask,
        }
    }

    pub fn client_approval(tasks: Arc<dyn TaskStore>) -> Self {
        Self {
            tasks,
            kind: TaskKind::ClientApproval,
        }
    }
}

#[async_trait]
impl StepExecutor for ExternalTaskExecutor {
    async fn execute(
        &self,
        step: &WorkflowStep,
        execution: &StepExecution,
        case: &CaseWorkflow,
    ) -> anyhow::Result<StepResult> {
        let config = match ExternalTaskConfig::decode_optional(step) {
            Ok(Some(config)) => config,
            Ok(None) => ExternalTaskConfig {
                title: step.name.clone(),
                assignee: None,
                instructions: None,
            },
            Err(e) => return Ok(StepResult::failure(e.to_string())),
        };

        let task = PendingTask {
            id: Uuid::new_v4(),
            case_workflow_id: case.id,
            step_id: step.id.clone(),
            execution_id: execution.id,
            kind: self.kind,
            title: config.title,
            assignee: config.assignee,
            instructions: config.instructions,
            status: TaskStatus::Pending,
            created_at: Utc::now(),
            resolved_at: None,
            resolved_by: None,
            resolution_output: None,
        };
        self.tasks.save_task(&task).await?;

        tracing::info!(
            task_id = %task.id,
            case_workflow_id = %case.id,
            step_id = %step.id,
            kind = %task.kind,
            "Created pending task"
        );

        let output = json!({
            "task_id": task.id,
            "kind": task.kind.as_str(),
        });
        Ok(StepResult::pause(output.to_string()))
    }
}
