//! Pending Tasks
//!
//! Human tasks and client approvals are created by paused steps and resolved
//! later by an external caller. Resolution goes through
//! [`TaskCompletionHandler`], which is the only path from the task subsystem
//! back into the engine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

use crate::engine::WorkflowEngine;
use crate::error::WorkflowError;
use crate::store::TaskStore;
use crate::types::{CaseWorkflow, WorkflowStatus};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    HumanTask,
    ClientApproval,
}

impl TaskKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::HumanTask => "human_task",
            Self::ClientApproval => "client_approval",
        }
    }
}

impl std::fmt::Display for TaskKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for TaskKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "human_task" => Ok(Self::HumanTask),
            "client_approval" => Ok(Self::ClientApproval),
            _ => Err(format!("Unknown task kind: {}", s)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Pending,
    Completed,
    Rejected,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Completed => "completed",
            Self::Rejected => "rejected",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Rejected)
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for TaskStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "completed" => Ok(Self::Completed),
            "rejected" => Ok(Self::Rejected),
            _ => Err(format!("Unknown task status: {}", s)),
        }
    }
}

/// A task waiting on a person or the client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingTask {
    pub id: Uuid,
    pub case_workflow_id: Uuid,
    pub step_id: String,
    /// The paused step execution this task belongs to
    pub execution_id: Uuid,
    pub kind: TaskKind,
    pub title: String,
    pub assignee: Option<String>,
    pub instructions: Option<String>,
    pub status: TaskStatus,
    pub created_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub resolved_by: Option<String>,
    pub resolution_output: Option<serde_json::Value>,
}

/// How an external caller resolved a task
#[derive(Debug, Clone, PartialEq)]
pub struct TaskResolution {
    pub rejected: bool,
    pub output: Option<serde_json::Value>,
    pub resolved_by: Option<String>,
}

impl TaskResolution {
    pub fn completed() -> Self {
        Self {
            rejected: false,
            output: None,
            resolved_by: None,
        }
    }

    pub fn rejected() -> Self {
        Self {
            rejected: true,
            ..Self::completed()
        }
    }

    pub fn with_output(mut self, output: serde_json::Value) -> Self {
        self.output = Some(output);
        self
    }

    pub fn by(mut self, resolver: impl Into<String>) -> Self {
        self.resolved_by = Some(resolver.into());
        self
    }

    fn status(&self) -> TaskStatus {
        if self.rejected {
            TaskStatus::Rejected
        } else {
            TaskStatus::Completed
        }
    }
}

/// Resolves pending tasks and resumes the owning case workflow.
pub struct TaskCompletionHandler {
    engine: Arc<WorkflowEngine>,
    tasks: Arc<dyn TaskStore>,
}

impl TaskCompletionHandler {
    pub fn new(engine: Arc<WorkflowEngine>, tasks: Arc<dyn TaskStore>) -> Self {
        Self { engine, tasks }
    }

    /// Record the resolution, fold it into the paused step's output, and resume.
    ///
    /// Subsequent steps see the resolution under `<step name>.status` and
    /// `<step name>.output.*`.
    ///
    /// Only the task behind the workflow's current pause can be resolved;
    /// any other pending task is refused and left untouched.
    pub async fn complete(
        &self,
        task_id: Uuid,
        resolution: TaskResolution,
    ) -> Result<CaseWorkflow, WorkflowError> {
        let mut task = self
            .tasks
            .load_task(task_id)
            .await?
            .ok_or(WorkflowError::TaskNotFound(task_id))?;

        if task.status.is_terminal() {
            return Err(WorkflowError::TaskAlreadyResolved(task_id));
        }

        let mut case = self
            .engine
            .store()
            .load_case_workflow(task.case_workflow_id)
            .await?
            .ok_or(WorkflowError::CaseWorkflowNotFound(task.case_workflow_id))?;

        if case.status.is_terminal() {
            return Err(WorkflowError::AlreadyTerminal(case.status));
        }
        let awaited = case.executions.last().map(|e| e.id);
        if case.status != WorkflowStatus::Paused || awaited != Some(task.execution_id) {
            return Err(WorkflowError::TaskNotAwaited(task_id));
        }

        task.status = resolution.status();
        task.resolved_at = Some(Utc::now());
        task.resolved_by = resolution.resolved_by.clone();
        task.resolution_output = resolution.output.clone();
        self.tasks.save_task(&task).await?;

        tracing::info!(
            task_id = %task.id,
            case_workflow_id = %case.id,
            step_id = %task.step_id,
            status = %task.status,
            "Task resolved"
        );

        if let Some(execution) = case.execution_mut(task.execution_id) {
            let amended = amend_output(execution.output_data.as_deref(), &task)?;
            execution.output_data = Some(amended);
            self.engine.store().save_case_workflow(&case).await?;
        } else {
            tracing::warn!(
                task_id = %task.id,
                execution_id = %task.execution_id,
                "Paused execution not found on case workflow"
            );
        }

        self.engine.resume(&mut case).await?;
        Ok(case)
    }
}

fn amend_output(existing: Option<&str>, task: &PendingTask) -> Result<String, serde_json::Error> {
    use serde_json::{Map, Value};

    let mut fields = match existing.map(serde_json::from_str::<Value>) {
        Some(Ok(Value::Object(fields))) => fields,
        _ => Map::new(),
    };

    fields.insert("task_id".into(), Value::String(task.id.to_string()));
    fields.insert("status".into(), Value::String(task.status.as_str().into()));
    if let Some(resolver) = &task.resolved_by {
        fields.insert("resolved_by".into(), Value::String(resolver.clone()));
    }
    if let Some(output) = &task.resolution_output {
        fields.insert("output".into(), output.clone());
    }

    serde_json::to_string(&Value::Object(fields))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn task() -> PendingTask {
        PendingTask {
            id: Uuid::new_v4(),
            case_workflow_id: Uuid::new_v4(),
            step_id: "review".into(),
            execution_id: Uuid::new_v4(),
            kind: TaskKind::HumanTask,
            title: "Review".into(),
            assignee: None,
            instructions: None,
            status: TaskStatus::Rejected,
            created_at: Utc::now(),
            resolved_at: Some(Utc::now()),
            resolved_by: Some("analyst@example.com".into()),
            resolution_output: Some(json!({"reason": "missing passport"})),
        }
    }

    #[test]
    fn test_amend_output_keeps_existing_fields() {
        let task = task();
        let amended = amend_output(Some(r#"{"kind":"human_task"}"#), &task).unwrap();
        let value: serde_json::Value = serde_json::from_str(&amended).unwrap();

        assert_eq!(value["kind"], "human_task");
        assert_eq!(value["status"], "rejected");
        assert_eq!(value["resolved_by"], "analyst@example.com");
        assert_eq!(value["output"]["reason"], "missing passport");
    }

    #[test]
    fn test_amend_output_replaces_non_object() {
        let amended = amend_output(Some("plain"), &task()).unwrap();
        assert!(amended.starts_with('{'));
    }

    #[test]
    fn test_task_status_terminal() {
        assert!(!TaskStatus::Pending.is_terminal());
        assert!(TaskStatus::Completed.is_terminal());
        assert!(TaskStatus::Rejected.is_terminal());
    }
}
