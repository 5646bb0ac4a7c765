use thiserror::Error;
use uuid::Uuid;

use crate::types::{StepType, WorkflowStatus};

#[derive(Debug, Error)]
pub enum WorkflowError {
    #[error("workflow template not found: {id} v{version}")]
    TemplateNotFound { id: String, version: u32 },

    #[error("no published version of workflow template {0}")]
    NoPublishedVersion(String),

    #[error("case workflow not found: {0}")]
    CaseWorkflowNotFound(Uuid),

    #[error("invalid status transition from {from} to {to}")]
    InvalidTransition {
        from: WorkflowStatus,
        to: WorkflowStatus,
    },

    #[error("case workflow is already {0}")]
    AlreadyTerminal(WorkflowStatus),

    #[error("current step {0} does not exist in the template")]
    DanglingStep(String),

    #[error("failure successor {step_id} has no executor registered for step type {step_type}")]
    NoExecutor { step_id: String, step_type: StepType },

    #[error("exceeded {0} step visits in one run; successor links form a loop")]
    StepLimitExceeded(usize),

    #[error("invalid template {template_id}: {reason}")]
    InvalidTemplate { template_id: String, reason: String },

    #[error("pending task not found: {0}")]
    TaskNotFound(Uuid),

    #[error("pending task {0} is already resolved")]
    TaskAlreadyResolved(Uuid),

    #[error("case workflow is not paused on pending task {0}")]
    TaskNotAwaited(Uuid),

    #[error("storage: {0}")]
    Storage(#[from] anyhow::Error),

    #[error("serialization: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl WorkflowError {
    pub(crate) fn invalid_template(template_id: &str, reason: impl Into<String>) -> Self {
        Self::InvalidTemplate {
            template_id: template_id.to_string(),
            reason: reason.into(),
        }
    }
}

/// Errors decoding a step's configuration blob.
#[derive(Debug, Error)]
pub enum StepConfigError {
    #[error("step {step_id} has no configuration")]
    Missing { step_id: String },

    #[error("step {step_id} has malformed configuration: {source}")]
    Malformed {
        step_id: String,
        #[source]
        source: serde_json::Error,
    },
}
