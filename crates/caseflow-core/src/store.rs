use anyhow::Result;
use async_trait::async_trait;
use caseflow_eval::rules::RuleSet;
use uuid::Uuid;

use crate::catalog::Formula;
use crate::tasks::PendingTask;
use crate::types::{CaseWorkflow, WorkflowStatus, WorkflowTemplate};

/// Persistence for templates and case workflows.
///
/// The engine operates exclusively through this trait. A case workflow and
/// its step executions are always saved and loaded as one unit.
#[async_trait]
pub trait WorkflowStore: Send + Sync {
    // ── Templates ──

    /// Store a template version. Rejects changes to a published version.
    async fn save_template(&self, template: &WorkflowTemplate) -> Result<()>;
    async fn load_template(&self, id: &str, version: u32) -> Result<Option<WorkflowTemplate>>;
    /// Highest published version of a template
    async fn latest_template_version(&self, id: &str) -> Result<Option<u32>>;

    // ── Case workflows ──

    async fn save_case_workflow(&self, case: &CaseWorkflow) -> Result<()>;
    async fn load_case_workflow(&self, id: Uuid) -> Result<Option<CaseWorkflow>>;
    /// Status only; checked between steps to observe external cancellation.
    async fn load_status(&self, id: Uuid) -> Result<Option<WorkflowStatus>>;
}

#[async_trait]
pub trait RuleSetSource: Send + Sync {
    async fn save_rule_set(&self, rule_set: &RuleSet) -> Result<()>;
    async fn load_rule_set(&self, id: &str) -> Result<Option<RuleSet>>;
}

#[async_trait]
pub trait FormulaSource: Send + Sync {
    async fn save_formula(&self, formula: &Formula) -> Result<()>;
    async fn load_formula(&self, id: &str) -> Result<Option<Formula>>;
}

/// Pending human tasks and client approvals created by paused steps.
#[async_trait]
pub trait TaskStore: Send + Sync {
    async fn save_task(&self, task: &PendingTask) -> Result<()>;
    async fn load_task(&self, id: Uuid) -> Result<Option<PendingTask>>;
    async fn tasks_for_case(&self, case_workflow_id: Uuid) -> Result<Vec<PendingTask>>;
}
