//! Workflow Types
//!
//! Templates and their steps, case workflow instances, and the per-step
//! execution records the engine accumulates.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use uuid::Uuid;

use crate::error::WorkflowError;

/// Step type tag. Executors are registered per tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepType {
    DecisionTable,
    Calculation,
    HumanTask,
    ClientApproval,
    DocumentGeneration,
}

impl StepType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::DecisionTable => "decision_table",
            Self::Calculation => "calculation",
            Self::HumanTask => "human_task",
            Self::ClientApproval => "client_approval",
            Self::DocumentGeneration => "document_generation",
        }
    }
}

impl std::fmt::Display for StepType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for StepType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "decision_table" => Ok(Self::DecisionTable),
            "calculation" => Ok(Self::Calculation),
            "human_task" => Ok(Self::HumanTask),
            "client_approval" => Ok(Self::ClientApproval),
            "document_generation" => Ok(Self::DocumentGeneration),
            _ => Err(format!("Unknown step type: {}", s)),
        }
    }
}

/// One unit of work within a template
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowStep {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub step_type: StepType,
    /// Default sequencing; ties keep declaration order
    pub sort_order: i32,
    /// Executor-defined serialized configuration
    #[serde(default)]
    pub configuration: Option<String>,
    #[serde(default = "default_required")]
    pub required: bool,
    #[serde(default)]
    pub next_step_on_success: Option<String>,
    #[serde(default)]
    pub next_step_on_failure: Option<String>,
}

fn default_required() -> bool {
    true
}

impl WorkflowStep {
    pub fn new(id: impl Into<String>, step_type: StepType, sort_order: i32) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            step_type,
            sort_order,
            configuration: None,
            required: true,
            next_step_on_success: None,
            next_step_on_failure: None,
        }
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn optional(mut self) -> Self {
        self.required = false;
        self
    }

    pub fn with_configuration(mut self, configuration: impl Into<String>) -> Self {
        self.configuration = Some(configuration.into());
        self
    }

    pub fn on_success(mut self, step_id: impl Into<String>) -> Self {
        self.next_step_on_success = Some(step_id.into());
        self
    }

    pub fn on_failure(mut self, step_id: impl Into<String>) -> Self {
        self.next_step_on_failure = Some(step_id.into());
        self
    }
}

/// A reusable workflow definition, immutable once published
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowTemplate {
    pub id: String,
    pub version: u32,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub steps: Vec<WorkflowStep>,
    #[serde(default)]
    pub published_at: Option<DateTime<Utc>>,
}

impl WorkflowTemplate {
    pub fn new(id: impl Into<String>, version: u32) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            version,
            description: None,
            steps: Vec::new(),
            published_at: None,
        }
    }

    pub fn with_step(mut self, step: WorkflowStep) -> Self {
        self.steps.push(step);
        self
    }

    pub fn step(&self, id: &str) -> Option<&WorkflowStep> {
        self.steps.iter().find(|s| s.id == id)
    }

    /// Steps in execution order (stable by sort order)
    pub fn ordered_steps(&self) -> Vec<&WorkflowStep> {
        let mut steps: Vec<_> = self.steps.iter().collect();
        steps.sort_by_key(|s| s.sort_order);
        steps
    }

    pub fn is_published(&self) -> bool {
        self.published_at.is_some()
    }

    /// Step ids are unique and every successor id names a step of this template.
    pub fn validate(&self) -> Result<(), WorkflowError> {
        let mut seen = HashSet::new();
        for step in &self.steps {
            if !seen.insert(step.id.as_str()) {
                return Err(WorkflowError::invalid_template(
                    &self.id,
                    format!("duplicate step id {}", step.id),
                ));
            }
        }

        for step in &self.steps {
            let successors = [&step.next_step_on_success, &step.next_step_on_failure];
            for target in successors.into_iter().flatten() {
                if !seen.contains(target.as_str()) {
                    return Err(WorkflowError::invalid_template(
                        &self.id,
                        format!("step {} points to unknown step {}", step.id, target),
                    ));
                }
            }
        }

        Ok(())
    }

    /// Validate and freeze this version
    pub fn publish(&mut self) -> Result<(), WorkflowError> {
        self.validate()?;
        if self.published_at.is_none() {
            self.published_at = Some(Utc::now());
        }
        Ok(())
    }
}

/// Lifecycle status of a case workflow
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStatus {
    NotStarted,
    Running,
    Paused,
    Completed,
    Failed,
    Cancelled,
}

impl WorkflowStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NotStarted => "not_started",
            Self::Running => "running",
            Self::Paused => "paused",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    pub fn can_transition_to(&self, next: WorkflowStatus) -> bool {
        use WorkflowStatus::*;
        match self {
            NotStarted | Paused => matches!(next, Running | Completed | Failed | Cancelled),
            Running => matches!(next, Paused | Completed | Failed | Cancelled),
            Completed | Failed | Cancelled => false,
        }
    }
}

impl std::fmt::Display for WorkflowStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for WorkflowStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "not_started" => Ok(Self::NotStarted),
            "running" => Ok(Self::Running),
            "paused" => Ok(Self::Paused),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "cancelled" => Ok(Self::Cancelled),
            _ => Err(format!("Unknown workflow status: {}", s)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Skipped,
}

impl StepStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Skipped => "skipped",
        }
    }
}

impl std::fmt::Display for StepStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for StepStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "running" => Ok(Self::Running),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "skipped" => Ok(Self::Skipped),
            _ => Err(format!("Unknown step status: {}", s)),
        }
    }
}

/// Record of one attempt to run a step
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepExecution {
    pub id: Uuid,
    pub step_id: String,
    pub step_name: String,
    pub status: StepStatus,
    /// Serialized workflow context at the time the step started
    pub input_data: Option<String>,
    pub output_data: Option<String>,
    pub error_message: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl StepExecution {
    pub fn new(step: &WorkflowStep) -> Self {
        Self {
            id: Uuid::new_v4(),
            step_id: step.id.clone(),
            step_name: step.name.clone(),
            status: StepStatus::Pending,
            input_data: None,
            output_data: None,
            error_message: None,
            started_at: None,
            completed_at: None,
        }
    }

    pub fn start(&mut self, input_data: String) {
        self.status = StepStatus::Running;
        self.input_data = Some(input_data);
        self.started_at = Some(Utc::now());
    }

    pub fn complete(&mut self, output_data: Option<String>) {
        self.status = StepStatus::Completed;
        self.output_data = output_data;
        self.completed_at = Some(Utc::now());
    }

    pub fn fail(&mut self, error: impl Into<String>) {
        self.status = StepStatus::Failed;
        self.error_message = Some(error.into());
        self.completed_at = Some(Utc::now());
    }

    pub fn skip(&mut self, reason: impl Into<String>) {
        let now = Utc::now();
        self.status = StepStatus::Skipped;
        self.error_message = Some(reason.into());
        self.started_at = Some(now);
        self.completed_at = Some(now);
    }
}

/// A running or finished instance of a template bound to one case
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaseWorkflow {
    pub id: Uuid,
    /// External case or client reference
    pub case_id: String,
    pub template_id: String,
    pub template_version: u32,
    pub status: WorkflowStatus,
    pub current_step_id: Option<String>,
    /// Facts supplied when the case was opened; visible to every step
    #[serde(default)]
    pub case_data: BTreeMap<String, String>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
    #[serde(default)]
    pub executions: Vec<StepExecution>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl CaseWorkflow {
    pub fn new(case_id: impl Into<String>, template: &WorkflowTemplate) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            case_id: case_id.into(),
            template_id: template.id.clone(),
            template_version: template.version,
            status: WorkflowStatus::NotStarted,
            current_step_id: None,
            case_data: BTreeMap::new(),
            started_at: None,
            completed_at: None,
            error_message: None,
            executions: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_case_data(mut self, case_data: BTreeMap<String, String>) -> Self {
        self.case_data = case_data;
        self
    }

    /// Apply a lifecycle transition, stamping start and completion times.
    pub fn transition_to(&mut self, next: WorkflowStatus) -> Result<(), WorkflowError> {
        if !self.status.can_transition_to(next) {
            return Err(WorkflowError::InvalidTransition {
                from: self.status,
                to: next,
            });
        }

        let now = Utc::now();
        if next == WorkflowStatus::Running && self.started_at.is_none() {
            self.started_at = Some(now);
        }
        if next.is_terminal() {
            self.completed_at = Some(now);
        }
        self.status = next;
        self.updated_at = now;
        Ok(())
    }

    pub fn executions_for<'a>(
        &'a self,
        step_id: &'a str,
    ) -> impl Iterator<Item = &'a StepExecution> + 'a {
        self.executions.iter().filter(move |e| e.step_id == step_id)
    }

    pub fn execution_mut(&mut self, id: Uuid) -> Option<&mut StepExecution> {
        self.executions.iter_mut().find(|e| e.id == id)
    }
}
