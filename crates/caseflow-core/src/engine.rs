//! Workflow Engine
//!
//! Drives a case workflow through its template's steps. Steps form a graph
//! keyed by id: the default edge goes to the next step by sort order, and a
//! step may override it with explicit success and failure successors.
//!
//! Every transition is persisted before the next step begins. A step that
//! pauses returns control to the caller entirely; [`WorkflowEngine::resume`]
//! is a fresh invocation that rebuilds the context from stored executions.

use futures::FutureExt;
use std::collections::{BTreeMap, HashMap};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::EngineConfig;
use crate::context::WorkflowContext;
use crate::error::WorkflowError;
use crate::executor::{ExecutorRegistry, StepExecutor, StepResult};
use crate::store::WorkflowStore;
use crate::types::{
    CaseWorkflow, StepExecution, StepStatus, WorkflowStatus, WorkflowStep, WorkflowTemplate,
};

/// The workflow execution engine
pub struct WorkflowEngine {
    store: Arc<dyn WorkflowStore>,
    executors: ExecutorRegistry,
    config: EngineConfig,
}

impl WorkflowEngine {
    pub fn new(store: Arc<dyn WorkflowStore>, executors: ExecutorRegistry) -> Self {
        Self {
            store,
            executors,
            config: EngineConfig::default(),
        }
    }

    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn store(&self) -> &Arc<dyn WorkflowStore> {
        &self.store
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Create a case workflow bound to a template version (latest published by default)
    pub async fn open_case(
        &self,
        case_id: &str,
        template_id: &str,
        version: Option<u32>,
        case_data: BTreeMap<String, String>,
    ) -> Result<CaseWorkflow, WorkflowError> {
        let version = match version {
            Some(version) => version,
            None => self
                .store
                .latest_template_version(template_id)
                .await?
                .ok_or_else(|| WorkflowError::NoPublishedVersion(template_id.to_string()))?,
        };

        let template = self
            .store
            .load_template(template_id, version)
            .await?
            .ok_or_else(|| WorkflowError::TemplateNotFound {
                id: template_id.to_string(),
                version,
            })?;

        let case = CaseWorkflow::new(case_id, &template).with_case_data(case_data);
        self.store.save_case_workflow(&case).await?;

        info!(
            case_workflow_id = %case.id,
            case_id,
            template_id,
            version,
            "Opened case workflow"
        );
        Ok(case)
    }

    /// Begin executing from the first step by sort order.
    pub async fn start(&self, case: &mut CaseWorkflow) -> Result<(), WorkflowError> {
        if case.status.is_terminal() {
            return Err(WorkflowError::AlreadyTerminal(case.status));
        }
        if case.status != WorkflowStatus::NotStarted {
            return Err(WorkflowError::InvalidTransition {
                from: case.status,
                to: WorkflowStatus::Running,
            });
        }

        let template = self.resolve_template(case).await?;

        let first = template.ordered_steps().first().map(|s| s.id.clone());
        let Some(first) = first else {
            info!(case_workflow_id = %case.id, "Template has no steps, completing");
            case.current_step_id = None;
            case.transition_to(WorkflowStatus::Completed)?;
            return self.save(case).await;
        };

        case.current_step_id = Some(first.clone());
        case.transition_to(WorkflowStatus::Running)?;
        self.save(case).await?;

        info!(
            case_workflow_id = %case.id,
            template_id = %case.template_id,
            version = case.template_version,
            "Workflow started"
        );

        self.run(case, &template, first).await
    }

    /// Continue from the current step pointer.
    ///
    /// The pointer is advanced in the same save that records a finished
    /// step, so it always names the next step to run. A workflow found
    /// `Running` was interrupted; any unfinished execution is marked failed
    /// and the step it belonged to runs again.
    pub async fn resume(&self, case: &mut CaseWorkflow) -> Result<(), WorkflowError> {
        if case.status.is_terminal() {
            return Err(WorkflowError::AlreadyTerminal(case.status));
        }
        if case.status == WorkflowStatus::NotStarted {
            return Err(WorkflowError::InvalidTransition {
                from: case.status,
                to: WorkflowStatus::Running,
            });
        }

        let template = self.resolve_template(case).await?;

        let Some(step_id) = case.current_step_id.clone() else {
            info!(case_workflow_id = %case.id, "No current step on resume, completing");
            case.transition_to(WorkflowStatus::Completed)?;
            return self.save(case).await;
        };

        if template.step(&step_id).is_none() {
            return Err(self
                .fail_consistency(case, WorkflowError::DanglingStep(step_id))
                .await);
        }

        for execution in case
            .executions
            .iter_mut()
            .filter(|e| e.status == StepStatus::Running)
        {
            warn!(
                execution_id = %execution.id,
                step_id = %execution.step_id,
                "Marking interrupted execution failed"
            );
            execution.fail("Interrupted before completion");
        }

        if case.status == WorkflowStatus::Paused {
            case.transition_to(WorkflowStatus::Running)?;
        }
        self.save(case).await?;

        info!(case_workflow_id = %case.id, step_id = %step_id, "Workflow resumed");

        self.run(case, &template, step_id).await
    }

    /// Cancel from any non-terminal state. Takes effect between steps.
    pub async fn cancel(
        &self,
        case: &mut CaseWorkflow,
        reason: Option<String>,
    ) -> Result<(), WorkflowError> {
        if case.status.is_terminal() {
            return Err(WorkflowError::AlreadyTerminal(case.status));
        }

        case.transition_to(WorkflowStatus::Cancelled)?;
        case.error_message = Some(reason.unwrap_or_else(|| "Cancelled".to_string()));
        self.save(case).await?;

        info!(
            case_workflow_id = %case.id,
            reason = case.error_message.as_deref().unwrap_or_default(),
            "Workflow cancelled"
        );
        Ok(())
    }

    pub async fn start_by_id(&self, id: Uuid) -> Result<CaseWorkflow, WorkflowError> {
        let mut case = self.load_case(id).await?;
        self.start(&mut case).await?;
        Ok(case)
    }

    pub async fn resume_by_id(&self, id: Uuid) -> Result<CaseWorkflow, WorkflowError> {
        let mut case = self.load_case(id).await?;
        self.resume(&mut case).await?;
        Ok(case)
    }

    pub async fn cancel_by_id(
        &self,
        id: Uuid,
        reason: Option<String>,
    ) -> Result<CaseWorkflow, WorkflowError> {
        let mut case = self.load_case(id).await?;
        self.cancel(&mut case, reason).await?;
        Ok(case)
    }

    pub async fn load_case(&self, id: Uuid) -> Result<CaseWorkflow, WorkflowError> {
        self.store
            .load_case_workflow(id)
            .await?
            .ok_or(WorkflowError::CaseWorkflowNotFound(id))
    }

    // ── Step loop ──

    async fn run(
        &self,
        case: &mut CaseWorkflow,
        template: &WorkflowTemplate,
        first: String,
    ) -> Result<(), WorkflowError> {
        let graph = StepGraph::new(template);
        let mut next = Some(first);
        let mut via_failure = false;
        let mut visits = 0usize;

        while let Some(step_id) = next.take() {
            if self.cancelled_externally(case).await? {
                return Ok(());
            }

            let Some(step) = graph.get(&step_id) else {
                return Err(self
                    .fail_consistency(case, WorkflowError::DanglingStep(step_id))
                    .await);
            };

            visits += 1;
            if visits > self.config.max_step_visits {
                let err = WorkflowError::StepLimitExceeded(self.config.max_step_visits);
                return Err(self.fail_consistency(case, err).await);
            }

            case.current_step_id = Some(step.id.clone());

            let Some(executor) = self.executors.get(step.step_type) else {
                if via_failure {
                    let err = WorkflowError::NoExecutor {
                        step_id: step.id.clone(),
                        step_type: step.step_type,
                    };
                    return Err(self.fail_consistency(case, err).await);
                }
                if step.required {
                    let message = format!(
                        "No executor registered for step type {} (step {})",
                        step.step_type, step.id
                    );
                    return self.fail(case, message).await;
                }

                warn!(
                    case_workflow_id = %case.id,
                    step_id = %step.id,
                    step_type = %step.step_type,
                    "Skipping optional step with no registered executor"
                );
                let mut execution = StepExecution::new(step);
                execution.skip(format!(
                    "No executor registered for step type {}",
                    step.step_type
                ));
                case.executions.push(execution);
                next = graph.next_in_order(step);
                case.current_step_id = next.clone();
                self.save(case).await?;

                via_failure = false;
                continue;
            };

            let context = WorkflowContext::from_executions(&case.executions);
            debug!(
                case_workflow_id = %case.id,
                step_id = %step.id,
                entries = context.len(),
                "Rebuilt workflow context"
            );

            let mut execution = StepExecution::new(step);
            execution.start(context.to_json()?);
            let index = case.executions.len();
            case.executions.push(execution.clone());
            self.save(case).await?;

            debug!(
                case_workflow_id = %case.id,
                step_id = %step.id,
                step_type = %step.step_type,
                "Executing step"
            );
            let outcome = dispatch(executor.as_ref(), step, &execution, case).await;

            if self.cancelled_externally(case).await? {
                if let Some(interrupted) = case
                    .execution_mut(execution.id)
                    .filter(|e| e.status == StepStatus::Running)
                {
                    interrupted.fail("Cancelled during execution");
                    self.save(case).await?;
                }
                return Ok(());
            }

            match outcome {
                StepOutcome::Pause(output) => {
                    case.executions[index].complete(output);
                    case.current_step_id = graph.on_success(step);
                    case.transition_to(WorkflowStatus::Paused)?;
                    self.save(case).await?;

                    info!(
                        case_workflow_id = %case.id,
                        step_id = %step.id,
                        "Workflow paused"
                    );
                    return Ok(());
                }
                StepOutcome::Success(output) => {
                    case.executions[index].complete(output);
                    next = graph.on_success(step);
                    case.current_step_id = next.clone();
                    self.save(case).await?;

                    debug!(case_workflow_id = %case.id, step_id = %step.id, "Step completed");
                    via_failure = false;
                }
                StepOutcome::Failure(message) => {
                    case.executions[index].fail(message.clone());
                    warn!(
                        case_workflow_id = %case.id,
                        step_id = %step.id,
                        error = %message,
                        "Step failed"
                    );

                    if let Some(target) = &step.next_step_on_failure {
                        next = Some(target.clone());
                        case.current_step_id = next.clone();
                        self.save(case).await?;
                        via_failure = true;
                    } else if step.required {
                        return self
                            .fail(case, format!("Step {} failed: {}", step.id, message))
                            .await;
                    } else {
                        next = graph.next_in_order(step);
                        case.current_step_id = next.clone();
                        self.save(case).await?;
                        via_failure = false;
                    }
                }
            }
        }

        case.current_step_id = None;
        case.transition_to(WorkflowStatus::Completed)?;
        self.save(case).await?;

        info!(case_workflow_id = %case.id, "Workflow completed");
        Ok(())
    }

    /// Load the exact template snapshot the case is bound to.
    async fn resolve_template(
        &self,
        case: &mut CaseWorkflow,
    ) -> Result<WorkflowTemplate, WorkflowError> {
        let loaded = self
            .store
            .load_template(&case.template_id, case.template_version)
            .await?;

        let Some(template) = loaded else {
            let err = WorkflowError::TemplateNotFound {
                id: case.template_id.clone(),
                version: case.template_version,
            };
            return Err(self.fail_consistency(case, err).await);
        };

        if let Err(err) = template.validate() {
            return Err(self.fail_consistency(case, err).await);
        }

        Ok(template)
    }

    /// Re-read the persisted status; adopt the stored record if it was cancelled.
    async fn cancelled_externally(&self, case: &mut CaseWorkflow) -> Result<bool, WorkflowError> {
        if self.store.load_status(case.id).await? != Some(WorkflowStatus::Cancelled) {
            return Ok(false);
        }

        if let Some(stored) = self.store.load_case_workflow(case.id).await? {
            *case = stored;
        }
        info!(case_workflow_id = %case.id, "Workflow cancelled externally, stopping");
        Ok(true)
    }

    /// Fail the workflow as a business outcome.
    async fn fail(&self, case: &mut CaseWorkflow, message: String) -> Result<(), WorkflowError> {
        error!(case_workflow_id = %case.id, error = %message, "Workflow failed");
        case.error_message = Some(message);
        case.transition_to(WorkflowStatus::Failed)?;
        self.save(case).await
    }

    /// Fail the workflow for corrupted state; returns the error to surface.
    async fn fail_consistency(&self, case: &mut CaseWorkflow, err: WorkflowError) -> WorkflowError {
        error!(
            case_workflow_id = %case.id,
            error = %err,
            "Workflow consistency violation"
        );
        match self.fail(case, err.to_string()).await {
            Ok(()) => err,
            Err(save_err) => save_err,
        }
    }

    async fn save(&self, case: &mut CaseWorkflow) -> Result<(), WorkflowError> {
        case.updated_at = chrono::Utc::now();
        self.store.save_case_workflow(case).await?;
        Ok(())
    }
}

enum StepOutcome {
    Pause(Option<String>),
    Success(Option<String>),
    Failure(String),
}

impl From<StepResult> for StepOutcome {
    fn from(result: StepResult) -> Self {
        if result.should_pause {
            Self::Pause(result.output_data)
        } else if result.success {
            Self::Success(result.output_data)
        } else {
            Self::Failure(
                result
                    .error_message
                    .unwrap_or_else(|| "Step reported failure without a message".to_string()),
            )
        }
    }
}

/// Run an executor; an `Err` or a panic becomes a failure outcome.
async fn dispatch(
    executor: &dyn StepExecutor,
    step: &WorkflowStep,
    execution: &StepExecution,
    case: &CaseWorkflow,
) -> StepOutcome {
    match AssertUnwindSafe(executor.execute(step, execution, case))
        .catch_unwind()
        .await
    {
        Ok(Ok(result)) => result.into(),
        Ok(Err(e)) => StepOutcome::Failure(format!("{e:#}")),
        Err(panic) => {
            let message = panic
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "executor panicked".to_string());
            StepOutcome::Failure(format!("Executor panicked: {message}"))
        }
    }
}

/// Template steps as nodes keyed by id
struct StepGraph<'a> {
    order: Vec<&'a WorkflowStep>,
    position: HashMap<&'a str, usize>,
}

impl<'a> StepGraph<'a> {
    fn new(template: &'a WorkflowTemplate) -> Self {
        let order = template.ordered_steps();
        let position = order
            .iter()
            .enumerate()
            .map(|(i, s)| (s.id.as_str(), i))
            .collect();
        Self { order, position }
    }

    fn get(&self, id: &str) -> Option<&'a WorkflowStep> {
        self.position.get(id).map(|&i| self.order[i])
    }

    fn next_in_order(&self, step: &WorkflowStep) -> Option<String> {
        let i = self.position.get(step.id.as_str())?;
        self.order.get(i + 1).map(|s| s.id.clone())
    }

    fn on_success(&self, step: &WorkflowStep) -> Option<String> {
        step.next_step_on_success
            .clone()
            .or_else(|| self.next_in_order(step))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::StepType;

    fn template() -> WorkflowTemplate {
        WorkflowTemplate::new("t", 1)
            .with_step(WorkflowStep::new("c", StepType::Calculation, 30))
            .with_step(WorkflowStep::new("a", StepType::Calculation, 10).on_success("c"))
            .with_step(WorkflowStep::new("b", StepType::Calculation, 20))
    }

    #[test]
    fn test_graph_edges() {
        let template = template();
        let graph = StepGraph::new(&template);

        let a = graph.get("a").unwrap();
        let b = graph.get("b").unwrap();
        let c = graph.get("c").unwrap();

        assert_eq!(graph.next_in_order(a).as_deref(), Some("b"));
        assert_eq!(graph.on_success(a).as_deref(), Some("c"));
        assert_eq!(graph.on_success(b).as_deref(), Some("c"));
        assert_eq!(graph.on_success(c), None);
        assert!(graph.get("zzz").is_none());
    }

    #[test]
    fn test_outcome_mapping() {
        assert!(matches!(
            StepOutcome::from(StepResult::pause("{}")),
            StepOutcome::Pause(Some(_))
        ));
        assert!(matches!(
            StepOutcome::from(StepResult::success("1")),
            StepOutcome::Success(Some(_))
        ));

        let silent = StepResult {
            success: false,
            output_data: None,
            error_message: None,
            should_pause: false,
        };
        match StepOutcome::from(silent) {
            StepOutcome::Failure(message) => assert!(message.contains("without a message")),
            _ => panic!("expected failure"),
        }
    }
}
