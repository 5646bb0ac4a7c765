//! Step Executor Contract
//!
//! The engine knows nothing about what a step does. It looks up the executor
//! registered for the step's type, hands it the step, the new execution
//! record, and a read-only view of the case workflow, and applies the
//! returned [`StepResult`] itself.

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;

use crate::error::StepConfigError;
use crate::types::{CaseWorkflow, StepExecution, StepType, WorkflowStep};

/// Outcome of one step execution
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepResult {
    pub success: bool,
    pub output_data: Option<String>,
    pub error_message: Option<String>,
    /// Suspend the workflow until an external caller resumes it
    pub should_pause: bool,
}

impl StepResult {
    pub fn success(output: impl Into<String>) -> Self {
        Self {
            success: true,
            output_data: Some(output.into()),
            error_message: None,
            should_pause: false,
        }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            success: false,
            output_data: None,
            error_message: Some(message.into()),
            should_pause: false,
        }
    }

    pub fn pause(output: impl Into<String>) -> Self {
        Self {
            should_pause: true,
            ..Self::success(output)
        }
    }
}

/// Runs one type of step.
///
/// Executors must not mutate the case workflow; every effect on it is applied
/// by the engine from the returned result. Returning `Err` is treated as a
/// step failure carrying the error's message.
#[async_trait]
pub trait StepExecutor: Send + Sync {
    async fn execute(
        &self,
        step: &WorkflowStep,
        execution: &StepExecution,
        case: &CaseWorkflow,
    ) -> anyhow::Result<StepResult>;
}

/// Executors keyed by step type, supplied to the engine at construction
#[derive(Clone, Default)]
pub struct ExecutorRegistry {
    executors: HashMap<StepType, Arc<dyn StepExecutor>>,
}

impl ExecutorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, step_type: StepType, executor: Arc<dyn StepExecutor>) {
        if self.executors.insert(step_type, executor).is_some() {
            tracing::debug!(%step_type, "Replaced step executor");
        }
    }

    pub fn with(mut self, step_type: StepType, executor: Arc<dyn StepExecutor>) -> Self {
        self.register(step_type, executor);
        self
    }

    pub fn get(&self, step_type: StepType) -> Option<Arc<dyn StepExecutor>> {
        self.executors.get(&step_type).cloned()
    }

    pub fn contains(&self, step_type: StepType) -> bool {
        self.executors.contains_key(&step_type)
    }

    pub fn step_types(&self) -> Vec<StepType> {
        let mut types: Vec<_> = self.executors.keys().copied().collect();
        types.sort_by_key(|t| t.as_str());
        types
    }
}

/// Typed codec for a step's configuration blob.
///
/// Each executor declares its own configuration shape; the engine never
/// looks inside the blob.
pub trait StepConfig: Serialize + DeserializeOwned {
    fn decode(step: &WorkflowStep) -> Result<Self, StepConfigError> {
        Self::decode_optional(step)?.ok_or_else(|| StepConfigError::Missing {
            step_id: step.id.clone(),
        })
    }

    /// `None` when the step carries no configuration at all.
    fn decode_optional(step: &WorkflowStep) -> Result<Option<Self>, StepConfigError> {
        let Some(raw) = step.configuration.as_deref() else {
            return Ok(None);
        };
        if raw.trim().is_empty() {
            return Ok(None);
        }
        serde_json::from_str(raw)
            .map(Some)
            .map_err(|source| StepConfigError::Malformed {
                step_id: step.id.clone(),
                source,
            })
    }

    fn encode(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Probe {
        target: String,
    }

    impl StepConfig for Probe {}

    struct Noop;

    #[async_trait]
    impl StepExecutor for Noop {
        async fn execute(
            &self,
            _step: &WorkflowStep,
            _execution: &StepExecution,
            _case: &CaseWorkflow,
        ) -> anyhow::Result<StepResult> {
            Ok(StepResult::success("ok"))
        }
    }

    #[test]
    fn test_decode_config() {
        let config = Probe {
            target: "fees".into(),
        };
        let step = WorkflowStep::new("s", StepType::Calculation, 1)
            .with_configuration(config.encode().unwrap());
        assert_eq!(Probe::decode(&step).unwrap(), config);
    }

    #[test]
    fn test_decode_missing_and_malformed() {
        let step = WorkflowStep::new("s", StepType::Calculation, 1);
        assert!(matches!(
            Probe::decode(&step),
            Err(StepConfigError::Missing { .. })
        ));
        assert!(Probe::decode_optional(&step).unwrap().is_none());

        let step = step.with_configuration("{not json");
        assert!(matches!(
            Probe::decode(&step),
            Err(StepConfigError::Malformed { .. })
        ));
    }

    #[test]
    fn test_registry_lookup() {
        let registry = ExecutorRegistry::new().with(StepType::Calculation, Arc::new(Noop));
        assert!(registry.contains(StepType::Calculation));
        assert!(registry.get(StepType::HumanTask).is_none());
        assert_eq!(registry.step_types(), vec![StepType::Calculation]);
    }

    #[test]
    fn test_pause_result_is_successful() {
        let result = StepResult::pause("{}");
        assert!(result.success && result.should_pause);
        assert!(!StepResult::failure("x").success);
    }
}
