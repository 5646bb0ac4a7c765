//! Built-in step executors

mod calculation;
mod decision_table;
mod external_task;

use std::sync::Arc;

pub use calculation::{CalculationConfig, CalculationExecutor};
pub use decision_table::{DecisionTableConfig, DecisionTableExecutor};
pub use external_task::{ExternalTaskConfig, ExternalTaskExecutor};

use crate::executor::ExecutorRegistry;
use crate::store::{FormulaSource, RuleSetSource, TaskStore};
use crate::types::StepType;

/// Registry with every built-in executor.
///
/// Document generation has no built-in executor; hosts register their own.
pub fn default_registry<S>(store: Arc<S>) -> ExecutorRegistry
where
    S: RuleSetSource + FormulaSource + TaskStore + 'static,
{
    ExecutorRegistry::new()
        .with(
            StepType::DecisionTable,
            Arc::new(DecisionTableExecutor::new(store.clone())),
        )
        .with(
            StepType::Calculation,
            Arc::new(CalculationExecutor::new(store.clone())),
        )
        .with(
            StepType::HumanTask,
            Arc::new(ExternalTaskExecutor::human_task(store.clone())),
        )
        .with(
            StepType::ClientApproval,
            Arc::new(ExternalTaskExecutor::client_approval(store)),
        )
}
