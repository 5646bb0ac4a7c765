use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::context::EvaluationInputs;
use crate::executor::{StepConfig, StepExecutor, StepResult};
use crate::store::FormulaSource;
use crate::types::{CaseWorkflow, StepExecution, WorkflowStep};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalculationConfig {
    pub formula_id: String,
}

impl StepConfig for CalculationConfig {}

/// Evaluates a formula; the output is the decimal result as a plain string.
pub struct CalculationExecutor {
    formulas: Arc<dyn FormulaSource>,
}

impl CalculationExecutor {
    pub fn new(formulas: Arc<dyn FormulaSource>) -> Self {
        Self { formulas }
    }
}

#[async_trait]
impl StepExecutor for CalculationExecutor {
    async fn execute(
        &self,
        step: &WorkflowStep,
        execution: &StepExecution,
        case: &CaseWorkflow,
    ) -> anyhow::Result<StepResult> {
        let config = match CalculationConfig::decode(step) {
            Ok(config) => config,
            Err(e) => return Ok(StepResult::failure(e.to_string())),
        };

        let Some(formula) = self.formulas.load_formula(&config.formula_id).await? else {
            return Ok(StepResult::failure(format!(
                "Formula not found: {}",
                config.formula_id
            )));
        };

        let inputs = EvaluationInputs::for_execution(execution, case)?;
        match caseflow_eval::evaluate(&formula.expression, &inputs.decimals()) {
            Ok(value) => Ok(StepResult::success(value.normalize().to_string())),
            Err(e) => {
                tracing::debug!(
                    step_id = %step.id,
                    formula = %formula.id,
                    error = %e,
                    "Formula evaluation failed"
                );
                Ok(StepResult::failure(format!("Formula {}: {}", formula.id, e)))
            }
        }
    }
}
