use async_trait::async_trait;
use caseflow_eval::rules::{DecisionOutcome, RuleEvaluator};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;

use crate::context::EvaluationInputs;
use crate::executor::{StepConfig, StepExecutor, StepResult};
use crate::store::RuleSetSource;
use crate::types::{CaseWorkflow, StepExecution, WorkflowStep};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionTableConfig {
    pub rule_set_id: String,
}

impl StepConfig for DecisionTableConfig {}

/// Evaluates a rule set against the step's inputs. Never pauses.
pub struct DecisionTableExecutor {
    rule_sets: Arc<dyn RuleSetSource>,
    evaluator: RuleEvaluator,
}

impl DecisionTableExecutor {
    pub fn new(rule_sets: Arc<dyn RuleSetSource>) -> Self {
        Self {
            rule_sets,
            evaluator: RuleEvaluator::new(),
        }
    }
}

#[async_trait]
impl StepExecutor for DecisionTableExecutor {
    async fn execute(
        &self,
        step: &WorkflowStep,
        execution: &StepExecution,
        case: &CaseWorkflow,
    ) -> anyhow::Result<StepResult> {
        let config = match DecisionTableConfig::decode(step) {
            Ok(config) => config,
            Err(e) => return Ok(StepResult::failure(e.to_string())),
        };

        let Some(rule_set) = self.rule_sets.load_rule_set(&config.rule_set_id).await? else {
            return Ok(StepResult::failure(format!(
                "Rule set not found: {}",
                config.rule_set_id
            )));
        };

        let inputs = EvaluationInputs::for_execution(execution, case)?;
        let output = match self.evaluator.evaluate(&rule_set, inputs.strings()) {
            DecisionOutcome::Matched { rule_id, outputs } => json!({
                "matched": true,
                "rule_id": rule_id,
                "outputs": outputs,
            }),
            DecisionOutcome::NoMatch => json!({
                "matched": false,
                "rule_id": null,
                "outputs": {},
            }),
        };

        tracing::debug!(
            step_id = %step.id,
            rule_set = %rule_set.id,
            matched = output["matched"].as_bool().unwrap_or(false),
            "Decision table evaluated"
        );

        Ok(StepResult::success(output.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::WorkflowContext;
    use crate::memory::MemoryStore;
    use crate::types::{StepType, WorkflowTemplate};
    use caseflow_eval::rules::{Condition, Operator, Rule, RuleSet};

    async fn executor() -> DecisionTableExecutor {
        let store = Arc::new(MemoryStore::new());
        let rule_set = RuleSet::new("risk").with_rule(
            Rule::new("offshore", 1)
                .when(Condition::new("jurisdiction", Operator::Equals, "KY"))
                .output("risk_level", "HIGH"),
        );
        store.save_rule_set(&rule_set).await.unwrap();
        DecisionTableExecutor::new(store)
    }

    fn run_args(config: &str, jurisdiction: &str) -> (WorkflowStep, StepExecution, CaseWorkflow) {
        let step = WorkflowStep::new("risk", StepType::DecisionTable, 1).with_configuration(config);
        let template = WorkflowTemplate::new("t", 1).with_step(step.clone());
        let mut case = CaseWorkflow::new("case-1", &template);
        case.case_data.insert("jurisdiction".into(), jurisdiction.into());
        let mut execution = StepExecution::new(&step);
        execution.start(WorkflowContext::new().to_json().unwrap());
        (step, execution, case)
    }

    #[tokio::test]
    async fn test_match_returns_outputs() {
        let executor = executor().await;
        let (step, execution, case) = run_args(r#"{"rule_set_id":"risk"}"#, "ky");
        let result = executor.execute(&step, &execution, &case).await.unwrap();

        assert!(result.success && !result.should_pause);
        let output: serde_json::Value =
            serde_json::from_str(result.output_data.as_deref().unwrap()).unwrap();
        assert_eq!(output["matched"], true);
        assert_eq!(output["rule_id"], "offshore");
        assert_eq!(output["outputs"]["risk_level"], "HIGH");
    }

    #[tokio::test]
    async fn test_no_match_is_still_success() {
        let executor = executor().await;
        let (step, execution, case) = run_args(r#"{"rule_set_id":"risk"}"#, "GB");
        let result = executor.execute(&step, &execution, &case).await.unwrap();

        assert!(result.success);
        let output: serde_json::Value =
            serde_json::from_str(result.output_data.as_deref().unwrap()).unwrap();
        assert_eq!(output["matched"], false);
        assert!(output["rule_id"].is_null());
    }

    #[tokio::test]
    async fn test_missing_rule_set_fails_step() {
        let executor = executor().await;
        let (step, execution, case) = run_args(r#"{"rule_set_id":"nope"}"#, "KY");
        let result = executor.execute(&step, &execution, &case).await.unwrap();
        assert!(!result.success);
        assert_eq!(result.error_message.as_deref(), Some("Rule set not found: nope"));
    }

    #[tokio::test]
    async fn test_bad_config_fails_step() {
        let executor = executor().await;
        let (step, execution, case) = run_args(r#"{"rules":"risk"}"#, "KY");
        let result = executor.execute(&step, &execution, &case).await.unwrap();
        assert!(!result.success);
        assert!(result.error_message.unwrap().contains("malformed configuration"));
    }
}
