//! Workflow context and evaluation inputs
//!
//! The context maps each completed step's name to its output, in completion
//! order. It is always rebuilt from persisted step executions so a resumed
//! workflow sees exactly what an uninterrupted one would have seen.

use rust_decimal::Decimal;
use serde::de::{MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use crate::types::{CaseWorkflow, StepExecution, StepStatus};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WorkflowContext {
    entries: Vec<(String, String)>,
}

impl WorkflowContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replay completed executions by completion time.
    pub fn from_executions(executions: &[StepExecution]) -> Self {
        let mut completed: Vec<_> = executions
            .iter()
            .filter(|e| e.status == StepStatus::Completed)
            .collect();
        completed.sort_by_key(|e| e.completed_at);

        let mut context = Self::new();
        for execution in completed {
            if let Some(output) = &execution.output_data {
                context.insert(execution.step_name.clone(), output.clone());
            }
        }
        context
    }

    /// Insert or replace; a replaced entry moves to the end.
    pub fn insert(&mut self, step_name: impl Into<String>, output: impl Into<String>) {
        let step_name = step_name.into();
        self.entries.retain(|(name, _)| *name != step_name);
        self.entries.push((step_name, output.into()));
    }

    pub fn get(&self, step_name: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(name, _)| name == step_name)
            .map(|(_, output)| output.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}

impl Serialize for WorkflowContext {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (name, output) in &self.entries {
            map.serialize_entry(name, output)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for WorkflowContext {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct ContextVisitor;

        impl<'de> Visitor<'de> for ContextVisitor {
            type Value = WorkflowContext;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a map of step name to output")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Self::Value, A::Error> {
                let mut context = WorkflowContext::new();
                while let Some((name, output)) = access.next_entry::<String, String>()? {
                    context.insert(name, output);
                }
                Ok(context)
            }
        }

        deserializer.deserialize_map(ContextVisitor)
    }
}

/// Flat key → value view that evaluators run against.
///
/// Built from the case data first, then each context entry: the raw output
/// under the step name and, when the output is a JSON object, every scalar
/// leaf under `step.path.to.field`. Later keys override earlier ones.
#[derive(Debug, Clone, Default)]
pub struct EvaluationInputs {
    values: HashMap<String, String>,
}

impl EvaluationInputs {
    pub fn build(case: &CaseWorkflow, context: &WorkflowContext) -> Self {
        let mut values: HashMap<String, String> = case
            .case_data
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();

        for (name, output) in context.iter() {
            values.insert(name.to_string(), output.to_string());
            if let Ok(serde_json::Value::Object(fields)) = serde_json::from_str(output) {
                for (field, value) in &fields {
                    flatten_into(&mut values, format!("{name}.{field}"), value);
                }
            }
        }

        Self { values }
    }

    /// Inputs for an execution, from the context snapshot taken when it started.
    pub fn for_execution(
        execution: &StepExecution,
        case: &CaseWorkflow,
    ) -> Result<Self, serde_json::Error> {
        let context = match &execution.input_data {
            Some(json) => WorkflowContext::from_json(json)?,
            None => WorkflowContext::new(),
        };
        Ok(Self::build(case, &context))
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    pub fn strings(&self) -> &HashMap<String, String> {
        &self.values
    }

    /// Only the values that parse as decimals
    pub fn decimals(&self) -> HashMap<String, Decimal> {
        self.values
            .iter()
            .filter_map(|(k, v)| Decimal::from_str(v.trim()).ok().map(|d| (k.clone(), d)))
            .collect()
    }
}

fn flatten_into(values: &mut HashMap<String, String>, path: String, value: &serde_json::Value) {
    use serde_json::Value;
    match value {
        Value::String(s) => {
            values.insert(path, s.clone());
        }
        Value::Number(n) => {
            values.insert(path, n.to_string());
        }
        Value::Bool(b) => {
            values.insert(path, b.to_string());
        }
        Value::Object(fields) => {
            for (field, nested) in fields {
                flatten_into(values, format!("{path}.{field}"), nested);
            }
        }
        Value::Null | Value::Array(_) => {}
    }
}
