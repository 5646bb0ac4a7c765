//! In-memory store for tests and database-less runs

use anyhow::{bail, Result};
use async_trait::async_trait;
use caseflow_eval::rules::RuleSet;
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::catalog::Formula;
use crate::store::{FormulaSource, RuleSetSource, TaskStore, WorkflowStore};
use crate::tasks::PendingTask;
use crate::types::{CaseWorkflow, WorkflowStatus, WorkflowTemplate};

pub struct MemoryStore {
    templates: RwLock<HashMap<(String, u32), WorkflowTemplate>>,
    cases: RwLock<HashMap<Uuid, CaseWorkflow>>,
    rule_sets: RwLock<HashMap<String, RuleSet>>,
    formulas: RwLock<HashMap<String, Formula>>,
    tasks: RwLock<HashMap<Uuid, PendingTask>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            templates: RwLock::new(HashMap::new()),
            cases: RwLock::new(HashMap::new()),
            rule_sets: RwLock::new(HashMap::new()),
            formulas: RwLock::new(HashMap::new()),
            tasks: RwLock::new(HashMap::new()),
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl WorkflowStore for MemoryStore {
    async fn save_template(&self, template: &WorkflowTemplate) -> Result<()> {
        let mut templates = self.templates.write().await;
        let key = (template.id.clone(), template.version);
        if let Some(existing) = templates.get(&key) {
            if existing.is_published() && existing != template {
                bail!(
                    "Template {} v{} is published and cannot be changed",
                    template.id,
                    template.version
                );
            }
        }
        templates.insert(key, template.clone());
        Ok(())
    }

    async fn load_template(&self, id: &str, version: u32) -> Result<Option<WorkflowTemplate>> {
        let templates = self.templates.read().await;
        Ok(templates.get(&(id.to_string(), version)).cloned())
    }

    async fn latest_template_version(&self, id: &str) -> Result<Option<u32>> {
        let templates = self.templates.read().await;
        Ok(templates
            .values()
            .filter(|t| t.id == id && t.is_published())
            .map(|t| t.version)
            .max())
    }

    async fn save_case_workflow(&self, case: &CaseWorkflow) -> Result<()> {
        let mut cases = self.cases.write().await;
        cases.insert(case.id, case.clone());
        Ok(())
    }

    async fn load_case_workflow(&self, id: Uuid) -> Result<Option<CaseWorkflow>> {
        let cases = self.cases.read().await;
        Ok(cases.get(&id).cloned())
    }

    async fn load_status(&self, id: Uuid) -> Result<Option<WorkflowStatus>> {
        let cases = self.cases.read().await;
        Ok(cases.get(&id).map(|c| c.status))
    }
}

#[async_trait]
impl RuleSetSource for MemoryStore {
    async fn save_rule_set(&self, rule_set: &RuleSet) -> Result<()> {
        let mut rule_sets = self.rule_sets.write().await;
        rule_sets.insert(rule_set.id.clone(), rule_set.clone());
        Ok(())
    }

    async fn load_rule_set(&self, id: &str) -> Result<Option<RuleSet>> {
        let rule_sets = self.rule_sets.read().await;
        Ok(rule_sets.get(id).cloned())
    }
}

#[async_trait]
impl FormulaSource for MemoryStore {
    async fn save_formula(&self, formula: &Formula) -> Result<()> {
        let mut formulas = self.formulas.write().await;
        formulas.insert(formula.id.clone(), formula.clone());
        Ok(())
    }

    async fn load_formula(&self, id: &str) -> Result<Option<Formula>> {
        let formulas = self.formulas.read().await;
        Ok(formulas.get(id).cloned())
    }
}

#[async_trait]
impl TaskStore for MemoryStore {
    async fn save_task(&self, task: &PendingTask) -> Result<()> {
        let mut tasks = self.tasks.write().await;
        tasks.insert(task.id, task.clone());
        Ok(())
    }

    async fn load_task(&self, id: Uuid) -> Result<Option<PendingTask>> {
        let tasks = self.tasks.read().await;
        Ok(tasks.get(&id).cloned())
    }

    async fn tasks_for_case(&self, case_workflow_id: Uuid) -> Result<Vec<PendingTask>> {
        let tasks = self.tasks.read().await;
        let mut found: Vec<_> = tasks
            .values()
            .filter(|t| t.case_workflow_id == case_workflow_id)
            .cloned()
            .collect();
        found.sort_by_key(|t| t.created_at);
        Ok(found)
    }
}
