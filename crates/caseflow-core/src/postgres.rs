//! Postgres store
//!
//! NOTE: All queries use runtime-checked sqlx::query() so the crate builds
//! without a database; the schema lives in `migrations/`.

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use caseflow_eval::rules::RuleSet;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::types::Json;
use sqlx::{PgPool, Row};
use std::collections::BTreeMap;
use uuid::Uuid;

use crate::catalog::Formula;
use crate::store::{FormulaSource, RuleSetSource, TaskStore, WorkflowStore};
use crate::tasks::PendingTask;
use crate::types::{CaseWorkflow, StepExecution, WorkflowStatus, WorkflowStep, WorkflowTemplate};

const SCHEMA: &str = include_str!("../../../migrations/0001_caseflow.sql");

pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await
            .context("Failed to connect to database")?;
        Ok(Self::new(pool))
    }

    /// Apply the bundled schema (idempotent)
    pub async fn ensure_schema(&self) -> Result<()> {
        sqlx::raw_sql(SCHEMA)
            .execute(&self.pool)
            .await
            .context("Failed to apply caseflow schema")?;
        Ok(())
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

fn version_param(version: u32) -> Result<i32> {
    i32::try_from(version).map_err(|_| anyhow!("Template version {} out of range", version))
}

fn template_from_row(row: &PgRow) -> Result<WorkflowTemplate> {
    let version: i32 = row.try_get("version")?;
    let Json(steps): Json<Vec<WorkflowStep>> = row.try_get("steps")?;
    Ok(WorkflowTemplate {
        id: row.try_get("id")?,
        version: u32::try_from(version)?,
        name: row.try_get("name")?,
        description: row.try_get("description")?,
        steps,
        published_at: row.try_get("published_at")?,
    })
}

fn execution_from_row(row: &PgRow) -> Result<StepExecution> {
    let status: String = row.try_get("status")?;
    Ok(StepExecution {
        id: row.try_get("id")?,
        step_id: row.try_get("step_id")?,
        step_name: row.try_get("step_name")?,
        status: status.parse().map_err(|e: String| anyhow!(e))?,
        input_data: row.try_get("input_data")?,
        output_data: row.try_get("output_data")?,
        error_message: row.try_get("error_message")?,
        started_at: row.try_get("started_at")?,
        completed_at: row.try_get("completed_at")?,
    })
}

fn task_from_row(row: &PgRow) -> Result<PendingTask> {
    let kind: String = row.try_get("kind")?;
    let status: String = row.try_get("status")?;
    Ok(PendingTask {
        id: row.try_get("id")?,
        case_workflow_id: row.try_get("case_workflow_id")?,
        step_id: row.try_get("step_id")?,
        execution_id: row.try_get("execution_id")?,
        kind: kind.parse().map_err(|e: String| anyhow!(e))?,
        title: row.try_get("title")?,
        assignee: row.try_get("assignee")?,
        instructions: row.try_get("instructions")?,
        status: status.parse().map_err(|e: String| anyhow!(e))?,
        created_at: row.try_get("created_at")?,
        resolved_at: row.try_get("resolved_at")?,
        resolved_by: row.try_get("resolved_by")?,
        resolution_output: row.try_get("resolution_output")?,
    })
}

#[async_trait]
impl WorkflowStore for PgStore {
    async fn save_template(&self, template: &WorkflowTemplate) -> Result<()> {
        if let Some(existing) = self.load_template(&template.id, template.version).await? {
            if existing.is_published() && existing != *template {
                bail!(
                    "Template {} v{} is published and cannot be changed",
                    template.id,
                    template.version
                );
            }
        }

        sqlx::query(
            r#"
            INSERT INTO caseflow_templates (id, version, name, description, steps, published_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (id, version) DO UPDATE
            SET name = EXCLUDED.name,
                description = EXCLUDED.description,
                steps = EXCLUDED.steps,
                published_at = EXCLUDED.published_at
            "#,
        )
        .bind(&template.id)
        .bind(version_param(template.version)?)
        .bind(&template.name)
        .bind(&template.description)
        .bind(Json(&template.steps))
        .bind(template.published_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn load_template(&self, id: &str, version: u32) -> Result<Option<WorkflowTemplate>> {
        let row = sqlx::query(
            r#"
            SELECT id, version, name, description, steps, published_at
            FROM caseflow_templates
            WHERE id = $1 AND version = $2
            "#,
        )
        .bind(id)
        .bind(version_param(version)?)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(template_from_row).transpose()
    }

    async fn latest_template_version(&self, id: &str) -> Result<Option<u32>> {
        let version: Option<i32> = sqlx::query_scalar(
            r#"
            SELECT MAX(version) FROM caseflow_templates
            WHERE id = $1 AND published_at IS NOT NULL
            "#,
        )
        .bind(id)
        .fetch_one(&self.pool)
        .await?;

        Ok(version.map(u32::try_from).transpose()?)
    }

    async fn save_case_workflow(&self, case: &CaseWorkflow) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO caseflow_case_workflows
                (id, case_id, template_id, template_version, status, current_step_id,
                 case_data, started_at, completed_at, error_message, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            ON CONFLICT (id) DO UPDATE
            SET status = EXCLUDED.status,
                current_step_id = EXCLUDED.current_step_id,
                case_data = EXCLUDED.case_data,
                started_at = EXCLUDED.started_at,
                completed_at = EXCLUDED.completed_at,
                error_message = EXCLUDED.error_message,
                updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(case.id)
        .bind(&case.case_id)
        .bind(&case.template_id)
        .bind(version_param(case.template_version)?)
        .bind(case.status.as_str())
        .bind(&case.current_step_id)
        .bind(Json(&case.case_data))
        .bind(case.started_at)
        .bind(case.completed_at)
        .bind(&case.error_message)
        .bind(case.created_at)
        .bind(case.updated_at)
        .execute(&mut *tx)
        .await?;

        sqlx::query("DELETE FROM caseflow_step_executions WHERE case_workflow_id = $1")
            .bind(case.id)
            .execute(&mut *tx)
            .await?;

        for (seq, execution) in case.executions.iter().enumerate() {
            sqlx::query(
                r#"
                INSERT INTO caseflow_step_executions
                    (id, case_workflow_id, seq, step_id, step_name, status, input_data,
                     output_data, error_message, started_at, completed_at)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
                "#,
            )
            .bind(execution.id)
            .bind(case.id)
            .bind(i32::try_from(seq)?)
            .bind(&execution.step_id)
            .bind(&execution.step_name)
            .bind(execution.status.as_str())
            .bind(&execution.input_data)
            .bind(&execution.output_data)
            .bind(&execution.error_message)
            .bind(execution.started_at)
            .bind(execution.completed_at)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn load_case_workflow(&self, id: Uuid) -> Result<Option<CaseWorkflow>> {
        let Some(row) = sqlx::query(
            r#"
            SELECT id, case_id, template_id, template_version, status, current_step_id,
                   case_data, started_at, completed_at, error_message, created_at, updated_at
            FROM caseflow_case_workflows
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        else {
            return Ok(None);
        };

        let executions = sqlx::query(
            r#"
            SELECT id, step_id, step_name, status, input_data, output_data, error_message,
                   started_at, completed_at
            FROM caseflow_step_executions
            WHERE case_workflow_id = $1
            ORDER BY seq
            "#,
        )
        .bind(id)
        .fetch_all(&self.pool)
        .await?
        .iter()
        .map(execution_from_row)
        .collect::<Result<Vec<_>>>()?;

        let status: String = row.try_get("status")?;
        let version: i32 = row.try_get("template_version")?;
        let Json(case_data): Json<BTreeMap<String, String>> = row.try_get("case_data")?;
        let created_at: DateTime<Utc> = row.try_get("created_at")?;

        Ok(Some(CaseWorkflow {
            id: row.try_get("id")?,
            case_id: row.try_get("case_id")?,
            template_id: row.try_get("template_id")?,
            template_version: u32::try_from(version)?,
            status: status.parse().map_err(|e: String| anyhow!(e))?,
            current_step_id: row.try_get("current_step_id")?,
            case_data,
            started_at: row.try_get("started_at")?,
            completed_at: row.try_get("completed_at")?,
            error_message: row.try_get("error_message")?,
            executions,
            created_at,
            updated_at: row.try_get("updated_at")?,
        }))
    }

    async fn load_status(&self, id: Uuid) -> Result<Option<WorkflowStatus>> {
        let status: Option<String> =
            sqlx::query_scalar("SELECT status FROM caseflow_case_workflows WHERE id = $1")
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;

        status
            .map(|s| s.parse().map_err(|e: String| anyhow!(e)))
            .transpose()
    }
}

#[async_trait]
impl RuleSetSource for PgStore {
    async fn save_rule_set(&self, rule_set: &RuleSet) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO caseflow_rule_sets (id, document)
            VALUES ($1, $2)
            ON CONFLICT (id) DO UPDATE SET document = EXCLUDED.document
            "#,
        )
        .bind(&rule_set.id)
        .bind(Json(rule_set))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn load_rule_set(&self, id: &str) -> Result<Option<RuleSet>> {
        let document: Option<Json<RuleSet>> =
            sqlx::query_scalar("SELECT document FROM caseflow_rule_sets WHERE id = $1")
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(document.map(|Json(rule_set)| rule_set))
    }
}

#[async_trait]
impl FormulaSource for PgStore {
    async fn save_formula(&self, formula: &Formula) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO caseflow_formulas (id, name, expression, description)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (id) DO UPDATE
            SET name = EXCLUDED.name,
                expression = EXCLUDED.expression,
                description = EXCLUDED.description
            "#,
        )
        .bind(&formula.id)
        .bind(&formula.name)
        .bind(&formula.expression)
        .bind(&formula.description)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn load_formula(&self, id: &str) -> Result<Option<Formula>> {
        let row = sqlx::query(
            "SELECT id, name, expression, description FROM caseflow_formulas WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|row| {
            Ok(Formula {
                id: row.try_get("id")?,
                name: row.try_get("name")?,
                expression: row.try_get("expression")?,
                description: row.try_get("description")?,
            })
        })
        .transpose()
    }
}

#[async_trait]
impl TaskStore for PgStore {
    async fn save_task(&self, task: &PendingTask) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO caseflow_pending_tasks
                (id, case_workflow_id, step_id, execution_id, kind, title, assignee,
                 instructions, status, created_at, resolved_at, resolved_by, resolution_output)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            ON CONFLICT (id) DO UPDATE
            SET status = EXCLUDED.status,
                resolved_at = EXCLUDED.resolved_at,
                resolved_by = EXCLUDED.resolved_by,
                resolution_output = EXCLUDED.resolution_output
            "#,
        )
        .bind(task.id)
        .bind(task.case_workflow_id)
        .bind(&task.step_id)
        .bind(task.execution_id)
        .bind(task.kind.as_str())
        .bind(&task.title)
        .bind(&task.assignee)
        .bind(&task.instructions)
        .bind(task.status.as_str())
        .bind(task.created_at)
        .bind(task.resolved_at)
        .bind(&task.resolved_by)
        .bind(&task.resolution_output)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn load_task(&self, id: Uuid) -> Result<Option<PendingTask>> {
        let row = sqlx::query(
            r#"
            SELECT id, case_workflow_id, step_id, execution_id, kind, title, assignee,
                   instructions, status, created_at, resolved_at, resolved_by, resolution_output
            FROM caseflow_pending_tasks
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(task_from_row).transpose()
    }

    async fn tasks_for_case(&self, case_workflow_id: Uuid) -> Result<Vec<PendingTask>> {
        sqlx::query(
            r#"
            SELECT id, case_workflow_id, step_id, execution_id, kind, title, assignee,
                   instructions, status, created_at, resolved_at, resolved_by, resolution_output
            FROM caseflow_pending_tasks
            WHERE case_workflow_id = $1
            ORDER BY created_at
            "#,
        )
        .bind(case_workflow_id)
        .fetch_all(&self.pool)
        .await?
        .iter()
        .map(task_from_row)
        .collect()
    }
}
