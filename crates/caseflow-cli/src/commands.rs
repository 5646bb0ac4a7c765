//! Subcommands

use anyhow::{anyhow, bail, Context, Result};
use caseflow_core::executors::default_registry;
use caseflow_core::{
    CaseWorkflow, Catalog, FormulaSource, MemoryStore, RuleSetSource, TaskCompletionHandler,
    TaskResolution, TaskStore, WorkflowEngine, WorkflowStore,
};
use caseflow_eval::RuleEvaluator;
use clap::Subcommand;
use rust_decimal::Decimal;
use std::collections::{BTreeMap, HashMap};
use std::str::FromStr;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

use crate::config::CliConfig;

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Load the catalog and check every template, rule set and formula
    Validate,

    /// Open a case workflow from a template and start it
    Run {
        /// Template id
        template_id: String,

        /// Template version (latest published if omitted)
        #[arg(long)]
        version: Option<u32>,

        /// Case identifier (generated if omitted)
        #[arg(long)]
        case_id: Option<String>,

        /// Case data entry, repeatable
        #[arg(long = "data", value_name = "KEY=VALUE", value_parser = parse_key_value)]
        data: Vec<(String, String)>,
    },

    /// Resume a paused case workflow
    Resume {
        case_workflow_id: Uuid,
    },

    /// Cancel a case workflow
    Cancel {
        case_workflow_id: Uuid,

        #[arg(long)]
        reason: Option<String>,
    },

    /// Resolve a pending task and resume its workflow
    CompleteTask {
        task_id: Uuid,

        /// Record the task as rejected instead of completed
        #[arg(long)]
        rejected: bool,

        /// Resolution payload as JSON
        #[arg(long)]
        output: Option<String>,

        /// Who resolved the task
        #[arg(long)]
        by: Option<String>,
    },

    /// Evaluate an expression against decimal variables
    EvalExpr {
        expression: String,

        /// Variable binding, repeatable
        #[arg(long = "var", value_name = "NAME=VALUE", value_parser = parse_key_value)]
        vars: Vec<(String, String)>,
    },

    /// Evaluate a catalog rule set against string inputs
    EvalRules {
        rule_set_id: String,

        /// Input column, repeatable
        #[arg(long = "input", value_name = "KEY=VALUE", value_parser = parse_key_value)]
        inputs: Vec<(String, String)>,
    },
}

/// Parse a `key=value` argument. The value may itself contain `=`.
pub fn parse_key_value(raw: &str) -> Result<(String, String), String> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected KEY=VALUE, got '{raw}'"))?;
    let key = key.trim();
    if key.is_empty() {
        return Err(format!("empty key in '{raw}'"));
    }
    Ok((key.to_string(), value.to_string()))
}

pub async fn execute(command: Command, config: &CliConfig) -> Result<()> {
    match command {
        Command::Validate => validate(config),
        Command::Run {
            template_id,
            version,
            case_id,
            data,
        } => run(config, &template_id, version, case_id, data).await,
        Command::Resume { case_workflow_id } => {
            let runtime = Runtime::open(config, "resume").await?;
            let case = runtime.engine.resume_by_id(case_workflow_id).await?;
            runtime.print_case(&case).await
        }
        Command::Cancel {
            case_workflow_id,
            reason,
        } => {
            let runtime = Runtime::open(config, "cancel").await?;
            let case = runtime.engine.cancel_by_id(case_workflow_id, reason).await?;
            runtime.print_case(&case).await
        }
        Command::CompleteTask {
            task_id,
            rejected,
            output,
            by,
        } => {
            let mut resolution = if rejected {
                TaskResolution::rejected()
            } else {
                TaskResolution::completed()
            };
            if let Some(output) = output {
                let value = serde_json::from_str(&output).context("--output is not valid JSON")?;
                resolution = resolution.with_output(value);
            }
            if let Some(by) = by {
                resolution = resolution.by(by);
            }

            let runtime = Runtime::open(config, "complete-task").await?;
            let handler = TaskCompletionHandler::new(runtime.engine.clone(), runtime.tasks.clone());
            let case = handler.complete(task_id, resolution).await?;
            runtime.print_case(&case).await
        }
        Command::EvalExpr { expression, vars } => eval_expr(&expression, vars),
        Command::EvalRules {
            rule_set_id,
            inputs,
        } => eval_rules(config, &rule_set_id, inputs),
    }
}

fn validate(config: &CliConfig) -> Result<()> {
    let loader = config.catalog_loader();
    let catalog = loader.load()?;

    println!("Catalog: {}", loader.config_dir().display());
    for template in &catalog.templates {
        println!(
            "  template  {} v{} ({} steps)",
            template.id,
            template.version,
            template.steps.len()
        );
    }
    for rule_set in &catalog.rule_sets {
        println!("  rule set  {} ({} rules)", rule_set.id, rule_set.rules.len());
    }
    for formula in &catalog.formulas {
        println!("  formula   {}", formula.id);
    }
    println!("OK");
    Ok(())
}

async fn run(
    config: &CliConfig,
    template_id: &str,
    version: Option<u32>,
    case_id: Option<String>,
    data: Vec<(String, String)>,
) -> Result<()> {
    let runtime = Runtime::open(config, "run").await?;
    if !runtime.persistent {
        info!("No database configured; the case workflow is not kept after this run");
    }

    let case_id = case_id.unwrap_or_else(|| Uuid::new_v4().to_string());
    let case_data: BTreeMap<String, String> = data.into_iter().collect();

    let mut case = runtime
        .engine
        .open_case(&case_id, template_id, version, case_data)
        .await?;
    if let Err(e) = runtime.engine.start(&mut case).await {
        runtime.print_case(&case).await?;
        return Err(e.into());
    }
    runtime.print_case(&case).await
}

fn eval_expr(expression: &str, vars: Vec<(String, String)>) -> Result<()> {
    let mut inputs = HashMap::new();
    for (name, raw) in vars {
        let value = Decimal::from_str(raw.trim())
            .map_err(|e| anyhow!("variable {name}: '{raw}' is not a decimal ({e})"))?;
        inputs.insert(name, value);
    }

    let value = caseflow_eval::evaluate(expression, &inputs)?;
    println!("{}", value.normalize());
    Ok(())
}

fn eval_rules(config: &CliConfig, rule_set_id: &str, inputs: Vec<(String, String)>) -> Result<()> {
    let catalog = config.catalog_loader().load()?;
    let Some(rule_set) = catalog.rule_set(rule_set_id) else {
        bail!("Rule set not found: {rule_set_id}");
    };

    let inputs: HashMap<String, String> = inputs.into_iter().collect();
    let outcome = RuleEvaluator::new().evaluate(rule_set, &inputs);
    println!("{}", serde_json::to_string_pretty(&outcome)?);
    Ok(())
}

/// Engine and task store wired to whichever backend is configured
struct Runtime {
    engine: Arc<WorkflowEngine>,
    tasks: Arc<dyn TaskStore>,
    persistent: bool,
}

impl Runtime {
    fn build<S>(store: Arc<S>, config: &CliConfig, persistent: bool) -> Self
    where
        S: WorkflowStore + RuleSetSource + FormulaSource + TaskStore + 'static,
    {
        let engine = WorkflowEngine::new(store.clone(), default_registry(store.clone()))
            .with_config(config.engine_config());
        Self {
            engine: Arc::new(engine),
            tasks: store,
            persistent,
        }
    }

    /// Load the catalog, install it into the store and build the engine.
    ///
    /// Every command except `run` acts on state from an earlier invocation,
    /// so it refuses to start without a persistent store.
    async fn open(config: &CliConfig, command: &str) -> Result<Self> {
        let catalog = config.catalog_loader().load()?;

        #[cfg(feature = "database")]
        if let Some(url) = &config.database_url {
            let store = Arc::new(caseflow_core::PgStore::connect(url).await?);
            store.ensure_schema().await?;
            install(&catalog, store.as_ref()).await?;
            return Ok(Self::build(store, config, true));
        }

        #[cfg(not(feature = "database"))]
        if config.database_url.is_some() {
            tracing::warn!("CASEFLOW_DATABASE_URL is set but this build has no database feature");
        }

        if command != "run" {
            bail!(
                "`{command}` needs a persistent store: build with --features database \
                 and set CASEFLOW_DATABASE_URL"
            );
        }

        let store = Arc::new(MemoryStore::new());
        install(&catalog, store.as_ref()).await?;
        Ok(Self::build(store, config, false))
    }

    async fn print_case(&self, case: &CaseWorkflow) -> Result<()> {
        let tasks = self.tasks.tasks_for_case(case.id).await?;
        let report = serde_json::json!({
            "case_workflow": case,
            "tasks": tasks,
        });
        println!("{}", serde_json::to_string_pretty(&report)?);
        Ok(())
    }
}

async fn install<S>(catalog: &Catalog, store: &S) -> Result<()>
where
    S: WorkflowStore + RuleSetSource + FormulaSource,
{
    catalog.install(store).await.context("Failed to install catalog")
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_parse_key_value() {
        assert_eq!(
            parse_key_value("aum=2000000").unwrap(),
            ("aum".to_string(), "2000000".to_string())
        );
        assert_eq!(
            parse_key_value(" note =a=b").unwrap(),
            ("note".to_string(), "a=b".to_string())
        );
        assert_eq!(
            parse_key_value("empty=").unwrap(),
            ("empty".to_string(), String::new())
        );
    }

    #[test]
    fn test_parse_key_value_rejects_malformed() {
        assert!(parse_key_value("no-separator").is_err());
        assert!(parse_key_value("=value").is_err());
    }

    #[test]
    fn test_eval_expr_rejects_non_decimal_variable() {
        let err = eval_expr("a + 1", vec![("a".into(), "ten".into())]).unwrap_err();
        assert!(err.to_string().contains("variable a"));
    }

    #[tokio::test]
    async fn test_resume_without_database_is_refused() {
        let config = CliConfig {
            config_dir: Some(concat!(env!("CARGO_MANIFEST_DIR"), "/../../config").into()),
            database_url: None,
            max_step_visits: 10,
        };
        let err = Runtime::open(&config, "resume").await.err().unwrap();
        assert!(err.to_string().contains("needs a persistent store"));
    }
}
