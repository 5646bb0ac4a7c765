//! Catalog loader
//!
//! Loads workflow templates, rule sets and formulas from a YAML directory:
//!
//! ```text
//! config/
//!   templates/*.yaml
//!   rules/*.yaml
//!   formulas/*.yaml
//! ```

use anyhow::{anyhow, bail, Context, Result};
use caseflow_eval::rules::{load_rule_sets, RuleSet};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::executor::StepConfig;
use crate::executors::{CalculationConfig, DecisionTableConfig};
use crate::store::{FormulaSource, RuleSetSource, WorkflowStore};
use crate::types::{StepType, WorkflowStep, WorkflowTemplate};

/// A named expression evaluated by calculation steps
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Formula {
    pub id: String,
    #[serde(default)]
    pub name: String,
    pub expression: String,
    #[serde(default)]
    pub description: Option<String>,
}

impl Formula {
    pub fn new(id: impl Into<String>, expression: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            expression: expression.into(),
            description: None,
        }
    }
}

#[derive(Debug, Deserialize)]
struct TemplateDocument {
    id: String,
    #[serde(default = "default_version")]
    version: u32,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    steps: Vec<StepDocument>,
}

fn default_version() -> u32 {
    1
}

#[derive(Debug, Deserialize)]
struct StepDocument {
    id: String,
    #[serde(default)]
    name: Option<String>,
    #[serde(rename = "type")]
    step_type: StepType,
    #[serde(default)]
    sort_order: Option<i32>,
    #[serde(default = "default_required")]
    required: bool,
    #[serde(default)]
    next_step_on_success: Option<String>,
    #[serde(default)]
    next_step_on_failure: Option<String>,
    /// Nested mapping, stored on the step as a JSON blob
    #[serde(default)]
    config: Option<serde_json::Value>,
}

fn default_required() -> bool {
    true
}

impl TemplateDocument {
    fn into_template(self) -> Result<WorkflowTemplate> {
        let mut steps = Vec::with_capacity(self.steps.len());
        for (index, doc) in self.steps.into_iter().enumerate() {
            let configuration = doc
                .config
                .map(|c| serde_json::to_string(&c))
                .transpose()
                .with_context(|| format!("Failed to serialize config of step {}", doc.id))?;
            let default_order = i32::try_from(index).unwrap_or(i32::MAX);

            steps.push(WorkflowStep {
                name: doc.name.unwrap_or_else(|| doc.id.clone()),
                id: doc.id,
                step_type: doc.step_type,
                sort_order: doc.sort_order.unwrap_or(default_order),
                configuration,
                required: doc.required,
                next_step_on_success: doc.next_step_on_success,
                next_step_on_failure: doc.next_step_on_failure,
            });
        }

        Ok(WorkflowTemplate {
            name: self.name.unwrap_or_else(|| self.id.clone()),
            id: self.id,
            version: self.version,
            description: self.description,
            steps,
            published_at: None,
        })
    }
}

/// Parse a template document (for testing)
pub fn load_template_from_str(yaml: &str) -> Result<WorkflowTemplate> {
    let doc: TemplateDocument = serde_yaml::from_str(yaml)?;
    doc.into_template()
}

/// Parse a formula document: a `formulas:` list or a single formula
pub fn load_formulas_from_str(yaml: &str) -> Result<Vec<Formula>> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Document {
        Many { formulas: Vec<Formula> },
        One(Formula),
    }

    Ok(match serde_yaml::from_str::<Document>(yaml)? {
        Document::Many { formulas } => formulas,
        Document::One(formula) => vec![formula],
    })
}

/// Everything loaded from one catalog directory
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    pub templates: Vec<WorkflowTemplate>,
    pub rule_sets: Vec<RuleSet>,
    pub formulas: Vec<Formula>,
}

impl Catalog {
    pub fn template(&self, id: &str) -> Option<&WorkflowTemplate> {
        self.templates
            .iter()
            .filter(|t| t.id == id)
            .max_by_key(|t| t.version)
    }

    pub fn rule_set(&self, id: &str) -> Option<&RuleSet> {
        self.rule_sets.iter().find(|r| r.id == id)
    }

    pub fn formula(&self, id: &str) -> Option<&Formula> {
        self.formulas.iter().find(|f| f.id == id)
    }

    /// Check templates, formula syntax, and that every decision table and
    /// calculation step points at something in the catalog.
    pub fn validate(&self) -> Result<()> {
        let mut seen = HashSet::new();
        for template in &self.templates {
            if !seen.insert((template.id.as_str(), template.version)) {
                bail!("Duplicate template {} v{}", template.id, template.version);
            }
            template.validate()?;
        }

        let mut seen = HashSet::new();
        for rule_set in &self.rule_sets {
            if !seen.insert(rule_set.id.as_str()) {
                bail!("Duplicate rule set {}", rule_set.id);
            }
        }

        let mut seen = HashSet::new();
        for formula in &self.formulas {
            if !seen.insert(formula.id.as_str()) {
                bail!("Duplicate formula {}", formula.id);
            }
            caseflow_eval::validate_syntax(&formula.expression)
                .map_err(|e| anyhow!("Formula {}: {}", formula.id, e))?;
        }

        for template in &self.templates {
            for step in &template.steps {
                self.validate_reference(template, step)?;
            }
        }

        Ok(())
    }

    fn validate_reference(&self, template: &WorkflowTemplate, step: &WorkflowStep) -> Result<()> {
        let context = || format!("Template {} step {}", template.id, step.id);
        match step.step_type {
            StepType::DecisionTable => {
                let config = DecisionTableConfig::decode(step).with_context(context)?;
                if self.rule_set(&config.rule_set_id).is_none() {
                    bail!("{}: unknown rule set {}", context(), config.rule_set_id);
                }
            }
            StepType::Calculation => {
                let config = CalculationConfig::decode(step).with_context(context)?;
                if self.formula(&config.formula_id).is_none() {
                    bail!("{}: unknown formula {}", context(), config.formula_id);
                }
            }
            StepType::HumanTask | StepType::ClientApproval | StepType::DocumentGeneration => {}
        }
        Ok(())
    }

    /// Publish and register the catalog. Versions already published in the
    /// store are left as they are.
    pub async fn install<S>(&self, store: &S) -> Result<()>
    where
        S: WorkflowStore + RuleSetSource + FormulaSource,
    {
        for template in &self.templates {
            let stored = store.load_template(&template.id, template.version).await?;
            if let Some(existing) = stored.filter(|t| t.is_published()) {
                if existing.steps != template.steps {
                    warn!(
                        template_id = %template.id,
                        version = template.version,
                        "Catalog differs from the published version; keeping the published snapshot"
                    );
                }
                continue;
            }

            let mut template = template.clone();
            template.publish()?;
            store.save_template(&template).await?;
        }
        for rule_set in &self.rule_sets {
            store.save_rule_set(rule_set).await?;
        }
        for formula in &self.formulas {
            store.save_formula(formula).await?;
        }

        info!(
            "Installed {} templates, {} rule sets, {} formulas",
            self.templates.len(),
            self.rule_sets.len(),
            self.formulas.len()
        );
        Ok(())
    }
}

pub struct CatalogLoader {
    config_dir: PathBuf,
}

impl CatalogLoader {
    pub fn new(config_dir: impl Into<PathBuf>) -> Self {
        Self {
            config_dir: config_dir.into(),
        }
    }

    /// Create loader from CASEFLOW_CONFIG_DIR or the nearest `config` directory
    ///
    /// Path resolution order:
    /// 1. CASEFLOW_CONFIG_DIR environment variable
    /// 2. Relative "config" (running from the workspace root)
    /// 3. Traverse up from CARGO_MANIFEST_DIR (tests and `cargo run` in a crate)
    pub fn from_env() -> Self {
        if let Ok(dir) = std::env::var("CASEFLOW_CONFIG_DIR") {
            return Self::new(dir);
        }

        if Path::new("config/templates").exists() {
            return Self::new("config");
        }

        let manifest_dir = std::env::var("CARGO_MANIFEST_DIR")
            .unwrap_or_else(|_| env!("CARGO_MANIFEST_DIR").to_string());
        if let Some(found) = Self::find_workspace_config(Path::new(&manifest_dir)) {
            return Self::new(found);
        }

        Self::new("config")
    }

    fn find_workspace_config(start_dir: &Path) -> Option<PathBuf> {
        let mut current = start_dir;

        for _ in 0..5 {
            let config_path = current.join("config");
            if config_path.join("templates").exists() {
                return Some(config_path);
            }
            current = current.parent()?;
        }

        None
    }

    pub fn config_dir(&self) -> &Path {
        &self.config_dir
    }

    /// Load and validate the catalog
    pub fn load(&self) -> Result<Catalog> {
        if !self.config_dir.is_dir() {
            bail!("Catalog directory not found: {}", self.config_dir.display());
        }
        info!("Loading catalog from {}", self.config_dir.display());

        let mut catalog = Catalog::default();

        for path in yaml_files(&self.config_dir.join("templates"))? {
            let content = std::fs::read_to_string(&path)
                .with_context(|| format!("Failed to read {}", path.display()))?;
            let template = load_template_from_str(&content)
                .with_context(|| format!("Failed to parse {}", path.display()))?;
            catalog.templates.push(template);
        }

        for path in yaml_files(&self.config_dir.join("rules"))? {
            catalog.rule_sets.extend(load_rule_sets(&path)?);
        }

        for path in yaml_files(&self.config_dir.join("formulas"))? {
            let content = std::fs::read_to_string(&path)
                .with_context(|| format!("Failed to read {}", path.display()))?;
            let formulas = load_formulas_from_str(&content)
                .with_context(|| format!("Failed to parse {}", path.display()))?;
            catalog.formulas.extend(formulas);
        }

        catalog.validate()?;

        info!(
            "Loaded {} templates, {} rule sets, {} formulas",
            catalog.templates.len(),
            catalog.rule_sets.len(),
            catalog.formulas.len()
        );

        Ok(catalog)
    }
}

/// `*.yaml` / `*.yml` in a directory, sorted. A missing directory is empty.
fn yaml_files(dir: &Path) -> Result<Vec<PathBuf>> {
    if !dir.exists() {
        return Ok(Vec::new());
    }

    let mut files = Vec::new();
    for entry in std::fs::read_dir(dir).with_context(|| format!("Failed to read {}", dir.display()))? {
        let path = entry?.path();
        let is_yaml = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e == "yaml" || e == "yml");
        if is_yaml {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}
