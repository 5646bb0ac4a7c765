//! Case workflow engine
//!
//! Drives a case through the ordered, typed steps of a workflow template,
//! persisting progress so execution can pause on human or client events and
//! resume later. The work of each step is delegated to a [`StepExecutor`]
//! registered for its type.
//!
//! ## Modules
//!
//! - [`types`] - templates, steps, case workflows, step executions
//! - [`engine`] - start / resume / cancel and the step loop
//! - [`executor`] - the executor contract, registry and config codec
//! - [`executors`] - decision table, calculation, human task, client approval
//! - [`tasks`] - pending tasks and the completion handler that resumes workflows
//! - [`store`] - persistence traits; [`memory`] and (feature `database`) `postgres`
//! - [`catalog`] - YAML templates, rule sets and formulas

pub mod catalog;
pub mod config;
pub mod context;
pub mod engine;
pub mod error;
pub mod executor;
pub mod executors;
pub mod memory;
#[cfg(feature = "database")]
pub mod postgres;
pub mod store;
pub mod tasks;
pub mod types;

pub use catalog::{Catalog, CatalogLoader, Formula};
pub use config::EngineConfig;
pub use context::{EvaluationInputs, WorkflowContext};
pub use engine::WorkflowEngine;
pub use error::{StepConfigError, WorkflowError};
pub use executor::{ExecutorRegistry, StepConfig, StepExecutor, StepResult};
pub use memory::MemoryStore;
#[cfg(feature = "database")]
pub use postgres::PgStore;
pub use store::{FormulaSource, RuleSetSource, TaskStore, WorkflowStore};
pub use tasks::{PendingTask, TaskCompletionHandler, TaskKind, TaskResolution, TaskStatus};
pub use types::{
    CaseWorkflow, StepExecution, StepStatus, StepType, WorkflowStatus, WorkflowStep,
    WorkflowTemplate,
};
