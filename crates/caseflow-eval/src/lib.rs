//! Pure evaluators used by caseflow workflow steps.
//!
//! - [`rules`]: first-match decision tables over string inputs
//! - [`expr`]: decimal formula language with `if/then/else` and a few functions
//!
//! Nothing in this crate performs I/O apart from the YAML loaders.

pub mod expr;
pub mod rules;

pub use expr::{evaluate, validate_syntax, ExprError};
pub use rules::{DecisionOutcome, RuleEvaluator, RuleSet};
