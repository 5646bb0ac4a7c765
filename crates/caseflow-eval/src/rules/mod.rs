//! Decision tables
//!
//! A rule set is an ordered list of rules; each rule ANDs a list of
//! column conditions and carries the outputs to return when it wins.
//! Evaluation is first-match in ascending priority.

mod evaluator;
mod parser;

pub use evaluator::{DecisionOutcome, RuleEvaluator};
pub use parser::{load_rule_sets, load_rule_sets_from_str, Condition, Operator, Rule, RuleSet};
