//! Evaluate a rule set against a row of string inputs

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};
use std::str::FromStr;

use super::parser::{Condition, Operator, RuleSet};

/// Outcome of evaluating a rule set. `NoMatch` is a normal result, not an error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "outcome")]
pub enum DecisionOutcome {
    Matched {
        rule_id: String,
        outputs: BTreeMap<String, String>,
    },
    NoMatch,
}

impl DecisionOutcome {
    pub fn is_match(&self) -> bool {
        matches!(self, Self::Matched { .. })
    }

    pub fn outputs(&self) -> Option<&BTreeMap<String, String>> {
        match self {
            Self::Matched { outputs, .. } => Some(outputs),
            Self::NoMatch => None,
        }
    }
}

pub struct RuleEvaluator;

impl RuleEvaluator {
    pub fn new() -> Self {
        Self
    }

    /// First-match evaluation over enabled rules in ascending priority.
    ///
    /// Rules with equal priority keep their declaration order.
    pub fn evaluate(&self, rule_set: &RuleSet, inputs: &HashMap<String, String>) -> DecisionOutcome {
        let mut candidates: Vec<_> = rule_set.rules.iter().filter(|r| r.enabled).collect();
        candidates.sort_by_key(|r| r.priority);

        for rule in candidates {
            if rule.conditions.iter().all(|c| self.condition_holds(c, inputs)) {
                tracing::debug!(
                    rule_set = %rule_set.id,
                    rule = %rule.id,
                    "Decision rule matched"
                );
                return DecisionOutcome::Matched {
                    rule_id: rule.id.clone(),
                    outputs: rule.outputs.clone(),
                };
            }
        }

        tracing::debug!(rule_set = %rule_set.id, "No decision rule matched");
        DecisionOutcome::NoMatch
    }

    /// Evaluate a single condition. A missing input satisfies only `is_empty`.
    pub fn condition_holds(&self, condition: &Condition, inputs: &HashMap<String, String>) -> bool {
        let Some(actual) = inputs.get(&condition.column) else {
            return condition.operator == Operator::IsEmpty;
        };

        match condition.operator {
            Operator::Equals => eq_ignore_case(actual, &condition.value),
            Operator::NotEquals => !eq_ignore_case(actual, &condition.value),
            Operator::Contains => actual
                .to_lowercase()
                .contains(&condition.value.to_lowercase()),
            Operator::IsEmpty => actual.trim().is_empty(),
            Operator::IsNotEmpty => !actual.trim().is_empty(),
            Operator::LessThan => compare(actual, &condition.value) == Ordering::Less,
            Operator::GreaterThan => compare(actual, &condition.value) == Ordering::Greater,
            Operator::LessThanOrEqual => compare(actual, &condition.value) != Ordering::Greater,
            Operator::GreaterThanOrEqual => compare(actual, &condition.value) != Ordering::Less,
            Operator::Between => match &condition.value_to {
                Some(high) => {
                    compare(actual, &condition.value) != Ordering::Less
                        && compare(actual, high) != Ordering::Greater
                }
                None => false,
            },
        }
    }
}

impl Default for RuleEvaluator {
    fn default() -> Self {
        Self::new()
    }
}

fn eq_ignore_case(a: &str, b: &str) -> bool {
    a.to_lowercase() == b.to_lowercase()
}

/// Numeric comparison when both sides parse as decimals, ordinal otherwise.
fn compare(actual: &str, expected: &str) -> Ordering {
    match (parse_number(actual), parse_number(expected)) {
        (Some(a), Some(b)) => a.cmp(&b),
        _ => actual.cmp(expected),
    }
}

fn parse_number(s: &str) -> Option<Decimal> {
    let s = s.trim();
    Decimal::from_str(s)
        .or_else(|_| Decimal::from_scientific(s))
        .ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::parser::Rule;
    use proptest::prelude::*;

    fn inputs(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn holds(condition: Condition, row: &[(&str, &str)]) -> bool {
        RuleEvaluator::new().condition_holds(&condition, &inputs(row))
    }

    #[test]
    fn test_equals_is_case_insensitive() {
        assert!(holds(
            Condition::new("jurisdiction", Operator::Equals, "ky"),
            &[("jurisdiction", "KY")]
        ));
        assert!(!holds(
            Condition::new("jurisdiction", Operator::NotEquals, "ky"),
            &[("jurisdiction", "KY")]
        ));
    }

    #[test]
    fn test_contains_case_insensitive() {
        assert!(holds(
            Condition::new("name", Operator::Contains, "NOMINEE"),
            &[("name", "Acme Nominee Services")]
        ));
    }

    #[test]
    fn test_missing_key_only_satisfies_is_empty() {
        let row: &[(&str, &str)] = &[];
        assert!(holds(Condition::new("x", Operator::IsEmpty, ""), row));
        for op in [
            Operator::Equals,
            Operator::NotEquals,
            Operator::Contains,
            Operator::IsNotEmpty,
            Operator::LessThan,
            Operator::GreaterThan,
            Operator::LessThanOrEqual,
            Operator::GreaterThanOrEqual,
        ] {
            assert!(!holds(Condition::new("x", op, "1"), row), "{op:?} matched a missing key");
        }
        assert!(!holds(Condition::between("x", "1", "2"), row));
    }

    #[test]
    fn test_whitespace_counts_as_empty() {
        assert!(holds(Condition::new("x", Operator::IsEmpty, ""), &[("x", "   ")]));
        assert!(!holds(Condition::new("x", Operator::IsNotEmpty, ""), &[("x", "\t")]));
    }

    #[test]
    fn test_numeric_ordering() {
        // "9" > "10" ordinally; numerically it is not
        assert!(holds(
            Condition::new("n", Operator::LessThan, "10"),
            &[("n", "9")]
        ));
        assert!(holds(
            Condition::new("n", Operator::GreaterThanOrEqual, "10.00"),
            &[("n", "10")]
        ));
    }

    #[test]
    fn test_ordinal_fallback() {
        assert!(holds(
            Condition::new("grade", Operator::LessThan, "B"),
            &[("grade", "A")]
        ));
        assert!(holds(
            Condition::new("grade", Operator::GreaterThan, "9"),
            &[("grade", "A")]
        ));
    }

    #[test]
    fn test_between_is_inclusive() {
        for value in ["18", "40", "64"] {
            assert!(holds(Condition::between("age", "18", "64"), &[("age", value)]));
        }
        assert!(!holds(Condition::between("age", "18", "64"), &[("age", "65")]));
    }

    #[test]
    fn test_between_without_high_bound_never_matches() {
        let condition = Condition::new("age", Operator::Between, "18");
        assert!(!holds(condition, &[("age", "30")]));
    }

    #[test]
    fn test_first_match_by_priority() {
        let set = RuleSet::new("tier")
            .with_rule(
                Rule::new("fallback", 100).output("tier", "standard"),
            )
            .with_rule(
                Rule::new("vip", 1)
                    .when(Condition::new("segment", Operator::Equals, "vip"))
                    .output("tier", "gold"),
            )
            .with_rule(
                Rule::new("vip-disabled", 0)
                    .when(Condition::new("segment", Operator::Equals, "vip"))
                    .output("tier", "platinum")
                    .disabled(),
            );

        let outcome = RuleEvaluator::new().evaluate(&set, &inputs(&[("segment", "VIP")]));
        assert_eq!(
            outcome,
            DecisionOutcome::Matched {
                rule_id: "vip".into(),
                outputs: [("tier".to_string(), "gold".to_string())].into(),
            }
        );

        let outcome = RuleEvaluator::new().evaluate(&set, &inputs(&[("segment", "retail")]));
        assert_eq!(outcome.outputs().unwrap()["tier"], "standard");
    }

    #[test]
    fn test_no_match() {
        let set = RuleSet::new("empty").with_rule(
            Rule::new("never", 1).when(Condition::new("a", Operator::Equals, "b")),
        );
        let outcome = RuleEvaluator::new().evaluate(&set, &HashMap::new());
        assert_eq!(outcome, DecisionOutcome::NoMatch);
        assert!(!outcome.is_match());
    }

    #[test]
    fn test_all_conditions_must_hold() {
        let set = RuleSet::new("and").with_rule(
            Rule::new("both", 1)
                .when(Condition::new("a", Operator::Equals, "1"))
                .when(Condition::new("b", Operator::Equals, "2"))
                .output("hit", "yes"),
        );
        let evaluator = RuleEvaluator::new();
        assert!(evaluator.evaluate(&set, &inputs(&[("a", "1"), ("b", "2")])).is_match());
        assert!(!evaluator.evaluate(&set, &inputs(&[("a", "1"), ("b", "3")])).is_match());
    }

    proptest! {
        /// The winner is the lowest-priority enabled rule whose threshold holds.
        #[test]
        fn prop_lowest_priority_matching_rule_wins(
            rules in proptest::collection::vec((0i32..50, 0i64..100, any::<bool>()), 0..12),
            value in 0i64..100,
        ) {
            let mut set = RuleSet::new("prop");
            for (i, (priority, threshold, enabled)) in rules.iter().enumerate() {
                let mut rule = Rule::new(format!("r{i}"), *priority)
                    .when(Condition::new("v", Operator::LessThanOrEqual, threshold.to_string()));
                rule.enabled = *enabled;
                set.rules.push(rule);
            }

            let expected = rules
                .iter()
                .enumerate()
                .filter(|(_, (_, threshold, enabled))| *enabled && value <= *threshold)
                .min_by_key(|(i, (priority, _, _))| (*priority, *i))
                .map(|(i, _)| format!("r{i}"));

            let outcome = RuleEvaluator::new().evaluate(&set, &inputs(&[("v", &value.to_string())]));
            match (outcome, expected) {
                (DecisionOutcome::Matched { rule_id, .. }, Some(id)) => prop_assert_eq!(rule_id, id),
                (DecisionOutcome::NoMatch, None) => {}
                (outcome, expected) => prop_assert!(false, "got {:?}, expected {:?}", outcome, expected),
            }
        }
    }
}
