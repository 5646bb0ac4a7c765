//! Rule set documents and YAML loading

use anyhow::{Context, Result};
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

/// An ordered collection of condition → output rules.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct RuleSet {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub rules: Vec<Rule>,
}

impl RuleSet {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: String::new(),
            description: None,
            rules: Vec::new(),
        }
    }

    pub fn with_rule(mut self, rule: Rule) -> Self {
        self.rules.push(rule);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct Rule {
    pub id: String,
    pub priority: i32,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// ANDed together. An empty list always matches.
    #[serde(default)]
    pub conditions: Vec<Condition>,
    #[serde(default, deserialize_with = "scalar_map")]
    pub outputs: BTreeMap<String, String>,
}

fn default_enabled() -> bool {
    true
}

impl Rule {
    pub fn new(id: impl Into<String>, priority: i32) -> Self {
        Self {
            id: id.into(),
            priority,
            enabled: true,
            conditions: Vec::new(),
            outputs: BTreeMap::new(),
        }
    }

    pub fn when(mut self, condition: Condition) -> Self {
        self.conditions.push(condition);
        self
    }

    pub fn output(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.outputs.insert(key.into(), value.into());
        self
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct Condition {
    /// Input key (decision table column).
    pub column: String,
    pub operator: Operator,
    #[serde(default, deserialize_with = "scalar_string")]
    pub value: String,
    /// Upper bound for `between`.
    #[serde(default, deserialize_with = "optional_scalar_string")]
    pub value_to: Option<String>,
}

impl Condition {
    pub fn new(column: impl Into<String>, operator: Operator, value: impl Into<String>) -> Self {
        Self {
            column: column.into(),
            operator,
            value: value.into(),
            value_to: None,
        }
    }

    pub fn between(
        column: impl Into<String>,
        low: impl Into<String>,
        high: impl Into<String>,
    ) -> Self {
        Self {
            column: column.into(),
            operator: Operator::Between,
            value: low.into(),
            value_to: Some(high.into()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Operator {
    #[serde(alias = "eq")]
    Equals,
    #[serde(alias = "ne")]
    NotEquals,
    Contains,
    IsEmpty,
    IsNotEmpty,
    #[serde(alias = "lt")]
    LessThan,
    #[serde(alias = "gt")]
    GreaterThan,
    #[serde(alias = "lte")]
    LessThanOrEqual,
    #[serde(alias = "gte")]
    GreaterThanOrEqual,
    Between,
}

// YAML authors write `value: 700` as often as `value: "700"`.
#[derive(Deserialize)]
#[serde(untagged)]
enum Scalar {
    Str(String),
    Int(i64),
    Float(f64),
    Bool(bool),
}

impl From<Scalar> for String {
    fn from(scalar: Scalar) -> Self {
        match scalar {
            Scalar::Str(s) => s,
            Scalar::Int(i) => i.to_string(),
            Scalar::Float(f) => f.to_string(),
            Scalar::Bool(b) => b.to_string(),
        }
    }
}

fn scalar_string<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    Scalar::deserialize(deserializer).map(String::from)
}

fn optional_scalar_string<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<Option<String>, D::Error> {
    Ok(Option::<Scalar>::deserialize(deserializer)?.map(String::from))
}

fn scalar_map<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<BTreeMap<String, String>, D::Error> {
    let raw = BTreeMap::<String, Scalar>::deserialize(deserializer)?;
    Ok(raw.into_iter().map(|(k, v)| (k, String::from(v))).collect())
}

/// Load every rule set in a YAML file (`rule_sets:` list or a single document).
pub fn load_rule_sets(path: &Path) -> Result<Vec<RuleSet>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read rule file {}", path.display()))?;
    let rule_sets = load_rule_sets_from_str(&content)
        .with_context(|| format!("Failed to parse rule file {}", path.display()))?;

    tracing::info!("Loaded {} rule set(s) from {:?}", rule_sets.len(), path);

    Ok(rule_sets)
}

/// Load rule sets from a string (for testing)
pub fn load_rule_sets_from_str(yaml: &str) -> Result<Vec<RuleSet>> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Document {
        Many { rule_sets: Vec<RuleSet> },
        One(RuleSet),
    }

    Ok(match serde_yaml::from_str::<Document>(yaml)? {
        Document::Many { rule_sets } => rule_sets,
        Document::One(rule_set) => vec![rule_set],
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_single_rule_set() {
        let yaml = r#"
id: risk-tier
name: Risk tiering
rules:
  - id: high-risk-jurisdiction
    priority: 10
    conditions:
      - column: jurisdiction
        operator: equals
        value: KY
    outputs:
      risk_level: HIGH
  - id: large-exposure
    priority: 20
    conditions:
      - column: exposure
        operator: gte
        value: 1000000
    outputs:
      risk_level: MEDIUM
      review_days: 30
"#;

        let sets = load_rule_sets_from_str(yaml).unwrap();
        assert_eq!(sets.len(), 1);
        let set = &sets[0];
        assert_eq!(set.id, "risk-tier");
        assert_eq!(set.rules.len(), 2);
        assert!(set.rules[0].enabled);
        assert_eq!(set.rules[1].conditions[0].operator, Operator::GreaterThanOrEqual);
        assert_eq!(set.rules[1].conditions[0].value, "1000000");
        assert_eq!(set.rules[1].outputs["review_days"], "30");
    }

    #[test]
    fn test_parse_rule_set_list_with_between() {
        let yaml = r#"
rule_sets:
  - id: age-band
    rules:
      - id: adult
        priority: 1
        enabled: false
        conditions:
          - column: age
            operator: between
            value: 18
            value_to: 64
        outputs:
          band: adult
  - id: empty
"#;

        let sets = load_rule_sets_from_str(yaml).unwrap();
        assert_eq!(sets.len(), 2);
        let rule = &sets[0].rules[0];
        assert!(!rule.enabled);
        assert_eq!(rule.conditions[0].value_to.as_deref(), Some("64"));
        assert!(sets[1].rules.is_empty());
    }

    #[test]
    fn test_unknown_operator_is_rejected() {
        let yaml = r#"
id: bad
rules:
  - id: r
    priority: 1
    conditions:
      - column: a
        operator: matches
        value: x
"#;
        assert!(load_rule_sets_from_str(yaml).is_err());
    }
}
