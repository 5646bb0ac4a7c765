use serde::{Deserialize, Serialize};

/// Default bound on steps entered per start or resume call.
pub const DEFAULT_MAX_STEP_VISITS: usize = 1000;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Upper bound on steps a single start/resume invocation may enter.
    ///
    /// Successor edges may point backwards, so a template can loop. Exceeding
    /// this bound fails the workflow instead of spinning.
    pub max_step_visits: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_step_visits: DEFAULT_MAX_STEP_VISITS,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_fields_use_defaults() {
        let config: EngineConfig = serde_yaml::from_str("{}").unwrap();
        assert_eq!(config.max_step_visits, DEFAULT_MAX_STEP_VISITS);

        let config: EngineConfig = serde_yaml::from_str("max_step_visits: 5").unwrap();
        assert_eq!(config.max_step_visits, 5);
    }
}
