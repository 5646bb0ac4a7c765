//! CLI configuration: global flags with environment fallbacks

use caseflow_core::config::DEFAULT_MAX_STEP_VISITS;
use caseflow_core::{CatalogLoader, EngineConfig};
use clap::Args;
use std::path::PathBuf;

#[derive(Debug, Clone, Args)]
pub struct CliConfig {
    /// Catalog directory containing templates/, rules/ and formulas/
    #[arg(long, global = true, env = "CASEFLOW_CONFIG_DIR")]
    pub config_dir: Option<PathBuf>,

    /// Postgres connection string (requires the `database` feature)
    #[arg(long, global = true, env = "CASEFLOW_DATABASE_URL", hide_env_values = true)]
    pub database_url: Option<String>,

    /// Upper bound on steps entered by a single start or resume
    #[arg(
        long,
        global = true,
        env = "CASEFLOW_MAX_STEP_VISITS",
        default_value_t = DEFAULT_MAX_STEP_VISITS
    )]
    pub max_step_visits: usize,
}

impl CliConfig {
    /// Explicit directory if given, otherwise the loader's own resolution
    pub fn catalog_loader(&self) -> CatalogLoader {
        match &self.config_dir {
            Some(dir) => CatalogLoader::new(dir),
            None => CatalogLoader::from_env(),
        }
    }

    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            max_step_visits: self.max_step_visits,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_engine_config_from_flag() {
        let config = CliConfig {
            config_dir: Some(PathBuf::from("/tmp/catalog")),
            database_url: None,
            max_step_visits: 25,
        };
        assert_eq!(config.engine_config().max_step_visits, 25);
        assert_eq!(
            config.catalog_loader().config_dir(),
            PathBuf::from("/tmp/catalog").as_path()
        );
    }
}
