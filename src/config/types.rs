//! Configuration types.

use crate::import::{ImportOptions, ImportStrategy};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Root configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub database: DatabaseConfig,

    #[serde(default)]
    pub import: ImportConfig,
}

/// Target database settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// SQLite database file.
    #[serde(default = "default_db_path")]
    pub path: PathBuf,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

/// Defaults for import runs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportConfig {
    #[serde(default)]
    pub strategy: ImportStrategy,

    #[serde(default = "default_true")]
    pub disable_fk_checks: bool,

    /// Row conflict/failure events logged per table.
    #[serde(default = "default_sample_limit")]
    pub sample_limit: usize,

    #[serde(default = "default_true")]
    pub documentation_fallback: bool,

    /// Override for the snapshot's `preserveIds` flag.
    #[serde(default)]
    pub preserve_ids: Option<bool>,
}

impl Default for ImportConfig {
    fn default() -> Self {
        Self {
            strategy: ImportStrategy::default(),
            disable_fk_checks: true,
            sample_limit: default_sample_limit(),
            documentation_fallback: true,
            preserve_ids: None,
        }
    }
}

impl ImportConfig {
    /// Options for a run with these defaults.
    pub fn to_options(&self) -> ImportOptions {
        ImportOptions {
            strategy: self.strategy,
            tables: None,
            preserve_ids: self.preserve_ids,
            disable_fk_checks: self.disable_fk_checks,
            sample_limit: self.sample_limit,
            documentation_fallback: self.documentation_fallback,
        }
    }
}

fn default_db_path() -> PathBuf {
    PathBuf::from("cms-import/content.db")
}

fn default_true() -> bool {
    true
}

fn default_sample_limit() -> usize {
    5
}

impl Config {
    /// Load a single configuration file. Empty files yield defaults.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let config: Option<Config> = serde_yaml::from_str(&content)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;
        Ok(config.unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.database.path, PathBuf::from("cms-import/content.db"));
        assert_eq!(config.import.strategy, ImportStrategy::Merge);
        assert!(config.import.disable_fk_checks);
        assert_eq!(config.import.sample_limit, 5);
        assert_eq!(config.import.preserve_ids, None);
    }

    #[test]
    fn test_partial_yaml_fills_defaults() {
        let config: Config = serde_yaml::from_str(
            r#"
import:
  strategy: overwrite
  preserve_ids: true
"#,
        )
        .unwrap();
        assert_eq!(config.import.strategy, ImportStrategy::Overwrite);
        assert_eq!(config.import.preserve_ids, Some(true));
        assert!(config.import.documentation_fallback);
        assert_eq!(config.database, DatabaseConfig::default());
    }

    #[test]
    fn test_to_options() {
        let config = ImportConfig {
            strategy: ImportStrategy::Skip,
            disable_fk_checks: false,
            sample_limit: 1,
            documentation_fallback: false,
            preserve_ids: Some(false),
        };
        let options = config.to_options();
        assert_eq!(options.strategy, ImportStrategy::Skip);
        assert!(!options.disable_fk_checks);
        assert_eq!(options.sample_limit, 1);
        assert_eq!(options.preserve_ids, Some(false));
        assert_eq!(options.tables, None);
    }

    #[test]
    fn test_load_empty_file() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let config = Config::load(file.path()).unwrap();
        assert_eq!(config, Config::default());
    }
}
