//! Configuration loader with tier-based merging.

use super::merge::merge_layers;
use super::types::Config;
use crate::import::ImportStrategy;
use anyhow::{Context, Result};
use serde_json::Value;
use std::path::{Path, PathBuf};
use tracing::warn;

const CONFIG_FILE: &str = "config.yaml";

/// Configuration tier priority (lowest to highest).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ConfigTier {
    Defaults = 0,
    Project = 1,
    User = 2,
    Environment = 3,
}

impl std::fmt::Display for ConfigTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigTier::Defaults => write!(f, "defaults"),
            ConfigTier::Project => write!(f, "project"),
            ConfigTier::User => write!(f, "user"),
            ConfigTier::Environment => write!(f, "environment"),
        }
    }
}

/// Directories searched for `config.yaml`.
#[derive(Debug, Clone, Default)]
pub struct ConfigPaths {
    pub project_dir: Option<PathBuf>,
    pub user_dir: Option<PathBuf>,
}

impl ConfigPaths {
    /// Resolve directories from the environment, falling back to
    /// `./cms-import` and `~/.cms-import`.
    pub fn discover() -> Self {
        let project_dir = std::env::var("CMS_IMPORT_PROJECT_DIR")
            .ok()
            .map(PathBuf::from)
            .or_else(|| Some(PathBuf::from("cms-import")));
        let user_dir = std::env::var("CMS_IMPORT_USER_DIR")
            .ok()
            .map(PathBuf::from)
            .or_else(|| dirs::home_dir().map(|h| h.join(".cms-import")));
        Self {
            project_dir,
            user_dir,
        }
    }

    pub fn with_dirs(project_dir: Option<PathBuf>, user_dir: Option<PathBuf>) -> Self {
        Self {
            project_dir,
            user_dir,
        }
    }

    /// Existing config files, lowest tier first.
    fn files(&self) -> Vec<(ConfigTier, PathBuf)> {
        [
            (ConfigTier::Project, &self.project_dir),
            (ConfigTier::User, &self.user_dir),
        ]
        .into_iter()
        .filter_map(|(tier, dir)| dir.as_ref().map(|d| (tier, d.join(CONFIG_FILE))))
        .filter(|(_, file)| file.exists())
        .collect()
    }
}

/// Loads and merges the configuration tiers.
#[derive(Debug, Clone)]
pub struct ConfigLoader {
    pub paths: ConfigPaths,
    config: Config,
    /// Files that contributed, in merge order.
    sources: Vec<PathBuf>,
}

impl ConfigLoader {
    pub fn load() -> Result<Self> {
        Self::load_with_paths(ConfigPaths::discover())
    }

    pub fn load_with_paths(paths: ConfigPaths) -> Result<Self> {
        let env = |key: &str| std::env::var(key).ok();

        // An explicit file replaces the file tiers.
        if let Some(explicit) = env("CMS_IMPORT_CONFIG_PATH") {
            let path = PathBuf::from(explicit);
            let mut config = Config::load(&path)?;
            apply_env_overrides(&mut config, env);
            return Ok(Self {
                paths,
                config,
                sources: vec![path],
            });
        }

        let mut layers = vec![
            serde_json::to_value(Config::default()).context("Failed to encode default config")?,
        ];
        let mut sources = Vec::new();
        for (tier, file) in paths.files() {
            match read_layer(&file) {
                Ok(layer) => {
                    layers.push(layer);
                    sources.push(file);
                }
                Err(e) => warn!(%tier, file = %file.display(), error = %e, "Ignoring config file"),
            }
        }

        let mut config: Config =
            serde_json::from_value(merge_layers(layers)).context("Invalid configuration")?;
        apply_env_overrides(&mut config, env);

        Ok(Self {
            paths,
            config,
            sources,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn config_mut(&mut self) -> &mut Config {
        &mut self.config
    }

    pub fn into_config(self) -> Config {
        self.config
    }

    /// The highest-priority file that was read, if any.
    pub fn config_path(&self) -> Option<&Path> {
        self.sources.last().map(PathBuf::as_path)
    }

    pub fn sources(&self) -> &[PathBuf] {
        &self.sources
    }
}

fn read_layer(file: &Path) -> Result<Value> {
    let content = std::fs::read_to_string(file)?;
    let layer: Option<Value> = serde_yaml::from_str(&content)?;
    Ok(layer.unwrap_or(Value::Null))
}

/// Apply the environment tier. `lookup` reads a variable.
fn apply_env_overrides(config: &mut Config, lookup: impl Fn(&str) -> Option<String>) {
    if let Some(db_path) = lookup("CMS_IMPORT_DB_PATH") {
        config.database.path = PathBuf::from(db_path);
    }
    if let Some(strategy) = lookup("CMS_IMPORT_STRATEGY") {
        match strategy.parse::<ImportStrategy>() {
            Ok(strategy) => config.import.strategy = strategy,
            Err(e) => warn!(error = %e, "Ignoring CMS_IMPORT_STRATEGY"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::TempDir;

    fn write_config(dir: &Path, content: &str) {
        std::fs::create_dir_all(dir).unwrap();
        std::fs::write(dir.join(CONFIG_FILE), content).unwrap();
    }

    #[test]
    fn test_load_defaults_only() {
        let temp = TempDir::new().unwrap();
        let paths = ConfigPaths::with_dirs(
            Some(temp.path().join("project")),
            Some(temp.path().join("user")),
        );
        let loader = ConfigLoader::load_with_paths(paths).unwrap();
        assert_eq!(loader.config().import.sample_limit, 5);
        assert!(loader.config_path().is_none());
    }

    #[test]
    fn test_user_overrides_project_field_by_field() {
        let temp = TempDir::new().unwrap();
        let project = temp.path().join("cms-import");
        let user = temp.path().join("user");
        write_config(
            &project,
            "database:\n  path: project.db\nimport:\n  strategy: replace\n  sample_limit: 10\n",
        );
        write_config(&user, "import:\n  sample_limit: 20\n");

        let loader =
            ConfigLoader::load_with_paths(ConfigPaths::with_dirs(Some(project), Some(user.clone())))
                .unwrap();
        let config = loader.config();
        assert_eq!(config.database.path, PathBuf::from("project.db"));
        assert_eq!(config.import.strategy, ImportStrategy::Replace);
        assert_eq!(config.import.sample_limit, 20);
        assert_eq!(loader.sources().len(), 2);
        assert_eq!(loader.config_path(), Some(user.join(CONFIG_FILE).as_path()));
    }

    #[test]
    fn test_unparseable_file_is_ignored() {
        let temp = TempDir::new().unwrap();
        let project = temp.path().join("cms-import");
        write_config(&project, "import: [unclosed\n");

        let loader =
            ConfigLoader::load_with_paths(ConfigPaths::with_dirs(Some(project), None)).unwrap();
        assert_eq!(loader.config(), &Config::default());
        assert!(loader.sources().is_empty());
    }

    #[test]
    fn test_env_overrides() {
        let vars: HashMap<&str, &str> = [
            ("CMS_IMPORT_DB_PATH", "/tmp/env.db"),
            ("CMS_IMPORT_STRATEGY", "Overwrite"),
        ]
        .into_iter()
        .collect();
        let mut config = Config::default();
        apply_env_overrides(&mut config, |k| vars.get(k).map(|v| v.to_string()));
        assert_eq!(config.database.path, PathBuf::from("/tmp/env.db"));
        assert_eq!(config.import.strategy, ImportStrategy::Overwrite);

        let mut config = Config::default();
        apply_env_overrides(&mut config, |k| {
            (k == "CMS_IMPORT_STRATEGY").then(|| "sideways".to_string())
        });
        assert_eq!(config.import.strategy, ImportStrategy::Merge);
    }

    #[test]
    fn test_tier_order() {
        assert!(ConfigTier::Defaults < ConfigTier::Project);
        assert!(ConfigTier::User < ConfigTier::Environment);
        assert_eq!(ConfigTier::User.to_string(), "user");
    }
}
