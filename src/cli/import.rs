//! Import subcommand for cms-import CLI
//!
//! Restores a structured JSON export (plain or gzip) into the database.

use crate::config::ImportConfig;
use crate::import::{ImportOptions, ImportStrategy};
use clap::Args;
use std::path::PathBuf;

/// Arguments for the import subcommand
#[derive(Args, Debug)]
pub struct ImportArgs {
    /// Path to the export file to import
    #[arg(value_name = "FILE")]
    pub file: PathBuf,

    /// Conflict strategy (defaults to the configured one)
    ///
    /// - replace: clear each imported table, then insert; any failure aborts
    /// - skip: only import into empty tables; any failure aborts
    /// - merge: insert new rows, keep existing ones
    /// - overwrite: insert new rows, update existing ones by id
    #[arg(short, long, value_enum)]
    pub strategy: Option<ImportStrategy>,

    /// Only import these tables (comma-separated)
    #[arg(long, value_delimiter = ',')]
    pub tables: Option<Vec<String>>,

    /// Override the export's preserveIds flag
    #[arg(long)]
    pub preserve_ids: Option<bool>,

    /// Keep foreign key checks enabled during the import
    #[arg(long)]
    pub keep_fk_checks: bool,

    /// Print the import result as JSON
    #[arg(long)]
    pub json: bool,
}

impl ImportArgs {
    /// Run options: configured defaults with these flags applied on top.
    pub fn to_options(&self, defaults: &ImportConfig) -> ImportOptions {
        let mut options = defaults.to_options();
        if let Some(strategy) = self.strategy {
            options.strategy = strategy;
        }
        if let Some(tables) = &self.tables {
            options.tables = Some(tables.clone());
        }
        if self.preserve_ids.is_some() {
            options.preserve_ids = self.preserve_ids;
        }
        if self.keep_fk_checks {
            options.disable_fk_checks = false;
        }
        options
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(file: &str) -> ImportArgs {
        ImportArgs {
            file: PathBuf::from(file),
            strategy: None,
            tables: None,
            preserve_ids: None,
            keep_fk_checks: false,
            json: false,
        }
    }

    #[test]
    fn test_defaults_come_from_config() {
        let config = ImportConfig {
            strategy: ImportStrategy::Replace,
            sample_limit: 9,
            ..ImportConfig::default()
        };
        let options = args("x.json").to_options(&config);
        assert_eq!(options.strategy, ImportStrategy::Replace);
        assert_eq!(options.sample_limit, 9);
        assert!(options.disable_fk_checks);
    }

    #[test]
    fn test_flags_override_config() {
        let mut a = args("x.json");
        a.strategy = Some(ImportStrategy::Skip);
        a.tables = Some(vec!["users".into(), "posts".into()]);
        a.preserve_ids = Some(true);
        a.keep_fk_checks = true;

        let options = a.to_options(&ImportConfig::default());
        assert_eq!(options.strategy, ImportStrategy::Skip);
        assert_eq!(options.tables, Some(vec!["users".to_string(), "posts".to_string()]));
        assert_eq!(options.preserve_ids, Some(true));
        assert!(!options.disable_fk_checks);
    }
}
