//! CLI command definitions for cms-import
//!
//! This module defines the CLI structure using clap's derive macros.
//! The main entry point is the `Cli` struct which contains subcommands.

pub mod import;
pub mod validate;

use clap::{Parser, Subcommand};
use import::ImportArgs;
use validate::ValidateArgs;

/// Restore content database exports
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true)]
    pub config: Option<String>,

    /// Path to the SQLite database (overrides config)
    #[arg(short, long, global = true)]
    pub database: Option<String>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Logging output: 0/off, 1/stdout, 2/stderr (default), or filename
    #[arg(short, long, default_value = "2", global = true)]
    pub log: String,

    #[command(subcommand)]
    pub command: Command,
}

/// Available subcommands
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Import an export file into the database
    Import(ImportArgs),

    /// Check an export file and show the table plan without touching the database
    Validate(ValidateArgs),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::import::ImportStrategy;

    #[test]
    fn test_parse_import_with_globals() {
        let cli = Cli::try_parse_from([
            "cms-import",
            "--database",
            "target.db",
            "import",
            "export.json",
            "--strategy",
            "overwrite",
            "-v",
        ])
        .unwrap();
        assert_eq!(cli.database.as_deref(), Some("target.db"));
        assert!(cli.verbose);
        assert_eq!(cli.log, "2");
        match cli.command {
            Command::Import(args) => {
                assert_eq!(args.strategy, Some(ImportStrategy::Overwrite));
                assert_eq!(args.file.to_str(), Some("export.json"));
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_parse_validate() {
        let cli = Cli::try_parse_from(["cms-import", "validate", "export.json.gz"]).unwrap();
        assert!(matches!(cli.command, Command::Validate(_)));
    }

    #[test]
    fn test_subcommand_required() {
        assert!(Cli::try_parse_from(["cms-import"]).is_err());
    }
}
