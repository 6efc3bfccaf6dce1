//! Validate subcommand for cms-import CLI

use clap::Args;
use std::path::PathBuf;

/// Arguments for the validate subcommand
#[derive(Args, Debug)]
pub struct ValidateArgs {
    /// Path to the export file to check
    #[arg(value_name = "FILE")]
    pub file: PathBuf,

    /// Only plan these tables (comma-separated)
    #[arg(long, value_delimiter = ',')]
    pub tables: Option<Vec<String>>,
}
