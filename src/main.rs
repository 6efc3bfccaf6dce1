//! cms-import
//!
//! Restores content database exports into a SQLite target.

use anyhow::{Context, Result};
use clap::Parser;
use cms_import::cli::import::ImportArgs;
use cms_import::cli::validate::ValidateArgs;
use cms_import::cli::{Cli, Command};
use cms_import::config::{Config, ConfigLoader};
use cms_import::db::SqliteConnection;
use cms_import::export::Snapshot;
use cms_import::import::order::{filter_tables, order_tables};
use cms_import::import::{ImportResult, Importer, TableStatus};
use cms_import::logging::init_tracing;
use tracing::{debug, info};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_tracing(&cli.log, cli.verbose)?;

    // If explicit config path given, set it as env var for ConfigLoader to pick up
    // SAFETY: This is safe at program startup before any other threads are spawned
    if let Some(config_path) = &cli.config {
        unsafe {
            std::env::set_var("CMS_IMPORT_CONFIG_PATH", config_path);
        }
    }
    let mut loader = ConfigLoader::load()?;
    if let Some(path) = loader.config_path() {
        debug!(config = %path.display(), "Loaded configuration");
    }

    let config = loader.config_mut();
    if let Some(db_path) = &cli.database {
        config.database.path = db_path.into();
    }
    let config = loader.into_config();

    match cli.command {
        Command::Import(args) => run_import(&config, args).await,
        Command::Validate(args) => run_validate(args),
    }
}

/// Run the import command
async fn run_import(config: &Config, args: ImportArgs) -> Result<()> {
    let snapshot = Snapshot::from_file(&args.file)
        .with_context(|| format!("Failed to read export {}", args.file.display()))?;

    let db_path = &config.database.path;
    if let Some(parent) = db_path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    let mut conn = SqliteConnection::open(db_path)
        .with_context(|| format!("Failed to open database {}", db_path.display()))?;

    let options = args.to_options(&config.import);
    info!(
        file = %args.file.display(),
        database = %db_path.display(),
        strategy = %options.strategy,
        "Importing export"
    );

    let result = Importer::new(&mut conn)
        .import_snapshot(&snapshot, &options)
        .await
        .context("Import failed")?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        print_summary(&result);
    }
    Ok(())
}

fn print_summary(result: &ImportResult) {
    println!(
        "Import completed (strategy: {}, {} table errors)",
        result.strategy,
        result.errors.len()
    );
    println!(
        "  {} tables, {} rows imported",
        result.tables_imported, result.rows_imported
    );

    for (table, stats) in &result.tables {
        match stats.status {
            TableStatus::Imported => println!(
                "  {:<24} {:>6} imported {:>6} skipped {:>6} errored",
                table, stats.counts.imported, stats.counts.skipped, stats.counts.errored
            ),
            TableStatus::Skipped => println!(
                "  {:<24} skipped: {}",
                table,
                stats.reason.as_deref().unwrap_or("-")
            ),
            TableStatus::Failed => println!(
                "  {:<24} failed: {}",
                table,
                stats.reason.as_deref().unwrap_or("-")
            ),
        }
    }

    if !result.content_types.is_empty() {
        println!("  Content types:");
        for (content_type, counts) in &result.content_types {
            println!(
                "    {:<22} {:>6} imported {:>6} skipped",
                content_type, counts.imported, counts.skipped
            );
        }
    }
    if result.clones_created > 0 {
        println!("  Shared instances cloned: {}", result.clones_created);
    }
    if result.hierarchy_unresolved > 0 {
        println!(
            "  Content rows with unresolved hierarchy: {}",
            result.hierarchy_unresolved
        );
    }
    for warning in &result.warnings {
        println!("  Warning: {}", warning);
    }
    for error in &result.errors {
        println!("  Error: {}: {}", error.table, error.message);
    }
}

/// Run the validate command
fn run_validate(args: ValidateArgs) -> Result<()> {
    let snapshot = Snapshot::from_file(&args.file)
        .with_context(|| format!("Invalid export {}", args.file.display()))?;

    println!(
        "Export version {} ({})",
        snapshot.metadata.version,
        snapshot
            .metadata
            .exported_at
            .as_deref()
            .unwrap_or("unknown export time")
    );
    println!("  preserveIds: {}", snapshot.metadata.preserve_ids);

    let names = filter_tables(&snapshot.table_names(), args.tables.as_deref());
    println!("  Import order:");
    for (i, table) in order_tables(&names).iter().enumerate() {
        // Malformed tables only surface when their rows are read.
        let status = match snapshot.table_rows(table) {
            Ok(rows) => format!("{} rows", rows.len()),
            Err(e) => format!("invalid: {}", e),
        };
        println!("  {:>3}. {:<24} {}", i + 1, table, status);
    }
    Ok(())
}
