//! Structured import events and their destinations.
//!
//! The engine reports progress through an [`EventSink`] instead of logging
//! directly, so callers choose where events go:
//! - [`TracingSink`] forwards to `tracing` (stderr/stdout/file, see [`init_tracing`])
//! - [`RecordingSink`] keeps events in memory
//! - [`NullSink`] drops them

use serde::Serialize;
use std::fs::OpenOptions;
use std::sync::Mutex;
use tracing::Level;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

/// Something that happened during an import run.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ImportEvent {
    RunStarted {
        strategy: String,
        dialect: String,
        tables: usize,
    },
    /// `overwrite` requested on a snapshot that does not preserve ids.
    StrategyDowngraded { from: String, to: String },
    TableStarted { table: String, rows: usize },
    TableSkipped { table: String, reason: String },
    TableCompleted {
        table: String,
        imported: u64,
        skipped: u64,
        errored: u64,
    },
    TableFailed { table: String, error: String },
    RowConflict {
        table: String,
        id: Option<String>,
        reason: String,
        /// Foreign-key or not-null violation rather than an existing row.
        integrity: bool,
    },
    RowFailed {
        table: String,
        id: Option<String>,
        error: String,
    },
    /// Rows whose references never resolved and were appended unordered.
    HierarchyCycle { table: String, rows: usize },
    InstanceCloned {
        original: String,
        clone: String,
        post_id: String,
    },
    InstanceReused {
        original: String,
        existing: String,
        post_id: String,
    },
    SequenceResynced { table: String },
    /// A best-effort step failed or found something odd; the run goes on.
    Warning { message: String },
    Summary {
        success: bool,
        tables_imported: usize,
        rows_imported: u64,
        errors: usize,
    },
}

impl ImportEvent {
    /// Severity used when forwarding to `tracing`.
    pub fn level(&self) -> Level {
        match self {
            ImportEvent::RowConflict {
                integrity: true, ..
            } => Level::WARN,
            ImportEvent::RowConflict { .. }
            | ImportEvent::InstanceReused { .. }
            | ImportEvent::SequenceResynced { .. } => Level::DEBUG,
            ImportEvent::TableFailed { .. } | ImportEvent::RowFailed { .. } => Level::ERROR,
            ImportEvent::StrategyDowngraded { .. }
            | ImportEvent::HierarchyCycle { .. }
            | ImportEvent::Warning { .. } => Level::WARN,
            _ => Level::INFO,
        }
    }

    /// Table the event is about, if any.
    pub fn table(&self) -> Option<&str> {
        match self {
            ImportEvent::TableStarted { table, .. }
            | ImportEvent::TableSkipped { table, .. }
            | ImportEvent::TableCompleted { table, .. }
            | ImportEvent::TableFailed { table, .. }
            | ImportEvent::RowConflict { table, .. }
            | ImportEvent::RowFailed { table, .. }
            | ImportEvent::HierarchyCycle { table, .. }
            | ImportEvent::SequenceResynced { table } => Some(table),
            _ => None,
        }
    }

    /// One-line human readable description.
    pub fn message(&self) -> String {
        let id = |id: &Option<String>| id.clone().unwrap_or_else(|| "-".to_string());
        match self {
            ImportEvent::RunStarted {
                strategy,
                dialect,
                tables,
            } => format!(
                "Import started: strategy {}, dialect {}, {} tables",
                strategy, dialect, tables
            ),
            ImportEvent::StrategyDowngraded { from, to } => format!(
                "Snapshot does not preserve ids; strategy downgraded from {} to {}",
                from, to
            ),
            ImportEvent::TableStarted { rows, .. } => format!("Importing {} rows", rows),
            ImportEvent::TableSkipped { reason, .. } => format!("Table skipped: {}", reason),
            ImportEvent::TableCompleted {
                imported,
                skipped,
                errored,
                ..
            } => format!(
                "Table done: {} imported, {} skipped, {} errored",
                imported, skipped, errored
            ),
            ImportEvent::TableFailed { error, .. } => format!("Table failed: {}", error),
            ImportEvent::RowConflict { id: row, reason, .. } => {
                format!("Row {} skipped: {}", id(row), reason)
            }
            ImportEvent::RowFailed { id: row, error, .. } => {
                format!("Row {} failed: {}", id(row), error)
            }
            ImportEvent::HierarchyCycle { rows, .. } => format!(
                "{} rows with unresolved parent references appended unordered",
                rows
            ),
            ImportEvent::InstanceCloned {
                original,
                clone,
                post_id,
            } => format!(
                "Cloned shared instance {} as {} for post {}",
                original, clone, post_id
            ),
            ImportEvent::InstanceReused {
                original,
                existing,
                post_id,
            } => format!(
                "Reusing clone {} of {} for post {}",
                existing, original, post_id
            ),
            ImportEvent::SequenceResynced { .. } => "Sequence resynchronized".to_string(),
            ImportEvent::Warning { message } => message.clone(),
            ImportEvent::Summary {
                success,
                tables_imported,
                rows_imported,
                errors,
            } => format!(
                "Import finished: success={}, {} tables, {} rows, {} table errors",
                success, tables_imported, rows_imported, errors
            ),
        }
    }
}

/// Destination for import events.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: &ImportEvent);
}

/// Forwards events to `tracing` at [`ImportEvent::level`].
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl EventSink for TracingSink {
    fn emit(&self, event: &ImportEvent) {
        let message = event.message();
        let table = event.table().unwrap_or("-");
        match event.level() {
            Level::ERROR => tracing::error!(%table, "{}", message),
            Level::WARN => tracing::warn!(%table, "{}", message),
            Level::INFO => tracing::info!(%table, "{}", message),
            Level::DEBUG => tracing::debug!(%table, "{}", message),
            Level::TRACE => tracing::trace!(%table, "{}", message),
        }
    }
}

/// Keeps every event in memory.
#[derive(Debug, Default)]
pub struct RecordingSink {
    events: Mutex<Vec<ImportEvent>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<ImportEvent> {
        self.events
            .lock()
            .map(|events| events.clone())
            .unwrap_or_default()
    }
}

impl EventSink for RecordingSink {
    fn emit(&self, event: &ImportEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event.clone());
        }
    }
}

/// Discards events.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl EventSink for NullSink {
    fn emit(&self, _event: &ImportEvent) {}
}

/// Install the global `tracing` subscriber.
///
/// `log` is `0`/`off`, `1`/`stdout`, `2`/`stderr` or a file name (appended).
/// `RUST_LOG` takes precedence over `verbose` when set.
pub fn init_tracing(log: &str, verbose: bool) -> anyhow::Result<()> {
    let level = if verbose { Level::DEBUG } else { Level::INFO };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level.as_str().to_ascii_lowercase()));

    match log {
        "0" | "off" => {}
        "1" | "stdout" => {
            let subscriber = FmtSubscriber::builder()
                .with_env_filter(filter)
                .with_writer(std::io::stdout)
                .finish();
            tracing::subscriber::set_global_default(subscriber)?;
        }
        "2" | "stderr" => {
            let subscriber = FmtSubscriber::builder()
                .with_env_filter(filter)
                .with_writer(std::io::stderr)
                .finish();
            tracing::subscriber::set_global_default(subscriber)?;
        }
        filename => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(filename)?;
            let subscriber = FmtSubscriber::builder()
                .with_env_filter(filter)
                .with_writer(Mutex::new(file))
                .with_ansi(false)
                .finish();
            tracing::subscriber::set_global_default(subscriber)?;
        }
    }
    Ok(())
}
