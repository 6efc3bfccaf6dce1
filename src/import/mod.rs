//! Import orchestration.
//!
//! An [`Importer`] restores one snapshot into the database behind a
//! [`Connection`]. A run is a single transaction:
//!
//! 1. Validate the snapshot (before any database work).
//! 2. Suspend FK checks, begin.
//! 3. Import every table in dependency order under the chosen strategy.
//! 4. Restore FK checks, commit.
//! 5. Best-effort follow-up: sequence resync, ground-truth counts,
//!    documentation fallback.
//!
//! `replace` and `skip` abort the run on the first row failure. `merge` and
//! `overwrite` absorb row failures and isolate table failures, which makes
//! them safe to re-run.

pub mod dedup;
pub mod hierarchy;
pub mod jsonb;
pub mod order;
pub mod registry;
pub mod resolver;

use crate::db::{
    Capabilities, Connection, Dialect, FkToggleScope, Row, SqlValue, row_id, savepoint_name,
};
use crate::error::{ImportError, Result};
use crate::export::{Snapshot, validate_version};
use crate::logging::{EventSink, ImportEvent, TracingSink};
use dedup::{
    IdGenerator, InstanceIndex, LinkResolution, SharedInstanceDeduplicator, UuidGenerator,
};
use registry::{
    CONTENT_TABLE, CONTENT_TYPE_COLUMN, DOCUMENTATION_TYPE, INSTANCE_LINK_TABLE,
    SHARED_INSTANCE_TABLE,
};
use resolver::ConflictResolver;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

/// How incoming rows are reconciled with existing data.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum ImportStrategy {
    /// Clear every imported table, then insert. Any failure aborts the run.
    Replace,
    /// Import only into tables that are empty. Any failure aborts the run.
    Skip,
    /// Insert new rows, keep existing ones.
    #[default]
    Merge,
    /// Insert new rows, overwrite existing ones by id.
    Overwrite,
}

impl ImportStrategy {
    /// Row failures are absorbed and table failures isolated.
    pub fn is_lenient(self) -> bool {
        matches!(self, ImportStrategy::Merge | ImportStrategy::Overwrite)
    }

    /// Whether content rows are put in hierarchy order first.
    fn orders_hierarchy(self) -> bool {
        !matches!(self, ImportStrategy::Skip)
    }

    fn resyncs_sequences(self) -> bool {
        matches!(self, ImportStrategy::Replace | ImportStrategy::Overwrite)
    }
}

impl fmt::Display for ImportStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ImportStrategy::Replace => write!(f, "replace"),
            ImportStrategy::Skip => write!(f, "skip"),
            ImportStrategy::Merge => write!(f, "merge"),
            ImportStrategy::Overwrite => write!(f, "overwrite"),
        }
    }
}

impl FromStr for ImportStrategy {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "replace" => Ok(ImportStrategy::Replace),
            "skip" => Ok(ImportStrategy::Skip),
            "merge" => Ok(ImportStrategy::Merge),
            "overwrite" => Ok(ImportStrategy::Overwrite),
            other => Err(format!(
                "unknown strategy '{}': expected replace, skip, merge or overwrite",
                other
            )),
        }
    }
}

/// `overwrite` matches rows by id, which is meaningless when the export did
/// not preserve ids; such runs fall back to `merge`.
pub fn effective_strategy(requested: ImportStrategy, preserve_ids: bool) -> ImportStrategy {
    match requested {
        ImportStrategy::Overwrite if !preserve_ids => ImportStrategy::Merge,
        other => other,
    }
}

/// Options for one import run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ImportOptions {
    pub strategy: ImportStrategy,
    /// Only import these tables (others in the snapshot are ignored).
    pub tables: Option<Vec<String>>,
    /// Override the snapshot's `metadata.preserveIds`.
    pub preserve_ids: Option<bool>,
    /// Suspend FK checks for the duration of the run.
    pub disable_fk_checks: bool,
    /// Row conflict/failure events emitted per table.
    pub sample_limit: usize,
    /// Insert exported documentation rows directly if none survive the import.
    pub documentation_fallback: bool,
}

impl Default for ImportOptions {
    fn default() -> Self {
        Self {
            strategy: ImportStrategy::default(),
            tables: None,
            preserve_ids: None,
            disable_fk_checks: true,
            sample_limit: 5,
            documentation_fallback: true,
        }
    }
}

impl ImportOptions {
    pub fn with_strategy(strategy: ImportStrategy) -> Self {
        Self {
            strategy,
            ..Self::default()
        }
    }
}

/// Row tallies.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RowCounts {
    pub imported: u64,
    pub skipped: u64,
    pub errored: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TableStatus {
    #[default]
    Imported,
    Skipped,
    Failed,
}

/// Per-table outcome.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TableStats {
    /// Rows in the snapshot.
    pub rows: usize,
    #[serde(flatten)]
    pub counts: RowCounts,
    pub status: TableStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(skip)]
    by_type: BTreeMap<String, RowCounts>,
    #[serde(skip)]
    sampled: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RowOutcome {
    Imported,
    Skipped,
    Errored,
}

impl TableStats {
    fn new(rows: usize) -> Self {
        Self {
            rows,
            ..Self::default()
        }
    }

    fn record(&mut self, table: &str, row: &Row, outcome: RowOutcome) {
        let bump = |counts: &mut RowCounts| match outcome {
            RowOutcome::Imported => counts.imported += 1,
            RowOutcome::Skipped => counts.skipped += 1,
            RowOutcome::Errored => counts.errored += 1,
        };
        bump(&mut self.counts);
        if table == CONTENT_TABLE {
            let content_type = row
                .get(CONTENT_TYPE_COLUMN)
                .and_then(Value::as_str)
                .unwrap_or("unknown")
                .to_string();
            bump(self.by_type.entry(content_type).or_default());
        }
    }

    /// True for the first `limit` calls.
    fn sample(&mut self, limit: usize) -> bool {
        self.sampled += 1;
        self.sampled <= limit
    }
}

/// A table-level failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TableError {
    pub table: String,
    pub message: String,
}

/// Outcome of a completed run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportResult {
    pub success: bool,
    /// Strategy actually applied (after the overwrite downgrade).
    pub strategy: ImportStrategy,
    pub tables_imported: usize,
    pub rows_imported: u64,
    pub errors: Vec<TableError>,
    pub skipped_tables: Vec<String>,
    pub tables: BTreeMap<String, TableStats>,
    /// Content table breakdown by content type.
    pub content_types: BTreeMap<String, RowCounts>,
    /// Row counts read back from the target after commit.
    pub final_counts: BTreeMap<String, u64>,
    pub sequences_resynced: Vec<String>,
    pub clones_created: usize,
    /// Content rows appended unordered by cycle breaking.
    pub hierarchy_unresolved: usize,
    pub documentation_fallback_rows: u64,
    pub warnings: Vec<String>,
}

/// Restores snapshots through one connection.
pub struct Importer<'c, C: Connection + ?Sized> {
    conn: &'c mut C,
    sink: Arc<dyn EventSink>,
    ids: Box<dyn IdGenerator>,
}

impl<'c, C: Connection + ?Sized> Importer<'c, C> {
    pub fn new(conn: &'c mut C) -> Self {
        Self {
            conn,
            sink: Arc::new(TracingSink),
            ids: Box::new(UuidGenerator),
        }
    }

    pub fn with_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sink = sink;
        self
    }

    pub fn with_id_generator(mut self, ids: Box<dyn IdGenerator>) -> Self {
        self.ids = ids;
        self
    }

    /// Import from JSON text.
    pub async fn import_str(&mut self, json: &str, options: &ImportOptions) -> Result<ImportResult> {
        let snapshot = Snapshot::from_json(json)?;
        self.import_snapshot(&snapshot, options).await
    }

    /// Import from a UTF-8 encoded buffer.
    pub async fn import_bytes(
        &mut self,
        bytes: &[u8],
        options: &ImportOptions,
    ) -> Result<ImportResult> {
        let snapshot = Snapshot::from_bytes(bytes)?;
        self.import_snapshot(&snapshot, options).await
    }

    /// Import an already parsed document.
    pub async fn import_value(
        &mut self,
        value: Value,
        options: &ImportOptions,
    ) -> Result<ImportResult> {
        let snapshot = Snapshot::from_value(value)?;
        self.import_snapshot(&snapshot, options).await
    }

    pub async fn import_snapshot(
        &mut self,
        snapshot: &Snapshot,
        options: &ImportOptions,
    ) -> Result<ImportResult> {
        if let Some(error) = validate_version(&snapshot.metadata.version).error {
            return Err(ImportError::Validation(error));
        }

        let preserve_ids = options.preserve_ids.unwrap_or(snapshot.metadata.preserve_ids);
        let strategy = effective_strategy(options.strategy, preserve_ids);

        // Rows are materialized up front so a malformed table fails the run
        // before the transaction opens.
        let names = order::filter_tables(&snapshot.table_names(), options.tables.as_deref());
        let mut plan = Vec::new();
        for table in order::order_tables(&names) {
            let rows = snapshot.table_rows(&table)?;
            plan.push((table, rows));
        }
        let instances = InstanceIndex::from_rows(snapshot.table_rows(SHARED_INSTANCE_TABLE)?);

        let dialect = self.conn.dialect();
        let resolver = ConflictResolver::new(dialect);
        let mut run = Run {
            conn: &mut *self.conn,
            sink: Arc::clone(&self.sink),
            dialect,
            caps: *resolver.capabilities(),
            resolver,
            dedup: SharedInstanceDeduplicator::new(instances, &mut *self.ids),
            options,
            strategy,
            existing: HashSet::new(),
            result: ImportResult {
                success: false,
                strategy,
                ..ImportResult::default()
            },
        };

        run.emit(ImportEvent::RunStarted {
            strategy: strategy.to_string(),
            dialect: dialect.to_string(),
            tables: plan.len(),
        });
        if strategy != options.strategy {
            run.emit(ImportEvent::StrategyDowngraded {
                from: options.strategy.to_string(),
                to: strategy.to_string(),
            });
            run.result.warnings.push(format!(
                "snapshot does not preserve ids; '{}' downgraded to '{}'",
                options.strategy, strategy
            ));
        }

        run.execute(&plan).await?;
        run.post_commit(&plan).await;
        Ok(run.finish())
    }
}

/// State of one run.
struct Run<'r, C: Connection + ?Sized> {
    conn: &'r mut C,
    sink: Arc<dyn EventSink>,
    dialect: Dialect,
    caps: Capabilities,
    resolver: ConflictResolver,
    dedup: SharedInstanceDeduplicator<'r>,
    options: &'r ImportOptions,
    strategy: ImportStrategy,
    /// Plan tables present in the target.
    existing: HashSet<String>,
    result: ImportResult,
}

/// What a lenient write did with a row.
enum RowWrite {
    Imported,
    Skipped { reason: String, integrity: bool },
}

impl RowWrite {
    fn skipped(reason: &str) -> Self {
        RowWrite::Skipped {
            reason: reason.to_string(),
            integrity: false,
        }
    }
}

impl<'r, C: Connection + ?Sized> Run<'r, C> {
    fn emit(&self, event: ImportEvent) {
        self.sink.emit(&event);
    }

    fn warn(&mut self, message: String) {
        self.emit(ImportEvent::Warning {
            message: message.clone(),
        });
        self.result.warnings.push(message);
    }

    async fn exec(&mut self, sql: &str) -> Result<()> {
        self.conn.execute(sql, &[]).await?;
        Ok(())
    }

    fn fk_toggle(&self, scope: FkToggleScope) -> bool {
        self.options.disable_fk_checks && self.caps.fk_toggle == scope
    }

    /// Run the transaction, rolling back on any error that escapes it.
    async fn execute(&mut self, plan: &[(String, Vec<Row>)]) -> Result<()> {
        let dialect = self.dialect;

        if self.fk_toggle(FkToggleScope::OutsideTransaction) {
            self.exec(dialect.disable_fk_checks()).await?;
        }
        if let Err(err) = self.exec(dialect.begin()).await {
            self.restore_fk_checks().await;
            return Err(err);
        }

        let outcome = match self.transaction_body(plan).await {
            Ok(()) => self.commit().await,
            Err(err) => Err(err),
        };

        if let Err(err) = outcome {
            if let Err(rollback_err) = self.exec(dialect.rollback()).await {
                self.warn(format!("rollback failed: {}", rollback_err));
            }
            self.restore_fk_checks().await;
            return Err(err);
        }

        if self.fk_toggle(FkToggleScope::OutsideTransaction) {
            self.restore_fk_checks().await;
        }
        Ok(())
    }

    async fn commit(&mut self) -> Result<()> {
        if self.fk_toggle(FkToggleScope::InsideTransaction) {
            self.exec(self.dialect.enable_fk_checks()).await?;
        }
        self.exec(self.dialect.commit()).await
    }

    /// Best-effort re-enable; failure is only reported.
    async fn restore_fk_checks(&mut self) {
        if !self.options.disable_fk_checks {
            return;
        }
        if let Err(err) = self.exec(self.dialect.enable_fk_checks()).await {
            self.warn(format!("failed to re-enable foreign key checks: {}", err));
        }
    }

    async fn transaction_body(&mut self, plan: &[(String, Vec<Row>)]) -> Result<()> {
        if self.fk_toggle(FkToggleScope::InsideTransaction) {
            self.exec(self.dialect.disable_fk_checks()).await?;
        }

        for (table, _) in plan {
            let stmt = self.dialect.table_exists(table);
            if self.conn.query_count(&stmt.sql, &stmt.params).await? > 0 {
                self.existing.insert(table.clone());
            }
        }

        if self.strategy == ImportStrategy::Replace {
            self.clear_tables(plan).await?;
        }

        for (table, rows) in plan {
            self.import_table(table, rows).await?;
        }
        Ok(())
    }

    /// Empty every target table that will receive rows, children first.
    async fn clear_tables(&mut self, plan: &[(String, Vec<Row>)]) -> Result<()> {
        for (table, rows) in plan.iter().rev() {
            if rows.is_empty() || !self.existing.contains(table) {
                continue;
            }
            let stmt = self.dialect.delete_all(table);
            if let Err(err) = self.conn.execute(&stmt.sql, &stmt.params).await {
                let err = ImportError::Database(err);
                self.record_table_error(table, &err);
                return Err(ImportError::TableAborted {
                    table: table.clone(),
                    source: Box::new(err),
                });
            }
        }
        Ok(())
    }

    async fn import_table(&mut self, table: &str, rows: &[Row]) -> Result<()> {
        let mut stats = TableStats::new(rows.len());

        if rows.is_empty() {
            self.skip_table(table, stats, "no rows in export");
            return Ok(());
        }
        if !self.existing.contains(table) {
            self.skip_table(table, stats, "table not found in target");
            return Ok(());
        }

        self.emit(ImportEvent::TableStarted {
            table: table.to_string(),
            rows: rows.len(),
        });

        if self.strategy.is_lenient() {
            self.import_table_lenient(table, rows, &mut stats).await?;
        } else {
            match self.import_table_strict(table, rows, &mut stats).await {
                Ok(true) => {}
                Ok(false) => {
                    self.skip_table(table, stats, "target table not empty");
                    return Ok(());
                }
                Err(err) => {
                    self.record_table_error(table, &err);
                    stats.status = TableStatus::Failed;
                    stats.reason = Some(err.to_string());
                    self.result.tables.insert(table.to_string(), stats);
                    return Err(ImportError::TableAborted {
                        table: table.to_string(),
                        source: Box::new(err),
                    });
                }
            }
        }

        self.complete_table(table, stats);
        Ok(())
    }

    /// `replace` / `skip`: every row must go in. Returns false when `skip`
    /// finds existing data.
    async fn import_table_strict(
        &mut self,
        table: &str,
        rows: &[Row],
        stats: &mut TableStats,
    ) -> Result<bool> {
        if self.strategy == ImportStrategy::Skip {
            let stmt = self.dialect.count(table);
            if self.conn.query_count(&stmt.sql, &stmt.params).await? > 0 {
                return Ok(false);
            }
        }

        for mut row in self.ordered_rows(table, rows) {
            self.prepare_row(table, &mut row).await?;
            self.resolver.insert(&mut *self.conn, table, &row).await?;
            stats.record(table, &row, RowOutcome::Imported);
        }
        Ok(true)
    }

    /// `merge` / `overwrite`: row failures are counted and skipped. A table
    /// failure rolls back to the table savepoint and the run continues.
    async fn import_table_lenient(
        &mut self,
        table: &str,
        rows: &[Row],
        stats: &mut TableStats,
    ) -> Result<()> {
        let savepoint = if self.caps.savepoints {
            let name = savepoint_name(table, None, self.caps.max_identifier_len);
            self.exec(&self.dialect.savepoint(&name)).await?;
            Some(name)
        } else {
            None
        };
        let clones_before = self.result.clones_created;
        let claims = (table == INSTANCE_LINK_TABLE).then(|| self.dedup.checkpoint());

        match self.write_rows_lenient(table, rows, stats).await {
            Ok(()) => {
                if let Some(name) = &savepoint {
                    self.exec(&self.dialect.release_savepoint(name)).await?;
                }
            }
            Err(err) => {
                if let Some(name) = &savepoint {
                    self.exec(&self.dialect.rollback_to_savepoint(name)).await?;
                    self.exec(&self.dialect.release_savepoint(name)).await?;
                    // Everything this table wrote is gone, clones included.
                    stats.counts.errored += stats.counts.imported;
                    stats.counts.imported = 0;
                    stats.by_type.clear();
                    self.result.clones_created = clones_before;
                    if let Some(claims) = claims {
                        self.dedup.restore(claims);
                    }
                }
                // Rows never attempted count as errored.
                let visited = stats.counts.imported + stats.counts.skipped + stats.counts.errored;
                stats.counts.errored += (stats.rows as u64).saturating_sub(visited);
                stats.reason = Some(err.to_string());
                self.record_table_error(table, &err);
                stats.status = TableStatus::Failed;
            }
        }
        Ok(())
    }

    async fn write_rows_lenient(
        &mut self,
        table: &str,
        rows: &[Row],
        stats: &mut TableStats,
    ) -> Result<()> {
        let limit = self.options.sample_limit;
        for mut row in self.ordered_rows(table, rows) {
            let written = match self.prepare_row(table, &mut row).await {
                Ok(()) => self.write_row_lenient(table, &row).await,
                Err(err) => Err(err),
            };
            match written {
                Ok(RowWrite::Imported) => stats.record(table, &row, RowOutcome::Imported),
                Ok(RowWrite::Skipped { reason, integrity }) => {
                    stats.record(table, &row, RowOutcome::Skipped);
                    if stats.sample(limit) {
                        self.emit(ImportEvent::RowConflict {
                            table: table.to_string(),
                            id: row_id(&row),
                            reason,
                            integrity,
                        });
                    }
                }
                Err(err @ ImportError::Row { .. }) => {
                    stats.record(table, &row, RowOutcome::Errored);
                    if stats.sample(limit) {
                        self.emit(ImportEvent::RowFailed {
                            table: table.to_string(),
                            id: row_id(&row),
                            error: err.to_string(),
                        });
                    }
                }
                // Failures outside a row attempt (savepoint control, lookups)
                // leave the table in an unknown state.
                Err(err) => return Err(err),
            }
        }
        Ok(())
    }

    async fn write_row_lenient(&mut self, table: &str, row: &Row) -> Result<RowWrite> {
        let has_id = row.get("id").is_some_and(|v| !v.is_null());
        if self.strategy == ImportStrategy::Overwrite && has_id {
            let written = self.resolver.upsert_row(&mut *self.conn, table, row).await?;
            return Ok(if written > 0 {
                RowWrite::Imported
            } else {
                RowWrite::skipped("update not confirmed")
            });
        }

        let outcome = self
            .resolver
            .insert_or_ignore(&mut *self.conn, table, row)
            .await?;
        Ok(match outcome.reason {
            None if outcome.inserted => RowWrite::Imported,
            Some(reason) => RowWrite::Skipped {
                reason: reason.to_string(),
                integrity: reason.is_integrity_problem(),
            },
            None => RowWrite::skipped("not inserted"),
        })
    }

    /// Rows in write order: hierarchy order for the content table.
    fn ordered_rows(&mut self, table: &str, rows: &[Row]) -> Vec<Row> {
        if table != CONTENT_TABLE || !self.strategy.orders_hierarchy() {
            return rows.to_vec();
        }
        let ordered = hierarchy::sort_by_hierarchy(rows.to_vec());
        if ordered.unresolved > 0 {
            self.result.hierarchy_unresolved += ordered.unresolved;
            self.emit(ImportEvent::HierarchyCycle {
                table: table.to_string(),
                rows: ordered.unresolved,
            });
        }
        ordered.rows
    }

    /// Normalize JSON payloads; for the link table, resolve shared instances.
    async fn prepare_row(&mut self, table: &str, row: &mut Row) -> Result<()> {
        jsonb::normalize_row(table, row);
        if table != INSTANCE_LINK_TABLE {
            return Ok(());
        }
        match self
            .dedup
            .resolve_link(&mut *self.conn, &self.resolver, row)
            .await?
        {
            LinkResolution::Unchanged => {}
            LinkResolution::Cloned {
                original,
                clone,
                post_id,
            } => {
                self.result.clones_created += 1;
                self.emit(ImportEvent::InstanceCloned {
                    original,
                    clone,
                    post_id,
                });
            }
            LinkResolution::Reused {
                original,
                existing,
                post_id,
            } => self.emit(ImportEvent::InstanceReused {
                original,
                existing,
                post_id,
            }),
        }
        Ok(())
    }

    fn skip_table(&mut self, table: &str, mut stats: TableStats, reason: &str) {
        stats.status = TableStatus::Skipped;
        stats.reason = Some(reason.to_string());
        self.emit(ImportEvent::TableSkipped {
            table: table.to_string(),
            reason: reason.to_string(),
        });
        self.result.skipped_tables.push(table.to_string());
        self.result.tables.insert(table.to_string(), stats);
    }

    fn complete_table(&mut self, table: &str, stats: TableStats) {
        if stats.status != TableStatus::Failed {
            self.emit(ImportEvent::TableCompleted {
                table: table.to_string(),
                imported: stats.counts.imported,
                skipped: stats.counts.skipped,
                errored: stats.counts.errored,
            });
        }
        for (content_type, counts) in &stats.by_type {
            let total = self
                .result
                .content_types
                .entry(content_type.clone())
                .or_default();
            total.imported += counts.imported;
            total.skipped += counts.skipped;
            total.errored += counts.errored;
        }
        self.result.tables.insert(table.to_string(), stats);
    }

    fn record_table_error(&mut self, table: &str, err: &ImportError) {
        self.emit(ImportEvent::TableFailed {
            table: table.to_string(),
            error: err.to_string(),
        });
        self.result.errors.push(TableError {
            table: table.to_string(),
            message: err.to_string(),
        });
    }

    /// Follow-up work after commit. Failures become warnings.
    async fn post_commit(&mut self, plan: &[(String, Vec<Row>)]) {
        self.resync_sequences(plan).await;
        self.reconcile_counts(plan).await;
        if self.options.documentation_fallback {
            self.documentation_fallback(plan).await;
        }
    }

    /// Move serial sequences past imported integer ids.
    async fn resync_sequences(&mut self, plan: &[(String, Vec<Row>)]) {
        if !self.caps.sequence_resync || !self.strategy.resyncs_sequences() {
            return;
        }
        for (table, rows) in plan {
            let imported = self
                .result
                .tables
                .get(table)
                .map_or(0, |stats| stats.counts.imported);
            let integer_ids = rows
                .first()
                .and_then(|row| row.get("id"))
                .is_some_and(|id| id.is_i64() || id.is_u64());
            if imported == 0 || !integer_ids {
                continue;
            }
            let Some(stmt) = self.dialect.resync_sequence(table) else {
                continue;
            };
            match self.conn.query(&stmt.sql, &stmt.params).await {
                Ok(_) => {
                    self.result.sequences_resynced.push(table.clone());
                    self.emit(ImportEvent::SequenceResynced {
                        table: table.clone(),
                    });
                }
                Err(err) => self.warn(format!("sequence resync for '{}' failed: {}", table, err)),
            }
        }
    }

    /// Read actual row counts back from the target.
    async fn reconcile_counts(&mut self, plan: &[(String, Vec<Row>)]) {
        for (table, _) in plan {
            if !self.existing.contains(table) {
                continue;
            }
            let stmt = self.dialect.count(table);
            match self.conn.query_count(&stmt.sql, &stmt.params).await {
                Ok(count) => {
                    self.result.final_counts.insert(table.clone(), count);
                }
                Err(err) => self.warn(format!("counting '{}' failed: {}", table, err)),
            }
        }
    }

    /// Insert exported documentation content directly when none of it is
    /// present after the import.
    async fn documentation_fallback(&mut self, plan: &[(String, Vec<Row>)]) {
        if !self.existing.contains(CONTENT_TABLE) {
            return;
        }
        let Some((_, rows)) = plan.iter().find(|(table, _)| table == CONTENT_TABLE) else {
            return;
        };
        let docs: Vec<&Row> = rows
            .iter()
            .filter(|row| {
                row.get(CONTENT_TYPE_COLUMN).and_then(Value::as_str) == Some(DOCUMENTATION_TYPE)
            })
            .collect();
        if docs.is_empty() {
            return;
        }

        let stmt = self.dialect.count_where(
            CONTENT_TABLE,
            CONTENT_TYPE_COLUMN,
            SqlValue::Text(DOCUMENTATION_TYPE.to_string()),
        );
        match self.conn.query_count(&stmt.sql, &stmt.params).await {
            Ok(0) => {}
            Ok(_) => return,
            Err(err) => {
                self.warn(format!("documentation count failed: {}", err));
                return;
            }
        }

        let mut inserted = 0;
        for row in docs {
            let mut row = row.clone();
            jsonb::normalize_row(CONTENT_TABLE, &mut row);
            match self.resolver.insert(&mut *self.conn, CONTENT_TABLE, &row).await {
                Ok(()) => inserted += 1,
                Err(err) => self.warn(format!("documentation fallback insert failed: {}", err)),
            }
        }
        if inserted > 0 {
            self.result.documentation_fallback_rows = inserted;
            self.warn(format!(
                "no documentation content survived the import; inserted {} rows directly",
                inserted
            ));
            if let Some(count) = self.result.final_counts.get_mut(CONTENT_TABLE) {
                *count += inserted;
            }
        }
    }

    fn finish(mut self) -> ImportResult {
        let result = &mut self.result;
        result.success = true;
        result.tables_imported = result
            .tables
            .values()
            .filter(|stats| stats.status == TableStatus::Imported)
            .count();
        result.rows_imported = result.tables.values().map(|s| s.counts.imported).sum();

        self.emit(ImportEvent::Summary {
            success: true,
            tables_imported: self.result.tables_imported,
            rows_imported: self.result.rows_imported,
            errors: self.result.errors.len(),
        });
        self.result
    }
}
