//! SQL dialects and the statements the importer needs from each.
//!
//! The dialect is a closed set; per-dialect behavior that the engine branches
//! on is captured once in [`Capabilities`] at the start of a run.

use super::SqlValue;
use std::fmt;
use std::str::FromStr;

/// Supported relational database families.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Dialect {
    Postgres,
    MySql,
    Sqlite,
}

/// Where foreign-key check suspension has to be issued.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FkToggleScope {
    /// Toggled after `BEGIN` and restored before `COMMIT`.
    InsideTransaction,
    /// Only effective outside a transaction (SQLite ignores the pragma
    /// inside one), so toggled before `BEGIN` and restored after the end.
    OutsideTransaction,
}

/// What a dialect can do, consulted once per run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Capabilities {
    /// Supports `SAVEPOINT` inside a transaction.
    pub savepoints: bool,
    /// A failed statement aborts the enclosing transaction, so conflicts are
    /// checked explicitly inside a savepoint instead of relying on the
    /// native construct.
    pub explicit_conflict_checks: bool,
    /// JSON payloads need an explicit `::jsonb` cast when bound as text.
    pub jsonb_casts: bool,
    /// Serial sequences must be moved past imported ids by hand.
    pub sequence_resync: bool,
    pub fk_toggle: FkToggleScope,
    pub max_identifier_len: usize,
}

/// One column of a statement: name, bound value and optional SQL cast.
#[derive(Debug, Clone, PartialEq)]
pub struct BoundColumn {
    pub name: String,
    pub value: SqlValue,
    pub cast: Option<&'static str>,
}

impl BoundColumn {
    pub fn new(name: impl Into<String>, value: SqlValue) -> Self {
        Self {
            name: name.into(),
            value,
            cast: None,
        }
    }

    pub fn with_cast(mut self, cast: &'static str) -> Self {
        self.cast = Some(cast);
        self
    }
}

/// SQL text plus its positional parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    pub sql: String,
    pub params: Vec<SqlValue>,
}

impl Statement {
    fn new(sql: String, params: Vec<SqlValue>) -> Self {
        Self { sql, params }
    }

    fn bare(sql: impl Into<String>) -> Self {
        Self {
            sql: sql.into(),
            params: Vec::new(),
        }
    }
}

impl Dialect {
    pub fn capabilities(self) -> Capabilities {
        match self {
            Dialect::Postgres => Capabilities {
                savepoints: true,
                explicit_conflict_checks: true,
                jsonb_casts: true,
                sequence_resync: true,
                fk_toggle: FkToggleScope::InsideTransaction,
                max_identifier_len: 63,
            },
            Dialect::MySql => Capabilities {
                savepoints: true,
                explicit_conflict_checks: false,
                jsonb_casts: false,
                sequence_resync: false,
                fk_toggle: FkToggleScope::InsideTransaction,
                max_identifier_len: 64,
            },
            Dialect::Sqlite => Capabilities {
                savepoints: true,
                explicit_conflict_checks: false,
                jsonb_casts: false,
                sequence_resync: false,
                fk_toggle: FkToggleScope::OutsideTransaction,
                max_identifier_len: 64,
            },
        }
    }

    /// Quote an identifier (table or column name).
    pub fn quote_ident(self, name: &str) -> String {
        match self {
            Dialect::MySql => format!("`{}`", name.replace('`', "``")),
            Dialect::Postgres | Dialect::Sqlite => format!("\"{}\"", name.replace('"', "\"\"")),
        }
    }

    /// Placeholder for the 1-based parameter `index`.
    pub fn placeholder(self, index: usize) -> String {
        match self {
            Dialect::Postgres => format!("${}", index),
            Dialect::Sqlite => format!("?{}", index),
            Dialect::MySql => "?".to_string(),
        }
    }

    fn placeholder_with_cast(self, index: usize, cast: Option<&str>) -> String {
        match cast {
            Some(cast) => format!("{}::{}", self.placeholder(index), cast),
            None => self.placeholder(index),
        }
    }

    // Transaction control

    pub fn begin(self) -> &'static str {
        match self {
            Dialect::MySql => "START TRANSACTION",
            Dialect::Postgres | Dialect::Sqlite => "BEGIN",
        }
    }

    pub fn commit(self) -> &'static str {
        "COMMIT"
    }

    pub fn rollback(self) -> &'static str {
        "ROLLBACK"
    }

    pub fn savepoint(self, name: &str) -> String {
        format!("SAVEPOINT {}", name)
    }

    pub fn release_savepoint(self, name: &str) -> String {
        format!("RELEASE SAVEPOINT {}", name)
    }

    pub fn rollback_to_savepoint(self, name: &str) -> String {
        format!("ROLLBACK TO SAVEPOINT {}", name)
    }

    pub fn disable_fk_checks(self) -> &'static str {
        match self {
            Dialect::Postgres => "SET session_replication_role = replica",
            Dialect::MySql => "SET FOREIGN_KEY_CHECKS = 0",
            Dialect::Sqlite => "PRAGMA foreign_keys = OFF",
        }
    }

    pub fn enable_fk_checks(self) -> &'static str {
        match self {
            Dialect::Postgres => "SET session_replication_role = DEFAULT",
            Dialect::MySql => "SET FOREIGN_KEY_CHECKS = 1",
            Dialect::Sqlite => "PRAGMA foreign_keys = ON",
        }
    }

    // Table-scoped statements

    /// Returns a single `count` column: 1 if the table exists, else 0.
    pub fn table_exists(self, table: &str) -> Statement {
        let sql = match self {
            Dialect::Postgres => "SELECT COUNT(*) AS count FROM information_schema.tables \
                 WHERE table_schema = current_schema() AND table_name = $1"
                .to_string(),
            Dialect::MySql => "SELECT COUNT(*) AS count FROM information_schema.tables \
                 WHERE table_schema = DATABASE() AND table_name = ?"
                .to_string(),
            Dialect::Sqlite => {
                "SELECT COUNT(*) AS count FROM sqlite_master WHERE type = 'table' AND name = ?1"
                    .to_string()
            }
        };
        Statement::new(sql, vec![SqlValue::Text(table.to_string())])
    }

    pub fn count(self, table: &str) -> Statement {
        Statement::bare(format!(
            "SELECT COUNT(*) AS count FROM {}",
            self.quote_ident(table)
        ))
    }

    pub fn count_where(self, table: &str, column: &str, value: SqlValue) -> Statement {
        Statement::new(
            format!(
                "SELECT COUNT(*) AS count FROM {} WHERE {} = {}",
                self.quote_ident(table),
                self.quote_ident(column),
                self.placeholder(1)
            ),
            vec![value],
        )
    }

    pub fn delete_all(self, table: &str) -> Statement {
        Statement::bare(format!("DELETE FROM {}", self.quote_ident(table)))
    }

    pub fn select_by_id(self, table: &str, id: SqlValue) -> Statement {
        Statement::new(
            format!(
                "SELECT * FROM {} WHERE {} = {}",
                self.quote_ident(table),
                self.quote_ident("id"),
                self.placeholder(1)
            ),
            vec![id],
        )
    }

    /// Delete rows sharing every `key` column value with the incoming row
    /// but carrying a different id.
    pub fn delete_unique_conflicts(self, table: &str, key: &[BoundColumn], id: SqlValue) -> Statement {
        let mut clauses = Vec::with_capacity(key.len() + 1);
        let mut params = Vec::with_capacity(key.len() + 1);
        for (i, column) in key.iter().enumerate() {
            clauses.push(format!(
                "{} = {}",
                self.quote_ident(&column.name),
                self.placeholder_with_cast(i + 1, column.cast)
            ));
            params.push(column.value.clone());
        }
        clauses.push(format!(
            "{} <> {}",
            self.quote_ident("id"),
            self.placeholder(key.len() + 1)
        ));
        params.push(id);
        Statement::new(
            format!(
                "DELETE FROM {} WHERE {}",
                self.quote_ident(table),
                clauses.join(" AND ")
            ),
            params,
        )
    }

    fn column_list(self, columns: &[BoundColumn]) -> (String, String, Vec<SqlValue>) {
        let names = columns
            .iter()
            .map(|c| self.quote_ident(&c.name))
            .collect::<Vec<_>>()
            .join(", ");
        let values = columns
            .iter()
            .enumerate()
            .map(|(i, c)| self.placeholder_with_cast(i + 1, c.cast))
            .collect::<Vec<_>>()
            .join(", ");
        let params = columns.iter().map(|c| c.value.clone()).collect();
        (names, values, params)
    }

    /// Plain insert; any conflict is an error.
    pub fn insert(self, table: &str, columns: &[BoundColumn]) -> Statement {
        let (names, values, params) = self.column_list(columns);
        Statement::new(
            format!(
                "INSERT INTO {} ({}) VALUES ({})",
                self.quote_ident(table),
                names,
                values
            ),
            params,
        )
    }

    /// Insert that silently does nothing on a duplicate key.
    pub fn insert_ignore(self, table: &str, columns: &[BoundColumn]) -> Statement {
        let (names, values, params) = self.column_list(columns);
        let table = self.quote_ident(table);
        let sql = match self {
            Dialect::Postgres => format!(
                "INSERT INTO {} ({}) VALUES ({}) ON CONFLICT DO NOTHING",
                table, names, values
            ),
            Dialect::MySql => format!("INSERT IGNORE INTO {} ({}) VALUES ({})", table, names, values),
            Dialect::Sqlite => format!(
                "INSERT OR IGNORE INTO {} ({}) VALUES ({})",
                table, names, values
            ),
        };
        Statement::new(sql, params)
    }

    /// Insert keyed on `id`, updating every other column when it exists.
    pub fn upsert(self, table: &str, columns: &[BoundColumn]) -> Statement {
        let updates: Vec<&BoundColumn> = columns.iter().filter(|c| c.name != "id").collect();
        if updates.is_empty() {
            return self.insert_ignore(table, columns);
        }

        let (names, values, params) = self.column_list(columns);
        let quoted_table = self.quote_ident(table);
        let sql = match self {
            Dialect::MySql => {
                let set = updates
                    .iter()
                    .map(|c| {
                        let col = self.quote_ident(&c.name);
                        format!("{} = VALUES({})", col, col)
                    })
                    .collect::<Vec<_>>()
                    .join(", ");
                format!(
                    "INSERT INTO {} ({}) VALUES ({}) ON DUPLICATE KEY UPDATE {}",
                    quoted_table, names, values, set
                )
            }
            Dialect::Postgres | Dialect::Sqlite => {
                let set = updates
                    .iter()
                    .map(|c| {
                        let col = self.quote_ident(&c.name);
                        format!("{} = excluded.{}", col, col)
                    })
                    .collect::<Vec<_>>()
                    .join(", ");
                format!(
                    "INSERT INTO {} ({}) VALUES ({}) ON CONFLICT ({}) DO UPDATE SET {}",
                    quoted_table,
                    names,
                    values,
                    self.quote_ident("id"),
                    set
                )
            }
        };
        Statement::new(sql, params)
    }

    /// Update every given column of the row with the given id.
    pub fn update_by_id(self, table: &str, columns: &[BoundColumn], id: SqlValue) -> Statement {
        let mut params: Vec<SqlValue> = Vec::with_capacity(columns.len() + 1);
        let set = columns
            .iter()
            .enumerate()
            .map(|(i, c)| {
                params.push(c.value.clone());
                format!(
                    "{} = {}",
                    self.quote_ident(&c.name),
                    self.placeholder_with_cast(i + 1, c.cast)
                )
            })
            .collect::<Vec<_>>()
            .join(", ");
        params.push(id);
        Statement::new(
            format!(
                "UPDATE {} SET {} WHERE {} = {}",
                self.quote_ident(table),
                set,
                self.quote_ident("id"),
                self.placeholder(columns.len() + 1)
            ),
            params,
        )
    }

    /// Move the table's serial sequence past the largest imported id.
    pub fn resync_sequence(self, table: &str) -> Option<Statement> {
        match self {
            Dialect::Postgres => Some(Statement::new(
                format!(
                    "SELECT setval(pg_get_serial_sequence($1, 'id'), \
                     COALESCE((SELECT MAX({}) FROM {}), 0) + 1, false)",
                    self.quote_ident("id"),
                    self.quote_ident(table)
                ),
                vec![SqlValue::Text(self.quote_ident(table))],
            )),
            Dialect::MySql | Dialect::Sqlite => None,
        }
    }
}

impl fmt::Display for Dialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Dialect::Postgres => write!(f, "postgres"),
            Dialect::MySql => write!(f, "mysql"),
            Dialect::Sqlite => write!(f, "sqlite"),
        }
    }
}

impl FromStr for Dialect {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "postgres" | "postgresql" | "pg" => Ok(Dialect::Postgres),
            "mysql" | "mariadb" => Ok(Dialect::MySql),
            "sqlite" | "sqlite3" => Ok(Dialect::Sqlite),
            other => Err(format!("unsupported dialect: {}", other)),
        }
    }
}
