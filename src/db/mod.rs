//! Database collaborator layer for the import engine.
//!
//! The engine talks to the target database only through the [`Connection`]
//! trait: raw parameterized statements and queries. Everything dialect
//! specific (placeholders, upsert syntax, casts, FK toggling) is generated
//! by [`Dialect`] so that a connection implementation stays a thin driver
//! adapter.

pub mod dialect;
#[cfg(test)]
pub(crate) mod mock;
pub mod savepoint;
pub mod sqlite;

use crate::error::DbError;
use async_trait::async_trait;
use serde_json::Value;

pub use dialect::{BoundColumn, Capabilities, Dialect, FkToggleScope, Statement};
pub use savepoint::savepoint_name;
pub use sqlite::SqliteConnection;

/// A database row as column name -> JSON-compatible value.
pub type Row = serde_json::Map<String, Value>;

/// A value bound to a statement placeholder.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    /// Structured payload; drivers that accept native JSON bind it directly,
    /// the rest serialize it to text.
    Json(Value),
}

impl SqlValue {
    /// Convert an arbitrary JSON value into its natural bind value.
    pub fn from_json(value: &Value) -> Self {
        match value {
            Value::Null => SqlValue::Null,
            Value::Bool(b) => SqlValue::Bool(*b),
            Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    SqlValue::Int(i)
                } else if let Some(f) = n.as_f64() {
                    SqlValue::Float(f)
                } else {
                    // u64 above i64::MAX
                    SqlValue::Text(n.to_string())
                }
            }
            Value::String(s) => SqlValue::Text(s.clone()),
            Value::Array(_) | Value::Object(_) => SqlValue::Json(value.clone()),
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, SqlValue::Null)
    }
}

/// Connection or transaction handle to the target database.
///
/// Implementations execute statements exactly as given; transaction and
/// savepoint directives are plain statements produced by [`Dialect`].
/// Errors must be classified into [`DbErrorKind`](crate::error::DbErrorKind)
/// so the conflict resolver can tell constraint violations apart from
/// genuine failures.
#[async_trait]
pub trait Connection: Send {
    /// Which SQL dialect this connection speaks.
    fn dialect(&self) -> Dialect;

    /// Execute a statement, returning the affected row count.
    async fn execute(&mut self, sql: &str, params: &[SqlValue]) -> Result<u64, DbError>;

    /// Run a query and return all rows.
    async fn query(&mut self, sql: &str, params: &[SqlValue]) -> Result<Vec<Row>, DbError>;

    /// Run a query and return the first row, if any.
    async fn query_one(&mut self, sql: &str, params: &[SqlValue]) -> Result<Option<Row>, DbError> {
        Ok(self.query(sql, params).await?.into_iter().next())
    }

    /// Run a `COUNT(*) AS count` style query.
    async fn query_count(&mut self, sql: &str, params: &[SqlValue]) -> Result<u64, DbError> {
        let row = self.query_one(sql, params).await?;
        Ok(row.as_ref().map(count_from_row).unwrap_or(0))
    }
}

/// Normalize an id-like value for comparison and display. Strings and
/// numbers are ids; anything else (null, objects) is not.
pub fn id_key(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// The row's `id`, if it has a usable one.
pub fn row_id(row: &Row) -> Option<String> {
    row.get("id").and_then(id_key)
}

/// Read the `count` column of an aggregate row. Drivers disagree on whether
/// counts come back as integers or numeric strings.
pub fn count_from_row(row: &Row) -> u64 {
    match row.get("count").or_else(|| row.values().next()) {
        Some(Value::Number(n)) => n.as_u64().unwrap_or(0),
        Some(Value::String(s)) => s.parse().unwrap_or(0),
        _ => 0,
    }
}
