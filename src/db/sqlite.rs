//! SQLite driver for the [`Connection`] trait, backed by rusqlite.

use super::{Connection, Dialect, Row, SqlValue};
use crate::error::{DbError, DbErrorKind};
use async_trait::async_trait;
use base64::Engine;
use rusqlite::types::{ToSqlOutput, ValueRef};
use rusqlite::{ToSql, ffi};
use serde_json::Value;
use std::path::Path;

/// Exclusive handle to a SQLite database.
pub struct SqliteConnection {
    conn: rusqlite::Connection,
}

impl SqliteConnection {
    /// Open or create the database at the given path.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, DbError> {
        let conn = rusqlite::Connection::open(path)?;
        conn.execute_batch(
            "PRAGMA foreign_keys=ON;
             PRAGMA busy_timeout=5000;",
        )?;
        Ok(Self { conn })
    }

    /// Open an in-memory database (for testing).
    pub fn open_in_memory() -> Result<Self, DbError> {
        let conn = rusqlite::Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        Ok(Self { conn })
    }

    /// Run a batch of statements without parameters (schema setup and the like).
    pub fn execute_batch(&self, sql: &str) -> Result<(), DbError> {
        self.conn.execute_batch(sql)?;
        Ok(())
    }
}

impl ToSql for SqlValue {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(match self {
            SqlValue::Null => ToSqlOutput::from(rusqlite::types::Null),
            SqlValue::Bool(b) => ToSqlOutput::from(i64::from(*b)),
            SqlValue::Int(i) => ToSqlOutput::from(*i),
            SqlValue::Float(f) => ToSqlOutput::from(*f),
            SqlValue::Text(s) => ToSqlOutput::from(s.as_str()),
            SqlValue::Json(v) => ToSqlOutput::from(v.to_string()),
        })
    }
}

fn value_from_sqlite(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => Value::from(i),
        ValueRef::Real(f) => serde_json::Number::from_f64(f)
            .map(Value::Number)
            .unwrap_or(Value::Null),
        ValueRef::Text(bytes) => Value::String(String::from_utf8_lossy(bytes).into_owned()),
        ValueRef::Blob(bytes) => {
            Value::String(base64::engine::general_purpose::STANDARD.encode(bytes))
        }
    }
}

/// Pull the `table.column` list out of messages like
/// `UNIQUE constraint failed: users.email`.
fn constraint_from_message(message: &str) -> Option<String> {
    message
        .split_once("constraint failed: ")
        .map(|(_, rest)| rest.trim().to_string())
        .filter(|s| !s.is_empty())
}

impl From<rusqlite::Error> for DbError {
    fn from(err: rusqlite::Error) -> Self {
        if let rusqlite::Error::SqliteFailure(ref failure, ref message) = err {
            let kind = match failure.extended_code {
                ffi::SQLITE_CONSTRAINT_UNIQUE | ffi::SQLITE_CONSTRAINT_PRIMARYKEY => {
                    DbErrorKind::UniqueViolation
                }
                ffi::SQLITE_CONSTRAINT_FOREIGNKEY => DbErrorKind::ForeignKeyViolation,
                ffi::SQLITE_CONSTRAINT_NOTNULL => DbErrorKind::NotNullViolation,
                _ => DbErrorKind::Other,
            };
            let text = message.clone().unwrap_or_else(|| err.to_string());
            let constraint = constraint_from_message(&text);
            let mut db_err = DbError::new(kind, text);
            if let Some(constraint) = constraint {
                db_err = db_err.with_constraint(constraint);
            }
            return db_err;
        }
        DbError::other(err.to_string())
    }
}

#[async_trait]
impl Connection for SqliteConnection {
    fn dialect(&self) -> Dialect {
        Dialect::Sqlite
    }

    async fn execute(&mut self, sql: &str, params: &[SqlValue]) -> Result<u64, DbError> {
        let mut stmt = self.conn.prepare_cached(sql)?;
        let affected = stmt.execute(rusqlite::params_from_iter(params.iter()))?;
        Ok(affected as u64)
    }

    async fn query(&mut self, sql: &str, params: &[SqlValue]) -> Result<Vec<Row>, DbError> {
        let mut stmt = self.conn.prepare_cached(sql)?;
        let columns: Vec<String> = stmt.column_names().into_iter().map(String::from).collect();
        let mut rows = stmt.query(rusqlite::params_from_iter(params.iter()))?;

        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            let mut map = Row::new();
            for (i, name) in columns.iter().enumerate() {
                map.insert(name.clone(), value_from_sqlite(row.get_ref(i)?));
            }
            out.push(map);
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn setup() -> SqliteConnection {
        let conn = SqliteConnection::open_in_memory().unwrap();
        conn.execute_batch(
            "CREATE TABLE users (id TEXT PRIMARY KEY, email TEXT NOT NULL UNIQUE, profile TEXT);
             CREATE TABLE posts (id TEXT PRIMARY KEY, author_id TEXT REFERENCES users(id));",
        )
        .unwrap();
        conn
    }

    #[tokio::test]
    async fn test_execute_and_query_roundtrip() {
        let mut conn = setup();
        let affected = conn
            .execute(
                "INSERT INTO users (id, email, profile) VALUES (?1, ?2, ?3)",
                &[
                    SqlValue::Text("u1".into()),
                    SqlValue::Text("a@x.com".into()),
                    SqlValue::Json(json!({"bio": "hi"})),
                ],
            )
            .await
            .unwrap();
        assert_eq!(affected, 1);

        let rows = conn
            .query("SELECT * FROM users WHERE id = ?1", &[SqlValue::Text("u1".into())])
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["email"], json!("a@x.com"));
        assert_eq!(rows[0]["profile"], json!(r#"{"bio":"hi"}"#));
    }

    #[tokio::test]
    async fn test_unique_violation_is_classified() {
        let mut conn = setup();
        let insert = "INSERT INTO users (id, email) VALUES (?1, ?2)";
        conn.execute(insert, &[SqlValue::Text("u1".into()), SqlValue::Text("a@x.com".into())])
            .await
            .unwrap();
        let err = conn
            .execute(insert, &[SqlValue::Text("u2".into()), SqlValue::Text("a@x.com".into())])
            .await
            .unwrap_err();
        assert_eq!(err.kind, DbErrorKind::UniqueViolation);
        assert_eq!(err.constraint.as_deref(), Some("users.email"));
    }

    #[tokio::test]
    async fn test_not_null_and_foreign_key_are_classified() {
        let mut conn = setup();
        let err = conn
            .execute(
                "INSERT INTO users (id, email) VALUES (?1, ?2)",
                &[SqlValue::Text("u1".into()), SqlValue::Null],
            )
            .await
            .unwrap_err();
        assert_eq!(err.kind, DbErrorKind::NotNullViolation);

        let err = conn
            .execute(
                "INSERT INTO posts (id, author_id) VALUES (?1, ?2)",
                &[SqlValue::Text("p1".into()), SqlValue::Text("missing".into())],
            )
            .await
            .unwrap_err();
        assert_eq!(err.kind, DbErrorKind::ForeignKeyViolation);
    }

    #[tokio::test]
    async fn test_query_count() {
        let mut conn = setup();
        let count = conn
            .query_count("SELECT COUNT(*) AS count FROM users", &[])
            .await
            .unwrap();
        assert_eq!(count, 0);
    }

    #[test]
    fn test_blob_is_base64() {
        assert_eq!(value_from_sqlite(ValueRef::Blob(b"hi")), json!("aGk="));
        assert_eq!(value_from_sqlite(ValueRef::Real(f64::NAN)), Value::Null);
    }
}
