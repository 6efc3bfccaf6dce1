//! Row-level conflict resolution.
//!
//! Dialects whose failed statements abort the enclosing transaction
//! (Postgres) take the explicit path: every attempt runs inside its own
//! savepoint, secondary unique keys are cleared first and existence is checked
//! by id before inserting. The other dialects use their native
//! insert-or-ignore / upsert constructs.

use super::jsonb::bind_row;
use super::registry::unique_keys;
use crate::db::{
    BoundColumn, Capabilities, Connection, Dialect, Row, SqlValue, Statement, row_id,
    savepoint_name,
};
use crate::error::{DbError, DbErrorKind, ImportError, Result};

/// Why a row was not inserted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    /// A row with the same id already exists.
    Exists,
    /// The native insert-or-ignore construct reported no affected rows.
    Duplicate,
    UniqueViolation(Option<String>),
    ForeignKeyViolation(Option<String>),
    NotNullViolation(Option<String>),
}

impl SkipReason {
    fn from_db_error(err: &DbError) -> Option<Self> {
        let constraint = err.constraint.clone();
        match err.kind {
            DbErrorKind::UniqueViolation => Some(SkipReason::UniqueViolation(constraint)),
            DbErrorKind::ForeignKeyViolation => Some(SkipReason::ForeignKeyViolation(constraint)),
            DbErrorKind::NotNullViolation => Some(SkipReason::NotNullViolation(constraint)),
            DbErrorKind::Other => None,
        }
    }

    /// Violations that point at bad data rather than an existing row.
    pub fn is_integrity_problem(&self) -> bool {
        matches!(
            self,
            SkipReason::ForeignKeyViolation(_) | SkipReason::NotNullViolation(_)
        )
    }
}

impl std::fmt::Display for SkipReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let with = |f: &mut std::fmt::Formatter<'_>, what: &str, c: &Option<String>| match c {
            Some(c) => write!(f, "{} ({})", what, c),
            None => write!(f, "{}", what),
        };
        match self {
            SkipReason::Exists => write!(f, "row already exists"),
            SkipReason::Duplicate => write!(f, "duplicate key ignored"),
            SkipReason::UniqueViolation(c) => with(f, "unique violation", c),
            SkipReason::ForeignKeyViolation(c) => with(f, "foreign key violation", c),
            SkipReason::NotNullViolation(c) => with(f, "not-null violation", c),
        }
    }
}

/// Result of [`ConflictResolver::insert_or_ignore`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InsertOutcome {
    pub inserted: bool,
    pub reason: Option<SkipReason>,
}

impl InsertOutcome {
    fn inserted() -> Self {
        Self {
            inserted: true,
            reason: None,
        }
    }

    fn skipped(reason: SkipReason) -> Self {
        Self {
            inserted: false,
            reason: Some(reason),
        }
    }
}

/// Dialect-aware single-row writer.
#[derive(Debug, Clone, Copy)]
pub struct ConflictResolver {
    dialect: Dialect,
    caps: Capabilities,
}

impl ConflictResolver {
    pub fn new(dialect: Dialect) -> Self {
        Self {
            dialect,
            caps: dialect.capabilities(),
        }
    }

    pub fn dialect(&self) -> Dialect {
        self.dialect
    }

    pub fn capabilities(&self) -> &Capabilities {
        &self.caps
    }

    /// Plain insert. Any failure is returned with table/id context.
    pub async fn insert<C: Connection + ?Sized>(
        &self,
        conn: &mut C,
        table: &str,
        row: &Row,
    ) -> Result<()> {
        let columns = bind_row(table, row, &self.caps);
        let stmt = self.dialect.insert(table, &columns);
        run(conn, &stmt)
            .await
            .map(|_| ())
            .map_err(|e| ImportError::row(table, row_id(row), e))
    }

    /// Plain insert that, on dialects where a failed statement aborts the
    /// transaction, runs inside its own savepoint so a failure leaves the
    /// transaction usable.
    pub async fn insert_isolated<C: Connection + ?Sized>(
        &self,
        conn: &mut C,
        table: &str,
        row: &Row,
    ) -> Result<()> {
        if !self.caps.explicit_conflict_checks {
            return self.insert(conn, table, row).await;
        }
        let savepoint = self.open_savepoint(conn, table, row).await?;
        let columns = bind_row(table, row, &self.caps);
        let attempt = run(conn, &self.dialect.insert(table, &columns)).await;
        self.close_savepoint(conn, &savepoint, attempt.is_ok())
            .await?;
        attempt
            .map(|_| ())
            .map_err(|e| ImportError::row(table, row_id(row), e))
    }

    /// Insert the row unless it conflicts with an existing one.
    ///
    /// Unique, foreign-key and not-null violations are reported as a skip;
    /// anything else is an error.
    pub async fn insert_or_ignore<C: Connection + ?Sized>(
        &self,
        conn: &mut C,
        table: &str,
        row: &Row,
    ) -> Result<InsertOutcome> {
        let columns = bind_row(table, row, &self.caps);

        let attempt = if self.caps.explicit_conflict_checks {
            let savepoint = self.open_savepoint(conn, table, row).await?;
            let attempt = self.explicit_insert_or_ignore(conn, table, &columns).await;
            self.close_savepoint(conn, &savepoint, attempt.is_ok())
                .await?;
            attempt
        } else {
            let stmt = self.dialect.insert_ignore(table, &columns);
            run(conn, &stmt).await.map(|affected| {
                if affected > 0 {
                    InsertOutcome::inserted()
                } else {
                    InsertOutcome::skipped(SkipReason::Duplicate)
                }
            })
        };

        match attempt {
            Ok(outcome) => Ok(outcome),
            Err(err) => match SkipReason::from_db_error(&err) {
                Some(reason) => Ok(InsertOutcome::skipped(reason)),
                None => Err(ImportError::row(table, row_id(row), err)),
            },
        }
    }

    /// Insert the row, or update every non-id column of the row with the
    /// same id. A row holding one of this row's secondary unique keys under
    /// a different id is deleted first, so the incoming row wins.
    ///
    /// Returns the number of rows written: 1 on success, 0 when an update
    /// could not be confirmed.
    pub async fn upsert_row<C: Connection + ?Sized>(
        &self,
        conn: &mut C,
        table: &str,
        row: &Row,
    ) -> Result<u64> {
        let columns = bind_row(table, row, &self.caps);
        let Some(id) = columns.iter().find(|c| c.name == "id").map(|c| c.value.clone()) else {
            return Err(ImportError::row(
                table,
                None,
                DbError::other("upsert requires an id column"),
            ));
        };

        let attempt = if self.caps.explicit_conflict_checks {
            let savepoint = self.open_savepoint(conn, table, row).await?;
            let attempt = self.explicit_upsert(conn, table, &columns, id).await;
            self.close_savepoint(conn, &savepoint, attempt.is_ok())
                .await?;
            attempt
        } else {
            self.native_upsert(conn, table, &columns, id).await
        };

        attempt.map_err(|e| ImportError::row(table, row_id(row), e))
    }

    async fn explicit_insert_or_ignore<C: Connection + ?Sized>(
        &self,
        conn: &mut C,
        table: &str,
        columns: &[BoundColumn],
    ) -> std::result::Result<InsertOutcome, DbError> {
        let id = columns
            .iter()
            .find(|c| c.name == "id" && !c.value.is_null())
            .map(|c| c.value.clone());

        if let Some(id) = id {
            self.resolve_unique_conflicts(conn, table, columns, id.clone())
                .await?;
            if self.exists(conn, table, id).await? {
                return Ok(InsertOutcome::skipped(SkipReason::Exists));
            }
        }

        run(conn, &self.dialect.insert(table, columns)).await?;
        Ok(InsertOutcome::inserted())
    }

    async fn explicit_upsert<C: Connection + ?Sized>(
        &self,
        conn: &mut C,
        table: &str,
        columns: &[BoundColumn],
        id: SqlValue,
    ) -> std::result::Result<u64, DbError> {
        if self.exists(conn, table, id.clone()).await? {
            let updates: Vec<BoundColumn> =
                columns.iter().filter(|c| c.name != "id").cloned().collect();
            if updates.is_empty() {
                return Ok(1);
            }
            let affected = run(conn, &self.dialect.update_by_id(table, &updates, id.clone())).await?;
            let confirmed = self.exists(conn, table, id).await?;
            return Ok(if affected > 0 && confirmed { 1 } else { 0 });
        }

        self.resolve_unique_conflicts(conn, table, columns, id).await?;
        run(conn, &self.dialect.insert(table, columns)).await?;
        Ok(1)
    }

    async fn native_upsert<C: Connection + ?Sized>(
        &self,
        conn: &mut C,
        table: &str,
        columns: &[BoundColumn],
        id: SqlValue,
    ) -> std::result::Result<u64, DbError> {
        self.resolve_unique_conflicts(conn, table, columns, id.clone())
            .await?;
        let affected = run(conn, &self.dialect.upsert(table, columns)).await?;
        if affected > 0 {
            return Ok(1);
        }
        // MySQL reports 0 when the update changed nothing.
        Ok(u64::from(self.exists(conn, table, id).await?))
    }

    /// Delete rows that hold one of this row's secondary unique keys under a
    /// different id. Keys with a missing or null component are skipped.
    async fn resolve_unique_conflicts<C: Connection + ?Sized>(
        &self,
        conn: &mut C,
        table: &str,
        columns: &[BoundColumn],
        id: SqlValue,
    ) -> std::result::Result<u64, DbError> {
        let mut deleted = 0;
        for key in unique_keys(table) {
            let key_columns: Option<Vec<BoundColumn>> = key
                .iter()
                .map(|name| {
                    columns
                        .iter()
                        .find(|c| c.name == *name && !c.value.is_null())
                        .cloned()
                })
                .collect();
            let Some(key_columns) = key_columns else {
                continue;
            };
            let stmt = self
                .dialect
                .delete_unique_conflicts(table, &key_columns, id.clone());
            deleted += run(conn, &stmt).await?;
        }
        Ok(deleted)
    }

    async fn exists<C: Connection + ?Sized>(
        &self,
        conn: &mut C,
        table: &str,
        id: SqlValue,
    ) -> std::result::Result<bool, DbError> {
        let stmt = self.dialect.select_by_id(table, id);
        Ok(conn.query_one(&stmt.sql, &stmt.params).await?.is_some())
    }

    async fn open_savepoint<C: Connection + ?Sized>(
        &self,
        conn: &mut C,
        table: &str,
        row: &Row,
    ) -> Result<String> {
        let name = savepoint_name(table, row_id(row).as_deref(), self.caps.max_identifier_len);
        conn.execute(&self.dialect.savepoint(&name), &[]).await?;
        Ok(name)
    }

    /// Release the savepoint, rolling back to it first when the attempt failed.
    async fn close_savepoint<C: Connection + ?Sized>(
        &self,
        conn: &mut C,
        name: &str,
        succeeded: bool,
    ) -> Result<()> {
        if !succeeded {
            conn.execute(&self.dialect.rollback_to_savepoint(name), &[])
                .await?;
        }
        conn.execute(&self.dialect.release_savepoint(name), &[])
            .await?;
        Ok(())
    }
}

async fn run<C: Connection + ?Sized>(
    conn: &mut C,
    stmt: &Statement,
) -> std::result::Result<u64, DbError> {
    conn.execute(&stmt.sql, &stmt.params).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::SqliteConnection;
    use crate::db::mock::{Reply, ScriptedConnection};
    use serde_json::{Value, json};
    use std::sync::{Arc, Mutex};

    fn row(value: Value) -> Row {
        value.as_object().cloned().unwrap()
    }

    fn sqlite() -> SqliteConnection {
        let conn = SqliteConnection::open_in_memory().unwrap();
        conn.execute_batch(
            "CREATE TABLE users (id TEXT PRIMARY KEY, email TEXT NOT NULL UNIQUE, name TEXT, preferences TEXT);",
        )
        .unwrap();
        conn
    }

    async fn fetch(conn: &mut SqliteConnection, id: &str) -> Option<Row> {
        conn.query_one(
            "SELECT * FROM users WHERE id = ?1",
            &[SqlValue::Text(id.into())],
        )
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn test_sqlite_insert_or_ignore_skips_existing() {
        let mut conn = sqlite();
        let resolver = ConflictResolver::new(Dialect::Sqlite);
        let user = row(json!({"id": "u1", "email": "a@x.com", "name": "A"}));

        let first = resolver.insert_or_ignore(&mut conn, "users", &user).await.unwrap();
        assert!(first.inserted);

        let second = resolver.insert_or_ignore(&mut conn, "users", &user).await.unwrap();
        assert!(!second.inserted);
        assert_eq!(second.reason, Some(SkipReason::Duplicate));
    }

    #[tokio::test]
    async fn test_sqlite_insert_or_ignore_leaves_unique_holder_alone() {
        let mut conn = sqlite();
        let resolver = ConflictResolver::new(Dialect::Sqlite);
        resolver
            .insert(&mut conn, "users", &row(json!({"id": "old", "email": "a@x.com"})))
            .await
            .unwrap();

        let outcome = resolver
            .insert_or_ignore(&mut conn, "users", &row(json!({"id": "new", "email": "a@x.com"})))
            .await
            .unwrap();
        assert!(!outcome.inserted);
        assert!(fetch(&mut conn, "old").await.is_some());
        assert!(fetch(&mut conn, "new").await.is_none());
    }

    #[tokio::test]
    async fn test_sqlite_insert_or_ignore_reports_not_null_as_skip() {
        let mut conn = sqlite();
        let resolver = ConflictResolver::new(Dialect::Sqlite);
        // OR IGNORE swallows NOT NULL failures too; no rows affected.
        let outcome = resolver
            .insert_or_ignore(&mut conn, "users", &row(json!({"id": "u1", "email": null})))
            .await
            .unwrap();
        assert!(!outcome.inserted);
    }

    #[tokio::test]
    async fn test_sqlite_upsert_overwrites() {
        let mut conn = sqlite();
        let resolver = ConflictResolver::new(Dialect::Sqlite);
        resolver
            .insert(&mut conn, "users", &row(json!({"id": "a", "email": "a@x.com", "name": "old"})))
            .await
            .unwrap();

        let written = resolver
            .upsert_row(&mut conn, "users", &row(json!({"id": "a", "email": "a@x.com", "name": "new"})))
            .await
            .unwrap();
        assert_eq!(written, 1);
        assert_eq!(fetch(&mut conn, "a").await.unwrap()["name"], json!("new"));
    }

    #[tokio::test]
    async fn test_sqlite_upsert_incoming_wins_unique_key() {
        let mut conn = sqlite();
        let resolver = ConflictResolver::new(Dialect::Sqlite);
        resolver
            .insert(&mut conn, "users", &row(json!({"id": "local", "email": "a@x.com"})))
            .await
            .unwrap();

        let written = resolver
            .upsert_row(&mut conn, "users", &row(json!({"id": "remote", "email": "a@x.com"})))
            .await
            .unwrap();
        assert_eq!(written, 1);
        assert!(fetch(&mut conn, "local").await.is_none());
        assert!(fetch(&mut conn, "remote").await.is_some());
    }

    #[tokio::test]
    async fn test_upsert_without_id_is_an_error() {
        let mut conn = sqlite();
        let resolver = ConflictResolver::new(Dialect::Sqlite);
        let err = resolver
            .upsert_row(&mut conn, "users", &row(json!({"email": "a@x.com"})))
            .await
            .unwrap_err();
        assert!(matches!(err, ImportError::Row { .. }));
    }

    #[tokio::test]
    async fn test_plain_insert_error_carries_context() {
        let mut conn = sqlite();
        let resolver = ConflictResolver::new(Dialect::Sqlite);
        let user = row(json!({"id": "u1", "email": "a@x.com"}));
        resolver.insert(&mut conn, "users", &user).await.unwrap();
        let err = resolver.insert(&mut conn, "users", &user).await.unwrap_err();
        match err {
            ImportError::Row { table, id, source } => {
                assert_eq!(table, "users");
                assert_eq!(id.as_deref(), Some("u1"));
                assert_eq!(source.kind, DbErrorKind::UniqueViolation);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    fn pg(existing: Arc<Mutex<Vec<String>>>, fail_insert: Option<DbErrorKind>) -> ScriptedConnection {
        ScriptedConnection::new(Dialect::Postgres, move |sql, params| {
            if sql.starts_with("SELECT * FROM") {
                let id = match params.first() {
                    Some(SqlValue::Text(id)) => id.clone(),
                    _ => String::new(),
                };
                let rows = if existing.lock().unwrap().contains(&id) {
                    vec![json!({"id": id}).as_object().cloned().unwrap()]
                } else {
                    Vec::new()
                };
                return Ok(Reply::Rows(rows));
            }
            if sql.starts_with("INSERT") {
                if let Some(kind) = fail_insert {
                    return Err(DbError::new(kind, "insert failed").with_constraint("users_email_key"));
                }
                if let Some(SqlValue::Text(id)) = params.first() {
                    existing.lock().unwrap().push(id.clone());
                }
            }
            Ok(Reply::Affected(1))
        })
    }

    #[tokio::test]
    async fn test_postgres_insert_or_ignore_uses_savepoint_and_prechecks() {
        let existing = Arc::new(Mutex::new(Vec::new()));
        let mut conn = pg(existing.clone(), None);
        let resolver = ConflictResolver::new(Dialect::Postgres);
        let user = row(json!({"id": "u1", "email": "a@x.com", "preferences": {"theme": "dark"}}));

        let outcome = resolver.insert_or_ignore(&mut conn, "users", &user).await.unwrap();
        assert!(outcome.inserted);

        assert!(conn.log[0].starts_with("SAVEPOINT sp_users_u1_"));
        assert_eq!(
            conn.log[1],
            r#"DELETE FROM "users" WHERE "email" = $1 AND "id" <> $2"#
        );
        assert!(conn.log[2].starts_with("SELECT * FROM"));
        assert_eq!(
            conn.log[3],
            r#"INSERT INTO "users" ("id", "email", "preferences") VALUES ($1, $2, $3::jsonb)"#
        );
        assert!(conn.log[4].starts_with("RELEASE SAVEPOINT"));
        assert_eq!(conn.log.len(), 5);
    }

    #[tokio::test]
    async fn test_postgres_insert_or_ignore_existing_id_skips_without_insert() {
        let existing = Arc::new(Mutex::new(vec!["u1".to_string()]));
        let mut conn = pg(existing, None);
        let resolver = ConflictResolver::new(Dialect::Postgres);

        let outcome = resolver
            .insert_or_ignore(&mut conn, "users", &row(json!({"id": "u1", "email": "a@x.com"})))
            .await
            .unwrap();
        assert_eq!(outcome, InsertOutcome::skipped(SkipReason::Exists));
        assert!(conn.statements("INSERT").is_empty());
    }

    #[tokio::test]
    async fn test_postgres_constraint_failure_rolls_back_savepoint() {
        let existing = Arc::new(Mutex::new(Vec::new()));
        let mut conn = pg(existing, Some(DbErrorKind::ForeignKeyViolation));
        let resolver = ConflictResolver::new(Dialect::Postgres);

        let outcome = resolver
            .insert_or_ignore(&mut conn, "users", &row(json!({"id": "u1", "email": "a@x.com"})))
            .await
            .unwrap();
        assert!(!outcome.inserted);
        assert_eq!(
            outcome.reason,
            Some(SkipReason::ForeignKeyViolation(Some("users_email_key".into())))
        );
        assert_eq!(conn.statements("ROLLBACK TO SAVEPOINT").len(), 1);
        assert_eq!(conn.statements("RELEASE SAVEPOINT").len(), 1);
    }

    #[tokio::test]
    async fn test_postgres_other_failure_is_an_error() {
        let existing = Arc::new(Mutex::new(Vec::new()));
        let mut conn = pg(existing, Some(DbErrorKind::Other));
        let resolver = ConflictResolver::new(Dialect::Postgres);

        let err = resolver
            .insert_or_ignore(&mut conn, "users", &row(json!({"id": "u1", "email": "a@x.com"})))
            .await
            .unwrap_err();
        assert!(matches!(err, ImportError::Row { .. }));
        assert_eq!(conn.statements("ROLLBACK TO SAVEPOINT").len(), 1);
    }

    #[tokio::test]
    async fn test_postgres_upsert_updates_existing_and_confirms() {
        let existing = Arc::new(Mutex::new(vec!["a".to_string()]));
        let mut conn = pg(existing, None);
        let resolver = ConflictResolver::new(Dialect::Postgres);

        let written = resolver
            .upsert_row(&mut conn, "users", &row(json!({"id": "a", "email": "a@x.com", "name": "new"})))
            .await
            .unwrap();
        assert_eq!(written, 1);
        assert_eq!(
            conn.statements("UPDATE"),
            vec![r#"UPDATE "users" SET "email" = $1, "name" = $2 WHERE "id" = $3"#]
        );
        assert!(conn.statements("DELETE").is_empty());
        assert_eq!(conn.statements("SELECT * FROM").len(), 2);
    }

    #[tokio::test]
    async fn test_postgres_upsert_inserts_missing_after_clearing_unique() {
        let existing = Arc::new(Mutex::new(Vec::new()));
        let mut conn = pg(existing, None);
        let resolver = ConflictResolver::new(Dialect::Postgres);

        let written = resolver
            .upsert_row(&mut conn, "users", &row(json!({"id": "b", "email": "b@x.com"})))
            .await
            .unwrap();
        assert_eq!(written, 1);
        assert_eq!(conn.statements("DELETE").len(), 1);
        assert_eq!(conn.statements("INSERT").len(), 1);
        assert!(conn.statements("UPDATE").is_empty());
    }

    #[tokio::test]
    async fn test_postgres_upsert_unconfirmed_update_returns_zero() {
        let mut conn = ScriptedConnection::new(Dialect::Postgres, |sql, _| {
            if sql.starts_with("SELECT * FROM") {
                return Ok(Reply::Rows(vec![json!({"id": "a"}).as_object().cloned().unwrap()]));
            }
            if sql.starts_with("UPDATE") {
                return Ok(Reply::Affected(0));
            }
            Ok(Reply::Affected(1))
        });
        let resolver = ConflictResolver::new(Dialect::Postgres);
        let written = resolver
            .upsert_row(&mut conn, "users", &row(json!({"id": "a", "name": "x"})))
            .await
            .unwrap();
        assert_eq!(written, 0);
    }

    #[tokio::test]
    async fn test_postgres_isolated_insert_failure_rolls_back_savepoint() {
        let existing = Arc::new(Mutex::new(Vec::new()));
        let mut conn = pg(existing, Some(DbErrorKind::UniqueViolation));
        let resolver = ConflictResolver::new(Dialect::Postgres);

        let err = resolver
            .insert_isolated(&mut conn, "users", &row(json!({"id": "u1", "email": "a@x.com"})))
            .await
            .unwrap_err();
        assert!(matches!(err, ImportError::Row { .. }));
        assert!(conn.log[0].starts_with("SAVEPOINT sp_users_u1_"));
        assert!(conn.log[1].starts_with("INSERT"));
        assert!(conn.log[2].starts_with("ROLLBACK TO SAVEPOINT sp_users_u1_"));
        assert!(conn.log[3].starts_with("RELEASE SAVEPOINT sp_users_u1_"));
        assert_eq!(conn.log.len(), 4);
    }

    #[tokio::test]
    async fn test_sqlite_isolated_insert_is_a_plain_insert() {
        let mut conn = sqlite();
        let resolver = ConflictResolver::new(Dialect::Sqlite);
        let user = row(json!({"id": "u1", "email": "a@x.com"}));
        resolver.insert_isolated(&mut conn, "users", &user).await.unwrap();
        assert!(fetch(&mut conn, "u1").await.is_some());
        let err = resolver
            .insert_isolated(&mut conn, "users", &user)
            .await
            .unwrap_err();
        assert!(matches!(err, ImportError::Row { .. }));
    }

    #[test]
    fn test_skip_reason_display() {
        assert_eq!(
            SkipReason::UniqueViolation(Some("users.email".into())).to_string(),
            "unique violation (users.email)"
        );
        assert!(SkipReason::NotNullViolation(None).is_integrity_problem());
        assert!(!SkipReason::Exists.is_integrity_problem());
    }
}
