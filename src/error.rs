//! Structured error types for the import engine.

use thiserror::Error;

/// Classification of a database failure, used to decide whether a row
/// failure is a normal conflict or something worth aborting for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DbErrorKind {
    // Constraint violations
    UniqueViolation,
    ForeignKeyViolation,
    NotNullViolation,

    // Everything else (syntax, connection, permissions, ...)
    Other,
}

impl DbErrorKind {
    /// Map a Postgres SQLSTATE code to a kind.
    pub fn from_sqlstate(code: &str) -> Self {
        match code {
            "23505" => DbErrorKind::UniqueViolation,
            "23503" => DbErrorKind::ForeignKeyViolation,
            "23502" => DbErrorKind::NotNullViolation,
            _ => DbErrorKind::Other,
        }
    }
}

impl std::fmt::Display for DbErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DbErrorKind::UniqueViolation => write!(f, "unique violation"),
            DbErrorKind::ForeignKeyViolation => write!(f, "foreign key violation"),
            DbErrorKind::NotNullViolation => write!(f, "not-null violation"),
            DbErrorKind::Other => write!(f, "database error"),
        }
    }
}

/// Error reported by a [`Connection`](crate::db::Connection) implementation.
#[derive(Debug, Clone, Error)]
#[error("{kind}: {message}")]
pub struct DbError {
    pub kind: DbErrorKind,
    pub message: String,
    /// Constraint name (or `table.column` list) when the driver reports one.
    pub constraint: Option<String>,
}

impl DbError {
    pub fn new(kind: DbErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            constraint: None,
        }
    }

    pub fn other(message: impl Into<String>) -> Self {
        Self::new(DbErrorKind::Other, message)
    }

    /// Error from a server that reports SQLSTATE codes.
    pub fn from_sqlstate(code: &str, message: impl Into<String>) -> Self {
        Self::new(DbErrorKind::from_sqlstate(code), message)
    }

    pub fn with_constraint(mut self, constraint: impl Into<String>) -> Self {
        self.constraint = Some(constraint.into());
        self
    }
}

/// Errors surfaced by the import engine.
#[derive(Debug, Error)]
pub enum ImportError {
    /// Snapshot failed the pre-transaction gate. No database work was done.
    #[error("invalid export: {0}")]
    Validation(String),

    #[error("failed to parse export: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("failed to read export: {0}")]
    Io(#[from] std::io::Error),

    /// A table entry or one of its rows has the wrong shape.
    #[error("malformed table '{table}': {message}")]
    MalformedTable { table: String, message: String },

    #[error(transparent)]
    Database(#[from] DbError),

    /// A row-scoped database failure with table/id context attached.
    #[error("table '{table}' row {}: {source}", .id.as_deref().unwrap_or("<no id>"))]
    Row {
        table: String,
        id: Option<String>,
        #[source]
        source: DbError,
    },

    /// Table-fatal error under a strategy that does not tolerate partial
    /// failure; aborts the whole run.
    #[error("import of table '{table}' aborted: {source}")]
    TableAborted {
        table: String,
        #[source]
        source: Box<ImportError>,
    },
}

impl ImportError {
    pub fn row(table: &str, id: Option<String>, source: DbError) -> Self {
        ImportError::Row {
            table: table.to_string(),
            id,
            source,
        }
    }
}

/// Result type for import operations.
pub type Result<T> = std::result::Result<T, ImportError>;
