//! Scripted connection for unit tests of dialects without a bundled driver.

use super::{Connection, Dialect, Row, SqlValue};
use crate::error::DbError;
use async_trait::async_trait;

pub enum Reply {
    Affected(u64),
    Rows(Vec<Row>),
}

type Handler = Box<dyn FnMut(&str, &[SqlValue]) -> Result<Reply, DbError> + Send>;

/// Records every statement and answers from a handler closure.
pub struct ScriptedConnection {
    dialect: Dialect,
    handler: Handler,
    pub log: Vec<String>,
}

impl ScriptedConnection {
    pub fn new<F>(dialect: Dialect, handler: F) -> Self
    where
        F: FnMut(&str, &[SqlValue]) -> Result<Reply, DbError> + Send + 'static,
    {
        Self {
            dialect,
            handler: Box::new(handler),
            log: Vec::new(),
        }
    }

    /// Logged statements starting with `prefix`.
    pub fn statements(&self, prefix: &str) -> Vec<&str> {
        self.log
            .iter()
            .filter(|s| s.starts_with(prefix))
            .map(String::as_str)
            .collect()
    }
}

#[async_trait]
impl Connection for ScriptedConnection {
    fn dialect(&self) -> Dialect {
        self.dialect
    }

    async fn execute(&mut self, sql: &str, params: &[SqlValue]) -> Result<u64, DbError> {
        self.log.push(sql.to_string());
        match (self.handler)(sql, params)? {
            Reply::Affected(n) => Ok(n),
            Reply::Rows(rows) => Ok(rows.len() as u64),
        }
    }

    async fn query(&mut self, sql: &str, params: &[SqlValue]) -> Result<Vec<Row>, DbError> {
        self.log.push(sql.to_string());
        match (self.handler)(sql, params)? {
            Reply::Affected(_) => Ok(Vec::new()),
            Reply::Rows(rows) => Ok(rows),
        }
    }
}
