//! Shared-instance deduplication for the post/module link table.
//!
//! A module instance scoped to a single post must not end up linked from two
//! different posts. The first post to claim an instance during a run keeps it;
//! every later claimant gets a fresh clone of the instance.

use super::jsonb::normalize_row;
use super::registry::{
    CLONE_RESET_COLUMNS, CLONE_TIMESTAMP_COLUMNS, INSTANCE_LINK_TABLE, INSTANCE_SCOPE_COLUMN,
    LINK_INSTANCE_COLUMN, LINK_POST_COLUMN, POST_SCOPE, SHARED_INSTANCE_TABLE,
};
use super::resolver::ConflictResolver;
use crate::db::{Connection, Row, SqlValue, id_key, row_id};
use crate::error::Result;
use serde_json::Value;
use std::collections::HashMap;

/// Source of identities for cloned instances.
pub trait IdGenerator: Send {
    fn generate(&mut self) -> String;
}

/// Random v4 UUIDs.
#[derive(Debug, Default, Clone, Copy)]
pub struct UuidGenerator;

impl IdGenerator for UuidGenerator {
    fn generate(&mut self) -> String {
        uuid::Uuid::new_v4().to_string()
    }
}

/// In-memory view of the snapshot's shared instances, keyed by id.
#[derive(Debug, Default, Clone)]
pub struct InstanceIndex {
    rows: HashMap<String, Row>,
}

impl InstanceIndex {
    pub fn from_rows(rows: Vec<Row>) -> Self {
        let rows = rows
            .into_iter()
            .filter_map(|row| row_id(&row).map(|id| (id, row)))
            .collect();
        Self { rows }
    }

    pub fn get(&self, id: &str) -> Option<&Row> {
        self.rows.get(id)
    }

    pub fn insert(&mut self, id: String, row: Row) {
        self.rows.insert(id, row);
    }
}

/// What happened to one link row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkResolution {
    /// Link left as exported.
    Unchanged,
    /// Instance cloned and the link rewired to the clone.
    Cloned {
        original: String,
        clone: String,
        post_id: String,
    },
    /// The link already exists in the target pointing at an earlier clone,
    /// which is reused.
    Reused {
        original: String,
        existing: String,
        post_id: String,
    },
}

/// Saved claim state, restored when the rows that made the claims are
/// rolled back.
#[derive(Debug, Clone)]
pub struct DedupCheckpoint {
    index: InstanceIndex,
    claims: HashMap<String, String>,
}

/// Per-run claim tracker for post-scoped shared instances.
pub struct SharedInstanceDeduplicator<'g> {
    index: InstanceIndex,
    claims: HashMap<String, String>,
    ids: &'g mut dyn IdGenerator,
}

impl<'g> SharedInstanceDeduplicator<'g> {
    pub fn new(index: InstanceIndex, ids: &'g mut dyn IdGenerator) -> Self {
        Self {
            index,
            claims: HashMap::new(),
            ids,
        }
    }

    pub fn index(&self) -> &InstanceIndex {
        &self.index
    }

    pub fn checkpoint(&self) -> DedupCheckpoint {
        DedupCheckpoint {
            index: self.index.clone(),
            claims: self.claims.clone(),
        }
    }

    pub fn restore(&mut self, checkpoint: DedupCheckpoint) {
        self.index = checkpoint.index;
        self.claims = checkpoint.claims;
    }

    /// Check one link row, cloning its instance when another post already
    /// claimed it. The clone is inserted right away; `link` is rewritten to
    /// point at it. A failed clone insert leaves the claims untouched.
    pub async fn resolve_link<C: Connection + ?Sized>(
        &mut self,
        conn: &mut C,
        resolver: &ConflictResolver,
        link: &mut Row,
    ) -> Result<LinkResolution> {
        let (Some(instance_id), Some(post_id)) = (
            link.get(LINK_INSTANCE_COLUMN).and_then(id_key),
            link.get(LINK_POST_COLUMN).and_then(id_key),
        ) else {
            return Ok(LinkResolution::Unchanged);
        };

        let Some(instance) = self.index.get(&instance_id) else {
            return Ok(LinkResolution::Unchanged);
        };
        if instance.get(INSTANCE_SCOPE_COLUMN).and_then(Value::as_str) != Some(POST_SCOPE) {
            return Ok(LinkResolution::Unchanged);
        }

        match self.claims.get(&instance_id) {
            None => {
                self.claims.insert(instance_id, post_id);
                return Ok(LinkResolution::Unchanged);
            }
            Some(owner) if *owner == post_id => return Ok(LinkResolution::Unchanged),
            Some(_) => {}
        }

        if let Some(existing) = self
            .existing_clone(conn, resolver, link, &instance_id)
            .await?
        {
            link.insert(LINK_INSTANCE_COLUMN.to_string(), Value::String(existing.clone()));
            self.claims.insert(existing.clone(), post_id.clone());
            return Ok(LinkResolution::Reused {
                original: instance_id,
                existing,
                post_id,
            });
        }

        let clone_id = self.ids.generate();
        let clone = clone_instance(instance, &clone_id);

        let mut stored = clone.clone();
        normalize_row(SHARED_INSTANCE_TABLE, &mut stored);
        resolver
            .insert_isolated(conn, SHARED_INSTANCE_TABLE, &stored)
            .await?;

        self.index.insert(clone_id.clone(), clone);
        self.claims.insert(clone_id.clone(), post_id.clone());
        link.insert(LINK_INSTANCE_COLUMN.to_string(), Value::String(clone_id.clone()));

        Ok(LinkResolution::Cloned {
            original: instance_id,
            clone: clone_id,
            post_id,
        })
    }

    /// Instance an already-imported copy of this link points at, when that is
    /// not the exported instance and still exists.
    async fn existing_clone<C: Connection + ?Sized>(
        &self,
        conn: &mut C,
        resolver: &ConflictResolver,
        link: &Row,
        instance_id: &str,
    ) -> Result<Option<String>> {
        let Some(link_id) = link.get("id").filter(|v| id_key(v).is_some()) else {
            return Ok(None);
        };
        let dialect = resolver.dialect();

        let stmt = dialect.select_by_id(INSTANCE_LINK_TABLE, SqlValue::from_json(link_id));
        let Some(current) = conn
            .query_one(&stmt.sql, &stmt.params)
            .await?
        else {
            return Ok(None);
        };
        let Some(current_instance) = current.get(LINK_INSTANCE_COLUMN).and_then(id_key) else {
            return Ok(None);
        };
        if current_instance == instance_id {
            return Ok(None);
        }

        let stmt = dialect.select_by_id(
            SHARED_INSTANCE_TABLE,
            SqlValue::Text(current_instance.clone()),
        );
        let found = conn.query_one(&stmt.sql, &stmt.params).await?;
        Ok(found.map(|_| current_instance))
    }
}

/// Copy of `instance` under a new id, global display fields cleared and
/// timestamps set to now.
fn clone_instance(instance: &Row, clone_id: &str) -> Row {
    let now = chrono::Utc::now().to_rfc3339();
    let mut clone = instance.clone();
    clone.insert("id".to_string(), Value::String(clone_id.to_string()));
    for column in CLONE_RESET_COLUMNS {
        if clone.contains_key(*column) {
            clone.insert(column.to_string(), Value::Null);
        }
    }
    for column in CLONE_TIMESTAMP_COLUMNS {
        if clone.contains_key(*column) {
            clone.insert(column.to_string(), Value::String(now.clone()));
        }
    }
    clone
}
