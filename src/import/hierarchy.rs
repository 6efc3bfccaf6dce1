//! Parent-before-child ordering for the content table.
//!
//! Content rows reference other content rows through `parent_id` and
//! `translation_of_id`. Rows are arranged so that, where possible, a
//! referenced row is inserted before the rows pointing at it. Ordering is
//! best effort: cycles are broken by appending the leftover rows as-is.

use super::registry::{PARENT_COLUMN, TRANSLATION_COLUMN};
use crate::db::{Row, id_key, row_id};
use std::collections::HashSet;

/// Result of [`sort_by_hierarchy`].
#[derive(Debug, Clone, Default)]
pub struct HierarchyOrder {
    pub rows: Vec<Row>,
    /// Rows appended unordered because their references never resolved
    /// (a cycle, or a self reference).
    pub unresolved: usize,
}

fn references(row: &Row) -> impl Iterator<Item = String> + '_ {
    [PARENT_COLUMN, TRANSLATION_COLUMN]
        .into_iter()
        .filter_map(|col| row.get(col).and_then(id_key))
}

/// Arrange content rows so parents and translation sources come first.
///
/// Rows without references form the initial frontier. Remaining rows are
/// scanned repeatedly; a row is emitted once every id it references has been
/// emitted or is not part of this batch at all (it already lives in the
/// target, or nowhere). The number of passes is bounded by the number of
/// pending rows; whatever is left afterwards is appended in input order.
pub fn sort_by_hierarchy(rows: Vec<Row>) -> HierarchyOrder {
    let batch_ids: HashSet<String> = rows.iter().filter_map(row_id).collect();

    let mut processed: HashSet<String> = HashSet::with_capacity(rows.len());
    let mut ordered: Vec<Row> = Vec::with_capacity(rows.len());
    let mut pending: Vec<Row> = Vec::new();

    for row in rows {
        if references(&row).next().is_none() {
            if let Some(id) = row_id(&row) {
                processed.insert(id);
            }
            ordered.push(row);
        } else {
            pending.push(row);
        }
    }

    let max_passes = pending.len();
    let mut passes = 0;
    while !pending.is_empty() && passes < max_passes {
        passes += 1;
        let before = pending.len();

        let mut still_pending = Vec::with_capacity(pending.len());
        for row in pending {
            let ready = references(&row)
                .all(|r| processed.contains(&r) || !batch_ids.contains(&r));
            if ready {
                if let Some(id) = row_id(&row) {
                    processed.insert(id);
                }
                ordered.push(row);
            } else {
                still_pending.push(row);
            }
        }
        pending = still_pending;

        if pending.len() == before {
            break;
        }
    }

    let unresolved = pending.len();
    ordered.extend(pending);
    HierarchyOrder {
        rows: ordered,
        unresolved,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{Value, json};

    fn row(value: Value) -> Row {
        value.as_object().cloned().unwrap()
    }

    fn ids(order: &HierarchyOrder) -> Vec<String> {
        order.rows.iter().filter_map(row_id).collect()
    }

    #[test]
    fn test_parents_before_children() {
        let rows = vec![
            row(json!({"id": "c", "parent_id": "b"})),
            row(json!({"id": "b", "parent_id": "a"})),
            row(json!({"id": "a", "parent_id": null})),
        ];
        let order = sort_by_hierarchy(rows);
        assert_eq!(ids(&order), vec!["a", "b", "c"]);
        assert_eq!(order.unresolved, 0);
    }

    #[test]
    fn test_translation_source_first() {
        let rows = vec![
            row(json!({"id": "fr", "translation_of_id": "en", "parent_id": "root"})),
            row(json!({"id": "en", "parent_id": "root"})),
            row(json!({"id": "root"})),
        ];
        let order = sort_by_hierarchy(rows);
        assert_eq!(ids(&order), vec!["root", "en", "fr"]);
    }

    #[test]
    fn test_two_row_cycle_terminates_and_keeps_both() {
        let rows = vec![
            row(json!({"id": "a", "parent_id": "b"})),
            row(json!({"id": "b", "parent_id": "a"})),
        ];
        let order = sort_by_hierarchy(rows);
        let mut got = ids(&order);
        got.sort();
        assert_eq!(got, vec!["a", "b"]);
        assert_eq!(order.unresolved, 2);
    }

    #[test]
    fn test_self_reference_is_flushed() {
        let rows = vec![
            row(json!({"id": "x", "parent_id": "x"})),
            row(json!({"id": "y"})),
        ];
        let order = sort_by_hierarchy(rows);
        assert_eq!(ids(&order), vec!["y", "x"]);
        assert_eq!(order.unresolved, 1);
    }

    #[test]
    fn test_reference_outside_batch_does_not_block() {
        let rows = vec![
            row(json!({"id": "child", "parent_id": "already-in-target"})),
            row(json!({"id": "grandchild", "parent_id": "child"})),
        ];
        let order = sort_by_hierarchy(rows);
        assert_eq!(ids(&order), vec!["child", "grandchild"]);
        assert_eq!(order.unresolved, 0);
    }

    #[test]
    fn test_numeric_ids() {
        let rows = vec![
            row(json!({"id": 2, "parent_id": 1})),
            row(json!({"id": 1})),
        ];
        let order = sort_by_hierarchy(rows);
        assert_eq!(ids(&order), vec!["1", "2"]);
    }

    #[test]
    fn test_cycle_does_not_drop_resolvable_rows() {
        let rows = vec![
            row(json!({"id": "a", "parent_id": "b"})),
            row(json!({"id": "b", "parent_id": "a"})),
            row(json!({"id": "r"})),
            row(json!({"id": "k", "parent_id": "r"})),
        ];
        let order = sort_by_hierarchy(rows);
        assert_eq!(order.rows.len(), 4);
        let got = ids(&order);
        assert_eq!(&got[..2], &["r".to_string(), "k".to_string()]);
        assert_eq!(order.unresolved, 2);
    }
}
