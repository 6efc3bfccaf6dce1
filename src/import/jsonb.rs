//! Structured-payload (JSONB) column handling.
//!
//! Exports are not consistent about JSON columns: some rows carry the
//! structure, others the JSON text of it. [`normalize_row`] brings every
//! registered column to its parsed form; [`bind_row`] turns a row into bind
//! columns, adding an explicit `jsonb` cast where the dialect needs one.

use super::registry::{is_jsonb_column, jsonb_columns};
use crate::db::{BoundColumn, Capabilities, Row, SqlValue};
use serde_json::Value;

/// Parse a JSON-text value into its structure. Text that is not valid JSON
/// is kept verbatim and stored downstream as a JSON string.
pub fn normalize_value(value: Value) -> Value {
    match value {
        Value::String(text) => match serde_json::from_str::<Value>(&text) {
            Ok(parsed) => parsed,
            Err(_) => Value::String(text),
        },
        other => other,
    }
}

/// Normalize every registered JSONB column of `row` in place.
pub fn normalize_row(table: &str, row: &mut Row) {
    for column in jsonb_columns(table) {
        if let Some(value) = row.get_mut(*column) {
            if value.is_string() {
                *value = normalize_value(value.take());
            }
        }
    }
}

/// Convert a row into bind columns, in row order.
///
/// Registered JSONB columns with a non-null value are bound as one JSON
/// value. When the dialect needs casts the value is serialized to text and
/// tagged with `::jsonb`; otherwise the driver receives the structure.
pub fn bind_row(table: &str, row: &Row, caps: &Capabilities) -> Vec<BoundColumn> {
    row.iter()
        .map(|(name, value)| {
            if is_jsonb_column(table, name) && !value.is_null() {
                if caps.jsonb_casts {
                    BoundColumn::new(name.clone(), SqlValue::Text(value.to_string()))
                        .with_cast("jsonb")
                } else {
                    BoundColumn::new(name.clone(), SqlValue::Json(value.clone()))
                }
            } else {
                BoundColumn::new(name.clone(), SqlValue::from_json(value))
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Dialect;
    use serde_json::json;

    fn row(value: Value) -> Row {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_normalize_parses_json_text() {
        let mut r = row(json!({
            "id": "p1",
            "meta_json": "{\"title\":\"Hi\",\"tags\":[1,2]}",
            "robots_json": {"index": true},
            "review_draft": null,
            "title": "{\"not\":\"registered\"}"
        }));
        normalize_row("posts", &mut r);
        assert_eq!(r["meta_json"], json!({"title": "Hi", "tags": [1, 2]}));
        assert_eq!(r["robots_json"], json!({"index": true}));
        assert_eq!(r["review_draft"], Value::Null);
        // Unregistered columns are left alone.
        assert_eq!(r["title"], json!("{\"not\":\"registered\"}"));
    }

    #[test]
    fn test_normalize_keeps_invalid_text() {
        let mut r = row(json!({"props": "not json {"}));
        normalize_row("module_instances", &mut r);
        assert_eq!(r["props"], json!("not json {"));
    }

    #[test]
    fn test_normalize_is_idempotent_for_structures() {
        let mut r = row(json!({"props": "{\"a\":[1,{\"b\":null}]}"}));
        normalize_row("module_instances", &mut r);
        let once = r.clone();
        normalize_row("module_instances", &mut r);
        assert_eq!(r, once);
    }

    #[test]
    fn test_bind_row_postgres_casts_json() {
        let caps = Dialect::Postgres.capabilities();
        let r = row(json!({"id": "m1", "props": {"a": 1}, "scope": "post"}));
        let cols = bind_row("module_instances", &r, &caps);
        assert_eq!(cols[0], BoundColumn::new("id", SqlValue::Text("m1".into())));
        assert_eq!(
            cols[1],
            BoundColumn::new("props", SqlValue::Text("{\"a\":1}".into())).with_cast("jsonb")
        );
        assert_eq!(cols[2].cast, None);
    }

    #[test]
    fn test_bind_row_null_json_is_not_cast() {
        let caps = Dialect::Postgres.capabilities();
        let r = row(json!({"props": null}));
        let cols = bind_row("module_instances", &r, &caps);
        assert_eq!(cols[0], BoundColumn::new("props", SqlValue::Null));
    }

    #[test]
    fn test_bind_row_sqlite_passes_structure() {
        let caps = Dialect::Sqlite.capabilities();
        let r = row(json!({"props": [1, 2]}));
        let cols = bind_row("module_instances", &r, &caps);
        assert_eq!(cols[0].value, SqlValue::Json(json!([1, 2])));
        assert_eq!(cols[0].cast, None);
    }

    #[test]
    fn test_scalar_json_column_survives_cast_roundtrip() {
        let caps = Dialect::Postgres.capabilities();
        let mut r = row(json!({"value": "\"dark\""}));
        normalize_row("site_settings", &mut r);
        assert_eq!(r["value"], json!("dark"));
        let cols = bind_row("site_settings", &r, &caps);
        let SqlValue::Text(stored) = &cols[0].value else {
            panic!("expected text");
        };
        let decoded: Value = serde_json::from_str(stored).unwrap();
        assert_eq!(decoded, json!("dark"));
    }
}
