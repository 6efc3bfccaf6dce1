//! Export snapshot model and validation.
//!
//! A snapshot is the JSON document produced by the export side:
//!
//! ```json
//! {
//!   "metadata": { "version": "2.1.0", "exportedAt": "...", "preserveIds": true },
//!   "tables": {
//!     "users": [ { "id": "u1", "email": "a@x.com" } ],
//!     "module_instances": { "rows": [ { "id": "m1", "scope": "post" } ] }
//!   }
//! }
//! ```
//!
//! Table entries are either a bare array of rows or an object wrapping
//! `{ "rows": [...] }`. Table order in the document is preserved.

use crate::db::Row;
use crate::error::{ImportError, Result};
use regex_lite::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::io::Read;
use std::path::Path;
use std::sync::LazyLock;

/// Major export format version this engine reads.
pub const SUPPORTED_MAJOR_VERSION: u64 = 2;

static MAJOR_VERSION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*[vV]?(\d+)").expect("static pattern"));

/// Snapshot metadata block.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotMetadata {
    /// Export format version (semver-like; the major component gates import).
    pub version: String,

    /// ISO 8601 timestamp of export.
    #[serde(default)]
    pub exported_at: Option<String>,

    /// Whether row ids are meaningful identifiers that may be matched
    /// against existing rows.
    #[serde(default)]
    pub preserve_ids: bool,
}

/// A parsed export snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot {
    pub metadata: SnapshotMetadata,

    /// Table data keyed by table name, in document order.
    pub tables: serde_json::Map<String, Value>,
}

/// Outcome of [`validate_export`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValidationReport {
    pub valid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ValidationReport {
    fn ok() -> Self {
        Self {
            valid: true,
            error: None,
        }
    }

    fn fail(message: impl Into<String>) -> Self {
        Self {
            valid: false,
            error: Some(message.into()),
        }
    }
}

/// Extract the major component of a version string (`"2.1.0"` -> 2).
pub fn major_version(version: &str) -> Option<u64> {
    MAJOR_VERSION
        .captures(version)
        .and_then(|caps| caps.get(1))
        .and_then(|m| m.as_str().parse().ok())
}

/// Check that `version` has the supported major component.
pub fn validate_version(version: &str) -> ValidationReport {
    match major_version(version) {
        Some(major) if major == SUPPORTED_MAJOR_VERSION => ValidationReport::ok(),
        _ => ValidationReport::fail(format!(
            "incompatible export version {}: this importer supports version {}.x",
            version, SUPPORTED_MAJOR_VERSION
        )),
    }
}

/// Check format and version compatibility of an arbitrary parsed document.
///
/// Pure: performs no I/O and must run before any transaction is opened.
pub fn validate_export(value: &Value) -> ValidationReport {
    let Some(obj) = value.as_object() else {
        return ValidationReport::fail("export must be a JSON object");
    };

    let Some(metadata) = obj.get("metadata") else {
        return ValidationReport::fail("export is missing 'metadata'");
    };
    if !obj.contains_key("tables") {
        return ValidationReport::fail("export is missing 'tables'");
    }
    if !obj["tables"].is_object() {
        return ValidationReport::fail("'tables' must be an object keyed by table name");
    }

    let Some(version) = metadata.get("version").and_then(Value::as_str) else {
        return ValidationReport::fail("export metadata is missing 'version'");
    };

    validate_version(version)
}

impl Snapshot {
    /// Validate a parsed document and convert it into a snapshot.
    pub fn from_value(value: Value) -> Result<Self> {
        let report = validate_export(&value);
        if let Some(error) = report.error {
            return Err(ImportError::Validation(error));
        }
        Ok(serde_json::from_value(value)?)
    }

    /// Parse and validate a snapshot from JSON text.
    pub fn from_json(json: &str) -> Result<Self> {
        Self::from_value(serde_json::from_str(json)?)
    }

    /// Parse and validate a snapshot from a UTF-8 encoded buffer.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        Self::from_value(serde_json::from_slice(bytes)?)
    }

    /// Read a snapshot file (plain JSON or gzip).
    pub fn from_file(path: &Path) -> Result<Self> {
        let bytes = std::fs::read(path)?;

        // gzip magic bytes
        if bytes.starts_with(&[0x1f, 0x8b]) {
            let mut decoded = Vec::new();
            flate2::read::GzDecoder::new(bytes.as_slice()).read_to_end(&mut decoded)?;
            Self::from_bytes(&decoded)
        } else {
            Self::from_bytes(&bytes)
        }
    }

    /// Table names in document order.
    pub fn table_names(&self) -> Vec<&str> {
        self.tables.keys().map(String::as_str).collect()
    }

    /// Rows of `table`, accepting both the bare-array and `{rows: [...]}` shapes.
    /// A missing table yields no rows.
    pub fn table_rows(&self, table: &str) -> Result<Vec<Row>> {
        let Some(entry) = self.tables.get(table) else {
            return Ok(Vec::new());
        };

        let rows = match entry {
            Value::Array(rows) => rows,
            Value::Object(obj) => match obj.get("rows") {
                Some(Value::Array(rows)) => rows,
                Some(Value::Null) | None => return Ok(Vec::new()),
                Some(_) => {
                    return Err(ImportError::MalformedTable {
                        table: table.to_string(),
                        message: "'rows' must be an array".to_string(),
                    });
                }
            },
            Value::Null => return Ok(Vec::new()),
            _ => {
                return Err(ImportError::MalformedTable {
                    table: table.to_string(),
                    message: "expected an array of rows or an object with 'rows'".to_string(),
                });
            }
        };

        rows.iter()
            .enumerate()
            .map(|(i, row)| {
                row.as_object()
                    .cloned()
                    .ok_or_else(|| ImportError::MalformedTable {
                        table: table.to_string(),
                        message: format!("row {} is not an object", i),
                    })
            })
            .collect()
    }
}
