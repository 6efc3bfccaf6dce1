//! Table processing order.

use super::registry::priority_of;

/// Order `tables` for import: every table named in the priority list comes
/// first, in priority order; the rest follow in their original order.
///
/// Deterministic, and duplicates in the input are collapsed.
pub fn order_tables<S: AsRef<str>>(tables: &[S]) -> Vec<String> {
    let mut ordered: Vec<String> = Vec::with_capacity(tables.len());
    for table in tables {
        let table = table.as_ref();
        if !ordered.iter().any(|t| t == table) {
            ordered.push(table.to_string());
        }
    }
    // Stable, so unknown tables keep their input order.
    ordered.sort_by_key(|table| priority_of(table).unwrap_or(usize::MAX));
    ordered
}

/// Restrict `tables` to the caller-supplied subset, keeping input order.
pub fn filter_tables<'a>(tables: &[&'a str], only: Option<&[String]>) -> Vec<&'a str> {
    match only {
        Some(only) => tables
            .iter()
            .copied()
            .filter(|t| only.iter().any(|o| o == t))
            .collect(),
        None => tables.to_vec(),
    }
}
