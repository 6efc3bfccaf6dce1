//! Savepoint identifier generation.
//!
//! Savepoint names are bare SQL identifiers, so they cannot be quoted or
//! bound as parameters. Names are derived from the table and row id, reduced
//! to `[a-z0-9_]`, capped to the dialect's identifier length and suffixed
//! with a short random token so two attempts never share a name.

use regex_lite::Regex;
use std::sync::LazyLock;

const PREFIX: &str = "sp";
const SUFFIX_LEN: usize = 8;

static INVALID_CHARS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^a-z0-9_]+").expect("static pattern"));

fn sanitize(part: &str) -> String {
    let lowered = part.to_ascii_lowercase();
    INVALID_CHARS
        .replace_all(&lowered, "_")
        .trim_matches('_')
        .to_string()
}

/// Build a savepoint name for one attempt on `table`, optionally tied to a
/// row id. Always starts with a letter and never exceeds `max_len` bytes.
pub fn savepoint_name(table: &str, row_id: Option<&str>, max_len: usize) -> String {
    let token = uuid::Uuid::new_v4().simple().to_string();
    let suffix = &token[..SUFFIX_LEN];

    let mut body = sanitize(table);
    if let Some(id) = row_id.map(sanitize).filter(|s| !s.is_empty()) {
        if !body.is_empty() {
            body.push('_');
        }
        body.push_str(&id);
    }

    // prefix + '_' + body + '_' + suffix
    let fixed = PREFIX.len() + 1 + 1 + SUFFIX_LEN;
    let budget = max_len.saturating_sub(fixed);
    body.truncate(budget);
    let body = body.trim_end_matches('_');

    if body.is_empty() {
        format!("{}_{}", PREFIX, suffix)
    } else {
        format!("{}_{}_{}", PREFIX, body, suffix)
    }
}
