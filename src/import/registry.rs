//! Static per-table knowledge used by the importer.
//!
//! The importer has no schema introspector; what it knows about foreign-key
//! order, structured payload columns and secondary unique keys lives here,
//! keyed by table name.

/// Primary content table (self-referencing through parent/translation links).
pub const CONTENT_TABLE: &str = "posts";
pub const PARENT_COLUMN: &str = "parent_id";
pub const TRANSLATION_COLUMN: &str = "translation_of_id";
/// Discriminator used for per-type statistics on the content table.
pub const CONTENT_TYPE_COLUMN: &str = "type";
/// Content type guarded by the post-commit fallback insert.
pub const DOCUMENTATION_TYPE: &str = "documentation";

/// Shared sub-entities that may be scoped globally or to a single post.
pub const SHARED_INSTANCE_TABLE: &str = "module_instances";
pub const INSTANCE_SCOPE_COLUMN: &str = "scope";
pub const POST_SCOPE: &str = "post";

/// Link table between content items and shared instances.
pub const INSTANCE_LINK_TABLE: &str = "post_modules";
pub const LINK_POST_COLUMN: &str = "post_id";
pub const LINK_INSTANCE_COLUMN: &str = "module_instance_id";

/// Instance columns reset to null on a clone (global display fields).
pub const CLONE_RESET_COLUMNS: &[&str] = &["global_slug", "global_name"];
/// Instance timestamp columns set to "now" on a clone.
pub const CLONE_TIMESTAMP_COLUMNS: &[&str] = &["created_at", "updated_at"];

/// Known foreign-key dependency order: lookup and configuration tables,
/// users, content-defining tables, content, then content-dependent tables.
pub const TABLE_PRIORITY: &[&str] = &[
    // Lookup / configuration
    "site_settings",
    "locales",
    "roles",
    "role_permissions",
    // Users
    "users",
    "user_roles",
    "api_tokens",
    // Content-defining
    "media",
    "templates",
    "modules",
    "module_instances",
    "taxonomies",
    "terms",
    // Content
    "posts",
    // Content-dependent
    "post_modules",
    "post_revisions",
    "post_terms",
    "menus",
    "menu_items",
    "forms",
    "form_submissions",
    "redirects",
    "activity_log",
];

/// Columns holding structured JSON payloads, per table.
const JSONB_COLUMNS: &[(&str, &[&str])] = &[
    ("site_settings", &["value"]),
    ("roles", &["permissions"]),
    ("users", &["preferences"]),
    ("media", &["variants", "metadata"]),
    ("templates", &["fields", "layout"]),
    ("modules", &["props_schema", "default_props"]),
    ("module_instances", &["props"]),
    ("posts", &["meta_json", "robots_json", "review_draft"]),
    ("post_modules", &["overrides"]),
    ("post_revisions", &["snapshot"]),
    ("menu_items", &["metadata"]),
    ("forms", &["fields", "settings"]),
    ("form_submissions", &["payload"]),
    ("activity_log", &["details"]),
];

/// Unique constraints beyond the primary key, per table. Each entry is one
/// constraint; composite constraints list every column.
const UNIQUE_KEYS: &[(&str, &[&[&str]])] = &[
    ("site_settings", &[&["key"]]),
    ("roles", &[&["name"]]),
    ("users", &[&["email"]]),
    ("templates", &[&["slug"]]),
    ("modules", &[&["type"]]),
    ("taxonomies", &[&["slug"]]),
    ("terms", &[&["taxonomy_id", "slug"]]),
    ("posts", &[&["type", "locale", "slug"]]),
    ("menus", &[&["slug"]]),
    ("forms", &[&["slug"]]),
    ("redirects", &[&["source_path"]]),
];

/// JSONB columns registered for `table` (empty if none).
pub fn jsonb_columns(table: &str) -> &'static [&'static str] {
    JSONB_COLUMNS
        .iter()
        .find(|(name, _)| *name == table)
        .map(|(_, cols)| *cols)
        .unwrap_or(&[])
}

pub fn is_jsonb_column(table: &str, column: &str) -> bool {
    jsonb_columns(table).iter().any(|c| *c == column)
}

/// Secondary unique keys registered for `table` (empty if none).
pub fn unique_keys(table: &str) -> &'static [&'static [&'static str]] {
    UNIQUE_KEYS
        .iter()
        .find(|(name, _)| *name == table)
        .map(|(_, keys)| *keys)
        .unwrap_or(&[])
}

/// Position of `table` in the priority list.
pub fn priority_of(table: &str) -> Option<usize> {
    TABLE_PRIORITY.iter().position(|t| *t == table)
}
