//! Layered configuration.
//!
//! Tiers, lowest to highest priority, merged field by field:
//! 1. **Defaults** - built in
//! 2. **Project** - `$CWD/cms-import/config.yaml`
//! 3. **User** - `~/.cms-import/config.yaml`
//! 4. **Environment** - variables below
//!
//! Command-line flags are applied on top by the binary.
//!
//! ## Environment Variables
//! - `CMS_IMPORT_CONFIG_PATH` - Explicit config file (replaces the file tiers)
//! - `CMS_IMPORT_DB_PATH` - Database path
//! - `CMS_IMPORT_STRATEGY` - Default strategy
//! - `CMS_IMPORT_USER_DIR` - User config dir (default: `~/.cms-import`)
//! - `CMS_IMPORT_PROJECT_DIR` - Project config dir (default: `./cms-import`)

mod loader;
mod merge;
mod types;

pub use loader::{ConfigLoader, ConfigPaths, ConfigTier};
pub use merge::{deep_merge, merge_layers};
pub use types::{Config, DatabaseConfig, ImportConfig};
