//! CMS Import Engine Library
//!
//! Restores structured JSON exports of a content database into a target
//! database, ordering tables and rows so references resolve and reconciling
//! conflicts with rows already present.

pub mod cli;
pub mod config;
pub mod db;
pub mod error;
pub mod export;
pub mod import;
pub mod logging;
