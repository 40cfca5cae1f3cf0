//! Cache table schema bootstrap.
//!
//! The table is (re)created at startup from either the built-in definition
//! or an operator-supplied schema file.

use std::path::Path;

/// Built-in `cache` table definition.
pub const DEFAULT_SCHEMA: &str = include_str!("../../schema/cache.sql");

/// Read the schema text, falling back to the built-in definition.
pub fn load_schema(path: Option<&Path>) -> std::io::Result<String> {
    match path {
        Some(path) => std::fs::read_to_string(path),
        None => Ok(DEFAULT_SCHEMA.to_string()),
    }
}
