//! Purpose: Local database-directory and database-name path helpers for the CLI.
//! Exports: `default_database_dir`, `database_name_from_path`.
//! Role: Keep `--dir` defaults and directory listing aligned with the on-disk layout.
//! Invariants: Default database directory remains `~/.tabula/databases`.
//! Invariants: Only `<name>.tabula` directories count as databases.

use std::path::{Path, PathBuf};

use tabula::core::layout::DATABASE_EXTENSION;

pub(crate) fn default_database_dir() -> PathBuf {
    let home = std::env::var_os("HOME").unwrap_or_default();
    PathBuf::from(home).join(".tabula").join("databases")
}

/// Name of the database rooted at `path`, if it looks like one.
pub(crate) fn database_name_from_path(path: &Path) -> Option<String> {
    if path.extension().and_then(|ext| ext.to_str()) != Some(DATABASE_EXTENSION) {
        return None;
    }
    if !path.is_dir() {
        return None;
    }
    path.file_stem()
        .and_then(|stem| stem.to_str())
        .map(str::to_string)
}
