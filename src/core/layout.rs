//! Purpose: Durable directory layout for databases and their tables.
//! Exports: `DatabaseLayout`, `TableLayout`, `create_layout`, `drop_layout`.
//! Role: Single source of truth for every path the engine reads or writes.
//! Invariants: One directory per database (`<dir>/<name>.tabula`), one per table.
//! Invariants: Rows live at `rows/<id>.row`, indices at `indices/<field>.idx`,
//! and the last assigned identifier at `last_id`.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::info;

use crate::core::error::{Error, ErrorKind};
use crate::core::schema::DatabaseSchema;
use crate::core::value::RowId;

pub const DATABASE_EXTENSION: &str = "tabula";
const SCHEMA_FILE: &str = "schema.json";
/// Entries of a database directory that are not table directories.
pub(crate) const RESERVED_TABLE_NAMES: &[&str] = &[SCHEMA_FILE];
const ROWS_DIR: &str = "rows";
const INDICES_DIR: &str = "indices";
const LAST_ID_FILE: &str = "last_id";
const ROW_EXTENSION: &str = "row";
const INDEX_EXTENSION: &str = "idx";

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DatabaseLayout {
    root: PathBuf,
}

impl DatabaseLayout {
    /// Resolves a database name under `dir`; names must not contain path separators.
    pub fn resolve(dir: &Path, name: &str) -> Result<Self, Error> {
        if name.is_empty() || name.contains('/') || name.contains('\\') {
            return Err(Error::new(ErrorKind::Usage)
                .with_message("database name must be non-empty and contain no path separators"));
        }
        let file_name = if name.ends_with(&format!(".{DATABASE_EXTENSION}")) {
            name.to_string()
        } else {
            format!("{name}.{DATABASE_EXTENSION}")
        };
        Ok(Self {
            root: dir.join(file_name),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn schema_path(&self) -> PathBuf {
        self.root.join(SCHEMA_FILE)
    }

    pub fn table(&self, table: &str) -> TableLayout {
        TableLayout {
            dir: self.root.join(table),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TableLayout {
    dir: PathBuf,
}

impl TableLayout {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn rows_dir(&self) -> PathBuf {
        self.dir.join(ROWS_DIR)
    }

    pub fn row_path(&self, id: RowId) -> PathBuf {
        self.rows_dir().join(format!("{id}.{ROW_EXTENSION}"))
    }

    pub fn indices_dir(&self) -> PathBuf {
        self.dir.join(INDICES_DIR)
    }

    pub fn index_path(&self, field: &str) -> PathBuf {
        self.indices_dir().join(format!("{field}.{INDEX_EXTENSION}"))
    }

    pub fn last_id_path(&self) -> PathBuf {
        self.dir.join(LAST_ID_FILE)
    }

    /// Parses a row file name back into its identifier; other files yield `None`.
    pub fn row_id_from_path(path: &Path) -> Option<RowId> {
        if path.extension().and_then(|ext| ext.to_str()) != Some(ROW_EXTENSION) {
            return None;
        }
        path.file_stem()?.to_str()?.parse().ok()
    }
}

/// Allocates the on-disk layout for every table in `schema`.
///
/// Fails with `AlreadyExists` when the database directory is already present;
/// an existing database is never merged into.
pub fn create_layout(layout: &DatabaseLayout, schema: &DatabaseSchema) -> Result<(), Error> {
    if let Some(parent) = layout.root().parent() {
        fs::create_dir_all(parent).map_err(|err| {
            Error::io(err, parent).with_message("failed to create database directory")
        })?;
    }
    fs::create_dir(layout.root()).map_err(|err| {
        let err = Error::io(err, layout.root());
        if err.kind() == ErrorKind::AlreadyExists {
            err.with_message(format!("database {} already exists", schema.name()))
                .with_hint("Drop it first or choose another name.")
        } else {
            err.with_message("failed to create database directory")
        }
    })?;

    let schema_path = layout.schema_path();
    fs::write(&schema_path, schema.to_json()?)
        .map_err(|err| Error::io(err, &schema_path).with_message("failed to write schema"))?;

    for table in schema.tables() {
        let table_layout = layout.table(table.name());
        for dir in [table_layout.rows_dir(), table_layout.indices_dir()] {
            fs::create_dir_all(&dir).map_err(|err| {
                Error::io(err, &dir)
                    .with_message("failed to create table directory")
                    .with_table(table.name())
            })?;
        }
    }
    info!(database = schema.name(), path = %layout.root().display(), "created database");
    Ok(())
}

/// Removes a database directory; returns `false` when there was nothing to remove.
pub fn drop_layout(layout: &DatabaseLayout) -> Result<bool, Error> {
    match fs::remove_dir_all(layout.root()) {
        Ok(()) => {
            info!(path = %layout.root().display(), "dropped database");
            Ok(true)
        }
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(err) => {
            Err(Error::io(err, layout.root()).with_message("failed to remove database directory"))
        }
    }
}

pub fn read_schema(layout: &DatabaseLayout) -> Result<DatabaseSchema, Error> {
    let path = layout.schema_path();
    let text = fs::read_to_string(&path).map_err(|err| {
        let err = Error::io(err, &path);
        if err.kind() == ErrorKind::NotFound {
            err.with_message("database not found")
                .with_hint("Create it with `tabula db create <schema.json>`.")
        } else {
            err.with_message("failed to read schema")
        }
    })?;
    DatabaseSchema::from_json(&text).map_err(|err| {
        Error::new(ErrorKind::Corrupt)
            .with_message(format!("stored schema is invalid: {}", err.message().unwrap_or("")))
            .with_path(&path)
    })
}
