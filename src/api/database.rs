//! Purpose: The `Database` handle: lifecycle plus per-table create/find/flush.
//! Exports: `Database`, `DatabaseInfo`, `TableInfo`, `attributes_from_json`.
//! Role: Owns one row store and one memoized index store per table for its lifetime.
//! Invariants: Index mutations reach disk only through `flush` or `reindex`.
//! Invariants: Dropping a `Database` does not flush; callers decide when to persist.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::Serialize;
use serde_json::Value as JsonValue;
use tracing::info;

use crate::core::error::{Error, ErrorKind};
use crate::core::index_store::IndexStore;
use crate::core::layout::{self, DatabaseLayout};
use crate::core::ops::Operations;
use crate::core::row_store::RowStore;
use crate::core::schema::{DatabaseSchema, Field, IndexDef, TableSchema};
use crate::core::value::{Attributes, Row, RowId, Value};

pub type ApiResult<T> = Result<T, Error>;

struct TableState {
    rows: RowStore,
    indexes: IndexStore,
}

pub struct Database {
    layout: DatabaseLayout,
    schema: DatabaseSchema,
    tables: BTreeMap<String, TableState>,
}

#[derive(Clone, Debug, Serialize)]
pub struct DatabaseInfo {
    pub name: String,
    pub path: PathBuf,
    pub tables: Vec<TableInfo>,
}

#[derive(Clone, Debug, Serialize)]
pub struct TableInfo {
    pub name: String,
    pub id_field: String,
    pub fields: Vec<Field>,
    pub indices: Vec<IndexDef>,
    pub last_id: Option<RowId>,
}

impl Database {
    /// Allocates a new database under `dir`; fails if one with the same name exists.
    pub fn create(dir: &Path, schema: DatabaseSchema) -> ApiResult<Self> {
        let layout = DatabaseLayout::resolve(dir, schema.name())?;
        layout::create_layout(&layout, &schema)?;
        Ok(Self::with_schema(layout, schema))
    }

    pub fn open(dir: &Path, name: &str) -> ApiResult<Self> {
        let layout = DatabaseLayout::resolve(dir, name)?;
        let schema = layout::read_schema(&layout)?;
        Ok(Self::with_schema(layout, schema))
    }

    /// Removes the named database; `Ok(false)` when it did not exist.
    pub fn drop_database(dir: &Path, name: &str) -> ApiResult<bool> {
        let layout = DatabaseLayout::resolve(dir, name)?;
        layout::drop_layout(&layout)
    }

    fn with_schema(layout: DatabaseLayout, schema: DatabaseSchema) -> Self {
        Self {
            layout,
            schema,
            tables: BTreeMap::new(),
        }
    }

    pub fn name(&self) -> &str {
        self.schema.name()
    }

    pub fn path(&self) -> &Path {
        self.layout.root()
    }

    pub fn schema(&self) -> &DatabaseSchema {
        &self.schema
    }

    pub fn table_schema(&self, table: &str) -> ApiResult<&TableSchema> {
        self.schema.table(table).ok_or_else(|| unknown_table(self.name(), table))
    }

    /// Operations for `table`, backed by this handle's memoized stores.
    pub fn table(&mut self, name: &str) -> ApiResult<Operations<'_>> {
        let table = self
            .schema
            .table(name)
            .ok_or_else(|| unknown_table(self.schema.name(), name))?;
        let state = self.tables.entry(name.to_string()).or_insert_with(|| {
            let table_layout = self.layout.table(name);
            TableState {
                rows: RowStore::new(table_layout.clone(), table),
                indexes: IndexStore::new(table_layout, table),
            }
        });
        Ok(Operations::new(table, &state.rows, &mut state.indexes))
    }

    pub fn create_row(&mut self, table: &str, attributes: Attributes) -> ApiResult<Row> {
        self.table(table)?.create(attributes)
    }

    pub fn find_by(&mut self, table: &str, criteria: &Attributes) -> ApiResult<Option<Row>> {
        self.table(table)?.find_by(criteria)
    }

    pub fn reindex(&mut self, table: &str) -> ApiResult<usize> {
        let count = self.table(table)?.reindex()?;
        info!(database = self.name(), table, rows = count, "rebuilt indices");
        Ok(count)
    }

    /// Persists every index loaded through this handle.
    pub fn flush(&self) -> ApiResult<()> {
        for state in self.tables.values() {
            state.indexes.flush()?;
        }
        Ok(())
    }

    /// Number of full scans run against `table` through this handle.
    pub fn scan_count(&self, table: &str) -> u64 {
        self.tables
            .get(table)
            .map(|state| state.rows.scan_count())
            .unwrap_or(0)
    }

    pub fn info(&self) -> ApiResult<DatabaseInfo> {
        let mut tables = Vec::with_capacity(self.schema.tables().len());
        for table in self.schema.tables() {
            let rows = RowStore::new(self.layout.table(table.name()), table);
            tables.push(TableInfo {
                name: table.name().to_string(),
                id_field: table.id_field().to_string(),
                fields: table.fields().to_vec(),
                indices: table.indices().to_vec(),
                last_id: rows.last_id()?,
            });
        }
        Ok(DatabaseInfo {
            name: self.name().to_string(),
            path: self.path().to_path_buf(),
            tables,
        })
    }
}

/// Reads a JSON object into attributes typed by `table`'s field kinds; nulls are skipped.
pub fn attributes_from_json(table: &TableSchema, json: &JsonValue) -> ApiResult<Attributes> {
    let Some(object) = json.as_object() else {
        return Err(Error::new(ErrorKind::Usage)
            .with_message("attributes must be a JSON object")
            .with_table(table.name()));
    };
    let unknown = object
        .keys()
        .filter(|key| table.field(key).is_none())
        .map(String::as_str)
        .collect::<Vec<_>>();
    if !unknown.is_empty() {
        return Err(Error::new(ErrorKind::Schema)
            .with_message(format!("fields {unknown:?} aren't found"))
            .with_table(table.name()));
    }

    let mut attributes = Attributes::new();
    for (name, raw) in object {
        let Some(field) = table.field(name) else {
            continue;
        };
        let value = Value::from_json(&field.kind, raw)
            .map_err(|err| err.with_table(table.name()).with_field(name))?;
        if let Some(value) = value {
            attributes.insert(name.clone(), value);
        }
    }
    Ok(attributes)
}

fn unknown_table(database: &str, table: &str) -> Error {
    Error::new(ErrorKind::NotFound)
        .with_message(format!("database {database} has no table {table}"))
        .with_table(table)
}
