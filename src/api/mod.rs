//! Purpose: Define the public Rust API boundary for tabula.
//! Exports: `Database` plus the schema, value, and error types needed to drive it.
//! Role: Stable surface for the CLI and embedding programs.
//! Invariants: This module is the supported path to the engine; `core` is internal.

mod database;

pub use crate::core::error::{Error, ErrorKind, to_exit_code};
pub use crate::core::index_store::IndexLookup;
pub use crate::core::ops::Operations;
pub use crate::core::schema::{
    DatabaseSchema, Field, FieldKind, IndexDef, IndexStrategy, TableBuilder, TableSchema,
};
pub use crate::core::value::{Attributes, Row, RowId, Value};
pub use database::{ApiResult, Database, DatabaseInfo, TableInfo, attributes_from_json};
