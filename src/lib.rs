//! Purpose: Library crate behind the `tabula` CLI: typed tables stored as plain files.
//! Exports: `core` (storage, indices, schema, errors) and `api` (the `Database` handle).
//! Role: Engine for file-per-row tables with lazily loaded per-field indices.
//! Invariants: Single writer per database; no locking, transactions or recovery log.
//! Invariants: Core modules prefer explicit inputs/outputs over hidden state.
pub mod api;
pub mod core;
