//! Purpose: Create and find orchestration for one table.
//! Exports: `Operations`.
//! Role: Ties schema validation, identifier assignment, row I/O and index upkeep together.
//! Invariants: Validation happens before any write; a rejected create consumes no identifier.
//! Invariants: Identifiers are `last_id + 1` with no locking; one writer at a time.
//! Invariants: Find prefers indices (first indexed hit wins); the scan fallback
//! returns the first row matching ANY criterion, not all of them.

use tracing::debug;

use crate::core::error::{Error, ErrorKind};
use crate::core::index_store::{IndexLookup, IndexStore};
use crate::core::row_store::RowStore;
use crate::core::schema::{FieldKind, TableSchema};
use crate::core::value::{Attributes, Row, RowId, Value};

pub struct Operations<'a> {
    table: &'a TableSchema,
    rows: &'a RowStore,
    indexes: &'a mut IndexStore,
}

impl<'a> Operations<'a> {
    pub fn new(table: &'a TableSchema, rows: &'a RowStore, indexes: &'a mut IndexStore) -> Self {
        Self {
            table,
            rows,
            indexes,
        }
    }

    /// Validates, assigns the next identifier, writes the row and updates in-memory indices.
    ///
    /// Index changes are not flushed here.
    pub fn create(&mut self, attributes: Attributes) -> Result<Row, Error> {
        self.validate_create(&attributes)?;

        let mut values = attributes;
        if let Some(field) = self.table.created_at_field() {
            if !values.contains_key(&field.name) {
                values.insert(field.name.clone(), Value::now());
            }
        }

        let exhausted = || {
            Error::new(ErrorKind::Internal)
                .with_message("identifier space exhausted")
                .with_table(self.table.name())
        };
        let id = self
            .rows
            .last_id()?
            .unwrap_or(0)
            .checked_add(1)
            .ok_or_else(exhausted)?;
        let id_value = i64::try_from(id).map_err(|_| exhausted())?;
        values.insert(self.table.id_field().to_string(), Value::Int(id_value));

        self.rows.write_row(&values, id)?;
        self.indexes.add_all(&values, id)?;
        debug!(table = self.table.name(), id, "created row");
        Ok(Row::new(id, values))
    }

    pub fn find_by(&mut self, criteria: &Attributes) -> Result<Option<Row>, Error> {
        if criteria.is_empty() {
            return Err(Error::new(ErrorKind::Usage)
                .with_message("find_by needs at least one criterion")
                .with_table(self.table.name()));
        }
        self.table.validate_keys(criteria)?;

        if criteria.len() == 1 {
            if let Some(value) = criteria.get(self.table.id_field()) {
                return match value {
                    Value::Int(id) if *id > 0 => self.rows.read_row(*id as RowId),
                    _ => Ok(None),
                };
            }
        }

        match self.indexes.lookup_by_any(criteria)? {
            IndexLookup::Hit(id) => self.rows.read_row(id),
            IndexLookup::Miss => Ok(None),
            IndexLookup::NoIndex => self.scan_any(criteria),
        }
    }

    /// Rebuilds every index of the table from its rows, oldest first, and flushes.
    pub fn reindex(&mut self) -> Result<usize, Error> {
        let rows = self.rows;
        let ids = rows.row_ids()?;
        let replay = ids.into_iter().filter_map(|id| rows.read_row(id).transpose());
        self.indexes.rebuild(replay)
    }

    // OR across criteria, matching the index path's first-match spirit.
    fn scan_any(&self, criteria: &Attributes) -> Result<Option<Row>, Error> {
        for row in self.rows.scan_rows()? {
            let row = row?;
            let matched = criteria
                .iter()
                .any(|(field, value)| row.get(field) == Some(value));
            if matched {
                return Ok(Some(row));
            }
        }
        Ok(None)
    }

    fn validate_create(&self, attributes: &Attributes) -> Result<(), Error> {
        self.table.validate_keys(attributes)?;
        for (name, value) in attributes {
            let Some(field) = self.table.field(name) else {
                continue;
            };
            let invalid = |message: String| {
                Error::new(ErrorKind::Schema)
                    .with_message(message)
                    .with_table(self.table.name())
                    .with_field(name)
            };
            if field.kind == FieldKind::Identifier {
                return Err(invalid("identifier is assigned on create".to_string()));
            }
            if !value.fits(&field.kind) {
                return Err(invalid(format!(
                    "expected {} value, got {}",
                    field.kind.name(),
                    value.kind_name()
                )));
            }
            if let (FieldKind::Text { max_len }, Value::Text(text)) = (&field.kind, value) {
                let len = text.chars().count();
                if len > *max_len {
                    return Err(invalid(format!("text of {len} chars exceeds max {max_len}")));
                }
            }
        }
        Ok(())
    }
}
