//! Purpose: Persist and read individual rows, one file per identifier.
//! Exports: `RowStore`, `RowScan`.
//! Role: Durable row I/O for one table; also tracks the last assigned identifier.
//! Invariants: Each write fully replaces the row unit; rows are never appended to.
//! Invariants: Row unit and last-id scalar are two separate writes with no atomicity.
//! Invariants: Absent rows and an absent last-id are `None`, never errors.

use std::cell::Cell;
use std::fs;
use std::io;
use std::path::PathBuf;

use tracing::debug;

use crate::core::codec::RowCodec;
use crate::core::error::{Error, ErrorKind};
use crate::core::layout::TableLayout;
use crate::core::schema::TableSchema;
use crate::core::value::{Attributes, Row, RowId};

pub struct RowStore {
    table: String,
    layout: TableLayout,
    codec: RowCodec,
    scans: Cell<u64>,
}

impl RowStore {
    pub fn new(layout: TableLayout, table: &TableSchema) -> Self {
        Self {
            table: table.name().to_string(),
            layout,
            codec: RowCodec::new(table),
            scans: Cell::new(0),
        }
    }

    pub fn layout(&self) -> &TableLayout {
        &self.layout
    }

    /// Writes the row unit for `id`, then overwrites the last-id scalar with `id`.
    pub fn write_row(&self, values: &Attributes, id: RowId) -> Result<(), Error> {
        let text = self.codec.encode(values)?;
        let path = self.layout.row_path(id);
        fs::write(&path, text).map_err(|err| {
            Error::io(err, &path)
                .with_message("failed to write row")
                .with_table(&self.table)
                .with_row_id(id)
        })?;

        let last_id_path = self.layout.last_id_path();
        fs::write(&last_id_path, id.to_string()).map_err(|err| {
            Error::io(err, &last_id_path)
                .with_message("failed to write last id")
                .with_table(&self.table)
                .with_row_id(id)
        })?;
        debug!(table = %self.table, id, "wrote row");
        Ok(())
    }

    pub fn read_row(&self, id: RowId) -> Result<Option<Row>, Error> {
        let path = self.layout.row_path(id);
        let text = match fs::read_to_string(&path) {
            Ok(text) => text,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(err) => {
                return Err(Error::io(err, &path)
                    .with_message("failed to read row")
                    .with_table(&self.table)
                    .with_row_id(id));
            }
        };
        let row = self
            .codec
            .decode(&text)
            .map_err(|err| err.with_path(&path).with_row_id(id))?;
        if row.id() != id {
            return Err(Error::new(ErrorKind::Corrupt)
                .with_message(format!("row unit holds identifier {}", row.id()))
                .with_table(&self.table)
                .with_row_id(id)
                .with_path(&path));
        }
        Ok(Some(row))
    }

    /// Lazily enumerates every stored row in directory order, which is unspecified.
    pub fn scan_rows(&self) -> Result<RowScan<'_>, Error> {
        self.scans.set(self.scans.get() + 1);
        let dir = self.layout.rows_dir();
        let entries = fs::read_dir(&dir).map_err(|err| {
            Error::io(err, &dir)
                .with_message("failed to read rows directory")
                .with_table(&self.table)
        })?;
        debug!(table = %self.table, "full scan");
        Ok(RowScan {
            store: self,
            entries,
        })
    }

    /// Identifiers of every stored row, ascending.
    pub fn row_ids(&self) -> Result<Vec<RowId>, Error> {
        let dir = self.layout.rows_dir();
        let entries = fs::read_dir(&dir).map_err(|err| {
            Error::io(err, &dir)
                .with_message("failed to read rows directory")
                .with_table(&self.table)
        })?;
        let mut ids = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|err| {
                Error::io(err, &dir)
                    .with_message("failed to read rows directory entry")
                    .with_table(&self.table)
            })?;
            if let Some(id) = TableLayout::row_id_from_path(&entry.path()) {
                ids.push(id);
            }
        }
        ids.sort_unstable();
        Ok(ids)
    }

    pub fn last_id(&self) -> Result<Option<RowId>, Error> {
        let path = self.layout.last_id_path();
        let text = match fs::read_to_string(&path) {
            Ok(text) => text,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(err) => {
                return Err(Error::io(err, &path)
                    .with_message("failed to read last id")
                    .with_table(&self.table));
            }
        };
        text.trim().parse::<RowId>().map(Some).map_err(|err| {
            Error::new(ErrorKind::Corrupt)
                .with_message("last id is not an unsigned integer")
                .with_table(&self.table)
                .with_path(&path)
                .with_source(err)
        })
    }

    /// Number of full scans started through this store.
    pub fn scan_count(&self) -> u64 {
        self.scans.get()
    }
}

pub struct RowScan<'a> {
    store: &'a RowStore,
    entries: fs::ReadDir,
}

impl RowScan<'_> {
    fn read_entry(&self, path: PathBuf) -> Result<Option<Row>, Error> {
        match TableLayout::row_id_from_path(&path) {
            Some(id) => self.store.read_row(id),
            None => Ok(None),
        }
    }
}

impl Iterator for RowScan<'_> {
    type Item = Result<Row, Error>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let entry = match self.entries.next()? {
                Ok(entry) => entry,
                Err(err) => {
                    return Some(Err(Error::io(err, &self.store.layout.rows_dir())
                        .with_message("failed to read rows directory entry")
                        .with_table(&self.store.table)));
                }
            };
            match self.read_entry(entry.path()) {
                Ok(Some(row)) => return Some(Ok(row)),
                Ok(None) => continue,
                Err(err) => return Some(Err(err)),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::RowStore;
    use crate::core::error::ErrorKind;
    use crate::core::layout::TableLayout;
    use crate::core::schema::TableSchema;
    use crate::core::value::{Attributes, Value};
    use std::fs;

    fn store(dir: &std::path::Path) -> RowStore {
        let table = TableSchema::builder("orders")
            .integer("department_id")
            .text("description", 10)
            .build()
            .expect("table");
        let layout = TableLayout::new(dir.join("orders"));
        fs::create_dir_all(layout.rows_dir()).expect("rows dir");
        RowStore::new(layout, &table)
    }

    fn attrs(id: i64, description: &str) -> Attributes {
        let mut values = Attributes::new();
        values.insert("id".to_string(), Value::Int(id));
        values.insert("description".to_string(), Value::from(description));
        values
    }

    #[test]
    fn absent_row_and_last_id_are_none() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = store(dir.path());
        assert_eq!(store.last_id().expect("last id"), None);
        assert_eq!(store.read_row(1).expect("read"), None);
    }

    #[test]
    fn write_replaces_row_and_advances_last_id() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = store(dir.path());
        store.write_row(&attrs(1, "first"), 1).expect("write 1");
        store.write_row(&attrs(2, "second"), 2).expect("write 2");
        assert_eq!(store.last_id().expect("last id"), Some(2));

        store.write_row(&attrs(1, "again"), 1).expect("rewrite 1");
        let row = store.read_row(1).expect("read").expect("row");
        assert_eq!(row.get("description"), Some(&Value::from("again")));
        // The scalar follows the most recent write, not the maximum.
        assert_eq!(store.last_id().expect("last id"), Some(1));
    }

    #[test]
    fn scan_yields_every_row_and_counts_scans() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = store(dir.path());
        for id in 1..=5 {
            store.write_row(&attrs(id, &format!("d{id}")), id as u64).expect("write");
        }
        fs::write(store.layout().rows_dir().join("notes.txt"), "ignored").expect("stray file");

        let mut ids = store
            .scan_rows()
            .expect("scan")
            .map(|row| row.expect("row").id())
            .collect::<Vec<_>>();
        ids.sort_unstable();
        assert_eq!(ids, vec![1, 2, 3, 4, 5]);
        assert_eq!(store.scan_count(), 1);
        assert_eq!(store.row_ids().expect("ids"), vec![1, 2, 3, 4, 5]);
    }

    #[test]
    fn corrupt_units_surface_errors() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = store(dir.path());
        fs::write(store.layout().last_id_path(), "seven").expect("write");
        let err = store.last_id().expect_err("corrupt last id");
        assert_eq!(err.kind(), ErrorKind::Corrupt);

        fs::write(store.layout().row_path(4), "garbage").expect("write");
        let err = store.read_row(4).expect_err("corrupt row");
        assert_eq!(err.kind(), ErrorKind::Corrupt);
        assert_eq!(err.row_id(), Some(4));

        store.write_row(&attrs(5, "five"), 6).expect("mismatched write");
        let err = store.read_row(6).expect_err("id mismatch");
        assert_eq!(err.kind(), ErrorKind::Corrupt);
    }
}
