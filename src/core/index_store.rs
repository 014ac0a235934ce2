//! Purpose: Own one index per indexed field of a table and manage its lifecycle.
//! Exports: `IndexStore`, `IndexLookup`.
//! Role: Lazy load on first reference, in-memory mutation, persistence on `flush`.
//! Invariants: A referenced index always has a backing unit (created empty if absent).
//! Invariants: Inserts never touch disk; only `flush` (and first-reference creation) do.
//! Invariants: Unflushed inserts are lost if the process ends; rows are not.

use std::collections::BTreeMap;

use tracing::debug;

use crate::core::error::Error;
use crate::core::index::FieldIndex;
use crate::core::layout::TableLayout;
use crate::core::schema::{IndexDef, TableSchema};
use crate::core::value::{Attributes, Row, RowId};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IndexLookup {
    /// The first indexed criterion (in definition order) whose index held the key.
    Hit(RowId),
    /// At least one criterion was indexed, but no index held its key.
    Miss,
    /// No criterion names an indexed field; the caller has to scan.
    NoIndex,
}

pub struct IndexStore {
    table: String,
    layout: TableLayout,
    definitions: Vec<IndexDef>,
    loaded: BTreeMap<String, FieldIndex>,
}

impl IndexStore {
    pub fn new(layout: TableLayout, table: &TableSchema) -> Self {
        Self {
            table: table.name().to_string(),
            layout,
            definitions: table.indices().to_vec(),
            loaded: BTreeMap::new(),
        }
    }

    /// Fields whose index has been referenced in this store's lifetime.
    pub fn loaded_fields(&self) -> impl Iterator<Item = &str> {
        self.loaded.keys().map(String::as_str)
    }

    /// Returns the index for `field`, loading or creating it on first reference.
    pub fn index(&mut self, field: &str) -> Result<Option<&mut FieldIndex>, Error> {
        let Some(def) = self.definitions.iter().find(|def| def.field == field) else {
            return Ok(None);
        };
        let strategy = def.strategy;
        if !self.loaded.contains_key(field) {
            let path = self.layout.index_path(field);
            let index = match FieldIndex::load(&path, strategy)
                .map_err(|err| err.with_table(&self.table).with_field(field))?
            {
                Some(index) => {
                    debug!(table = %self.table, field, entries = index.len(), "loaded index");
                    index
                }
                None => {
                    let index = FieldIndex::new(strategy);
                    index
                        .store(&path)
                        .map_err(|err| err.with_table(&self.table).with_field(field))?;
                    debug!(table = %self.table, field, strategy = strategy.name(), "created index");
                    index
                }
            };
            self.loaded.insert(field.to_string(), index);
        }
        Ok(self.loaded.get_mut(field))
    }

    /// Inserts `row_id` under every supplied field that has an index definition.
    pub fn add_all(&mut self, values: &Attributes, row_id: RowId) -> Result<(), Error> {
        for field in self.indexed_fields_in(values) {
            let Some(value) = values.get(&field) else {
                continue;
            };
            if let Some(index) = self.index(&field)? {
                index.insert(value.clone(), row_id);
            }
        }
        Ok(())
    }

    /// First-match-wins across criteria, in index-definition order; not a conjunction.
    pub fn lookup_by_any(&mut self, criteria: &Attributes) -> Result<IndexLookup, Error> {
        let fields = self.indexed_fields_in(criteria);
        if fields.is_empty() {
            return Ok(IndexLookup::NoIndex);
        }
        for field in fields {
            let Some(value) = criteria.get(&field) else {
                continue;
            };
            let hit = match self.index(&field)? {
                Some(index) => index.lookup(value),
                None => None,
            };
            if let Some(row_id) = hit {
                debug!(table = %self.table, field = %field, row_id, "index hit");
                return Ok(IndexLookup::Hit(row_id));
            }
        }
        debug!(table = %self.table, "index miss");
        Ok(IndexLookup::Miss)
    }

    /// Writes every loaded index to its backing unit.
    pub fn flush(&self) -> Result<(), Error> {
        for (field, index) in &self.loaded {
            index
                .store(&self.layout.index_path(field))
                .map_err(|err| err.with_table(&self.table).with_field(field))?;
        }
        debug!(table = %self.table, indices = self.loaded.len(), "flushed indices");
        Ok(())
    }

    /// Replaces every index with one built from `rows`, then flushes.
    ///
    /// Rows should arrive in ascending identifier order so hash indices end up
    /// holding the most recently created row for each key.
    pub fn rebuild<I>(&mut self, rows: I) -> Result<usize, Error>
    where
        I: IntoIterator<Item = Result<Row, Error>>,
    {
        self.loaded = self
            .definitions
            .iter()
            .map(|def| (def.field.clone(), FieldIndex::new(def.strategy)))
            .collect();
        let mut count = 0;
        for row in rows {
            let row = row?;
            for (field, index) in self.loaded.iter_mut() {
                if let Some(value) = row.get(field) {
                    index.insert(value.clone(), row.id());
                }
            }
            count += 1;
        }
        self.flush()?;
        Ok(count)
    }

    fn indexed_fields_in(&self, values: &Attributes) -> Vec<String> {
        self.definitions
            .iter()
            .filter(|def| values.contains_key(&def.field))
            .map(|def| def.field.clone())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::{IndexLookup, IndexStore};
    use crate::core::layout::TableLayout;
    use crate::core::schema::{IndexStrategy, TableSchema};
    use crate::core::value::{Attributes, Row, Value};
    use std::fs;

    fn table() -> TableSchema {
        TableSchema::builder("comments")
            .integer("order_id")
            .text("author", 20)
            .text("body", 200)
            .index("order_id", IndexStrategy::Hash)
            .index("author", IndexStrategy::Ordered)
            .build()
            .expect("table")
    }

    fn layout(dir: &std::path::Path) -> TableLayout {
        let layout = TableLayout::new(dir.join("comments"));
        fs::create_dir_all(layout.indices_dir()).expect("indices dir");
        layout
    }

    fn attrs(pairs: &[(&str, Value)]) -> Attributes {
        pairs
            .iter()
            .map(|(name, value)| (name.to_string(), value.clone()))
            .collect()
    }

    #[test]
    fn first_reference_creates_backing_unit() {
        let dir = tempfile::tempdir().expect("tempdir");
        let layout = layout(dir.path());
        let mut store = IndexStore::new(layout.clone(), &table());
        assert!(!layout.index_path("order_id").exists());

        assert!(store.index("body").expect("unindexed").is_none());
        let index = store.index("order_id").expect("index").expect("present");
        assert!(index.is_empty());
        assert!(layout.index_path("order_id").exists());
        assert!(!layout.index_path("author").exists());
        assert_eq!(store.loaded_fields().collect::<Vec<_>>(), ["order_id"]);
    }

    #[test]
    fn add_all_only_touches_indexed_fields() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut store = IndexStore::new(layout(dir.path()), &table());
        let values = attrs(&[("order_id", Value::Int(4)), ("body", Value::from("hi"))]);
        store.add_all(&values, 1).expect("add");
        assert_eq!(store.loaded_fields().collect::<Vec<_>>(), ["order_id"]);
        assert_eq!(
            store.lookup_by_any(&attrs(&[("order_id", Value::Int(4))])).expect("lookup"),
            IndexLookup::Hit(1)
        );
    }

    #[test]
    fn lookup_routes_first_match_across_fields() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut store = IndexStore::new(layout(dir.path()), &table());
        store
            .add_all(&attrs(&[("order_id", Value::Int(4)), ("author", Value::from("ann"))]), 1)
            .expect("add 1");
        store
            .add_all(&attrs(&[("order_id", Value::Int(5)), ("author", Value::from("bob"))]), 2)
            .expect("add 2");

        // order_id is defined first, so its hit wins even though author matches row 2.
        let criteria = attrs(&[("order_id", Value::Int(4)), ("author", Value::from("bob"))]);
        assert_eq!(store.lookup_by_any(&criteria).expect("lookup"), IndexLookup::Hit(1));

        // A miss on the first field falls through to the next indexed field.
        let criteria = attrs(&[("order_id", Value::Int(9)), ("author", Value::from("bob"))]);
        assert_eq!(store.lookup_by_any(&criteria).expect("lookup"), IndexLookup::Hit(2));

        let criteria = attrs(&[("order_id", Value::Int(9))]);
        assert_eq!(store.lookup_by_any(&criteria).expect("lookup"), IndexLookup::Miss);

        let criteria = attrs(&[("body", Value::from("x"))]);
        assert_eq!(store.lookup_by_any(&criteria).expect("lookup"), IndexLookup::NoIndex);
    }

    #[test]
    fn hash_overwrites_ordered_keeps_duplicates() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut store = IndexStore::new(layout(dir.path()), &table());
        store
            .add_all(&attrs(&[("order_id", Value::Int(4)), ("author", Value::from("ann"))]), 1)
            .expect("add 1");
        store
            .add_all(&attrs(&[("order_id", Value::Int(4)), ("author", Value::from("ann"))]), 2)
            .expect("add 2");

        let hash = store.index("order_id").expect("index").expect("present");
        assert_eq!(hash.lookup(&Value::Int(4)), Some(2));
        assert_eq!(hash.len(), 1);

        let ordered = store.index("author").expect("index").expect("present");
        assert_eq!(ordered.len(), 2);
        assert!(matches!(ordered.lookup(&Value::from("ann")), Some(1 | 2)));
    }

    #[test]
    fn unflushed_inserts_are_invisible_to_a_fresh_store() {
        let dir = tempfile::tempdir().expect("tempdir");
        let layout = layout(dir.path());
        let criteria = attrs(&[("order_id", Value::Int(4))]);

        let mut store = IndexStore::new(layout.clone(), &table());
        store.add_all(&criteria, 1).expect("add");
        let mut restarted = IndexStore::new(layout.clone(), &table());
        assert_eq!(restarted.lookup_by_any(&criteria).expect("lookup"), IndexLookup::Miss);

        store.flush().expect("flush");
        let mut restarted = IndexStore::new(layout, &table());
        assert_eq!(restarted.lookup_by_any(&criteria).expect("lookup"), IndexLookup::Hit(1));
    }

    #[test]
    fn rebuild_replays_rows_and_flushes() {
        let dir = tempfile::tempdir().expect("tempdir");
        let layout = layout(dir.path());
        let rows = (1..=3u64).map(|id| {
            Ok(Row::new(
                id,
                attrs(&[("id", Value::Int(id as i64)), ("order_id", Value::Int(7))]),
            ))
        });

        let mut store = IndexStore::new(layout.clone(), &table());
        assert_eq!(store.rebuild(rows).expect("rebuild"), 3);

        let mut restarted = IndexStore::new(layout.clone(), &table());
        let criteria = attrs(&[("order_id", Value::Int(7))]);
        assert_eq!(restarted.lookup_by_any(&criteria).expect("lookup"), IndexLookup::Hit(3));
        assert!(layout.index_path("author").exists());
    }
}
