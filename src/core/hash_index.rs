// Exact-match index: later inserts for a key replace earlier ones.
use std::collections::HashMap;
use std::hash::Hash;

use serde::de::{Deserialize, Deserializer};
use serde::ser::{Serialize, Serializer};

use crate::core::value::RowId;

#[derive(Clone, Debug)]
pub struct HashIndex<K> {
    entries: HashMap<K, RowId>,
}

impl<K: Eq + Hash> HashIndex<K> {
    pub fn new() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Returns the identifier this insert replaced, if any.
    pub fn insert(&mut self, key: K, row_id: RowId) -> Option<RowId> {
        self.entries.insert(key, row_id)
    }

    pub fn lookup(&self, key: &K) -> Option<RowId> {
        self.entries.get(key).copied()
    }
}

impl<K: Eq + Hash> Default for HashIndex<K> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: Eq + Hash> PartialEq for HashIndex<K> {
    fn eq(&self, other: &Self) -> bool {
        self.entries == other.entries
    }
}

impl<K: Eq + Hash> Eq for HashIndex<K> {}

// Persisted as a sequence of pairs: JSON object keys must be strings.
impl<K: Serialize> Serialize for HashIndex<K> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(self.entries.iter())
    }
}

impl<'de, K: Deserialize<'de> + Eq + Hash> Deserialize<'de> for HashIndex<K> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let pairs = Vec::<(K, RowId)>::deserialize(deserializer)?;
        Ok(Self {
            entries: pairs.into_iter().collect(),
        })
    }
}
