//! Append-only string dictionary
//!
//! Maps values to dense `u32` ids and back. Dictionaries grow only during
//! build; after that they are frozen behind an `Arc` and shared by every
//! partition of a column, so a given id means the same value database-wide.

use ahash::AHashMap;

use super::Idx;

#[derive(Debug, Default)]
pub struct Dictionary {
    values: Vec<String>,
    lookup: AHashMap<String, Idx>,
}

impl Dictionary {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of distinct values
    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Id of `value`, inserting it if absent. Ids are dense and stable.
    pub fn get_or_insert(&mut self, value: &str) -> Idx {
        if let Some(&id) = self.lookup.get(value) {
            return id;
        }
        let id = self.values.len() as Idx;
        self.values.push(value.to_string());
        self.lookup.insert(value.to_string(), id);
        id
    }

    /// Id of `value` if it has been inserted
    pub fn lookup_id(&self, value: &str) -> Option<Idx> {
        self.lookup.get(value).copied()
    }

    /// Value behind `id`. Ids handed out by this dictionary are always valid;
    /// a foreign id yields the empty string.
    pub fn lookup_value(&self, id: Idx) -> &str {
        self.values.get(id as usize).map_or("", String::as_str)
    }

    /// Iterate `(id, value)` pairs in id order
    pub fn iter(&self) -> impl Iterator<Item = (Idx, &str)> {
        self.values
            .iter()
            .enumerate()
            .map(|(id, value)| (id as Idx, value.as_str()))
    }
}
