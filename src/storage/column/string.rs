//! String column partitions
//!
//! Unindexed columns hold fixed-width embedded values backed by a shared
//! dictionary; indexed columns hold dictionary ids plus one record bitmap
//! per distinct value. Nulls are stored as the empty string.

use std::sync::Arc;

use roaring::RoaringBitmap;

use crate::common::{Dictionary, EmbeddedString, Idx};

#[derive(Debug)]
pub struct StringColumnPartition {
    values: Vec<EmbeddedString>,
    dictionary: Arc<Dictionary>,
}

impl StringColumnPartition {
    pub fn new(values: Vec<EmbeddedString>, dictionary: Arc<Dictionary>) -> Self {
        Self { values, dictionary }
    }

    pub fn values(&self) -> &[EmbeddedString] {
        &self.values
    }

    pub fn dictionary(&self) -> &Dictionary {
        &self.dictionary
    }

    /// Encode a query value against this column's dictionary. `None` means
    /// no stored value can possibly equal it.
    pub fn embed(&self, value: &str) -> Option<EmbeddedString> {
        EmbeddedString::embed(value, &self.dictionary)
    }

    pub fn lookup(&self, value: &EmbeddedString) -> String {
        value.decode(&self.dictionary)
    }
}

#[derive(Debug)]
pub struct IndexedStringColumnPartition {
    values: Vec<Idx>,
    indexed_bitmaps: Vec<RoaringBitmap>,
    dictionary: Arc<Dictionary>,
}

impl IndexedStringColumnPartition {
    /// Build from per-record dictionary ids. The bitmap index is derived
    /// here; ids must already be dense in the shared dictionary.
    pub fn new(values: Vec<Idx>, dictionary: Arc<Dictionary>) -> Self {
        let mut indexed_bitmaps = vec![RoaringBitmap::new(); dictionary.len()];
        for (record_id, &id) in values.iter().enumerate() {
            indexed_bitmaps[id as usize].insert(record_id as u32);
        }
        Self {
            values,
            indexed_bitmaps,
            dictionary,
        }
    }

    pub fn values(&self) -> &[Idx] {
        &self.values
    }

    pub fn dictionary(&self) -> &Dictionary {
        &self.dictionary
    }

    pub fn lookup_value(&self, id: Idx) -> &str {
        self.dictionary.lookup_value(id)
    }

    /// Record bitmap of a value; `None` when the value never occurs
    pub fn filter(&self, value: &str) -> Option<&RoaringBitmap> {
        let id = self.dictionary.lookup_id(value)?;
        self.indexed_bitmaps.get(id as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_indexed_filter() {
        let mut dict = Dictionary::new();
        let ch = dict.get_or_insert("CH");
        let de = dict.get_or_insert("DE");
        let column =
            IndexedStringColumnPartition::new(vec![ch, de, ch, ch], Arc::new(dict));

        let bitmap = column.filter("CH").unwrap();
        assert_eq!(bitmap.iter().collect::<Vec<_>>(), vec![0, 2, 3]);
        assert_eq!(column.filter("DE").unwrap().len(), 1);
        assert!(column.filter("FR").is_none());
        assert_eq!(column.lookup_value(de), "DE");
    }

    #[test]
    fn test_unindexed_embed_and_lookup() {
        let mut dict = Dictionary::new();
        let values = vec![
            EmbeddedString::new("Basel", &mut dict),
            EmbeddedString::new("a-very-long-location-name-that-overflows", &mut dict),
        ];
        let column = StringColumnPartition::new(values, Arc::new(dict));
        assert_eq!(column.lookup(&column.values()[0]), "Basel");
        assert_eq!(
            column.lookup(&column.values()[1]),
            "a-very-long-location-name-that-overflows"
        );
        assert_eq!(column.embed("not-stored-but-short").is_some(), true);
        assert!(column.embed("not-stored-and-long-enough-to-overflow-inline").is_none());
    }
}
