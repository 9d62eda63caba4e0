//! Pango lineage column partition
//!
//! Lineages are stored as dictionary ids over alias-expanded canonical
//! forms. Two bitmap indexes are kept per distinct lineage: the records
//! carrying exactly that lineage, and the precomputed union over the
//! lineage and its whole sub-tree.

use std::collections::HashMap;
use std::sync::Arc;

use roaring::RoaringBitmap;

use crate::common::{Dictionary, Idx};

/// Alias table mapping lineage prefixes to canonical prefixes, e.g.
/// `BA -> B.1.1.529`. Applied before dictionary insertion at build time and
/// to query values at compile time.
#[derive(Debug, Default)]
pub struct PangoAliasTable {
    aliases: HashMap<String, String>,
}

impl PangoAliasTable {
    pub fn new(aliases: HashMap<String, String>) -> Self {
        Self { aliases }
    }

    pub fn from_pairs<'a>(pairs: impl IntoIterator<Item = (&'a str, &'a str)>) -> Self {
        Self {
            aliases: pairs
                .into_iter()
                .map(|(alias, canonical)| (alias.to_string(), canonical.to_string()))
                .collect(),
        }
    }

    /// Expand the leading alias segment, if any
    pub fn resolve(&self, lineage: &str) -> String {
        let lineage = lineage.trim().to_uppercase();
        let (head, tail) = match lineage.split_once('.') {
            Some((head, tail)) => (head, Some(tail)),
            None => (lineage.as_str(), None),
        };
        match (self.aliases.get(head), tail) {
            (Some(canonical), Some(tail)) => format!("{canonical}.{tail}"),
            (Some(canonical), None) => canonical.clone(),
            (None, _) => lineage,
        }
    }
}

fn is_sublineage_of(candidate: &str, ancestor: &str) -> bool {
    candidate == ancestor
        || (candidate.len() > ancestor.len()
            && candidate.starts_with(ancestor)
            && candidate.as_bytes()[ancestor.len()] == b'.')
}

#[derive(Debug)]
pub struct PangoLineageColumnPartition {
    values: Vec<Idx>,
    lineage_bitmaps: Vec<RoaringBitmap>,
    sublineage_bitmaps: Vec<RoaringBitmap>,
    dictionary: Arc<Dictionary>,
}

impl PangoLineageColumnPartition {
    /// Build from per-record dictionary ids of canonical lineages. Both
    /// bitmap indexes are derived here.
    pub fn new(values: Vec<Idx>, dictionary: Arc<Dictionary>) -> Self {
        let mut lineage_bitmaps = vec![RoaringBitmap::new(); dictionary.len()];
        for (record_id, &id) in values.iter().enumerate() {
            lineage_bitmaps[id as usize].insert(record_id as u32);
        }
        let sublineage_bitmaps = dictionary
            .iter()
            .map(|(_, ancestor)| {
                let mut union = RoaringBitmap::new();
                for (descendant_id, descendant) in dictionary.iter() {
                    if !ancestor.is_empty() && is_sublineage_of(descendant, ancestor) {
                        union |= &lineage_bitmaps[descendant_id as usize];
                    }
                }
                union
            })
            .collect();
        Self {
            values,
            lineage_bitmaps,
            sublineage_bitmaps,
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

    /// Records with exactly this lineage
    pub fn filter(&self, id: Idx) -> Option<&RoaringBitmap> {
        self.lineage_bitmaps.get(id as usize)
    }

    /// Records with this lineage or any of its descendants
    pub fn filter_sublineages(&self, id: Idx) -> Option<&RoaringBitmap> {
        self.sublineage_bitmaps.get(id as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_alias_resolution() {
        let table = PangoAliasTable::from_pairs([("BA", "B.1.1.529"), ("AY", "B.1.617.2")]);
        assert_eq!(table.resolve("BA.5"), "B.1.1.529.5");
        assert_eq!(table.resolve("BA"), "B.1.1.529");
        assert_eq!(table.resolve("B.1.1.7"), "B.1.1.7");
        assert_eq!(table.resolve("ay.4"), "B.1.617.2.4");
    }

    fn build_column() -> PangoLineageColumnPartition {
        let mut dict = Dictionary::new();
        let b11 = dict.get_or_insert("B.1.1");
        let b117 = dict.get_or_insert("B.1.1.7");
        let b12 = dict.get_or_insert("B.1.2");
        PangoLineageColumnPartition::new(vec![b11, b117, b12, b117], Arc::new(dict))
    }

    #[test]
    fn test_exact_lineage_bitmap() {
        let column = build_column();
        let id = column.dictionary().lookup_id("B.1.1.7").unwrap();
        assert_eq!(
            column.filter(id).unwrap().iter().collect::<Vec<_>>(),
            vec![1, 3]
        );
    }

    #[test]
    fn test_sublineage_bitmap_includes_descendants() {
        let column = build_column();
        let id = column.dictionary().lookup_id("B.1.1").unwrap();
        // B.1.1 itself plus B.1.1.7, but not B.1.2
        assert_eq!(
            column.filter_sublineages(id).unwrap().iter().collect::<Vec<_>>(),
            vec![0, 1, 3]
        );
    }

    #[test]
    fn test_sublineage_requires_dot_boundary() {
        assert!(is_sublineage_of("B.1.1.7", "B.1.1"));
        assert!(!is_sublineage_of("B.1.17", "B.1.1"));
        assert!(is_sublineage_of("B.1.1", "B.1.1"));
    }
}
