//! Insertion column partition
//!
//! Records can carry insertions relative to the reference: a position plus
//! an inserted motif. The column stores the raw per-record insertion string
//! as a dictionary id and keeps an inverted index per sequence name:
//! position -> list of (motif, record bitmap). A three-mer index over the
//! motifs narrows regex searches to a small candidate set.

use std::collections::HashMap;
use std::sync::Arc;

use ahash::AHashMap;
use regex::Regex;
use roaring::RoaringBitmap;

use crate::common::{Dictionary, Idx, Symbol};
use crate::{GenoError, Result};

/// One distinct motif at one position
#[derive(Debug)]
pub struct Insertion {
    pub value: String,
    pub record_ids: RoaringBitmap,
}

/// A compiled insertion search: the verifying regex plus the symbol
/// three-mers extracted from its literal segments.
#[derive(Debug)]
pub struct InsertionSearch<S: Symbol> {
    regex: Regex,
    three_mers: Vec<[S; 3]>,
}

impl<S: Symbol> InsertionSearch<S> {
    /// Compile a search pattern. Patterns are sequences of symbol characters
    /// with `.*` wildcard segments; matching is substring-based.
    pub fn compile(pattern: &str) -> Result<InsertionSearch<S>> {
        let mut regex_source = String::new();
        let mut literal_runs: Vec<Vec<S>> = vec![Vec::new()];
        let mut characters = pattern.chars().peekable();
        while let Some(character) = characters.next() {
            if character == '.' {
                if characters.next() != Some('*') {
                    return Err(GenoError::QueryParse(format!(
                        "Invalid insertion search pattern '{pattern}': \
                         '.' is only allowed as part of the '.*' wildcard"
                    )));
                }
                regex_source.push_str(".*");
                literal_runs.push(Vec::new());
                continue;
            }
            let symbol = S::from_char(character).ok_or_else(|| {
                GenoError::QueryParse(format!(
                    "Invalid insertion search pattern '{pattern}': \
                     '{character}' is not a valid {} symbol",
                    S::NAME
                ))
            })?;
            let mut encoded = [0u8; 4];
            regex_source.push_str(&regex::escape(
                symbol.as_char().encode_utf8(&mut encoded),
            ));
            literal_runs.last_mut().unwrap().push(symbol);
        }
        let regex = Regex::new(&regex_source)
            .map_err(|e| GenoError::QueryParse(format!("Invalid insertion search pattern: {e}")))?;
        let three_mers = literal_runs
            .iter()
            .flat_map(|run| run.windows(3))
            .map(|window| [window[0], window[1], window[2]])
            .collect();
        Ok(InsertionSearch { regex, three_mers })
    }
}

/// All motifs observed at one position, with the three-mer candidate index
#[derive(Debug)]
pub struct InsertionPosition<S: Symbol> {
    pub insertions: Vec<Insertion>,
    lookup: AHashMap<String, u32>,
    three_mer_index: AHashMap<[S; 3], Vec<u32>>,
}

impl<S: Symbol> Default for InsertionPosition<S> {
    fn default() -> Self {
        Self {
            insertions: Vec::new(),
            lookup: AHashMap::new(),
            three_mer_index: AHashMap::new(),
        }
    }
}

fn intersect_sorted(accumulator: &mut Vec<u32>, other: &[u32]) {
    let mut cursor = 0;
    accumulator.retain(|&candidate| {
        while cursor < other.len() && other[cursor] < candidate {
            cursor += 1;
        }
        cursor < other.len() && other[cursor] == candidate
    });
}

impl<S: Symbol> InsertionPosition<S> {
    fn add(&mut self, motif: &str, record_id: u32) {
        match self.lookup.get(motif) {
            Some(&insertion_id) => {
                self.insertions[insertion_id as usize].record_ids.insert(record_id);
            }
            None => {
                let insertion_id = self.insertions.len() as u32;
                let mut record_ids = RoaringBitmap::new();
                record_ids.insert(record_id);
                self.insertions.push(Insertion {
                    value: motif.to_string(),
                    record_ids,
                });
                self.lookup.insert(motif.to_string(), insertion_id);
            }
        }
    }

    fn build_three_mer_index(&mut self) {
        self.three_mer_index.clear();
        for (insertion_id, insertion) in self.insertions.iter().enumerate() {
            let symbols: Vec<S> = insertion
                .value
                .chars()
                .filter_map(S::from_char)
                .collect();
            for window in symbols.windows(3) {
                let triple = [window[0], window[1], window[2]];
                let ids = self.three_mer_index.entry(triple).or_default();
                if ids.last() != Some(&(insertion_id as u32)) {
                    ids.push(insertion_id as u32);
                }
            }
        }
    }

    fn search_with_three_mer_index(&self, search: &InsertionSearch<S>) -> RoaringBitmap {
        let mut candidates: Option<Vec<u32>> = None;
        for three_mer in &search.three_mers {
            let ids = match self.three_mer_index.get(three_mer) {
                Some(ids) => ids,
                None => return RoaringBitmap::new(),
            };
            match &mut candidates {
                None => candidates = Some(ids.clone()),
                Some(candidates) => intersect_sorted(candidates, ids),
            }
        }
        let mut result = RoaringBitmap::new();
        for insertion_id in candidates.unwrap_or_default() {
            let insertion = &self.insertions[insertion_id as usize];
            if search.regex.is_match(&insertion.value) {
                result |= &insertion.record_ids;
            }
        }
        result
    }

    fn search_with_regex(&self, search: &InsertionSearch<S>) -> RoaringBitmap {
        let mut result = RoaringBitmap::new();
        for insertion in &self.insertions {
            if search.regex.is_match(&insertion.value) {
                result |= &insertion.record_ids;
            }
        }
        result
    }

    /// Records with a motif matching the search at this position
    pub fn search(&self, search: &InsertionSearch<S>) -> RoaringBitmap {
        if search.three_mers.is_empty() {
            self.search_with_regex(search)
        } else {
            self.search_with_three_mer_index(search)
        }
    }
}

/// Inverted insertion index of one sequence within one partition
#[derive(Debug)]
pub struct InsertionIndex<S: Symbol> {
    positions: AHashMap<u32, InsertionPosition<S>>,
}

impl<S: Symbol> Default for InsertionIndex<S> {
    fn default() -> Self {
        Self {
            positions: AHashMap::new(),
        }
    }
}

impl<S: Symbol> InsertionIndex<S> {
    pub fn new() -> Self {
        Self {
            positions: AHashMap::new(),
        }
    }

    pub fn add_lazily(&mut self, position: u32, motif: &str, record_id: u32) {
        self.positions
            .entry(position)
            .or_default()
            .add(&motif.to_uppercase(), record_id);
    }

    pub fn build_index(&mut self) {
        for position in self.positions.values_mut() {
            position.build_three_mer_index();
        }
    }

    pub fn positions(&self) -> impl Iterator<Item = (u32, &InsertionPosition<S>)> {
        self.positions.iter().map(|(&position, value)| (position, value))
    }

    /// Search one position, or all positions when `position` is `None`
    pub fn search(&self, position: Option<u32>, search: &InsertionSearch<S>) -> RoaringBitmap {
        match position {
            Some(position) => self
                .positions
                .get(&position)
                .map(|p| p.search(search))
                .unwrap_or_default(),
            None => {
                let mut result = RoaringBitmap::new();
                for insertion_position in self.positions.values() {
                    result |= insertion_position.search(search);
                }
                result
            }
        }
    }
}

/// Insertion column of one partition. One inverted index is kept per
/// sequence name occurring in the column's data.
#[derive(Debug)]
pub struct InsertionColumnPartition<S: Symbol> {
    values: Vec<Idx>,
    indexes: HashMap<String, InsertionIndex<S>>,
    dictionary: Arc<Dictionary>,
}

impl<S: Symbol> InsertionColumnPartition<S> {
    /// Build from per-record dictionary ids of the raw insertion strings
    pub fn new(values: Vec<Idx>, dictionary: Arc<Dictionary>) -> Self {
        Self {
            values,
            indexes: HashMap::new(),
            dictionary,
        }
    }

    pub fn add_insertion(
        &mut self,
        sequence_name: &str,
        record_id: u32,
        position: u32,
        motif: &str,
    ) {
        self.indexes
            .entry(sequence_name.to_string())
            .or_default()
            .add_lazily(position, motif, record_id);
    }

    pub fn build_index(&mut self) {
        for index in self.indexes.values_mut() {
            index.build_index();
        }
    }

    pub fn values(&self) -> &[Idx] {
        &self.values
    }

    pub fn lookup_value(&self, id: Idx) -> &str {
        self.dictionary.lookup_value(id)
    }

    pub fn insertion_indexes(&self) -> &HashMap<String, InsertionIndex<S>> {
        &self.indexes
    }

    pub fn search(
        &self,
        sequence_name: &str,
        position: Option<u32>,
        search: &InsertionSearch<S>,
    ) -> RoaringBitmap {
        self.indexes
            .get(sequence_name)
            .map(|index| index.search(position, search))
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::Nucleotide;

    fn build_index() -> InsertionIndex<Nucleotide> {
        let mut index = InsertionIndex::new();
        index.add_lazily(100, "ACGT", 0);
        index.add_lazily(100, "ACGT", 3);
        index.add_lazily(100, "ACCT", 1);
        index.add_lazily(250, "TTT", 2);
        index.build_index();
        index
    }

    #[test]
    fn test_exact_motif_search() {
        let index = build_index();
        let search = InsertionSearch::compile("ACGT").unwrap();
        let result = index.search(Some(100), &search);
        assert_eq!(result.iter().collect::<Vec<_>>(), vec![0, 3]);
    }

    #[test]
    fn test_substring_semantics() {
        let index = build_index();
        let search = InsertionSearch::compile("CGT").unwrap();
        let result = index.search(Some(100), &search);
        assert_eq!(result.iter().collect::<Vec<_>>(), vec![0, 3]);
    }

    #[test]
    fn test_wildcard_falls_back_to_regex_scan() {
        let index = build_index();
        // Only two-symbol literal runs: no three-mer can be extracted
        let search = InsertionSearch::compile("AC.*T").unwrap();
        assert!(search.three_mers.is_empty());
        let result = index.search(Some(100), &search);
        assert_eq!(result.iter().collect::<Vec<_>>(), vec![0, 1, 3]);
    }

    #[test]
    fn test_search_across_positions() {
        let index = build_index();
        let search = InsertionSearch::compile("TTT").unwrap();
        assert_eq!(index.search(None, &search).iter().collect::<Vec<_>>(), vec![2]);
        assert!(index.search(Some(100), &search).is_empty());
    }

    #[test]
    fn test_invalid_pattern_is_rejected() {
        assert!(InsertionSearch::<Nucleotide>::compile("AC?T").is_err());
        assert!(InsertionSearch::<Nucleotide>::compile("AC.T").is_err());
    }

    #[test]
    fn test_three_mer_narrowing_agrees_with_scan() {
        let index = build_index();
        let with_index = InsertionSearch::compile("ACG").unwrap();
        let position = index.positions.get(&100).unwrap();
        assert_eq!(
            position.search_with_three_mer_index(&with_index),
            position.search_with_regex(&with_index)
        );
    }
}
