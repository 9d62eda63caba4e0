//! Per-position bitmap indexes over aligned sequences
//!
//! Every reference position holds one record bitmap per symbol. The bitmap
//! of at most one symbol per position is stored flipped (its complement),
//! which collapses the dominant symbol's index to almost nothing. A
//! separate per-record bitmap-of-positions tracks where each record carries
//! the missing symbol (N for nucleotides, X for amino acids).

use std::sync::Arc;

use roaring::RoaringBitmap;

use crate::common::Symbol;
use crate::{GenoError, Result};

/// Complement of `bitmap` within the record-id universe `[0, row_count)`
pub fn complement_bitmap(bitmap: &RoaringBitmap, row_count: u32) -> RoaringBitmap {
    let mut full = RoaringBitmap::new();
    full.insert_range(0..row_count);
    full - bitmap
}

/// Index state of one reference position
#[derive(Debug)]
pub struct Position<S: Symbol> {
    bitmaps: Vec<RoaringBitmap>,
    flipped: Option<S>,
    deleted: Option<S>,
    missing_indexed: bool,
}

impl<S: Symbol> Default for Position<S> {
    fn default() -> Self {
        Self {
            bitmaps: vec![RoaringBitmap::new(); S::COUNT],
            flipped: None,
            deleted: None,
            missing_indexed: false,
        }
    }
}

impl<S: Symbol> Position<S> {
    pub fn new() -> Self {
        Self::default()
    }

    /// The stored bitmap of a symbol. For the flipped symbol the set bits
    /// are absences; callers must check `is_flipped`.
    pub fn bitmap(&self, symbol: S) -> &RoaringBitmap {
        &self.bitmaps[symbol.index()]
    }

    pub fn is_flipped(&self, symbol: S) -> bool {
        self.flipped == Some(symbol)
    }

    pub fn flipped_symbol(&self) -> Option<S> {
        self.flipped
    }

    pub fn is_deleted(&self, symbol: S) -> bool {
        self.deleted == Some(symbol)
    }

    pub fn deleted_symbol(&self) -> Option<S> {
        self.deleted
    }

    /// Whether the missing symbol is indexed at this position
    pub fn missing_indexed(&self) -> bool {
        self.missing_indexed
    }

    /// Filtered occurrence count of a symbol, transparently handling the
    /// flipped representation.
    pub fn count_in(&self, symbol: S, filter: &RoaringBitmap) -> u64 {
        let stored = self.bitmap(symbol).intersection_len(filter);
        if self.is_flipped(symbol) {
            filter.len() - stored
        } else {
            stored
        }
    }

    fn add_record(&mut self, symbol: S, record_id: u32) {
        if self.is_deleted(symbol) {
            return;
        }
        if self.is_flipped(symbol) {
            self.bitmaps[symbol.index()].remove(record_id);
        } else {
            self.bitmaps[symbol.index()].insert(record_id);
        }
    }

    fn cardinality(&self, symbol: S, sequence_count: u32) -> u64 {
        let stored = self.bitmaps[symbol.index()].len();
        if self.is_flipped(symbol) {
            u64::from(sequence_count) - stored
        } else {
            stored
        }
    }

    fn highest_cardinality_symbol(&self, sequence_count: u32) -> Option<S> {
        let mut best = None;
        let mut best_count = 0;
        for &symbol in S::SYMBOLS {
            let count = self.cardinality(symbol, sequence_count);
            if count > best_count {
                best = Some(symbol);
                best_count = count;
            }
        }
        best
    }

    /// Flip the highest-cardinality symbol's bitmap, restoring a previously
    /// flipped one first. Returns the new flipped symbol when it changed.
    pub fn flip_most_numerous(&mut self, sequence_count: u32) -> Option<S> {
        let candidate = self.highest_cardinality_symbol(sequence_count);
        if candidate == self.flipped {
            return None;
        }
        if let Some(previous) = self.flipped.take() {
            self.bitmaps[previous.index()] =
                complement_bitmap(&self.bitmaps[previous.index()], sequence_count);
        }
        if let Some(symbol) = candidate {
            self.bitmaps[symbol.index()] =
                complement_bitmap(&self.bitmaps[symbol.index()], sequence_count);
            self.flipped = Some(symbol);
        }
        self.flipped
    }

    /// Drop the highest-cardinality symbol's bitmap entirely. Build-time
    /// intermediate between bulk inserts; must be undone before queries.
    pub fn delete_most_numerous(&mut self, sequence_count: u32) -> Result<Option<S>> {
        if let Some(deleted) = self.deleted {
            return Err(GenoError::Internal(format!(
                "symbol '{}' is already deleted at this position",
                deleted.as_char()
            )));
        }
        if let Some(previous) = self.flipped.take() {
            self.bitmaps[previous.index()] =
                complement_bitmap(&self.bitmaps[previous.index()], sequence_count);
        }
        let candidate = self.highest_cardinality_symbol(sequence_count);
        if let Some(symbol) = candidate {
            self.bitmaps[symbol.index()] = RoaringBitmap::new();
            self.deleted = Some(symbol);
        }
        Ok(candidate)
    }

    /// Reconstruct the deleted symbol's bitmap as the complement of all
    /// other symbols and the missing-symbol records, leaving it flipped.
    pub fn undelete(&mut self, position_idx: u32, missing_symbol_bitmaps: &[RoaringBitmap]) {
        let deleted = match self.deleted.take() {
            Some(deleted) => deleted,
            None => return,
        };
        let mut restored = RoaringBitmap::new();
        for &symbol in S::SYMBOLS {
            if symbol != deleted {
                restored |= &self.bitmaps[symbol.index()];
            }
        }
        for (record_id, missing) in missing_symbol_bitmaps.iter().enumerate() {
            if missing.contains(position_idx) {
                restored.insert(record_id as u32);
            }
        }
        // The complement of everything else is exactly the deleted symbol's
        // set, so storing it un-complemented means storing it flipped.
        self.bitmaps[deleted.index()] = restored;
        self.flipped = Some(deleted);
    }
}

/// One aligned sequence of one partition: positions, per-record
/// missing-symbol bitmaps and the reference.
#[derive(Debug)]
pub struct SequenceStorePartition<S: Symbol> {
    reference: Arc<Vec<S>>,
    positions: Vec<Position<S>>,
    missing_symbol_bitmaps: Vec<RoaringBitmap>,
    sequence_count: u32,
}

impl<S: Symbol> SequenceStorePartition<S> {
    pub fn new(reference: Arc<Vec<S>>) -> Self {
        let positions = (0..reference.len()).map(|_| Position::new()).collect();
        Self {
            reference,
            positions,
            missing_symbol_bitmaps: Vec::new(),
            sequence_count: 0,
        }
    }

    /// Parse a reference sequence from its character representation
    pub fn parse_reference(text: &str) -> Result<Vec<S>> {
        text.chars()
            .map(|character| {
                S::from_char(character).ok_or_else(|| {
                    GenoError::Internal(format!(
                        "'{character}' in the reference is not a valid {} symbol",
                        S::NAME
                    ))
                })
            })
            .collect()
    }

    pub fn reference(&self) -> &[S] {
        &self.reference
    }

    pub fn genome_length(&self) -> usize {
        self.reference.len()
    }

    pub fn sequence_count(&self) -> u32 {
        self.sequence_count
    }

    pub fn positions(&self) -> &[Position<S>] {
        &self.positions
    }

    pub fn position(&self, position_idx: u32) -> &Position<S> {
        &self.positions[position_idx as usize]
    }

    /// Per-record bitmaps of positions carrying the missing symbol
    pub fn missing_symbol_bitmaps(&self) -> &[RoaringBitmap] {
        &self.missing_symbol_bitmaps
    }

    /// Append one aligned sequence; its record id is the current count.
    pub fn append_sequence(&mut self, aligned: &str) -> Result<()> {
        if aligned.chars().count() != self.reference.len() {
            return Err(GenoError::Internal(format!(
                "aligned sequence length {} does not match the reference length {}",
                aligned.chars().count(),
                self.reference.len()
            )));
        }
        let record_id = self.sequence_count;
        let mut missing = RoaringBitmap::new();
        for (position_idx, character) in aligned.chars().enumerate() {
            let symbol = S::from_char(character).ok_or_else(|| {
                GenoError::Internal(format!(
                    "'{character}' is not a valid {} symbol",
                    S::NAME
                ))
            })?;
            if symbol == S::MISSING {
                missing.insert(position_idx as u32);
            } else {
                self.positions[position_idx].add_record(symbol, record_id);
            }
        }
        self.missing_symbol_bitmaps.push(missing);
        self.sequence_count += 1;
        Ok(())
    }

    /// Materialize position-level bitmaps for the missing symbol out of the
    /// per-record bitmaps. Without this, missing-symbol predicates fall back
    /// to scanning the per-record bitmaps.
    pub fn index_missing_symbol(&mut self) {
        for (record_id, missing) in self.missing_symbol_bitmaps.iter().enumerate() {
            for position_idx in missing.iter() {
                self.positions[position_idx as usize]
                    .bitmaps[S::MISSING.index()]
                    .insert(record_id as u32);
            }
        }
        for position in &mut self.positions {
            position.missing_indexed = true;
        }
    }

    /// Flip the dominant symbol of every position. Call once after the last
    /// `append_sequence`.
    pub fn finalize(&mut self) {
        let sequence_count = self.sequence_count;
        for position in &mut self.positions {
            position.flip_most_numerous(sequence_count);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::Nucleotide;

    fn store(sequences: &[&str]) -> SequenceStorePartition<Nucleotide> {
        let reference =
            SequenceStorePartition::<Nucleotide>::parse_reference("ACGT").unwrap();
        let mut store = SequenceStorePartition::new(Arc::new(reference));
        for sequence in sequences {
            store.append_sequence(sequence).unwrap();
        }
        store.index_missing_symbol();
        store.finalize();
        store
    }

    #[test]
    fn test_dominant_symbol_is_flipped() {
        let store = store(&["ACGT", "ACGT", "TCGT"]);
        let position = store.position(0);
        assert!(position.is_flipped(Nucleotide::A));
        // The stored bitmap holds the absences of A
        assert_eq!(position.bitmap(Nucleotide::A).iter().collect::<Vec<_>>(), vec![2]);
        assert_eq!(
            position.bitmap(Nucleotide::T).iter().collect::<Vec<_>>(),
            vec![2]
        );
    }

    #[test]
    fn test_positions_partition_the_universe() {
        let store = store(&["ACGT", "AAGT", "NCGT"]);
        let universe: RoaringBitmap = (0..3).collect();
        for (idx, position) in store.positions().iter().enumerate() {
            let mut union = RoaringBitmap::new();
            for &symbol in Nucleotide::SYMBOLS {
                if position.is_flipped(symbol) {
                    union |= complement_bitmap(position.bitmap(symbol), 3);
                } else {
                    union |= position.bitmap(symbol);
                }
            }
            assert_eq!(union, universe, "position {idx} does not cover the universe");
        }
    }

    #[test]
    fn test_missing_symbol_bitmaps() {
        let store = store(&["ACGT", "NNGT", "ANGT"]);
        assert!(store.missing_symbol_bitmaps()[0].is_empty());
        assert_eq!(
            store.missing_symbol_bitmaps()[1].iter().collect::<Vec<_>>(),
            vec![0, 1]
        );
        assert_eq!(
            store.missing_symbol_bitmaps()[2].iter().collect::<Vec<_>>(),
            vec![1]
        );
        // Position-level missing index agrees
        assert!(store.position(1).missing_indexed());
        assert_eq!(
            store
                .position(1)
                .count_in(Nucleotide::N, &(0..3).collect()),
            2
        );
    }

    #[test]
    fn test_count_in_with_flipped_bitmap() {
        let store = store(&["ACGT", "ACGT", "TCGT", "GCGT"]);
        let filter: RoaringBitmap = (0..4).collect();
        let position = store.position(0);
        assert!(position.is_flipped(Nucleotide::A));
        assert_eq!(position.count_in(Nucleotide::A, &filter), 2);
        assert_eq!(position.count_in(Nucleotide::T, &filter), 1);
        assert_eq!(position.count_in(Nucleotide::G, &filter), 1);

        let narrow: RoaringBitmap = [0u32, 2].into_iter().collect();
        assert_eq!(position.count_in(Nucleotide::A, &narrow), 1);
    }

    #[test]
    fn test_delete_and_undelete_roundtrip() {
        let reference =
            SequenceStorePartition::<Nucleotide>::parse_reference("ACGT").unwrap();
        let mut store = SequenceStorePartition::new(Arc::new(reference));
        for sequence in ["ACGT", "ACGT", "TCGT"] {
            store.append_sequence(sequence).unwrap();
        }
        let sequence_count = store.sequence_count();
        let missing = store.missing_symbol_bitmaps.clone();

        let position = &mut store.positions[0];
        let deleted = position.delete_most_numerous(sequence_count).unwrap();
        assert_eq!(deleted, Some(Nucleotide::A));
        assert!(position.bitmap(Nucleotide::A).is_empty());

        position.undelete(0, &missing);
        assert!(position.is_flipped(Nucleotide::A));
        assert_eq!(
            complement_bitmap(position.bitmap(Nucleotide::A), sequence_count)
                .iter()
                .collect::<Vec<_>>(),
            vec![0, 1]
        );
    }

    #[test]
    fn test_length_mismatch_is_rejected() {
        let reference =
            SequenceStorePartition::<Nucleotide>::parse_reference("ACGT").unwrap();
        let mut store = SequenceStorePartition::new(Arc::new(reference));
        assert!(store.append_sequence("ACG").is_err());
    }
}
