//! Partition bundle: typed columns plus sequence stores over one id space

use std::collections::HashMap;

use crate::common::{AminoAcid, Nucleotide};
use crate::config::{ColumnMetadata, ValueType};

use super::column::{
    BoolColumnPartition, DateColumnPartition, FloatColumnPartition, InsertionColumnPartition,
    IntColumnPartition, PangoLineageColumnPartition, StringColumnPartition,
    IndexedStringColumnPartition,
};
use super::SequenceStorePartition;

/// A contiguous id range whose records are sorted by the configured date
/// column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Chunk {
    pub offset: u32,
    pub len: u32,
}

impl Chunk {
    pub fn new(offset: u32, len: u32) -> Self {
        Self { offset, len }
    }

    pub fn end(&self) -> u32 {
        self.offset + self.len
    }
}

/// All metadata columns of one partition, keyed by column name
#[derive(Debug, Default)]
pub struct ColumnPartitionGroup {
    pub metadata: Vec<ColumnMetadata>,
    pub string_columns: HashMap<String, StringColumnPartition>,
    pub indexed_string_columns: HashMap<String, IndexedStringColumnPartition>,
    pub pango_lineage_columns: HashMap<String, PangoLineageColumnPartition>,
    pub date_columns: HashMap<String, DateColumnPartition>,
    pub bool_columns: HashMap<String, BoolColumnPartition>,
    pub int_columns: HashMap<String, IntColumnPartition>,
    pub float_columns: HashMap<String, FloatColumnPartition>,
    pub nuc_insertion_columns: HashMap<String, InsertionColumnPartition<Nucleotide>>,
    pub aa_insertion_columns: HashMap<String, InsertionColumnPartition<AminoAcid>>,
}

impl ColumnPartitionGroup {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_string_column(&mut self, name: impl Into<String>, column: StringColumnPartition) {
        let name = name.into();
        self.metadata
            .push(ColumnMetadata::new(name.clone(), ValueType::String));
        self.string_columns.insert(name, column);
    }

    pub fn insert_indexed_string_column(
        &mut self,
        name: impl Into<String>,
        column: IndexedStringColumnPartition,
    ) {
        let name = name.into();
        self.metadata
            .push(ColumnMetadata::new(name.clone(), ValueType::String).indexed(true));
        self.indexed_string_columns.insert(name, column);
    }

    pub fn insert_pango_lineage_column(
        &mut self,
        name: impl Into<String>,
        column: PangoLineageColumnPartition,
    ) {
        let name = name.into();
        self.metadata
            .push(ColumnMetadata::new(name.clone(), ValueType::PangoLineage).indexed(true));
        self.pango_lineage_columns.insert(name, column);
    }

    pub fn insert_date_column(&mut self, name: impl Into<String>, column: DateColumnPartition) {
        let name = name.into();
        self.metadata
            .push(ColumnMetadata::new(name.clone(), ValueType::Date));
        self.date_columns.insert(name, column);
    }

    pub fn insert_bool_column(&mut self, name: impl Into<String>, column: BoolColumnPartition) {
        let name = name.into();
        self.metadata
            .push(ColumnMetadata::new(name.clone(), ValueType::Bool));
        self.bool_columns.insert(name, column);
    }

    pub fn insert_int_column(&mut self, name: impl Into<String>, column: IntColumnPartition) {
        let name = name.into();
        self.metadata
            .push(ColumnMetadata::new(name.clone(), ValueType::Int));
        self.int_columns.insert(name, column);
    }

    pub fn insert_float_column(&mut self, name: impl Into<String>, column: FloatColumnPartition) {
        let name = name.into();
        self.metadata
            .push(ColumnMetadata::new(name.clone(), ValueType::Float));
        self.float_columns.insert(name, column);
    }

    pub fn insert_nuc_insertion_column(
        &mut self,
        name: impl Into<String>,
        column: InsertionColumnPartition<Nucleotide>,
    ) {
        let name = name.into();
        self.metadata
            .push(ColumnMetadata::new(name.clone(), ValueType::Insertion));
        self.nuc_insertion_columns.insert(name, column);
    }

    pub fn insert_aa_insertion_column(
        &mut self,
        name: impl Into<String>,
        column: InsertionColumnPartition<AminoAcid>,
    ) {
        let name = name.into();
        self.metadata
            .push(ColumnMetadata::new(name.clone(), ValueType::AminoAcidInsertion));
        self.aa_insertion_columns.insert(name, column);
    }

    /// Metadata entries for the named fields, in the requested order
    pub fn metadata_subgroup(&self, fields: &[String]) -> Option<Vec<ColumnMetadata>> {
        fields
            .iter()
            .map(|field| {
                self.metadata
                    .iter()
                    .find(|metadata| &metadata.name == field)
                    .cloned()
            })
            .collect()
    }
}

/// Immutable bundle of one partition's stores. Record ids are dense within
/// `[0, sequence_count)` and independent between partitions.
#[derive(Debug, Default)]
pub struct DatabasePartition {
    pub sequence_count: u32,
    pub chunks: Vec<Chunk>,
    pub columns: ColumnPartitionGroup,
    pub nuc_sequences: HashMap<String, SequenceStorePartition<Nucleotide>>,
    pub aa_sequences: HashMap<String, SequenceStorePartition<AminoAcid>>,
}

impl DatabasePartition {
    pub fn new(sequence_count: u32) -> Self {
        Self {
            sequence_count,
            ..Self::default()
        }
    }

    pub fn insert_nuc_sequence(
        &mut self,
        name: impl Into<String>,
        store: SequenceStorePartition<Nucleotide>,
    ) {
        self.nuc_sequences.insert(name.into(), store);
    }

    pub fn insert_aa_sequence(
        &mut self,
        name: impl Into<String>,
        store: SequenceStorePartition<AminoAcid>,
    ) {
        self.aa_sequences.insert(name.into(), store);
    }
}
