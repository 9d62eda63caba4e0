//! Database schema definitions
//!
//! The schema arrives from the preprocessing layer as an already-deserialized
//! value; parsing a configuration file is not the engine's concern.

use serde::{Deserialize, Serialize};

/// Logical value type of a metadata field, as declared by the schema
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ValueType {
    String,
    PangoLineage,
    Date,
    Bool,
    Int,
    Float,
    Insertion,
    AminoAcidInsertion,
}

/// Physical column kind, derived from the value type and the index flag
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ColumnType {
    String,
    IndexedString,
    IndexedPangoLineage,
    Date,
    Bool,
    Int,
    Float,
    NucInsertion,
    AaInsertion,
}

/// One metadata field of the schema
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ColumnMetadata {
    pub name: String,
    #[serde(rename = "type")]
    pub value_type: ValueType,
    #[serde(default)]
    pub generate_index: bool,
}

impl ColumnMetadata {
    pub fn new(name: impl Into<String>, value_type: ValueType) -> Self {
        Self {
            name: name.into(),
            value_type,
            generate_index: false,
        }
    }

    /// Set the index flag
    pub fn indexed(mut self, generate_index: bool) -> Self {
        self.generate_index = generate_index;
        self
    }

    pub fn column_type(&self) -> ColumnType {
        match self.value_type {
            ValueType::String if self.generate_index => ColumnType::IndexedString,
            ValueType::String => ColumnType::String,
            ValueType::PangoLineage => ColumnType::IndexedPangoLineage,
            ValueType::Date => ColumnType::Date,
            ValueType::Bool => ColumnType::Bool,
            ValueType::Int => ColumnType::Int,
            ValueType::Float => ColumnType::Float,
            ValueType::Insertion => ColumnType::NucInsertion,
            ValueType::AminoAcidInsertion => ColumnType::AaInsertion,
        }
    }
}

/// Schema of a loaded database
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DatabaseSchema {
    pub instance_name: String,
    pub metadata: Vec<ColumnMetadata>,
    pub primary_key: String,
    #[serde(default)]
    pub date_to_sort_by: Option<String>,
    #[serde(default)]
    pub partition_by: Option<String>,
    pub default_nucleotide_sequence: String,
    pub default_amino_acid_sequence: String,
}

impl DatabaseSchema {
    /// Look up a metadata field by name
    pub fn metadata(&self, name: &str) -> Option<&ColumnMetadata> {
        self.metadata.iter().find(|m| m.name == name)
    }

    /// The unique pango lineage column, if the schema declares one
    pub fn pango_lineage_column(&self) -> Option<&ColumnMetadata> {
        self.metadata
            .iter()
            .find(|m| m.value_type == ValueType::PangoLineage)
    }
}
