//! Runtime-defined packed tuples
//!
//! One tuple is one row of the requested columns packed into a contiguous
//! byte buffer whose layout follows the metadata list: Date 4 bytes, Bool 1,
//! Int 4, Float 8, String 20, dictionary-indexed kinds 4. Byte-image
//! equality and hashing give group-by its semantics; typed comparison with
//! dictionary lookups drives order-by. Buffers come out of an arena owned
//! by the factory and are never reallocated while referenced.

use std::cmp::Ordering;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use crate::common::{Date, EmbeddedString, OptionalBool};
use crate::config::{ColumnMetadata, ColumnType};
use crate::storage::column::INT_NULL;
use crate::storage::ColumnPartitionGroup;
use crate::{GenoError, Result};

use super::actions::OrderByField;
use super::result::QueryValue;

/// Packed width of one field
pub fn field_size(column_type: ColumnType) -> usize {
    match column_type {
        ColumnType::Date => 4,
        ColumnType::Bool => 1,
        ColumnType::Int => 4,
        ColumnType::Float => 8,
        ColumnType::String => 20,
        ColumnType::IndexedString
        | ColumnType::IndexedPangoLineage
        | ColumnType::NucInsertion
        | ColumnType::AaInsertion => 4,
    }
}

/// Packed width of one tuple
pub fn tuple_size(metadata: &[ColumnMetadata]) -> usize {
    metadata
        .iter()
        .map(|metadata| field_size(metadata.column_type()))
        .sum()
}

fn missing_column(name: &str) -> GenoError {
    GenoError::Internal(format!("column '{name}' is missing from the partition"))
}

/// Pack the fields of one record into `buffer`
pub fn write_tuple(
    buffer: &mut [u8],
    record_id: u32,
    columns: &ColumnPartitionGroup,
    metadata_list: &[ColumnMetadata],
) -> Result<()> {
    let row = record_id as usize;
    let mut offset = 0;
    for metadata in metadata_list {
        let name = metadata.name.as_str();
        match metadata.column_type() {
            ColumnType::Date => {
                let value = columns
                    .date_columns
                    .get(name)
                    .ok_or_else(|| missing_column(name))?
                    .values()[row];
                buffer[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
                offset += 4;
            }
            ColumnType::Bool => {
                let value = columns
                    .bool_columns
                    .get(name)
                    .ok_or_else(|| missing_column(name))?
                    .values()[row];
                buffer[offset] = value.as_byte();
                offset += 1;
            }
            ColumnType::Int => {
                let value = columns
                    .int_columns
                    .get(name)
                    .ok_or_else(|| missing_column(name))?
                    .values()[row];
                buffer[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
                offset += 4;
            }
            ColumnType::Float => {
                let value = columns
                    .float_columns
                    .get(name)
                    .ok_or_else(|| missing_column(name))?
                    .values()[row];
                buffer[offset..offset + 8].copy_from_slice(&value.to_le_bytes());
                offset += 8;
            }
            ColumnType::String => {
                let value = columns
                    .string_columns
                    .get(name)
                    .ok_or_else(|| missing_column(name))?
                    .values()[row];
                buffer[offset..offset + 20].copy_from_slice(value.as_bytes());
                offset += 20;
            }
            ColumnType::IndexedString => {
                let value = columns
                    .indexed_string_columns
                    .get(name)
                    .ok_or_else(|| missing_column(name))?
                    .values()[row];
                buffer[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
                offset += 4;
            }
            ColumnType::IndexedPangoLineage => {
                let value = columns
                    .pango_lineage_columns
                    .get(name)
                    .ok_or_else(|| missing_column(name))?
                    .values()[row];
                buffer[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
                offset += 4;
            }
            ColumnType::NucInsertion => {
                let value = columns
                    .nuc_insertion_columns
                    .get(name)
                    .ok_or_else(|| missing_column(name))?
                    .values()[row];
                buffer[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
                offset += 4;
            }
            ColumnType::AaInsertion => {
                let value = columns
                    .aa_insertion_columns
                    .get(name)
                    .ok_or_else(|| missing_column(name))?
                    .values()[row];
                buffer[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
                offset += 4;
            }
        }
    }
    Ok(())
}

fn read_u32(buffer: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes(buffer[offset..offset + 4].try_into().unwrap())
}

/// Decode one field; empty strings and in-band sentinels become `None`
fn read_field(
    buffer: &[u8],
    offset: usize,
    metadata: &ColumnMetadata,
    columns: &ColumnPartitionGroup,
) -> Result<Option<QueryValue>> {
    let name = metadata.name.as_str();
    let value = match metadata.column_type() {
        ColumnType::Date => {
            let date = Date(read_u32(buffer, offset));
            date.format().map(QueryValue::String)
        }
        ColumnType::Bool => OptionalBool::from_byte(buffer[offset])
            .value()
            .map(QueryValue::Bool),
        ColumnType::Int => {
            let value = i32::from_le_bytes(buffer[offset..offset + 4].try_into().unwrap());
            (value != INT_NULL).then_some(QueryValue::Int(value))
        }
        ColumnType::Float => {
            let value = f64::from_le_bytes(buffer[offset..offset + 8].try_into().unwrap());
            (!value.is_nan()).then_some(QueryValue::Double(value))
        }
        ColumnType::String => {
            let value =
                EmbeddedString::from_bytes(buffer[offset..offset + 20].try_into().unwrap());
            let decoded = columns
                .string_columns
                .get(name)
                .ok_or_else(|| missing_column(name))?
                .lookup(&value);
            (!decoded.is_empty()).then_some(QueryValue::String(decoded))
        }
        ColumnType::IndexedString => {
            let decoded = columns
                .indexed_string_columns
                .get(name)
                .ok_or_else(|| missing_column(name))?
                .lookup_value(read_u32(buffer, offset));
            (!decoded.is_empty()).then(|| QueryValue::String(decoded.to_string()))
        }
        ColumnType::IndexedPangoLineage => {
            let decoded = columns
                .pango_lineage_columns
                .get(name)
                .ok_or_else(|| missing_column(name))?
                .lookup_value(read_u32(buffer, offset));
            (!decoded.is_empty()).then(|| QueryValue::String(decoded.to_string()))
        }
        ColumnType::NucInsertion => {
            let decoded = columns
                .nuc_insertion_columns
                .get(name)
                .ok_or_else(|| missing_column(name))?
                .lookup_value(read_u32(buffer, offset));
            (!decoded.is_empty()).then(|| QueryValue::String(decoded.to_string()))
        }
        ColumnType::AaInsertion => {
            let decoded = columns
                .aa_insertion_columns
                .get(name)
                .ok_or_else(|| missing_column(name))?
                .lookup_value(read_u32(buffer, offset));
            (!decoded.is_empty()).then(|| QueryValue::String(decoded.to_string()))
        }
    };
    Ok(value)
}

/// Decode a packed buffer back to ordered field values
pub fn read_tuple(
    buffer: &[u8],
    columns: &ColumnPartitionGroup,
    metadata_list: &[ColumnMetadata],
) -> Result<Vec<(String, Option<QueryValue>)>> {
    let mut fields = Vec::with_capacity(metadata_list.len());
    let mut offset = 0;
    for metadata in metadata_list {
        fields.push((
            metadata.name.clone(),
            read_field(buffer, offset, metadata, columns)?,
        ));
        offset += field_size(metadata.column_type());
    }
    Ok(fields)
}

/// One order-by field resolved to its tuple offset
#[derive(Debug, Clone)]
pub struct TupleComparatorField {
    pub offset: usize,
    pub metadata: ColumnMetadata,
    pub ascending: bool,
}

/// Resolve order-by fields against the tuple layout, preserving the
/// order-by priority.
pub fn comparator_fields(
    metadata_list: &[ColumnMetadata],
    order_by_fields: &[OrderByField],
) -> Result<Vec<TupleComparatorField>> {
    order_by_fields
        .iter()
        .map(|order_by| {
            let mut offset = 0;
            for metadata in metadata_list {
                if metadata.name == order_by.field {
                    return Ok(TupleComparatorField {
                        offset,
                        metadata: metadata.clone(),
                        ascending: order_by.ascending,
                    });
                }
                offset += field_size(metadata.column_type());
            }
            Err(GenoError::QueryParse(format!(
                "The orderByField '{}' does not appear in the selected fields",
                order_by.field
            )))
        })
        .collect()
}

/// A borrowed view of one packed row. Equality and hashing are byte-image
/// based; two rows in different partitions agree because dictionaries are
/// shared database-wide.
#[derive(Clone, Copy, Debug)]
pub struct Tuple<'a> {
    pub columns: &'a ColumnPartitionGroup,
    pub data: &'a [u8],
}

impl<'a> PartialEq for Tuple<'a> {
    fn eq(&self, other: &Self) -> bool {
        self.data == other.data
    }
}

impl<'a> Eq for Tuple<'a> {}

impl<'a> Hash for Tuple<'a> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.data.hash(state);
    }
}

impl<'a> Tuple<'a> {
    pub fn fields(
        &self,
        metadata_list: &[ColumnMetadata],
    ) -> Result<Vec<(String, Option<QueryValue>)>> {
        read_tuple(self.data, self.columns, metadata_list)
    }

    fn decode_string(&self, offset: usize, metadata: &ColumnMetadata) -> String {
        let name = metadata.name.as_str();
        match metadata.column_type() {
            ColumnType::String => {
                let value = EmbeddedString::from_bytes(
                    self.data[offset..offset + 20].try_into().unwrap(),
                );
                self.columns
                    .string_columns
                    .get(name)
                    .map(|column| column.lookup(&value))
                    .unwrap_or_default()
            }
            ColumnType::IndexedString => self
                .columns
                .indexed_string_columns
                .get(name)
                .map(|column| column.lookup_value(read_u32(self.data, offset)).to_string())
                .unwrap_or_default(),
            ColumnType::IndexedPangoLineage => self
                .columns
                .pango_lineage_columns
                .get(name)
                .map(|column| column.lookup_value(read_u32(self.data, offset)).to_string())
                .unwrap_or_default(),
            ColumnType::NucInsertion => self
                .columns
                .nuc_insertion_columns
                .get(name)
                .map(|column| column.lookup_value(read_u32(self.data, offset)).to_string())
                .unwrap_or_default(),
            ColumnType::AaInsertion => self
                .columns
                .aa_insertion_columns
                .get(name)
                .map(|column| column.lookup_value(read_u32(self.data, offset)).to_string())
                .unwrap_or_default(),
            _ => String::new(),
        }
    }

    fn compare_field(&self, other: &Tuple<'a>, field: &TupleComparatorField) -> Ordering {
        let offset = field.offset;
        match field.metadata.column_type() {
            ColumnType::Date => {
                read_u32(self.data, offset).cmp(&read_u32(other.data, offset))
            }
            ColumnType::Bool => self.data[offset].cmp(&other.data[offset]),
            ColumnType::Int => {
                let left = i32::from_le_bytes(self.data[offset..offset + 4].try_into().unwrap());
                let right = i32::from_le_bytes(other.data[offset..offset + 4].try_into().unwrap());
                left.cmp(&right)
            }
            ColumnType::Float => {
                let left = f64::from_le_bytes(self.data[offset..offset + 8].try_into().unwrap());
                let right = f64::from_le_bytes(other.data[offset..offset + 8].try_into().unwrap());
                match left.partial_cmp(&right) {
                    Some(ordering) => ordering,
                    // NaN is the null sentinel and sorts after every value
                    None if left.is_nan() && right.is_nan() => Ordering::Equal,
                    None if left.is_nan() => Ordering::Greater,
                    None => Ordering::Less,
                }
            }
            ColumnType::String => {
                let left = EmbeddedString::from_bytes(
                    self.data[offset..offset + 20].try_into().unwrap(),
                );
                let right = EmbeddedString::from_bytes(
                    other.data[offset..offset + 20].try_into().unwrap(),
                );
                if let Some(ordering) = left.fast_compare(&right) {
                    return ordering;
                }
                self.decode_string(offset, &field.metadata)
                    .cmp(&other.decode_string(offset, &field.metadata))
            }
            // Dictionary ids are not ordered like their values
            ColumnType::IndexedString
            | ColumnType::IndexedPangoLineage
            | ColumnType::NucInsertion
            | ColumnType::AaInsertion => self
                .decode_string(offset, &field.metadata)
                .cmp(&other.decode_string(offset, &field.metadata)),
        }
    }

    /// Compare by the given fields, honoring per-field sort direction
    pub fn compare(&self, other: &Tuple<'a>, fields: &[TupleComparatorField]) -> Ordering {
        for field in fields {
            let ordering = self.compare_field(other, field);
            if ordering != Ordering::Equal {
                return if field.ascending {
                    ordering
                } else {
                    ordering.reverse()
                };
            }
        }
        Ordering::Equal
    }

    fn seeded_hash(&self, seed: u64) -> u64 {
        let mut hasher = DefaultHasher::new();
        seed.hash(&mut hasher);
        self.data.hash(&mut hasher);
        hasher.finish()
    }
}

/// Build the comparator closure for sorting, optionally breaking ties with
/// a seeded hash of the row image.
pub fn tuple_comparator<'a>(
    fields: Vec<TupleComparatorField>,
    randomize_seed: Option<u64>,
) -> impl Fn(&Tuple<'a>, &Tuple<'a>) -> Ordering {
    move |left, right| {
        let ordering = left.compare(right, &fields);
        if ordering != Ordering::Equal {
            return ordering;
        }
        match randomize_seed {
            Some(seed) => left.seeded_hash(seed).cmp(&right.seeded_hash(seed)),
            None => Ordering::Equal,
        }
    }
}

/// Arena-owning factory: every `allocate_many` reserves one backing buffer
/// sized for all requested tuples; existing buffers are never reallocated,
/// so handed-out views stay valid.
pub struct TupleFactory<'a> {
    columns: &'a ColumnPartitionGroup,
    metadata: Vec<ColumnMetadata>,
    tuple_size: usize,
    arena: Vec<Vec<u8>>,
}

impl<'a> TupleFactory<'a> {
    pub fn new(columns: &'a ColumnPartitionGroup, metadata: Vec<ColumnMetadata>) -> Self {
        let tuple_size = tuple_size(&metadata);
        Self {
            columns,
            metadata,
            tuple_size,
            arena: Vec::new(),
        }
    }

    pub fn tuple_size(&self) -> usize {
        self.tuple_size
    }

    pub fn metadata(&self) -> &[ColumnMetadata] {
        &self.metadata
    }

    /// Allocate one buffer holding `count` tuples and fill it from the
    /// record ids.
    pub fn allocate_many(
        &mut self,
        count: usize,
        record_ids: impl Iterator<Item = u32>,
    ) -> Result<()> {
        if self.tuple_size == 0 || count == 0 {
            return Ok(());
        }
        let mut buffer = vec![0u8; count * self.tuple_size];
        for (slot, record_id) in buffer.chunks_exact_mut(self.tuple_size).zip(record_ids) {
            write_tuple(slot, record_id, self.columns, &self.metadata)?;
        }
        self.arena.push(buffer);
        Ok(())
    }

    /// Views over every allocated tuple, in allocation order
    pub fn tuples(&self) -> impl Iterator<Item = Tuple<'_>> {
        let tuple_size = self.tuple_size.max(1);
        self.arena.iter().flat_map(move |buffer| {
            buffer.chunks_exact(tuple_size).map(move |data| Tuple {
                columns: self.columns,
                data,
            })
        })
    }
}
