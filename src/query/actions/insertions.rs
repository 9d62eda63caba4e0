//! Insertions action: aggregate insertion counts within the filter
//!
//! Walks the inverted insertion indexes of the matching columns and
//! intersects each motif's record bitmap with the partition filter. A full
//! filter skips the intersection entirely.

use std::collections::BTreeMap;
use std::marker::PhantomData;

use ahash::AHashMap;
use serde_json::{Map, Value as Json};

use crate::database::Database;
use crate::query::operators::OperatorResult;
use crate::query::result::{QueryResult, QueryResultEntry, QueryValue};
use crate::{GenoError, Result};

use super::{
    apply_offset_and_limit, parse_string_array, sort_entries, validate_order_by_against,
    ActionOptions, ActionSymbol,
};

const RESULT_FIELDS: [&str; 5] = [
    "position",
    "insertedSymbols",
    "sequenceName",
    "count",
    "insertion",
];

#[derive(Debug)]
pub struct InsertionAggregation<S: ActionSymbol> {
    pub column_names: Vec<String>,
    pub sequence_names: Vec<String>,
    pub options: ActionOptions,
    _symbol: PhantomData<S>,
}

impl<S: ActionSymbol> InsertionAggregation<S> {
    pub fn new(
        column_names: Vec<String>,
        sequence_names: Vec<String>,
        options: ActionOptions,
    ) -> Self {
        Self {
            column_names,
            sequence_names,
            options,
            _symbol: PhantomData,
        }
    }

    pub fn from_object(object: &Map<String, Json>, options: ActionOptions) -> Result<Self> {
        Ok(Self::new(
            parse_string_array(object, "column")?,
            parse_string_array(object, "sequenceName")?,
            options,
        ))
    }

    pub fn validate(&self, database: &Database) -> Result<()> {
        if let Some(partition) = database.partitions.first() {
            for column_name in &self.column_names {
                if !S::insertion_columns(&partition.columns).contains_key(column_name) {
                    return Err(GenoError::ColumnNotFound(column_name.clone()));
                }
            }
        }
        let known = S::sequence_names(database);
        for sequence_name in &self.sequence_names {
            if !known.contains(sequence_name) {
                return Err(GenoError::SequenceNotFound(sequence_name.clone()));
            }
        }
        validate_order_by_against(&self.options, &RESULT_FIELDS, "Insertions")
    }

    pub fn execute(
        &self,
        database: &Database,
        bitmap_filters: Vec<OperatorResult<'_>>,
    ) -> Result<QueryResult> {
        // (sequence name, position, motif) -> filtered count
        let mut counts: AHashMap<(String, u32, String), u64> = AHashMap::new();
        for (partition, filter) in database.partitions.iter().zip(bitmap_filters.iter()) {
            if filter.is_empty() {
                continue;
            }
            let full_filter = filter.len() == u64::from(partition.sequence_count);
            for (column_name, insertion_column) in S::insertion_columns(&partition.columns) {
                if !self.column_names.is_empty() && !self.column_names.contains(column_name) {
                    continue;
                }
                for (sequence_name, index) in insertion_column.insertion_indexes() {
                    if !self.sequence_names.is_empty()
                        && !self.sequence_names.contains(sequence_name)
                    {
                        continue;
                    }
                    for (position, insertion_position) in index.positions() {
                        for insertion in &insertion_position.insertions {
                            let count = if full_filter {
                                insertion.record_ids.len()
                            } else {
                                insertion.record_ids.intersection_len(filter)
                            };
                            if count > 0 {
                                *counts
                                    .entry((
                                        sequence_name.clone(),
                                        position,
                                        insertion.value.clone(),
                                    ))
                                    .or_insert(0) += count;
                            }
                        }
                    }
                }
            }
        }

        let default_sequence = S::default_sequence_name(&database.schema).to_string();
        let mut entries = Vec::with_capacity(counts.len());
        for ((sequence_name, position, motif), count) in counts {
            let sequence_prefix = if sequence_name == default_sequence {
                String::new()
            } else {
                format!("{sequence_name}:")
            };
            let mut fields: BTreeMap<String, Option<QueryValue>> = BTreeMap::new();
            fields.insert(
                "position".to_string(),
                Some(QueryValue::Int(position as i32)),
            );
            fields.insert(
                "insertedSymbols".to_string(),
                Some(QueryValue::String(motif.clone())),
            );
            fields.insert(
                "sequenceName".to_string(),
                Some(QueryValue::String(sequence_name)),
            );
            fields.insert(
                "insertion".to_string(),
                Some(QueryValue::String(format!(
                    "ins_{sequence_prefix}{position}:{motif}"
                ))),
            );
            fields.insert("count".to_string(), Some(QueryValue::Int(count as i32)));
            entries.push(QueryResultEntry::new(fields));
        }
        sort_entries(&mut entries, &self.options);
        Ok(QueryResult::materialized(apply_offset_and_limit(
            entries,
            &self.options,
        )))
    }
}
