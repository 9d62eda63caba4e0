//! Aggregated action: count, optionally grouped by metadata fields
//!
//! Grouping keys the accumulator maps by the packed tuple byte image, so
//! two records land in the same group iff every raw field image matches.
//! Thread-local maps are built per partition in parallel and merged by a
//! commutative sum.

use std::collections::BTreeMap;

use ahash::AHashMap;
use rayon::prelude::*;

use crate::config::ColumnMetadata;
use crate::database::Database;
use crate::query::operators::OperatorResult;
use crate::query::result::{QueryResult, QueryResultEntry, QueryValue};
use crate::query::tuple::{read_tuple, tuple_size, write_tuple};
use crate::{GenoError, Result};

use super::{apply_offset_and_limit, sort_entries, ActionOptions};

pub const COUNT_FIELD: &str = "count";

#[derive(Debug)]
pub struct Aggregated {
    pub group_by_fields: Vec<String>,
    pub options: ActionOptions,
}

impl Aggregated {
    pub fn new(group_by_fields: Vec<String>, options: ActionOptions) -> Self {
        Self {
            group_by_fields,
            options,
        }
    }

    fn group_by_metadata(&self, database: &Database) -> Result<Vec<ColumnMetadata>> {
        self.group_by_fields
            .iter()
            .map(|field| {
                database.schema.metadata(field).cloned().ok_or_else(|| {
                    GenoError::QueryParse(format!(
                        "Metadata field '{field}' to group by not found"
                    ))
                })
            })
            .collect()
    }

    pub fn validate(&self, database: &Database) -> Result<()> {
        self.group_by_metadata(database)?;
        for order_by in &self.options.order_by_fields {
            if order_by.field != COUNT_FIELD
                && !self.group_by_fields.contains(&order_by.field)
            {
                return Err(GenoError::QueryParse(format!(
                    "The orderByField '{}' cannot be ordered by, as it does not appear in the groupByFields.",
                    order_by.field
                )));
            }
        }
        Ok(())
    }

    pub fn execute(
        &self,
        database: &Database,
        bitmap_filters: Vec<OperatorResult<'_>>,
    ) -> Result<QueryResult> {
        if self.group_by_fields.is_empty() {
            return Ok(aggregate_without_grouping(&bitmap_filters));
        }
        let group_by_metadata = self.group_by_metadata(database)?;
        let size = tuple_size(&group_by_metadata);

        let partition_maps: Result<Vec<AHashMap<Vec<u8>, u64>>> = database
            .partitions
            .par_iter()
            .zip(bitmap_filters.par_iter())
            .map(|(partition, filter)| {
                let mut map: AHashMap<Vec<u8>, u64> = AHashMap::new();
                let mut scratch = vec![0u8; size];
                for record_id in filter.iter() {
                    write_tuple(&mut scratch, record_id, &partition.columns, &group_by_metadata)?;
                    match map.get_mut(scratch.as_slice()) {
                        Some(count) => *count += 1,
                        None => {
                            map.insert(scratch.clone(), 1);
                        }
                    }
                }
                Ok(map)
            })
            .collect();

        let mut final_map: AHashMap<Vec<u8>, u64> = AHashMap::new();
        for map in partition_maps? {
            for (key, count) in map {
                *final_map.entry(key).or_insert(0) += count;
            }
        }

        let mut entries = Vec::with_capacity(final_map.len());
        if let Some(partition) = database.partitions.first() {
            for (key, count) in final_map {
                let mut fields: BTreeMap<String, Option<QueryValue>> =
                    read_tuple(&key, &partition.columns, &group_by_metadata)?
                        .into_iter()
                        .collect();
                fields.insert(COUNT_FIELD.to_string(), Some(QueryValue::Int(count as i32)));
                entries.push(QueryResultEntry::new(fields));
            }
        }
        sort_entries(&mut entries, &self.options);
        Ok(QueryResult::materialized(apply_offset_and_limit(
            entries,
            &self.options,
        )))
    }
}

fn aggregate_without_grouping(bitmap_filters: &[OperatorResult<'_>]) -> QueryResult {
    let count: u64 = bitmap_filters.iter().map(|filter| filter.len()).sum();
    let mut fields = BTreeMap::new();
    fields.insert(COUNT_FIELD.to_string(), Some(QueryValue::Int(count as i32)));
    QueryResult::materialized(vec![QueryResultEntry::new(fields)])
}
