//! Mutations action: per-position symbol frequencies within the filter
//!
//! For every reference position the occurrence count of each symbol among
//! the filtered records is computed with the flipped-bitmap trick: the
//! count under a flipped symbol is the filter cardinality minus the overlap
//! with the stored complement. The proportion denominator is the coverage,
//! i.e. the filtered records minus those carrying the missing symbol at the
//! position; where the missing symbol is not indexed its count falls out
//! algebraically because the position's bitmaps partition the universe.

use std::collections::BTreeMap;
use std::marker::PhantomData;

use rayon::prelude::*;
use serde_json::{Map, Value as Json};

use crate::database::Database;
use crate::query::operators::OperatorResult;
use crate::query::result::{QueryResult, QueryResultEntry, QueryValue};
use crate::storage::SequenceStorePartition;
use crate::{GenoError, Result};

use super::{
    apply_offset_and_limit, parse_string_array, sort_entries, validate_order_by_against,
    ActionOptions, ActionSymbol,
};

const DEFAULT_MIN_PROPORTION: f64 = 0.05;

const RESULT_FIELDS: [&str; 6] = [
    "position",
    "mutation",
    "sequenceName",
    "count",
    "proportion",
    "coverage",
];

#[derive(Debug)]
pub struct Mutations<S: ActionSymbol> {
    pub min_proportion: f64,
    pub sequence_names: Vec<String>,
    pub options: ActionOptions,
    _symbol: PhantomData<S>,
}

impl<S: ActionSymbol> Mutations<S> {
    pub fn new(min_proportion: f64, sequence_names: Vec<String>, options: ActionOptions) -> Self {
        Self {
            min_proportion,
            sequence_names,
            options,
            _symbol: PhantomData,
        }
    }

    pub fn from_object(object: &Map<String, Json>, options: ActionOptions) -> Result<Self> {
        let min_proportion = match object.get("minProportion") {
            None | Some(Json::Null) => DEFAULT_MIN_PROPORTION,
            Some(value) => value.as_f64().ok_or_else(|| {
                GenoError::QueryParse(
                    "The field 'minProportion' must be a number".to_string(),
                )
            })?,
        };
        Ok(Self::new(
            min_proportion,
            parse_string_array(object, "sequenceName")?,
            options,
        ))
    }

    pub fn validate(&self, database: &Database) -> Result<()> {
        if !(0.0..=1.0).contains(&self.min_proportion) {
            return Err(GenoError::QueryParse(format!(
                "minProportion must be within [0.0, 1.0], was {}",
                self.min_proportion
            )));
        }
        let known = S::sequence_names(database);
        for sequence_name in &self.sequence_names {
            if !known.contains(sequence_name) {
                return Err(GenoError::SequenceNotFound(sequence_name.clone()));
            }
        }
        validate_order_by_against(&self.options, &RESULT_FIELDS, "Mutations")
    }

    pub fn execute(
        &self,
        database: &Database,
        bitmap_filters: Vec<OperatorResult<'_>>,
    ) -> Result<QueryResult> {
        let sequence_names = if self.sequence_names.is_empty() {
            S::sequence_names(database)
        } else {
            self.sequence_names.clone()
        };

        let mut entries = Vec::new();
        for sequence_name in sequence_names {
            let stores: Vec<&SequenceStorePartition<S>> = database
                .partitions
                .iter()
                .map(|partition| {
                    S::sequence_stores(partition)
                        .get(&sequence_name)
                        .ok_or_else(|| GenoError::SequenceNotFound(sequence_name.clone()))
                })
                .collect::<Result<_>>()?;
            let genome_length = match stores.first() {
                Some(store) => store.genome_length(),
                None => continue,
            };
            let total_filtered: u64 = bitmap_filters.iter().map(|filter| filter.len()).sum();
            if total_filtered == 0 {
                continue;
            }
            let show_sequence_prefix =
                sequence_name != S::default_sequence_name(&database.schema);

            let sequence_entries: Vec<QueryResultEntry> = (0..genome_length as u32)
                .into_par_iter()
                .flat_map_iter(|position_idx| {
                    self.position_entries(
                        position_idx,
                        &stores,
                        &bitmap_filters,
                        total_filtered,
                        &sequence_name,
                        show_sequence_prefix,
                    )
                })
                .collect();
            entries.extend(sequence_entries);
        }
        sort_entries(&mut entries, &self.options);
        Ok(QueryResult::materialized(apply_offset_and_limit(
            entries,
            &self.options,
        )))
    }

    fn position_entries(
        &self,
        position_idx: u32,
        stores: &[&SequenceStorePartition<S>],
        bitmap_filters: &[OperatorResult<'_>],
        total_filtered: u64,
        sequence_name: &str,
        show_sequence_prefix: bool,
    ) -> Vec<QueryResultEntry> {
        let mut counts = vec![0u64; S::COUNT];
        for (store, filter) in stores.iter().zip(bitmap_filters.iter()) {
            let position = store.position(position_idx);
            let mut accounted = 0;
            for &symbol in S::SYMBOLS {
                if symbol == S::MISSING && !position.missing_indexed() {
                    continue;
                }
                let count = position.count_in(symbol, filter);
                counts[symbol.index()] += count;
                if symbol != S::MISSING {
                    accounted += count;
                }
            }
            if !position.missing_indexed() {
                counts[S::MISSING.index()] += filter.len() - accounted;
            }
        }
        let coverage = total_filtered - counts[S::MISSING.index()];
        if coverage == 0 {
            return Vec::new();
        }
        let reference_symbol = stores[0].reference()[position_idx as usize];
        let prefix = if show_sequence_prefix {
            format!("{sequence_name}:")
        } else {
            String::new()
        };

        let mut entries = Vec::new();
        for &symbol in S::MUTATION_SYMBOLS {
            if symbol == reference_symbol {
                continue;
            }
            let count = counts[symbol.index()];
            if count == 0 {
                continue;
            }
            let proportion = count as f64 / coverage as f64;
            if proportion < self.min_proportion {
                continue;
            }
            let mut fields: BTreeMap<String, Option<QueryValue>> = BTreeMap::new();
            fields.insert(
                "position".to_string(),
                Some(QueryValue::Int(position_idx as i32 + 1)),
            );
            fields.insert(
                "mutation".to_string(),
                Some(QueryValue::String(format!(
                    "{prefix}{}{}{}",
                    reference_symbol.as_char(),
                    position_idx + 1,
                    symbol.as_char()
                ))),
            );
            fields.insert(
                "sequenceName".to_string(),
                Some(QueryValue::String(sequence_name.to_string())),
            );
            fields.insert("count".to_string(), Some(QueryValue::Int(count as i32)));
            fields.insert(
                "proportion".to_string(),
                Some(QueryValue::Double(proportion)),
            );
            fields.insert(
                "coverage".to_string(),
                Some(QueryValue::Int(coverage as i32)),
            );
            entries.push(QueryResultEntry::new(fields));
        }
        entries
    }
}
