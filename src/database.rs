//! The loaded database: schema, alias table and partitions
//!
//! Built once by the preprocessing layer; queries compile and evaluate
//! their filter against every partition in parallel and hand the resulting
//! bitmaps to the action.

use rayon::prelude::*;

use crate::config::DatabaseSchema;
use crate::query::operators::OperatorResult;
use crate::query::{AmbiguityMode, FilterExpression, Query, QueryResult};
use crate::storage::column::PangoAliasTable;
use crate::storage::DatabasePartition;
use crate::Result;

#[derive(Debug)]
pub struct Database {
    pub schema: DatabaseSchema,
    pub pango_alias: PangoAliasTable,
    pub partitions: Vec<DatabasePartition>,
}

impl Database {
    pub fn new(schema: DatabaseSchema, pango_alias: PangoAliasTable) -> Self {
        Self {
            schema,
            pango_alias,
            partitions: Vec::new(),
        }
    }

    pub fn add_partition(&mut self, partition: DatabasePartition) {
        self.partitions.push(partition);
    }

    /// Total record count over all partitions
    pub fn sequence_count(&self) -> u64 {
        self.partitions
            .iter()
            .map(|partition| u64::from(partition.sequence_count))
            .sum()
    }

    /// Names of the nucleotide sequences. Every partition indexes the same
    /// sequences, so the first one is authoritative.
    pub fn nuc_sequence_names(&self) -> Vec<String> {
        self.partitions
            .first()
            .map(|partition| partition.nuc_sequences.keys().cloned().collect())
            .unwrap_or_default()
    }

    pub fn aa_sequence_names(&self) -> Vec<String> {
        self.partitions
            .first()
            .map(|partition| partition.aa_sequences.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// Compile and evaluate a filter, yielding one bitmap per partition
    pub fn evaluate_filter(&self, filter: &FilterExpression) -> Result<Vec<OperatorResult<'_>>> {
        self.partitions
            .par_iter()
            .map(|partition| {
                let operator = filter.compile(self, partition, AmbiguityMode::None)?;
                log::trace!("Evaluating partition operator {operator}");
                Ok(operator.evaluate())
            })
            .collect()
    }

    /// Run a parsed query end to end
    pub fn execute(&self, query: &Query) -> Result<QueryResult> {
        query.action.validate(self)?;
        let bitmap_filters = self.evaluate_filter(&query.filter)?;
        query.action.execute(self, bitmap_filters)
    }
}
