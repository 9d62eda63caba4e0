//! Details action: sorted retrieval of record field tuples
//!
//! Every set record of every partition is packed into an arena-allocated
//! tuple; the tuples are sorted with the typed comparator (stable, so ties
//! keep insertion order unless a randomize seed breaks them), windowed by
//! offset and limit, and decoded into field maps.

use rayon::prelude::*;

use crate::config::ColumnMetadata;
use crate::database::Database;
use crate::query::operators::OperatorResult;
use crate::query::result::{QueryResult, QueryResultEntry};
use crate::query::tuple::{comparator_fields, tuple_comparator, TupleFactory};
use crate::{GenoError, Result};

use super::ActionOptions;

#[derive(Debug)]
pub struct Details {
    pub fields: Vec<String>,
    pub options: ActionOptions,
}

impl Details {
    pub fn new(fields: Vec<String>, options: ActionOptions) -> Self {
        Self { fields, options }
    }

    /// The projected columns: the requested fields, or every schema column
    fn metadata(&self, database: &Database) -> Result<Vec<ColumnMetadata>> {
        if self.fields.is_empty() {
            return Ok(database.schema.metadata.clone());
        }
        self.fields
            .iter()
            .map(|field| {
                database.schema.metadata(field).cloned().ok_or_else(|| {
                    GenoError::QueryParse(format!("Metadata field '{field}' not found"))
                })
            })
            .collect()
    }

    pub fn validate(&self, database: &Database) -> Result<()> {
        let metadata = self.metadata(database)?;
        for order_by in &self.options.order_by_fields {
            if !metadata.iter().any(|m| m.name == order_by.field) {
                return Err(GenoError::QueryParse(format!(
                    "The orderByField '{}' does not appear in the selected fields",
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
        let metadata = self.metadata(database)?;

        let mut factories: Vec<TupleFactory<'_>> = database
            .partitions
            .iter()
            .map(|partition| TupleFactory::new(&partition.columns, metadata.clone()))
            .collect();
        factories
            .par_iter_mut()
            .zip(bitmap_filters.par_iter())
            .try_for_each(|(factory, filter)| {
                factory.allocate_many(filter.len() as usize, filter.iter())
            })?;

        let mut tuples: Vec<_> = factories.iter().flat_map(TupleFactory::tuples).collect();
        if !self.options.order_by_fields.is_empty() || self.options.randomize_seed.is_some() {
            let fields = comparator_fields(&metadata, &self.options.order_by_fields)?;
            let comparator = tuple_comparator(fields, self.options.randomize_seed);
            tuples.par_sort_by(|left, right| comparator(left, right));
        }

        let offset = self.options.offset.unwrap_or(0).min(tuples.len());
        let end = match self.options.limit {
            Some(limit) => (offset + limit).min(tuples.len()),
            None => tuples.len(),
        };
        let entries: Result<Vec<QueryResultEntry>> = tuples[offset..end]
            .iter()
            .map(|tuple| {
                Ok(QueryResultEntry::new(
                    tuple.fields(&metadata)?.into_iter().collect(),
                ))
            })
            .collect();
        Ok(QueryResult::materialized(entries?))
    }
}
