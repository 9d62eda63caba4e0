//! Engine state: the active database slot
//!
//! Queries clone the active `Arc` and keep reading their snapshot for their
//! whole duration; a reload swaps the slot atomically, and the previous
//! database is dropped once its last reader finishes.

use std::sync::Arc;

use parking_lot::RwLock;

use crate::database::Database;
use crate::query::{Query, QueryResult};
use crate::{GenoError, Result};

#[derive(Default)]
pub struct QueryEngine {
    active: RwLock<Option<Arc<Database>>>,
}

impl QueryEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Swap in a freshly built database
    pub fn load(&self, database: Database) {
        log::info!(
            "Loading database '{}' with {} partitions and {} records",
            database.schema.instance_name,
            database.partitions.len(),
            database.sequence_count()
        );
        *self.active.write() = Some(Arc::new(database));
    }

    /// The active database, or the not-loaded error for early queries
    pub fn database(&self) -> Result<Arc<Database>> {
        self.active
            .read()
            .clone()
            .ok_or(GenoError::DatabaseNotLoaded)
    }

    pub fn execute(&self, query: &Query) -> Result<QueryResult> {
        self.database()?.execute(query)
    }

    /// Parse and run a query document, rendering the response document
    pub fn execute_json(&self, body: &str) -> Result<serde_json::Value> {
        let database = self.database()?;
        let query = Query::from_json_str(body)?;
        database.execute(&query)?.to_json()
    }
}
