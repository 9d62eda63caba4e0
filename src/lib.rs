//! GenoBase Core Query Engine
//!
//! An in-memory analytics engine for large cohorts of genomic sequences.
//! Every record couples typed metadata columns with aligned nucleotide and
//! amino-acid sequences; queries combine boolean filter expressions over
//! sequence positions and metadata with an aggregating action. Filters are
//! compiled into a tree of bitmap-level physical operators and evaluated in
//! parallel against a horizontally partitioned, column-oriented store backed
//! by compressed bitmap indexes.

pub mod common;
pub mod config;
pub mod database;
pub mod engine;
pub mod query;
pub mod storage;

// Re-export main types
pub use config::{ColumnMetadata, ColumnType, DatabaseSchema, ValueType};
pub use database::Database;
pub use engine::QueryEngine;
pub use query::{Query, QueryResult, QueryResultEntry, QueryValue};
pub use storage::DatabasePartition;

/// Query engine error type
#[derive(Debug, thiserror::Error)]
pub enum GenoError {
    #[error("Query parse error: {0}")]
    QueryParse(String),

    #[error("Column not found: {0}")]
    ColumnNotFound(String),

    #[error("Sequence not found: {0}")]
    SequenceNotFound(String),

    #[error("No database loaded")]
    DatabaseNotLoaded,

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl GenoError {
    /// The caller-visible error kind for the `{error, message}` response shape.
    pub fn kind(&self) -> &'static str {
        match self {
            GenoError::QueryParse(_)
            | GenoError::ColumnNotFound(_)
            | GenoError::SequenceNotFound(_) => "Bad request",
            GenoError::DatabaseNotLoaded => "Service Temporarily Unavailable",
            GenoError::Serialization(_) | GenoError::Internal(_) => "Internal Server Error",
        }
    }
}

pub type Result<T> = std::result::Result<T, GenoError>;
