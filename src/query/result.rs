//! Query results
//!
//! An entry is an ordered map from field name to a typed optional value; a
//! result is either fully materialized or streamed in chunks drawn from a
//! producer. Serialization renders `{"queryResult": [...]}` with nulls for
//! absent values.

use std::collections::BTreeMap;
use std::fmt;

use serde::Serialize;

use crate::{GenoError, Result};

/// A typed result value
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum QueryValue {
    String(String),
    Int(i32),
    Double(f64),
    Bool(bool),
}

impl QueryValue {
    /// Total order used when sorting materialized entries: null-likeness is
    /// handled by the caller, NaN sorts last among doubles.
    pub fn compare(&self, other: &QueryValue) -> std::cmp::Ordering {
        use std::cmp::Ordering;
        match (self, other) {
            (QueryValue::String(a), QueryValue::String(b)) => a.cmp(b),
            (QueryValue::Int(a), QueryValue::Int(b)) => a.cmp(b),
            (QueryValue::Double(a), QueryValue::Double(b)) => match a.partial_cmp(b) {
                Some(ordering) => ordering,
                None if a.is_nan() && b.is_nan() => Ordering::Equal,
                None if a.is_nan() => Ordering::Greater,
                None => Ordering::Less,
            },
            (QueryValue::Bool(a), QueryValue::Bool(b)) => a.cmp(b),
            // Heterogeneous fields cannot be meaningfully ordered
            _ => Ordering::Equal,
        }
    }
}

/// One result row
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct QueryResultEntry {
    pub fields: BTreeMap<String, Option<QueryValue>>,
}

impl QueryResultEntry {
    pub fn new(fields: BTreeMap<String, Option<QueryValue>>) -> Self {
        Self { fields }
    }

    pub fn get(&self, field: &str) -> Option<&QueryValue> {
        self.fields.get(field).and_then(Option::as_ref)
    }
}

type ChunkProducer = Box<dyn FnMut(&mut Vec<QueryResultEntry>) + Send>;

/// Materialized entries, or a producer refilling the current chunk
pub struct QueryResult {
    chunk: Vec<QueryResultEntry>,
    cursor: usize,
    producer: Option<ChunkProducer>,
}

impl QueryResult {
    pub fn materialized(entries: Vec<QueryResultEntry>) -> Self {
        Self {
            chunk: entries,
            cursor: 0,
            producer: None,
        }
    }

    pub fn streamed(producer: ChunkProducer) -> Self {
        Self {
            chunk: Vec::new(),
            cursor: 0,
            producer: Some(producer),
        }
    }

    pub fn is_materialized(&self) -> bool {
        self.producer.is_none()
    }

    /// The materialized entries. Streamed results must be drained via
    /// `next` instead.
    pub fn entries(&self) -> Result<&[QueryResultEntry]> {
        if !self.is_materialized() {
            return Err(GenoError::Internal(
                "cannot access the entries of a streamed query result".to_string(),
            ));
        }
        Ok(&self.chunk)
    }

    /// The next entry, refilling the chunk from the producer when drained
    pub fn next(&mut self) -> Option<&QueryResultEntry> {
        if self.cursor >= self.chunk.len() {
            let producer = self.producer.as_mut()?;
            self.chunk.clear();
            producer(&mut self.chunk);
            self.cursor = 0;
            if self.chunk.is_empty() {
                return None;
            }
        }
        let entry = &self.chunk[self.cursor];
        self.cursor += 1;
        Some(entry)
    }

    /// Render as the `{"queryResult": [...]}` response document
    pub fn to_json(&self) -> Result<serde_json::Value> {
        let entries = self.entries()?;
        serde_json::to_value(ResultDocument {
            query_result: entries,
        })
        .map_err(|e| GenoError::Serialization(e.to_string()))
    }
}

impl fmt::Debug for QueryResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_materialized() {
            write!(f, "QueryResult({} entries)", self.chunk.len())
        } else {
            write!(f, "QueryResult(streamed, {} buffered)", self.chunk.len())
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ResultDocument<'a> {
    query_result: &'a [QueryResultEntry],
}

/// The `{error, message}` document reported to callers
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: &'static str,
    pub message: String,
}

impl From<&GenoError> for ErrorResponse {
    fn from(error: &GenoError) -> Self {
        Self {
            error: error.kind(),
            message: error.to_string(),
        }
    }
}
