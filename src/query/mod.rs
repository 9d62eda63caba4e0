//! Query parsing and execution
//!
//! A query document has two required fields: `filterExpression` and
//! `action`. The filter compiles per partition into a physical operator
//! tree; the action turns the evaluated bitmaps into the result.

pub mod actions;
mod compile;
mod filter;
pub mod operators;
mod result;
mod tuple;


pub use actions::Action;
pub use filter::{AmbiguityMode, FilterExpression};
pub use result::{ErrorResponse, QueryResult, QueryResultEntry, QueryValue};
pub use tuple::{Tuple, TupleFactory};

use serde_json::Value as Json;

use crate::{GenoError, Result};

/// A parsed query: filter plus action
#[derive(Debug)]
pub struct Query {
    pub filter: FilterExpression,
    pub action: Action,
}

impl Query {
    pub fn from_json_value(json: &Json) -> Result<Query> {
        let object = json
            .as_object()
            .ok_or_else(|| GenoError::QueryParse("The query needs to be an object".to_string()))?;
        let filter_expression = object.get("filterExpression").ok_or_else(|| {
            GenoError::QueryParse("The query requires a field 'filterExpression'".to_string())
        })?;
        let action = object.get("action").ok_or_else(|| {
            GenoError::QueryParse("The query requires a field 'action'".to_string())
        })?;
        Ok(Query {
            filter: FilterExpression::from_json(filter_expression)?,
            action: Action::from_json(action)?,
        })
    }

    pub fn from_json_str(body: &str) -> Result<Query> {
        let json: Json = serde_json::from_str(body)
            .map_err(|e| GenoError::QueryParse(format!("The query is not valid JSON: {e}")))?;
        Query::from_json_value(&json)
    }
}
