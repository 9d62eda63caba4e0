//! Post-processing actions
//!
//! An action consumes one evaluated bitmap per partition and produces the
//! structured result. All actions share the order-by / limit / offset /
//! randomize-seed modifiers; sorting of materialized entries happens here,
//! Details uses the packed-tuple comparator instead.

mod aggregated;
mod details;
mod insertions;
mod mutations;

use std::cmp::Ordering;
use std::collections::HashMap;

use serde_json::{Map, Value as Json};

use crate::common::{AminoAcid, Nucleotide, Symbol};
use crate::config::DatabaseSchema;
use crate::database::Database;
use crate::storage::column::InsertionColumnPartition;
use crate::storage::{ColumnPartitionGroup, DatabasePartition, SequenceStorePartition};
use crate::{GenoError, Result};

use super::operators::OperatorResult;
use super::result::{QueryResult, QueryResultEntry};

pub use aggregated::Aggregated;
pub use details::Details;
pub use insertions::InsertionAggregation;
pub use mutations::Mutations;

/// Field-level access the generic actions need per alphabet
pub trait ActionSymbol: Symbol {
    fn sequence_stores(
        partition: &DatabasePartition,
    ) -> &HashMap<String, SequenceStorePartition<Self>>;
    fn insertion_columns(
        columns: &ColumnPartitionGroup,
    ) -> &HashMap<String, InsertionColumnPartition<Self>>;
    fn default_sequence_name(schema: &DatabaseSchema) -> &str;
    fn sequence_names(database: &Database) -> Vec<String>;
}

impl ActionSymbol for Nucleotide {
    fn sequence_stores(
        partition: &DatabasePartition,
    ) -> &HashMap<String, SequenceStorePartition<Nucleotide>> {
        &partition.nuc_sequences
    }

    fn insertion_columns(
        columns: &ColumnPartitionGroup,
    ) -> &HashMap<String, InsertionColumnPartition<Nucleotide>> {
        &columns.nuc_insertion_columns
    }

    fn default_sequence_name(schema: &DatabaseSchema) -> &str {
        &schema.default_nucleotide_sequence
    }

    fn sequence_names(database: &Database) -> Vec<String> {
        database.nuc_sequence_names()
    }
}

impl ActionSymbol for AminoAcid {
    fn sequence_stores(
        partition: &DatabasePartition,
    ) -> &HashMap<String, SequenceStorePartition<AminoAcid>> {
        &partition.aa_sequences
    }

    fn insertion_columns(
        columns: &ColumnPartitionGroup,
    ) -> &HashMap<String, InsertionColumnPartition<AminoAcid>> {
        &columns.aa_insertion_columns
    }

    fn default_sequence_name(schema: &DatabaseSchema) -> &str {
        &schema.default_amino_acid_sequence
    }

    fn sequence_names(database: &Database) -> Vec<String> {
        database.aa_sequence_names()
    }
}

/// One order-by field with its sort direction
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderByField {
    pub field: String,
    pub ascending: bool,
}

/// Modifiers shared by every action
#[derive(Debug, Clone, Default)]
pub struct ActionOptions {
    pub order_by_fields: Vec<OrderByField>,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
    pub randomize_seed: Option<u64>,
}

fn parse_error(message: impl Into<String>) -> GenoError {
    GenoError::QueryParse(message.into())
}

fn parse_order_by_fields(object: &Map<String, Json>) -> Result<Vec<OrderByField>> {
    let array = match object.get("orderByFields") {
        None | Some(Json::Null) => return Ok(Vec::new()),
        Some(Json::Array(array)) => array,
        Some(_) => {
            return Err(parse_error(
                "The field 'orderByFields' must be an array of strings or objects",
            ))
        }
    };
    array
        .iter()
        .map(|entry| match entry {
            Json::String(field) => Ok(OrderByField {
                field: field.clone(),
                ascending: true,
            }),
            Json::Object(object) => {
                let field = object
                    .get("field")
                    .and_then(Json::as_str)
                    .ok_or_else(|| {
                        parse_error("An orderByField object requires a string field 'field'")
                    })?
                    .to_string();
                let ascending = match object.get("order").and_then(Json::as_str) {
                    None | Some("asc") => true,
                    Some("desc") => false,
                    Some(other) => {
                        return Err(parse_error(format!(
                            "The orderByField order '{other}' must be 'asc' or 'desc'"
                        )))
                    }
                };
                Ok(OrderByField { field, ascending })
            }
            _ => Err(parse_error(
                "Each orderByField must be a string or an object with 'field' and 'order'",
            )),
        })
        .collect()
}

fn parse_options(object: &Map<String, Json>) -> Result<ActionOptions> {
    let order_by_fields = parse_order_by_fields(object)?;
    let limit = match object.get("limit") {
        None | Some(Json::Null) => None,
        Some(value) => Some(value.as_u64().ok_or_else(|| {
            parse_error("The field 'limit' must be a non-negative integer")
        })? as usize),
    };
    let offset = match object.get("offset") {
        None | Some(Json::Null) => None,
        Some(value) => Some(value.as_u64().ok_or_else(|| {
            parse_error("The field 'offset' must be a non-negative integer")
        })? as usize),
    };
    let randomize_seed = match object.get("randomizeSeed") {
        None | Some(Json::Null) => None,
        Some(value) => Some(value.as_u64().ok_or_else(|| {
            parse_error("The field 'randomizeSeed' must be a non-negative integer")
        })?),
    };
    Ok(ActionOptions {
        order_by_fields,
        limit,
        offset,
        randomize_seed,
    })
}

fn parse_string_array(object: &Map<String, Json>, field: &str) -> Result<Vec<String>> {
    match object.get(field) {
        None | Some(Json::Null) => Ok(Vec::new()),
        Some(Json::String(value)) => Ok(vec![value.clone()]),
        Some(Json::Array(array)) => array
            .iter()
            .map(|entry| {
                entry.as_str().map(str::to_string).ok_or_else(|| {
                    parse_error(format!(
                        "The field '{field}' must be a string or an array of strings"
                    ))
                })
            })
            .collect(),
        Some(_) => Err(parse_error(format!(
            "The field '{field}' must be a string or an array of strings"
        ))),
    }
}

/// Sort materialized entries by the order-by fields; absent values sort
/// first, NaN doubles last. The sort is stable, so equal keys keep their
/// accumulation order.
pub(crate) fn sort_entries(entries: &mut [QueryResultEntry], options: &ActionOptions) {
    if options.order_by_fields.is_empty() {
        return;
    }
    entries.sort_by(|left, right| {
        for order_by in &options.order_by_fields {
            let ordering = match (left.get(&order_by.field), right.get(&order_by.field)) {
                (None, None) => Ordering::Equal,
                (None, Some(_)) => Ordering::Less,
                (Some(_), None) => Ordering::Greater,
                (Some(left), Some(right)) => left.compare(right),
            };
            if ordering != Ordering::Equal {
                return if order_by.ascending {
                    ordering
                } else {
                    ordering.reverse()
                };
            }
        }
        Ordering::Equal
    });
}

/// Apply the offset and limit window
pub(crate) fn apply_offset_and_limit(
    mut entries: Vec<QueryResultEntry>,
    options: &ActionOptions,
) -> Vec<QueryResultEntry> {
    let offset = options.offset.unwrap_or(0);
    if offset > 0 {
        if offset >= entries.len() {
            return Vec::new();
        }
        entries.drain(..offset);
    }
    if let Some(limit) = options.limit {
        entries.truncate(limit);
    }
    entries
}

/// Validate that every order-by field is one of the action's result fields
pub(crate) fn validate_order_by_against(
    options: &ActionOptions,
    allowed: &[&str],
    action_name: &str,
) -> Result<()> {
    for order_by in &options.order_by_fields {
        if !allowed.contains(&order_by.field.as_str()) {
            return Err(parse_error(format!(
                "The orderByField '{}' is not contained in the result of a {action_name} action. \
                 Allowed values are {}.",
                order_by.field,
                allowed.join(", ")
            )));
        }
    }
    Ok(())
}

/// The parsed action of a query
#[derive(Debug)]
pub enum Action {
    Aggregated(Aggregated),
    Details(Details),
    Mutations(Mutations<Nucleotide>),
    AminoAcidMutations(Mutations<AminoAcid>),
    Insertions(InsertionAggregation<Nucleotide>),
    AminoAcidInsertions(InsertionAggregation<AminoAcid>),
}

impl Action {
    pub fn from_json(json: &Json) -> Result<Action> {
        let object = json
            .as_object()
            .ok_or_else(|| parse_error("The action needs to be an object"))?;
        let action_type = object
            .get("type")
            .and_then(Json::as_str)
            .ok_or_else(|| parse_error("The action needs a string field 'type'"))?;
        let options = parse_options(object)?;
        match action_type {
            "Aggregated" => Ok(Action::Aggregated(Aggregated::new(
                parse_string_array(object, "groupByFields")?,
                options,
            ))),
            "Details" => Ok(Action::Details(Details::new(
                parse_string_array(object, "fields")?,
                options,
            ))),
            "Mutations" => Ok(Action::Mutations(Mutations::from_object(object, options)?)),
            "AminoAcidMutations" => Ok(Action::AminoAcidMutations(Mutations::from_object(
                object, options,
            )?)),
            "Insertions" | "InsertionAggregation" => Ok(Action::Insertions(
                InsertionAggregation::from_object(object, options)?,
            )),
            "AminoAcidInsertions" => Ok(Action::AminoAcidInsertions(
                InsertionAggregation::from_object(object, options)?,
            )),
            unknown => Err(parse_error(format!("Unknown action type '{unknown}'"))),
        }
    }

    /// Raise every parse/validation error before any evaluation happens
    pub fn validate(&self, database: &Database) -> Result<()> {
        match self {
            Action::Aggregated(action) => action.validate(database),
            Action::Details(action) => action.validate(database),
            Action::Mutations(action) => action.validate(database),
            Action::AminoAcidMutations(action) => action.validate(database),
            Action::Insertions(action) => action.validate(database),
            Action::AminoAcidInsertions(action) => action.validate(database),
        }
    }

    pub fn execute(
        &self,
        database: &Database,
        bitmap_filters: Vec<OperatorResult<'_>>,
    ) -> Result<QueryResult> {
        match self {
            Action::Aggregated(action) => action.execute(database, bitmap_filters),
            Action::Details(action) => action.execute(database, bitmap_filters),
            Action::Mutations(action) => action.execute(database, bitmap_filters),
            Action::AminoAcidMutations(action) => action.execute(database, bitmap_filters),
            Action::Insertions(action) => action.execute(database, bitmap_filters),
            Action::AminoAcidInsertions(action) => action.execute(database, bitmap_filters),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_aggregated_action() {
        let action = Action::from_json(&json!({
            "type": "Aggregated",
            "groupByFields": ["country"],
            "orderByFields": ["count", {"field": "country", "order": "desc"}],
            "limit": 10,
        }))
        .unwrap();
        match action {
            Action::Aggregated(aggregated) => {
                assert_eq!(aggregated.group_by_fields, vec!["country"]);
                assert_eq!(aggregated.options.limit, Some(10));
                assert_eq!(
                    aggregated.options.order_by_fields,
                    vec![
                        OrderByField {
                            field: "count".to_string(),
                            ascending: true
                        },
                        OrderByField {
                            field: "country".to_string(),
                            ascending: false
                        },
                    ]
                );
            }
            other => panic!("unexpected action {other:?}"),
        }
    }

    #[test]
    fn test_parse_rejects_unknown_action() {
        let result = Action::from_json(&json!({"type": "Explode"}));
        assert!(result.is_err());
    }

    #[test]
    fn test_parse_rejects_bad_order_direction() {
        let result = Action::from_json(&json!({
            "type": "Aggregated",
            "orderByFields": [{"field": "count", "order": "sideways"}],
        }));
        assert!(result.is_err());
    }

    #[test]
    fn test_sequence_name_accepts_string_or_array() {
        let single = Action::from_json(&json!({
            "type": "Mutations",
            "sequenceName": "main",
        }))
        .unwrap();
        match single {
            Action::Mutations(mutations) => {
                assert_eq!(mutations.sequence_names, vec!["main"])
            }
            other => panic!("unexpected action {other:?}"),
        }

        let multiple = Action::from_json(&json!({
            "type": "Insertions",
            "sequenceName": ["main", "other"],
        }))
        .unwrap();
        match multiple {
            Action::Insertions(insertions) => {
                assert_eq!(insertions.sequence_names, vec!["main", "other"])
            }
            other => panic!("unexpected action {other:?}"),
        }
    }

    #[test]
    fn test_offset_and_limit_window() {
        let entries: Vec<QueryResultEntry> = (0..5)
            .map(|i| {
                let mut entry = QueryResultEntry::default();
                entry.fields.insert(
                    "id".to_string(),
                    Some(crate::query::QueryValue::Int(i)),
                );
                entry
            })
            .collect();
        let options = ActionOptions {
            offset: Some(1),
            limit: Some(2),
            ..ActionOptions::default()
        };
        let windowed = apply_offset_and_limit(entries.clone(), &options);
        assert_eq!(windowed.len(), 2);
        assert_eq!(windowed[0].get("id"), Some(&crate::query::QueryValue::Int(1)));

        let beyond = ActionOptions {
            offset: Some(10),
            ..ActionOptions::default()
        };
        assert!(apply_offset_and_limit(entries, &beyond).is_empty());
    }
}
