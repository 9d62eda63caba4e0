//! Filter expressions
//!
//! The logical query language: a recursive tree decoded from a JSON document
//! whose nodes carry a `type` discriminator. User-facing sequence positions
//! are 1-based and converted to 0-based here; symbols are validated against
//! the alphabet at parse time. Every malformed input maps to a query parse
//! error carrying the triggering message.

use std::fmt;

use serde_json::{Map, Value as Json};

use crate::common::{AminoAcid, Date, Nucleotide, Symbol};
use crate::{GenoError, Result};

/// How sequence predicates treat IUPAC ambiguity during compilation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AmbiguityMode {
    None,
    UpperBound,
    LowerBound,
}

impl AmbiguityMode {
    /// Negation swaps the approximation direction
    pub fn invert(self) -> AmbiguityMode {
        match self {
            AmbiguityMode::None => AmbiguityMode::None,
            AmbiguityMode::UpperBound => AmbiguityMode::LowerBound,
            AmbiguityMode::LowerBound => AmbiguityMode::UpperBound,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum FilterExpression {
    True,
    And {
        children: Vec<FilterExpression>,
    },
    Or {
        children: Vec<FilterExpression>,
    },
    Not {
        child: Box<FilterExpression>,
    },
    NOf {
        children: Vec<FilterExpression>,
        number_of_matchers: usize,
        match_exactly: bool,
    },
    Maybe {
        child: Box<FilterExpression>,
    },
    Exact {
        child: Box<FilterExpression>,
    },
    StringEquals {
        column: String,
        value: String,
    },
    IntEquals {
        column: String,
        value: i32,
    },
    IntBetween {
        column: String,
        from: Option<i32>,
        to: Option<i32>,
    },
    FloatEquals {
        column: String,
        value: f64,
    },
    FloatBetween {
        column: String,
        from: Option<f64>,
        to: Option<f64>,
    },
    DateBetween {
        column: String,
        from: Option<Date>,
        to: Option<Date>,
    },
    PangoLineage {
        column: Option<String>,
        value: String,
        include_sublineages: bool,
    },
    /// 0-based position; `.` denotes the reference symbol at the position
    NucleotideEquals {
        sequence_name: Option<String>,
        position: u32,
        symbol: char,
    },
    AminoAcidEquals {
        sequence_name: String,
        position: u32,
        symbol: char,
    },
    HasNucleotideMutation {
        sequence_name: Option<String>,
        position: u32,
    },
    HasAminoAcidMutation {
        sequence_name: String,
        position: u32,
    },
    InsertionContains {
        sequence_name: Option<String>,
        column: Option<String>,
        position: Option<u32>,
        value: String,
    },
}

fn parse_error(message: impl Into<String>) -> GenoError {
    GenoError::QueryParse(message.into())
}

fn expect_object<'a>(json: &'a Json, context: &str) -> Result<&'a Map<String, Json>> {
    json.as_object()
        .ok_or_else(|| parse_error(format!("A {context} expression needs to be an object")))
}

fn required_field<'a>(
    object: &'a Map<String, Json>,
    field: &str,
    context: &str,
) -> Result<&'a Json> {
    object
        .get(field)
        .ok_or_else(|| parse_error(format!("The field '{field}' is required in a {context} expression")))
}

fn required_string(object: &Map<String, Json>, field: &str, context: &str) -> Result<String> {
    required_field(object, field, context)?
        .as_str()
        .map(str::to_string)
        .ok_or_else(|| {
            parse_error(format!(
                "The field '{field}' in a {context} expression needs to be a string"
            ))
        })
}

fn optional_string(object: &Map<String, Json>, field: &str, context: &str) -> Result<Option<String>> {
    match object.get(field) {
        None | Some(Json::Null) => Ok(None),
        Some(Json::String(value)) => Ok(Some(value.clone())),
        Some(_) => Err(parse_error(format!(
            "The field '{field}' in a {context} expression needs to be a string"
        ))),
    }
}

/// A 1-based position field, converted to 0-based
fn required_position(object: &Map<String, Json>, context: &str) -> Result<u32> {
    let value = required_field(object, "position", context)?
        .as_u64()
        .filter(|&position| position > 0 && position <= u64::from(u32::MAX))
        .ok_or_else(|| {
            parse_error(format!(
                "The field 'position' in a {context} expression needs to be an unsigned integer greater than 0"
            ))
        })?;
    Ok((value - 1) as u32)
}

fn required_symbol<S: Symbol>(object: &Map<String, Json>, context: &str) -> Result<char> {
    let symbol = required_string(object, "symbol", context)?;
    let mut characters = symbol.chars();
    let character = match (characters.next(), characters.next()) {
        (Some(character), None) => character,
        _ => {
            return Err(parse_error(format!(
                "The field 'symbol' in a {context} expression must be exactly one character long"
            )))
        }
    };
    if character != '.' && S::from_char(character).is_none() {
        return Err(parse_error(format!(
            "The symbol '{character}' in a {context} expression is not a valid {} symbol",
            S::NAME
        )));
    }
    Ok(character)
}

fn children(object: &Map<String, Json>, context: &str) -> Result<Vec<FilterExpression>> {
    let array = required_field(object, "children", context)?
        .as_array()
        .ok_or_else(|| {
            parse_error(format!(
                "The field 'children' in a {context} expression needs to be an array"
            ))
        })?;
    array.iter().map(FilterExpression::from_json).collect()
}

fn child(object: &Map<String, Json>, context: &str) -> Result<Box<FilterExpression>> {
    let child = required_field(object, "child", context)?;
    Ok(Box::new(FilterExpression::from_json(child)?))
}

fn optional_int(object: &Map<String, Json>, field: &str, context: &str) -> Result<Option<i32>> {
    match object.get(field) {
        None | Some(Json::Null) => Ok(None),
        Some(value) => value
            .as_i64()
            .filter(|&value| i32::try_from(value).is_ok())
            .map(|value| Some(value as i32))
            .ok_or_else(|| {
                parse_error(format!(
                    "The field '{field}' in a {context} expression needs to be a 32-bit integer"
                ))
            }),
    }
}

fn optional_float(object: &Map<String, Json>, field: &str, context: &str) -> Result<Option<f64>> {
    match object.get(field) {
        None | Some(Json::Null) => Ok(None),
        Some(value) => value.as_f64().map(Some).ok_or_else(|| {
            parse_error(format!(
                "The field '{field}' in a {context} expression needs to be a number"
            ))
        }),
    }
}

fn optional_date(object: &Map<String, Json>, field: &str, context: &str) -> Result<Option<Date>> {
    match optional_string(object, field, context)? {
        None => Ok(None),
        Some(text) => Date::parse(&text).map(Some).ok_or_else(|| {
            parse_error(format!(
                "The field '{field}' in a {context} expression needs to be a date in YYYY-MM-DD format"
            ))
        }),
    }
}

impl FilterExpression {
    pub fn from_json(json: &Json) -> Result<FilterExpression> {
        let object = expect_object(json, "filter")?;
        let expression_type = object
            .get("type")
            .and_then(Json::as_str)
            .ok_or_else(|| parse_error("Every filter expression needs a string field 'type'"))?;
        match expression_type {
            "True" => Ok(FilterExpression::True),
            "And" => Ok(FilterExpression::And {
                children: children(object, "And")?,
            }),
            "Or" => Ok(FilterExpression::Or {
                children: children(object, "Or")?,
            }),
            "Not" => Ok(FilterExpression::Not {
                child: child(object, "Not")?,
            }),
            "N-Of" => {
                let number_of_matchers = required_field(object, "numberOfMatchers", "N-Of")?
                    .as_u64()
                    .ok_or_else(|| {
                        parse_error(
                            "The field 'numberOfMatchers' in an N-Of expression needs to be an unsigned integer",
                        )
                    })? as usize;
                let match_exactly = match object.get("matchExactly") {
                    None | Some(Json::Null) => false,
                    Some(Json::Bool(value)) => *value,
                    Some(_) => {
                        return Err(parse_error(
                            "The field 'matchExactly' in an N-Of expression needs to be a boolean",
                        ))
                    }
                };
                Ok(FilterExpression::NOf {
                    children: children(object, "N-Of")?,
                    number_of_matchers,
                    match_exactly,
                })
            }
            "Maybe" => Ok(FilterExpression::Maybe {
                child: child(object, "Maybe")?,
            }),
            "Exact" => Ok(FilterExpression::Exact {
                child: child(object, "Exact")?,
            }),
            "StringEquals" => {
                let column = required_string(object, "column", "StringEquals")?;
                let value = match required_field(object, "value", "StringEquals")? {
                    Json::Null => String::new(),
                    Json::String(value) => value.clone(),
                    _ => {
                        return Err(parse_error(
                            "The field 'value' in a StringEquals expression needs to be a string or null",
                        ))
                    }
                };
                Ok(FilterExpression::StringEquals { column, value })
            }
            "IntEquals" => {
                let column = required_string(object, "column", "IntEquals")?;
                required_field(object, "value", "IntEquals")?;
                let value = optional_int(object, "value", "IntEquals")?
                    .unwrap_or(crate::storage::column::INT_NULL);
                Ok(FilterExpression::IntEquals { column, value })
            }
            "IntBetween" => Ok(FilterExpression::IntBetween {
                column: required_string(object, "column", "IntBetween")?,
                from: optional_int(object, "from", "IntBetween")?,
                to: optional_int(object, "to", "IntBetween")?,
            }),
            "FloatEquals" => {
                let column = required_string(object, "column", "FloatEquals")?;
                required_field(object, "value", "FloatEquals")?;
                let value = optional_float(object, "value", "FloatEquals")?.unwrap_or(f64::NAN);
                Ok(FilterExpression::FloatEquals { column, value })
            }
            "FloatBetween" => Ok(FilterExpression::FloatBetween {
                column: required_string(object, "column", "FloatBetween")?,
                from: optional_float(object, "from", "FloatBetween")?,
                to: optional_float(object, "to", "FloatBetween")?,
            }),
            "DateBetween" => Ok(FilterExpression::DateBetween {
                column: required_string(object, "column", "DateBetween")?,
                from: optional_date(object, "from", "DateBetween")?,
                to: optional_date(object, "to", "DateBetween")?,
            }),
            "PangoLineage" => {
                let include_sublineages = match object.get("includeSublineages") {
                    None | Some(Json::Null) => false,
                    Some(Json::Bool(value)) => *value,
                    Some(_) => {
                        return Err(parse_error(
                            "The field 'includeSublineages' in a PangoLineage expression needs to be a boolean",
                        ))
                    }
                };
                Ok(FilterExpression::PangoLineage {
                    column: optional_string(object, "column", "PangoLineage")?,
                    value: required_string(object, "value", "PangoLineage")?,
                    include_sublineages,
                })
            }
            "NucleotideEquals" => Ok(FilterExpression::NucleotideEquals {
                sequence_name: optional_string(object, "sequenceName", "NucleotideEquals")?,
                position: required_position(object, "NucleotideEquals")?,
                symbol: required_symbol::<Nucleotide>(object, "NucleotideEquals")?,
            }),
            "AminoAcidEquals" => Ok(FilterExpression::AminoAcidEquals {
                sequence_name: required_string(object, "sequenceName", "AminoAcidEquals")?,
                position: required_position(object, "AminoAcidEquals")?,
                symbol: required_symbol::<AminoAcid>(object, "AminoAcidEquals")?,
            }),
            "HasNucleotideMutation" => Ok(FilterExpression::HasNucleotideMutation {
                sequence_name: optional_string(object, "sequenceName", "HasNucleotideMutation")?,
                position: required_position(object, "HasNucleotideMutation")?,
            }),
            "HasAminoAcidMutation" => Ok(FilterExpression::HasAminoAcidMutation {
                sequence_name: required_string(object, "sequenceName", "HasAminoAcidMutation")?,
                position: required_position(object, "HasAminoAcidMutation")?,
            }),
            "InsertionContains" => {
                let position = match object.get("position") {
                    None | Some(Json::Null) => None,
                    Some(_) => Some(required_position(object, "InsertionContains")?),
                };
                Ok(FilterExpression::InsertionContains {
                    sequence_name: optional_string(object, "sequenceName", "InsertionContains")?,
                    column: optional_string(object, "column", "InsertionContains")?,
                    position,
                    value: required_string(object, "value", "InsertionContains")?,
                })
            }
            unknown => Err(parse_error(format!("Unknown expression type '{unknown}'"))),
        }
    }
}

impl fmt::Display for FilterExpression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FilterExpression::True => write!(f, "True"),
            FilterExpression::And { children } => {
                write!(f, "And(")?;
                for (i, c) in children.iter().enumerate() {
                    if i > 0 {
                        write!(f, " & ")?;
                    }
                    write!(f, "{c}")?;
                }
                write!(f, ")")
            }
            FilterExpression::Or { children } => {
                write!(f, "Or(")?;
                for (i, c) in children.iter().enumerate() {
                    if i > 0 {
                        write!(f, " | ")?;
                    }
                    write!(f, "{c}")?;
                }
                write!(f, ")")
            }
            FilterExpression::Not { child } => write!(f, "!({child})"),
            FilterExpression::NOf {
                children,
                number_of_matchers,
                match_exactly,
            } => {
                write!(
                    f,
                    "[{}{} of {} children]",
                    if *match_exactly { "exactly " } else { ">= " },
                    number_of_matchers,
                    children.len()
                )
            }
            FilterExpression::Maybe { child } => write!(f, "Maybe({child})"),
            FilterExpression::Exact { child } => write!(f, "Exact({child})"),
            FilterExpression::StringEquals { column, value } => {
                write!(f, "{column} = '{value}'")
            }
            FilterExpression::IntEquals { column, value } => write!(f, "{column} = {value}"),
            FilterExpression::IntBetween { column, from, to } => {
                write!(f, "{column} in [{from:?}, {to:?}]")
            }
            FilterExpression::FloatEquals { column, value } => write!(f, "{column} = {value}"),
            FilterExpression::FloatBetween { column, from, to } => {
                write!(f, "{column} in [{from:?}, {to:?}]")
            }
            FilterExpression::DateBetween { column, from, to } => {
                write!(
                    f,
                    "{column} in [{}, {}]",
                    from.and_then(Date::format).unwrap_or_default(),
                    to.and_then(Date::format).unwrap_or_default()
                )
            }
            FilterExpression::PangoLineage {
                value,
                include_sublineages,
                ..
            } => write!(f, "lineage = {value}{}", if *include_sublineages { "*" } else { "" }),
            FilterExpression::NucleotideEquals {
                position, symbol, ..
            } => write!(f, "{}{symbol}", position + 1),
            FilterExpression::AminoAcidEquals {
                sequence_name,
                position,
                symbol,
            } => write!(f, "{sequence_name}:{}{symbol}", position + 1),
            FilterExpression::HasNucleotideMutation { position, .. } => {
                write!(f, "mut:{}", position + 1)
            }
            FilterExpression::HasAminoAcidMutation {
                sequence_name,
                position,
            } => write!(f, "mut:{sequence_name}:{}", position + 1),
            FilterExpression::InsertionContains {
                position, value, ..
            } => write!(f, "ins:{position:?}:{value}"),
        }
    }
}
