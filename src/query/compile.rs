//! Compilation of filter expressions into physical operators
//!
//! A pure mapping from (expression, partition, ambiguity mode) to an
//! operator tree. Peephole rewrites happen here: absorption of same-kind
//! children, short-circuits on empty/full, De Morgan rerouting of negated
//! children and predicate extraction out of selections.

use roaring::RoaringBitmap;

use crate::common::{AminoAcid, Nucleotide, Symbol};
use crate::database::Database;
use crate::storage::column::{DateColumnPartition, InsertionSearch, INT_NULL};
use crate::storage::{Chunk, DatabasePartition, SequenceStorePartition};
use crate::{GenoError, Result};

use super::filter::{AmbiguityMode, FilterExpression};
use super::operators::{BitmapComparator, Comparator, Operator, Predicate};

impl FilterExpression {
    /// Compile this expression for one partition
    pub fn compile<'a>(
        &self,
        database: &'a Database,
        partition: &'a DatabasePartition,
        mode: AmbiguityMode,
    ) -> Result<Operator<'a>> {
        let row_count = partition.sequence_count;
        match self {
            FilterExpression::True => Ok(Operator::Full { row_count }),
            FilterExpression::And { children } => compile_and(children, database, partition, mode),
            FilterExpression::Or { children } => compile_or(children, database, partition, mode),
            FilterExpression::Not { child } => Ok(Operator::negate(child.compile(
                database,
                partition,
                mode.invert(),
            )?)),
            FilterExpression::Maybe { child } => {
                child.compile(database, partition, AmbiguityMode::UpperBound)
            }
            FilterExpression::Exact { child } => {
                child.compile(database, partition, AmbiguityMode::LowerBound)
            }
            FilterExpression::NOf {
                children,
                number_of_matchers,
                match_exactly,
            } => compile_n_of(
                children,
                *number_of_matchers,
                *match_exactly,
                database,
                partition,
                mode,
            ),
            FilterExpression::StringEquals { column, value } => {
                compile_string_equals(column, value, partition)
            }
            FilterExpression::IntEquals { column, value } => {
                let values = partition
                    .columns
                    .int_columns
                    .get(column)
                    .ok_or_else(|| GenoError::ColumnNotFound(column.clone()))?
                    .values();
                Ok(Operator::Selection {
                    child: None,
                    predicates: vec![Predicate::IntCompare {
                        values,
                        comparator: Comparator::Equals,
                        value: *value,
                    }],
                    row_count,
                })
            }
            FilterExpression::IntBetween { column, from, to } => {
                let values = partition
                    .columns
                    .int_columns
                    .get(column)
                    .ok_or_else(|| GenoError::ColumnNotFound(column.clone()))?
                    .values();
                Ok(Operator::Selection {
                    child: None,
                    predicates: vec![
                        Predicate::IntCompare {
                            values,
                            comparator: Comparator::HigherOrEquals,
                            // the null sentinel stays excluded even without a lower bound
                            value: from.unwrap_or(INT_NULL + 1),
                        },
                        Predicate::IntCompare {
                            values,
                            comparator: Comparator::LessOrEquals,
                            value: to.unwrap_or(i32::MAX),
                        },
                    ],
                    row_count,
                })
            }
            FilterExpression::FloatEquals { column, value } => {
                let values = partition
                    .columns
                    .float_columns
                    .get(column)
                    .ok_or_else(|| GenoError::ColumnNotFound(column.clone()))?
                    .values();
                Ok(Operator::Selection {
                    child: None,
                    predicates: vec![Predicate::FloatCompare {
                        values,
                        comparator: Comparator::Equals,
                        value: *value,
                    }],
                    row_count,
                })
            }
            FilterExpression::FloatBetween { column, from, to } => {
                let values = partition
                    .columns
                    .float_columns
                    .get(column)
                    .ok_or_else(|| GenoError::ColumnNotFound(column.clone()))?
                    .values();
                let mut predicates = Vec::new();
                if let Some(from) = from {
                    predicates.push(Predicate::FloatCompare {
                        values,
                        comparator: Comparator::HigherOrEquals,
                        value: *from,
                    });
                }
                predicates.push(Predicate::FloatCompare {
                    values,
                    comparator: Comparator::LessOrEquals,
                    value: to.unwrap_or(f64::INFINITY),
                });
                Ok(Operator::Selection {
                    child: None,
                    predicates,
                    row_count,
                })
            }
            FilterExpression::DateBetween { column, from, to } => {
                compile_date_between(column, *from, *to, partition)
            }
            FilterExpression::PangoLineage {
                column,
                value,
                include_sublineages,
            } => compile_pango_lineage(column.as_deref(), value, *include_sublineages, database, partition),
            FilterExpression::NucleotideEquals {
                sequence_name,
                position,
                symbol,
            } => compile_nucleotide_equals(
                sequence_name.as_deref(),
                *position,
                *symbol,
                database,
                partition,
                mode,
            ),
            FilterExpression::AminoAcidEquals {
                sequence_name,
                position,
                symbol,
            } => compile_amino_acid_equals(sequence_name, *position, *symbol, partition),
            FilterExpression::HasNucleotideMutation {
                sequence_name,
                position,
            } => {
                let sequence = resolve_nuc_sequence(sequence_name.as_deref(), database);
                let store = nuc_store(&sequence, partition)?;
                check_position::<Nucleotide>("HasNucleotideMutation", *position, store)?;
                let reference_symbol = store.reference()[*position as usize];
                // Inverting the child makes the default reading "definitely
                // mutated" (missing records excluded) and the Maybe reading
                // "possibly mutated" (missing records included).
                let child_mode = match mode {
                    AmbiguityMode::UpperBound => AmbiguityMode::LowerBound,
                    _ => AmbiguityMode::UpperBound,
                };
                let child = FilterExpression::NucleotideEquals {
                    sequence_name: Some(sequence),
                    position: *position,
                    symbol: reference_symbol.as_char(),
                };
                Ok(Operator::negate(child.compile(database, partition, child_mode)?))
            }
            FilterExpression::HasAminoAcidMutation {
                sequence_name,
                position,
            } => {
                let store = aa_store(sequence_name, partition)?;
                check_position::<AminoAcid>("HasAminoAcidMutation", *position, store)?;
                let reference_symbol = store.reference()[*position as usize];
                if mode == AmbiguityMode::UpperBound {
                    let child = FilterExpression::AminoAcidEquals {
                        sequence_name: sequence_name.clone(),
                        position: *position,
                        symbol: reference_symbol.as_char(),
                    };
                    return Ok(Operator::negate(child.compile(database, partition, AmbiguityMode::None)?));
                }
                let children: Vec<FilterExpression> = AminoAcid::MUTATION_SYMBOLS
                    .iter()
                    .filter(|&&symbol| symbol != reference_symbol)
                    .map(|&symbol| FilterExpression::AminoAcidEquals {
                        sequence_name: sequence_name.clone(),
                        position: *position,
                        symbol: symbol.as_char(),
                    })
                    .collect();
                compile_or(&children, database, partition, AmbiguityMode::None)
            }
            FilterExpression::InsertionContains {
                sequence_name,
                column,
                position,
                value,
            } => compile_insertion_contains(
                sequence_name.as_deref(),
                column.as_deref(),
                *position,
                value,
                database,
                partition,
            ),
        }
    }
}

fn resolve_nuc_sequence(sequence_name: Option<&str>, database: &Database) -> String {
    sequence_name
        .map(str::to_string)
        .unwrap_or_else(|| database.schema.default_nucleotide_sequence.clone())
}

fn nuc_store<'a>(
    sequence: &str,
    partition: &'a DatabasePartition,
) -> Result<&'a SequenceStorePartition<Nucleotide>> {
    partition
        .nuc_sequences
        .get(sequence)
        .ok_or_else(|| GenoError::SequenceNotFound(sequence.to_string()))
}

fn aa_store<'a>(
    sequence: &str,
    partition: &'a DatabasePartition,
) -> Result<&'a SequenceStorePartition<AminoAcid>> {
    partition
        .aa_sequences
        .get(sequence)
        .ok_or_else(|| GenoError::SequenceNotFound(sequence.to_string()))
}

fn check_position<S: Symbol>(
    context: &str,
    position: u32,
    store: &SequenceStorePartition<S>,
) -> Result<()> {
    if position as usize >= store.genome_length() {
        return Err(GenoError::QueryParse(format!(
            "{context} position is out of bounds '{}' > '{}'",
            position + 1,
            store.genome_length()
        )));
    }
    Ok(())
}

/// The literal operator of one symbol at one position
fn compile_symbol_equals<'a, S: Symbol>(
    store: &'a SequenceStorePartition<S>,
    position: u32,
    symbol: S,
    row_count: u32,
) -> Operator<'a> {
    if symbol == S::MISSING {
        return Operator::BitmapSelection {
            bitmaps: store.missing_symbol_bitmaps(),
            comparator: BitmapComparator::Contains,
            value: position,
        };
    }
    let position_store = store.position(position);
    if position_store.is_deleted(symbol) {
        // A deleted symbol's set is whatever no other symbol claims
        let negated_children = S::SYMBOLS
            .iter()
            .filter(|&&other| other != symbol)
            .map(|&other| compile_symbol_equals(store, position, other, row_count))
            .collect();
        return Operator::Intersection {
            children: Vec::new(),
            negated_children,
            row_count,
        };
    }
    if position_store.is_flipped(symbol) {
        return Operator::Complement {
            child: Box::new(Operator::IndexScan {
                bitmap: position_store.bitmap(symbol),
                row_count,
            }),
            row_count,
        };
    }
    Operator::IndexScan {
        bitmap: position_store.bitmap(symbol),
        row_count,
    }
}

fn compile_nucleotide_equals<'a>(
    sequence_name: Option<&str>,
    position: u32,
    symbol_character: char,
    database: &'a Database,
    partition: &'a DatabasePartition,
    mode: AmbiguityMode,
) -> Result<Operator<'a>> {
    let sequence = resolve_nuc_sequence(sequence_name, database);
    let store = nuc_store(&sequence, partition)?;
    check_position::<Nucleotide>("NucleotideEquals", position, store)?;
    let symbol = if symbol_character == '.' {
        store.reference()[position as usize]
    } else {
        Nucleotide::from_char(symbol_character).ok_or_else(|| {
            GenoError::QueryParse(format!(
                "The symbol '{symbol_character}' is not a valid nucleotide symbol"
            ))
        })?
    };
    let row_count = partition.sequence_count;
    match mode {
        AmbiguityMode::UpperBound => {
            let children: Vec<FilterExpression> = symbol
                .ambiguity_symbols()
                .iter()
                .map(|&ambiguous| FilterExpression::NucleotideEquals {
                    sequence_name: Some(sequence.clone()),
                    position,
                    symbol: ambiguous.as_char(),
                })
                .collect();
            compile_or(&children, database, partition, AmbiguityMode::None)
        }
        AmbiguityMode::LowerBound if symbol != Nucleotide::MISSING => {
            let literal = compile_symbol_equals(store, position, symbol, row_count);
            Ok(Operator::Intersection {
                children: vec![literal],
                negated_children: vec![Operator::BitmapSelection {
                    bitmaps: store.missing_symbol_bitmaps(),
                    comparator: BitmapComparator::Contains,
                    value: position,
                }],
                row_count,
            })
        }
        _ => Ok(compile_symbol_equals(store, position, symbol, row_count)),
    }
}

fn compile_amino_acid_equals<'a>(
    sequence_name: &str,
    position: u32,
    symbol_character: char,
    partition: &'a DatabasePartition,
) -> Result<Operator<'a>> {
    let store = aa_store(sequence_name, partition)?;
    check_position::<AminoAcid>("AminoAcidEquals", position, store)?;
    let symbol = if symbol_character == '.' {
        store.reference()[position as usize]
    } else {
        AminoAcid::from_char(symbol_character).ok_or_else(|| {
            GenoError::QueryParse(format!(
                "The symbol '{symbol_character}' is not a valid amino acid symbol"
            ))
        })?
    };
    Ok(compile_symbol_equals(
        store,
        position,
        symbol,
        partition.sequence_count,
    ))
}

fn compile_string_equals<'a>(
    column: &str,
    value: &str,
    partition: &'a DatabasePartition,
) -> Result<Operator<'a>> {
    let row_count = partition.sequence_count;
    if let Some(string_column) = partition.columns.indexed_string_columns.get(column) {
        return Ok(match string_column.filter(value) {
            Some(bitmap) if !bitmap.is_empty() => Operator::IndexScan { bitmap, row_count },
            _ => Operator::Empty { row_count },
        });
    }
    if let Some(string_column) = partition.columns.string_columns.get(column) {
        return Ok(match string_column.embed(value) {
            Some(embedded) => Operator::Selection {
                child: None,
                predicates: vec![Predicate::StringCompare {
                    values: string_column.values(),
                    comparator: Comparator::Equals,
                    value: embedded,
                }],
                row_count,
            },
            // A long string absent from the dictionary equals no stored value
            None => Operator::Empty { row_count },
        });
    }
    Err(GenoError::ColumnNotFound(column.to_string()))
}

fn compile_date_between<'a>(
    column: &str,
    from: Option<crate::common::Date>,
    to: Option<crate::common::Date>,
    partition: &'a DatabasePartition,
) -> Result<Operator<'a>> {
    let row_count = partition.sequence_count;
    let date_column = partition
        .columns
        .date_columns
        .get(column)
        .ok_or_else(|| GenoError::ColumnNotFound(column.to_string()))?;
    if date_column.is_sorted() && !partition.chunks.is_empty() {
        return Ok(Operator::RangeSelection {
            ranges: ranges_of_sorted_column(date_column, &partition.chunks, from, to),
            row_count,
        });
    }
    let mut predicates = Vec::new();
    if let Some(from) = from {
        predicates.push(Predicate::DateCompare {
            values: date_column.values(),
            comparator: Comparator::HigherOrEquals,
            value: from,
        });
    }
    if let Some(to) = to {
        predicates.push(Predicate::DateCompare {
            values: date_column.values(),
            comparator: Comparator::LessOrEquals,
            value: to,
        });
    }
    if predicates.is_empty() {
        return Ok(Operator::Full { row_count });
    }
    Ok(Operator::Selection {
        child: None,
        predicates,
        row_count,
    })
}

/// Binary-search every chunk of a sorted date column for the id ranges whose
/// dates fall into the query interval.
fn ranges_of_sorted_column(
    date_column: &DateColumnPartition,
    chunks: &[Chunk],
    from: Option<crate::common::Date>,
    to: Option<crate::common::Date>,
) -> Vec<std::ops::Range<u32>> {
    let values = date_column.values();
    chunks
        .iter()
        .filter_map(|chunk| {
            let slice = &values[chunk.offset as usize..chunk.end() as usize];
            let lower = match from {
                Some(from) => slice.partition_point(|&date| date < from),
                None => 0,
            };
            let upper = match to {
                Some(to) => slice.partition_point(|&date| date <= to),
                None => slice.len(),
            };
            (lower < upper)
                .then(|| chunk.offset + lower as u32..chunk.offset + upper as u32)
        })
        .collect()
}

fn compile_pango_lineage<'a>(
    column: Option<&str>,
    value: &str,
    include_sublineages: bool,
    database: &'a Database,
    partition: &'a DatabasePartition,
) -> Result<Operator<'a>> {
    let row_count = partition.sequence_count;
    let column_name = match column {
        Some(column) => column.to_string(),
        None => database
            .schema
            .pango_lineage_column()
            .map(|metadata| metadata.name.clone())
            .ok_or_else(|| {
                GenoError::QueryParse(
                    "The database schema does not declare a pango lineage column".to_string(),
                )
            })?,
    };
    let lineage_column = partition
        .columns
        .pango_lineage_columns
        .get(&column_name)
        .ok_or_else(|| GenoError::ColumnNotFound(column_name.clone()))?;
    let canonical = database.pango_alias.resolve(value);
    let bitmap = lineage_column
        .dictionary()
        .lookup_id(&canonical)
        .and_then(|id| {
            if include_sublineages {
                lineage_column.filter_sublineages(id)
            } else {
                lineage_column.filter(id)
            }
        });
    Ok(match bitmap {
        Some(bitmap) if !bitmap.is_empty() => Operator::IndexScan { bitmap, row_count },
        _ => Operator::Empty { row_count },
    })
}

fn compile_insertion_contains<'a>(
    sequence_name: Option<&str>,
    column: Option<&str>,
    position: Option<u32>,
    value: &str,
    database: &'a Database,
    partition: &'a DatabasePartition,
) -> Result<Operator<'a>> {
    let row_count = partition.sequence_count;
    let search = InsertionSearch::<Nucleotide>::compile(value)?;
    let sequence = resolve_nuc_sequence(sequence_name, database);
    let columns: Vec<_> = match column {
        Some(column) => vec![partition
            .columns
            .nuc_insertion_columns
            .get(column)
            .ok_or_else(|| GenoError::ColumnNotFound(column.to_string()))?],
        None => partition.columns.nuc_insertion_columns.values().collect(),
    };
    if columns.is_empty() {
        return Err(GenoError::QueryParse(
            "The database does not contain an insertion column".to_string(),
        ));
    }
    Ok(Operator::BitmapProducer {
        producer: Box::new(move || {
            let mut result = RoaringBitmap::new();
            for insertion_column in &columns {
                result |= insertion_column.search(&sequence, position, &search);
            }
            result
        }),
        row_count,
    })
}

/// Three-bucket compilation of a conjunction: non-negated operators, negated
/// operators (complements are unwrapped) and predicates pulled out of
/// selections. Empty children short-circuit the whole conjunction; full
/// children are dropped.
fn compile_and<'a>(
    children: &[FilterExpression],
    database: &'a Database,
    partition: &'a DatabasePartition,
    mode: AmbiguityMode,
) -> Result<Operator<'a>> {
    let row_count = partition.sequence_count;
    let mut worklist: Vec<Operator<'a>> = Vec::with_capacity(children.len());
    for child in children {
        worklist.push(child.compile(database, partition, mode)?);
    }

    let mut non_negated: Vec<Operator<'a>> = Vec::new();
    let mut negated: Vec<Operator<'a>> = Vec::new();
    let mut predicates: Vec<Predicate<'a>> = Vec::new();
    while let Some(operator) = worklist.pop() {
        match operator {
            Operator::Full { .. } => continue,
            Operator::Empty { .. } => return Ok(Operator::Empty { row_count }),
            Operator::Intersection {
                children,
                negated_children,
                ..
            } => {
                non_negated.extend(children);
                negated.extend(negated_children);
            }
            Operator::Complement { child, .. } => negated.push(*child),
            Operator::Selection {
                child,
                predicates: child_predicates,
                ..
            } => {
                predicates.extend(child_predicates);
                if let Some(child) = child {
                    worklist.push(*child);
                }
            }
            other => non_negated.push(other),
        }
    }

    if non_negated.is_empty() && negated.is_empty() {
        if predicates.is_empty() {
            log::trace!("Compiled And to Full: no predicates and no child operators");
            return Ok(Operator::Full { row_count });
        }
        return Ok(Operator::Selection {
            child: None,
            predicates,
            row_count,
        });
    }

    let index_operator = if non_negated.len() == 1 && negated.is_empty() {
        non_negated.pop().unwrap()
    } else if non_negated.is_empty() && negated.len() == 1 {
        Operator::Complement {
            child: Box::new(negated.pop().unwrap()),
            row_count,
        }
    } else if non_negated.is_empty() {
        Operator::Complement {
            child: Box::new(Operator::Union {
                children: negated,
                row_count,
            }),
            row_count,
        }
    } else {
        Operator::Intersection {
            children: non_negated,
            negated_children: negated,
            row_count,
        }
    };
    if predicates.is_empty() {
        log::trace!("Compiled And to {index_operator}");
        return Ok(index_operator);
    }
    let result = Operator::Selection {
        child: Some(Box::new(index_operator)),
        predicates,
        row_count,
    };
    log::trace!("Compiled And to {result}");
    Ok(result)
}

/// Disjunction compilation: drop empty children, short-circuit on full,
/// flatten nested unions and reroute negated children through De Morgan.
fn compile_or<'a>(
    children: &[FilterExpression],
    database: &'a Database,
    partition: &'a DatabasePartition,
    mode: AmbiguityMode,
) -> Result<Operator<'a>> {
    let row_count = partition.sequence_count;
    let mut flattened: Vec<Operator<'a>> = Vec::new();
    for child in children {
        match child.compile(database, partition, mode)? {
            Operator::Full { .. } => return Ok(Operator::Full { row_count }),
            Operator::Empty { .. } => continue,
            Operator::Union { children, .. } => flattened.extend(children),
            other => flattened.push(other),
        }
    }
    if flattened.is_empty() {
        return Ok(Operator::Empty { row_count });
    }
    if flattened.len() == 1 {
        return Ok(flattened.pop().unwrap());
    }
    if flattened
        .iter()
        .any(|operator| matches!(operator, Operator::Complement { .. }))
    {
        // p | !u | !v  ==  !(u & v & !p)
        let mut unwrapped = Vec::new();
        let mut positive = Vec::new();
        for operator in flattened {
            match operator {
                Operator::Complement { child, .. } => unwrapped.push(*child),
                other => positive.push(other),
            }
        }
        return Ok(Operator::Complement {
            child: Box::new(Operator::Intersection {
                children: unwrapped,
                negated_children: positive,
                row_count,
            }),
            row_count,
        });
    }
    Ok(Operator::Union {
        children: flattened,
        row_count,
    })
}

/// N-of-M compilation. The trivial thresholds collapse into boolean
/// combinators; the general case counts per-record occurrences across the
/// children's bitmaps behind a lazy producer.
fn compile_n_of<'a>(
    children: &[FilterExpression],
    number_of_matchers: usize,
    match_exactly: bool,
    database: &'a Database,
    partition: &'a DatabasePartition,
    mode: AmbiguityMode,
) -> Result<Operator<'a>> {
    let row_count = partition.sequence_count;
    if number_of_matchers > children.len() {
        return Ok(Operator::Empty { row_count });
    }
    if number_of_matchers == 0 {
        if !match_exactly {
            return Ok(Operator::Full { row_count });
        }
        // Exactly zero children match: the complement of their union. Each
        // child sits under an implicit negation, so the mode inverts.
        let union = compile_or(children, database, partition, mode.invert())?;
        return Ok(Operator::negate(union));
    }
    if !match_exactly {
        if number_of_matchers == 1 {
            return compile_or(children, database, partition, mode);
        }
        if number_of_matchers == children.len() {
            return compile_and(children, database, partition, mode);
        }
    }

    let mut operators: Vec<Operator<'a>> = Vec::with_capacity(children.len());
    for child in children {
        operators.push(child.compile(database, partition, mode)?);
    }
    let threshold = number_of_matchers;
    let layers = if match_exactly { threshold + 1 } else { threshold };
    Ok(Operator::BitmapProducer {
        producer: Box::new(move || {
            // counts[i] holds the records matching at least i + 1 children
            let mut counts: Vec<RoaringBitmap> = vec![RoaringBitmap::new(); layers];
            for operator in &operators {
                let result = operator.evaluate();
                for i in (1..layers).rev() {
                    let carried = &counts[i - 1] & &*result;
                    counts[i] |= carried;
                }
                counts[0] |= &*result;
            }
            if match_exactly {
                &counts[threshold - 1] - &counts[threshold]
            } else {
                counts[threshold - 1].clone()
            }
        }),
        row_count,
    })
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use crate::common::{Dictionary, EmbeddedString};
    use crate::config::{ColumnMetadata, DatabaseSchema, ValueType};
    use crate::storage::column::{
        DateColumnPartition, IndexedStringColumnPartition, IntColumnPartition,
        PangoAliasTable, StringColumnPartition,
    };
    use crate::storage::{Chunk, DatabasePartition, SequenceStorePartition};

    use super::*;

    fn schema() -> DatabaseSchema {
        DatabaseSchema {
            instance_name: "test".to_string(),
            metadata: vec![
                ColumnMetadata::new("country", ValueType::String).indexed(true),
                ColumnMetadata::new("division", ValueType::String),
                ColumnMetadata::new("age", ValueType::Int),
                ColumnMetadata::new("date", ValueType::Date),
                ColumnMetadata::new("pango_lineage", ValueType::PangoLineage),
            ],
            primary_key: "key".to_string(),
            date_to_sort_by: Some("date".to_string()),
            partition_by: None,
            default_nucleotide_sequence: "main".to_string(),
            default_amino_acid_sequence: "S".to_string(),
        }
    }

    /// Five records over the reference ACGT:
    ///   0: ACGT  1: ACGT  2: TCGT  3: ANGT  4: RCGT
    fn database() -> Database {
        let reference =
            SequenceStorePartition::<Nucleotide>::parse_reference("ACGT").unwrap();
        let mut store = SequenceStorePartition::new(Arc::new(reference));
        for sequence in ["ACGT", "ACGT", "TCGT", "ANGT", "RCGT"] {
            store.append_sequence(sequence).unwrap();
        }
        store.index_missing_symbol();
        store.finalize();

        let mut partition = DatabasePartition::new(5);
        partition.insert_nuc_sequence("main", store);

        let mut country_dict = Dictionary::new();
        let ch = country_dict.get_or_insert("CH");
        let de = country_dict.get_or_insert("DE");
        partition.columns.insert_indexed_string_column(
            "country",
            IndexedStringColumnPartition::new(vec![ch, de, ch, ch, de], Arc::new(country_dict)),
        );

        let mut division_dict = Dictionary::new();
        let divisions = ["Basel", "Berlin", "Basel", "Geneva", "Berlin"]
            .iter()
            .map(|value| EmbeddedString::new(value, &mut division_dict))
            .collect();
        partition.columns.insert_string_column(
            "division",
            StringColumnPartition::new(divisions, Arc::new(division_dict)),
        );

        partition.columns.insert_int_column(
            "age",
            IntColumnPartition::from_values(vec![25, 60, INT_NULL, 30, 45]),
        );

        let dates: Vec<_> = ["2021-01-01", "2021-01-05", "2021-02-01", "2021-02-10", "2021-03-01"]
            .iter()
            .map(|text| crate::common::Date::parse(text).unwrap())
            .collect();
        partition
            .columns
            .insert_date_column("date", DateColumnPartition::from_values(dates, true));
        partition.chunks = vec![Chunk::new(0, 5)];

        let mut lineage_dict = Dictionary::new();
        let b11 = lineage_dict.get_or_insert("B.1.1");
        let b117 = lineage_dict.get_or_insert("B.1.1.7");
        let ba5 = lineage_dict.get_or_insert("B.1.1.529.5");
        partition.columns.insert_pango_lineage_column(
            "pango_lineage",
            crate::storage::column::PangoLineageColumnPartition::new(
                vec![b11, b117, b117, ba5, b11],
                Arc::new(lineage_dict),
            ),
        );

        let mut database = Database::new(
            schema(),
            PangoAliasTable::from_pairs([("BA", "B.1.1.529")]),
        );
        database.add_partition(partition);
        database
    }

    fn evaluate(database: &Database, expression: &FilterExpression) -> Vec<u32> {
        let operator = expression
            .compile(database, &database.partitions[0], AmbiguityMode::None)
            .unwrap();
        operator.evaluate().iter().collect()
    }

    #[test]
    fn test_true_compiles_to_full() {
        let database = database();
        assert_eq!(evaluate(&database, &FilterExpression::True), vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn test_flipped_symbol_compiles_to_complement() {
        let database = database();
        let partition = &database.partitions[0];
        // A is dominant at position 0 and therefore flipped
        let operator = FilterExpression::NucleotideEquals {
            sequence_name: None,
            position: 0,
            symbol: 'A',
        }
        .compile(&database, partition, AmbiguityMode::None)
        .unwrap();
        assert!(matches!(operator, Operator::Complement { .. }));
        assert_eq!(operator.evaluate().iter().collect::<Vec<_>>(), vec![0, 1, 3]);
    }

    #[test]
    fn test_non_flipped_symbol_compiles_to_index_scan() {
        let database = database();
        let partition = &database.partitions[0];
        let operator = FilterExpression::NucleotideEquals {
            sequence_name: None,
            position: 0,
            symbol: 'T',
        }
        .compile(&database, partition, AmbiguityMode::None)
        .unwrap();
        assert!(matches!(operator, Operator::IndexScan { .. }));
        assert_eq!(operator.evaluate().iter().collect::<Vec<_>>(), vec![2]);
    }

    #[test]
    fn test_missing_symbol_compiles_to_bitmap_selection() {
        let database = database();
        let expression = FilterExpression::NucleotideEquals {
            sequence_name: None,
            position: 1,
            symbol: 'N',
        };
        assert_eq!(evaluate(&database, &expression), vec![3]);
    }

    #[test]
    fn test_upper_bound_expands_ambiguity() {
        let database = database();
        // Record 4 stores R at position 0; plain A misses it, Maybe(A) hits it
        let plain = FilterExpression::NucleotideEquals {
            sequence_name: None,
            position: 0,
            symbol: 'A',
        };
        assert_eq!(evaluate(&database, &plain), vec![0, 1, 3]);
        let maybe = FilterExpression::Maybe {
            child: Box::new(plain),
        };
        assert_eq!(evaluate(&database, &maybe), vec![0, 1, 3, 4]);
    }

    #[test]
    fn test_exact_excludes_missing_records() {
        let database = database();
        // Record 3 has N at position 1; Exact(C@2) must not contain it
        let exact = FilterExpression::Exact {
            child: Box::new(FilterExpression::NucleotideEquals {
                sequence_name: None,
                position: 1,
                symbol: 'C',
            }),
        };
        let result = evaluate(&database, &exact);
        assert_eq!(result, vec![0, 1, 2, 4]);
    }

    #[test]
    fn test_and_absorbs_full_and_short_circuits_empty() {
        let database = database();
        let nucleotide = FilterExpression::NucleotideEquals {
            sequence_name: None,
            position: 0,
            symbol: 'T',
        };
        // And(True, e, Not(False-like)) evaluates identically to e
        let and = FilterExpression::And {
            children: vec![
                FilterExpression::True,
                nucleotide.clone(),
                FilterExpression::Not {
                    child: Box::new(FilterExpression::StringEquals {
                        column: "country".to_string(),
                        value: "FR".to_string(),
                    }),
                },
            ],
        };
        assert_eq!(evaluate(&database, &and), evaluate(&database, &nucleotide));

        let with_empty = FilterExpression::And {
            children: vec![
                nucleotide,
                FilterExpression::StringEquals {
                    column: "country".to_string(),
                    value: "FR".to_string(),
                },
            ],
        };
        assert_eq!(evaluate(&database, &with_empty), Vec::<u32>::new());
    }

    #[test]
    fn test_and_pulls_predicates_out_of_selections() {
        let database = database();
        let partition = &database.partitions[0];
        let and = FilterExpression::And {
            children: vec![
                FilterExpression::IntBetween {
                    column: "age".to_string(),
                    from: Some(20),
                    to: Some(50),
                },
                FilterExpression::StringEquals {
                    column: "country".to_string(),
                    value: "CH".to_string(),
                },
            ],
        };
        let operator = and
            .compile(&database, partition, AmbiguityMode::None)
            .unwrap();
        // One selection wrapping the index scan, predicates merged into it
        match &operator {
            Operator::Selection {
                child: Some(child),
                predicates,
                ..
            } => {
                assert!(matches!(**child, Operator::IndexScan { .. }));
                assert_eq!(predicates.len(), 2);
            }
            other => panic!("expected a selection, got {other}"),
        }
        assert_eq!(operator.evaluate().iter().collect::<Vec<_>>(), vec![0, 3]);
    }

    #[test]
    fn test_double_negation_is_identity() {
        let database = database();
        let inner = FilterExpression::NucleotideEquals {
            sequence_name: None,
            position: 0,
            symbol: 'A',
        };
        let double = FilterExpression::Not {
            child: Box::new(FilterExpression::Not {
                child: Box::new(inner.clone()),
            }),
        };
        assert_eq!(evaluate(&database, &double), evaluate(&database, &inner));
    }

    #[test]
    fn test_string_equals_on_unindexed_column() {
        let database = database();
        let expression = FilterExpression::StringEquals {
            column: "division".to_string(),
            value: "Basel".to_string(),
        };
        assert_eq!(evaluate(&database, &expression), vec![0, 2]);
    }

    #[test]
    fn test_unknown_column_is_rejected() {
        let database = database();
        let expression = FilterExpression::StringEquals {
            column: "nonexistent".to_string(),
            value: "x".to_string(),
        };
        let result = expression.compile(
            &database,
            &database.partitions[0],
            AmbiguityMode::None,
        );
        assert!(matches!(result, Err(GenoError::ColumnNotFound(_))));
    }

    #[test]
    fn test_int_between_excludes_nulls() {
        let database = database();
        let expression = FilterExpression::IntBetween {
            column: "age".to_string(),
            from: None,
            to: None,
        };
        // Record 2 has a null age
        assert_eq!(evaluate(&database, &expression), vec![0, 1, 3, 4]);
    }

    #[test]
    fn test_date_between_on_sorted_column_uses_ranges() {
        let database = database();
        let partition = &database.partitions[0];
        let expression = FilterExpression::DateBetween {
            column: "date".to_string(),
            from: crate::common::Date::parse("2021-01-02"),
            to: crate::common::Date::parse("2021-02-28"),
        };
        let operator = expression
            .compile(&database, partition, AmbiguityMode::None)
            .unwrap();
        assert!(matches!(operator, Operator::RangeSelection { .. }));
        assert_eq!(operator.evaluate().iter().collect::<Vec<_>>(), vec![1, 2, 3]);
    }

    #[test]
    fn test_date_between_binary_searches_each_chunk() {
        let dates = |texts: &[&str]| -> Vec<crate::common::Date> {
            texts
                .iter()
                .map(|text| crate::common::Date::parse(text).unwrap())
                .collect()
        };
        let mut partition = DatabasePartition::new(6);
        partition.columns.insert_date_column(
            "date",
            DateColumnPartition::from_values(
                dates(&[
                    "2021-01-01",
                    "2021-01-03",
                    "2021-01-05",
                    "2021-01-02",
                    "2021-01-04",
                    "2021-01-06",
                ]),
                true,
            ),
        );
        partition.chunks = vec![Chunk::new(0, 3), Chunk::new(3, 3)];
        let mut database = Database::new(schema(), PangoAliasTable::default());
        database.add_partition(partition);

        let expression = FilterExpression::DateBetween {
            column: "date".to_string(),
            from: crate::common::Date::parse("2021-01-02"),
            to: crate::common::Date::parse("2021-01-04"),
        };
        let operator = expression
            .compile(&database, &database.partitions[0], AmbiguityMode::None)
            .unwrap();
        match &operator {
            Operator::RangeSelection { ranges, .. } => assert_eq!(ranges.len(), 2),
            other => panic!("expected a range selection, got {other}"),
        }
        assert_eq!(operator.evaluate().iter().collect::<Vec<_>>(), vec![1, 3, 4]);
    }

    #[test]
    fn test_pango_lineage_with_sublineages_and_alias() {
        let database = database();
        let exact = FilterExpression::PangoLineage {
            column: None,
            value: "B.1.1".to_string(),
            include_sublineages: false,
        };
        assert_eq!(evaluate(&database, &exact), vec![0, 4]);

        let with_sublineages = FilterExpression::PangoLineage {
            column: None,
            value: "B.1.1".to_string(),
            include_sublineages: true,
        };
        assert_eq!(evaluate(&database, &with_sublineages), vec![0, 1, 2, 3, 4]);

        // BA.5 resolves through the alias table to B.1.1.529.5
        let aliased = FilterExpression::PangoLineage {
            column: None,
            value: "BA.5".to_string(),
            include_sublineages: false,
        };
        assert_eq!(evaluate(&database, &aliased), vec![3]);
    }

    #[test]
    fn test_has_nucleotide_mutation_excludes_missing() {
        let database = database();
        // Position 1 reference is C; record 3 stores N there
        let expression = FilterExpression::HasNucleotideMutation {
            sequence_name: None,
            position: 1,
        };
        assert_eq!(evaluate(&database, &expression), Vec::<u32>::new());

        // Position 0 reference is A; record 2 stores T, record 4 stores R
        let expression = FilterExpression::HasNucleotideMutation {
            sequence_name: None,
            position: 0,
        };
        assert_eq!(evaluate(&database, &expression), vec![2]);

        // Maybe-mutated additionally includes the ambiguous R record
        let maybe = FilterExpression::Maybe {
            child: Box::new(expression),
        };
        assert_eq!(evaluate(&database, &maybe), vec![2, 4]);
    }

    #[test]
    fn test_n_of_counting() {
        let database = database();
        let children = vec![
            FilterExpression::StringEquals {
                column: "country".to_string(),
                value: "CH".to_string(),
            }, // {0, 2, 3}
            FilterExpression::NucleotideEquals {
                sequence_name: None,
                position: 0,
                symbol: 'A',
            }, // {0, 1, 3}
            FilterExpression::IntBetween {
                column: "age".to_string(),
                from: Some(26),
                to: None,
            }, // {1, 3, 4}
        ];
        let at_least_two = FilterExpression::NOf {
            children: children.clone(),
            number_of_matchers: 2,
            match_exactly: false,
        };
        assert_eq!(evaluate(&database, &at_least_two), vec![0, 1, 3]);

        let exactly_two = FilterExpression::NOf {
            children: children.clone(),
            number_of_matchers: 2,
            match_exactly: true,
        };
        assert_eq!(evaluate(&database, &exactly_two), vec![0, 1]);

        let too_many = FilterExpression::NOf {
            children,
            number_of_matchers: 4,
            match_exactly: false,
        };
        assert_eq!(evaluate(&database, &too_many), Vec::<u32>::new());
    }

    #[test]
    fn test_unknown_sequence_is_rejected() {
        let database = database();
        let expression = FilterExpression::NucleotideEquals {
            sequence_name: Some("unknown".to_string()),
            position: 0,
            symbol: 'A',
        };
        let result = expression.compile(
            &database,
            &database.partitions[0],
            AmbiguityMode::None,
        );
        assert!(matches!(result, Err(GenoError::SequenceNotFound(_))));
    }

    #[test]
    fn test_position_out_of_bounds_is_rejected() {
        let database = database();
        let expression = FilterExpression::NucleotideEquals {
            sequence_name: None,
            position: 4,
            symbol: 'A',
        };
        let result = expression.compile(
            &database,
            &database.partitions[0],
            AmbiguityMode::None,
        );
        assert!(matches!(result, Err(GenoError::QueryParse(_))));
    }
}
