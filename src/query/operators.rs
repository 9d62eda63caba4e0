//! Physical query operators
//!
//! Every operator evaluates to one bitmap over the record ids of a single
//! partition. Results carry an ownership tag: index scans borrow bitmaps
//! straight from the store, everything else hands out freshly built bitmaps
//! the caller may consume. `Operator::negate` rewrites the tree instead of
//! blindly wrapping complements wherever a cheaper form exists.

use std::cmp::Ordering;
use std::fmt;
use std::ops::{Deref, Range};

use roaring::RoaringBitmap;

use crate::common::{Date, EmbeddedString};
use crate::storage::complement_bitmap;

/// A bitmap with an ownership tag
pub enum OperatorResult<'a> {
    Borrowed(&'a RoaringBitmap),
    Owned(RoaringBitmap),
}

impl<'a> OperatorResult<'a> {
    pub fn is_mutable(&self) -> bool {
        matches!(self, OperatorResult::Owned(_))
    }

    pub fn into_owned(self) -> RoaringBitmap {
        match self {
            OperatorResult::Borrowed(bitmap) => bitmap.clone(),
            OperatorResult::Owned(bitmap) => bitmap,
        }
    }

    /// Mutable access, cloning a borrowed bitmap first
    pub fn to_mut(&mut self) -> &mut RoaringBitmap {
        if let OperatorResult::Borrowed(bitmap) = self {
            *self = OperatorResult::Owned(bitmap.clone());
        }
        match self {
            OperatorResult::Owned(bitmap) => bitmap,
            OperatorResult::Borrowed(_) => unreachable!(),
        }
    }
}

impl<'a> Deref for OperatorResult<'a> {
    type Target = RoaringBitmap;

    fn deref(&self) -> &RoaringBitmap {
        match self {
            OperatorResult::Borrowed(bitmap) => bitmap,
            OperatorResult::Owned(bitmap) => bitmap,
        }
    }
}

impl<'a> fmt::Debug for OperatorResult<'a> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OperatorResult::Borrowed(bitmap) => write!(f, "Borrowed({} records)", bitmap.len()),
            OperatorResult::Owned(bitmap) => write!(f, "Owned({} records)", bitmap.len()),
        }
    }
}

/// Typed value comparator of selection predicates
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Comparator {
    Equals,
    NotEquals,
    Less,
    LessOrEquals,
    Higher,
    HigherOrEquals,
}

impl Comparator {
    pub fn negate(self) -> Comparator {
        match self {
            Comparator::Equals => Comparator::NotEquals,
            Comparator::NotEquals => Comparator::Equals,
            Comparator::Less => Comparator::HigherOrEquals,
            Comparator::LessOrEquals => Comparator::Higher,
            Comparator::Higher => Comparator::LessOrEquals,
            Comparator::HigherOrEquals => Comparator::Less,
        }
    }

    fn matches(self, ordering: Ordering) -> bool {
        match self {
            Comparator::Equals => ordering == Ordering::Equal,
            Comparator::NotEquals => ordering != Ordering::Equal,
            Comparator::Less => ordering == Ordering::Less,
            Comparator::LessOrEquals => ordering != Ordering::Greater,
            Comparator::Higher => ordering == Ordering::Greater,
            Comparator::HigherOrEquals => ordering != Ordering::Less,
        }
    }

    fn symbol(self) -> &'static str {
        match self {
            Comparator::Equals => "=",
            Comparator::NotEquals => "!=",
            Comparator::Less => "<",
            Comparator::LessOrEquals => "<=",
            Comparator::Higher => ">",
            Comparator::HigherOrEquals => ">=",
        }
    }
}

/// A per-row predicate over a borrowed column slice. Predicates on one
/// selection combine by conjunction.
pub enum Predicate<'a> {
    IntCompare {
        values: &'a [i32],
        comparator: Comparator,
        value: i32,
    },
    FloatCompare {
        values: &'a [f64],
        comparator: Comparator,
        value: f64,
    },
    DateCompare {
        values: &'a [Date],
        comparator: Comparator,
        value: Date,
    },
    StringCompare {
        values: &'a [EmbeddedString],
        comparator: Comparator,
        value: EmbeddedString,
    },
}

impl<'a> Predicate<'a> {
    pub fn matches(&self, row: u32) -> bool {
        let row = row as usize;
        match self {
            Predicate::IntCompare {
                values,
                comparator,
                value,
            } => comparator.matches(values[row].cmp(value)),
            Predicate::FloatCompare {
                values,
                comparator,
                value,
            } => match values[row].partial_cmp(value) {
                // NaN is the null sentinel; a null row never matches
                Some(ordering) => comparator.matches(ordering),
                None => false,
            },
            Predicate::DateCompare {
                values,
                comparator,
                value,
            } => comparator.matches(values[row].cmp(value)),
            Predicate::StringCompare {
                values,
                comparator,
                value,
            } => match comparator {
                Comparator::Equals => values[row] == *value,
                Comparator::NotEquals => values[row] != *value,
                _ => comparator.matches(values[row].as_bytes().cmp(value.as_bytes())),
            },
        }
    }

    pub fn negate(&mut self) {
        match self {
            Predicate::IntCompare { comparator, .. }
            | Predicate::FloatCompare { comparator, .. }
            | Predicate::DateCompare { comparator, .. }
            | Predicate::StringCompare { comparator, .. } => *comparator = comparator.negate(),
        }
    }

    fn describe(&self) -> String {
        match self {
            Predicate::IntCompare {
                comparator, value, ..
            } => format!("int {} {}", comparator.symbol(), value),
            Predicate::FloatCompare {
                comparator, value, ..
            } => format!("float {} {}", comparator.symbol(), value),
            Predicate::DateCompare {
                comparator, value, ..
            } => format!("date {} {}", comparator.symbol(), value.0),
            Predicate::StringCompare { comparator, .. } => {
                format!("string {} <embedded>", comparator.symbol())
            }
        }
    }
}

impl<'a> fmt::Debug for Predicate<'a> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.describe())
    }
}

/// Whether a bitmap-of-positions row must contain the probed value
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BitmapComparator {
    Contains,
    NotContains,
}

/// Executable operator tree of one partition
pub enum Operator<'a> {
    /// The full record-id universe
    Full { row_count: u32 },
    /// The empty set
    Empty { row_count: u32 },
    /// Borrow a bitmap that lives in the store
    IndexScan {
        bitmap: &'a RoaringBitmap,
        row_count: u32,
    },
    /// Linear scan over a per-row bitmap vector probing one value
    BitmapSelection {
        bitmaps: &'a [RoaringBitmap],
        comparator: BitmapComparator,
        value: u32,
    },
    /// Union of sorted half-open id ranges
    RangeSelection {
        ranges: Vec<Range<u32>>,
        row_count: u32,
    },
    Complement {
        child: Box<Operator<'a>>,
        row_count: u32,
    },
    Union {
        children: Vec<Operator<'a>>,
        row_count: u32,
    },
    /// AND of `children`, AND-NOT of `negated_children`
    Intersection {
        children: Vec<Operator<'a>>,
        negated_children: Vec<Operator<'a>>,
        row_count: u32,
    },
    /// Predicate filter over a child bitmap, or over the universe
    Selection {
        child: Option<Box<Operator<'a>>>,
        predicates: Vec<Predicate<'a>>,
        row_count: u32,
    },
    /// Opaque lazy bitmap source
    BitmapProducer {
        producer: Box<dyn Fn() -> RoaringBitmap + Send + Sync + 'a>,
        row_count: u32,
    },
}

impl<'a> Operator<'a> {
    pub fn row_count(&self) -> u32 {
        match self {
            Operator::Full { row_count }
            | Operator::Empty { row_count }
            | Operator::IndexScan { row_count, .. }
            | Operator::RangeSelection { row_count, .. }
            | Operator::Complement { row_count, .. }
            | Operator::Union { row_count, .. }
            | Operator::Intersection { row_count, .. }
            | Operator::Selection { row_count, .. }
            | Operator::BitmapProducer { row_count, .. } => *row_count,
            Operator::BitmapSelection { bitmaps, .. } => bitmaps.len() as u32,
        }
    }

    pub fn evaluate(&self) -> OperatorResult<'a> {
        match self {
            Operator::Full { row_count } => {
                let mut bitmap = RoaringBitmap::new();
                bitmap.insert_range(0..*row_count);
                OperatorResult::Owned(bitmap)
            }
            Operator::Empty { .. } => OperatorResult::Owned(RoaringBitmap::new()),
            Operator::IndexScan { bitmap, .. } => OperatorResult::Borrowed(*bitmap),
            Operator::BitmapSelection {
                bitmaps,
                comparator,
                value,
            } => {
                let mut result = RoaringBitmap::new();
                for (row, bitmap) in bitmaps.iter().enumerate() {
                    if bitmap.contains(*value) == (*comparator == BitmapComparator::Contains) {
                        result.insert(row as u32);
                    }
                }
                OperatorResult::Owned(result)
            }
            Operator::RangeSelection { ranges, .. } => {
                let mut result = RoaringBitmap::new();
                for range in ranges {
                    result.insert_range(range.clone());
                }
                OperatorResult::Owned(result)
            }
            Operator::Complement { child, row_count } => {
                OperatorResult::Owned(complement_bitmap(&child.evaluate(), *row_count))
            }
            Operator::Union { children, .. } => {
                let mut result = RoaringBitmap::new();
                for child in children {
                    result |= &*child.evaluate();
                }
                OperatorResult::Owned(result)
            }
            Operator::Intersection {
                children,
                negated_children,
                row_count,
            } => {
                if children.len() == 1 && negated_children.is_empty() {
                    return children[0].evaluate();
                }
                let mut result = match children.split_first() {
                    Some((first, rest)) => {
                        let mut result = first.evaluate().into_owned();
                        for child in rest {
                            result &= &*child.evaluate();
                        }
                        result
                    }
                    None => {
                        let mut full = RoaringBitmap::new();
                        full.insert_range(0..*row_count);
                        full
                    }
                };
                for child in negated_children {
                    result -= &*child.evaluate();
                }
                OperatorResult::Owned(result)
            }
            Operator::Selection {
                child,
                predicates,
                row_count,
            } => {
                let mut result = RoaringBitmap::new();
                match child {
                    Some(child) => {
                        for row in child.evaluate().iter() {
                            if predicates.iter().all(|predicate| predicate.matches(row)) {
                                result.insert(row);
                            }
                        }
                    }
                    None => {
                        for row in 0..*row_count {
                            if predicates.iter().all(|predicate| predicate.matches(row)) {
                                result.insert(row);
                            }
                        }
                    }
                }
                OperatorResult::Owned(result)
            }
            Operator::BitmapProducer { producer, .. } => OperatorResult::Owned(producer()),
        }
    }

    /// An operator computing the complement over the partition universe
    pub fn negate(operator: Operator<'a>) -> Operator<'a> {
        match operator {
            Operator::Full { row_count } => Operator::Empty { row_count },
            Operator::Empty { row_count } => Operator::Full { row_count },
            Operator::Complement { child, .. } => *child,
            Operator::BitmapSelection {
                bitmaps,
                comparator,
                value,
            } => Operator::BitmapSelection {
                bitmaps,
                comparator: match comparator {
                    BitmapComparator::Contains => BitmapComparator::NotContains,
                    BitmapComparator::NotContains => BitmapComparator::Contains,
                },
                value,
            },
            Operator::RangeSelection { ranges, row_count } => Operator::RangeSelection {
                ranges: invert_ranges(&ranges, row_count),
                row_count,
            },
            Operator::Union {
                children,
                row_count,
            } => Operator::Intersection {
                children: Vec::new(),
                negated_children: children,
                row_count,
            },
            Operator::Intersection {
                children,
                negated_children,
                row_count,
            } => {
                if children.is_empty() {
                    // A purely negated intersection is the complement of a
                    // disjoint union, so its negation is that union.
                    Operator::Union {
                        children: negated_children,
                        row_count,
                    }
                } else {
                    let mut union_children = negated_children;
                    for child in children {
                        union_children.push(Operator::negate(child));
                    }
                    Operator::Union {
                        children: union_children,
                        row_count,
                    }
                }
            }
            Operator::Selection {
                child: None,
                mut predicates,
                row_count,
            } if predicates.len() == 1 => {
                predicates[0].negate();
                Operator::Selection {
                    child: None,
                    predicates,
                    row_count,
                }
            }
            operator => {
                let row_count = operator.row_count();
                Operator::Complement {
                    child: Box::new(operator),
                    row_count,
                }
            }
        }
    }
}

/// The gaps between sorted, non-overlapping ranges within `[0, row_count)`
fn invert_ranges(ranges: &[Range<u32>], row_count: u32) -> Vec<Range<u32>> {
    let mut inverted = Vec::with_capacity(ranges.len() + 1);
    let mut cursor = 0;
    for range in ranges {
        if range.start > cursor {
            inverted.push(cursor..range.start);
        }
        cursor = cursor.max(range.end);
    }
    if cursor < row_count {
        inverted.push(cursor..row_count);
    }
    inverted
}

impl<'a> fmt::Display for Operator<'a> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operator::Full { .. } => write!(f, "Full"),
            Operator::Empty { .. } => write!(f, "Empty"),
            Operator::IndexScan { bitmap, .. } => write!(f, "IndexScan({} records)", bitmap.len()),
            Operator::BitmapSelection {
                comparator, value, ..
            } => write!(f, "BitmapSelection({comparator:?} {value})"),
            Operator::RangeSelection { ranges, .. } => {
                write!(f, "RangeSelection({} ranges)", ranges.len())
            }
            Operator::Complement { child, .. } => write!(f, "Complement({child})"),
            Operator::Union { children, .. } => {
                write!(f, "Union(")?;
                for (i, child) in children.iter().enumerate() {
                    if i > 0 {
                        write!(f, " | ")?;
                    }
                    write!(f, "{child}")?;
                }
                write!(f, ")")
            }
            Operator::Intersection {
                children,
                negated_children,
                ..
            } => {
                write!(f, "Intersection(")?;
                for (i, child) in children.iter().enumerate() {
                    if i > 0 {
                        write!(f, " & ")?;
                    }
                    write!(f, "{child}")?;
                }
                for child in negated_children {
                    write!(f, " &! {child}")?;
                }
                write!(f, ")")
            }
            Operator::Selection {
                child, predicates, ..
            } => {
                write!(f, "Selection(")?;
                if let Some(child) = child {
                    write!(f, "{child}, ")?;
                }
                write!(f, "{} predicates)", predicates.len())
            }
            Operator::BitmapProducer { .. } => write!(f, "BitmapProducer"),
        }
    }
}

impl<'a> fmt::Debug for Operator<'a> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bitmap(values: &[u32]) -> RoaringBitmap {
        values.iter().copied().collect()
    }

    #[test]
    fn test_full_and_empty() {
        let full = Operator::Full { row_count: 5 };
        assert_eq!(full.evaluate().iter().collect::<Vec<_>>(), vec![0, 1, 2, 3, 4]);
        let empty = Operator::Empty { row_count: 5 };
        assert!(empty.evaluate().is_empty());
    }

    #[test]
    fn test_index_scan_borrows() {
        let stored = bitmap(&[1, 3]);
        let scan = Operator::IndexScan {
            bitmap: &stored,
            row_count: 5,
        };
        let result = scan.evaluate();
        assert!(!result.is_mutable());
        assert_eq!(result.iter().collect::<Vec<_>>(), vec![1, 3]);
    }

    #[test]
    fn test_complement() {
        let stored = bitmap(&[1, 3]);
        let operator = Operator::Complement {
            child: Box::new(Operator::IndexScan {
                bitmap: &stored,
                row_count: 5,
            }),
            row_count: 5,
        };
        let result = operator.evaluate();
        assert!(result.is_mutable());
        assert_eq!(result.iter().collect::<Vec<_>>(), vec![0, 2, 4]);
    }

    #[test]
    fn test_intersection_with_negated_children() {
        let a = bitmap(&[0, 1, 2, 3]);
        let b = bitmap(&[1, 2, 3, 4]);
        let c = bitmap(&[2]);
        let operator = Operator::Intersection {
            children: vec![
                Operator::IndexScan { bitmap: &a, row_count: 5 },
                Operator::IndexScan { bitmap: &b, row_count: 5 },
            ],
            negated_children: vec![Operator::IndexScan { bitmap: &c, row_count: 5 }],
            row_count: 5,
        };
        assert_eq!(operator.evaluate().iter().collect::<Vec<_>>(), vec![1, 3]);
    }

    #[test]
    fn test_single_child_intersection_passes_through() {
        let a = bitmap(&[0, 2]);
        let operator = Operator::Intersection {
            children: vec![Operator::IndexScan { bitmap: &a, row_count: 5 }],
            negated_children: vec![],
            row_count: 5,
        };
        let result = operator.evaluate();
        assert!(!result.is_mutable());
        assert_eq!(result.iter().collect::<Vec<_>>(), vec![0, 2]);
    }

    #[test]
    fn test_union() {
        let a = bitmap(&[0]);
        let b = bitmap(&[2, 4]);
        let operator = Operator::Union {
            children: vec![
                Operator::IndexScan { bitmap: &a, row_count: 5 },
                Operator::IndexScan { bitmap: &b, row_count: 5 },
            ],
            row_count: 5,
        };
        assert_eq!(operator.evaluate().iter().collect::<Vec<_>>(), vec![0, 2, 4]);
    }

    #[test]
    fn test_bitmap_selection() {
        let rows = vec![bitmap(&[7]), bitmap(&[]), bitmap(&[7, 9])];
        let operator = Operator::BitmapSelection {
            bitmaps: &rows,
            comparator: BitmapComparator::Contains,
            value: 7,
        };
        assert_eq!(operator.evaluate().iter().collect::<Vec<_>>(), vec![0, 2]);

        let negated = Operator::negate(operator);
        assert_eq!(negated.evaluate().iter().collect::<Vec<_>>(), vec![1]);
    }

    #[test]
    fn test_range_selection_and_inversion() {
        let operator = Operator::RangeSelection {
            ranges: vec![1..3, 6..8],
            row_count: 10,
        };
        assert_eq!(
            operator.evaluate().iter().collect::<Vec<_>>(),
            vec![1, 2, 6, 7]
        );
        let negated = Operator::negate(operator);
        assert_eq!(
            negated.evaluate().iter().collect::<Vec<_>>(),
            vec![0, 3, 4, 5, 8, 9]
        );
    }

    #[test]
    fn test_selection_over_universe_and_child() {
        let ages = vec![10, 25, 40, 15];
        let operator = Operator::Selection {
            child: None,
            predicates: vec![Predicate::IntCompare {
                values: &ages,
                comparator: Comparator::Higher,
                value: 12,
            }],
            row_count: 4,
        };
        assert_eq!(operator.evaluate().iter().collect::<Vec<_>>(), vec![1, 2, 3]);

        let base = bitmap(&[0, 1, 2]);
        let operator = Operator::Selection {
            child: Some(Box::new(Operator::IndexScan {
                bitmap: &base,
                row_count: 4,
            })),
            predicates: vec![Predicate::IntCompare {
                values: &ages,
                comparator: Comparator::Higher,
                value: 12,
            }],
            row_count: 4,
        };
        assert_eq!(operator.evaluate().iter().collect::<Vec<_>>(), vec![1, 2]);
    }

    #[test]
    fn test_negate_rewrites() {
        let a = bitmap(&[0, 1]);
        let b = bitmap(&[1, 2]);

        // negate(Complement(x)) = x
        let complement = Operator::Complement {
            child: Box::new(Operator::IndexScan { bitmap: &a, row_count: 5 }),
            row_count: 5,
        };
        let back = Operator::negate(complement);
        assert!(matches!(back, Operator::IndexScan { .. }));

        // negate(Union) becomes a purely negated intersection
        let union = Operator::Union {
            children: vec![
                Operator::IndexScan { bitmap: &a, row_count: 5 },
                Operator::IndexScan { bitmap: &b, row_count: 5 },
            ],
            row_count: 5,
        };
        let negated = Operator::negate(union);
        assert_eq!(negated.evaluate().iter().collect::<Vec<_>>(), vec![3, 4]);

        // and back again: the double negation restores the union semantics
        let restored = Operator::negate(negated);
        assert_eq!(restored.evaluate().iter().collect::<Vec<_>>(), vec![0, 1, 2]);
    }

    #[test]
    fn test_negate_mixed_intersection_applies_de_morgan() {
        let a = bitmap(&[0, 1, 2]);
        let b = bitmap(&[2, 3]);
        let intersection = Operator::Intersection {
            children: vec![Operator::IndexScan { bitmap: &a, row_count: 5 }],
            negated_children: vec![Operator::IndexScan { bitmap: &b, row_count: 5 }],
            row_count: 5,
        };
        // a \ b = {0, 1}; its complement is {2, 3, 4}
        let negated = Operator::negate(intersection);
        assert_eq!(negated.evaluate().iter().collect::<Vec<_>>(), vec![2, 3, 4]);
    }

    #[test]
    fn test_to_mut_clones_borrowed_results() {
        let stored = bitmap(&[1, 3]);
        let mut result = Operator::IndexScan {
            bitmap: &stored,
            row_count: 5,
        }
        .evaluate();
        result.to_mut().insert(4);
        assert!(result.is_mutable());
        assert_eq!(result.iter().collect::<Vec<_>>(), vec![1, 3, 4]);
        // The store-owned bitmap is untouched
        assert_eq!(stored.iter().collect::<Vec<_>>(), vec![1, 3]);
    }

    #[test]
    fn test_bitmap_producer() {
        let operator = Operator::BitmapProducer {
            producer: Box::new(|| [5u32, 6].into_iter().collect()),
            row_count: 10,
        };
        assert_eq!(operator.evaluate().iter().collect::<Vec<_>>(), vec![5, 6]);
    }
}
