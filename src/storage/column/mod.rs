//! Typed metadata column partitions

mod date;
mod insertion;
mod numeric;
mod pango;
mod string;

pub use date::DateColumnPartition;
pub use insertion::{
    Insertion, InsertionColumnPartition, InsertionIndex, InsertionPosition, InsertionSearch,
};
pub use numeric::{BoolColumnPartition, FloatColumnPartition, IntColumnPartition};
pub use pango::{PangoAliasTable, PangoLineageColumnPartition};
pub use string::{IndexedStringColumnPartition, StringColumnPartition};

/// Null sentinel of integer columns
pub const INT_NULL: i32 = i32::MIN;
