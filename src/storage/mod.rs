//! Read-only backing structures a query evaluates against: typed column
//! partitions, dictionary-backed string storage, per-position sequence
//! bitmap indexes and the partition bundle tying them together.
//!
//! Everything here is built once by the preprocessing layer and immutable
//! afterwards; the query engine only holds shared views.

pub mod column;
mod partition;
mod sequence_store;

pub use partition::{Chunk, ColumnPartitionGroup, DatabasePartition};
pub use sequence_store::{complement_bitmap, Position, SequenceStorePartition};
