//! Built-in aggregators for per-group aggregation nodes.
//!
//! All aggregators implement [`Aggregator`](crate::operation::Aggregator) and
//! are attached to a group with [`Pipe::aggregate`](crate::Pipe::aggregate):
//!
//! - [`Count`]: number of tuples in the group
//! - [`Sum`], [`Min`], [`Max`]: over the first argument field, nulls skipped
//! - [`First`], [`Last`]: the first/last argument tuple in delivery order
//! - [`Average`]: arithmetic mean of the first argument field

pub mod basic;
pub mod statistical;

pub use basic::{Count, First, Last, Max, Min, Sum};
pub use statistical::Average;
