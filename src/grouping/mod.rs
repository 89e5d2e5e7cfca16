//! Runtime grouping and join engine.
//!
//! - [`buffer`]: spillable, append-only per-branch buffers
//! - [`closure`]: the per-key [`GroupingClosure`] demultiplexer and its state machine
//! - [`strategy`]: the [`JoinStrategy`] trait and the built-in nested-loop joins
//! - [`joiner`]: [`GroupJoiner`], which walks a sorted record stream key by key

pub mod buffer;
pub mod closure;
pub mod joiner;
pub mod strategy;

pub use buffer::{BufferCursor, DEFAULT_SPILL_THRESHOLD, SpillConfig};
pub use closure::{ClosureLayout, GroupState, GroupingClosure, TaggedRun};
pub use joiner::{GroupJoiner, KeyGroup, ShuffleRecord};
pub use strategy::{InnerJoin, JoinIter, JoinStrategy, LeftJoin, MixedJoin, OuterJoin, RightJoin};
