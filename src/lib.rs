//! # tuplestream
//!
//! A **field-algebra and grouping/join engine** for tuple-stream pipelines.
//! Pipelines are graphs of sources, per-record operations, multi-branch
//! groups and per-group aggregations over untyped [`Tuple`]s; every node
//! declares which fields it reads and writes, and the planner resolves those
//! declarations into concrete schemas before any data flows.
//!
//! ## Key Features
//!
//! - **Field selectors** - named or positional projections, plus symbolic
//!   roles (`ALL`, `GROUP-KEYS`, `VALUES`, `ARGUMENTS`, `RESULTS`, `REPLACE`,
//!   `SWAP`, `UNKNOWN`, `NONE`)
//! - **Plan-time schema checking** - unresolvable fields, arity and size
//!   mismatches fail in [`Plan::build`], never mid-run
//! - **Multi-branch grouping** - co-group any number of inputs on equal-arity
//!   keys, or self-join one input `N` ways
//! - **Pluggable joins** - inner (default), outer, left, right and mixed
//!   strategies behind the [`JoinStrategy`] trait
//! - **Spillable buffers** - per-branch buffers overflow to temp files
//! - **Sequential and parallel execution** - parallel runs split at key
//!   boundaries and return the same tuples in the same order
//!
//! ## Quick Start
//!
//! ```
//! use tuplestream::*;
//!
//! # fn main() -> anyhow::Result<()> {
//! let p = Pipeline::default();
//! let left = p.source(
//!     "left",
//!     fields!["k", "v"],
//!     vec![tuple![1, "a"], tuple![1, "b"], tuple![2, "c"]],
//! );
//! let right = p.source(
//!     "right",
//!     fields!["k", "w"],
//!     vec![tuple![1, "x"], tuple![2, "y"], tuple![2, "z"]],
//! );
//!
//! let joined = left
//!     .co_group("join", Branch::new("left", fields!["k"]))
//!     .join(&right, Branch::new("right", fields!["k"]))
//!     .build()?;
//!
//! assert_eq!(
//!     joined.collect_seq()?,
//!     vec![
//!         tuple![1, "a", "x"],
//!         tuple![1, "b", "x"],
//!         tuple![2, "c", "y"],
//!         tuple![2, "c", "z"],
//!     ]
//! );
//! # Ok(())
//! # }
//! ```
//!
//! ## Core Concepts
//!
//! ### Pipeline and Pipe
//!
//! A [`Pipeline`] is a flat node table. A [`Pipe`] is a handle on one node;
//! every transform appends a node and returns a new handle.
//!
//! ### Scopes
//!
//! A [`Scope`] is the resolved field layout on one edge. [`Plan::build`]
//! computes every scope of a subgraph in one topological pass.
//!
//! ### Groups
//!
//! A group node gathers one or more branches by key. Its outgoing fields are
//! the key followed by each branch's value fields (or the declared fields).
//! Aggregations chained with [`Pipe::every`] fold each key group to one row.
//!
//! ## Execution Modes
//!
//! - [`Pipe::collect_seq`]: single-threaded
//! - [`Pipe::collect_par`]: rayon worker pool, deterministic output order
//! - [`Pipe::collect_with`]: an explicit [`Runner`], e.g. from [`RunnerConfig`]

pub mod aggregators;
pub mod assertion;
pub mod config;
pub mod error;
pub mod fields;
pub mod functions;
pub mod group;
pub mod grouping;
pub mod metrics;
pub mod node;
pub mod node_id;
pub mod operation;
pub mod pipe;
pub mod pipeline;
pub mod planner;
pub mod runner;
pub mod scope;
pub mod shuffle;
pub mod testing;
pub mod tuple;

pub use aggregators::{Average, Count, First, Last, Max, Min, Sum};
pub use assertion::AssertionLevel;
pub use config::RunnerConfig;
pub use error::{ExecError, PlanError};
pub use fields::{Field, FieldSelector, Fields};
pub use group::{Branch, GroupSpec};
pub use grouping::{InnerJoin, JoinStrategy, LeftJoin, MixedJoin, OuterJoin, RightJoin, SpillConfig};
pub use node_id::NodeId;
pub use operation::{Aggregator, Operation, OperationKind};
pub use pipe::{CoGroup, Pipe};
pub use pipeline::Pipeline;
pub use planner::{ExecutionExplanation, Plan};
pub use runner::{ExecMode, Runner};
pub use scope::Scope;
pub use tuple::{Tuple, Value};
