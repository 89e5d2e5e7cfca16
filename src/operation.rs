//! Pipeline operations.
//!
//! Every per-record or per-group node carries one [`Operation`]: a closed
//! [`OperationKind`] variant holding the executable behavior, plus the three
//! selectors of the field contract:
//!
//! - `arguments` (default `ALL`): what part of the incoming tuple the
//!   operation sees,
//! - `declared`: what the operation promises to output (may be `UNKNOWN`),
//! - `output`: how the declared fields recombine with the incoming tuple
//!   (`RESULTS` for maps, `ALL` for aggregations).
//!
//! Scope resolution is implemented once, generically, in [`crate::scope`];
//! only execution differs by variant.

use crate::assertion::AssertionLevel;
use crate::fields::FieldSelector;
use crate::tuple::Tuple;
use std::fmt::{Debug, Formatter, Result as FormatResult};
use std::sync::Arc;

/// Per-record function: zero or more result tuples per argument tuple.
pub type MapFn = Arc<dyn Fn(&Tuple) -> anyhow::Result<Vec<Tuple>> + Send + Sync>;
/// Per-record predicate: `true` keeps the tuple.
pub type FilterFn = Arc<dyn Fn(&Tuple) -> bool + Send + Sync>;
/// Per-record check: `Err(message)` fails the assertion.
pub type AssertFn = Arc<dyn Fn(&Tuple) -> Result<(), String> + Send + Sync>;

/// Per-group aggregation over argument tuples.
///
/// Accumulators are tuples so that aggregators stay object safe and can be
/// stored behind `Arc<dyn Aggregator>`.
pub trait Aggregator: Send + Sync {
    /// Smallest number of argument fields this aggregator accepts.
    fn min_arity(&self) -> usize {
        1
    }

    /// Fresh accumulator for a new group.
    fn create(&self) -> Tuple;

    /// Fold one argument tuple into the accumulator.
    fn add_input(&self, acc: &mut Tuple, args: &Tuple) -> anyhow::Result<()>;

    /// Produce the result tuple (must match the declared fields).
    fn finish(&self, acc: Tuple) -> Tuple;
}

#[derive(Clone)]
pub enum OperationKind {
    Map(MapFn),
    Filter(FilterFn),
    Aggregate(Arc<dyn Aggregator>),
    Assert {
        check: AssertFn,
        level: AssertionLevel,
    },
}

impl OperationKind {
    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            Self::Map(_) => "map",
            Self::Filter(_) => "filter",
            Self::Aggregate(_) => "aggregate",
            Self::Assert { .. } => "assert",
        }
    }
}

impl Debug for OperationKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> FormatResult {
        match self {
            Self::Assert { level, .. } => write!(f, "Assert({level:?})"),
            other => write!(f, "{}", other.label()),
        }
    }
}

/// An operation plus its field contract.
#[derive(Clone, Debug)]
pub struct Operation {
    pub name: String,
    pub kind: OperationKind,
    pub arguments: FieldSelector,
    pub declared: FieldSelector,
    pub output: FieldSelector,
    pub min_arity: usize,
}

impl Operation {
    /// A map producing `declared` fields; output defaults to `RESULTS`.
    pub fn map<F>(name: impl Into<String>, declared: impl Into<FieldSelector>, f: F) -> Self
    where
        F: Fn(&Tuple) -> anyhow::Result<Vec<Tuple>> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            kind: OperationKind::Map(Arc::new(f)),
            arguments: FieldSelector::All,
            declared: declared.into(),
            output: FieldSelector::Results,
            min_arity: 0,
        }
    }

    /// A one-to-one map; convenience over [`Operation::map`].
    pub fn map_one<F>(name: impl Into<String>, declared: impl Into<FieldSelector>, f: F) -> Self
    where
        F: Fn(&Tuple) -> Tuple + Send + Sync + 'static,
    {
        Self::map(name, declared, move |t| Ok(vec![f(t)]))
    }

    /// A filter keeping tuples whose arguments satisfy `pred`.
    pub fn filter<F>(name: impl Into<String>, pred: F) -> Self
    where
        F: Fn(&Tuple) -> bool + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            kind: OperationKind::Filter(Arc::new(pred)),
            arguments: FieldSelector::All,
            declared: FieldSelector::None,
            output: FieldSelector::All,
            min_arity: 0,
        }
    }

    /// An aggregation producing `declared` fields; output defaults to `ALL`.
    pub fn aggregate<A>(name: impl Into<String>, declared: impl Into<FieldSelector>, agg: A) -> Self
    where
        A: Aggregator + 'static,
    {
        let min_arity = agg.min_arity();
        Self {
            name: name.into(),
            kind: OperationKind::Aggregate(Arc::new(agg)),
            arguments: FieldSelector::All,
            declared: declared.into(),
            output: FieldSelector::All,
            min_arity,
        }
    }

    /// A value assertion active at `level` and above.
    pub fn assertion<F>(name: impl Into<String>, level: AssertionLevel, check: F) -> Self
    where
        F: Fn(&Tuple) -> Result<(), String> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            kind: OperationKind::Assert {
                check: Arc::new(check),
                level,
            },
            arguments: FieldSelector::All,
            declared: FieldSelector::None,
            output: FieldSelector::All,
            min_arity: 0,
        }
    }

    #[must_use]
    pub fn with_arguments(mut self, arguments: impl Into<FieldSelector>) -> Self {
        self.arguments = arguments.into();
        self
    }

    #[must_use]
    pub fn with_output(mut self, output: impl Into<FieldSelector>) -> Self {
        self.output = output.into();
        self
    }

    #[must_use]
    pub const fn with_min_arity(mut self, min_arity: usize) -> Self {
        self.min_arity = min_arity;
        self
    }
}
