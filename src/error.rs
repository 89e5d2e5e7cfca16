//! Error taxonomy.
//!
//! Two families of errors exist:
//!
//! - [`PlanError`]: deterministic functions of the pipeline graph and its field
//!   selectors. They are raised while scopes are resolved (see
//!   [`Plan::build`](crate::planner::Plan::build)) and never once data flows.
//! - [`ExecError`]: raised while key groups are being processed. A failing key
//!   group is abandoned as a whole; no partial output for that key is emitted
//!   by the all-or-nothing APIs.
//!
//! Public entry points return [`anyhow::Result`]; the typed error can be
//! recovered with `err.downcast_ref::<PlanError>()`.

use crate::tuple::Tuple;
use thiserror::Error;

/// Plan-time (graph construction / scope resolution) errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PlanError {
    #[error("unresolvable fields {missing} in {available}")]
    UnresolvableFields { missing: String, available: String },

    #[error("empty field selection: {context}")]
    EmptySelection { context: String },

    #[error("operation requires at least {required} argument field(s), got {actual}")]
    Arity { required: usize, actual: usize },

    #[error("group key arity mismatch: branch '{branch}' has {actual} key field(s), expected {expected}")]
    GroupArityMismatch {
        branch: String,
        expected: usize,
        actual: usize,
    },

    #[error("field '{field}' was produced by a preceding aggregation in the same group")]
    ChainedAggregation { field: String },

    #[error("declared fields have size {declared}, expected {expected} (value fields x repeat)")]
    DeclaredFieldSizeMismatch { declared: usize, expected: usize },

    #[error("duplicate field '{field}'")]
    DuplicateField { field: String },

    #[error("replace requires {arguments} declared field(s) to match the arguments, got {declared}")]
    ReplaceSizeMismatch { arguments: usize, declared: usize },

    #[error("selector {selector} is not valid as {role}")]
    InvalidSelector { selector: String, role: String },

    #[error("invalid repeat factor {repeat} for {branches} branch(es)")]
    InvalidRepeat { repeat: usize, branches: usize },

    #[error("group has no branches")]
    NoBranches,

    #[error("duplicate branch name '{branch}'")]
    DuplicateBranch { branch: String },

    #[error("join strategy '{strategy}' does not support {branches} branch(es)")]
    StrategyArity { strategy: String, branches: usize },

    #[error("{kind} operation cannot be placed in {place}")]
    MisplacedOperation { kind: String, place: String },

    #[error("aggregation must follow a group or another aggregation")]
    EveryWithoutGroup,

    #[error("missing node {node}")]
    MissingNode { node: u64 },

    #[error("pipeline graph contains a cycle")]
    Cycle,

    #[error("branches belong to different pipelines")]
    ForeignPipeline,

    #[error("{node}: {source}")]
    InNode {
        node: String,
        #[source]
        source: Box<PlanError>,
    },
}

impl PlanError {
    /// Attach the name of the node whose resolution failed.
    #[must_use]
    pub fn in_node(self, node: impl Into<String>) -> Self {
        Self::InNode {
            node: node.into(),
            source: Box::new(self),
        }
    }

    /// The underlying error with node context stripped.
    #[must_use]
    pub fn kind(&self) -> &Self {
        match self {
            Self::InNode { source, .. } => source.kind(),
            other => other,
        }
    }

    pub(crate) fn unresolvable(missing: impl ToString, available: impl ToString) -> Self {
        Self::UnresolvableFields {
            missing: missing.to_string(),
            available: available.to_string(),
        }
    }

    pub(crate) fn empty(context: impl Into<String>) -> Self {
        Self::EmptySelection {
            context: context.into(),
        }
    }

    pub(crate) fn invalid(selector: impl ToString, role: impl Into<String>) -> Self {
        Self::InvalidSelector {
            selector: selector.to_string(),
            role: role.into(),
        }
    }
}

/// Runtime errors surfaced per key group or per record.
#[derive(Debug, Error)]
pub enum ExecError {
    #[error("join strategy failed for key {key}: {source}")]
    JoinStrategy {
        key: Tuple,
        #[source]
        source: anyhow::Error,
    },

    #[error("operation '{node}' failed: {source}")]
    Operation {
        node: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("assertion '{node}' failed on {tuple}: {message}")]
    AssertionFailed {
        node: String,
        tuple: Tuple,
        message: String,
    },

    #[error("branch tag {tag} outside 0..{branches}")]
    UnknownBranch { tag: usize, branches: usize },

    #[error("key {key} delivered out of order after {previous}")]
    KeyOrder { key: Tuple, previous: Tuple },

    #[error("branch {tag} delivered after the streamed driver branch for key {key}")]
    DriverOrder { key: Tuple, tag: usize },

    #[error("tuple {tuple} has arity {actual}, expected {expected} at '{node}'")]
    ArityViolation {
        node: String,
        tuple: Tuple,
        expected: usize,
        actual: usize,
    },

    #[error("spill failed: {0}")]
    Spill(String),
}
