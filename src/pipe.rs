use crate::assertion::AssertionLevel;
use crate::error::PlanError;
use crate::fields::{FieldSelector, Fields};
use crate::group::{Branch, GroupSpec};
use crate::grouping::JoinStrategy;
use crate::node::Node;
use crate::node_id::NodeId;
use crate::operation::{Aggregator, Operation};
use crate::pipeline::Pipeline;
use crate::planner::Plan;
use crate::runner::{ExecMode, Runner};
use crate::scope::Scope;
use crate::tuple::Tuple;
use anyhow::{Result, anyhow};
use std::sync::Arc;

/// Fluent handle on one node of a [`Pipeline`].
///
/// Every transform appends a node and returns a handle on it; nothing runs
/// until one of the `collect_*` methods is called.
#[derive(Clone)]
pub struct Pipe {
    pub(crate) pipeline: Pipeline,
    pub(crate) id: NodeId,
}

impl Pipe {
    pub(crate) const fn new(pipeline: Pipeline, id: NodeId) -> Self {
        Self { pipeline, id }
    }

    #[must_use]
    pub const fn id(&self) -> NodeId {
        self.id
    }

    #[must_use]
    pub const fn pipeline(&self) -> &Pipeline {
        &self.pipeline
    }

    fn then(&self, node: Node, inputs: Vec<NodeId>) -> Self {
        let id = self.pipeline.insert_node(node, inputs);
        Self::new(self.pipeline.clone(), id)
    }

    /// Apply a per-record operation.
    #[must_use]
    pub fn each(&self, op: Operation) -> Self {
        self.then(Node::Each(op), vec![self.id])
    }

    /// One-to-one map over all fields producing `declared`.
    #[must_use]
    pub fn map<F>(&self, name: &str, declared: impl Into<FieldSelector>, f: F) -> Self
    where
        F: Fn(&Tuple) -> Tuple + Send + Sync + 'static,
    {
        self.each(Operation::map_one(name, declared, f))
    }

    #[must_use]
    pub fn filter<F>(&self, name: &str, pred: F) -> Self
    where
        F: Fn(&Tuple) -> bool + Send + Sync + 'static,
    {
        self.each(Operation::filter(name, pred))
    }

    #[must_use]
    pub fn assert<F>(&self, name: &str, level: AssertionLevel, check: F) -> Self
    where
        F: Fn(&Tuple) -> Result<(), String> + Send + Sync + 'static,
    {
        self.each(Operation::assertion(name, level, check))
    }

    /// Chain a per-group aggregation after a group or another aggregation.
    #[must_use]
    pub fn every(&self, op: Operation) -> Self {
        self.then(Node::Every(op), vec![self.id])
    }

    /// Aggregate `arguments` into `declared` result fields.
    #[must_use]
    pub fn aggregate<A>(
        &self,
        name: &str,
        arguments: impl Into<FieldSelector>,
        declared: impl Into<FieldSelector>,
        agg: A,
    ) -> Self
    where
        A: Aggregator + 'static,
    {
        self.every(Operation::aggregate(name, declared, agg).with_arguments(arguments))
    }

    /// Single-branch group on `key`.
    #[must_use]
    pub fn group_by(&self, key: impl Into<FieldSelector>) -> Self {
        let spec = GroupSpec::new("group_by").branch(Branch::new("input", key));
        self.then(Node::Group(spec), vec![self.id])
    }

    /// Single-branch group on `key`, secondarily sorted on `sort`.
    ///
    /// `reverse` flips the sort-key order, never the key order.
    #[must_use]
    pub fn group_by_sorted(
        &self,
        key: impl Into<FieldSelector>,
        sort: impl Into<FieldSelector>,
        reverse: bool,
    ) -> Self {
        let spec = GroupSpec::new("group_by")
            .branch(Branch::new("input", key).sorted_by(sort))
            .reversed(reverse);
        self.then(Node::Group(spec), vec![self.id])
    }

    /// `repeat`-way self-join on `key`.
    #[must_use]
    pub fn self_join(&self, key: impl Into<FieldSelector>, repeat: usize, declared: Fields) -> Self {
        let spec = GroupSpec::new("self_join")
            .branch(Branch::new("self", key))
            .with_repeat(repeat)
            .with_declared(declared);
        self.then(Node::Group(spec), vec![self.id])
    }

    /// Start a multi-branch group with this pipe as branch 0.
    #[must_use]
    pub fn co_group(&self, name: &str, branch: Branch) -> CoGroup {
        CoGroup {
            pipeline: self.pipeline.clone(),
            inputs: vec![self.clone()],
            spec: GroupSpec::new(name).branch(branch),
        }
    }

    /// Plan the subgraph ending at this node with the default assertion level.
    ///
    /// # Errors
    ///
    /// Any plan-time error of the subgraph.
    pub fn plan(&self) -> Result<Plan> {
        Plan::build(&self.pipeline, self.id, AssertionLevel::default())
    }

    /// Resolved outgoing scope of this node.
    ///
    /// # Errors
    ///
    /// Any plan-time error of the subgraph.
    pub fn scope(&self) -> Result<Scope> {
        let plan = self.plan()?;
        plan.scopes
            .outgoing(self.id)
            .cloned()
            .ok_or_else(|| anyhow!(PlanError::MissingNode { node: self.id.raw() }))
    }

    /// Run with an explicit [`Runner`].
    ///
    /// # Errors
    ///
    /// Plan-time or runtime errors.
    pub fn collect_with(&self, runner: &Runner) -> Result<Vec<Tuple>> {
        runner.run(&self.pipeline, self.id)
    }

    /// Run single-threaded.
    ///
    /// # Errors
    ///
    /// Plan-time or runtime errors.
    pub fn collect_seq(&self) -> Result<Vec<Tuple>> {
        let r = Runner {
            mode: ExecMode::Sequential,
            ..Default::default()
        };
        self.collect_with(&r)
    }

    /// Run on a rayon pool; results are in the same order as [`Pipe::collect_seq`].
    ///
    /// # Errors
    ///
    /// Plan-time or runtime errors.
    pub fn collect_par(&self, threads: Option<usize>, partitions: Option<usize>) -> Result<Vec<Tuple>> {
        let r = Runner {
            mode: ExecMode::Parallel {
                threads,
                partitions,
            },
            ..Default::default()
        };
        self.collect_with(&r)
    }
}

/// Builder for a multi-branch group node.
pub struct CoGroup {
    pipeline: Pipeline,
    inputs: Vec<Pipe>,
    spec: GroupSpec,
}

impl CoGroup {
    /// Add the next branch.
    #[must_use]
    pub fn join(mut self, input: &Pipe, branch: Branch) -> Self {
        self.inputs.push(input.clone());
        self.spec = self.spec.branch(branch);
        self
    }

    /// Name the joined value fields explicitly.
    #[must_use]
    pub fn declared(mut self, declared: Fields) -> Self {
        self.spec = self.spec.with_declared(declared);
        self
    }

    #[must_use]
    pub fn strategy<S: JoinStrategy + 'static>(mut self, strategy: S) -> Self {
        self.spec = self.spec.with_strategy(Arc::new(strategy));
        self
    }

    #[must_use]
    pub fn reverse_order(mut self) -> Self {
        self.spec = self.spec.reversed(true);
        self
    }

    /// Insert the group node.
    ///
    /// # Errors
    ///
    /// [`PlanError::ForeignPipeline`] if a branch belongs to another pipeline.
    pub fn build(self) -> Result<Pipe> {
        if self.inputs.iter().any(|p| !p.pipeline.same_as(&self.pipeline)) {
            return Err(PlanError::ForeignPipeline.into());
        }
        let inputs = self.inputs.iter().map(Pipe::id).collect();
        let id = self.pipeline.insert_node(Node::Group(self.spec), inputs);
        Ok(Pipe::new(self.pipeline, id))
    }
}
