//! In-memory plan execution.
//!
//! The runner walks a [`Plan`] in topological order, keeping one
//! [`Dataset`] per node until its last consumer has read it. Group nodes run
//! every input through [`LocalShuffle`] and hand the sorted run to
//! [`GroupJoiner`]s; aggregation chains fold each key group's joined tuples.
//!
//! In [`ExecMode::Parallel`], per-record steps are split into contiguous
//! slices and group steps are split at key boundaries, so each chunk drives
//! its own per-key state machine. Chunk results are concatenated in chunk
//! order, which keeps the output identical to a sequential run.

use crate::assertion::AssertionLevel;
use crate::config::RunnerConfig;
use crate::error::{ExecError, PlanError};
use crate::group::GroupSpec;
use crate::grouping::{ClosureLayout, GroupJoiner, ShuffleRecord, SpillConfig};
use crate::metrics::MetricsCollector;
use crate::node_id::NodeId;
use crate::operation::{Aggregator, Operation, OperationKind};
use crate::pipeline::Pipeline;
use crate::planner::{Edge, Plan, PlannedNode, Step};
use crate::scope::{GroupingScope, OperationLayout};
use crate::shuffle::LocalShuffle;
use crate::tuple::Tuple;
use anyhow::Result;
#[cfg(feature = "parallel")]
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecMode {
    Sequential,
    Parallel {
        threads: Option<usize>,
        partitions: Option<usize>,
    },
}

#[derive(Clone)]
pub struct Runner {
    pub mode: ExecMode,
    pub default_partitions: usize,
    pub spill: SpillConfig,
    pub assertion_level: AssertionLevel,
    pub metrics: Option<MetricsCollector>,
}

impl Default for Runner {
    fn default() -> Self {
        Self {
            mode: ExecMode::Parallel {
                threads: None,
                partitions: None,
            },
            default_partitions: 2 * num_cpus::get().max(2),
            spill: SpillConfig::default(),
            assertion_level: AssertionLevel::default(),
            metrics: None,
        }
    }
}

/// One key group flowing out of a group or aggregation node.
#[derive(Clone, Debug)]
struct GroupRow {
    /// Group key followed by the joined values, one tuple per join result.
    values: Vec<Tuple>,
    /// Key plus every aggregate produced so far.
    current: Tuple,
}

#[derive(Clone, Debug)]
enum Dataset {
    Flat(Vec<Tuple>),
    Grouped { rows: Vec<GroupRow>, aggregated: bool },
}

impl Dataset {
    fn into_flat(self) -> Vec<Tuple> {
        match self {
            Self::Flat(v) => v,
            Self::Grouped {
                rows,
                aggregated: true,
            } => rows.into_iter().map(|r| r.current).collect(),
            Self::Grouped {
                rows,
                aggregated: false,
            } => rows.into_iter().flat_map(|r| r.values).collect(),
        }
    }
}

impl Runner {
    /// Runner built from a loaded [`RunnerConfig`].
    #[must_use]
    pub fn from_config(cfg: &RunnerConfig) -> Self {
        Self {
            mode: cfg.mode,
            spill: cfg.spill(),
            assertion_level: cfg.assertion_level,
            metrics: cfg.metrics.then(MetricsCollector::new),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_metrics(mut self, metrics: MetricsCollector) -> Self {
        self.metrics = Some(metrics);
        self
    }

    #[must_use]
    pub fn with_spill(mut self, spill: SpillConfig) -> Self {
        self.spill = spill;
        self
    }

    #[must_use]
    pub const fn with_assertion_level(mut self, level: AssertionLevel) -> Self {
        self.assertion_level = level;
        self
    }

    /// Plan the subgraph ending at `terminal` at this runner's assertion level.
    ///
    /// # Errors
    ///
    /// Any plan-time error.
    pub fn plan(&self, p: &Pipeline, terminal: NodeId) -> Result<Plan> {
        Plan::build(p, terminal, self.assertion_level)
    }

    /// Plan and execute, returning the terminal node's tuples.
    ///
    /// # Errors
    ///
    /// Plan-time errors, then the first runtime error encountered.
    pub fn run(&self, p: &Pipeline, terminal: NodeId) -> Result<Vec<Tuple>> {
        let plan = self.plan(p, terminal)?;
        self.execute(&plan)
    }

    /// Execute an already built plan.
    ///
    /// # Errors
    ///
    /// The first runtime error encountered, or a failure to build the
    /// worker pool.
    pub fn execute(&self, plan: &Plan) -> Result<Vec<Tuple>> {
        if let Some(m) = &self.metrics {
            m.record_start();
        }
        let result = match self.mode {
            ExecMode::Sequential => Executor::new(self, plan, 1).run(),
            ExecMode::Parallel {
                threads,
                partitions,
            } => {
                let parts = partitions
                    .or(plan.suggested_partitions)
                    .unwrap_or(self.default_partitions)
                    .max(1);
                self.run_parallel(plan, threads, parts)
            }
        };
        if let Some(m) = &self.metrics {
            m.record_end();
        }
        let out = result?;
        info!(terminal = %plan.terminal, mode = ?self.mode, tuples = out.len(), "run finished");
        Ok(out)
    }

    #[cfg(feature = "parallel")]
    fn run_parallel(&self, plan: &Plan, threads: Option<usize>, parts: usize) -> Result<Vec<Tuple>> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(threads.unwrap_or(0))
            .build()?;
        pool.install(|| Executor::new(self, plan, parts).run())
    }

    #[cfg(not(feature = "parallel"))]
    fn run_parallel(&self, plan: &Plan, _threads: Option<usize>, parts: usize) -> Result<Vec<Tuple>> {
        Executor::new(self, plan, parts).run()
    }

    fn count(&self, name: &str, n: usize) {
        if let Some(m) = self.metrics.as_ref().filter(|_| n > 0) {
            m.increment_counter(name, n as u64);
        }
    }
}

struct Executor<'r> {
    runner: &'r Runner,
    plan: &'r Plan,
    parts: usize,
}

impl<'r> Executor<'r> {
    const fn new(runner: &'r Runner, plan: &'r Plan, parts: usize) -> Self {
        Self {
            runner,
            plan,
            parts,
        }
    }

    fn run(&self) -> Result<Vec<Tuple>> {
        let mut uses: HashMap<NodeId, usize> = HashMap::new();
        for node in &self.plan.nodes {
            for input in &node.inputs {
                *uses.entry(*input).or_default() += 1;
            }
        }

        let mut datasets: HashMap<NodeId, Dataset> = HashMap::new();
        for node in &self.plan.nodes {
            let mut inputs = Vec::with_capacity(node.inputs.len());
            for input in &node.inputs {
                inputs.push(take_input(&mut datasets, &mut uses, *input)?);
            }
            let out = self.step(node, inputs)?;
            debug!(node = %node.id, name = %node.name, "step done");
            datasets.insert(node.id, out);
        }
        let out = datasets
            .remove(&self.plan.terminal)
            .ok_or(PlanError::MissingNode {
                node: self.plan.terminal.raw(),
            })?;
        Ok(out.into_flat())
    }

    fn step(&self, node: &PlannedNode, mut inputs: Vec<Dataset>) -> Result<Dataset> {
        match &node.step {
            Step::Source { data, arity } => {
                if let Some(expected) = arity {
                    if let Some(bad) = data.iter().find(|t| t.arity() != *expected) {
                        return Err(ExecError::ArityViolation {
                            node: node.name.clone(),
                            tuple: bad.clone(),
                            expected: *expected,
                            actual: bad.arity(),
                        }
                        .into());
                    }
                }
                self.runner.count("source_tuples", data.len());
                Ok(Dataset::Flat(data.to_vec()))
            }
            Step::PassThrough => inputs.pop().ok_or_else(|| missing_input(node)),
            Step::Each { op, layout } => {
                let input = inputs.pop().ok_or_else(|| missing_input(node))?.into_flat();
                let width = self.incoming_arity(node);
                let slices: Vec<&[Tuple]> = self.slices(&input);
                let results = self.map_parts(&slices, |slice| {
                    apply_each(&node.name, op, layout, width, slice)
                })?;
                let mut out = Vec::with_capacity(input.len());
                let mut filtered = 0;
                for (tuples, dropped) in results {
                    out.extend(tuples);
                    filtered += dropped;
                }
                self.runner.count("filtered_tuples", filtered);
                Ok(Dataset::Flat(out))
            }
            Step::Every { op, layout } => {
                let Some(Dataset::Grouped { rows, .. }) = inputs.pop() else {
                    return Err(PlanError::EveryWithoutGroup.into());
                };
                let OperationKind::Aggregate(agg) = &op.kind else {
                    return Err(PlanError::MisplacedOperation {
                        kind: op.kind.label().to_string(),
                        place: "an aggregation chain".to_string(),
                    }
                    .into());
                };
                let slices: Vec<&[GroupRow]> = self.slices(&rows);
                let rows = self
                    .map_parts(&slices, |slice| {
                        slice
                            .iter()
                            .map(|row| aggregate_row(&node.name, op, agg.as_ref(), layout, row))
                            .collect::<Result<Vec<_>>>()
                    })?
                    .into_iter()
                    .flatten()
                    .collect();
                Ok(Dataset::Grouped {
                    rows,
                    aggregated: true,
                })
            }
            Step::Group { spec, grouping } => {
                let inputs: Vec<Vec<Tuple>> = inputs.into_iter().map(Dataset::into_flat).collect();
                let rows = self.group(spec, grouping, &inputs)?;
                Ok(Dataset::Grouped {
                    rows,
                    aggregated: false,
                })
            }
        }
    }

    fn group(&self, spec: &GroupSpec, grouping: &GroupingScope, inputs: &[Vec<Tuple>]) -> Result<Vec<GroupRow>> {
        let shuffle = LocalShuffle::new(grouping);
        let records = shuffle.shuffle(inputs)?;
        let layout = shuffle.closure_layout(self.runner.spill.clone(), self.runner.metrics.clone());
        let descending = shuffle.descending_keys();
        let chunks = split_at_keys(&records, self.parts);
        debug!(group = %spec.name, records = records.len(), chunks = chunks.len(), "shuffled");

        let rows: Vec<GroupRow> = self
            .map_parts(&chunks, |chunk| self.join_chunk(spec, &layout, descending, chunk))?
            .into_iter()
            .flatten()
            .collect();
        Ok(rows)
    }

    fn join_chunk(
        &self,
        spec: &GroupSpec,
        layout: &ClosureLayout,
        descending: bool,
        chunk: &[ShuffleRecord],
    ) -> Result<Vec<GroupRow>> {
        let records = chunk.iter().cloned().map(Ok);
        let mut joiner =
            GroupJoiner::new(Arc::clone(&spec.strategy), layout.clone(), records).descending(descending);
        let mut rows = Vec::new();
        let mut groups = 0;
        let mut joined_total = 0;
        while let Some(group) = joiner.next_group() {
            let group = group?;
            let key = group.key().clone();
            let joined = group.join_all()?;
            groups += 1;
            joined_total += joined.len();
            if joined.is_empty() {
                continue;
            }
            let values = joined.iter().map(|j| key.append(j)).collect();
            rows.push(GroupRow {
                values,
                current: key,
            });
        }
        self.runner.count("key_groups", groups);
        self.runner.count("joined_tuples", joined_total);
        Ok(rows)
    }

    /// Width of the tuples entering `node`, when known.
    fn incoming_arity(&self, node: &PlannedNode) -> Option<usize> {
        let from = *node.inputs.first()?;
        let edge = Edge {
            from,
            to: Some(node.id),
            slot: 0,
        };
        self.plan.scopes.get(&edge)?.outgoing.arity()
    }

    fn slices<'a, T>(&self, items: &'a [T]) -> Vec<&'a [T]> {
        if items.is_empty() {
            return Vec::new();
        }
        items.chunks(items.len().div_ceil(self.parts)).collect()
    }

    /// Apply `f` to every part, in parallel when more than one part exists.
    fn map_parts<T, R, F>(&self, parts: &[T], f: F) -> Result<Vec<R>>
    where
        T: Sync,
        R: Send,
        F: Fn(&T) -> Result<R> + Sync + Send,
    {
        #[cfg(feature = "parallel")]
        if self.parts > 1 && parts.len() > 1 {
            return parts.par_iter().map(f).collect();
        }
        parts.iter().map(f).collect()
    }
}

fn missing_input(node: &PlannedNode) -> anyhow::Error {
    PlanError::MissingNode {
        node: node.id.raw(),
    }
    .in_node(node.name.clone())
    .into()
}

/// Take a node's dataset, cloning it unless this is its last consumer.
fn take_input(
    datasets: &mut HashMap<NodeId, Dataset>,
    uses: &mut HashMap<NodeId, usize>,
    id: NodeId,
) -> Result<Dataset> {
    let remaining = uses.entry(id).or_default();
    *remaining = remaining.saturating_sub(1);
    let data = if *remaining == 0 {
        datasets.remove(&id)
    } else {
        datasets.get(&id).cloned()
    };
    data.ok_or_else(|| PlanError::MissingNode { node: id.raw() }.into())
}

/// Contiguous slices never splitting a key. Each slice aims at an even share
/// of the records left over the parts left.
fn split_at_keys(records: &[ShuffleRecord], parts: usize) -> Vec<&[ShuffleRecord]> {
    if records.is_empty() {
        return Vec::new();
    }
    let parts = parts.max(1);
    let mut chunks = Vec::with_capacity(parts);
    let mut start = 0;
    while start < records.len() {
        let parts_left = parts.saturating_sub(chunks.len()).max(1);
        let target = ((records.len() - start) / parts_left).max(1);
        let mut end = (start + target).min(records.len());
        while end < records.len() && records[end].key == records[end - 1].key {
            end += 1;
        }
        chunks.push(&records[start..end]);
        start = end;
    }
    chunks
}

fn arity_violation(node: &str, tuple: &Tuple, expected: usize) -> ExecError {
    ExecError::ArityViolation {
        node: node.to_string(),
        tuple: tuple.clone(),
        expected,
        actual: tuple.arity(),
    }
}

/// Run one per-record operation over a slice; returns the output and the
/// number of tuples a filter dropped.
fn apply_each(
    node: &str,
    op: &Operation,
    layout: &OperationLayout,
    width: Option<usize>,
    input: &[Tuple],
) -> Result<(Vec<Tuple>, usize)> {
    let mut out = Vec::with_capacity(input.len());
    let mut filtered = 0;
    for t in input {
        if let Some(w) = width {
            if t.arity() != w {
                return Err(arity_violation(node, t, w).into());
            }
        }
        let args = layout
            .args
            .apply(t)
            .ok_or_else(|| arity_violation(node, t, width.unwrap_or(0)))?;
        match &op.kind {
            OperationKind::Map(f) => {
                let results = f(&args).map_err(|source| ExecError::Operation {
                    node: node.to_string(),
                    source,
                })?;
                for r in results {
                    if let Some(d) = layout.declared_arity {
                        if r.arity() != d {
                            return Err(arity_violation(node, &r, d).into());
                        }
                    }
                    let merged = layout
                        .projection
                        .apply(t, &args, &r)
                        .ok_or_else(|| arity_violation(node, &r, layout.declared_arity.unwrap_or(0)))?;
                    out.push(merged);
                }
            }
            OperationKind::Filter(pred) => {
                if pred(&args) {
                    out.push(t.clone());
                } else {
                    filtered += 1;
                }
            }
            OperationKind::Assert { check, .. } => {
                check(&args).map_err(|message| ExecError::AssertionFailed {
                    node: node.to_string(),
                    tuple: t.clone(),
                    message,
                })?;
                out.push(t.clone());
            }
            OperationKind::Aggregate(_) => {
                return Err(PlanError::MisplacedOperation {
                    kind: op.kind.label().to_string(),
                    place: "a per-record node".to_string(),
                }
                .into());
            }
        }
    }
    Ok((out, filtered))
}

/// Fold one key group's joined tuples and merge the result into its current row.
fn aggregate_row(
    node: &str,
    op: &Operation,
    agg: &dyn Aggregator,
    layout: &OperationLayout,
    row: &GroupRow,
) -> Result<GroupRow> {
    let mut acc = agg.create();
    for v in &row.values {
        let args = layout
            .args
            .apply(v)
            .ok_or_else(|| arity_violation(node, v, op.min_arity))?;
        agg.add_input(&mut acc, &args)
            .map_err(|source| ExecError::Operation {
                node: node.to_string(),
                source,
            })?;
    }
    let result = agg.finish(acc);
    if let Some(d) = layout.declared_arity {
        if result.arity() != d {
            return Err(arity_violation(node, &result, d).into());
        }
    }
    let current = layout
        .projection
        .apply(&row.current, &Tuple::empty(), &result)
        .ok_or_else(|| arity_violation(node, &row.current, row.current.arity()))?;
    Ok(GroupRow {
        values: row.values.clone(),
        current,
    })
}
