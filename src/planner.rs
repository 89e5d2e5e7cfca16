//! Plan builder and execution explanation.
//!
//! [`Plan::build`] resolves the subgraph that ends at a terminal node in a
//! single topological pass over the pipeline's flat node table:
//!
//! 1. **Collect** the terminal's ancestors and order them with Kahn's
//!    algorithm (ties broken by node id, so plans are deterministic).
//! 2. **Resolve** each node's outgoing [`Scope`] from the scopes of its
//!    inputs, caching the result per edge in a [`ScopeTable`].
//! 3. **Strip** assertions above the configured [`AssertionLevel`]; they
//!    become pass-through steps.
//!
//! Every plan-time error surfaces here, before any tuple flows.

use crate::assertion::AssertionLevel;
use crate::error::PlanError;
use crate::group::GroupSpec;
use crate::node::Node;
use crate::node_id::NodeId;
use crate::operation::{Operation, OperationKind};
use crate::pipeline::{NodeEntry, Pipeline};
use crate::scope::{GroupingScope, OperationLayout, Scope, ScopeKind, resolve_each, resolve_every};
use crate::tuple::Tuple;
use anyhow::Result;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt::{Display, Formatter, Result as FormatResult};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// One graph edge: `slot` is the input position on `to`; the terminal's
/// outgoing edge has `to == None`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct Edge {
    pub from: NodeId,
    pub to: Option<NodeId>,
    pub slot: usize,
}

/// Resolved scopes keyed by edge.
#[derive(Clone, Debug, Default)]
pub struct ScopeTable {
    edges: BTreeMap<Edge, Scope>,
}

impl ScopeTable {
    #[must_use]
    pub fn get(&self, edge: &Edge) -> Option<&Scope> {
        self.edges.get(edge)
    }

    /// The scope leaving `node` on any of its edges.
    #[must_use]
    pub fn outgoing(&self, node: NodeId) -> Option<&Scope> {
        let first = Edge {
            from: node,
            to: None,
            slot: 0,
        };
        self.edges
            .range(first..)
            .next()
            .filter(|(e, _)| e.from == node)
            .map(|(_, s)| s)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.edges.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.edges.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Edge, &Scope)> {
        self.edges.iter()
    }
}

/// Executable form of one node.
#[derive(Clone, Debug)]
pub(crate) enum Step {
    Source {
        data: Arc<Vec<Tuple>>,
        arity: Option<usize>,
    },
    Each {
        op: Operation,
        layout: OperationLayout,
    },
    /// A stripped assertion.
    PassThrough,
    Every {
        op: Operation,
        layout: OperationLayout,
    },
    Group {
        spec: GroupSpec,
        grouping: GroupingScope,
    },
}

#[derive(Clone, Debug)]
pub(crate) struct PlannedNode {
    pub(crate) id: NodeId,
    pub(crate) name: String,
    pub(crate) inputs: Vec<NodeId>,
    pub(crate) step: Step,
}

/// A resolved, executable plan.
pub struct Plan {
    pub(crate) nodes: Vec<PlannedNode>,
    /// Resolved scope of every edge of the planned subgraph.
    pub scopes: ScopeTable,
    pub terminal: NodeId,
    pub assertion_level: AssertionLevel,
    /// Optional suggested partition count (runner may override).
    pub suggested_partitions: Option<usize>,
    /// Decisions made during planning.
    pub optimizations: Vec<OptimizationDecision>,
}

/// Represents a decision made by the planner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OptimizationDecision {
    /// Assertions above the plan's level were replaced by pass-through steps.
    StrippedAssertions { count: usize, level: AssertionLevel },
    /// Whether a group streams its driver branch instead of buffering it.
    DriverStreaming { group: String, streamed: bool },
    /// Partition count suggestion.
    PartitionSuggestion {
        source_len: Option<usize>,
        partitions: usize,
    },
}

impl Plan {
    /// Resolve the subgraph ending at `terminal`.
    ///
    /// # Errors
    ///
    /// A [`PlanError`] (wrapped with the failing node's name) for any
    /// unresolvable selector, arity violation, misplaced operation, missing
    /// node or cycle.
    pub fn build(p: &Pipeline, terminal: NodeId, level: AssertionLevel) -> Result<Self> {
        let table = p.snapshot();
        let order = topo_order(&table, terminal)?;

        let mut by_node: HashMap<NodeId, Scope> = HashMap::with_capacity(order.len());
        let mut scopes = ScopeTable::default();
        let mut nodes = Vec::with_capacity(order.len());
        let mut stripped = 0usize;
        let mut optimizations = Vec::new();
        let mut source_len = 0usize;

        for id in order {
            let entry = &table[id.index()];
            let label = format!("{} '{}'", entry.node.label(), entry.node.name());
            let incoming: Vec<&Scope> = entry
                .inputs
                .iter()
                .map(|i| by_node.get(i).ok_or(PlanError::MissingNode { node: i.raw() }))
                .collect::<Result<_, _>>()?;

            let (scope, step) = match &entry.node {
                Node::Source { fields, data, .. } => {
                    source_len += data.len();
                    let step = Step::Source {
                        data: Arc::clone(data),
                        arity: fields.arity(),
                    };
                    (Scope::source(fields.clone()), step)
                }
                Node::Each(op) => {
                    let input = single_input(&incoming, id)?;
                    if let OperationKind::Assert { level: tagged, .. } = &op.kind {
                        if !level.keeps(*tagged) {
                            warn!(node = %label, tagged = ?tagged, plan = ?level, "assertion stripped");
                            stripped += 1;
                            let input = input.clone();
                            record_edges(&mut scopes, entry, &incoming);
                            by_node.insert(id, input);
                            nodes.push(planned(entry, Step::PassThrough));
                            continue;
                        }
                    }
                    let (scope, layout) = resolve_each(op, input).map_err(|e| e.in_node(&label))?;
                    let step = Step::Each {
                        op: op.clone(),
                        layout,
                    };
                    (scope, step)
                }
                Node::Every(op) => {
                    let input = aggregation_base(single_input(&incoming, id)?);
                    let (scope, layout) = resolve_every(op, &input).map_err(|e| e.in_node(&label))?;
                    let step = Step::Every {
                        op: op.clone(),
                        layout,
                    };
                    (scope, step)
                }
                Node::Group(spec) => {
                    let scope = spec
                        .outgoing_scope_for(&incoming)
                        .map_err(|e| e.in_node(&label))?;
                    let grouping = scope.grouping.clone().ok_or(PlanError::NoBranches)?;
                    optimizations.push(OptimizationDecision::DriverStreaming {
                        group: spec.name.clone(),
                        streamed: spec.repeat <= 1,
                    });
                    let step = Step::Group {
                        spec: spec.clone(),
                        grouping,
                    };
                    (scope, step)
                }
            };
            debug!(node = %label, outgoing = %scope.outgoing, "resolved scope");
            record_edges(&mut scopes, entry, &incoming);
            by_node.insert(id, scope);
            nodes.push(planned(entry, step));
        }

        let terminal_scope = by_node
            .remove(&terminal)
            .ok_or(PlanError::MissingNode { node: terminal.raw() })?;
        scopes.edges.insert(
            Edge {
                from: terminal,
                to: None,
                slot: 0,
            },
            terminal_scope,
        );

        if stripped > 0 {
            optimizations.push(OptimizationDecision::StrippedAssertions {
                count: stripped,
                level,
            });
        }
        let suggested = suggest_partitions(Some(source_len));
        if let Some(parts) = suggested {
            optimizations.push(OptimizationDecision::PartitionSuggestion {
                source_len: Some(source_len),
                partitions: parts,
            });
        }
        info!(terminal = %terminal, nodes = nodes.len(), edges = scopes.len(), "plan built");

        Ok(Self {
            nodes,
            scopes,
            terminal,
            assertion_level: level,
            suggested_partitions: suggested,
            optimizations,
        })
    }

    /// Outgoing scope of the terminal node.
    #[must_use]
    pub fn output_scope(&self) -> Option<&Scope> {
        self.scopes.outgoing(self.terminal)
    }
}

fn planned(entry: &NodeEntry, step: Step) -> PlannedNode {
    PlannedNode {
        id: entry.id,
        name: entry.node.name().to_string(),
        inputs: entry.inputs.clone(),
        step,
    }
}

fn single_input<'s>(incoming: &[&'s Scope], id: NodeId) -> Result<&'s Scope, PlanError> {
    incoming
        .first()
        .copied()
        .ok_or(PlanError::MissingNode { node: id.raw() })
}

/// Record the scope flowing across each input edge of `entry`.
fn record_edges(scopes: &mut ScopeTable, entry: &NodeEntry, incoming: &[&Scope]) {
    for (slot, (from, scope)) in entry.inputs.iter().zip(incoming).enumerate() {
        scopes.edges.insert(
            Edge {
                from: *from,
                to: Some(entry.id),
                slot,
            },
            (*scope).clone(),
        );
    }
}

/// The scope an aggregation chain starts from: the group key alone is the
/// first "current" tuple.
fn aggregation_base(incoming: &Scope) -> Scope {
    if incoming.kind != ScopeKind::Group {
        return incoming.clone();
    }
    let keys = incoming.key_fields.clone().unwrap_or_default();
    Scope {
        outgoing: keys.clone(),
        key_fields: Some(keys),
        ..incoming.clone()
    }
}

/// Ancestors of `terminal` in topological order.
fn topo_order(table: &[NodeEntry], terminal: NodeId) -> Result<Vec<NodeId>, PlanError> {
    let lookup = |id: NodeId| {
        table
            .get(id.index())
            .filter(|e| e.id == id)
            .ok_or(PlanError::MissingNode { node: id.raw() })
    };

    let mut ancestors = BTreeSet::new();
    let mut stack = vec![terminal];
    while let Some(id) = stack.pop() {
        if ancestors.insert(id) {
            stack.extend(lookup(id)?.inputs.iter().copied());
        }
    }

    let mut indegree: HashMap<NodeId, usize> = HashMap::new();
    let mut consumers: HashMap<NodeId, Vec<NodeId>> = HashMap::new();
    for &id in &ancestors {
        let entry = lookup(id)?;
        indegree.insert(id, entry.inputs.len());
        for &input in &entry.inputs {
            consumers.entry(input).or_default().push(id);
        }
    }

    let mut ready: BTreeSet<NodeId> = indegree
        .iter()
        .filter(|(_, d)| **d == 0)
        .map(|(id, _)| *id)
        .collect();
    let mut order = Vec::with_capacity(ancestors.len());
    while let Some(id) = ready.pop_first() {
        order.push(id);
        for next in consumers.get(&id).into_iter().flatten() {
            if let Some(d) = indegree.get_mut(next) {
                *d -= 1;
                if *d == 0 {
                    ready.insert(*next);
                }
            }
        }
    }
    if order.len() == ancestors.len() {
        Ok(order)
    } else {
        Err(PlanError::Cycle)
    }
}

/* ---------- Adaptive partitions ---------- */

/// Suggest a parallelism level from an optional input length hint.
/// Heuristic target ≈ 64k tuples/partition, then clamped between
/// `[num_cpus, 8*num_cpus]`.
fn suggest_partitions(len_hint: Option<usize>) -> Option<usize> {
    let n = len_hint?;
    let target_rows_per_part = 64_000usize;
    let hw = num_cpus::get().max(2);
    Some(n.div_ceil(target_rows_per_part).clamp(hw, hw * 8))
}

/* ---------- Explain ---------- */

/// Detailed explanation of an execution plan.
#[derive(Debug, Clone)]
pub struct ExecutionExplanation {
    pub steps: Vec<ExplainStep>,
    pub cost_estimate: CostEstimate,
    pub optimizations: Vec<OptimizationDecision>,
    pub suggested_partitions: Option<usize>,
}

/// A single step in the execution plan.
#[derive(Debug, Clone)]
pub struct ExplainStep {
    pub step: usize,
    pub node_type: String,
    pub description: String,
    /// Outgoing fields of the step.
    pub fields: String,
    /// Whether this step needs every input tuple before emitting (a shuffle).
    pub is_barrier: bool,
    pub cost_hint: u64,
}

/// Cost estimates for the execution plan.
#[derive(Debug, Clone)]
pub struct CostEstimate {
    pub barriers: usize,
    pub total_ops: usize,
    pub record_ops: usize,
    pub aggregations: usize,
    pub source_size: Option<usize>,
}

impl Plan {
    /// Generate a step-by-step explanation of the plan.
    #[must_use]
    pub fn explain(&self) -> ExecutionExplanation {
        let mut steps = Vec::with_capacity(self.nodes.len());
        let mut barriers = 0;
        let mut total_ops = 0;
        let mut record_ops = 0;
        let mut aggregations = 0;
        let mut source_size = 0;

        for (idx, node) in self.nodes.iter().enumerate() {
            let (node_type, description, is_barrier, cost) = match &node.step {
                Step::Source { data, .. } => {
                    source_size += data.len();
                    (
                        "Source",
                        format!("Read '{}' ({} tuples)", node.name, data.len()),
                        false,
                        1,
                    )
                }
                Step::Each { op, .. } => {
                    record_ops += 1;
                    total_ops += 1;
                    let cost = if matches!(op.kind, OperationKind::Map(_)) { 10 } else { 1 };
                    (
                        "Each",
                        format!("{} '{}' over {}", op.kind.label(), op.name, op.arguments),
                        false,
                        cost,
                    )
                }
                Step::PassThrough => (
                    "Each",
                    format!("assertion '{}' stripped at level {:?}", node.name, self.assertion_level),
                    false,
                    0,
                ),
                Step::Every { op, .. } => {
                    aggregations += 1;
                    total_ops += 1;
                    (
                        "Every",
                        format!("aggregate '{}' over {} into {}", op.name, op.arguments, op.declared),
                        false,
                        50,
                    )
                }
                Step::Group { spec, grouping } => {
                    barriers += 1;
                    total_ops += 1;
                    let keys = grouping
                        .branches
                        .first()
                        .map(|b| b.key_fields.to_string())
                        .unwrap_or_default();
                    let shape = if spec.repeat > 1 {
                        format!("{}-way self-join", spec.repeat)
                    } else {
                        format!("{} branch(es)", spec.branches.len())
                    };
                    (
                        "Group",
                        format!("{} join '{}' of {shape} on {keys} (BARRIER)", spec.strategy.name(), spec.name),
                        true,
                        100u64.saturating_mul(u64::try_from(spec.logical_branches()).unwrap_or(u64::MAX)),
                    )
                }
            };
            let fields = self
                .scopes
                .outgoing(node.id)
                .map(|s| s.outgoing.to_string())
                .unwrap_or_default();
            steps.push(ExplainStep {
                step: idx + 1,
                node_type: node_type.to_string(),
                description,
                fields,
                is_barrier,
                cost_hint: cost,
            });
        }

        ExecutionExplanation {
            steps,
            cost_estimate: CostEstimate {
                barriers,
                total_ops,
                record_ops,
                aggregations,
                source_size: Some(source_size),
            },
            optimizations: self.optimizations.clone(),
            suggested_partitions: self.suggested_partitions,
        }
    }
}

impl Display for ExecutionExplanation {
    fn fmt(&self, f: &mut Formatter<'_>) -> FormatResult {
        writeln!(f, "╔═══════════════════════════════════════════════════════════════╗")?;
        writeln!(f, "║              EXECUTION PLAN EXPLANATION                       ║")?;
        writeln!(f, "╚═══════════════════════════════════════════════════════════════╝")?;
        writeln!(f)?;

        writeln!(f, "┌─ COST ESTIMATES ─────────────────────────────────────────────┐")?;
        writeln!(
            f,
            "│ Source Size:       {:>10}",
            self.cost_estimate
                .source_size
                .map_or_else(|| "Unknown".to_string(), |s| s.to_string())
        )?;
        writeln!(f, "│ Total Operations:  {:>10}", self.cost_estimate.total_ops)?;
        writeln!(f, "│ Per-Record Ops:    {:>10}", self.cost_estimate.record_ops)?;
        writeln!(f, "│ Aggregations:      {:>10}", self.cost_estimate.aggregations)?;
        writeln!(f, "│ Barrier Ops:       {:>10}", self.cost_estimate.barriers)?;
        if let Some(parts) = self.suggested_partitions {
            writeln!(f, "│ Suggested Parts:   {parts:>10}")?;
        }
        writeln!(f, "└──────────────────────────────────────────────────────────────┘")?;
        writeln!(f)?;

        writeln!(f, "┌─ EXECUTION STEPS ────────────────────────────────────────────┐")?;
        for step in &self.steps {
            let barrier_marker = if step.is_barrier { " [BARRIER]" } else { "" };
            writeln!(f, "│")?;
            writeln!(f, "│ Step {}: {}{}", step.step, step.node_type, barrier_marker)?;
            writeln!(f, "│   {}", step.description)?;
            writeln!(f, "│   Fields: {}", step.fields)?;
            writeln!(f, "│   Cost: {}", step.cost_hint)?;
        }
        writeln!(f, "│")?;
        writeln!(f, "└──────────────────────────────────────────────────────────────┘")?;

        if !self.optimizations.is_empty() {
            writeln!(f)?;
            writeln!(f, "┌─ PLANNER DECISIONS ──────────────────────────────────────────┐")?;
            for opt in &self.optimizations {
                match opt {
                    OptimizationDecision::StrippedAssertions { count, level } => {
                        writeln!(f, "│ • Stripped Assertions")?;
                        writeln!(f, "│   Removed {count} assertion(s) above level {level:?}")?;
                    }
                    OptimizationDecision::DriverStreaming { group, streamed } => {
                        writeln!(f, "│ • Driver Branch of '{group}'")?;
                        if *streamed {
                            writeln!(f, "│   Streamed; only branches 1..N are buffered")?;
                        } else {
                            writeln!(f, "│   Buffered for self-join replay")?;
                        }
                    }
                    OptimizationDecision::PartitionSuggestion {
                        source_len,
                        partitions,
                    } => {
                        writeln!(f, "│ • Partition Count Suggestion")?;
                        if let Some(len) = source_len {
                            writeln!(
                                f,
                                "│   Based on source size {len}, suggest {partitions} partitions"
                            )?;
                        } else {
                            writeln!(f, "│   Suggest {partitions} partitions")?;
                        }
                    }
                }
            }
            writeln!(f, "└──────────────────────────────────────────────────────────────┘")?;
        }

        Ok(())
    }
}
