//! Resolved schema scopes and the three-selector contract.
//!
//! A [`Scope`] is the concrete field layout flowing across one edge of the
//! pipeline graph. Per-record and per-group operations declare three
//! selectors (arguments, declared fields, output) and are resolved here,
//! once per node, against the scope of their incoming edge:
//!
//! 1. the argument selector is resolved against the incoming values and
//!    checked against the operation's minimum arity,
//! 2. the field declaration is resolved against the arguments (or left
//!    `UNKNOWN`),
//! 3. the output selector merges the declared fields with the incoming ones.
//!
//! Besides the outgoing `Scope`, resolution yields the position lists the
//! runner uses to project tuples, so no name lookup happens per record.

use crate::error::PlanError;
use crate::fields::{Field, FieldSelector, Fields, SelectorContext};
use crate::operation::{Operation, OperationKind};
use crate::tuple::Tuple;
use serde::Serialize;

/// What kind of node produced a scope.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum ScopeKind {
    Source,
    Each,
    Group,
    Every,
}

/// Resolved grouping selectors of one branch of a group node.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct BranchScope {
    pub name: String,
    pub key_fields: Fields,
    pub sort_fields: Option<Fields>,
    pub value_fields: Fields,
    #[serde(skip)]
    pub(crate) key_positions: Vec<usize>,
    #[serde(skip)]
    pub(crate) sort_positions: Option<Vec<usize>>,
    #[serde(skip)]
    pub(crate) value_positions: Vec<usize>,
}

/// Per-branch grouping state attached to a group node's outgoing edge.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct GroupingScope {
    pub branches: Vec<BranchScope>,
    pub repeat: usize,
    pub reverse_order: bool,
}

/// The resolved field sets attached to one graph edge.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Scope {
    pub kind: ScopeKind,
    pub arguments: Fields,
    pub declared: Fields,
    /// Values flowing downstream.
    pub outgoing: Fields,
    /// Grouping key established on this edge, named in `outgoing` terms.
    pub key_fields: Option<Fields>,
    /// Joined value fields of the enclosing group; set on group and
    /// aggregation edges only.
    pub group_values: Option<Fields>,
    pub grouping: Option<GroupingScope>,
}

impl Scope {
    /// Scope of a source emitting `fields`.
    #[must_use]
    pub fn source(fields: Fields) -> Self {
        Self {
            kind: ScopeKind::Source,
            arguments: Fields::none(),
            declared: fields.clone(),
            outgoing: fields,
            key_fields: None,
            group_values: None,
            grouping: None,
        }
    }
}

/// How the arguments of an operation are cut out of the incoming tuple.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) enum ArgSelect {
    All,
    Positions(Vec<usize>),
}

impl ArgSelect {
    pub(crate) fn apply(&self, incoming: &Tuple) -> Option<Tuple> {
        match self {
            Self::All => Some(incoming.clone()),
            Self::Positions(p) => incoming.select(p),
        }
    }
}

/// One slot of an explicit output re-selection.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Slot {
    Incoming(usize),
    Declared(usize),
}

/// How an operation's result is merged with its incoming tuple.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) enum Projection {
    /// Pass the incoming tuple through (filters and assertions).
    Incoming,
    Results,
    Append,
    Arguments,
    /// Overwrite the argument positions with the result values.
    Replace(Vec<usize>),
    /// Keep these incoming positions, then append the result.
    Swap(Vec<usize>),
    Select(Vec<Slot>),
}

impl Projection {
    pub(crate) fn apply(&self, incoming: &Tuple, args: &Tuple, result: &Tuple) -> Option<Tuple> {
        match self {
            Self::Incoming => Some(incoming.clone()),
            Self::Results => Some(result.clone()),
            Self::Append => Some(incoming.append(result)),
            Self::Arguments => Some(args.clone()),
            Self::Replace(positions) => {
                let mut out = incoming.clone();
                for (slot, &pos) in positions.iter().enumerate() {
                    out.set(pos, result.get(slot)?.clone())?;
                }
                Some(out)
            }
            Self::Swap(kept) => Some(incoming.select(kept)?.append(result)),
            Self::Select(slots) => slots
                .iter()
                .map(|slot| match slot {
                    Slot::Incoming(i) => incoming.get(*i).cloned(),
                    Slot::Declared(i) => result.get(*i).cloned(),
                })
                .collect::<Option<Vec<_>>>()
                .map(Tuple::new),
        }
    }
}

/// Runtime layout of a resolved operation.
#[derive(Clone, Debug)]
pub(crate) struct OperationLayout {
    pub(crate) args: ArgSelect,
    pub(crate) projection: Projection,
    pub(crate) declared_arity: Option<usize>,
}

/// Resolve a projection-style selector to fields plus their source positions.
pub(crate) fn select_positions(
    selector: &FieldSelector,
    ctx: &SelectorContext<'_>,
) -> Result<(Fields, ArgSelect), PlanError> {
    let source = ctx.source;
    match selector {
        FieldSelector::All if source.is_unknown() => Ok((Fields::unknown(), ArgSelect::All)),
        FieldSelector::All => Ok((source.clone(), ArgSelect::Positions((0..source.len()).collect()))),
        FieldSelector::None => Ok((Fields::none(), ArgSelect::Positions(Vec::new()))),
        FieldSelector::Select(sel) if source.is_unknown() => {
            let positions = source.positions(sel)?;
            Ok((sel.clone(), ArgSelect::Positions(positions)))
        }
        FieldSelector::Select(sel) => {
            sel.validate_unique()?;
            let positions = source.positions(sel)?;
            Ok((source.at(&positions), ArgSelect::Positions(positions)))
        }
        FieldSelector::GroupKeys | FieldSelector::Values => {
            if source.is_unknown() {
                return Err(PlanError::invalid(selector, "a selector over unknown fields"));
            }
            let fields = selector.resolve(ctx)?;
            let positions = source.positions(&fields)?;
            Ok((fields, ArgSelect::Positions(positions)))
        }
        other => Err(PlanError::invalid(other, "an argument selector")),
    }
}

fn resolve_declared(selector: &FieldSelector, arguments: &Fields) -> Result<Fields, PlanError> {
    match selector {
        FieldSelector::Select(fields) => {
            fields.validate_unique()?;
            Ok(fields.clone())
        }
        FieldSelector::All | FieldSelector::Arguments => Ok(arguments.clone()),
        FieldSelector::Unknown => Ok(Fields::unknown()),
        FieldSelector::None => Ok(Fields::none()),
        other => Err(PlanError::invalid(other, "a field declaration")),
    }
}

fn slot_for(field: &Field, incoming: &Fields, declared: &Fields) -> Option<Slot> {
    match field {
        Field::Name(_) => {
            let one = Fields::new([field.clone()]);
            if let Ok(p) = declared.positions(&one) {
                return Some(Slot::Declared(p[0]));
            }
            incoming.positions(&one).ok().map(|p| Slot::Incoming(p[0]))
        }
        Field::Pos(p) => {
            // Positions index into `incoming ++ declared`.
            let total = i64::try_from(incoming.len() + declared.len()).ok()?;
            let idx = if *p < 0 { total + i64::from(*p) } else { i64::from(*p) };
            let idx = usize::try_from(idx).ok()?;
            if idx < incoming.len() {
                Some(Slot::Incoming(idx))
            } else if idx < incoming.len() + declared.len() {
                Some(Slot::Declared(idx - incoming.len()))
            } else {
                None
            }
        }
    }
}

/// Resolve an output selector against `incoming ∪ declared`.
///
/// Returns the outgoing fields and the projection used at runtime.
pub fn resolve_output(
    selector: &FieldSelector,
    incoming: &Fields,
    key_fields: Option<&Fields>,
    arguments: &Fields,
    declared: &Fields,
) -> Result<Fields, PlanError> {
    let args = if arguments.is_unknown() {
        ArgSelect::All
    } else {
        ArgSelect::Positions(incoming.positions(arguments).unwrap_or_default())
    };
    output_layout(selector, incoming, key_fields, arguments, &args, declared).map(|(f, _)| f)
}

fn output_layout(
    selector: &FieldSelector,
    incoming: &Fields,
    key_fields: Option<&Fields>,
    arguments: &Fields,
    args: &ArgSelect,
    declared: &Fields,
) -> Result<(Fields, Projection), PlanError> {
    let (outgoing, projection) = match selector {
        FieldSelector::Results => (declared.clone(), Projection::Results),
        FieldSelector::All => (incoming.append(declared)?, Projection::Append),
        FieldSelector::Arguments => (arguments.clone(), Projection::Arguments),
        FieldSelector::Replace => {
            let ArgSelect::Positions(positions) = args else {
                return Err(PlanError::invalid(selector, "an output over unknown arguments"));
            };
            if incoming.is_unknown() || declared.is_unknown() {
                return Err(PlanError::invalid(selector, "an output over unknown fields"));
            }
            if positions.len() != declared.len() {
                return Err(PlanError::ReplaceSizeMismatch {
                    arguments: positions.len(),
                    declared: declared.len(),
                });
            }
            let mut items: Vec<Field> = incoming.iter().cloned().collect();
            for (field, &pos) in declared.iter().zip(positions) {
                items[pos] = field.clone();
            }
            let out = Fields::new(items);
            out.validate_unique()?;
            (out, Projection::Replace(positions.clone()))
        }
        FieldSelector::Swap => {
            let ArgSelect::Positions(positions) = args else {
                return Err(PlanError::invalid(selector, "an output over unknown arguments"));
            };
            if incoming.is_unknown() {
                return Err(PlanError::invalid(selector, "an output over unknown fields"));
            }
            let kept = incoming.complement(positions);
            (incoming.at(&kept).append(declared)?, Projection::Swap(kept))
        }
        FieldSelector::Select(fields) => {
            fields.validate_unique()?;
            if incoming.is_unknown() && fields.iter().any(|f| matches!(f, Field::Pos(_))) {
                return Err(PlanError::invalid(selector, "a positional output over unknown fields"));
            }
            let mut slots = Vec::with_capacity(fields.len());
            let mut items = Vec::with_capacity(fields.len());
            let mut missing = Vec::new();
            for field in fields {
                match slot_for(field, incoming, declared) {
                    Some(slot) => {
                        let source = match slot {
                            Slot::Incoming(i) => incoming.at(&[i]),
                            Slot::Declared(i) => declared.at(&[i]),
                        };
                        items.push(source.iter().next().cloned().unwrap_or_else(|| field.clone()));
                        slots.push(slot);
                    }
                    None => missing.push(field.clone()),
                }
            }
            if !missing.is_empty() {
                let union = incoming.append(declared).unwrap_or_else(|_| incoming.clone());
                return Err(PlanError::unresolvable(Fields::new(missing), union));
            }
            let out = Fields::none().append(&Fields::new(items))?;
            (out, Projection::Select(slots))
        }
        FieldSelector::GroupKeys | FieldSelector::Values => {
            let ctx = SelectorContext::new(incoming).with_keys(key_fields);
            let (fields, select) = select_positions(selector, &ctx)?;
            let ArgSelect::Positions(positions) = select else {
                return Err(PlanError::invalid(selector, "an output over unknown fields"));
            };
            (fields, Projection::Select(positions.into_iter().map(Slot::Incoming).collect()))
        }
        FieldSelector::None => return Err(PlanError::empty("output selector NONE")),
        other => return Err(PlanError::invalid(other, "an output selector")),
    };
    if outgoing.is_empty() {
        return Err(PlanError::empty(format!("output selector {selector} selects no fields")));
    }
    Ok((outgoing, projection))
}

/// Keep the grouping key on an edge only while all of its names survive.
fn carry_keys(keys: Option<&Fields>, outgoing: &Fields) -> Option<Fields> {
    let keys = keys?;
    if outgoing.is_unknown() || keys.len() != keys.names().count() {
        return None;
    }
    keys.names()
        .all(|n| outgoing.contains_name(n))
        .then(|| keys.clone())
}

fn check_arity(op: &Operation, arguments: &Fields) -> Result<(), PlanError> {
    match arguments.arity() {
        Some(actual) if actual < op.min_arity => Err(PlanError::Arity {
            required: op.min_arity,
            actual,
        }),
        _ => Ok(()),
    }
}

/// Resolve a per-record operation (map, filter, assertion).
pub(crate) fn resolve_each(
    op: &Operation,
    incoming: &Scope,
) -> Result<(Scope, OperationLayout), PlanError> {
    if matches!(op.kind, OperationKind::Aggregate(_)) {
        return Err(PlanError::MisplacedOperation {
            kind: op.kind.label().to_string(),
            place: "a per-record node".to_string(),
        });
    }
    let ctx = SelectorContext::new(&incoming.outgoing).with_keys(incoming.key_fields.as_ref());
    let (arguments, args) = select_positions(&op.arguments, &ctx)?;
    check_arity(op, &arguments)?;

    if !matches!(op.kind, OperationKind::Map(_)) {
        let scope = Scope {
            kind: ScopeKind::Each,
            arguments,
            declared: Fields::none(),
            outgoing: incoming.outgoing.clone(),
            key_fields: incoming.key_fields.clone(),
            group_values: None,
            grouping: None,
        };
        let layout = OperationLayout {
            args,
            projection: Projection::Incoming,
            declared_arity: None,
        };
        return Ok((scope, layout));
    }

    let declared = resolve_declared(&op.declared, &arguments)?;
    if declared.is_empty() {
        return Err(PlanError::empty(format!("{} declares no fields", op.name)));
    }
    let (outgoing, projection) = output_layout(
        &op.output,
        &incoming.outgoing,
        incoming.key_fields.as_ref(),
        &arguments,
        &args,
        &declared,
    )?;
    let key_fields = carry_keys(incoming.key_fields.as_ref(), &outgoing);
    let layout = OperationLayout {
        args,
        projection,
        declared_arity: declared.arity(),
    };
    Ok((
        Scope {
            kind: ScopeKind::Each,
            arguments,
            declared,
            outgoing,
            key_fields,
            group_values: None,
            grouping: None,
        },
        layout,
    ))
}

/// Resolve an aggregation chained after a group (or another aggregation).
///
/// Arguments are drawn from the group's joined value fields; the incoming
/// fields for the output merge are the group keys plus every result produced
/// by the aggregations chained before this one.
pub(crate) fn resolve_every(
    op: &Operation,
    incoming: &Scope,
) -> Result<(Scope, OperationLayout), PlanError> {
    if !matches!(op.kind, OperationKind::Aggregate(_)) {
        return Err(PlanError::MisplacedOperation {
            kind: op.kind.label().to_string(),
            place: "an aggregation chain".to_string(),
        });
    }
    let Some(values) = incoming.group_values.as_ref() else {
        return Err(PlanError::EveryWithoutGroup);
    };
    let ctx = SelectorContext::new(values).with_keys(incoming.key_fields.as_ref());
    let (arguments, args) = match select_positions(&op.arguments, &ctx) {
        Ok(ok) => ok,
        Err(err) => {
            if let FieldSelector::Select(sel) = &op.arguments {
                if let Some(name) = sel
                    .names()
                    .find(|n| !values.contains_name(n) && incoming.outgoing.contains_name(n))
                {
                    return Err(PlanError::ChainedAggregation {
                        field: name.to_string(),
                    });
                }
            }
            return Err(err);
        }
    };
    check_arity(op, &arguments)?;

    let declared = resolve_declared(&op.declared, &arguments)?;
    if declared.is_unknown() {
        return Err(PlanError::invalid(&op.declared, "an aggregation declaration"));
    }
    if declared.is_empty() {
        return Err(PlanError::empty(format!("{} declares no fields", op.name)));
    }
    if matches!(
        op.output,
        FieldSelector::Arguments | FieldSelector::Replace | FieldSelector::Swap
    ) {
        return Err(PlanError::invalid(&op.output, "an aggregation output"));
    }
    let (outgoing, projection) = output_layout(
        &op.output,
        &incoming.outgoing,
        incoming.key_fields.as_ref(),
        &arguments,
        &args,
        &declared,
    )?;
    let key_fields = carry_keys(incoming.key_fields.as_ref(), &outgoing);
    let layout = OperationLayout {
        args,
        projection,
        declared_arity: declared.arity(),
    };
    Ok((
        Scope {
            kind: ScopeKind::Every,
            arguments,
            declared,
            outgoing,
            key_fields,
            group_values: Some(values.clone()),
            grouping: None,
        },
        layout,
    ))
}
