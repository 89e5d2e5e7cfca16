//! Group nodes: multi-branch grouping and join specifications.
//!
//! A [`GroupSpec`] names 1..N branches, each with a key selector and an
//! optional secondary sort selector, plus an optional explicit declaration of
//! the joined value fields, a self-join `repeat` factor, a `reverse_order`
//! flag, and the [`JoinStrategy`] used at runtime.
//!
//! The value fields of a branch are its incoming fields minus its key. A
//! group's outgoing fields are the key (named after branch 0) followed by the
//! joined value fields of every logical branch, so for
//!
//! ```text
//! left  = (k, v)     right = (k, w)     key = k
//! ```
//!
//! the outgoing fields are `(k, v, w)`.

use crate::error::PlanError;
use crate::fields::{FieldSelector, Fields, SelectorContext};
use crate::grouping::strategy::{InnerJoin, JoinStrategy};
use crate::scope::{ArgSelect, BranchScope, GroupingScope, Scope, ScopeKind, select_positions};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::debug;

/// One input of a group node.
#[derive(Clone, Debug)]
pub struct Branch {
    pub name: String,
    pub key: FieldSelector,
    pub sort: Option<FieldSelector>,
}

impl Branch {
    pub fn new(name: impl Into<String>, key: impl Into<FieldSelector>) -> Self {
        Self {
            name: name.into(),
            key: key.into(),
            sort: None,
        }
    }

    #[must_use]
    pub fn sorted_by(mut self, sort: impl Into<FieldSelector>) -> Self {
        self.sort = Some(sort.into());
        self
    }
}

#[derive(Clone, Debug)]
pub struct GroupSpec {
    pub name: String,
    pub branches: Vec<Branch>,
    pub declared: Option<Fields>,
    pub repeat: usize,
    pub reverse_order: bool,
    pub strategy: Arc<dyn JoinStrategy>,
}

impl GroupSpec {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            branches: Vec::new(),
            declared: None,
            repeat: 1,
            reverse_order: false,
            strategy: Arc::new(InnerJoin),
        }
    }

    #[must_use]
    pub fn branch(mut self, branch: Branch) -> Self {
        self.branches.push(branch);
        self
    }

    #[must_use]
    pub fn with_declared(mut self, declared: Fields) -> Self {
        self.declared = Some(declared);
        self
    }

    #[must_use]
    pub const fn with_repeat(mut self, repeat: usize) -> Self {
        self.repeat = repeat;
        self
    }

    #[must_use]
    pub const fn reversed(mut self, reverse_order: bool) -> Self {
        self.reverse_order = reverse_order;
        self
    }

    #[must_use]
    pub fn with_strategy(mut self, strategy: Arc<dyn JoinStrategy>) -> Self {
        self.strategy = strategy;
        self
    }

    /// Branches the join strategy sees: the physical branches, or `repeat`
    /// copies of the single branch of a self-join.
    #[must_use]
    pub fn logical_branches(&self) -> usize {
        self.branches.len() * self.repeat.max(1)
    }

    fn validate_shape(&self, inputs: usize) -> Result<(), PlanError> {
        if self.branches.is_empty() {
            return Err(PlanError::NoBranches);
        }
        if self.repeat == 0 || (self.repeat > 1 && self.branches.len() != 1) {
            return Err(PlanError::InvalidRepeat {
                repeat: self.repeat,
                branches: self.branches.len(),
            });
        }
        if inputs != self.branches.len() {
            return Err(PlanError::invalid(
                format!("{inputs} input(s)"),
                format!("a group of {} branch(es)", self.branches.len()),
            ));
        }
        let mut names = HashSet::new();
        for b in &self.branches {
            if !names.insert(b.name.as_str()) {
                return Err(PlanError::DuplicateBranch {
                    branch: b.name.clone(),
                });
            }
        }
        self.strategy.validate(self.logical_branches())
    }

    /// Resolve the outgoing scope from the incoming scope of every branch,
    /// in branch-registration order.
    ///
    /// # Errors
    ///
    /// Any [`PlanError`] of the grouping contract: key arity mismatch across
    /// branches, unresolvable key or sort fields, a declaration whose size is
    /// not `sum(value fields) * repeat`, or colliding auto-concatenated names.
    pub fn outgoing_scope_for(&self, incoming: &[&Scope]) -> Result<Scope, PlanError> {
        self.validate_shape(incoming.len())?;

        let mut branches = Vec::with_capacity(self.branches.len());
        for (branch, scope) in self.branches.iter().zip(incoming) {
            let resolved = resolve_branch(branch, scope)?;
            if let Some(first) = branches.first() {
                let first: &BranchScope = first;
                if resolved.key_fields.len() != first.key_fields.len() {
                    return Err(PlanError::GroupArityMismatch {
                        branch: branch.name.clone(),
                        expected: first.key_fields.len(),
                        actual: resolved.key_fields.len(),
                    });
                }
            }
            branches.push(resolved);
        }

        let value_size: usize = branches.iter().map(|b| b.value_fields.len()).sum();
        let declared = match &self.declared {
            Some(declared) => {
                if declared.is_unknown() {
                    return Err(PlanError::invalid(declared, "a group declaration"));
                }
                declared.validate_unique()?;
                let expected = value_size * self.repeat;
                if declared.len() != expected {
                    return Err(PlanError::DeclaredFieldSizeMismatch {
                        declared: declared.len(),
                        expected,
                    });
                }
                declared.clone()
            }
            None => {
                let mut out = Fields::none();
                for _ in 0..self.repeat {
                    for b in &branches {
                        out = out.append(&b.value_fields)?;
                    }
                }
                out
            }
        };

        let keys = &branches[0].key_fields;
        let outgoing = keys.append(&declared)?;
        if outgoing.is_empty() {
            return Err(PlanError::empty(format!("group '{}' selects no fields", self.name)));
        }
        let key_fields = outgoing.at(&(0..keys.len()).collect::<Vec<_>>());
        debug!(group = %self.name, keys = %key_fields, outgoing = %outgoing, "resolved group scope");

        Ok(Scope {
            kind: ScopeKind::Group,
            arguments: Fields::none(),
            declared,
            outgoing: outgoing.clone(),
            key_fields: Some(key_fields),
            group_values: Some(outgoing),
            grouping: Some(GroupingScope {
                branches,
                repeat: self.repeat,
                reverse_order: self.reverse_order,
            }),
        })
    }
}

fn check_role(selector: &FieldSelector, role: &str) -> Result<(), PlanError> {
    match selector {
        FieldSelector::Arguments
        | FieldSelector::Results
        | FieldSelector::Unknown
        | FieldSelector::Replace
        | FieldSelector::Swap => Err(PlanError::invalid(selector, role)),
        _ => Ok(()),
    }
}

fn resolve_branch(branch: &Branch, scope: &Scope) -> Result<BranchScope, PlanError> {
    let source = &scope.outgoing;
    if source.is_unknown() {
        return Err(PlanError::invalid("UNKNOWN", format!("the input of branch '{}'", branch.name)));
    }
    let ctx = SelectorContext::new(source).with_keys(scope.key_fields.as_ref());
    let resolve = |selector: &FieldSelector, role: &str| -> Result<(Fields, Vec<usize>), PlanError> {
        check_role(selector, role)?;
        let (fields, select) = select_positions(selector, &ctx)?;
        let positions = match select {
            ArgSelect::Positions(p) => p,
            ArgSelect::All => (0..source.len()).collect(),
        };
        Ok((fields, positions))
    };

    let (key_fields, key_positions) = resolve(&branch.key, "a grouping key")?;
    let (sort_fields, sort_positions) = match &branch.sort {
        Some(sort) => {
            let (f, p) = resolve(sort, "a sort key")?;
            (Some(f), Some(p))
        }
        None => (None, None),
    };
    let value_positions = source.complement(&key_positions);
    Ok(BranchScope {
        name: branch.name.clone(),
        key_fields,
        sort_fields,
        value_fields: source.at(&value_positions),
        key_positions,
        sort_positions,
        value_positions,
    })
}
