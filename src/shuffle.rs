//! In-process stand-in for the sort/shuffle substrate.
//!
//! [`LocalShuffle`] tags each branch's tuples, cuts out key, sort and value
//! tuples using the positions resolved at plan time, and stably sorts the
//! records by key, then branch, then sort key. Within a key group the driver
//! branch (tag 0) is delivered last, so a [`GroupingClosure`] can stream it
//! after buffering every other branch.
//!
//! [`GroupingClosure`]: crate::grouping::GroupingClosure

use crate::error::ExecError;
use crate::grouping::{ClosureLayout, ShuffleRecord, SpillConfig};
use crate::metrics::MetricsCollector;
use crate::scope::GroupingScope;
use crate::tuple::Tuple;
use anyhow::Result;
use std::cmp::Ordering;

pub struct LocalShuffle<'s> {
    grouping: &'s GroupingScope,
}

impl<'s> LocalShuffle<'s> {
    #[must_use]
    pub const fn new(grouping: &'s GroupingScope) -> Self {
        Self { grouping }
    }

    /// Keys run in descending order only when `reverse_order` is set and no
    /// branch has a secondary sort; otherwise the flag reverses sort keys.
    #[must_use]
    pub fn descending_keys(&self) -> bool {
        self.grouping.reverse_order
            && self.grouping.branches.iter().all(|b| b.sort_positions.is_none())
    }

    /// Closure layout matching the records this shuffle produces.
    #[must_use]
    pub fn closure_layout(&self, spill: SpillConfig, metrics: Option<MetricsCollector>) -> ClosureLayout {
        ClosureLayout::new(
            self.grouping
                .branches
                .iter()
                .map(|b| b.value_positions.len())
                .collect(),
        )
        .with_repeat(self.grouping.repeat)
        .driver_last(true)
        .with_spill(spill)
        .with_metrics(metrics)
    }

    /// Turn one tuple of `branch` into a shuffle record.
    ///
    /// # Errors
    ///
    /// [`ExecError::ArityViolation`] if the tuple is narrower than the
    /// branch's resolved fields, [`ExecError::UnknownBranch`] for a bad tag.
    pub fn tag(&self, branch: usize, tuple: &Tuple) -> Result<ShuffleRecord> {
        let scope = self
            .grouping
            .branches
            .get(branch)
            .ok_or(ExecError::UnknownBranch {
                tag: branch,
                branches: self.grouping.branches.len(),
            })?;
        let violation = || ExecError::ArityViolation {
            node: scope.name.clone(),
            tuple: tuple.clone(),
            expected: scope.key_positions.len() + scope.value_positions.len(),
            actual: tuple.arity(),
        };
        let key = tuple.select(&scope.key_positions).ok_or_else(violation)?;
        let value = tuple.select(&scope.value_positions).ok_or_else(violation)?;
        let sort = match &scope.sort_positions {
            Some(p) => Some(tuple.select(p).ok_or_else(violation)?),
            None => None,
        };
        Ok(ShuffleRecord {
            branch,
            key,
            sort,
            value,
        })
    }

    fn compare(&self, a: &ShuffleRecord, b: &ShuffleRecord) -> Ordering {
        let key = if self.descending_keys() {
            b.key.cmp(&a.key)
        } else {
            a.key.cmp(&b.key)
        };
        key.then_with(|| b.branch.cmp(&a.branch)).then_with(|| {
            if self.grouping.reverse_order {
                b.sort.cmp(&a.sort)
            } else {
                a.sort.cmp(&b.sort)
            }
        })
    }

    /// Tag and sort every branch's tuples into one delivered run.
    ///
    /// `inputs` holds one tuple list per physical branch, in branch order.
    ///
    /// # Errors
    ///
    /// Propagates [`LocalShuffle::tag`] failures.
    pub fn shuffle(&self, inputs: &[Vec<Tuple>]) -> Result<Vec<ShuffleRecord>> {
        let mut records = Vec::with_capacity(inputs.iter().map(Vec::len).sum());
        for (branch, tuples) in inputs.iter().enumerate() {
            for t in tuples {
                records.push(self.tag(branch, t)?);
            }
        }
        records.sort_by(|a, b| self.compare(a, b));
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fields;
    use crate::group::{Branch, GroupSpec};
    use crate::scope::Scope;
    use crate::tuple;

    #[test]
    fn driver_records_come_last_within_a_key() {
        let left = Scope::source(fields!["k", "v"]);
        let right = Scope::source(fields!["k", "w"]);
        let scope = GroupSpec::new("g")
            .branch(Branch::new("left", "k"))
            .branch(Branch::new("right", "k"))
            .with_declared(fields!["v", "w"])
            .outgoing_scope_for(&[&left, &right])
            .unwrap();
        let grouping = scope.grouping.unwrap();
        let shuffle = LocalShuffle::new(&grouping);
        let run = shuffle
            .shuffle(&[
                vec![tuple![2, "c"], tuple![1, "a"]],
                vec![tuple![1, "x"], tuple![2, "y"]],
            ])
            .unwrap();
        let order: Vec<(usize, Tuple)> = run.into_iter().map(|r| (r.branch, r.value)).collect();
        assert_eq!(
            order,
            vec![
                (1, tuple!["x"]),
                (0, tuple!["a"]),
                (1, tuple!["y"]),
                (0, tuple!["c"]),
            ]
        );
    }

    #[test]
    fn reverse_order_applies_to_sort_fields_only() {
        let input = Scope::source(fields!["k", "s"]);
        let scope = GroupSpec::new("g")
            .branch(Branch::new("in", "k").sorted_by("s"))
            .reversed(true)
            .outgoing_scope_for(&[&input])
            .unwrap();
        let grouping = scope.grouping.unwrap();
        let shuffle = LocalShuffle::new(&grouping);
        assert!(!shuffle.descending_keys());
        let run = shuffle
            .shuffle(&[vec![tuple![1, 1], tuple![2, 5], tuple![1, 3]]])
            .unwrap();
        let rows: Vec<(Tuple, Tuple)> = run.into_iter().map(|r| (r.key, r.value)).collect();
        assert_eq!(
            rows,
            vec![
                (tuple![1], tuple![3]),
                (tuple![1], tuple![1]),
                (tuple![2], tuple![5]),
            ]
        );
    }
}
