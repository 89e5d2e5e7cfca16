//! Pluggable join strategies.
//!
//! A [`JoinStrategy`] consumes the [`GroupingClosure`] of one key and returns
//! a lazy sequence of joined value tuples. Every joined tuple is the
//! concatenation of one value tuple per logical branch, in branch order.
//!
//! The built-in strategies are all nested-loop cross products that differ
//! only in how an empty branch is treated:
//!
//! - *inner*: an empty branch empties the whole key group,
//! - *outer*: an empty branch contributes one all-null tuple of its value
//!   arity.
//!
//! Cost is the product of the branch cardinalities for the key.

use crate::error::PlanError;
use crate::grouping::closure::GroupingClosure;
use crate::tuple::Tuple;
use anyhow::Result;
use std::fmt::Debug;

/// Lazy, per-key joined output.
pub type JoinIter<'a> = Box<dyn Iterator<Item = Result<Tuple>> + 'a>;

pub trait JoinStrategy: Send + Sync + Debug {
    fn name(&self) -> &str;

    /// Check the strategy against the number of logical branches at plan time.
    ///
    /// # Errors
    ///
    /// [`PlanError::StrategyArity`] when the strategy cannot join `branches`.
    fn validate(&self, branches: usize) -> Result<(), PlanError> {
        let _ = branches;
        Ok(())
    }

    /// Join one key group.
    ///
    /// # Errors
    ///
    /// Any error aborts the key group as a whole.
    fn join<'a>(&self, closure: GroupingClosure<'a>) -> Result<JoinIter<'a>>;
}

/// Inner equi-join over every branch (the default).
#[derive(Clone, Copy, Debug, Default)]
pub struct InnerJoin;

/// Full outer join: empty branches are padded with nulls.
#[derive(Clone, Copy, Debug, Default)]
pub struct OuterJoin;

/// Branch 0 inner, every other branch outer.
#[derive(Clone, Copy, Debug, Default)]
pub struct LeftJoin;

/// Last branch inner, every other branch outer.
#[derive(Clone, Copy, Debug, Default)]
pub struct RightJoin;

/// Per-branch inner (`true`) / outer (`false`) flags.
#[derive(Clone, Debug)]
pub struct MixedJoin(pub Vec<bool>);

impl JoinStrategy for InnerJoin {
    fn name(&self) -> &str {
        "inner"
    }

    fn join<'a>(&self, closure: GroupingClosure<'a>) -> Result<JoinIter<'a>> {
        let inner = vec![true; closure.size()];
        CrossProduct::start(closure, inner)
    }
}

impl JoinStrategy for OuterJoin {
    fn name(&self) -> &str {
        "outer"
    }

    fn join<'a>(&self, closure: GroupingClosure<'a>) -> Result<JoinIter<'a>> {
        let inner = vec![false; closure.size()];
        CrossProduct::start(closure, inner)
    }
}

impl JoinStrategy for LeftJoin {
    fn name(&self) -> &str {
        "left"
    }

    fn join<'a>(&self, closure: GroupingClosure<'a>) -> Result<JoinIter<'a>> {
        let inner = (0..closure.size()).map(|b| b == 0).collect();
        CrossProduct::start(closure, inner)
    }
}

impl JoinStrategy for RightJoin {
    fn name(&self) -> &str {
        "right"
    }

    fn join<'a>(&self, closure: GroupingClosure<'a>) -> Result<JoinIter<'a>> {
        let last = closure.size().saturating_sub(1);
        let inner = (0..closure.size()).map(|b| b == last).collect();
        CrossProduct::start(closure, inner)
    }
}

impl JoinStrategy for MixedJoin {
    fn name(&self) -> &str {
        "mixed"
    }

    fn validate(&self, branches: usize) -> Result<(), PlanError> {
        if self.0.len() == branches {
            Ok(())
        } else {
            Err(PlanError::StrategyArity {
                strategy: format!("mixed({} flags)", self.0.len()),
                branches,
            })
        }
    }

    fn join<'a>(&self, closure: GroupingClosure<'a>) -> Result<JoinIter<'a>> {
        self.validate(closure.size())?;
        CrossProduct::start(closure, self.0.clone())
    }
}

/// Nested-loop cross product as an odometer over branch indices.
///
/// When the closure allows it the driver (branch 0) is streamed and the
/// odometer runs over branches `1..N` once per driver tuple; otherwise every
/// branch is buffered and the odometer covers all of them.
struct CrossProduct<'a> {
    closure: GroupingClosure<'a>,
    /// First odometer branch: 1 when the driver is streamed.
    start: usize,
    /// Buffered length per branch; `None` pads an empty outer branch.
    lens: Vec<Option<usize>>,
    idx: Vec<usize>,
    driver: Option<Tuple>,
    done: bool,
}

impl<'a> CrossProduct<'a> {
    fn start(mut closure: GroupingClosure<'a>, inner: Vec<bool>) -> Result<JoinIter<'a>> {
        let n = closure.size();
        let streamed = closure.can_stream_driver();
        if streamed {
            closure.begin_driver_stream()?;
        } else {
            closure.fill()?;
        }
        let start = usize::from(streamed);

        let mut lens = vec![None; n];
        for b in start..n {
            let len = closure.branch_len(b);
            if len == 0 && inner[b] {
                return Ok(Box::new(std::iter::empty()));
            }
            lens[b] = (len > 0).then_some(len);
        }

        let driver = if streamed {
            match closure.next_driver() {
                Some(first) => Some(first?),
                None if inner[0] => return Ok(Box::new(std::iter::empty())),
                None => Some(Tuple::nulls(closure.value_arity(0))),
            }
        } else {
            None
        };

        Ok(Box::new(Self {
            closure,
            start,
            lens,
            idx: vec![0; n],
            driver,
            done: false,
        }))
    }

    fn component(&mut self, branch: usize) -> Result<Tuple> {
        match self.lens[branch] {
            None => Ok(Tuple::nulls(self.closure.value_arity(branch))),
            Some(_) => self
                .closure
                .read(branch, self.idx[branch])?
                .ok_or_else(|| anyhow::anyhow!("branch {branch} buffer shrank during join")),
        }
    }

    /// Advance the odometer; returns `false` once it wraps past `start`.
    fn advance(&mut self) -> bool {
        for b in (self.start..self.lens.len()).rev() {
            self.idx[b] += 1;
            if self.idx[b] < self.lens[b].unwrap_or(1) {
                return true;
            }
            self.idx[b] = 0;
        }
        false
    }

    fn emit(&mut self) -> Result<Tuple> {
        let mut out = self.driver.clone().unwrap_or_default();
        for b in self.start..self.lens.len() {
            out.extend(self.component(b)?);
        }
        Ok(out)
    }
}

impl Iterator for CrossProduct<'_> {
    type Item = Result<Tuple>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        if self.start == 1 && self.driver.is_none() {
            match self.closure.next_driver() {
                Some(Ok(t)) => self.driver = Some(t),
                Some(Err(e)) => {
                    self.done = true;
                    return Some(Err(e));
                }
                None => {
                    self.done = true;
                    self.closure.release();
                    return None;
                }
            }
        }
        let out = match self.emit() {
            Ok(t) => t,
            Err(e) => {
                self.done = true;
                return Some(Err(e));
            }
        };
        if !self.advance() {
            if self.start == 1 {
                self.driver = None;
            } else {
                self.done = true;
                self.closure.release();
            }
        }
        Some(Ok(out))
    }
}
