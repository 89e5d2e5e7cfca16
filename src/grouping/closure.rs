//! Per-key demultiplexer over one delivered sorted run.
//!
//! The substrate hands the grouping engine a single-pass iterator of
//! `(branch tag, value)` pairs for one key, with branch membership
//! interleaved. A [`GroupingClosure`] turns that run into one logical,
//! replayable sequence per branch:
//!
//! - every branch except the driver (branch 0) is buffered in an arena of
//!   [`BranchBuffer`]s indexed by tag, in delivery order;
//! - the driver may instead be streamed once, when the run delivers it after
//!   the other branches of a group that is not a self-join;
//! - with `repeat > 1` the single physical branch is buffered once and
//!   replayed as `repeat` logical branches.
//!
//! The closure owns all buffered state for its key. Dropping it (or calling
//! [`GroupingClosure::release`]) frees the buffers and deletes spill files.

use crate::error::ExecError;
use crate::grouping::buffer::{BranchBuffer, BufferCursor, SpillConfig};
use crate::metrics::MetricsCollector;
use crate::tuple::Tuple;
use anyhow::{Result, bail};
use std::collections::VecDeque;
use tracing::{debug, warn};

/// Single-pass run of tagged values for one key.
pub type TaggedRun<'a> = Box<dyn Iterator<Item = Result<(usize, Tuple)>> + 'a>;

/// Static shape of the groups a closure demultiplexes.
#[derive(Clone)]
pub struct ClosureLayout {
    /// Value arity per physical branch.
    pub value_arities: Vec<usize>,
    pub repeat: usize,
    /// The substrate delivers all driver (tag 0) records after every other
    /// branch's records for the same key.
    pub driver_last: bool,
    pub spill: SpillConfig,
    pub metrics: Option<MetricsCollector>,
}

impl ClosureLayout {
    #[must_use]
    pub fn new(value_arities: Vec<usize>) -> Self {
        Self {
            value_arities,
            repeat: 1,
            driver_last: false,
            spill: SpillConfig::default(),
            metrics: None,
        }
    }

    #[must_use]
    pub const fn with_repeat(mut self, repeat: usize) -> Self {
        self.repeat = repeat;
        self
    }

    #[must_use]
    pub const fn driver_last(mut self, driver_last: bool) -> Self {
        self.driver_last = driver_last;
        self
    }

    #[must_use]
    pub fn with_spill(mut self, spill: SpillConfig) -> Self {
        self.spill = spill;
        self
    }

    #[must_use]
    pub fn with_metrics(mut self, metrics: Option<MetricsCollector>) -> Self {
        self.metrics = metrics;
        self
    }

    /// Number of physical branches (distinct tags).
    #[must_use]
    pub fn branches(&self) -> usize {
        self.value_arities.len()
    }

    /// Number of branches a join strategy sees.
    #[must_use]
    pub fn logical_branches(&self) -> usize {
        self.branches() * self.repeat.max(1)
    }
}

/// Lifecycle of one key group.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GroupState {
    AwaitingKey,
    BuildingBuffers,
    Joining,
    Exhausted,
}

pub struct GroupingClosure<'a> {
    key: Tuple,
    run: TaggedRun<'a>,
    run_done: bool,
    layout: &'a ClosureLayout,
    arena: Vec<BranchBuffer>,
    pending_driver: VecDeque<Tuple>,
    streaming: bool,
    state: GroupState,
}

impl<'a> GroupingClosure<'a> {
    pub fn new<I>(key: Tuple, run: I, layout: &'a ClosureLayout) -> Self
    where
        I: Iterator<Item = Result<(usize, Tuple)>> + 'a,
    {
        let arena = (0..layout.branches())
            .map(|_| BranchBuffer::new(layout.spill.clone()))
            .collect();
        Self {
            key,
            run: Box::new(run),
            run_done: false,
            layout,
            arena,
            pending_driver: VecDeque::new(),
            streaming: false,
            state: GroupState::AwaitingKey,
        }
    }

    #[must_use]
    pub const fn key(&self) -> &Tuple {
        &self.key
    }

    /// Number of logical branches.
    #[must_use]
    pub fn size(&self) -> usize {
        self.layout.logical_branches()
    }

    #[must_use]
    pub const fn state(&self) -> GroupState {
        self.state
    }

    /// Value arity of a logical branch.
    #[must_use]
    pub fn value_arity(&self, branch: usize) -> usize {
        self.layout
            .value_arities
            .get(self.physical(branch))
            .copied()
            .unwrap_or(0)
    }

    fn physical(&self, branch: usize) -> usize {
        if self.layout.repeat > 1 { 0 } else { branch }
    }

    /// Whether branch 0 can be consumed as a forward-only stream.
    ///
    /// Only when the run delivers the driver after every other branch;
    /// otherwise its values would pile up unbounded ahead of the buffered
    /// branches. Self-joins replay the single physical branch for every
    /// logical branch, so they always buffer.
    #[must_use]
    pub const fn can_stream_driver(&self) -> bool {
        self.layout.driver_last && self.layout.repeat <= 1
    }

    #[must_use]
    pub const fn driver_streaming(&self) -> bool {
        self.streaming
    }

    fn pull(&mut self) -> Result<Option<(usize, Tuple)>> {
        if self.run_done {
            return Ok(None);
        }
        match self.run.next() {
            None => {
                self.run_done = true;
                Ok(None)
            }
            Some(Err(e)) => Err(e),
            Some(Ok((tag, _))) if tag >= self.arena.len() => Err(ExecError::UnknownBranch {
                tag,
                branches: self.arena.len(),
            }
            .into()),
            Some(Ok(pair)) => Ok(Some(pair)),
        }
    }

    fn store(&mut self, tag: usize, value: Tuple) -> Result<()> {
        let spilled = self.arena[tag].push(value)?;
        if spilled > 0 {
            warn!(key = %self.key, branch = tag, tuples = spilled, "branch buffer spilled to disk");
            if let Some(m) = &self.layout.metrics {
                m.increment_counter("spilled_tuples", spilled as u64);
            }
        }
        Ok(())
    }

    fn enter(&mut self, state: GroupState) {
        if self.state != state {
            debug!(key = %self.key, from = ?self.state, to = ?state, "group state");
            self.state = state;
        }
    }

    /// Buffer every branch, including the driver.
    ///
    /// # Errors
    ///
    /// Fails if the driver is already being streamed, or if the run yields an
    /// error, an unknown tag, or a spill failure.
    pub fn fill(&mut self) -> Result<()> {
        if self.streaming {
            bail!("cannot buffer the driver branch of key {} after streaming began", self.key);
        }
        self.enter(GroupState::BuildingBuffers);
        while let Some((tag, value)) = self.pull()? {
            self.store(tag, value)?;
        }
        self.enter(GroupState::Joining);
        Ok(())
    }

    /// Buffer branches `1..N` and leave branch 0 to [`Self::next_driver`].
    ///
    /// # Errors
    ///
    /// Fails unless [`Self::can_stream_driver`] holds, and for run, tag or
    /// spill errors.
    pub fn begin_driver_stream(&mut self) -> Result<()> {
        if !self.can_stream_driver() {
            bail!("the driver of key {} cannot be streamed with this layout", self.key);
        }
        if self.state == GroupState::Joining {
            bail!("branch buffers of key {} are already built", self.key);
        }
        self.streaming = true;
        self.fill_others()
    }

    fn fill_others(&mut self) -> Result<()> {
        self.enter(GroupState::BuildingBuffers);
        while let Some((tag, value)) = self.pull()? {
            if tag == 0 {
                self.pending_driver.push_back(value);
                break;
            } else {
                self.store(tag, value)?;
            }
        }
        self.enter(GroupState::Joining);
        Ok(())
    }

    /// Next driver value, in delivery order.
    ///
    /// Driver values seen while the other branches were being buffered are
    /// replayed first; the rest are pulled straight from the run.
    pub fn next_driver(&mut self) -> Option<Result<Tuple>> {
        if let Some(t) = self.pending_driver.pop_front() {
            return Some(Ok(t));
        }
        match self.pull() {
            Ok(None) => None,
            Ok(Some((0, value))) => Some(Ok(value)),
            Ok(Some((tag, _))) => Some(Err(ExecError::DriverOrder {
                key: self.key.clone(),
                tag,
            }
            .into())),
            Err(e) => Some(Err(e)),
        }
    }

    /// Buffered length of a logical branch.
    ///
    /// A streamed driver is never buffered and reports `0`.
    #[must_use]
    pub fn branch_len(&self, branch: usize) -> usize {
        if self.streaming && branch == 0 {
            return 0;
        }
        self.arena
            .get(self.physical(branch))
            .map_or(0, BranchBuffer::len)
    }

    /// Random access into a buffered logical branch.
    ///
    /// # Errors
    ///
    /// Fails if a spilled chunk cannot be read back.
    pub fn read(&mut self, branch: usize, index: usize) -> Result<Option<Tuple>> {
        let physical = self.physical(branch);
        match self.arena.get_mut(physical) {
            Some(buffer) => Ok(buffer.get(index)?),
            None => Ok(None),
        }
    }

    /// Replay a buffered logical branch from the start.
    #[must_use]
    pub fn cursor(&self, branch: usize) -> Option<BufferCursor<'_>> {
        self.arena.get(self.physical(branch)).map(BranchBuffer::cursor)
    }

    /// All values of a logical branch, buffering the whole run if needed.
    ///
    /// # Errors
    ///
    /// Propagates buffering and replay failures.
    pub fn values(&mut self, branch: usize) -> Result<Vec<Tuple>> {
        if self.state != GroupState::Joining {
            self.fill()?;
        }
        match self.cursor(branch) {
            Some(cursor) => cursor.collect(),
            None => Ok(Vec::new()),
        }
    }

    /// Drop every buffer held for this key.
    pub fn release(&mut self) {
        if self.state == GroupState::Exhausted {
            return;
        }
        for buffer in &mut self.arena {
            buffer.clear();
        }
        self.pending_driver.clear();
        self.enter(GroupState::Exhausted);
    }
}

impl Drop for GroupingClosure<'_> {
    fn drop(&mut self) {
        self.release();
    }
}
