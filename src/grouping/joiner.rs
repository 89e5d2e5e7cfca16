//! Per-key driver over a sorted, branch-tagged record stream.
//!
//! [`GroupJoiner`] is the consumer side of the substrate contract: it reads
//! [`ShuffleRecord`]s already grouped and ordered by `(key, sort key)` and
//! walks them one key group at a time. Each [`KeyGroup`] borrows the joiner,
//! so no two keys' buffers can ever be alive together.
//!
//! ```
//! use std::sync::Arc;
//! use tuplestream::grouping::{ClosureLayout, GroupJoiner, InnerJoin, ShuffleRecord};
//! use tuplestream::tuple;
//!
//! # fn main() -> anyhow::Result<()> {
//! let records = vec![
//!     ShuffleRecord::new(1, tuple![1], tuple!["x"]),
//!     ShuffleRecord::new(0, tuple![1], tuple!["a"]),
//!     ShuffleRecord::new(0, tuple![1], tuple!["b"]),
//! ];
//! let layout = ClosureLayout::new(vec![1, 1]).driver_last(true);
//! let mut joiner = GroupJoiner::new(Arc::new(InnerJoin), layout, records.into_iter().map(Ok));
//! let group = joiner.next_group().unwrap()?;
//! assert_eq!(group.key(), &tuple![1]);
//! assert_eq!(group.join_all()?, vec![tuple!["a", "x"], tuple!["b", "x"]]);
//! assert!(joiner.next_group().is_none());
//! # Ok(())
//! # }
//! ```

use crate::error::ExecError;
use crate::grouping::closure::{ClosureLayout, GroupingClosure};
use crate::grouping::strategy::{JoinIter, JoinStrategy};
use crate::tuple::Tuple;
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::iter::Peekable;
use std::sync::Arc;
use tracing::debug;

/// One record as delivered by the sort/shuffle substrate.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShuffleRecord {
    pub branch: usize,
    pub key: Tuple,
    pub sort: Option<Tuple>,
    pub value: Tuple,
}

impl ShuffleRecord {
    #[must_use]
    pub const fn new(branch: usize, key: Tuple, value: Tuple) -> Self {
        Self {
            branch,
            key,
            sort: None,
            value,
        }
    }

    #[must_use]
    pub fn with_sort(mut self, sort: Tuple) -> Self {
        self.sort = Some(sort);
        self
    }
}

pub struct GroupJoiner<I>
where
    I: Iterator<Item = Result<ShuffleRecord>>,
{
    source: Peekable<I>,
    strategy: Arc<dyn JoinStrategy>,
    layout: ClosureLayout,
    descending: bool,
    previous: Option<Tuple>,
}

impl<I> GroupJoiner<I>
where
    I: Iterator<Item = Result<ShuffleRecord>>,
{
    pub fn new(strategy: Arc<dyn JoinStrategy>, layout: ClosureLayout, records: I) -> Self {
        Self {
            source: records.peekable(),
            strategy,
            layout,
            descending: false,
            previous: None,
        }
    }

    /// Expect keys in descending order.
    #[must_use]
    pub const fn descending(mut self, descending: bool) -> Self {
        self.descending = descending;
        self
    }

    #[must_use]
    pub fn layout(&self) -> &ClosureLayout {
        &self.layout
    }

    /// Skip whatever the previous key group left unread.
    fn skip_previous(&mut self) {
        let Some(prev) = &self.previous else {
            return;
        };
        while let Some(Ok(rec)) = self.source.peek() {
            if rec.key != *prev {
                break;
            }
            self.source.next();
        }
    }

    /// Advance to the next key group.
    ///
    /// Returns `None` once the stream is exhausted, and an error when the
    /// stream fails or delivers keys out of order.
    pub fn next_group(&mut self) -> Option<Result<KeyGroup<'_, I>>> {
        self.skip_previous();
        let key = match self.source.peek()? {
            Ok(rec) => rec.key.clone(),
            Err(_) => {
                return match self.source.next() {
                    Some(Err(e)) => Some(Err(e)),
                    _ => None,
                };
            }
        };
        if let Some(prev) = &self.previous {
            let expected = if self.descending {
                Ordering::Less
            } else {
                Ordering::Greater
            };
            if key.cmp(prev) != expected {
                return Some(Err(ExecError::KeyOrder {
                    key,
                    previous: prev.clone(),
                }
                .into()));
            }
        }
        debug!(key = %key, "key group");
        self.previous = Some(key.clone());
        Some(Ok(KeyGroup {
            key,
            source: &mut self.source,
            layout: &self.layout,
            strategy: self.strategy.as_ref(),
        }))
    }
}

/// One key group, borrowed from its [`GroupJoiner`].
pub struct KeyGroup<'g, I>
where
    I: Iterator<Item = Result<ShuffleRecord>>,
{
    key: Tuple,
    source: &'g mut Peekable<I>,
    layout: &'g ClosureLayout,
    strategy: &'g dyn JoinStrategy,
}

impl<'g, I> KeyGroup<'g, I>
where
    I: Iterator<Item = Result<ShuffleRecord>> + 'g,
{
    #[must_use]
    pub const fn key(&self) -> &Tuple {
        &self.key
    }

    /// The grouping closure over this key's records.
    #[must_use]
    pub fn closure(self) -> GroupingClosure<'g> {
        let run = KeyRun {
            key: self.key.clone(),
            source: self.source,
        };
        GroupingClosure::new(self.key, run, self.layout)
    }

    /// Lazily join this key group with the node's strategy.
    ///
    /// # Errors
    ///
    /// [`ExecError::JoinStrategy`] if the strategy fails to start.
    pub fn join(self) -> Result<JoinIter<'g>> {
        let key = self.key.clone();
        let strategy = self.strategy;
        strategy
            .join(self.closure())
            .map_err(|e| wrap_strategy_error(&key, e))
    }

    /// Join this key group completely, or not at all.
    ///
    /// # Errors
    ///
    /// The first error raised while joining; no tuples of the key are
    /// returned in that case.
    pub fn join_all(self) -> Result<Vec<Tuple>> {
        let key = self.key.clone();
        self.join()?
            .collect::<Result<Vec<_>>>()
            .map_err(|e| wrap_strategy_error(&key, e))
    }
}

fn wrap_strategy_error(key: &Tuple, err: anyhow::Error) -> anyhow::Error {
    if err.is::<ExecError>() {
        err
    } else {
        ExecError::JoinStrategy {
            key: key.clone(),
            source: err,
        }
        .into()
    }
}

/// The records of one key, pulled lazily from the shared stream.
struct KeyRun<'g, I>
where
    I: Iterator<Item = Result<ShuffleRecord>>,
{
    key: Tuple,
    source: &'g mut Peekable<I>,
}

impl<I> Iterator for KeyRun<'_, I>
where
    I: Iterator<Item = Result<ShuffleRecord>>,
{
    type Item = Result<(usize, Tuple)>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.source.peek()? {
            Ok(rec) if rec.key != self.key => None,
            _ => self.source.next().map(|r| r.map(|rec| (rec.branch, rec.value))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grouping::strategy::InnerJoin;
    use crate::tuple;

    fn joiner(records: Vec<ShuffleRecord>) -> GroupJoiner<impl Iterator<Item = Result<ShuffleRecord>>> {
        let layout = ClosureLayout::new(vec![1, 1]).driver_last(true);
        GroupJoiner::new(Arc::new(InnerJoin), layout, records.into_iter().map(Ok))
    }

    #[test]
    fn unread_groups_are_skipped() {
        let mut j = joiner(vec![
            ShuffleRecord::new(1, tuple![1], tuple!["x"]),
            ShuffleRecord::new(0, tuple![1], tuple!["a"]),
            ShuffleRecord::new(1, tuple![2], tuple!["y"]),
            ShuffleRecord::new(0, tuple![2], tuple!["b"]),
        ]);
        let first = j.next_group().unwrap().unwrap();
        assert_eq!(first.key(), &tuple![1]);
        drop(first);
        let second = j.next_group().unwrap().unwrap();
        assert_eq!(second.join_all().unwrap(), vec![tuple!["b", "y"]]);
        assert!(j.next_group().is_none());
    }

    #[test]
    fn out_of_order_keys_are_rejected() {
        let mut j = joiner(vec![
            ShuffleRecord::new(0, tuple![2], tuple!["a"]),
            ShuffleRecord::new(0, tuple![1], tuple!["b"]),
        ]);
        j.next_group().unwrap().unwrap().join_all().unwrap();
        let err = j.next_group().unwrap().err().unwrap();
        assert!(matches!(
            err.downcast_ref::<ExecError>(),
            Some(ExecError::KeyOrder { .. })
        ));
    }

    /// Joins the first pair, then fails mid-stream.
    #[derive(Debug)]
    struct FailAfterFirst;

    impl JoinStrategy for FailAfterFirst {
        fn name(&self) -> &str {
            "fail_after_first"
        }

        fn join<'a>(&self, closure: GroupingClosure<'a>) -> Result<JoinIter<'a>> {
            let first = InnerJoin.join(closure)?.next();
            let failure = Err(anyhow::anyhow!("lost the connection"));
            Ok(Box::new(first.into_iter().chain(std::iter::once(failure))))
        }
    }

    #[test]
    fn mid_stream_strategy_failure_yields_no_partial_group() {
        let layout = ClosureLayout::new(vec![1, 1]).driver_last(true);
        let records = vec![
            ShuffleRecord::new(1, tuple![1], tuple!["x"]),
            ShuffleRecord::new(0, tuple![1], tuple!["a"]),
            ShuffleRecord::new(0, tuple![1], tuple!["b"]),
        ];
        let mut j = GroupJoiner::new(Arc::new(FailAfterFirst), layout, records.into_iter().map(Ok));
        let group = j.next_group().unwrap().unwrap();
        let err = group.join_all().unwrap_err();
        match err.downcast_ref::<ExecError>() {
            Some(ExecError::JoinStrategy { key, source }) => {
                assert_eq!(key, &tuple![1]);
                assert!(source.to_string().contains("lost the connection"));
            }
            other => panic!("unexpected error {other:?}"),
        }
    }
}
