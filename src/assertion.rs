//! Assertion levels and built-in value assertions.
//!
//! Assertions are per-record checks that fail the run when a tuple violates
//! them. Each assertion is tagged with an [`AssertionLevel`]; the planner strips
//! every assertion above the level configured on the
//! [`Runner`](crate::runner::Runner), so strict checks can stay in a pipeline
//! during development and be planned away in production.
//!
//! # Example
//!
//! ```
//! use tuplestream::assertion::{assert_not_null, AssertionLevel};
//! use tuplestream::{fields, tuple, Pipeline};
//!
//! # fn main() -> anyhow::Result<()> {
//! let p = Pipeline::default();
//! let rows = p
//!     .source("rows", fields!["id", "name"], vec![tuple![1, "a"]])
//!     .each(assert_not_null(AssertionLevel::Strict));
//! assert_eq!(rows.collect_seq()?.len(), 1);
//! # Ok(())
//! # }
//! ```

use crate::operation::Operation;
use crate::tuple::Tuple;
use serde::{Deserialize, Serialize};

/// How strictly assertions are enforced.
///
/// Ordered from least to most strict: a plan configured at `Valid` keeps
/// `Valid` assertions and strips `Strict` ones.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum AssertionLevel {
    /// No assertions are planned.
    None,
    /// Checks that guard production data.
    Valid,
    /// Every assertion, including development-only checks.
    #[default]
    Strict,
}

impl AssertionLevel {
    /// Whether an assertion tagged `level` survives planning at `self`.
    #[must_use]
    pub fn keeps(self, level: Self) -> bool {
        level != Self::None && level <= self
    }
}

/// Fail if any argument value is null.
#[must_use]
pub fn assert_not_null(level: AssertionLevel) -> Operation {
    Operation::assertion("assert_not_null", level, |t: &Tuple| {
        match t.iter().position(crate::tuple::Value::is_null) {
            Some(pos) => Err(format!("value at position {pos} is null")),
            None => Ok(()),
        }
    })
}

/// Fail unless the argument tuple has exactly `arity` values.
#[must_use]
pub fn assert_arity(level: AssertionLevel, arity: usize) -> Operation {
    Operation::assertion("assert_arity", level, move |t: &Tuple| {
        if t.arity() == arity {
            Ok(())
        } else {
            Err(format!("expected {arity} value(s), got {}", t.arity()))
        }
    })
}

/// Fail unless the argument tuple equals `expected`.
#[must_use]
pub fn assert_equals(level: AssertionLevel, expected: Tuple) -> Operation {
    Operation::assertion("assert_equals", level, move |t: &Tuple| {
        if *t == expected {
            Ok(())
        } else {
            Err(format!("expected {expected}"))
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn levels_keep_only_at_or_below_configured() {
        assert!(AssertionLevel::Strict.keeps(AssertionLevel::Valid));
        assert!(AssertionLevel::Strict.keeps(AssertionLevel::Strict));
        assert!(!AssertionLevel::Valid.keeps(AssertionLevel::Strict));
        assert!(!AssertionLevel::None.keeps(AssertionLevel::Valid));
        assert!(!AssertionLevel::Strict.keeps(AssertionLevel::None));
    }
}
