//! Built-in per-record functions and filters.
//!
//! ```
//! use tuplestream::functions::{not_null, regex_split};
//! use tuplestream::{fields, tuple, Pipeline};
//!
//! # fn main() -> anyhow::Result<()> {
//! let p = Pipeline::default();
//! let out = p
//!     .source("lines", fields!["id", "line"], vec![tuple![1, "a=1"], tuple![2, "b"]])
//!     .each(regex_split(fields!["name", "value"], "=")?.with_arguments("line"))
//!     .each(not_null())
//!     .collect_seq()?;
//! assert_eq!(out, vec![tuple!["a", "1"]]);
//! # Ok(())
//! # }
//! ```

use crate::error::PlanError;
use crate::fields::{FieldSelector, Fields};
use crate::operation::{Operation, OperationKind};
use crate::tuple::{Tuple, Value};
use anyhow::Result;
use regex::Regex;
use std::sync::Arc;

/// Unquoted text form of a value.
fn text(v: &Value) -> String {
    match v {
        Value::Str(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Pass the arguments through unchanged.
#[must_use]
pub fn identity() -> Operation {
    Operation::map_one("identity", FieldSelector::Arguments, Tuple::clone)
}

/// Append constant `values` as `fields` to every tuple.
#[must_use]
pub fn insert(fields: Fields, values: Tuple) -> Operation {
    Operation::map_one("insert", fields, move |_| values.clone())
        .with_arguments(FieldSelector::None)
        .with_output(FieldSelector::All)
}

/// Split the first argument on `pattern` into exactly `fields.len()` values.
///
/// Missing parts are null; parts beyond the declared width are dropped.
///
/// # Errors
///
/// Fails if `pattern` is not a valid regular expression.
pub fn regex_split(fields: Fields, pattern: &str) -> Result<Operation> {
    let re = Regex::new(pattern)?;
    let width = fields.len();
    Ok(Operation::map_one("regex_split", fields, move |t| {
        let text = t.get(0).map(text).unwrap_or_default();
        let mut parts: Vec<Value> = re.splitn(&text, width.max(1)).map(Value::from).collect();
        parts.resize(width, Value::Null);
        Tuple::new(parts)
    })
    .with_min_arity(1))
}

/// Keep tuples whose arguments are all non-null.
#[must_use]
pub fn not_null() -> Operation {
    Operation::filter("not_null", |t| !t.iter().any(Value::is_null))
}

/// Keep tuples whose first argument, as text, matches `pattern`.
///
/// # Errors
///
/// Fails if `pattern` is not a valid regular expression.
pub fn regex_filter(pattern: &str) -> Result<Operation> {
    let re = Regex::new(pattern)?;
    Ok(Operation::filter("regex_filter", move |t| {
        t.get(0).is_some_and(|v| re.is_match(&text(v)))
    })
    .with_min_arity(1))
}

/// Invert a filter.
///
/// # Errors
///
/// [`PlanError::MisplacedOperation`] if `op` is not a filter.
pub fn not(op: Operation) -> Result<Operation, PlanError> {
    let OperationKind::Filter(pred) = op.kind else {
        return Err(PlanError::MisplacedOperation {
            kind: op.kind.label().to_string(),
            place: "a negated filter".to_string(),
        });
    };
    Ok(Operation {
        name: format!("not({})", op.name),
        kind: OperationKind::Filter(Arc::new(move |t: &Tuple| !pred(t))),
        ..op
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tuple;

    fn filter_of(op: &Operation) -> &crate::operation::FilterFn {
        match &op.kind {
            OperationKind::Filter(f) => f,
            other => panic!("expected filter, got {other:?}"),
        }
    }

    #[test]
    fn not_inverts_filters_and_rejects_maps() {
        let op = not(not_null()).unwrap();
        assert_eq!(op.name, "not(not_null)");
        assert!(filter_of(&op)(&tuple![Value::Null]));
        assert!(!filter_of(&op)(&tuple![1]));
        assert!(matches!(
            not(identity()),
            Err(PlanError::MisplacedOperation { .. })
        ));
    }

    #[test]
    fn regex_filter_matches_text_of_first_argument() {
        let op = regex_filter("^a").unwrap();
        assert!(filter_of(&op)(&tuple!["abc"]));
        assert!(!filter_of(&op)(&tuple!["cab"]));
        assert!(regex_filter("(").is_err());
    }
}
