//! Values and tuples.
//!
//! A [`Tuple`] is an ordered, fixed-arity sequence of [`Value`]s. Tuples carry no
//! identity beyond their values and are totally ordered, so the same type is
//! used for record payloads, group keys and secondary sort keys.
//!
//! Floating point values are wrapped in [`OrderedFloat`] so that `Value` can
//! implement `Ord` and `Hash`; this keeps tuples usable as sort/partition keys.

use ordered_float::OrderedFloat;
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter, Result as FormatResult};

/// A single typed field value.
///
/// The derived ordering is by variant first (`Null < Bool < Int < Float < Str`),
/// then by payload.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    Int(i64),
    Float(OrderedFloat<f64>),
    Str(String),
}

impl Value {
    #[must_use]
    pub const fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Numeric view used by the arithmetic aggregators.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Int(i) => Some(*i as f64),
            Self::Float(f) => Some(f.0),
            _ => None,
        }
    }

    #[must_use]
    pub const fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int(i) => Some(*i),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(s) => Some(s),
            _ => None,
        }
    }
}

impl Display for Value {
    fn fmt(&self, f: &mut Formatter<'_>) -> FormatResult {
        match self {
            Self::Null => write!(f, "null"),
            Self::Bool(b) => write!(f, "{b}"),
            Self::Int(i) => write!(f, "{i}"),
            Self::Float(x) => write!(f, "{}", x.0),
            Self::Str(s) => write!(f, "{s:?}"),
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Self::Int(i64::from(v))
    }
}

impl From<u32> for Value {
    fn from(v: u32) -> Self {
        Self::Int(i64::from(v))
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Self::Float(OrderedFloat(v))
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Self::Str(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Self::Str(v)
    }
}

impl<T: Into<Self>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Self::Null, Into::into)
    }
}

/// Ordered, fixed-arity sequence of values.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
pub struct Tuple(Vec<Value>);

impl Tuple {
    #[must_use]
    pub const fn new(values: Vec<Value>) -> Self {
        Self(values)
    }

    #[must_use]
    pub const fn empty() -> Self {
        Self(Vec::new())
    }

    /// A tuple of `arity` nulls, used by outer joins for absent branches.
    #[must_use]
    pub fn nulls(arity: usize) -> Self {
        Self(vec![Value::Null; arity])
    }

    #[must_use]
    pub fn arity(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    #[must_use]
    pub fn get(&self, pos: usize) -> Option<&Value> {
        self.0.get(pos)
    }

    #[must_use]
    pub fn values(&self) -> &[Value] {
        &self.0
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Value> {
        self.0.iter()
    }

    /// Project the values at `positions`, in the given order.
    ///
    /// Returns `None` if any position is out of range.
    #[must_use]
    pub fn select(&self, positions: &[usize]) -> Option<Self> {
        positions
            .iter()
            .map(|&p| self.0.get(p).cloned())
            .collect::<Option<Vec<_>>>()
            .map(Self)
    }

    /// `self ++ other`.
    #[must_use]
    pub fn append(&self, other: &Self) -> Self {
        let mut out = Vec::with_capacity(self.0.len() + other.0.len());
        out.extend_from_slice(&self.0);
        out.extend_from_slice(&other.0);
        Self(out)
    }

    pub fn extend(&mut self, other: Self) {
        self.0.extend(other.0);
    }

    pub fn push(&mut self, value: Value) {
        self.0.push(value);
    }

    pub fn set(&mut self, pos: usize, value: Value) -> Option<Value> {
        self.0
            .get_mut(pos)
            .map(|slot| std::mem::replace(slot, value))
    }

    #[must_use]
    pub fn into_values(self) -> Vec<Value> {
        self.0
    }
}

impl From<Vec<Value>> for Tuple {
    fn from(values: Vec<Value>) -> Self {
        Self(values)
    }
}

impl FromIterator<Value> for Tuple {
    fn from_iter<I: IntoIterator<Item = Value>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl IntoIterator for Tuple {
    type Item = Value;
    type IntoIter = std::vec::IntoIter<Value>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

impl<'a> IntoIterator for &'a Tuple {
    type Item = &'a Value;
    type IntoIter = std::slice::Iter<'a, Value>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

impl Display for Tuple {
    fn fmt(&self, f: &mut Formatter<'_>) -> FormatResult {
        write!(f, "(")?;
        for (i, v) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{v}")?;
        }
        write!(f, ")")
    }
}

/// Build a [`Tuple`] from anything convertible into [`Value`].
///
/// ```
/// use tuplestream::{tuple, Value};
///
/// let t = tuple![1, "a", 2.5];
/// assert_eq!(t.arity(), 3);
/// assert_eq!(t.get(1), Some(&Value::from("a")));
/// ```
#[macro_export]
macro_rules! tuple {
    () => { $crate::Tuple::empty() };
    ($($v:expr),+ $(,)?) => {
        $crate::Tuple::new(vec![$($crate::Value::from($v)),+])
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn select_projects_in_requested_order() {
        let t = tuple![1, "b", 3];
        assert_eq!(t.select(&[2, 0]), Some(tuple![3, 1]));
        assert_eq!(t.select(&[5]), None);
    }

    #[test]
    fn ordering_is_lexicographic() {
        assert!(tuple![1, "a"] < tuple![1, "b"]);
        assert!(tuple![1] < tuple![1, "a"]);
        assert!(Value::Null < Value::Int(0));
    }
}
