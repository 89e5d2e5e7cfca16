//! Field sets and field selectors.
//!
//! [`Fields`] is an ordered list of unique names and/or positions describing
//! the shape of a [`Tuple`](crate::Tuple). A [`FieldSelector`] is either a
//! concrete `Fields` projection or one of the symbolic roles (`ALL`, `NONE`,
//! `GROUP-KEYS`, `VALUES`, `ARGUMENTS`, `RESULTS`, `UNKNOWN`, `REPLACE`,
//! `SWAP`). Roles are never compared by field identity; they are resolved
//! against a [`SelectorContext`] supplied by the call site.
//!
//! ```
//! use tuplestream::fields::{FieldSelector, Fields, SelectorContext};
//! use tuplestream::fields;
//!
//! let incoming = fields!["k", "v", "w"];
//! let ctx = SelectorContext::new(&incoming);
//! let picked = FieldSelector::from(fields!["w", "k"]).resolve(&ctx).unwrap();
//! assert_eq!(picked, fields!["w", "k"]);
//! assert_eq!(incoming.positions(&picked).unwrap(), vec![2, 0]);
//! ```

use crate::error::PlanError;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt::{Display, Formatter, Result as FormatResult};

/// A single field reference: a name or a position.
///
/// Negative positions count from the end (`-1` is the last field).
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Field {
    Name(String),
    Pos(i32),
}

impl Display for Field {
    fn fmt(&self, f: &mut Formatter<'_>) -> FormatResult {
        match self {
            Self::Name(n) => write!(f, "'{n}'"),
            Self::Pos(p) => write!(f, "{p}"),
        }
    }
}

impl From<&str> for Field {
    fn from(v: &str) -> Self {
        Self::Name(v.to_string())
    }
}

impl From<String> for Field {
    fn from(v: String) -> Self {
        Self::Name(v)
    }
}

impl From<i32> for Field {
    fn from(v: i32) -> Self {
        Self::Pos(v)
    }
}

/// Ordered field set.
///
/// A field set is either *known* (a concrete list, possibly empty) or
/// *unknown*: its arity is only discovered once an operation actually runs.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub struct Fields {
    items: Vec<Field>,
    unknown: bool,
}

impl Fields {
    /// Build from explicit field references.
    pub fn new<I, F>(items: I) -> Self
    where
        I: IntoIterator<Item = F>,
        F: Into<Field>,
    {
        Self {
            items: items.into_iter().map(Into::into).collect(),
            unknown: false,
        }
    }

    /// Positional fields `0..n`.
    #[must_use]
    pub fn size(n: usize) -> Self {
        Self {
            items: (0..n)
                .map(|i| Field::Pos(i32::try_from(i).unwrap_or(i32::MAX)))
                .collect(),
            unknown: false,
        }
    }

    /// The empty (known) field set.
    #[must_use]
    pub const fn none() -> Self {
        Self {
            items: Vec::new(),
            unknown: false,
        }
    }

    #[must_use]
    pub const fn unknown() -> Self {
        Self {
            items: Vec::new(),
            unknown: true,
        }
    }

    #[must_use]
    pub const fn is_unknown(&self) -> bool {
        self.unknown
    }

    /// Number of fields. Unknown field sets report `None`.
    #[must_use]
    pub fn arity(&self) -> Option<usize> {
        (!self.unknown).then_some(self.items.len())
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        !self.unknown && self.items.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Field> {
        self.items.iter()
    }

    #[must_use]
    pub fn contains_name(&self, name: &str) -> bool {
        self.items
            .iter()
            .any(|f| matches!(f, Field::Name(n) if n == name))
    }

    /// Names only, skipping positional entries.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.items.iter().filter_map(|f| match f {
            Field::Name(n) => Some(n.as_str()),
            Field::Pos(_) => None,
        })
    }

    /// Fail with [`PlanError::DuplicateField`] if a name appears twice.
    pub fn validate_unique(&self) -> Result<(), PlanError> {
        let mut seen = HashSet::new();
        for name in self.names() {
            if !seen.insert(name) {
                return Err(PlanError::DuplicateField {
                    field: name.to_string(),
                });
            }
        }
        Ok(())
    }

    /// Index of a single field reference within this set.
    fn index_of(&self, field: &Field) -> Option<usize> {
        match field {
            Field::Name(name) => self
                .items
                .iter()
                .position(|f| matches!(f, Field::Name(n) if n == name)),
            Field::Pos(p) if self.unknown => usize::try_from(*p).ok(),
            Field::Pos(p) => {
                let len = i64::try_from(self.items.len()).ok()?;
                let idx = if *p < 0 { len + i64::from(*p) } else { i64::from(*p) };
                if (0..len).contains(&idx) {
                    usize::try_from(idx).ok()
                } else {
                    None
                }
            }
        }
    }

    /// Resolve every entry of `selection` to a position within `self`.
    ///
    /// Names resolve by identity, positions by offset. Names can never be
    /// resolved against an unknown field set.
    pub fn positions(&self, selection: &Self) -> Result<Vec<usize>, PlanError> {
        if selection.unknown {
            return Err(PlanError::invalid("UNKNOWN", "a projection"));
        }
        let mut out = Vec::with_capacity(selection.items.len());
        let mut missing = Vec::new();
        for field in &selection.items {
            match self.index_of(field) {
                Some(i) => out.push(i),
                None => missing.push(field.clone()),
            }
        }
        if missing.is_empty() {
            Ok(out)
        } else {
            Err(PlanError::unresolvable(Self::new(missing), self))
        }
    }

    /// Project `selection` out of `self`, keeping this set's field names.
    pub fn select(&self, selection: &Self) -> Result<Self, PlanError> {
        let positions = self.positions(selection)?;
        if self.unknown {
            return Ok(selection.clone());
        }
        Ok(Self::new(positions.iter().map(|&i| self.items[i].clone())))
    }

    /// Fields at the given positions (positions must be in range).
    #[must_use]
    pub fn at(&self, positions: &[usize]) -> Self {
        Self::new(positions.iter().filter_map(|&i| self.items.get(i).cloned()))
    }

    /// `self ++ other`, failing on duplicate names.
    ///
    /// Positional entries are renumbered to their new offsets; if either side
    /// is unknown the result is unknown.
    pub fn append(&self, other: &Self) -> Result<Self, PlanError> {
        if self.unknown || other.unknown {
            return Ok(Self::unknown());
        }
        let items = self
            .items
            .iter()
            .chain(other.items.iter())
            .enumerate()
            .map(|(i, f)| match f {
                Field::Name(_) => f.clone(),
                Field::Pos(_) => Field::Pos(i32::try_from(i).unwrap_or(i32::MAX)),
            })
            .collect();
        let out = Self {
            items,
            unknown: false,
        };
        out.validate_unique()?;
        Ok(out)
    }

    /// Remove the entries at `positions`.
    #[must_use]
    pub fn without(&self, positions: &[usize]) -> Self {
        Self::new(
            self.items
                .iter()
                .enumerate()
                .filter(|(i, _)| !positions.contains(i))
                .map(|(_, f)| f.clone()),
        )
    }

    /// Complement of `positions` as a position list.
    #[must_use]
    pub fn complement(&self, positions: &[usize]) -> Vec<usize> {
        (0..self.items.len())
            .filter(|i| !positions.contains(i))
            .collect()
    }
}

impl Display for Fields {
    fn fmt(&self, f: &mut Formatter<'_>) -> FormatResult {
        if self.unknown {
            return write!(f, "UNKNOWN");
        }
        write!(f, "[")?;
        for (i, field) in self.items.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{field}")?;
        }
        write!(f, "]")
    }
}

impl<'a> IntoIterator for &'a Fields {
    type Item = &'a Field;
    type IntoIter = std::slice::Iter<'a, Field>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.iter()
    }
}

/// Build a named [`Fields`] set.
///
/// ```
/// use tuplestream::fields;
/// let f = fields!["a", "b"];
/// assert_eq!(f.len(), 2);
/// ```
#[macro_export]
macro_rules! fields {
    () => { $crate::fields::Fields::none() };
    ($($f:expr),+ $(,)?) => {
        $crate::fields::Fields::new(vec![$($crate::fields::Field::from($f)),+])
    };
}

/// A concrete projection or a symbolic role.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FieldSelector {
    All,
    None,
    GroupKeys,
    Values,
    Arguments,
    Results,
    Unknown,
    /// Output only: the declared fields replace the arguments in place.
    Replace,
    /// Output only: incoming minus arguments, then the declared fields.
    Swap,
    Select(Fields),
}

impl Display for FieldSelector {
    fn fmt(&self, f: &mut Formatter<'_>) -> FormatResult {
        match self {
            Self::All => write!(f, "ALL"),
            Self::None => write!(f, "NONE"),
            Self::GroupKeys => write!(f, "GROUP-KEYS"),
            Self::Values => write!(f, "VALUES"),
            Self::Arguments => write!(f, "ARGUMENTS"),
            Self::Results => write!(f, "RESULTS"),
            Self::Unknown => write!(f, "UNKNOWN"),
            Self::Replace => write!(f, "REPLACE"),
            Self::Swap => write!(f, "SWAP"),
            Self::Select(fields) => write!(f, "{fields}"),
        }
    }
}

impl From<Fields> for FieldSelector {
    fn from(v: Fields) -> Self {
        Self::Select(v)
    }
}

impl From<&str> for FieldSelector {
    fn from(v: &str) -> Self {
        Self::Select(Fields::new([v]))
    }
}

impl From<Vec<&str>> for FieldSelector {
    fn from(v: Vec<&str>) -> Self {
        Self::Select(Fields::new(v))
    }
}

/// Field sets a selector may refer to when it is resolved.
///
/// `source` is whichever set the call site designates as current: the full
/// incoming values for argument resolution, the group's incoming fields for
/// key resolution, and so on.
#[derive(Clone, Copy, Debug)]
pub struct SelectorContext<'a> {
    pub source: &'a Fields,
    pub key_fields: Option<&'a Fields>,
    pub arguments: Option<&'a Fields>,
    pub declared: Option<&'a Fields>,
}

impl<'a> SelectorContext<'a> {
    #[must_use]
    pub const fn new(source: &'a Fields) -> Self {
        Self {
            source,
            key_fields: None,
            arguments: None,
            declared: None,
        }
    }

    #[must_use]
    pub const fn with_keys(mut self, keys: Option<&'a Fields>) -> Self {
        self.key_fields = keys;
        self
    }

    #[must_use]
    pub const fn with_arguments(mut self, arguments: &'a Fields) -> Self {
        self.arguments = Some(arguments);
        self
    }

    #[must_use]
    pub const fn with_declared(mut self, declared: &'a Fields) -> Self {
        self.declared = Some(declared);
        self
    }
}

impl FieldSelector {
    #[must_use]
    pub const fn is_select(&self) -> bool {
        matches!(self, Self::Select(_))
    }

    /// Resolve this selector to a concrete field set.
    ///
    /// `REPLACE` and `SWAP` only have meaning when merging an operation's
    /// results back into its input and are rejected here; see
    /// [`resolve_output`](crate::scope::resolve_output).
    pub fn resolve(&self, ctx: &SelectorContext<'_>) -> Result<Fields, PlanError> {
        match self {
            Self::All => Ok(ctx.source.clone()),
            Self::None => Ok(Fields::none()),
            Self::Unknown => Ok(Fields::unknown()),
            Self::GroupKeys => {
                let keys = ctx
                    .key_fields
                    .ok_or_else(|| PlanError::empty("no grouping key is established on this edge"))?;
                ctx.source.select(keys)
            }
            Self::Values => match ctx.key_fields {
                Some(keys) => {
                    let positions = ctx.source.positions(keys)?;
                    Ok(ctx.source.without(&positions))
                }
                None => Ok(ctx.source.clone()),
            },
            Self::Arguments => ctx
                .arguments
                .cloned()
                .ok_or_else(|| PlanError::invalid(self, "a selector before arguments are resolved")),
            Self::Results => ctx
                .declared
                .cloned()
                .ok_or_else(|| PlanError::invalid(self, "a selector before results are declared")),
            Self::Replace | Self::Swap => Err(PlanError::invalid(self, "a field projection")),
            Self::Select(fields) => {
                fields.validate_unique()?;
                ctx.source.select(fields)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn negative_positions_count_from_end() {
        let f = Fields::new(["a", "b", "c"]);
        assert_eq!(f.positions(&Fields::new([-1, 0])).unwrap(), vec![2, 0]);
        assert!(f.positions(&Fields::new([3])).is_err());
    }

    #[test]
    fn append_renumbers_positions_and_rejects_duplicates() {
        let a = Fields::size(2);
        let b = Fields::new(["x"]);
        let joined = a.append(&b).unwrap();
        assert_eq!(joined, Fields::new([Field::Pos(0), Field::Pos(1), Field::from("x")]));
        assert!(matches!(
            b.append(&b),
            Err(PlanError::DuplicateField { .. })
        ));
    }

    #[test]
    fn values_is_complement_of_keys() {
        let src = Fields::new(["k", "v", "w"]);
        let keys = Fields::new(["k"]);
        let ctx = SelectorContext::new(&src).with_keys(Some(&keys));
        assert_eq!(FieldSelector::Values.resolve(&ctx).unwrap(), Fields::new(["v", "w"]));
        assert_eq!(FieldSelector::GroupKeys.resolve(&ctx).unwrap(), keys);
    }

    #[test]
    fn names_cannot_resolve_against_unknown() {
        let src = Fields::unknown();
        let ctx = SelectorContext::new(&src);
        assert!(FieldSelector::from("a").resolve(&ctx).is_err());
        assert_eq!(
            FieldSelector::from(Fields::new([1])).resolve(&ctx).unwrap(),
            Fields::new([1])
        );
    }
}
