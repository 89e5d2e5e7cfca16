//! Pre-built datasets for join, self-join and ordering scenarios.

use crate::fields::Fields;
use crate::tuple::Tuple;
use crate::{fields, tuple};

/// Two keyed inputs sharing the key field `k`.
#[derive(Debug, Clone)]
pub struct JoinFixture {
    pub left_fields: Fields,
    pub left: Vec<Tuple>,
    pub right_fields: Fields,
    pub right: Vec<Tuple>,
    /// Inner join of `left` and `right` on `k`, in key order.
    pub expected: Vec<Tuple>,
}

/// The canonical two-branch scenario: two matches per key, four in total.
///
/// # Example
///
/// ```
/// use tuplestream::testing::left_right_fixture;
///
/// let fx = left_right_fixture();
/// assert_eq!(fx.expected.len(), 4);
/// ```
#[must_use]
pub fn left_right_fixture() -> JoinFixture {
    JoinFixture {
        left_fields: fields!["k", "v"],
        left: vec![tuple![1, "a"], tuple![1, "b"], tuple![2, "c"]],
        right_fields: fields!["k", "w"],
        right: vec![tuple![1, "x"], tuple![2, "y"], tuple![2, "z"]],
        expected: vec![
            tuple![1, "a", "x"],
            tuple![1, "b", "x"],
            tuple![2, "c", "y"],
            tuple![2, "c", "z"],
        ],
    }
}

/// `(k, seq)` tuples: `n` rows cycling over `keys` keys with a monotonic
/// sequence number, for checking that replay preserves delivery order.
///
/// # Example
///
/// ```
/// use tuplestream::testing::sequenced;
/// use tuplestream::tuple;
///
/// assert_eq!(sequenced(3, 2), vec![tuple![0, 0], tuple![1, 1], tuple![0, 2]]);
/// ```
#[must_use]
pub fn sequenced(n: usize, keys: usize) -> Vec<Tuple> {
    let keys = i64::try_from(keys.max(1)).unwrap_or(i64::MAX);
    let n = i64::try_from(n).unwrap_or(i64::MAX);
    (0..n).map(|seq| tuple![seq % keys, seq]).collect()
}

/// Field names matching [`sequenced`].
#[must_use]
pub fn sequenced_fields() -> Fields {
    fields!["k", "seq"]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sequenced_treats_zero_keys_as_one() {
        assert_eq!(sequenced(3, 0), vec![tuple![0, 0], tuple![0, 1], tuple![0, 2]]);
        assert!(sequenced(0, 5).is_empty());
    }
}
