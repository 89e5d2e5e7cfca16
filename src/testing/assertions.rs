//! Assertion functions for comparing pipeline output.

use crate::tuple::Tuple;

/// Assert that two tuple lists are equal in order and content.
///
/// # Panics
///
/// Panics if the lists differ in length or content.
///
/// # Example
///
/// ```
/// use tuplestream::testing::assert_tuples_equal;
/// use tuplestream::tuple;
///
/// assert_tuples_equal(&[tuple![1, "a"]], &[tuple![1, "a"]]);
/// ```
pub fn assert_tuples_equal(actual: &[Tuple], expected: &[Tuple]) {
    assert_eq!(
        actual.len(),
        expected.len(),
        "Tuple count mismatch:\n  Expected: {}\n  Actual: {}",
        render(expected),
        render(actual)
    );
    for (i, (a, e)) in actual.iter().zip(expected).enumerate() {
        assert_eq!(
            a,
            e,
            "Tuple mismatch at index {i}:\n  Expected: {e}\n  Actual: {a}\n  Full expected: {}\n  Full actual: {}",
            render(expected),
            render(actual)
        );
    }
}

/// Assert that two tuple lists hold the same multiset of tuples.
///
/// # Panics
///
/// Panics if the lists differ once sorted.
///
/// # Example
///
/// ```
/// use tuplestream::testing::assert_tuples_unordered_equal;
/// use tuplestream::tuple;
///
/// assert_tuples_unordered_equal(&[tuple![2], tuple![1]], &[tuple![1], tuple![2]]);
/// ```
pub fn assert_tuples_unordered_equal(actual: &[Tuple], expected: &[Tuple]) {
    let mut a = actual.to_vec();
    let mut e = expected.to_vec();
    a.sort();
    e.sort();
    if a != e {
        let missing: Vec<_> = e.iter().filter(|t| !a.contains(t)).map(ToString::to_string).collect();
        let extra: Vec<_> = a.iter().filter(|t| !e.contains(t)).map(ToString::to_string).collect();
        panic!(
            "Tuple content mismatch:\n  Missing: [{}]\n  Extra: [{}]\n  Expected: {}\n  Actual: {}",
            missing.join(", "),
            extra.join(", "),
            render(expected),
            render(actual)
        );
    }
}

/// Assert that every tuple satisfies `pred`.
///
/// # Panics
///
/// Panics on the first tuple failing the predicate.
pub fn assert_all_tuples<F>(actual: &[Tuple], pred: F)
where
    F: Fn(&Tuple) -> bool,
{
    if let Some((i, t)) = actual.iter().enumerate().find(|(_, t)| !pred(t)) {
        panic!("Tuple at index {i} failed the predicate: {t}");
    }
}

fn render(tuples: &[Tuple]) -> String {
    let parts: Vec<String> = tuples.iter().map(ToString::to_string).collect();
    format!("[{}]", parts.join(", "))
}
