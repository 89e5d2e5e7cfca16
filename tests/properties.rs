//! Cardinality, ordering and selector properties.

use anyhow::Result;
use proptest::prelude::*;
use std::collections::BTreeMap;
use std::sync::Arc;
use tuplestream::functions::identity;
use tuplestream::grouping::{ClosureLayout, GroupJoiner, ShuffleRecord};
use tuplestream::testing::*;
use tuplestream::*;

fn keyed(rows: usize, tag: &str) -> Vec<Tuple> {
    (0..rows).map(|i| tuple![1, format!("{tag}{i}")]).collect()
}

proptest! {
    #[test]
    fn inner_join_emits_m_times_n(m in 0usize..7, n in 0usize..7) {
        let p = Pipeline::default();
        let left = p.source("left", fields!["k", "v"], keyed(m, "l"));
        let right = p.source("right", fields!["k", "w"], keyed(n, "r"));
        let joined = left
            .co_group("join", Branch::new("left", "k"))
            .join(&right, Branch::new("right", "k"))
            .build()
            .map_err(|e| TestCaseError::fail(e.to_string()))?;
        let out = joined.collect_seq().map_err(|e| TestCaseError::fail(e.to_string()))?;

        prop_assert_eq!(out.len(), m * n);
        // Key plus one value field per branch.
        prop_assert!(out.iter().all(|t| t.arity() == 3));
    }

    #[test]
    fn strategy_output_width_is_sum_of_value_arities(
        left in 1usize..4,
        right in 1usize..4,
        rows in 1usize..4,
    ) {
        let mut records: Vec<ShuffleRecord> = Vec::new();
        for _ in 0..rows {
            records.push(ShuffleRecord::new(1, tuple![7], Tuple::nulls(right)));
        }
        for _ in 0..rows {
            records.push(ShuffleRecord::new(0, tuple![7], Tuple::nulls(left)));
        }
        let layout = ClosureLayout::new(vec![left, right]).driver_last(true);
        let mut joiner = GroupJoiner::new(Arc::new(InnerJoin), layout, records.into_iter().map(Ok));
        let group = joiner
            .next_group()
            .ok_or_else(|| TestCaseError::fail("no group"))?
            .map_err(|e| TestCaseError::fail(e.to_string()))?;
        let out = group.join_all().map_err(|e| TestCaseError::fail(e.to_string()))?;

        prop_assert_eq!(out.len(), rows * rows);
        prop_assert!(out.iter().all(|t| t.arity() == left + right));
    }

    #[test]
    fn self_join_emits_c_to_the_r(c in 0usize..5, r in 1usize..4) {
        let p = Pipeline::default();
        let rows = p.source("rows", fields!["k", "v"], keyed(c, "v"));
        let declared = Fields::new((0..r).map(|i| format!("v{i}")));
        let out = rows
            .self_join("k", r, declared)
            .collect_seq()
            .map_err(|e| TestCaseError::fail(e.to_string()))?;

        prop_assert_eq!(out.len(), c.pow(u32::try_from(r).unwrap_or(0)));
        prop_assert!(out.iter().all(|t| t.arity() == 1 + r));
    }

    #[test]
    fn arguments_output_keeps_argument_order(picks in proptest::sample::subsequence(vec!["a", "b", "c", "d"], 1..=4)) {
        let mut reversed = picks.clone();
        reversed.reverse();
        let p = Pipeline::default();
        let out = p
            .source("rows", fields!["a", "b", "c", "d"], vec![tuple![1, 2, 3, 4]])
            .each(
                identity()
                    .with_arguments(reversed.clone())
                    .with_output(FieldSelector::Arguments),
            );
        let scope = out.scope().map_err(|e| TestCaseError::fail(e.to_string()))?;
        prop_assert_eq!(&scope.outgoing, &Fields::new(reversed.clone()));
        prop_assert_eq!(&scope.outgoing, &scope.arguments);
    }

    #[test]
    fn buffered_replay_preserves_delivery_order(
        n in 0usize..200,
        keys in 1usize..6,
        threshold in 1usize..16,
    ) {
        let p = Pipeline::default();
        let drivers = p.source(
            "drivers",
            fields!["k", "d"],
            (0..keys).map(|k| tuple![k as i64, "d"]).collect(),
        );
        let detail = p.source("detail", sequenced_fields(), sequenced(n, keys));
        let joined = drivers
            .co_group("join", Branch::new("drivers", "k"))
            .join(&detail, Branch::new("detail", "k"))
            .build()
            .map_err(|e| TestCaseError::fail(e.to_string()))?;
        let runner = Runner {
            mode: ExecMode::Sequential,
            ..Runner::default()
        }
        .with_spill(SpillConfig { threshold, dir: None });
        let out = joined.collect_with(&runner).map_err(|e| TestCaseError::fail(e.to_string()))?;

        prop_assert_eq!(out.len(), n);
        let mut last: BTreeMap<Value, i64> = BTreeMap::new();
        for t in &out {
            let (Some(k), Some(seq)) = (t.get(0), t.get(2).and_then(Value::as_i64)) else {
                return Err(TestCaseError::fail(format!("malformed tuple {t}")));
            };
            if let Some(prev) = last.insert(k.clone(), seq) {
                prop_assert!(prev < seq, "key {} replayed {} after {}", k, seq, prev);
            }
        }
    }
}

#[test]
fn keys_out_of_order_are_rejected() -> Result<()> {
    let records = vec![
        ShuffleRecord::new(0, tuple![2], tuple!["b"]),
        ShuffleRecord::new(0, tuple![1], tuple!["a"]),
    ];
    let layout = ClosureLayout::new(vec![1]).driver_last(true);
    let mut joiner = GroupJoiner::new(Arc::new(InnerJoin), layout, records.into_iter().map(Ok));

    let first = joiner.next_group().ok_or_else(|| anyhow::anyhow!("first group"))??;
    assert_eq!(first.join_all()?, vec![tuple!["b"]]);
    let err = joiner
        .next_group()
        .ok_or_else(|| anyhow::anyhow!("second group"))?
        .err()
        .expect("out-of-order key");
    assert!(matches!(
        err.downcast_ref::<ExecError>(),
        Some(ExecError::KeyOrder { .. })
    ));
    Ok(())
}

#[test]
fn descending_joiner_accepts_reversed_keys() -> Result<()> {
    let records = vec![
        ShuffleRecord::new(0, tuple![2], tuple!["b"]),
        ShuffleRecord::new(0, tuple![1], tuple!["a"]),
    ];
    let layout = ClosureLayout::new(vec![1]).driver_last(true);
    let mut joiner =
        GroupJoiner::new(Arc::new(InnerJoin), layout, records.into_iter().map(Ok)).descending(true);
    let mut keys = Vec::new();
    while let Some(group) = joiner.next_group() {
        let group = group?;
        keys.push(group.key().clone());
    }
    assert_eq!(keys, vec![tuple![2], tuple![1]]);
    Ok(())
}
