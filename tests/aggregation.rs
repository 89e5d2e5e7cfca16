//! Aggregation chains after group nodes.

use anyhow::Result;
use tuplestream::testing::*;
use tuplestream::*;

fn plan_error(err: &anyhow::Error) -> &PlanError {
    err.downcast_ref::<PlanError>()
        .map(PlanError::kind)
        .unwrap_or_else(|| panic!("expected a plan error, got {err:#}"))
}

fn scores(p: &Pipeline) -> Pipe {
    p.source(
        "scores",
        fields!["team", "score"],
        vec![
            tuple!["red", 3],
            tuple!["blue", 5],
            tuple!["red", 4],
            tuple!["blue", 1],
            tuple!["red", 2],
        ],
    )
}

#[test]
fn count_per_key_starts_from_the_key() -> Result<()> {
    let p = TestPipeline::new();
    let counted = scores(&p)
        .group_by("team")
        .aggregate("count", FieldSelector::All, fields!["n"], Count);

    assert_eq!(counted.scope()?.outgoing, fields!["team", "n"]);
    assert_tuples_equal(&counted.collect_seq()?, &[tuple!["blue", 2], tuple!["red", 3]]);
    Ok(())
}

#[test]
fn chained_aggregations_append_in_order() -> Result<()> {
    let p = TestPipeline::new();
    let stats = scores(&p)
        .group_by("team")
        .aggregate("sum", "score", fields!["total"], Sum)
        .aggregate("max", "score", fields!["best"], Max)
        .aggregate("min", "score", fields!["worst"], Min);

    assert_eq!(stats.scope()?.outgoing, fields!["team", "total", "best", "worst"]);
    assert_tuples_equal(
        &stats.collect_seq()?,
        &[tuple!["blue", 6, 5, 1], tuple!["red", 9, 4, 2]],
    );
    Ok(())
}

#[test]
fn first_and_last_follow_sort_order() -> Result<()> {
    let p = TestPipeline::new();
    let ends = scores(&p)
        .group_by_sorted("team", "score", false)
        .aggregate("first", "score", fields!["low"], First)
        .aggregate("last", "score", fields!["high"], Last);
    assert_tuples_equal(
        &ends.collect_seq()?,
        &[tuple!["blue", 1, 5], tuple!["red", 2, 4]],
    );
    Ok(())
}

#[test]
fn average_is_a_float() -> Result<()> {
    let p = TestPipeline::new();
    let avg = scores(&p)
        .group_by("team")
        .aggregate("avg", "score", fields!["mean"], Average);
    assert_tuples_equal(&avg.collect_seq()?, &[tuple!["blue", 3.0], tuple!["red", 3.0]]);
    Ok(())
}

#[test]
fn aggregate_results_cannot_feed_later_aggregations() -> Result<()> {
    let p = TestPipeline::new();
    let chained = scores(&p)
        .group_by("team")
        .aggregate("count", FieldSelector::All, fields!["n"], Count)
        .aggregate("sum", "n", fields!["total"], Sum);

    let err = chained.plan().err().expect("plan must fail");
    assert_eq!(
        plan_error(&err),
        &PlanError::ChainedAggregation {
            field: "n".to_string()
        }
    );
    Ok(())
}

#[test]
fn aggregation_needs_a_group() -> Result<()> {
    let p = TestPipeline::new();
    let err = scores(&p)
        .aggregate("count", FieldSelector::All, fields!["n"], Count)
        .plan()
        .err()
        .expect("plan must fail");
    assert_eq!(plan_error(&err), &PlanError::EveryWithoutGroup);

    let err = scores(&p)
        .each(Operation::aggregate("count", fields!["n"], Count))
        .plan()
        .err()
        .expect("plan must fail");
    assert!(matches!(plan_error(&err), PlanError::MisplacedOperation { .. }));
    Ok(())
}

#[test]
fn aggregation_over_joined_values() -> Result<()> {
    let p = TestPipeline::new();
    let orders = p.source(
        "orders",
        fields!["customer", "amount"],
        vec![tuple![1, 10], tuple![1, 15], tuple![2, 7]],
    );
    let customers = p.source(
        "customers",
        fields!["customer", "name"],
        vec![tuple![1, "ann"], tuple![2, "bo"], tuple![3, "cy"]],
    );
    let totals = orders
        .co_group("orders_by_customer", Branch::new("orders", "customer"))
        .join(&customers, Branch::new("customers", "customer"))
        .build()?
        .aggregate("name", "name", fields!["who"], First)
        .aggregate("total", "amount", fields!["spent"], Sum);

    assert_tuples_equal(
        &totals.collect_seq()?,
        &[tuple![1, "ann", 25], tuple![2, "bo", 7]],
    );
    Ok(())
}

#[test]
fn empty_key_groups_everything_together() -> Result<()> {
    let p = TestPipeline::new();
    let all = scores(&p)
        .group_by(FieldSelector::None)
        .aggregate("count", FieldSelector::All, fields!["n"], Count);
    assert_eq!(all.scope()?.outgoing, fields!["n"]);
    assert_tuples_equal(&all.collect_seq()?, &[tuple![5]]);
    Ok(())
}

#[test]
fn per_record_steps_follow_aggregations() -> Result<()> {
    let p = TestPipeline::new();
    let big = scores(&p)
        .group_by("team")
        .aggregate("sum", "score", fields!["total"], Sum)
        .filter("big", |t| t.get(1).and_then(Value::as_f64).is_some_and(|v| v > 7.0));
    assert_tuples_equal(&big.collect_seq()?, &[tuple!["red", 9]]);
    Ok(())
}

#[test]
fn sum_overflow_fails_the_run() {
    let p = TestPipeline::new();
    let rows = p.source("rows", fields!["k", "n"], vec![tuple![1, i64::MAX], tuple![1, 1]]);
    let err = rows
        .group_by("k")
        .aggregate("sum", "n", fields!["total"], Sum)
        .collect_seq()
        .err()
        .expect("overflow must fail");
    assert!(matches!(
        err.downcast_ref::<ExecError>(),
        Some(ExecError::Operation { .. })
    ));
}
