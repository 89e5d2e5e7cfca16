//! Plan construction, edge scopes and the explain report.

use anyhow::Result;
use tuplestream::planner::{Edge, OptimizationDecision};
use tuplestream::testing::*;
use tuplestream::*;

fn joined_counts(p: &Pipeline) -> Result<Pipe> {
    let fx = left_right_fixture();
    let left = p.source("left", fx.left_fields, fx.left);
    let right = p.source("right", fx.right_fields, fx.right);
    Ok(left
        .co_group("join", Branch::new("left", "k"))
        .join(&right, Branch::new("right", "k"))
        .build()?
        .aggregate("count", FieldSelector::All, fields!["n"], Count))
}

#[test]
fn explain_counts_barriers_and_aggregations() -> Result<()> {
    let p = TestPipeline::new();
    let counts = joined_counts(&p)?;
    let explain = counts.plan()?.explain();

    assert_eq!(explain.steps.len(), 4);
    assert_eq!(explain.cost_estimate.barriers, 1);
    assert_eq!(explain.cost_estimate.aggregations, 1);
    assert_eq!(explain.cost_estimate.total_ops, 2);
    assert_eq!(explain.cost_estimate.record_ops, 0);
    assert_eq!(explain.cost_estimate.source_size, Some(6));

    let group = explain
        .steps
        .iter()
        .find(|s| s.is_barrier)
        .ok_or_else(|| anyhow::anyhow!("no barrier step"))?;
    assert_eq!(group.node_type, "Group");
    assert!(group.description.starts_with("inner join 'join'"), "{}", group.description);
    assert_eq!(group.fields, "['k', 'v', 'w']");
    assert_eq!(explain.steps[3].fields, "['k', 'n']");
    Ok(())
}

#[test]
fn explain_renders_every_section() -> Result<()> {
    let p = TestPipeline::new();
    let text = joined_counts(&p)?.plan()?.explain().to_string();

    for section in [
        "EXECUTION PLAN EXPLANATION",
        "COST ESTIMATES",
        "EXECUTION STEPS",
        "PLANNER DECISIONS",
        "Step 3: Group [BARRIER]",
        "Driver Branch of 'join'",
        "Streamed; only branches 1..N are buffered",
    ] {
        assert!(text.contains(section), "missing {section:?} in\n{text}");
    }
    Ok(())
}

#[test]
fn self_joins_buffer_the_driver() -> Result<()> {
    let p = TestPipeline::new();
    let rows = p.source("rows", fields!["k", "v"], vec![tuple![1, "a"]]);
    let plan = rows.self_join("k", 3, fields!["a", "b", "c"]).plan()?;

    assert!(plan.optimizations.contains(&OptimizationDecision::DriverStreaming {
        group: "self_join".to_string(),
        streamed: false,
    }));
    let group = &plan.explain().steps[1];
    assert!(group.description.contains("3-way self-join"), "{}", group.description);
    assert_eq!(group.cost_hint, 300);
    Ok(())
}

#[test]
fn every_edge_carries_its_scope() -> Result<()> {
    let p = TestPipeline::new();
    let counts = joined_counts(&p)?;
    let plan = counts.plan()?;
    let group_id = plan
        .scopes
        .iter()
        .find_map(|(edge, _)| (edge.slot == 1).then_some(edge.to))
        .flatten()
        .ok_or_else(|| anyhow::anyhow!("no second branch edge"))?;

    // Two branch edges, group to aggregate, and the terminal edge.
    assert_eq!(plan.scopes.len(), 4);
    let right_edge = plan
        .scopes
        .iter()
        .find(|(edge, _)| edge.to == Some(group_id) && edge.slot == 1)
        .map(|(_, scope)| scope.outgoing.clone());
    assert_eq!(right_edge, Some(fields!["k", "w"]));

    let terminal = plan
        .scopes
        .get(&Edge {
            from: counts.id(),
            to: None,
            slot: 0,
        })
        .ok_or_else(|| anyhow::anyhow!("no terminal edge"))?;
    assert_eq!(terminal.outgoing, fields!["k", "n"]);
    assert_eq!(plan.output_scope().map(|s| &s.outgoing), Some(&fields!["k", "n"]));
    Ok(())
}

#[test]
fn plans_cover_only_ancestors() -> Result<()> {
    let p = TestPipeline::new();
    let rows = p.source("rows", fields!["a"], vec![tuple![1]]);
    let _unrelated = p.source("unrelated", fields!["b"], vec![tuple![2], tuple![3]]);
    let doubled = rows.map("double", fields!["a2"], |t| {
        t.iter().map(|v| v.as_i64().map_or(Value::Null, |n| Value::from(n * 2))).collect()
    });

    let explain = doubled.plan()?.explain();
    assert_eq!(explain.steps.len(), 2);
    assert_eq!(explain.cost_estimate.source_size, Some(1));
    assert_eq!(explain.cost_estimate.record_ops, 1);
    assert!(explain.optimizations.iter().any(|d| matches!(
        d,
        OptimizationDecision::PartitionSuggestion {
            source_len: Some(1),
            ..
        }
    )));
    assert_eq!(doubled.collect_seq()?, vec![tuple![2]]);
    Ok(())
}

#[test]
fn planning_a_node_of_another_pipeline_fails() -> Result<()> {
    let p = TestPipeline::new();
    let q = TestPipeline::new();
    let _ = joined_counts(&p)?;
    let lone = q.source("lone", fields!["a"], vec![]);
    let far = p.source("far", fields!["a"], vec![]);

    let err = Plan::build(&q, far.id(), AssertionLevel::Strict)
        .err()
        .expect("node does not exist in q");
    assert!(matches!(
        err.downcast_ref::<PlanError>(),
        Some(PlanError::MissingNode { .. })
    ));
    assert_eq!(Plan::build(&q, lone.id(), AssertionLevel::Strict)?.explain().steps.len(), 1);
    Ok(())
}

#[test]
fn graph_description_lists_every_node() -> Result<()> {
    let p = TestPipeline::new();
    let _ = joined_counts(&p)?;

    assert_eq!(p.node_count(), 4);
    // Two branch inputs plus the aggregation's single input.
    assert_eq!(p.edge_count(), 3);
    let graph = p.describe_graph();
    assert!(graph.contains("#2 Group 'join' <- [#0, #1]"), "{graph}");
    assert!(graph.contains("#3 Every 'count' <- [#2]"), "{graph}");
    Ok(())
}
