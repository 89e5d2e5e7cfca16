//! Field selector resolution and the arguments/declared/output contract.

use anyhow::Result;
use tuplestream::functions::{identity, insert, regex_split};
use tuplestream::scope::resolve_output;
use tuplestream::testing::*;
use tuplestream::*;

fn plan_error(err: &anyhow::Error) -> &PlanError {
    err.downcast_ref::<PlanError>()
        .map(PlanError::kind)
        .unwrap_or_else(|| panic!("expected a plan error, got {err:#}"))
}

fn people(p: &Pipeline) -> Pipe {
    p.source(
        "people",
        fields!["id", "name", "city"],
        vec![tuple![1, "ann", "oslo"], tuple![2, "bo", "rome"]],
    )
}

fn upper() -> Operation {
    Operation::map_one("upper", fields!["NAME"], |t: &Tuple| {
        t.iter()
            .map(|v| v.as_str().map_or(Value::Null, |s| Value::from(s.to_uppercase())))
            .collect()
    })
}

#[test]
fn arguments_output_round_trips_the_argument_fields() -> Result<()> {
    let p = TestPipeline::new();
    let picked = people(&p).each(
        identity()
            .with_arguments(fields!["city", "id"])
            .with_output(FieldSelector::Arguments),
    );
    let scope = picked.scope()?;
    assert_eq!(scope.arguments, fields!["city", "id"]);
    assert_eq!(scope.outgoing, scope.arguments);
    assert_tuples_equal(&picked.collect_seq()?, &[tuple!["oslo", 1], tuple!["rome", 2]]);
    Ok(())
}

#[test]
fn resolve_output_arguments_is_identity_on_arguments() -> Result<()> {
    let incoming = fields!["a", "b", "c"];
    let arguments = fields!["c", "a"];
    let out = resolve_output(&FieldSelector::Arguments, &incoming, None, &arguments, &fields!["x"])?;
    assert_eq!(out, arguments);
    Ok(())
}

#[test]
fn all_output_appends_declared_fields() -> Result<()> {
    let p = TestPipeline::new();
    let tagged = people(&p).each(insert(fields!["source"], tuple!["crm"]));
    assert_eq!(tagged.scope()?.outgoing, fields!["id", "name", "city", "source"]);
    assert_tuples_equal(
        &tagged.collect_seq()?,
        &[tuple![1, "ann", "oslo", "crm"], tuple![2, "bo", "rome", "crm"]],
    );

    let clash = people(&p).each(insert(fields!["city"], tuple!["x"]));
    let err = clash.plan().err().expect("duplicate name must fail");
    assert!(matches!(plan_error(&err), PlanError::DuplicateField { .. }));
    Ok(())
}

#[test]
fn replace_overwrites_arguments_in_place() -> Result<()> {
    let p = TestPipeline::new();
    let shouted = people(&p).each(
        upper()
            .with_arguments("name")
            .with_output(FieldSelector::Replace),
    );
    assert_eq!(shouted.scope()?.outgoing, fields!["id", "NAME", "city"]);
    assert_tuples_equal(
        &shouted.collect_seq()?,
        &[tuple![1, "ANN", "oslo"], tuple![2, "BO", "rome"]],
    );

    let wrong = people(&p).each(
        upper()
            .with_arguments(fields!["name", "city"])
            .with_output(FieldSelector::Replace),
    );
    let err = wrong.plan().err().expect("size mismatch must fail");
    assert_eq!(
        plan_error(&err),
        &PlanError::ReplaceSizeMismatch {
            arguments: 2,
            declared: 1
        }
    );
    Ok(())
}

#[test]
fn swap_moves_declared_fields_to_the_end() -> Result<()> {
    let p = TestPipeline::new();
    let swapped = people(&p).each(
        upper()
            .with_arguments("name")
            .with_output(FieldSelector::Swap),
    );
    assert_eq!(swapped.scope()?.outgoing, fields!["id", "city", "NAME"]);
    assert_tuples_equal(
        &swapped.collect_seq()?,
        &[tuple![1, "oslo", "ANN"], tuple![2, "rome", "BO"]],
    );
    Ok(())
}

#[test]
fn explicit_output_selects_from_incoming_and_declared() -> Result<()> {
    let p = TestPipeline::new();
    let picked = people(&p).each(
        upper()
            .with_arguments("name")
            .with_output(fields!["NAME", "id"]),
    );
    assert_eq!(picked.scope()?.outgoing, fields!["NAME", "id"]);
    assert_tuples_equal(&picked.collect_seq()?, &[tuple!["ANN", 1], tuple!["BO", 2]]);
    Ok(())
}

#[test]
fn negative_positions_count_from_the_end() -> Result<()> {
    let p = TestPipeline::new();
    let last = people(&p).each(identity().with_arguments(Fields::new([-1])));
    assert_eq!(last.scope()?.outgoing, fields!["city"]);
    assert_tuples_equal(&last.collect_seq()?, &[tuple!["oslo"], tuple!["rome"]]);
    Ok(())
}

#[test]
fn group_keys_and_values_resolve_after_a_group() -> Result<()> {
    let p = TestPipeline::new();
    let grouped = people(&p).group_by("city");
    let keys = grouped.each(identity().with_arguments(FieldSelector::GroupKeys));
    let values = grouped.each(identity().with_arguments(FieldSelector::Values));
    assert_eq!(keys.scope()?.outgoing, fields!["city"]);
    assert_eq!(values.scope()?.outgoing, fields!["id", "name"]);
    assert_tuples_equal(&keys.collect_seq()?, &[tuple!["oslo"], tuple!["rome"]]);

    let err = people(&p)
        .each(identity().with_arguments(FieldSelector::GroupKeys))
        .plan()
        .err()
        .expect("no key on a source edge");
    assert!(matches!(plan_error(&err), PlanError::EmptySelection { .. }));
    Ok(())
}

#[test]
fn selection_errors_surface_at_plan_time() -> Result<()> {
    let p = TestPipeline::new();

    let err = people(&p)
        .each(identity().with_arguments("age"))
        .plan()
        .err()
        .expect("unknown field");
    assert!(matches!(plan_error(&err), PlanError::UnresolvableFields { .. }));

    let err = people(&p)
        .each(regex_split(fields!["a", "b"], ",")?.with_arguments(FieldSelector::None))
        .plan()
        .err()
        .expect("too few arguments");
    assert_eq!(
        plan_error(&err),
        &PlanError::Arity {
            required: 1,
            actual: 0
        }
    );

    let err = people(&p)
        .map("nothing", Fields::none(), |t| t.clone())
        .plan()
        .err()
        .expect("empty declaration");
    assert!(matches!(plan_error(&err), PlanError::EmptySelection { .. }));
    Ok(())
}

#[test]
fn plan_errors_name_the_failing_node() -> Result<()> {
    let p = TestPipeline::new();
    let err = people(&p)
        .each(identity().with_arguments("age"))
        .plan()
        .err()
        .expect("unknown field");
    let message = err.to_string();
    assert!(message.contains("identity"), "{message}");
    assert!(matches!(
        err.downcast_ref::<PlanError>(),
        Some(PlanError::InNode { .. })
    ));
    Ok(())
}

#[test]
fn built_in_filters_compose() -> Result<()> {
    use tuplestream::assertion::assert_equals;
    use tuplestream::functions::{not, regex_filter};

    let p = TestPipeline::new();
    let non_o = people(&p)
        .each(not(regex_filter("^o")?.with_arguments("city"))?)
        .each(
            identity()
                .with_arguments("name")
                .with_output(FieldSelector::Arguments),
        )
        .each(assert_equals(AssertionLevel::Strict, tuple!["bo"]));
    assert_tuples_equal(&non_o.collect_seq()?, &[tuple!["bo"]]);
    Ok(())
}

#[test]
fn branch_names_must_be_unique() -> Result<()> {
    let p = TestPipeline::new();
    let a = people(&p);
    let b = people(&p);
    let err = a
        .co_group("join", Branch::new("people", "id"))
        .join(&b, Branch::new("people", "id"))
        .declared(fields!["n1", "c1", "n2", "c2"])
        .build()?
        .plan()
        .err()
        .expect("duplicate branch name");
    assert!(matches!(plan_error(&err), PlanError::DuplicateBranch { .. }));
    Ok(())
}
