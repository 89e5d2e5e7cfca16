//! Basic aggregators: Count, Sum, Min, Max, First, Last

use crate::operation::Aggregator;
use crate::tuple::{Tuple, Value};
use anyhow::{Result, anyhow, bail};
use ordered_float::OrderedFloat;

/* ===================== Count ===================== */

/// Number of tuples per group.
///
/// - Accumulator: `(Int)`
/// - Output: `(Int)`
#[derive(Clone, Copy, Debug, Default)]
pub struct Count;

impl Aggregator for Count {
    fn min_arity(&self) -> usize {
        0
    }

    fn create(&self) -> Tuple {
        Tuple::new(vec![Value::Int(0)])
    }

    fn add_input(&self, acc: &mut Tuple, _args: &Tuple) -> Result<()> {
        let n = acc.get(0).and_then(Value::as_i64).unwrap_or(0);
        acc.set(0, Value::Int(n + 1));
        Ok(())
    }

    fn finish(&self, acc: Tuple) -> Tuple {
        acc
    }
}

/* ===================== Sum ===================== */

/// Sum of the first argument field.
///
/// Integers stay integral until a float is seen; nulls are skipped and an
/// all-null group sums to `0`.
#[derive(Clone, Copy, Debug, Default)]
pub struct Sum;

pub(crate) fn add_values(a: &Value, b: &Value) -> Result<Value> {
    match (a, b) {
        (Value::Null, v) | (v, Value::Null) => Ok(v.clone()),
        (Value::Int(x), Value::Int(y)) => x
            .checked_add(*y)
            .map(Value::Int)
            .ok_or_else(|| anyhow!("integer overflow adding {x} and {y}")),
        (x, y) => match (x.as_f64(), y.as_f64()) {
            (Some(x), Some(y)) => Ok(Value::Float(OrderedFloat(x + y))),
            _ => bail!("cannot add non-numeric values {x} and {y}"),
        },
    }
}

impl Aggregator for Sum {
    fn create(&self) -> Tuple {
        Tuple::new(vec![Value::Null])
    }

    fn add_input(&self, acc: &mut Tuple, args: &Tuple) -> Result<()> {
        let v = args.get(0).unwrap_or(&Value::Null);
        let cur = acc.get(0).cloned().unwrap_or_default();
        acc.set(0, add_values(&cur, v)?);
        Ok(())
    }

    fn finish(&self, acc: Tuple) -> Tuple {
        match acc.get(0) {
            Some(Value::Null) | None => Tuple::new(vec![Value::Int(0)]),
            _ => acc,
        }
    }
}

/* ===================== Min / Max ===================== */

fn keep_extreme(acc: &mut Tuple, args: &Tuple, replace: impl Fn(&Value, &Value) -> bool) {
    let Some(v) = args.get(0).filter(|v| !v.is_null()) else {
        return;
    };
    match acc.get(0) {
        Some(cur) if !cur.is_null() && !replace(v, cur) => {}
        _ => {
            acc.set(0, v.clone());
        }
    }
}

/// Minimum of the first argument field (`null` for an all-null group).
#[derive(Clone, Copy, Debug, Default)]
pub struct Min;

impl Aggregator for Min {
    fn create(&self) -> Tuple {
        Tuple::new(vec![Value::Null])
    }

    fn add_input(&self, acc: &mut Tuple, args: &Tuple) -> Result<()> {
        keep_extreme(acc, args, |v, cur| v < cur);
        Ok(())
    }

    fn finish(&self, acc: Tuple) -> Tuple {
        acc
    }
}

/// Maximum of the first argument field (`null` for an all-null group).
#[derive(Clone, Copy, Debug, Default)]
pub struct Max;

impl Aggregator for Max {
    fn create(&self) -> Tuple {
        Tuple::new(vec![Value::Null])
    }

    fn add_input(&self, acc: &mut Tuple, args: &Tuple) -> Result<()> {
        keep_extreme(acc, args, |v, cur| v > cur);
        Ok(())
    }

    fn finish(&self, acc: Tuple) -> Tuple {
        acc
    }
}

/* ===================== First / Last ===================== */

/// The first argument tuple of the group, in delivery order.
#[derive(Clone, Copy, Debug, Default)]
pub struct First;

impl Aggregator for First {
    fn create(&self) -> Tuple {
        Tuple::empty()
    }

    fn add_input(&self, acc: &mut Tuple, args: &Tuple) -> Result<()> {
        if acc.is_empty() {
            *acc = args.clone();
        }
        Ok(())
    }

    fn finish(&self, acc: Tuple) -> Tuple {
        acc
    }
}

/// The last argument tuple of the group, in delivery order.
#[derive(Clone, Copy, Debug, Default)]
pub struct Last;

impl Aggregator for Last {
    fn create(&self) -> Tuple {
        Tuple::empty()
    }

    fn add_input(&self, acc: &mut Tuple, args: &Tuple) -> Result<()> {
        *acc = args.clone();
        Ok(())
    }

    fn finish(&self, acc: Tuple) -> Tuple {
        acc
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tuple;

    fn run(agg: &dyn Aggregator, rows: &[Tuple]) -> Tuple {
        let mut acc = agg.create();
        for r in rows {
            agg.add_input(&mut acc, r).unwrap();
        }
        agg.finish(acc)
    }

    #[test]
    fn sum_promotes_to_float_and_skips_nulls() {
        let rows = [tuple![1], tuple![Value::Null], tuple![2.5]];
        assert_eq!(run(&Sum, &rows), tuple![3.5]);
        assert_eq!(run(&Sum, &[]), tuple![0]);
    }

    #[test]
    fn min_max_ignore_nulls() {
        let rows = [tuple![Value::Null], tuple![3], tuple![1], tuple![2]];
        assert_eq!(run(&Min, &rows), tuple![1]);
        assert_eq!(run(&Max, &rows), tuple![3]);
    }

    #[test]
    fn first_last_follow_delivery_order() {
        let rows = [tuple!["a", 1], tuple!["b", 2]];
        assert_eq!(run(&First, &rows), tuple!["a", 1]);
        assert_eq!(run(&Last, &rows), tuple!["b", 2]);
        assert_eq!(run(&Count, &rows), tuple![2]);
    }
}
