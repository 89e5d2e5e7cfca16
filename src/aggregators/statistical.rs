//! Statistical aggregators.

use crate::operation::Aggregator;
use crate::tuple::{Tuple, Value};
use anyhow::{Result, bail};
use ordered_float::OrderedFloat;

/// Arithmetic mean of the first argument field.
///
/// - Accumulator: `(Float sum, Int count)`
/// - Output: `(Float)`, or `(null)` when the group has no non-null values
#[derive(Clone, Copy, Debug, Default)]
pub struct Average;

impl Aggregator for Average {
    fn create(&self) -> Tuple {
        Tuple::new(vec![Value::Float(OrderedFloat(0.0)), Value::Int(0)])
    }

    fn add_input(&self, acc: &mut Tuple, args: &Tuple) -> Result<()> {
        let v = args.get(0).unwrap_or(&Value::Null);
        if v.is_null() {
            return Ok(());
        }
        let Some(x) = v.as_f64() else {
            bail!("cannot average non-numeric value {v}");
        };
        let sum = acc.get(0).and_then(Value::as_f64).unwrap_or(0.0);
        let count = acc.get(1).and_then(Value::as_i64).unwrap_or(0);
        acc.set(0, Value::Float(OrderedFloat(sum + x)));
        acc.set(1, Value::Int(count + 1));
        Ok(())
    }

    #[allow(clippy::cast_precision_loss)]
    fn finish(&self, acc: Tuple) -> Tuple {
        let sum = acc.get(0).and_then(Value::as_f64).unwrap_or(0.0);
        match acc.get(1).and_then(Value::as_i64) {
            Some(count) if count > 0 => Tuple::new(vec![Value::from(sum / count as f64)]),
            _ => Tuple::new(vec![Value::Null]),
        }
    }
}
