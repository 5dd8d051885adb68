//! Aggregate builtins (spec.md §2's component table: `count`, `sum`,
//! `min`, `max`, `enumerate`).
//!
//! Each one reads and updates its accumulator through
//! `AggregatorCtx::modify` — the single primitive named in spec.md
//! §4.4 — so concurrent rows routed to the same GROUP BY bin never
//! race on the running total.

use std::cmp::Ordering;
use std::sync::Arc;

use crate::args::{ArgFieldSpec, ArgKind, ArgSchema, ParsedArgs};
use crate::scope::Scope;
use crate::value::Value;

use super::AggregateFunction;

pub struct Count;
impl AggregateFunction for Count {
    fn name(&self) -> &'static str {
        "count"
    }

    fn schema(&self) -> Arc<ArgSchema> {
        crate::args::compiled_schema::<Count>(|| ArgSchema::new(vec![ArgFieldSpec::optional("value", ArgKind::Any)]))
    }

    fn call(&self, _args: ParsedArgs, scope: &Arc<Scope>, id: u64) -> Value {
        scope.aggregator().modify(id, |cur| match cur {
            Value::Null => Value::Int(1),
            Value::Int(n) => Value::Int(n + 1),
            other => other,
        })
    }
}

pub struct Sum;
impl AggregateFunction for Sum {
    fn name(&self) -> &'static str {
        "sum"
    }

    fn schema(&self) -> Arc<ArgSchema> {
        crate::args::compiled_schema::<Sum>(|| ArgSchema::new(vec![ArgFieldSpec::required("item", ArgKind::Any)]))
    }

    fn call(&self, args: ParsedArgs, scope: &Arc<Scope>, id: u64) -> Value {
        let value = args.any("item");
        scope.aggregator().modify(id, move |cur| match (cur, &value) {
            (Value::Null, Value::Int(n)) => Value::Int(*n),
            (Value::Null, other) => Value::Float(other.as_f64().unwrap_or(0.0)),
            (Value::Int(acc), Value::Int(n)) => Value::Int(acc.wrapping_add(*n)),
            (Value::Int(acc), other) => Value::Float(acc as f64 + other.as_f64().unwrap_or(0.0)),
            (Value::Float(acc), other) => Value::Float(acc + other.as_f64().unwrap_or(0.0)),
            (other, _) => {
                crate::error::log_runtime(
                    crate::error::ErrorKind::Type,
                    format!("sum() accumulator holds a non-numeric value `{}`; resetting to Null", other.canonical_string()),
                );
                Value::Null
            }
        })
    }
}

/// Relies purely on the ordering protocol (`ProtocolDispatcher::cmp`)
/// rather than casting operands to a common numeric type first
/// (spec.md §9's second Open Question).
pub struct Min;
impl AggregateFunction for Min {
    fn name(&self) -> &'static str {
        "min"
    }

    fn schema(&self) -> Arc<ArgSchema> {
        crate::args::compiled_schema::<Min>(|| ArgSchema::new(vec![ArgFieldSpec::required("item", ArgKind::Any)]))
    }

    fn call(&self, args: ParsedArgs, scope: &Arc<Scope>, id: u64) -> Value {
        let value = args.any("item");
        let dispatcher = scope.dispatcher().clone();
        scope.aggregator().modify(id, move |cur| match cur {
            Value::Null => value,
            existing => {
                if dispatcher.cmp(&value, &existing) == Ordering::Less {
                    value
                } else {
                    existing
                }
            }
        })
    }
}

pub struct Max;
impl AggregateFunction for Max {
    fn name(&self) -> &'static str {
        "max"
    }

    fn schema(&self) -> Arc<ArgSchema> {
        crate::args::compiled_schema::<Max>(|| ArgSchema::new(vec![ArgFieldSpec::required("item", ArgKind::Any)]))
    }

    fn call(&self, args: ParsedArgs, scope: &Arc<Scope>, id: u64) -> Value {
        let value = args.any("item");
        let dispatcher = scope.dispatcher().clone();
        scope.aggregator().modify(id, move |cur| match cur {
            Value::Null => value,
            existing => {
                if dispatcher.cmp(&value, &existing) == Ordering::Greater {
                    value
                } else {
                    existing
                }
            }
        })
    }
}

/// Collects every value seen for this bin into a sequence, in
/// arrival order.
pub struct Enumerate;
impl AggregateFunction for Enumerate {
    fn name(&self) -> &'static str {
        "enumerate"
    }

    fn schema(&self) -> Arc<ArgSchema> {
        crate::args::compiled_schema::<Enumerate>(|| {
            ArgSchema::new(vec![ArgFieldSpec::required("items", ArgKind::Any)])
        })
    }

    fn call(&self, args: ParsedArgs, scope: &Arc<Scope>, id: u64) -> Value {
        let value = args.any("items");
        scope.aggregator().modify(id, move |cur| match cur {
            Value::Null => Value::seq(vec![value]),
            Value::Sequence(items) => {
                let mut items = (*items).clone();
                items.push(value);
                Value::seq(items)
            }
            other => other,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::dict::Dict;
    use crate::dispatch::ProtocolDispatcher;

    fn test_scope() -> Arc<Scope> {
        Scope::root(Arc::new(ProtocolDispatcher::new()), Arc::new(EngineConfig::default()))
    }

    fn args_with(key: &str, value: Value) -> Dict {
        let mut d = Dict::new();
        d.insert(key.to_string(), value);
        d
    }

    #[test]
    fn count_increments_per_call() {
        let scope = test_scope();
        let id = crate::aggregate::next_aggregate_id();
        let parsed = crate::args::parse_args(&Count.schema(), &Dict::new(), &scope).unwrap();
        Count.call(parsed, &scope, id);
        let parsed = crate::args::parse_args(&Count.schema(), &Dict::new(), &scope).unwrap();
        let result = Count.call(parsed, &scope, id);
        assert_eq!(result, Value::Int(2));
    }

    #[test]
    fn sum_stays_integer_for_integer_inputs() {
        let scope = test_scope();
        let id = crate::aggregate::next_aggregate_id();
        for n in [1i64, 2, 3] {
            let raw = args_with("item", Value::Int(n));
            let parsed = crate::args::parse_args(&Sum.schema(), &raw, &scope).unwrap();
            Sum.call(parsed, &scope, id);
        }
        assert_eq!(scope.aggregator().get(id), Value::Int(6));
    }

    #[test]
    fn sum_with_non_numeric_accumulator_resets_to_null() {
        let scope = test_scope();
        let id = crate::aggregate::next_aggregate_id();
        scope.aggregator().modify(id, |_| Value::str("not-a-number"));
        let raw = args_with("item", Value::Int(1));
        let parsed = crate::args::parse_args(&Sum.schema(), &raw, &scope).unwrap();
        let result = Sum.call(parsed, &scope, id);
        assert_eq!(result, Value::Null);
    }

    #[test]
    fn min_and_max_track_extremes() {
        let scope = test_scope();
        let min_id = crate::aggregate::next_aggregate_id();
        let max_id = crate::aggregate::next_aggregate_id();
        for n in [5i64, 1, 9, 3] {
            let raw = args_with("item", Value::Int(n));
            let parsed_min = crate::args::parse_args(&Min.schema(), &raw, &scope).unwrap();
            Min.call(parsed_min, &scope, min_id);
            let parsed_max = crate::args::parse_args(&Max.schema(), &raw, &scope).unwrap();
            Max.call(parsed_max, &scope, max_id);
        }
        assert_eq!(scope.aggregator().get(min_id), Value::Int(1));
        assert_eq!(scope.aggregator().get(max_id), Value::Int(9));
    }

    #[test]
    fn enumerate_collects_in_arrival_order() {
        let scope = test_scope();
        let id = crate::aggregate::next_aggregate_id();
        for n in [1i64, 2, 3] {
            let raw = args_with("items", Value::Int(n));
            let parsed = crate::args::parse_args(&Enumerate.schema(), &raw, &scope).unwrap();
            Enumerate.call(parsed, &scope, id);
        }
        assert_eq!(
            scope.aggregator().get(id),
            Value::seq(vec![Value::Int(1), Value::Int(2), Value::Int(3)])
        );
    }
}
