//! Aggregate-state bookkeeping for `GROUP BY` (spec.md §3, §4.4).
//!
//! Each GROUP BY bin gets its own `AggregatorCtx`: a mutex-protected
//! map from aggregate-call-site id to running accumulator value.
//! `modify` is the single read-modify-write primitive every aggregate
//! function (`count`, `sum`, `min`, `max`, `enumerate`, and any
//! host-registered aggregate) goes through, so accumulator updates
//! are always atomic with respect to the bin they belong to.
//!
//! Grounded on the teacher's `src/functional/state_transitions.rs`
//! (mutex-guarded state machine with a single transition entry
//! point) and `src/functional/immutable_state.rs` (copy-on-write
//! value semantics for the accumulator itself).

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use crate::value::Value;

static NEXT_AGGREGATE_ID: AtomicU64 = AtomicU64::new(1);

/// Allocates a fresh aggregate-call-site id. Called once per
/// aggregate-function AST node at query-compile time, and again
/// whenever a `Scope::copy` duplicates a subtree that contains
/// aggregate calls (spec.md §4.4), so that two structurally-identical
/// aggregate calls reached via different evaluation paths in the same
/// query never share an accumulator.
pub fn next_aggregate_id() -> u64 {
    NEXT_AGGREGATE_ID.fetch_add(1, Ordering::Relaxed)
}

/// Per-bin aggregate accumulator state.
pub struct AggregatorCtx {
    state: Mutex<HashMap<u64, Value>>,
}

impl Default for AggregatorCtx {
    fn default() -> Self {
        Self::new()
    }
}

impl AggregatorCtx {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(HashMap::new()),
        }
    }

    pub fn new_shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Reads the current accumulator for `id` (defaulting to
    /// `Value::Null` the first time it is seen), applies `f`, stores
    /// the result, and returns it. This is the only way aggregate
    /// state is ever mutated (spec.md §4.4).
    pub fn modify(&self, id: u64, f: impl FnOnce(Value) -> Value) -> Value {
        let mut state = self.state.lock().expect("aggregator mutex poisoned");
        let current = state.get(&id).cloned().unwrap_or(Value::Null);
        let updated = f(current);
        state.insert(id, updated.clone());
        updated
    }

    /// Reads the current accumulator for `id` without modifying it.
    pub fn get(&self, id: u64) -> Value {
        self.state
            .lock()
            .expect("aggregator mutex poisoned")
            .get(&id)
            .cloned()
            .unwrap_or(Value::Null)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn modify_seeds_from_null_on_first_call() {
        let ctx = AggregatorCtx::new();
        let id = next_aggregate_id();
        let result = ctx.modify(id, |current| match current {
            Value::Null => Value::Int(1),
            Value::Int(n) => Value::Int(n + 1),
            _ => current,
        });
        assert_eq!(result, Value::Int(1));
    }

    #[test]
    fn modify_accumulates_across_calls() {
        let ctx = AggregatorCtx::new();
        let id = next_aggregate_id();
        for _ in 0..5 {
            ctx.modify(id, |current| match current {
                Value::Null => Value::Int(1),
                Value::Int(n) => Value::Int(n + 1),
                _ => current,
            });
        }
        assert_eq!(ctx.get(id), Value::Int(5));
    }

    #[test]
    fn distinct_ids_stay_independent() {
        let ctx = AggregatorCtx::new();
        let a = next_aggregate_id();
        let b = next_aggregate_id();
        assert_ne!(a, b);
        ctx.modify(a, |_| Value::Int(1));
        assert_eq!(ctx.get(b), Value::Null);
    }
}
