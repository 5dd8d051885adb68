//! `GROUP BY` bin bookkeeping (spec.md §4.4).
//!
//! The Grouper consumes `(row, bin_key, per-row-scope)` triples from
//! the SELECT evaluator and produces one row per distinct bin key in
//! first-seen order. The first row seen for a key gets a fresh
//! `AggregatorCtx` attached to a scope derived from that row's scope;
//! every later row for the same key reuses that context. Each row's
//! full projection is re-evaluated against the bin (so aggregate
//! calls in the projection advance the bin's accumulators via
//! `AggregatorCtx::modify`), and the resulting output row replaces
//! whatever was previously stored for that bin — so the stored row
//! after the last row of a bin is exactly the bin's final aggregate
//! state, with no separate finalization pass required.
//!
//! Grounded on the teacher's `src/functional/state_transitions.rs`
//! (an insertion-order-preserving keyed state machine), generalized
//! here from a fixed small state set to an open-ended, row-driven key
//! set compared via the engine's own equality protocol rather than
//! `Hash`/`Eq`.

use std::sync::Arc;

use crate::dict::Dict;
use crate::dispatch::ProtocolDispatcher;
use crate::scope::Scope;
use crate::value::Value;

struct Bin {
    key: Value,
    scope: Arc<Scope>,
    row: Dict,
}

/// Routes rows into bins keyed by structural equality (spec.md §8
/// invariant 3: the emitted bin-key set equals the set of distinct
/// keys seen, each row's aggregates reflecting exactly its bin).
pub struct Grouper {
    bins: Vec<Bin>,
}

impl Default for Grouper {
    fn default() -> Self {
        Self::new()
    }
}

impl Grouper {
    pub fn new() -> Self {
        Self { bins: Vec::new() }
    }

    /// Routes one row. `row_scope` is the per-row evaluation scope
    /// (columns already bound) used only to seed a fresh bin on first
    /// sight of `bin_key`; `project` re-evaluates the query's
    /// projection against the bin's own per-row scope (row columns
    /// re-bound there, sharing the bin's `AggregatorCtx`) and returns
    /// the row to store.
    pub fn route(
        &mut self,
        dispatcher: &ProtocolDispatcher,
        bin_key: Value,
        row_scope: &Arc<Scope>,
        row: &Dict,
        mut project: impl FnMut(&Arc<Scope>) -> Dict,
    ) {
        let idx = match self.bins.iter().position(|b| dispatcher.eq(&b.key, &bin_key)) {
            Some(idx) => idx,
            None => {
                let scope = row_scope.copy_with_new_aggregator();
                self.bins.push(Bin {
                    key: bin_key,
                    scope,
                    row: Dict::new(),
                });
                self.bins.len() - 1
            }
        };
        let bin_scope = self.bins[idx].scope.clone();
        let per_row_scope = bin_scope.copy();
        for (k, v) in row.iter() {
            per_row_scope.set_var(k.to_string(), v.clone());
        }
        let out = project(&per_row_scope);
        per_row_scope.close();
        self.bins[idx].row = out;
    }

    /// Drains the bins in first-seen order, closing each bin's scope
    /// and emitting its last-stored row (spec.md §4.4 step 4).
    pub fn finish(self) -> Vec<Dict> {
        self.bins
            .into_iter()
            .map(|bin| {
                bin.scope.close();
                bin.row
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;

    fn root() -> Arc<Scope> {
        Scope::root(Arc::new(ProtocolDispatcher::new()), Arc::new(EngineConfig::default()))
    }

    fn row_with(key: &str, value: Value) -> Dict {
        let mut d = Dict::new();
        d.insert(key.to_string(), value);
        d
    }

    #[test]
    fn distinct_keys_emit_in_first_seen_order() {
        let dispatcher = ProtocolDispatcher::new();
        let scope = root();
        let mut grouper = Grouper::new();

        grouper.route(&dispatcher, Value::Int(1), &scope, &row_with("p", Value::Int(1)), |s| {
            let mut out = Dict::new();
            out.insert("p".into(), s.resolve("p"));
            out
        });
        grouper.route(&dispatcher, Value::Int(0), &scope, &row_with("p", Value::Int(0)), |s| {
            let mut out = Dict::new();
            out.insert("p".into(), s.resolve("p"));
            out
        });
        grouper.route(&dispatcher, Value::Int(1), &scope, &row_with("p", Value::Int(1)), |s| {
            let mut out = Dict::new();
            out.insert("p".into(), s.resolve("p"));
            out
        });

        let rows = grouper.finish();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].get("p"), Some(&Value::Int(1)));
        assert_eq!(rows[1].get("p"), Some(&Value::Int(0)));
    }

    #[test]
    fn same_bin_aggregator_persists_across_rows() {
        let dispatcher = ProtocolDispatcher::new();
        let scope = root();
        let mut grouper = Grouper::new();
        let id = crate::aggregate::next_aggregate_id();

        for _ in 0..3 {
            grouper.route(&dispatcher, Value::Int(0), &scope, &Dict::new(), |s| {
                let c = s.aggregator().modify(id, |cur| match cur {
                    Value::Null => Value::Int(1),
                    Value::Int(n) => Value::Int(n + 1),
                    other => other,
                });
                let mut out = Dict::new();
                out.insert("c".into(), c);
                out
            });
        }

        let rows = grouper.finish();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].get("c"), Some(&Value::Int(3)));
    }
}
