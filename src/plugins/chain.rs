//! `chain(q1, q2, ...)` — concatenates rows from each sub-query in
//! argument order (spec.md §4.6).

use std::sync::Arc;
use std::sync::mpsc::Receiver;

use crate::args::{ArgSchema, ParsedArgs};
use crate::cancellation::CancellationToken;
use crate::dict::Dict;
use crate::scope::Scope;
use crate::stored_query::StoredQuery;
use crate::value::Value;

use super::{spawn_plugin_thread, Plugin};

pub struct ChainPlugin;

impl Plugin for ChainPlugin {
    fn name(&self) -> &'static str {
        "chain"
    }

    fn schema(&self) -> Arc<ArgSchema> {
        crate::args::compiled_schema::<ChainPlugin>(|| ArgSchema::new(vec![]).with_allow_extra())
    }

    fn call(&self, args: ParsedArgs, scope: Arc<Scope>, cancel: CancellationToken) -> Receiver<Dict> {
        let capacity = scope.config().channel_capacity;
        let queries: Vec<Value> = args.extras().values().cloned().collect();
        spawn_plugin_thread(
            capacity,
            move |tx, cancel| {
                for value in queries {
                    if cancel.is_cancelled() {
                        break;
                    }
                    let reduced = match value {
                        Value::LazyExpr(l) => l.reduce(&scope),
                        other => other,
                    };
                    let sq = match reduced {
                        Value::StoredQuery(sq) => sq,
                        other => Arc::new(StoredQuery::wrapper(other)),
                    };
                    for row in sq.materialize(&scope) {
                        if cancel.is_cancelled() || tx.send(row).is_err() {
                            return;
                        }
                    }
                }
            },
            cancel,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::args::parse_args;
    use crate::config::EngineConfig;
    use crate::dispatch::ProtocolDispatcher;

    fn test_scope() -> Arc<Scope> {
        Scope::root(Arc::new(ProtocolDispatcher::new()), Arc::new(EngineConfig::default()))
    }

    #[test]
    fn concatenates_in_order() {
        let scope = test_scope();
        let mut raw = Dict::new();
        raw.insert("q1".into(), Value::Int(1));
        raw.insert("q2".into(), Value::Int(2));
        let parsed = parse_args(&ChainPlugin.schema(), &raw, &scope).unwrap();
        let rx = ChainPlugin.call(parsed, scope, CancellationToken::new());
        let rows: Vec<_> = rx.into_iter().map(|d| d.get("_value").cloned().unwrap()).collect();
        assert_eq!(rows, vec![Value::Int(1), Value::Int(2)]);
    }
}
