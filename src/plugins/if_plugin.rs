//! `if(condition=expr, then=query, else=query)` — conditionally
//! selects one sub-query's rows (spec.md §4.6).

use std::sync::Arc;
use std::sync::mpsc::Receiver;

use crate::args::{ArgFieldSpec, ArgKind, ArgSchema, ParsedArgs};
use crate::cancellation::CancellationToken;
use crate::dict::Dict;
use crate::scope::Scope;

use super::{spawn_plugin_thread, Plugin};

pub struct IfPlugin;

impl Plugin for IfPlugin {
    fn name(&self) -> &'static str {
        "if"
    }

    fn schema(&self) -> Arc<ArgSchema> {
        crate::args::compiled_schema::<IfPlugin>(|| {
            ArgSchema::new(vec![
                ArgFieldSpec::required("condition", ArgKind::Bool),
                ArgFieldSpec::required("then", ArgKind::StoredQuery),
                ArgFieldSpec::optional("else", ArgKind::StoredQuery),
            ])
        })
    }

    fn call(&self, args: ParsedArgs, scope: Arc<Scope>, cancel: CancellationToken) -> Receiver<Dict> {
        let capacity = scope.config().channel_capacity;
        let condition = args.bool("condition");
        let branch = if condition {
            Some(args.stored_query("then").expect("then is required"))
        } else {
            args.stored_query("else")
        };
        spawn_plugin_thread(
            capacity,
            move |tx, cancel| {
                let Some(sq) = branch else { return };
                for row in sq.materialize(&scope) {
                    if cancel.is_cancelled() || tx.send(row).is_err() {
                        return;
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
    use crate::value::Value;

    fn test_scope() -> Arc<Scope> {
        Scope::root(Arc::new(ProtocolDispatcher::new()), Arc::new(EngineConfig::default()))
    }

    #[test]
    fn false_condition_with_no_else_yields_no_rows() {
        let scope = test_scope();
        let mut raw = Dict::new();
        raw.insert("condition".into(), Value::Bool(false));
        raw.insert("then".into(), Value::Int(1));
        let parsed = parse_args(&IfPlugin.schema(), &raw, &scope).unwrap();
        let rx = IfPlugin.call(parsed, scope, CancellationToken::new());
        assert_eq!(rx.into_iter().count(), 0);
    }

    #[test]
    fn true_condition_takes_then_branch() {
        let scope = test_scope();
        let mut raw = Dict::new();
        raw.insert("condition".into(), Value::Bool(true));
        raw.insert("then".into(), Value::Int(1));
        raw.insert("else".into(), Value::Int(2));
        let parsed = parse_args(&IfPlugin.schema(), &raw, &scope).unwrap();
        let rx = IfPlugin.call(parsed, scope, CancellationToken::new());
        let rows: Vec<_> = rx.into_iter().collect();
        assert_eq!(rows[0].get("_value"), Some(&Value::Int(1)));
    }
}
