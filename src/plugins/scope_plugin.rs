//! `scope()` — introspection plugin emitting the calling scope's own
//! `LET` bindings as a single row (spec.md §4.6).

use std::sync::Arc;
use std::sync::mpsc::Receiver;

use crate::args::{ArgSchema, ParsedArgs};
use crate::cancellation::CancellationToken;
use crate::dict::Dict;
use crate::scope::Scope;

use super::{spawn_plugin_thread, Plugin};

pub struct ScopePlugin;

impl Plugin for ScopePlugin {
    fn name(&self) -> &'static str {
        "scope"
    }

    fn schema(&self) -> Arc<ArgSchema> {
        crate::args::compiled_schema::<ScopePlugin>(|| ArgSchema::new(vec![]))
    }

    fn call(&self, _args: ParsedArgs, scope: Arc<Scope>, cancel: CancellationToken) -> Receiver<Dict> {
        let capacity = scope.config().channel_capacity;
        let snapshot = scope.local_vars_snapshot();
        spawn_plugin_thread(
            capacity,
            move |tx, _cancel| {
                let _ = tx.send(snapshot);
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

    #[test]
    fn emits_locally_bound_variables() {
        let scope = Scope::root(Arc::new(ProtocolDispatcher::new()), Arc::new(EngineConfig::default()));
        scope.set_var("x", Value::Int(1));
        let parsed = parse_args(&ScopePlugin.schema(), &Dict::new(), &scope).unwrap();
        let rx = ScopePlugin.call(parsed, scope, CancellationToken::new());
        let rows: Vec<_> = rx.into_iter().collect();
        assert_eq!(rows[0].get("x"), Some(&Value::Int(1)));
    }
}
