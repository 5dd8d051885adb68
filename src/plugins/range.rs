//! `range(start, end, step=1)` — emits one row per step (spec.md
//! §4.6's grounding plugin set).

use std::sync::Arc;
use std::sync::mpsc::Receiver;

use crate::args::{ArgFieldSpec, ArgKind, ArgSchema, ParsedArgs};
use crate::cancellation::CancellationToken;
use crate::dict::Dict;
use crate::error::{log_runtime, ErrorKind};
use crate::scope::Scope;
use crate::value::Value;

use super::{spawn_plugin_thread, Plugin};

pub struct RangePlugin;

impl Plugin for RangePlugin {
    fn name(&self) -> &'static str {
        "range"
    }

    fn schema(&self) -> Arc<ArgSchema> {
        crate::args::compiled_schema::<RangePlugin>(|| {
            ArgSchema::new(vec![
                ArgFieldSpec::optional("start", ArgKind::Int),
                ArgFieldSpec::required("end", ArgKind::Int),
                ArgFieldSpec::optional("step", ArgKind::Int),
            ])
        })
    }

    fn call(&self, args: ParsedArgs, scope: Arc<Scope>, cancel: CancellationToken) -> Receiver<Dict> {
        let start = args.int("start").unwrap_or(0);
        let end = args.int("end").unwrap_or(0);
        let step = args.int("step").unwrap_or(1);
        let capacity = scope.config().channel_capacity;
        spawn_plugin_thread(
            capacity,
            move |tx, cancel| {
                if step == 0 {
                    log_runtime(ErrorKind::ParseArg, "range() step must be non-zero");
                    return;
                }
                let mut i = start;
                while (step > 0 && i < end) || (step < 0 && i > end) {
                    if cancel.is_cancelled() {
                        break;
                    }
                    let mut row = Dict::new();
                    row.insert("_value".to_string(), Value::Int(i));
                    if tx.send(row).is_err() {
                        break;
                    }
                    i += step;
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
    fn emits_rows_for_each_step() {
        let scope = test_scope();
        let mut raw = Dict::new();
        raw.insert("start".into(), Value::Int(0));
        raw.insert("end".into(), Value::Int(5));
        raw.insert("step".into(), Value::Int(2));
        let parsed = parse_args(&RangePlugin.schema(), &raw, &scope).unwrap();
        let rx = RangePlugin.call(parsed, scope, CancellationToken::new());
        let rows: Vec<_> = rx.into_iter().map(|d| d.get("_value").cloned().unwrap()).collect();
        assert_eq!(rows, vec![Value::Int(0), Value::Int(2), Value::Int(4)]);
    }
}
