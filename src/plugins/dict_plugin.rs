//! `dict(...)` as a `FROM` source — the same constructor as the
//! `dict()` scalar function, but usable directly in a `FROM` clause
//! to produce a one-row result (spec.md §2's component table names
//! `dict` without saying which form; SPEC_FULL.md §4.8 gives it
//! both).

use std::sync::Arc;
use std::sync::mpsc::Receiver;

use crate::args::{ArgFieldSpec, ArgKind, ArgSchema, ParsedArgs};
use crate::cancellation::CancellationToken;
use crate::dict::Dict;
use crate::dispatch::coerce_to_dict;
use crate::scope::Scope;
use crate::value::Value;

use super::{spawn_plugin_thread, Plugin};

pub struct DictPlugin;

impl Plugin for DictPlugin {
    fn name(&self) -> &'static str {
        "dict"
    }

    fn schema(&self) -> Arc<ArgSchema> {
        crate::args::compiled_schema::<DictPlugin>(|| {
            ArgSchema::new(vec![ArgFieldSpec::optional("value", ArgKind::Any)]).with_allow_extra()
        })
    }

    fn call(&self, args: ParsedArgs, scope: Arc<Scope>, cancel: CancellationToken) -> Receiver<Dict> {
        let capacity = scope.config().channel_capacity;
        let mut row = if args.any("value").is_null() {
            Dict::new()
        } else {
            coerce_to_dict(scope.dispatcher(), &args.any("value"))
        };
        for (k, v) in args.extras().iter() {
            let reduced = match v {
                Value::LazyExpr(l) => l.reduce(&scope),
                other => other.clone(),
            };
            row.insert(k.to_string(), reduced);
        }
        spawn_plugin_thread(
            capacity,
            move |tx, _cancel| {
                let _ = tx.send(row);
            },
            cancel,
        )
    }
}
