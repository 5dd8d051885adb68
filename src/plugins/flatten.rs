//! `flatten(query)` — expands every iterable column into a
//! cross-product of rows (spec.md §4.6).
//!
//! For each source row, every column whose value is a sequence is
//! expanded; a row with two iterable columns of length 2 and 3
//! produces 6 output rows, one per combination. A column carrying a
//! single-key `_value` dict is unwrapped to that value before the
//! iterable check, so a wrapped scalar participates like a plain
//! column. Rows with no iterable columns pass through unchanged.

use std::sync::Arc;
use std::sync::mpsc::Receiver;

use crate::args::{ArgFieldSpec, ArgKind, ArgSchema, ParsedArgs};
use crate::cancellation::CancellationToken;
use crate::dict::Dict;
use crate::scope::Scope;
use crate::value::Value;

use super::{spawn_plugin_thread, Plugin};

pub struct FlattenPlugin;

/// Unwraps a single-key `{_value: x}` dict to `x`; any other value
/// passes through unchanged.
fn unwrap_value_dict(v: Value) -> Value {
    match v {
        Value::Dict(d) if d.len() == 1 && d.contains_key("_value") => {
            d.get("_value").cloned().unwrap_or(Value::Null)
        }
        other => other,
    }
}

/// Expands one row into its cross-product over every iterable
/// column, after unwrapping single-key `_value` dicts.
fn expand_row(row: Dict) -> Vec<Dict> {
    let columns: Vec<(String, Value)> = row
        .iter()
        .map(|(k, v)| (k.to_string(), unwrap_value_dict(v.clone())))
        .collect();

    let iterable_cols: Vec<usize> = columns
        .iter()
        .enumerate()
        .filter_map(|(i, (_, v))| match v {
            Value::Sequence(items) if !items.is_empty() => Some(i),
            _ => None,
        })
        .collect();

    if iterable_cols.is_empty() {
        return vec![row];
    }

    let mut out = vec![Dict::new()];
    for (i, (key, value)) in columns.into_iter().enumerate() {
        if iterable_cols.contains(&i) {
            let items = match &value {
                Value::Sequence(items) => items.clone(),
                _ => unreachable!(),
            };
            let mut next = Vec::with_capacity(out.len() * items.len());
            for base in &out {
                for item in items.iter() {
                    let mut row = base.clone();
                    row.insert(key.clone(), item.clone());
                    next.push(row);
                }
            }
            out = next;
        } else {
            for row in out.iter_mut() {
                row.insert(key.clone(), value.clone());
            }
        }
    }
    out
}

impl Plugin for FlattenPlugin {
    fn name(&self) -> &'static str {
        "flatten"
    }

    fn schema(&self) -> Arc<ArgSchema> {
        crate::args::compiled_schema::<FlattenPlugin>(|| {
            ArgSchema::new(vec![ArgFieldSpec::required("query", ArgKind::StoredQuery)])
        })
    }

    fn call(&self, args: ParsedArgs, scope: Arc<Scope>, cancel: CancellationToken) -> Receiver<Dict> {
        let capacity = scope.config().channel_capacity;
        let sq = args.stored_query("query").expect("query is required");
        spawn_plugin_thread(
            capacity,
            move |tx, cancel| {
                for row in sq.materialize(&scope) {
                    if cancel.is_cancelled() {
                        break;
                    }
                    for out in expand_row(row) {
                        if tx.send(out).is_err() {
                            return;
                        }
                    }
                }
            },
            cancel,
        )
    }
}
