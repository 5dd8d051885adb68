//! `foreach(row=outer, query?, column?, workers=N, async=bool)` —
//! iterates the rows of `outer`, with each item's columns bound as
//! variables in a child scope (spec.md §4.6).
//!
//! `column`, when given, selects which field of the outer row
//! supplies the iteration source: that field's value is taken
//! instead of the whole outer row, and if it is itself a sequence,
//! each of its elements becomes its own item. `query`, when given,
//! is evaluated under each item's child scope and its rows are
//! emitted; when `query` is absent the item itself is emitted.
//!
//! The concurrency strategy follows spec.md §5 and SPEC_FULL.md §5:
//! `async=false` (the default) fans work out over a small pool of OS
//! threads sized by `EngineConfig::foreach_default_workers`;
//! `async=true` instead runs a `tokio` current-thread runtime on the
//! plugin's own OS thread and bounds concurrency with a
//! `tokio::sync::Semaphore` sized by
//! `EngineConfig::foreach_async_default_workers`. Both paths are
//! grounded on the teacher's `src/functional/concurrent_processing.rs`
//! `ConcurrentProcessor`, which gates a fixed-size async worker pool
//! behind a semaphore the same way.

use std::sync::mpsc::{Receiver, SyncSender};
use std::sync::{Arc, Mutex};

use crate::args::{ArgFieldSpec, ArgKind, ArgSchema, ParsedArgs};
use crate::cancellation::CancellationToken;
use crate::dict::Dict;
use crate::scope::Scope;
use crate::stored_query::StoredQuery;
use crate::value::Value;

use super::{spawn_plugin_thread, Plugin};

pub struct ForeachPlugin;

impl Plugin for ForeachPlugin {
    fn name(&self) -> &'static str {
        "foreach"
    }

    fn schema(&self) -> Arc<ArgSchema> {
        crate::args::compiled_schema::<ForeachPlugin>(|| {
            ArgSchema::new(vec![
                ArgFieldSpec::required("row", ArgKind::StoredQuery),
                ArgFieldSpec::optional("query", ArgKind::StoredQuery),
                ArgFieldSpec::optional("column", ArgKind::Str),
                ArgFieldSpec::optional("workers", ArgKind::Int),
                ArgFieldSpec::optional("async", ArgKind::Bool),
            ])
        })
    }

    fn call(&self, args: ParsedArgs, scope: Arc<Scope>, cancel: CancellationToken) -> Receiver<Dict> {
        let capacity = scope.config().channel_capacity;
        let outer = args.stored_query("row").expect("row is required");
        let inner = args.stored_query("query");
        let column = args.str("column").map(|s| s.to_string());
        let workers = args.int("workers").map(|n| n as usize);
        let use_async = args.bool("async");

        spawn_plugin_thread(
            capacity,
            move |tx, cancel| {
                let items = outer
                    .materialize(&scope)
                    .into_iter()
                    .flat_map(|row| select_items(row, column.as_deref()))
                    .collect();
                if use_async {
                    run_async(items, inner, scope, tx, cancel, workers);
                } else {
                    run_sync(items, inner, scope, tx, cancel, workers);
                }
            },
            cancel,
        )
    }
}

/// Expands one outer row into its iteration items. Without `column`
/// the row itself is the single item; with `column`, that field's
/// value becomes the item (or, if it is a sequence, each element
/// becomes its own item).
fn select_items(row: Dict, column: Option<&str>) -> Vec<Dict> {
    let Some(column) = column else {
        return vec![row];
    };
    match row.get_or_default(column) {
        Value::Sequence(items) => items.iter().cloned().map(Value::wrap_as_row).collect(),
        other => vec![other.wrap_as_row()],
    }
}

fn bind_row(scope: &Arc<Scope>, row: &Dict) -> Arc<Scope> {
    let child = scope.copy();
    for (k, v) in row.iter() {
        child.set_var(k.to_string(), v.clone());
    }
    child
}

/// Runs one item: emits the item itself if `inner` is absent,
/// otherwise evaluates `inner` under the item's child scope and
/// emits its rows.
fn run_item(item: &Dict, inner: &Option<Arc<StoredQuery>>, scope: &Arc<Scope>, tx: &SyncSender<Dict>, cancel: &CancellationToken) -> bool {
    let child_scope = bind_row(scope, item);
    match inner {
        Some(inner) => {
            for out in inner.materialize(&child_scope) {
                if cancel.is_cancelled() || tx.send(out).is_err() {
                    return false;
                }
            }
        }
        None => {
            if tx.send(item.clone()).is_err() {
                return false;
            }
        }
    }
    true
}

fn run_sync(
    items: Vec<Dict>,
    inner: Option<Arc<StoredQuery>>,
    scope: Arc<Scope>,
    tx: SyncSender<Dict>,
    cancel: CancellationToken,
    workers: Option<usize>,
) {
    let workers = workers.unwrap_or(scope.config().foreach_default_workers).max(1);
    let queue = Arc::new(Mutex::new(items.into_iter()));
    let mut handles = Vec::with_capacity(workers);
    for _ in 0..workers {
        let queue = queue.clone();
        let inner = inner.clone();
        let scope = scope.clone();
        let tx = tx.clone();
        let cancel = cancel.clone();
        handles.push(std::thread::spawn(move || loop {
            if cancel.is_cancelled() {
                return;
            }
            let next_item = queue.lock().expect("foreach queue mutex poisoned").next();
            let Some(item) = next_item else { return };
            if !run_item(&item, &inner, &scope, &tx, &cancel) {
                return;
            }
        }));
    }
    for h in handles {
        let _ = h.join();
    }
}

fn run_async(
    items: Vec<Dict>,
    inner: Option<Arc<StoredQuery>>,
    scope: Arc<Scope>,
    tx: SyncSender<Dict>,
    cancel: CancellationToken,
    workers: Option<usize>,
) {
    let worker_count = workers.unwrap_or(scope.config().foreach_async_default_workers).max(1);
    let runtime = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
        Ok(rt) => rt,
        Err(e) => {
            crate::error::log_runtime(
                crate::error::ErrorKind::Resource,
                format!("foreach(async=true) failed to start its runtime: {}", e),
            );
            return;
        }
    };

    runtime.block_on(async move {
        let semaphore = Arc::new(tokio::sync::Semaphore::new(worker_count));
        let mut tasks = Vec::with_capacity(items.len());
        for item in items {
            if cancel.is_cancelled() {
                break;
            }
            let Ok(permit) = semaphore.clone().acquire_owned().await else {
                break;
            };
            let inner = inner.clone();
            let scope = scope.clone();
            let tx = tx.clone();
            let cancel = cancel.clone();
            tasks.push(tokio::task::spawn_blocking(move || {
                let _permit = permit;
                if cancel.is_cancelled() {
                    return;
                }
                run_item(&item, &inner, &scope, &tx, &cancel);
            }));
        }
        for task in tasks {
            let _ = task.await;
        }
    });
}
