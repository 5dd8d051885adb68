//! The row-pipeline SELECT evaluator (spec.md §4.1).
//!
//! A compiled `SelectPlan` resolves its FROM source to a stream of
//! rows, evaluates WHERE in a per-row scope, projects columns (or
//! passes `SELECT *` through verbatim), optionally routes rows
//! through a `Grouper` for `GROUP BY`, optionally buffers and sorts
//! through `sorter::sort_rows` for `ORDER BY`, and applies `LIMIT` —
//! closing its output channel (and, via `CancellationToken`, its
//! whole upstream subtree) as soon as the limit is reached.
//!
//! Grounded on the teacher's `src/functional/query_builder.rs`
//! (`QueryBuilder`, a fluent plan assembled once and run many times)
//! and `src/functional/iterator_engine.rs` for the pull-driven,
//! stage-by-stage row flow.

use std::sync::mpsc::{Receiver, SyncSender};
use std::sync::Arc;

use crate::ast::{contains_aggregate, eval_args, EvalContext, Expr};
use crate::cancellation::CancellationToken;
use crate::dict::Dict;
use crate::grouper::Grouper;
use crate::plugins::spawn_plugin_thread;
use crate::scope::Scope;
use crate::sorter::{self, OrderKey};
use crate::stored_query::StoredQuery;
use crate::value::Value;

/// One projected output column: `expr AS name` (spec.md §4.1.1). The
/// name for a bare expression is derived by whatever built this plan;
/// `select` only ever sees the resolved name.
#[derive(Clone)]
pub struct ProjectedColumn {
    pub name: String,
    pub expr: Expr,
}

/// Where a SELECT's rows come from (spec.md §4.1, §4.3): a plugin
/// `Call` in FROM position, or a reference to a previously bound
/// `LET` name.
#[derive(Clone)]
pub enum FromSource {
    Plugin { name: String, args: Vec<(String, Expr)> },
    Var(String),
    /// `FROM name(p1=v1, ...)` — a call to a parameterized `LET`
    /// binding (spec.md §4.3, §8 scenario S5).
    Call { name: String, args: Vec<(String, Expr)> },
}

/// A compiled SELECT statement.
#[derive(Clone)]
pub struct SelectPlan {
    pub from: FromSource,
    pub where_clause: Option<Expr>,
    /// `SELECT *` copies the source row's columns verbatim before any
    /// named columns are appended (spec.md §4.1.1).
    pub star: bool,
    pub columns: Vec<ProjectedColumn>,
    pub group_by: Option<Expr>,
    pub order_by: Vec<OrderKey>,
    pub limit: Option<usize>,
}

impl SelectPlan {
    /// Runs this plan against `scope`, spawning its own producer
    /// thread and returning a bounded channel of output rows, the
    /// same shape as a `Plugin::call` (spec.md §5).
    pub fn execute(self: Arc<Self>, scope: Arc<Scope>, ctx: EvalContext, cancel: CancellationToken) -> Receiver<Dict> {
        let capacity = scope.config().channel_capacity;
        spawn_plugin_thread(
            capacity,
            move |tx, cancel| {
                self.run(&scope, &ctx, &tx, &cancel);
            },
            cancel,
        )
    }

    fn run(&self, scope: &Arc<Scope>, ctx: &EvalContext, tx: &SyncSender<Dict>, cancel: &CancellationToken) {
        let source_rows = self.resolve_from(scope, ctx, cancel);
        // No explicit GROUP BY but at least one aggregate column still
        // groups: the whole input is one implicit bin (spec.md §8 S2).
        let implicit_group = self.group_by.is_none() && self.columns.iter().any(|c| contains_aggregate(&c.expr));
        let mut grouper = (self.group_by.is_some() || implicit_group).then(Grouper::new);
        let mut sort_buffer = Vec::new();
        let mut emitted = 0usize;

        for row in source_rows {
            if cancel.is_cancelled() {
                return;
            }
            let row_scope = scope.copy();
            for (k, v) in row.iter() {
                row_scope.set_var(k.to_string(), v.clone());
            }

            let passes_where = match &self.where_clause {
                Some(expr) => {
                    let cond = expr.eval(&row_scope, ctx);
                    row_scope.dispatcher().truthy(&cond)
                }
                None => true,
            };
            if !passes_where {
                row_scope.close();
                continue;
            }

            if let Some(grouper) = grouper.as_mut() {
                let bin_key = match &self.group_by {
                    Some(group_expr) => group_expr.eval(&row_scope, ctx),
                    None => Value::Bool(true),
                };
                let dispatcher = row_scope.dispatcher().clone();
                grouper.route(&dispatcher, bin_key, &row_scope, &row, |bin_row_scope| {
                    self.project(&row, bin_row_scope, ctx)
                });
                row_scope.close();
                continue;
            }

            let out = self.project(&row, &row_scope, ctx);
            row_scope.close();

            if self.order_by.is_empty() {
                if let Some(limit) = self.limit {
                    if emitted >= limit {
                        cancel.cancel();
                        return;
                    }
                }
                if tx.send(out).is_err() {
                    return;
                }
                emitted += 1;
                if let Some(limit) = self.limit {
                    if emitted >= limit {
                        // LIMIT satisfied: cancel so the FROM producer
                        // (still running upstream of this loop) stops
                        // instead of being drained to completion.
                        cancel.cancel();
                        return;
                    }
                }
            } else {
                sort_buffer.push(out);
            }
        }

        if let Some(grouper) = grouper.take() {
            let mut grouped = grouper.finish();
            if !self.order_by.is_empty() {
                grouped = sorter::sort_rows(grouped, &self.order_by, scope, ctx);
            }
            let limit = self.limit.unwrap_or(usize::MAX);
            for out in grouped.into_iter().take(limit) {
                if cancel.is_cancelled() || tx.send(out).is_err() {
                    return;
                }
            }
            return;
        }

        if !self.order_by.is_empty() {
            let sorted = sorter::sort_rows(sort_buffer, &self.order_by, scope, ctx);
            let limit = self.limit.unwrap_or(usize::MAX);
            for out in sorted.into_iter().take(limit) {
                if cancel.is_cancelled() || tx.send(out).is_err() {
                    return;
                }
            }
        }
    }

    /// Resolves FROM to a lazily-pulled row stream. For a plugin call
    /// this is the plugin's own channel, consumed one row at a time
    /// rather than drained up front, so a downstream LIMIT can cancel
    /// the producer before it finishes (spec.md §4.1 step 6). Stored-
    /// query sources materialize eagerly since each runs its own
    /// self-contained pipeline with its own cancellation token.
    fn resolve_from(&self, scope: &Arc<Scope>, ctx: &EvalContext, cancel: &CancellationToken) -> Box<dyn Iterator<Item = Dict>> {
        match &self.from {
            FromSource::Plugin { name, args } => {
                let raw = eval_args(args, scope, ctx);
                match ctx.plugins.call(name, &raw, scope.clone(), cancel.clone()) {
                    Ok(rx) => Box::new(rx.into_iter()),
                    Err(e) => {
                        e.log();
                        Box::new(std::iter::empty())
                    }
                }
            }
            FromSource::Var(name) => match scope.resolve(name) {
                Value::StoredQuery(sq) => Box::new(sq.materialize(scope).into_iter()),
                Value::Null => Box::new(std::iter::empty()),
                other => Box::new(std::iter::once(other.wrap_as_row())),
            },
            FromSource::Call { name, args } => {
                let raw = eval_args(args, scope, ctx);
                match scope.resolve(name) {
                    Value::StoredQueryTemplate(template) => Box::new(template.call(&raw).materialize(scope).into_iter()),
                    _ => {
                        crate::error::log_runtime(
                            crate::error::ErrorKind::Type,
                            format!("`{}` is not a parameterized stored query", name),
                        );
                        Box::new(std::iter::empty())
                    }
                }
            }
        }
    }

    /// Builds one output row: `*` columns first (verbatim, if
    /// present), then named columns in declaration order. A later
    /// column with the same name as an earlier one overwrites it but
    /// keeps the earlier column's position (spec.md §4.1.2's
    /// "duplicate output column" tie-break — `Dict::insert` already
    /// has this behavior).
    fn project(&self, source_row: &Dict, row_scope: &Arc<Scope>, ctx: &EvalContext) -> Dict {
        let mut out = Dict::new();
        if self.star {
            for (k, v) in source_row.iter() {
                out.insert(k.to_string(), v.clone());
            }
        }
        for col in &self.columns {
            out.insert(col.name.clone(), col.expr.eval(row_scope, ctx));
        }
        out
    }
}

/// Wraps a compiled plan as a `StoredQuery::Select` source, for use
/// as a `LET` binding's right-hand side or a subquery literal (spec.md
/// §4.3).
pub struct SelectRowSource {
    pub plan: Arc<SelectPlan>,
    pub ctx: EvalContext,
}

impl crate::stored_query::RowSource for SelectRowSource {
    fn rows(&self, scope: &Arc<Scope>) -> Vec<Dict> {
        let rx = self
            .plan
            .clone()
            .execute(scope.clone(), self.ctx.clone(), CancellationToken::new());
        rx.into_iter().collect()
    }
}

pub fn as_stored_query(plan: Arc<SelectPlan>, ctx: EvalContext) -> StoredQuery {
    StoredQuery::from_select(Arc::new(SelectRowSource { plan, ctx }))
}
