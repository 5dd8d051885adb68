//! Stored queries and lazy expressions (spec.md §3, §4.3).
//!
//! A `StoredQuery` is a deferred row producer bound by `LET`: either
//! backed by a `SELECT` (materialized by re-running its row pipeline
//! against a scope) or wrapping a single scalar/dict value as a
//! one-row result (`LET x = 5`). A `LazyExpression` is a deferred
//! scalar, captured at the point a column expression is built and
//! reduced only when a consumer actually asks for its value — which
//! is what lets `SELECT a + 1 AS b FROM ...` avoid evaluating `a + 1`
//! for rows that a later `WHERE` or `LIMIT` never reaches.
//!
//! Grounded on the teacher's `src/functional/lazy_pipeline.rs`
//! (`LazyPipeline`, deferred `Iterator` adapters) and
//! `src/functional/query_composition.rs` (`QueryComponent`,
//! composed/deferred evaluation), generalized from lazy iterator
//! chains over a fixed collection to lazy re-evaluation against a
//! mutable, tree-shaped `Scope`.

use std::sync::Arc;

use crate::dict::Dict;
use crate::scope::Scope;
use crate::value::Value;

/// A row source a `StoredQuery::Select` variant defers to. Produced
/// by the row-pipeline evaluator (`crate::select`); kept as a trait
/// object here so `stored_query` does not need to know about the
/// pipeline's channel/thread machinery.
pub trait RowSource: Send + Sync {
    /// Runs the underlying pipeline against `scope` to completion and
    /// returns its rows in emission order. Re-running a `RowSource`
    /// re-executes the query: a `StoredQuery` is a recipe, not a
    /// cached result (spec.md §4.3).
    fn rows(&self, scope: &Arc<Scope>) -> Vec<Dict>;
}

/// A deferred scalar expression. Produced by the column-projection
/// compiler; reduced by whichever protocol or function call first
/// needs the value.
pub trait ScalarSource: Send + Sync {
    fn reduce(&self, scope: &Arc<Scope>) -> Value;
}

#[derive(Clone)]
pub enum StoredQuery {
    /// Backed by a row pipeline; materializing re-runs it.
    Select(Arc<dyn RowSource>),
    /// A single scalar or dict wrapped as a one-row result (spec.md
    /// §3: `LET x = 5` is a `StoredQuery` yielding one row `{_value:
    /// 5}`; `LET x = dict(a=1)` yields one row `{a: 1}`).
    Wrapper(Value),
}

impl std::fmt::Debug for StoredQuery {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoredQuery::Select(_) => write!(f, "StoredQuery::Select(..)"),
            StoredQuery::Wrapper(v) => write!(f, "StoredQuery::Wrapper({:?})", v),
        }
    }
}

impl StoredQuery {
    pub fn from_select(source: Arc<dyn RowSource>) -> Self {
        StoredQuery::Select(source)
    }

    pub fn wrapper(value: Value) -> Self {
        StoredQuery::Wrapper(value)
    }

    /// Produces this query's rows against `scope`. Every call
    /// re-evaluates a `Select`-backed query; a `Wrapper` always
    /// yields the same single row.
    pub fn materialize(&self, scope: &Arc<Scope>) -> Vec<Dict> {
        match self {
            StoredQuery::Select(source) => source.rows(scope),
            StoredQuery::Wrapper(v) => vec![v.clone().wrap_as_row()],
        }
    }
}

/// A parameterized `LET name(p1, p2) = SELECT ...` binding (spec.md
/// §4.3). Calling it with named arguments binds a child scope over
/// the definition-site scope (each formal parameter shadowing any
/// free variable of the same name) and defers to `body` for rows;
/// unbound formals default to `Value::Null` and unknown argument
/// names are logged, not rejected, matching stored queries' general
/// "unknown/missing argument is non-fatal" rule.
pub struct StoredQueryTemplate {
    pub params: Vec<String>,
    pub body: Arc<dyn RowSource>,
    pub defining_scope: Arc<Scope>,
}

impl std::fmt::Debug for StoredQueryTemplate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "StoredQueryTemplate(params={:?})", self.params)
    }
}

impl StoredQueryTemplate {
    pub fn new(params: Vec<String>, body: Arc<dyn RowSource>, defining_scope: Arc<Scope>) -> Self {
        Self { params, body, defining_scope }
    }

    pub fn call(&self, args: &Dict) -> StoredQuery {
        let child = self.defining_scope.copy();
        for p in &self.params {
            child.set_var(p.clone(), args.get(p).cloned().unwrap_or(Value::Null));
        }
        for k in args.keys() {
            if !self.params.iter().any(|p| p == k) {
                crate::error::log_runtime(
                    crate::error::ErrorKind::ParseArg,
                    format!("unknown argument `{}` to parameterized stored query", k),
                );
            }
        }
        StoredQuery::from_select(Arc::new(BoundRowSource {
            body: self.body.clone(),
            scope: child,
        }))
    }
}

/// Re-runs `body` against a scope fixed at template-call time,
/// ignoring whatever scope a later `materialize` call passes in (the
/// call-site's parameter bindings must win, not the materializer's).
struct BoundRowSource {
    body: Arc<dyn RowSource>,
    scope: Arc<Scope>,
}

impl RowSource for BoundRowSource {
    fn rows(&self, _scope: &Arc<Scope>) -> Vec<Dict> {
        self.body.rows(&self.scope)
    }
}

/// Which scope a `LazyExpression` reduces against (spec.md §4.3).
#[derive(Clone)]
pub enum LazyMode {
    /// Reduce against whatever scope the consumer passes in — the
    /// common case for a plain column expression.
    Reduce,
    /// Reduce against the scope captured at construction time,
    /// ignoring the caller's scope. Used for parameter defaults and
    /// other expressions that must see the definition-site scope
    /// rather than the call-site scope (spec.md §4.3 parameter
    /// shadowing).
    ReduceWithScope(Arc<Scope>),
}

#[derive(Clone)]
pub struct LazyExpression {
    source: Arc<dyn ScalarSource>,
    mode: LazyMode,
}

impl std::fmt::Debug for LazyExpression {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "LazyExpression(..)")
    }
}

impl LazyExpression {
    pub fn new(source: Arc<dyn ScalarSource>) -> Self {
        Self {
            source,
            mode: LazyMode::Reduce,
        }
    }

    pub fn with_captured_scope(source: Arc<dyn ScalarSource>, scope: Arc<Scope>) -> Self {
        Self {
            source,
            mode: LazyMode::ReduceWithScope(scope),
        }
    }

    /// Wraps a plain value as a trivial lazy expression that always
    /// reduces to itself, regardless of scope. Used by the argument
    /// parser (`crate::args`) to present a non-lazy argument uniformly
    /// as a `LazyExpr`-kinded one.
    pub fn constant(value: Value) -> Self {
        struct Const(Value);
        impl ScalarSource for Const {
            fn reduce(&self, _scope: &Arc<Scope>) -> Value {
                self.0.clone()
            }
        }
        Self::new(Arc::new(Const(value)))
    }

    /// Reduces to a concrete `Value`. `current_scope` is used unless
    /// this expression was built with a captured scope.
    pub fn reduce(&self, current_scope: &Arc<Scope>) -> Value {
        match &self.mode {
            LazyMode::Reduce => self.source.reduce(current_scope),
            LazyMode::ReduceWithScope(captured) => self.source.reduce(captured),
        }
    }
}
