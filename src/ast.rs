//! The expression tree a compiled query plan is built from.
//!
//! The concrete grammar and parser that produce an `Expr` tree from
//! source text are out of scope here; `ast` only defines the shape a
//! compiled plan takes and how to reduce it against a `Scope`. This
//! mirrors how the teacher separates `src/functional/query_builder.rs`
//! (a fluent plan builder) from whatever originally produced its
//! inputs.

use std::sync::Arc;

use crate::args::parse_args;
use crate::cancellation::CancellationToken;
use crate::dict::Dict;
use crate::dispatch::ArithOp;
use crate::functions::FunctionRegistry;
use crate::plugins::PluginRegistry;
use crate::scope::Scope;
use crate::stored_query::{RowSource, StoredQuery};
use crate::value::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

#[derive(Clone)]
pub enum Expr {
    Literal(Value),
    /// A bound variable or bare column reference.
    Var(String),
    /// `a[b]` / `a.b` via the associative protocol.
    Get(Box<Expr>, Box<Expr>),
    Not(Box<Expr>),
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
    Compare(CompareOp, Box<Expr>, Box<Expr>),
    Arith(ArithOp, Box<Expr>, Box<Expr>),
    /// `needle In haystack`.
    In(Box<Expr>, Box<Expr>),
    RegexMatch(Box<Expr>, Box<Expr>),
    ScalarCall {
        name: String,
        args: Vec<(String, Expr)>,
    },
    /// `id` is assigned once, at plan-compile time, via
    /// `aggregate::next_aggregate_id` (spec.md §4.4).
    AggregateCall {
        name: String,
        args: Vec<(String, Expr)>,
        id: u64,
    },
    /// A subquery literal: `SELECT ... FROM plugin(args)` embedded as
    /// an expression, reduced to a `Value::StoredQuery`.
    PluginCall {
        name: String,
        args: Vec<(String, Expr)>,
    },
    /// `name(p1=v1, p2=v2)` — a call to a parameterized `LET` binding
    /// (spec.md §4.3). `name` resolves to a `Value::StoredQueryTemplate`
    /// in scope; the result reduces to a `Value::StoredQuery` bound to
    /// this call's arguments.
    StoredQueryCall {
        name: String,
        args: Vec<(String, Expr)>,
    },
}

/// Shared handles an `Expr` tree needs to resolve function and
/// plugin calls while reducing.
#[derive(Clone)]
pub struct EvalContext {
    pub functions: Arc<FunctionRegistry>,
    pub plugins: Arc<PluginRegistry>,
}

impl Expr {
    pub fn eval(&self, scope: &Arc<Scope>, ctx: &EvalContext) -> Value {
        let dispatcher = scope.dispatcher().clone();
        match self {
            Expr::Literal(v) => v.clone(),
            Expr::Var(name) => scope.resolve(name),
            Expr::Get(a, b) => {
                let a = a.eval(scope, ctx);
                let b = b.eval(scope, ctx);
                dispatcher.get(&a, &b).unwrap_or(Value::Null)
            }
            Expr::Not(a) => Value::Bool(!dispatcher.truthy(&a.eval(scope, ctx))),
            Expr::And(a, b) => {
                let left = a.eval(scope, ctx);
                if !dispatcher.truthy(&left) {
                    return Value::Bool(false);
                }
                Value::Bool(dispatcher.truthy(&b.eval(scope, ctx)))
            }
            Expr::Or(a, b) => {
                let left = a.eval(scope, ctx);
                if dispatcher.truthy(&left) {
                    return Value::Bool(true);
                }
                Value::Bool(dispatcher.truthy(&b.eval(scope, ctx)))
            }
            Expr::Compare(op, a, b) => {
                let a = a.eval(scope, ctx);
                let b = b.eval(scope, ctx);
                Value::Bool(match op {
                    CompareOp::Eq => dispatcher.eq(&a, &b),
                    CompareOp::Ne => !dispatcher.eq(&a, &b),
                    CompareOp::Lt => dispatcher.cmp(&a, &b) == std::cmp::Ordering::Less,
                    CompareOp::Le => dispatcher.cmp(&a, &b) != std::cmp::Ordering::Greater,
                    CompareOp::Gt => dispatcher.cmp(&a, &b) == std::cmp::Ordering::Greater,
                    CompareOp::Ge => dispatcher.cmp(&a, &b) != std::cmp::Ordering::Less,
                })
            }
            Expr::Arith(op, a, b) => {
                let a = a.eval(scope, ctx);
                let b = b.eval(scope, ctx);
                dispatcher.arith(*op, &a, &b)
            }
            Expr::In(needle, haystack) => {
                let needle = needle.eval(scope, ctx);
                let haystack = haystack.eval(scope, ctx);
                Value::Bool(dispatcher.contains(&haystack, &needle))
            }
            Expr::RegexMatch(a, pattern) => {
                let a = a.eval(scope, ctx);
                let pattern = pattern.eval(scope, ctx);
                Value::Bool(dispatcher.regex_match(&a, &pattern))
            }
            Expr::ScalarCall { name, args } => {
                let raw = eval_args(args, scope, ctx);
                ctx.functions.call_scalar(name, &raw, scope)
            }
            Expr::AggregateCall { name, args, id } => {
                if scope.is_finalizing() {
                    scope.aggregator().get(*id)
                } else {
                    let raw = eval_args(args, scope, ctx);
                    ctx.functions.call_aggregate(name, &raw, scope, *id)
                }
            }
            Expr::PluginCall { name, args } => {
                let raw = eval_args(args, scope, ctx);
                let source = PluginCallRowSource {
                    name: name.clone(),
                    args: raw,
                    plugins: ctx.plugins.clone(),
                };
                Value::StoredQuery(Arc::new(StoredQuery::from_select(Arc::new(source))))
            }
            Expr::StoredQueryCall { name, args } => {
                let raw = eval_args(args, scope, ctx);
                match scope.resolve(name) {
                    Value::StoredQueryTemplate(template) => Value::StoredQuery(Arc::new(template.call(&raw))),
                    _ => {
                        crate::error::log_runtime(
                            crate::error::ErrorKind::Type,
                            format!("`{}` is not a parameterized stored query", name),
                        );
                        Value::Null
                    }
                }
            }
        }
    }
}

pub(crate) fn eval_args(args: &[(String, Expr)], scope: &Arc<Scope>, ctx: &EvalContext) -> Dict {
    let mut d = Dict::new();
    for (name, expr) in args {
        d.insert(name.clone(), expr.eval(scope, ctx));
    }
    d
}

/// Whether `expr` contains an `AggregateCall` anywhere in its tree. A
/// projection with no explicit `GROUP BY` but at least one aggregate
/// column still groups (spec.md §8 scenario S2: the whole input is one
/// implicit bin, emitted as a single row once the input is exhausted).
pub(crate) fn contains_aggregate(expr: &Expr) -> bool {
    match expr {
        Expr::Literal(_) | Expr::Var(_) => false,
        Expr::Get(a, b) | Expr::And(a, b) | Expr::Or(a, b) | Expr::Arith(_, a, b) | Expr::In(a, b) | Expr::RegexMatch(a, b) => {
            contains_aggregate(a) || contains_aggregate(b)
        }
        Expr::Not(a) => contains_aggregate(a),
        Expr::Compare(_, a, b) => contains_aggregate(a) || contains_aggregate(b),
        Expr::ScalarCall { args, .. } | Expr::PluginCall { args, .. } | Expr::StoredQueryCall { args, .. } => {
            args.iter().any(|(_, e)| contains_aggregate(e))
        }
        Expr::AggregateCall { .. } => true,
    }
}

struct PluginCallRowSource {
    name: String,
    args: Dict,
    plugins: Arc<PluginRegistry>,
}

impl RowSource for PluginCallRowSource {
    fn rows(&self, scope: &Arc<Scope>) -> Vec<Dict> {
        match self.plugins.call(&self.name, &self.args, scope.clone(), CancellationToken::new()) {
            Ok(rx) => rx.into_iter().collect(),
            Err(e) => {
                e.log();
                Vec::new()
            }
        }
    }
}

/// A scalar expression compiled as a `ScalarSource`, for use as a
/// `LazyExpression`'s backing source (spec.md §4.3).
pub struct CompiledScalar {
    pub expr: Expr,
    pub ctx: EvalContext,
}

impl crate::stored_query::ScalarSource for CompiledScalar {
    fn reduce(&self, scope: &Arc<Scope>) -> Value {
        self.expr.eval(scope, &self.ctx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::dispatch::ProtocolDispatcher;

    fn ctx() -> EvalContext {
        EvalContext {
            functions: Arc::new(FunctionRegistry::with_builtins()),
            plugins: Arc::new(PluginRegistry::with_builtins()),
        }
    }

    fn root() -> Arc<Scope> {
        Scope::root(Arc::new(ProtocolDispatcher::new()), Arc::new(EngineConfig::default()))
    }

    #[test]
    fn arithmetic_eval() {
        let scope = root();
        let expr = Expr::Arith(
            ArithOp::Add,
            Box::new(Expr::Literal(Value::Int(1))),
            Box::new(Expr::Literal(Value::Int(2))),
        );
        assert_eq!(expr.eval(&scope, &ctx()), Value::Int(3));
    }

    #[test]
    fn and_short_circuits() {
        let scope = root();
        let expr = Expr::And(
            Box::new(Expr::Literal(Value::Bool(false))),
            Box::new(Expr::ScalarCall {
                name: "nonexistent_marker".to_string(),
                args: vec![],
            }),
        );
        assert_eq!(expr.eval(&scope, &ctx()), Value::Bool(false));
    }

    #[test]
    fn aggregate_call_finalizing_reads_without_mutating() {
        let scope = root();
        let id = crate::aggregate::next_aggregate_id();
        let expr = Expr::AggregateCall {
            name: "count".to_string(),
            args: vec![],
            id,
        };
        expr.eval(&scope, &ctx());
        expr.eval(&scope, &ctx());
        assert_eq!(scope.aggregator().get(id), Value::Int(2));

        let finalizer = scope.copy_as_finalizer();
        assert_eq!(expr.eval(&finalizer, &ctx()), Value::Int(2));
        assert_eq!(scope.aggregator().get(id), Value::Int(2));
    }
}
