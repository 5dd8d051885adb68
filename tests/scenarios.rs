//! End-to-end row-pipeline scenarios (spec.md §8), hand-assembled as
//! `SelectPlan`/`Expr` trees since the concrete grammar/parser is out
//! of scope for this crate (spec.md §1). Each test names the scenario
//! it covers.

use std::sync::Arc;

use vql_engine::ast::{CompareOp, EvalContext, Expr};
use vql_engine::cancellation::CancellationToken;
use vql_engine::config::EngineConfig;
use vql_engine::dict::Dict;
use vql_engine::dispatch::{ArithOp, ProtocolDispatcher};
use vql_engine::functions::FunctionRegistry;
use vql_engine::plugins::PluginRegistry;
use vql_engine::scope::Scope;
use vql_engine::select::{FromSource, ProjectedColumn, SelectPlan};
use vql_engine::sorter::OrderKey;
use vql_engine::stored_query::{RowSource, StoredQuery, StoredQueryTemplate};
use vql_engine::value::Value;

fn root() -> Arc<Scope> {
    Scope::root(Arc::new(ProtocolDispatcher::new()), Arc::new(EngineConfig::default()))
}

fn ctx() -> EvalContext {
    EvalContext {
        functions: Arc::new(FunctionRegistry::with_builtins()),
        plugins: Arc::new(PluginRegistry::with_builtins()),
    }
}

fn run(plan: SelectPlan, scope: Arc<Scope>) -> Vec<Dict> {
    Arc::new(plan).execute(scope, ctx(), CancellationToken::new()).into_iter().collect()
}

fn range_plan(end: i64) -> SelectPlan {
    SelectPlan {
        from: FromSource::Plugin {
            name: "range".into(),
            args: vec![("end".into(), Expr::Literal(Value::Int(end)))],
        },
        where_clause: None,
        star: true,
        columns: vec![],
        group_by: None,
        order_by: vec![],
        limit: None,
    }
}

/// S1: `SELECT * FROM range(end=3)` -> `{_value:0}`, `{_value:1}`, `{_value:2}` in order.
#[test]
fn s1_range_star_projection() {
    let rows = run(range_plan(3), root());
    let values: Vec<i64> = rows.iter().map(|r| r.get("_value").unwrap().as_i64().unwrap()).collect();
    assert_eq!(values, vec![0, 1, 2]);
}

/// S2: `LET xs = SELECT _value AS v FROM range(end=5)`
/// `SELECT sum(item=v) AS s FROM xs` -> one row `{s: 10}`.
#[test]
fn s2_let_binding_feeds_implicit_aggregate() {
    let scope = root();

    let inner = SelectPlan {
        from: FromSource::Plugin {
            name: "range".into(),
            args: vec![("end".into(), Expr::Literal(Value::Int(5)))],
        },
        where_clause: None,
        star: false,
        columns: vec![ProjectedColumn { name: "v".into(), expr: Expr::Var("_value".into()) }],
        group_by: None,
        order_by: vec![],
        limit: None,
    };
    let xs = vql_engine::select::as_stored_query(Arc::new(inner), ctx());
    scope.set_var("xs", Value::StoredQuery(Arc::new(xs)));

    let outer = SelectPlan {
        from: FromSource::Var("xs".into()),
        where_clause: None,
        star: false,
        columns: vec![ProjectedColumn {
            name: "s".into(),
            expr: Expr::AggregateCall {
                name: "sum".into(),
                args: vec![("item".into(), Expr::Var("v".into()))],
                id: vql_engine::aggregate::next_aggregate_id(),
            },
        }],
        group_by: None,
        order_by: vec![],
        limit: None,
    };

    let rows = run(outer, scope);
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].get("s"), Some(&Value::Int(10)));
}

/// S3: `SELECT v % 2 AS p, count() AS c FROM range(end=4) GROUP BY p`
/// -> rows `{p:0, c:2}`, `{p:1, c:2}` in first-seen order.
#[test]
fn s3_group_by_emits_one_row_per_bin() {
    let modulo_two = |v: Expr| {
        Expr::Arith(
            ArithOp::Sub,
            Box::new(v.clone()),
            Box::new(Expr::Arith(
                ArithOp::Mul,
                Box::new(Expr::Literal(Value::Int(2))),
                Box::new(Expr::Arith(ArithOp::Div, Box::new(v), Box::new(Expr::Literal(Value::Int(2))))),
            )),
        )
    };
    let plan = SelectPlan {
        from: FromSource::Plugin {
            name: "range".into(),
            args: vec![("end".into(), Expr::Literal(Value::Int(4)))],
        },
        where_clause: None,
        star: false,
        columns: vec![
            ProjectedColumn { name: "p".into(), expr: modulo_two(Expr::Var("_value".into())) },
            ProjectedColumn {
                name: "c".into(),
                expr: Expr::AggregateCall { name: "count".into(), args: vec![], id: vql_engine::aggregate::next_aggregate_id() },
            },
        ],
        group_by: Some(modulo_two(Expr::Var("_value".into()))),
        order_by: vec![],
        limit: None,
    };
    let rows = run(plan, root());
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0].get("p"), Some(&Value::Int(0)));
    assert_eq!(rows[0].get("c"), Some(&Value::Int(2)));
    assert_eq!(rows[1].get("p"), Some(&Value::Int(1)));
    assert_eq!(rows[1].get("c"), Some(&Value::Int(2)));
}

/// S4: `SELECT * FROM chain(a={SELECT 1 AS x FROM scope()},
///                          b={SELECT 2 AS x FROM scope()})` -> `{x:1}`, `{x:2}`.
#[test]
fn s4_chain_concatenates_subqueries_in_order() {
    let sub_plan = |x: i64| SelectPlan {
        from: FromSource::Plugin { name: "scope".into(), args: vec![] },
        where_clause: None,
        star: false,
        columns: vec![ProjectedColumn { name: "x".into(), expr: Expr::Literal(Value::Int(x)) }],
        group_by: None,
        order_by: vec![],
        limit: None,
    };
    let a = vql_engine::select::as_stored_query(Arc::new(sub_plan(1)), ctx());
    let b = vql_engine::select::as_stored_query(Arc::new(sub_plan(2)), ctx());

    let plan = SelectPlan {
        from: FromSource::Plugin {
            name: "chain".into(),
            args: vec![
                ("a".into(), Expr::Literal(Value::StoredQuery(Arc::new(a)))),
                ("b".into(), Expr::Literal(Value::StoredQuery(Arc::new(b)))),
            ],
        },
        where_clause: None,
        star: true,
        columns: vec![],
        group_by: None,
        order_by: vec![],
        limit: None,
    };
    let rows = run(plan, root());
    let values: Vec<i64> = rows.iter().map(|r| r.get("x").unwrap().as_i64().unwrap()).collect();
    assert_eq!(values, vec![1, 2]);
}

/// S5: `LET f(n) = SELECT _value*n AS y FROM range(end=3)`
/// `SELECT * FROM f(n=10)` -> `{y:0}`, `{y:10}`, `{y:20}`.
#[test]
fn s5_parameterized_stored_query_call() {
    let defining_scope = root();
    let body_plan = Arc::new(SelectPlan {
        from: FromSource::Plugin {
            name: "range".into(),
            args: vec![("end".into(), Expr::Literal(Value::Int(3)))],
        },
        where_clause: None,
        star: false,
        columns: vec![ProjectedColumn {
            name: "y".into(),
            expr: Expr::Arith(ArithOp::Mul, Box::new(Expr::Var("_value".into())), Box::new(Expr::Var("n".into()))),
        }],
        group_by: None,
        order_by: vec![],
        limit: None,
    });
    let body: Arc<dyn RowSource> = Arc::new(vql_engine::select::SelectRowSource { plan: body_plan, ctx: ctx() });
    let template = StoredQueryTemplate::new(vec!["n".to_string()], body, defining_scope.clone());
    defining_scope.set_var("f", Value::StoredQueryTemplate(Arc::new(template)));

    let plan = SelectPlan {
        from: FromSource::Call {
            name: "f".into(),
            args: vec![("n".into(), Expr::Literal(Value::Int(10)))],
        },
        where_clause: None,
        star: true,
        columns: vec![],
        group_by: None,
        order_by: vec![],
        limit: None,
    };
    let rows = run(plan, defining_scope);
    let values: Vec<i64> = rows.iter().map(|r| r.get("y").unwrap().as_i64().unwrap()).collect();
    assert_eq!(values, vec![0, 10, 20]);
}

/// S6: a plugin registers D1 then D2 on scope close; closing invokes
/// D2 before D1 (strict LIFO, invariant 7).
#[test]
fn s6_destructors_run_in_reverse_registration_order() {
    let scope = root();
    let order = Arc::new(std::sync::Mutex::new(Vec::new()));
    let order_d1 = order.clone();
    let order_d2 = order.clone();
    scope.push_destructor(move || order_d1.lock().unwrap().push("D1"));
    scope.push_destructor(move || order_d2.lock().unwrap().push("D2"));
    scope.close();
    assert_eq!(*order.lock().unwrap(), vec!["D2", "D1"]);
}

/// Invariant 1: closing a scope twice has the same observable effect
/// as closing it once.
#[test]
fn invariant_close_is_idempotent() {
    let scope = root();
    let count = Arc::new(std::sync::atomic::AtomicUsize::new(0));
    let count2 = count.clone();
    scope.push_destructor(move || {
        count2.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
    });
    scope.close();
    scope.close();
    assert_eq!(count.load(std::sync::atomic::Ordering::SeqCst), 1);
}

/// Boundary: `range(start, start)` emits zero rows.
#[test]
fn boundary_empty_range() {
    let plan = SelectPlan {
        from: FromSource::Plugin {
            name: "range".into(),
            args: vec![("start".into(), Expr::Literal(Value::Int(5))), ("end".into(), Expr::Literal(Value::Int(5)))],
        },
        where_clause: None,
        star: true,
        columns: vec![],
        group_by: None,
        order_by: vec![],
        limit: None,
    };
    assert_eq!(run(plan, root()), vec![]);
}

/// Boundary: `if(condition=NULL, then=q)` emits zero rows (Null is
/// not truthy, and no `else` branch is given).
#[test]
fn boundary_if_null_condition_emits_nothing() {
    let scope = root();
    let then_sq = StoredQuery::wrapper(Value::Int(1));
    let mut raw = Dict::new();
    raw.insert("condition".into(), Value::Null);
    raw.insert("then".into(), Value::StoredQuery(Arc::new(then_sq)));
    let parsed = vql_engine::args::parse_args(&vql_engine::plugins::if_plugin::IfPlugin.schema(), &raw, &scope).unwrap();
    let rows: Vec<_> = vql_engine::plugins::Plugin::call(
        &vql_engine::plugins::if_plugin::IfPlugin,
        parsed,
        scope,
        CancellationToken::new(),
    )
    .into_iter()
    .collect();
    assert_eq!(rows, vec![]);
}

/// ORDER BY composed with GROUP BY and LIMIT: groups first, then
/// sorts the grouped output, then truncates.
#[test]
fn group_by_order_by_and_limit_compose() {
    let modulo_two = |v: Expr| {
        Expr::Arith(
            ArithOp::Sub,
            Box::new(v.clone()),
            Box::new(Expr::Arith(
                ArithOp::Mul,
                Box::new(Expr::Literal(Value::Int(2))),
                Box::new(Expr::Arith(ArithOp::Div, Box::new(v), Box::new(Expr::Literal(Value::Int(2))))),
            )),
        )
    };
    let plan = SelectPlan {
        from: FromSource::Plugin {
            name: "range".into(),
            args: vec![("end".into(), Expr::Literal(Value::Int(6)))],
        },
        where_clause: None,
        star: false,
        columns: vec![ProjectedColumn { name: "p".into(), expr: modulo_two(Expr::Var("_value".into())) }],
        group_by: Some(modulo_two(Expr::Var("_value".into()))),
        order_by: vec![OrderKey { expr: Expr::Var("p".into()), direction: vql_engine::sorter::SortDirection::Desc }],
        limit: Some(1),
    };
    let rows = run(plan, root());
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].get("p"), Some(&Value::Int(1)));
}

/// WHERE filters rows before they reach GROUP BY/ORDER BY/LIMIT.
#[test]
fn where_clause_runs_before_group_by() {
    let plan = SelectPlan {
        from: FromSource::Plugin {
            name: "range".into(),
            args: vec![("end".into(), Expr::Literal(Value::Int(6)))],
        },
        where_clause: Some(Expr::Compare(CompareOp::Ge, Box::new(Expr::Var("_value".into())), Box::new(Expr::Literal(Value::Int(3))))),
        star: true,
        columns: vec![],
        group_by: None,
        order_by: vec![],
        limit: None,
    };
    let rows = run(plan, root());
    let values: Vec<i64> = rows.iter().map(|r| r.get("_value").unwrap().as_i64().unwrap()).collect();
    assert_eq!(values, vec![3, 4, 5]);
}
