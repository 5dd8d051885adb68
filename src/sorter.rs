//! `ORDER BY` sorting (spec.md §4.1, §9).
//!
//! Sorting (like grouping) is one of the two pipeline stages allowed
//! to accumulate the whole input in memory rather than stream row by
//! row (spec.md §9). Each sort key is evaluated against a scope with
//! the row's columns bound as variables, same as WHERE/projection;
//! ties between earlier keys fall through to the next key, and ties
//! across every key preserve input order (`Vec::sort_by` is stable).
//!
//! Grounded on the teacher's `src/functional/query_builder.rs`
//! fluent ordering-clause builder, adapted from compile-time column
//! references to runtime `Expr` evaluation against a scope.

use std::cmp::Ordering;
use std::sync::Arc;

use itertools::Itertools;

use crate::ast::{EvalContext, Expr};
use crate::dict::Dict;
use crate::scope::Scope;
use crate::value::Value;

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum SortDirection {
    Asc,
    Desc,
}

#[derive(Clone)]
pub struct OrderKey {
    pub expr: Expr,
    pub direction: SortDirection,
}

/// Stably sorts `rows` by `keys`. `base_scope` supplies the dispatcher
/// and is copied per row to bind that row's columns before evaluating
/// the key expressions; an empty `keys` list returns `rows` untouched.
pub fn sort_rows(rows: Vec<Dict>, keys: &[OrderKey], base_scope: &Arc<Scope>, ctx: &EvalContext) -> Vec<Dict> {
    if keys.is_empty() {
        return rows;
    }
    let dispatcher = base_scope.dispatcher().clone();
    let decorated = rows.into_iter().map(|row| {
        let scope = base_scope.copy();
        for (k, v) in row.iter() {
            scope.set_var(k.to_string(), v.clone());
        }
        let key_values: Vec<Value> = keys.iter().map(|key| key.expr.eval(&scope, ctx)).collect();
        scope.close();
        (key_values, row)
    });

    // `Itertools::sorted_by` is a stable sort over an iterator, same
    // guarantee as `[T]::sort_by` but without pre-collecting into a
    // `Vec` ourselves first (grounded on the teacher's iterator-chain
    // style in `src/functional/iterator_engine.rs`).
    decorated
        .sorted_by(|(a, _), (b, _)| {
            for (i, key) in keys.iter().enumerate() {
                let ord = dispatcher.cmp(&a[i], &b[i]);
                let ord = if key.direction == SortDirection::Desc { ord.reverse() } else { ord };
                if ord != Ordering::Equal {
                    return ord;
                }
            }
            Ordering::Equal
        })
        .map(|(_, row)| row)
        .collect()
}
