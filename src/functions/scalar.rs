//! Scalar builtins supplementing the grounding plugin set (spec.md
//! §2's component table names `len`, `get`, `dict` without defining
//! them in the spec body; SPEC_FULL.md §4.7/§4.8 fixes their
//! semantics).

use std::sync::Arc;

use crate::args::{parse_args, ArgFieldSpec, ArgKind, ArgSchema, ParsedArgs};
use crate::dict::Dict;
use crate::dispatch::coerce_to_dict;
use crate::scope::Scope;
use crate::value::Value;

use super::ScalarFunction;

pub struct Len;
impl ScalarFunction for Len {
    fn name(&self) -> &'static str {
        "len"
    }

    fn schema(&self) -> Arc<ArgSchema> {
        crate::args::compiled_schema::<Len>(|| ArgSchema::new(vec![ArgFieldSpec::required("value", ArgKind::Any)]))
    }

    fn call(&self, args: ParsedArgs, _scope: &Arc<Scope>) -> Value {
        Value::Int(match args.any("value") {
            Value::Sequence(items) => items.len() as i64,
            Value::Dict(d) => d.len() as i64,
            Value::Str(s) => s.chars().count() as i64,
            Value::Bytes(b) => b.len() as i64,
            Value::Null => 0,
            _ => 1,
        })
    }
}

pub struct Get;
impl ScalarFunction for Get {
    fn name(&self) -> &'static str {
        "get"
    }

    fn schema(&self) -> Arc<ArgSchema> {
        crate::args::compiled_schema::<Get>(|| {
            ArgSchema::new(vec![
                ArgFieldSpec::required("item", ArgKind::Any),
                ArgFieldSpec::required("field", ArgKind::Any),
                ArgFieldSpec::optional("default", ArgKind::Any),
            ])
        })
    }

    fn call(&self, args: ParsedArgs, scope: &Arc<Scope>) -> Value {
        let item = args.any("item");
        let field = args.any("field");
        match scope.dispatcher().get(&item, &field) {
            Some(Value::Null) | None => {
                if args.any("default").is_null() {
                    Value::Null
                } else {
                    args.any("default")
                }
            }
            Some(v) => v,
        }
    }
}

/// `dict(a=1, b=2)` builds a dict from its keyword arguments;
/// `dict(value)` coerces a single positional value via the
/// associative/iterate protocols (spec.md §4.5's `dict` converter).
pub struct DictFn;
impl ScalarFunction for DictFn {
    fn name(&self) -> &'static str {
        "dict"
    }

    fn schema(&self) -> Arc<ArgSchema> {
        crate::args::compiled_schema::<DictFn>(|| {
            ArgSchema::new(vec![ArgFieldSpec::optional("value", ArgKind::Any)]).with_allow_extra()
        })
    }

    fn call(&self, args: ParsedArgs, scope: &Arc<Scope>) -> Value {
        let mut d = if args.any("value").is_null() {
            Dict::new()
        } else {
            coerce_to_dict(scope.dispatcher(), &args.any("value"))
        };
        for (k, v) in args.extras().iter() {
            let reduced = match v {
                Value::LazyExpr(l) => l.reduce(scope),
                other => other.clone(),
            };
            d.insert(k.to_string(), reduced);
        }
        Value::Dict(d)
    }
}
