//! Argument parsing and coercion for plugins and functions (spec.md
//! §4.5).
//!
//! A plugin or function declares an `ArgSchema`: an ordered list of
//! named fields, each with a required flag and a target `ArgKind`.
//! `ArgSchema::compiled` caches the schema per Rust type (keyed by
//! `TypeId`, built once with `once_cell::sync::Lazy`) so repeated
//! `Call`s don't re-validate field declarations. `parse_args` then
//! coerces a raw argument `Dict` against that schema: unknown keys
//! and missing required fields are rejected before any coercion
//! runs, and the first field whose value cannot be coerced to its
//! declared kind aborts parsing (spec.md §4.5's "fail on first
//! offending field" policy) rather than collecting every error.
//!
//! Grounded on the teacher's `src/functional/function_traits.rs`
//! (`FunctionContainer`'s per-type cached registration) for the
//! `TypeId`-keyed cache, and `src/functional/validation_rules.rs` /
//! `validation_engine.rs` for the field-by-field validate-then-coerce
//! shape.

use std::any::TypeId;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use once_cell::sync::Lazy;

use crate::dict::Dict;
use crate::dispatch::coerce_to_dict;
use crate::error::{EngineError, EngineResult};
use crate::scope::Scope;
use crate::stored_query::{LazyExpression, StoredQuery};
use crate::value::Value;

/// The typed-converter table named in spec.md §4.5.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArgKind {
    /// Materialize whatever was given, reducing a lazy expression.
    Any,
    /// Keep the value as a deferred `LazyExpression`, wrapping a
    /// non-lazy value in a constant expression if needed.
    LazyExpr,
    /// A `StoredQuery`, wrapping a plain value as a single-row query
    /// if needed.
    StoredQuery,
    Dict,
    Str,
    Bool,
    Int,
    Float,
    StrList,
    AnyList,
    DictList,
}

#[derive(Debug, Clone)]
pub struct ArgFieldSpec {
    pub name: &'static str,
    pub required: bool,
    pub kind: ArgKind,
}

impl ArgFieldSpec {
    pub fn required(name: &'static str, kind: ArgKind) -> Self {
        Self {
            name,
            required: true,
            kind,
        }
    }

    pub fn optional(name: &'static str, kind: ArgKind) -> Self {
        Self {
            name,
            required: false,
            kind,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ArgSchema {
    pub fields: Vec<ArgFieldSpec>,
    /// When set, keys not named in `fields` are collected into
    /// `ParsedArgs::extras` instead of rejected. Used by variadic
    /// builtins like `dict()`, which accepts arbitrary keyword args.
    pub allow_extra: bool,
}

impl ArgSchema {
    pub fn new(fields: Vec<ArgFieldSpec>) -> Self {
        Self {
            fields,
            allow_extra: false,
        }
    }

    pub fn with_allow_extra(mut self) -> Self {
        self.allow_extra = true;
        self
    }

    fn field(&self, name: &str) -> Option<&ArgFieldSpec> {
        self.fields.iter().find(|f| f.name == name)
    }
}

static SCHEMA_CACHE: Lazy<Mutex<HashMap<TypeId, Arc<ArgSchema>>>> = Lazy::new(|| Mutex::new(HashMap::new()));

/// Returns the cached `ArgSchema` for `P`, building and caching it
/// with `build` on first use. `P` is typically a zero-sized marker
/// type unique to one plugin or function.
pub fn compiled_schema<P: 'static>(build: impl FnOnce() -> ArgSchema) -> Arc<ArgSchema> {
    let type_id = TypeId::of::<P>();
    let mut cache = SCHEMA_CACHE.lock().expect("arg schema cache mutex poisoned");
    cache.entry(type_id).or_insert_with(|| Arc::new(build())).clone()
}

fn reduce_if_lazy(v: &Value, scope: &Arc<Scope>) -> Value {
    match v {
        Value::LazyExpr(l) => l.reduce(scope),
        other => other.clone(),
    }
}

/// Flattens a single-key dict to its one member's value, per spec.md
/// §4.5's []string coercion rule. Any other value passes through.
fn flatten_single_key_dict(v: Value) -> Value {
    match v {
        Value::Dict(d) if d.len() == 1 => d.values().next().cloned().unwrap_or(Value::Null),
        other => other,
    }
}

/// Coerces a raw argument dict against `schema`, failing on the
/// first unknown key, missing required field, or type mismatch.
pub fn parse_args(schema: &ArgSchema, raw: &Dict, scope: &Arc<Scope>) -> EngineResult<ParsedArgs> {
    let mut extras = Dict::new();
    for key in raw.keys() {
        if schema.field(key).is_none() {
            if schema.allow_extra {
                extras.insert(key.to_string(), raw.get(key).cloned().unwrap_or(Value::Null));
            } else {
                return Err(EngineError::UnknownArgument { field: key.to_string() });
            }
        }
    }

    let mut values = HashMap::new();
    for field in &schema.fields {
        let Some(raw_value) = raw.get(field.name) else {
            if field.required {
                return Err(EngineError::MissingRequiredArgument {
                    field: field.name.to_string(),
                });
            }
            continue;
        };
        let coerced = coerce(field, raw_value, scope)?;
        values.insert(field.name.to_string(), coerced);
    }
    Ok(ParsedArgs { values, extras })
}

fn coerce(field: &ArgFieldSpec, raw_value: &Value, scope: &Arc<Scope>) -> EngineResult<Value> {
    let dispatcher = scope.dispatcher();
    Ok(match field.kind {
        ArgKind::Any => reduce_if_lazy(raw_value, scope),
        ArgKind::LazyExpr => match raw_value {
            Value::LazyExpr(_) => raw_value.clone(),
            other => Value::LazyExpr(Arc::new(LazyExpression::constant(other.clone()))),
        },
        ArgKind::StoredQuery => {
            let reduced = reduce_if_lazy(raw_value, scope);
            match reduced {
                Value::StoredQuery(_) => reduced,
                other => Value::StoredQuery(Arc::new(StoredQuery::wrapper(other))),
            }
        }
        ArgKind::Dict => {
            let reduced = reduce_if_lazy(raw_value, scope);
            Value::Dict(coerce_to_dict(dispatcher, &reduced))
        }
        ArgKind::Str => {
            let reduced = reduce_if_lazy(raw_value, scope);
            let scalar = match &reduced {
                Value::Sequence(items) if items.len() == 1 => items[0].clone(),
                _ => reduced,
            };
            Value::str(scalar.canonical_string())
        }
        ArgKind::Bool => {
            let reduced = reduce_if_lazy(raw_value, scope);
            Value::Bool(dispatcher.truthy(&reduced))
        }
        ArgKind::Int => {
            let reduced = reduce_if_lazy(raw_value, scope);
            let n = reduced.as_i64().ok_or_else(|| EngineError::ArgumentTypeMismatch {
                field: field.name.to_string(),
                detail: format!("expected an integer, got `{}`", reduced.canonical_string()),
            })?;
            Value::Int(n)
        }
        ArgKind::Float => {
            let reduced = reduce_if_lazy(raw_value, scope);
            let n = reduced.as_f64().ok_or_else(|| EngineError::ArgumentTypeMismatch {
                field: field.name.to_string(),
                detail: format!("expected a number, got `{}`", reduced.canonical_string()),
            })?;
            Value::Float(n)
        }
        ArgKind::StrList => {
            let reduced = reduce_if_lazy(raw_value, scope);
            let items = match reduced {
                Value::Sequence(items) => items
                    .iter()
                    .map(|v| Value::str(flatten_single_key_dict(v.clone()).canonical_string()))
                    .collect(),
                other => vec![Value::str(flatten_single_key_dict(other).canonical_string())],
            };
            Value::seq(items)
        }
        ArgKind::AnyList => {
            let reduced = reduce_if_lazy(raw_value, scope);
            let items = match reduced {
                Value::Sequence(items) => (*items).clone(),
                other => vec![other],
            };
            Value::seq(items)
        }
        ArgKind::DictList => {
            let reduced = reduce_if_lazy(raw_value, scope);
            let items = match reduced {
                Value::Sequence(items) => items
                    .iter()
                    .map(|v| Value::Dict(coerce_to_dict(dispatcher, v)))
                    .collect(),
                other => vec![Value::Dict(coerce_to_dict(dispatcher, &other))],
            };
            Value::seq(items)
        }
    })
}

/// The coerced result of `parse_args`. Accessors apply the kind's
/// natural "absent" default rather than panicking, so an optional
/// field that was never supplied reads the same as one explicitly
/// coerced to its zero value.
pub struct ParsedArgs {
    values: HashMap<String, Value>,
    extras: Dict,
}

impl ParsedArgs {
    /// Keyword args not named in the schema, stored as given (only
    /// populated when the schema was built with `with_allow_extra`).
    pub fn extras(&self) -> &Dict {
        &self.extras
    }

    pub fn any(&self, name: &str) -> Value {
        self.values.get(name).cloned().unwrap_or(Value::Null)
    }

    pub fn lazy(&self, name: &str) -> Option<Arc<LazyExpression>> {
        match self.values.get(name) {
            Some(Value::LazyExpr(l)) => Some(l.clone()),
            _ => None,
        }
    }

    pub fn stored_query(&self, name: &str) -> Option<Arc<StoredQuery>> {
        match self.values.get(name) {
            Some(Value::StoredQuery(sq)) => Some(sq.clone()),
            _ => None,
        }
    }

    pub fn dict(&self, name: &str) -> Dict {
        match self.values.get(name) {
            Some(Value::Dict(d)) => d.clone(),
            _ => Dict::new(),
        }
    }

    pub fn str(&self, name: &str) -> Option<Arc<str>> {
        match self.values.get(name) {
            Some(Value::Str(s)) => Some(s.clone()),
            _ => None,
        }
    }

    pub fn bool(&self, name: &str) -> bool {
        matches!(self.values.get(name), Some(Value::Bool(true)))
    }

    pub fn int(&self, name: &str) -> Option<i64> {
        match self.values.get(name) {
            Some(Value::Int(n)) => Some(*n),
            _ => None,
        }
    }

    pub fn float(&self, name: &str) -> Option<f64> {
        match self.values.get(name) {
            Some(Value::Float(n)) => Some(*n),
            _ => None,
        }
    }

    pub fn str_list(&self, name: &str) -> Vec<Arc<str>> {
        match self.values.get(name) {
            Some(Value::Sequence(items)) => items.iter().filter_map(Value::as_str).map(Arc::from).collect(),
            _ => Vec::new(),
        }
    }

    pub fn any_list(&self, name: &str) -> Vec<Value> {
        match self.values.get(name) {
            Some(Value::Sequence(items)) => (**items).clone(),
            _ => Vec::new(),
        }
    }

    pub fn dict_list(&self, name: &str) -> Vec<Dict> {
        match self.values.get(name) {
            Some(Value::Sequence(items)) => items
                .iter()
                .filter_map(|v| match v {
                    Value::Dict(d) => Some(d.clone()),
                    _ => None,
                })
                .collect(),
            _ => Vec::new(),
        }
    }
}
