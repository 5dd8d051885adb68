//! The dynamic value type (`Value`, called `Any` in the specification).
//!
//! `Value` is the universal tagged variant that flows through the
//! row pipeline: query results, scalar expressions, plugin arguments
//! and aggregate accumulators are all `Value`. It is deliberately
//! *not* named `Any` in code, to avoid colliding with `std::any::Any`,
//! which is used internally for the argument-parser's type registry
//! (see `crate::args`).

use std::cmp::Ordering as CmpOrdering;
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::ser::{Error as SerError, SerializeSeq};
use serde::{Serialize, Serializer};

use crate::dict::Dict;
use crate::stored_query::{LazyExpression, StoredQuery, StoredQueryTemplate};

/// A host-registered opaque object embedded in a `Value`.
///
/// Host integrations implement this for their own record types (for
/// example a lazily-materializing file-info record, per spec.md
/// §4.2) and register specialized protocol implementations that
/// recognize the concrete type behind the trait object.
pub trait HostObject: fmt::Debug + Send + Sync {
    /// Stable type name, used by the default `Display`/equality
    /// fallbacks and by diagnostics.
    fn type_name(&self) -> &'static str;

    /// Structural equality against another host object. The default
    /// fallback (used when no host protocol implementation claims
    /// the pair) treats distinct host objects as unequal unless they
    /// are pointer-identical.
    fn host_eq(&self, _other: &dyn HostObject) -> bool {
        false
    }
}

/// The universal dynamic value (spec.md §3's `Any`).
#[derive(Clone, Debug)]
pub enum Value {
    /// The distinguished absent value. Never the host language's
    /// native nil/None once inside a pipeline.
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(Arc<str>),
    Bytes(Arc<[u8]>),
    Timestamp(DateTime<Utc>),
    Sequence(Arc<Vec<Value>>),
    Dict(Dict),
    StoredQuery(Arc<StoredQuery>),
    /// A parameterized `LET name(p1, p2) = SELECT ...` binding
    /// (spec.md §4.3), called via `Expr::StoredQueryCall` to produce a
    /// `StoredQuery` bound to that call's arguments.
    StoredQueryTemplate(Arc<StoredQueryTemplate>),
    LazyExpr(Arc<LazyExpression>),
    Host(Arc<dyn HostObject>),
}

impl Value {
    pub fn str(s: impl Into<Arc<str>>) -> Self {
        Value::Str(s.into())
    }

    pub fn seq(items: Vec<Value>) -> Self {
        Value::Sequence(Arc::new(items))
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// The `_value` single-key wrapper used whenever a scalar needs
    /// to be presented as a row (stored-query wrapping, per spec.md
    /// §3 StoredQuery::Wrapper).
    pub fn wrap_as_row(self) -> Dict {
        if let Value::Dict(d) = self {
            return d;
        }
        let mut d = Dict::new();
        d.insert("_value".to_string(), self);
        d
    }

    /// Canonical string form used by the ordering and equality
    /// fallbacks (spec.md §4.2: "ordering falls back to string
    /// comparison of the canonical representation").
    pub fn canonical_string(&self) -> String {
        match self {
            Value::Null => String::new(),
            Value::Bool(b) => b.to_string(),
            Value::Int(i) => i.to_string(),
            Value::Float(f) => f.to_string(),
            Value::Str(s) => s.to_string(),
            Value::Bytes(b) => String::from_utf8_lossy(b).into_owned(),
            Value::Timestamp(t) => t.to_rfc3339(),
            Value::Sequence(items) => {
                let parts: Vec<String> = items.iter().map(Value::canonical_string).collect();
                format!("[{}]", parts.join(","))
            }
            Value::Dict(d) => format!("{:?}", d),
            Value::StoredQuery(_) => "<stored-query>".to_string(),
            Value::StoredQueryTemplate(_) => "<stored-query-template>".to_string(),
            Value::LazyExpr(_) => "<lazy-expr>".to_string(),
            Value::Host(h) => format!("<{}>", h.type_name()),
        }
    }

    /// Default boolean-coercion fallback: non-null, non-zero,
    /// non-empty (spec.md §4.2).
    pub fn truthy_fallback(&self) -> bool {
        match self {
            Value::Null => false,
            Value::Bool(b) => *b,
            Value::Int(i) => *i != 0,
            Value::Float(f) => *f != 0.0,
            Value::Str(s) => !s.is_empty(),
            Value::Bytes(b) => !b.is_empty(),
            Value::Sequence(s) => !s.is_empty(),
            Value::Dict(d) => !d.is_empty(),
            Value::Timestamp(_) => true,
            Value::StoredQuery(_) | Value::StoredQueryTemplate(_) | Value::LazyExpr(_) | Value::Host(_) => true,
        }
    }

    /// Default deep-structural equality fallback (spec.md §4.2).
    pub fn structural_eq_fallback(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a == b,
            (Value::Int(a), Value::Float(b)) | (Value::Float(b), Value::Int(a)) => {
                (*a as f64) == *b
            }
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::Bytes(a), Value::Bytes(b)) => a == b,
            (Value::Timestamp(a), Value::Timestamp(b)) => a == b,
            (Value::Sequence(a), Value::Sequence(b)) => {
                a.len() == b.len()
                    && a.iter()
                        .zip(b.iter())
                        .all(|(x, y)| x.structural_eq_fallback(y))
            }
            (Value::Dict(a), Value::Dict(b)) => a.structural_eq(b),
            (Value::Host(a), Value::Host(b)) => a.host_eq(b.as_ref()),
            _ => false,
        }
    }

    /// String-of-canonical-form ordering fallback.
    pub fn ordering_fallback(&self, other: &Value) -> CmpOrdering {
        if let (Value::Int(a), Value::Int(b)) = (self, other) {
            return a.cmp(b);
        }
        if let (Some(a), Some(b)) = (self.as_f64(), other.as_f64()) {
            return a.partial_cmp(&b).unwrap_or(CmpOrdering::Equal);
        }
        self.canonical_string().cmp(&other.canonical_string())
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(i) => Some(*i as f64),
            Value::Float(f) => Some(*f),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            Value::Float(f) => Some(*f as i64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s.as_ref()),
            _ => None,
        }
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Str(Arc::from(v))
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Str(Arc::from(v.as_str()))
    }
}

impl From<Dict> for Value {
    fn from(v: Dict) -> Self {
        Value::Dict(v)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.canonical_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wrap_scalar_as_row_uses_value_key() {
        let d = Value::Int(5).wrap_as_row();
        assert_eq!(d.get("_value"), Some(&Value::Int(5)));
    }

    #[test]
    fn wrap_dict_passes_through() {
        let mut inner = Dict::new();
        inner.insert("x".into(), Value::Int(1));
        let d = Value::Dict(inner.clone()).wrap_as_row();
        assert_eq!(d, inner);
    }

    #[test]
    fn truthy_fallback_null_is_false() {
        assert!(!Value::Null.truthy_fallback());
    }

    #[test]
    fn truthy_fallback_zero_is_false() {
        assert!(!Value::Int(0).truthy_fallback());
        assert!(!Value::Float(0.0).truthy_fallback());
    }

    #[test]
    fn structural_eq_cross_numeric() {
        assert!(Value::Int(2).structural_eq_fallback(&Value::Float(2.0)));
    }

    #[test]
    fn ordering_fallback_ints() {
        assert_eq!(Value::Int(1).ordering_fallback(&Value::Int(2)), CmpOrdering::Less);
    }

    #[test]
    fn serializes_scalars_as_plain_json() {
        assert_eq!(serde_json::to_string(&Value::Int(5)).unwrap(), "5");
        assert_eq!(serde_json::to_string(&Value::Null).unwrap(), "null");
        assert_eq!(serde_json::to_string(&Value::str("x")).unwrap(), r#""x""#);
        assert_eq!(
            serde_json::to_string(&Value::seq(vec![Value::Int(1), Value::Int(2)])).unwrap(),
            "[1,2]"
        );
    }

    #[test]
    fn serializing_an_unmaterialized_stored_query_is_an_error() {
        let sq = Value::StoredQuery(Arc::new(crate::stored_query::StoredQuery::wrapper(Value::Int(1))));
        assert!(serde_json::to_string(&sq).is_err());
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        self.structural_eq_fallback(other)
    }
}

/// Host-interchange serialization (SPEC_FULL.md ambient stack), not a
/// wire format: a finished result row serializes to plain JSON
/// scalars/arrays/objects. `StoredQuery`/`StoredQueryTemplate`/
/// `LazyExpr` are deferred computations, not data, and fail to
/// serialize; callers reduce/materialize a row before handing it to
/// the host. A `Host` object serializes as its type name, since this
/// crate has no way to know a host-specific shape for it.
impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Value::Null => serializer.serialize_none(),
            Value::Bool(b) => serializer.serialize_bool(*b),
            Value::Int(i) => serializer.serialize_i64(*i),
            Value::Float(f) => serializer.serialize_f64(*f),
            Value::Str(s) => serializer.serialize_str(s),
            Value::Bytes(b) => serializer.serialize_bytes(b),
            Value::Timestamp(t) => serializer.serialize_str(&t.to_rfc3339()),
            Value::Sequence(items) => {
                let mut seq = serializer.serialize_seq(Some(items.len()))?;
                for item in items.iter() {
                    seq.serialize_element(item)?;
                }
                seq.end()
            }
            Value::Dict(d) => d.serialize(serializer),
            Value::Host(h) => serializer.serialize_str(h.type_name()),
            Value::StoredQuery(_) | Value::StoredQueryTemplate(_) | Value::LazyExpr(_) => Err(S::Error::custom(
                format!("cannot serialize an unmaterialized `{}`; reduce it first", self.canonical_string()),
            )),
        }
    }
}
