//! `Dict` — the ordered, key-unique mapping that backs every `Row`
//! (spec.md §3).
//!
//! A `Dict` preserves insertion order and key uniqueness: re-setting
//! an existing key keeps its original position. Dicts optionally
//! carry a default value returned for missing keys and a
//! case-insensitive lookup flag (spec.md §4.2's associative-access
//! rule).

use std::fmt;

use serde::ser::SerializeMap;
use serde::{Serialize, Serializer};

use crate::value::Value;

/// An ordered key -> value mapping. Backed by a `Vec` rather than an
/// `IndexMap` to keep the dependency surface aligned with the
/// teacher crate (which carries no indexmap dependency); dict sizes
/// in VQL rows are small (column counts), so linear lookup is not a
/// bottleneck relative to the channel/thread overhead dominating the
/// pipeline.
#[derive(Clone, Default)]
pub struct Dict {
    entries: Vec<(String, Value)>,
    default: Option<Box<Value>>,
    case_insensitive: bool,
}

impl Dict {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_default(mut self, default: Value) -> Self {
        self.default = Some(Box::new(default));
        self
    }

    pub fn with_case_insensitive(mut self, enabled: bool) -> Self {
        self.case_insensitive = enabled;
        self
    }

    pub fn case_insensitive(&self) -> bool {
        self.case_insensitive
    }

    fn key_eq(&self, a: &str, b: &str) -> bool {
        if self.case_insensitive {
            a.eq_ignore_ascii_case(b)
        } else {
            a == b
        }
    }

    fn position(&self, key: &str) -> Option<usize> {
        self.entries.iter().position(|(k, _)| self.key_eq(k, key))
    }

    /// Inserts or updates `key`. Keeps the original insertion
    /// position when the key already exists.
    pub fn insert(&mut self, key: String, value: Value) {
        if let Some(idx) = self.position(&key) {
            self.entries[idx].1 = value;
        } else {
            self.entries.push((key, value));
        }
    }

    /// Looks up a key, honoring the case-insensitive flag. Does not
    /// apply the default — callers that want spec.md's "missing
    /// column -> Null" semantics should use `get_or_default`.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.entries
            .iter()
            .find(|(k, _)| self.key_eq(k, key))
            .map(|(_, v)| v)
    }

    /// Looks up a key, falling back to the dict's default value (or
    /// `Value::Null` if no default is set) when absent.
    pub fn get_or_default(&self, key: &str) -> Value {
        match self.get(key) {
            Some(v) => v.clone(),
            None => self
                .default
                .as_ref()
                .map(|b| (**b).clone())
                .unwrap_or(Value::Null),
        }
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.position(key).is_some()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(k, _)| k.as_str())
    }

    pub fn values(&self) -> impl Iterator<Item = &Value> {
        self.entries.iter().map(|(_, v)| v)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Deep structural equality: same keys and values in the same
    /// order, ignoring the default/case-insensitive metadata (which
    /// is presentation, not data).
    pub fn structural_eq(&self, other: &Dict) -> bool {
        self.entries.len() == other.entries.len()
            && self
                .entries
                .iter()
                .zip(other.entries.iter())
                .all(|((k1, v1), (k2, v2))| k1 == k2 && v1.structural_eq_fallback(v2))
    }
}

impl PartialEq for Dict {
    fn eq(&self, other: &Self) -> bool {
        self.structural_eq(other)
    }
}

impl fmt::Debug for Dict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map().entries(self.entries.iter().cloned()).finish()
    }
}

/// Host-interchange serialization (SPEC_FULL.md ambient stack): a row
/// handed back to the embedding host serializes as a plain JSON
/// object in column order. Fails if any column still holds an
/// unmaterialized `StoredQuery`/`LazyExpr` — callers that serialize a
/// result row are expected to have already reduced it.
impl Serialize for Dict {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (k, v) in &self.entries {
            map.serialize_entry(k, v)?;
        }
        map.end()
    }
}

impl FromIterator<(String, Value)> for Dict {
    fn from_iter<I: IntoIterator<Item = (String, Value)>>(iter: I) -> Self {
        let mut d = Dict::new();
        for (k, v) in iter {
            d.insert(k, v);
        }
        d
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reinsert_keeps_original_position() {
        let mut d = Dict::new();
        d.insert("a".into(), Value::Int(1));
        d.insert("b".into(), Value::Int(2));
        d.insert("a".into(), Value::Int(99));
        let keys: Vec<&str> = d.keys().collect();
        assert_eq!(keys, vec!["a", "b"]);
        assert_eq!(d.get("a"), Some(&Value::Int(99)));
    }

    #[test]
    fn missing_key_without_default_yields_null() {
        let d = Dict::new();
        assert_eq!(d.get_or_default("missing"), Value::Null);
    }

    #[test]
    fn missing_key_with_default() {
        let d = Dict::new().with_default(Value::Int(-1));
        assert_eq!(d.get_or_default("missing"), Value::Int(-1));
    }

    #[test]
    fn case_insensitive_lookup() {
        let mut d = Dict::new().with_case_insensitive(true);
        d.insert("Name".into(), Value::str("x"));
        assert_eq!(d.get("name"), Some(&Value::str("x")));
        assert_eq!(d.get("NAME"), Some(&Value::str("x")));
    }

    #[test]
    fn serializes_as_json_object_in_column_order() {
        let mut d = Dict::new();
        d.insert("b".into(), Value::Int(2));
        d.insert("a".into(), Value::Int(1));
        let json = serde_json::to_string(&d).unwrap();
        assert_eq!(json, r#"{"b":2,"a":1}"#);
    }

    #[test]
    fn structural_eq_order_sensitive() {
        let mut a = Dict::new();
        a.insert("x".into(), Value::Int(1));
        a.insert("y".into(), Value::Int(2));
        let mut b = Dict::new();
        b.insert("y".into(), Value::Int(2));
        b.insert("x".into(), Value::Int(1));
        assert!(!a.structural_eq(&b));
    }
}
