//! The protocol dispatcher (spec.md §3, §4.2, §9).
//!
//! Every polymorphic operation over `Value` — equality, ordering,
//! arithmetic, boolean coercion, membership, associative access,
//! regex match, iteration, and stored-query materialization — is a
//! small registry of implementations guarded by an `applicable(a[,
//! b])` predicate, rather than a trait object per `Value` variant.
//! This is "polymorphism via protocols, not inheritance" (spec.md
//! §9): host-registered implementations are tried before the
//! built-ins, and the first applicable implementation wins.
//!
//! Grounded on the teacher's type-erased registry pattern in
//! `src/functional/function_traits.rs` (`FunctionContainer`,
//! `Callable`), generalized here from a single type-keyed cache to
//! several per-protocol ordered lists.

use std::cmp::Ordering as CmpOrdering;
use std::sync::Mutex;

use regex::Regex;

use crate::dict::Dict;
use crate::value::Value;

/// Arithmetic operators dispatched through `ArithmeticProtocol`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArithOp {
    Add,
    Sub,
    Mul,
    Div,
}

pub trait EqualityProtocol: Send + Sync {
    fn applicable(&self, a: &Value, b: &Value) -> bool;
    fn eq(&self, a: &Value, b: &Value) -> bool;
}

pub trait OrderingProtocol: Send + Sync {
    fn applicable(&self, a: &Value, b: &Value) -> bool;
    fn cmp(&self, a: &Value, b: &Value) -> CmpOrdering;
}

pub trait ArithmeticProtocol: Send + Sync {
    fn applicable(&self, op: ArithOp, a: &Value, b: &Value) -> bool;
    fn apply(&self, op: ArithOp, a: &Value, b: &Value) -> Option<Value>;
}

pub trait BoolProtocol: Send + Sync {
    fn applicable(&self, a: &Value) -> bool;
    fn coerce(&self, a: &Value) -> bool;
}

pub trait MembershipProtocol: Send + Sync {
    /// `needle in haystack`.
    fn applicable(&self, haystack: &Value, needle: &Value) -> bool;
    fn contains(&self, haystack: &Value, needle: &Value) -> bool;
}

/// Associative access, `a[b]` / `a.b` (spec.md §4.2).
pub trait AssociativeProtocol: Send + Sync {
    fn applicable(&self, a: &Value, b: &Value) -> bool;
    fn get(&self, a: &Value, b: &Value) -> Option<Value>;
}

pub trait RegexProtocol: Send + Sync {
    fn applicable(&self, a: &Value, pattern: &Value) -> bool;
    fn is_match(&self, a: &Value, pattern: &Value) -> bool;
}

/// Default iteration/association over a `Value` (spec.md §2's
/// "iteration & dict protocols" 5% share): turns a dict or sequence
/// into an ordered stream of `(key, value)` pairs so that `dict`
/// coercion and `flatten` can walk arbitrary members uniformly.
pub trait IterateProtocol: Send + Sync {
    fn applicable(&self, a: &Value) -> bool;
    fn iterate(&self, a: &Value) -> Vec<(Option<String>, Value)>;
}

pub struct ProtocolDispatcher {
    host_eq: Mutex<Vec<Box<dyn EqualityProtocol>>>,
    host_ord: Mutex<Vec<Box<dyn OrderingProtocol>>>,
    host_arith: Mutex<Vec<Box<dyn ArithmeticProtocol>>>,
    host_bool: Mutex<Vec<Box<dyn BoolProtocol>>>,
    host_member: Mutex<Vec<Box<dyn MembershipProtocol>>>,
    host_assoc: Mutex<Vec<Box<dyn AssociativeProtocol>>>,
    host_regex: Mutex<Vec<Box<dyn RegexProtocol>>>,
    host_iter: Mutex<Vec<Box<dyn IterateProtocol>>>,

    builtin_assoc: Vec<Box<dyn AssociativeProtocol>>,
    builtin_iter: Vec<Box<dyn IterateProtocol>>,
    builtin_arith: Vec<Box<dyn ArithmeticProtocol>>,
    builtin_regex: Vec<Box<dyn RegexProtocol>>,
}

impl Default for ProtocolDispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl ProtocolDispatcher {
    pub fn new() -> Self {
        Self {
            host_eq: Mutex::new(Vec::new()),
            host_ord: Mutex::new(Vec::new()),
            host_arith: Mutex::new(Vec::new()),
            host_bool: Mutex::new(Vec::new()),
            host_member: Mutex::new(Vec::new()),
            host_assoc: Mutex::new(Vec::new()),
            host_regex: Mutex::new(Vec::new()),
            host_iter: Mutex::new(Vec::new()),
            builtin_assoc: vec![Box::new(DictAssociative), Box::new(SequenceAssociative)],
            builtin_iter: vec![Box::new(DictIterate), Box::new(SequenceIterate)],
            builtin_arith: vec![Box::new(NumericArithmetic)],
            builtin_regex: vec![Box::new(DefaultRegex)],
        }
    }

    pub fn register_equality(&self, impl_: Box<dyn EqualityProtocol>) {
        self.host_eq.lock().expect("dispatcher mutex poisoned").push(impl_);
    }

    pub fn register_ordering(&self, impl_: Box<dyn OrderingProtocol>) {
        self.host_ord.lock().expect("dispatcher mutex poisoned").push(impl_);
    }

    pub fn register_arithmetic(&self, impl_: Box<dyn ArithmeticProtocol>) {
        self.host_arith
            .lock()
            .expect("dispatcher mutex poisoned")
            .push(impl_);
    }

    pub fn register_bool(&self, impl_: Box<dyn BoolProtocol>) {
        self.host_bool.lock().expect("dispatcher mutex poisoned").push(impl_);
    }

    pub fn register_membership(&self, impl_: Box<dyn MembershipProtocol>) {
        self.host_member
            .lock()
            .expect("dispatcher mutex poisoned")
            .push(impl_);
    }

    pub fn register_associative(&self, impl_: Box<dyn AssociativeProtocol>) {
        self.host_assoc
            .lock()
            .expect("dispatcher mutex poisoned")
            .push(impl_);
    }

    pub fn register_regex(&self, impl_: Box<dyn RegexProtocol>) {
        self.host_regex
            .lock()
            .expect("dispatcher mutex poisoned")
            .push(impl_);
    }

    pub fn register_iterate(&self, impl_: Box<dyn IterateProtocol>) {
        self.host_iter.lock().expect("dispatcher mutex poisoned").push(impl_);
    }

    /// Equality, falling back to deep structural equality per
    /// spec.md §4.2 if no registered implementation applies.
    pub fn eq(&self, a: &Value, b: &Value) -> bool {
        let host = self.host_eq.lock().expect("dispatcher mutex poisoned");
        for impl_ in host.iter() {
            if impl_.applicable(a, b) {
                return impl_.eq(a, b);
            }
        }
        a.structural_eq_fallback(b)
    }

    /// Ordering, falling back to canonical-string comparison.
    pub fn cmp(&self, a: &Value, b: &Value) -> CmpOrdering {
        let host = self.host_ord.lock().expect("dispatcher mutex poisoned");
        for impl_ in host.iter() {
            if impl_.applicable(a, b) {
                return impl_.cmp(a, b);
            }
        }
        a.ordering_fallback(b)
    }

    pub fn arith(&self, op: ArithOp, a: &Value, b: &Value) -> Value {
        {
            let host = self.host_arith.lock().expect("dispatcher mutex poisoned");
            for impl_ in host.iter() {
                if impl_.applicable(op, a, b) {
                    if let Some(v) = impl_.apply(op, a, b) {
                        return v;
                    }
                }
            }
        }
        for impl_ in &self.builtin_arith {
            if impl_.applicable(op, a, b) {
                if let Some(v) = impl_.apply(op, a, b) {
                    return v;
                }
            }
        }
        crate::error::log_runtime(
            crate::error::ErrorKind::Type,
            format!("arithmetic {:?} not applicable to operand types", op),
        );
        Value::Null
    }

    /// Boolean coercion, falling back to "non-null, non-zero,
    /// non-empty".
    pub fn truthy(&self, a: &Value) -> bool {
        let host = self.host_bool.lock().expect("dispatcher mutex poisoned");
        for impl_ in host.iter() {
            if impl_.applicable(a) {
                return impl_.coerce(a);
            }
        }
        a.truthy_fallback()
    }

    pub fn contains(&self, haystack: &Value, needle: &Value) -> bool {
        let host = self.host_member.lock().expect("dispatcher mutex poisoned");
        for impl_ in host.iter() {
            if impl_.applicable(haystack, needle) {
                return impl_.contains(haystack, needle);
            }
        }
        match haystack {
            Value::Sequence(items) => items.iter().any(|v| self.eq(v, needle)),
            Value::Str(s) => needle
                .as_str()
                .map(|n| s.contains(n))
                .unwrap_or(false),
            Value::Dict(d) => needle.as_str().map(|k| d.contains_key(k)).unwrap_or(false),
            _ => false,
        }
    }

    /// `a[b]` / dotted-path step. Returns `None` only to let callers
    /// distinguish "no protocol matched at all"; per spec.md §4.2 an
    /// absent intermediate step in a dotted path yields `Value::Null`
    /// at the call site, not an error.
    pub fn get(&self, a: &Value, b: &Value) -> Option<Value> {
        {
            let host = self.host_assoc.lock().expect("dispatcher mutex poisoned");
            for impl_ in host.iter() {
                if impl_.applicable(a, b) {
                    return impl_.get(a, b);
                }
            }
        }
        for impl_ in &self.builtin_assoc {
            if impl_.applicable(a, b) {
                return impl_.get(a, b);
            }
        }
        None
    }

    pub fn regex_match(&self, a: &Value, pattern: &Value) -> bool {
        {
            let host = self.host_regex.lock().expect("dispatcher mutex poisoned");
            for impl_ in host.iter() {
                if impl_.applicable(a, pattern) {
                    return impl_.is_match(a, pattern);
                }
            }
        }
        for impl_ in &self.builtin_regex {
            if impl_.applicable(a, pattern) {
                return impl_.is_match(a, pattern);
            }
        }
        false
    }

    /// Default associative/iterate over dict/row (spec.md §2's
    /// "iteration & dict protocols"): produces `(key, value)` pairs,
    /// `key` being `None` for plain sequence elements.
    pub fn iterate(&self, a: &Value) -> Vec<(Option<String>, Value)> {
        {
            let host = self.host_iter.lock().expect("dispatcher mutex poisoned");
            for impl_ in host.iter() {
                if impl_.applicable(a) {
                    return impl_.iterate(a);
                }
            }
        }
        for impl_ in &self.builtin_iter {
            if impl_.applicable(a) {
                return impl_.iterate(a);
            }
        }
        Vec::new()
    }
}

// --- built-in implementations -------------------------------------------------

struct DictAssociative;
impl AssociativeProtocol for DictAssociative {
    fn applicable(&self, a: &Value, b: &Value) -> bool {
        matches!(a, Value::Dict(_)) && matches!(b, Value::Str(_))
    }
    fn get(&self, a: &Value, b: &Value) -> Option<Value> {
        if let (Value::Dict(d), Some(key)) = (a, b.as_str()) {
            d.get(key).cloned().or(Some(Value::Null))
        } else {
            None
        }
    }
}

struct SequenceAssociative;
impl AssociativeProtocol for SequenceAssociative {
    fn applicable(&self, a: &Value, b: &Value) -> bool {
        matches!(a, Value::Sequence(_)) && matches!(b, Value::Int(_))
    }
    fn get(&self, a: &Value, b: &Value) -> Option<Value> {
        if let (Value::Sequence(items), Some(idx)) = (a, b.as_i64()) {
            // negative indices are not supported (spec.md §4.2).
            if idx < 0 {
                return Some(Value::Null);
            }
            Some(items.get(idx as usize).cloned().unwrap_or(Value::Null))
        } else {
            None
        }
    }
}

struct DictIterate;
impl IterateProtocol for DictIterate {
    fn applicable(&self, a: &Value) -> bool {
        matches!(a, Value::Dict(_))
    }
    fn iterate(&self, a: &Value) -> Vec<(Option<String>, Value)> {
        if let Value::Dict(d) = a {
            d.iter().map(|(k, v)| (Some(k.to_string()), v.clone())).collect()
        } else {
            Vec::new()
        }
    }
}

struct SequenceIterate;
impl IterateProtocol for SequenceIterate {
    fn applicable(&self, a: &Value) -> bool {
        matches!(a, Value::Sequence(_))
    }
    fn iterate(&self, a: &Value) -> Vec<(Option<String>, Value)> {
        if let Value::Sequence(items) = a {
            items.iter().cloned().map(|v| (None, v)).collect()
        } else {
            Vec::new()
        }
    }
}

struct NumericArithmetic;
impl ArithmeticProtocol for NumericArithmetic {
    fn applicable(&self, _op: ArithOp, a: &Value, b: &Value) -> bool {
        matches!(a, Value::Int(_) | Value::Float(_)) && matches!(b, Value::Int(_) | Value::Float(_))
    }
    fn apply(&self, op: ArithOp, a: &Value, b: &Value) -> Option<Value> {
        if let (Value::Int(x), Value::Int(y)) = (a, b) {
            // int64 wrap semantics (spec.md §8 property 6).
            return Some(Value::Int(match op {
                ArithOp::Add => x.wrapping_add(*y),
                ArithOp::Sub => x.wrapping_sub(*y),
                ArithOp::Mul => x.wrapping_mul(*y),
                ArithOp::Div => {
                    if *y == 0 {
                        return Some(Value::Null);
                    }
                    x.wrapping_div(*y)
                }
            }));
        }
        let (x, y) = (a.as_f64()?, b.as_f64()?);
        Some(Value::Float(match op {
            ArithOp::Add => x + y,
            ArithOp::Sub => x - y,
            ArithOp::Mul => x * y,
            ArithOp::Div => x / y,
        }))
    }
}

struct DefaultRegex;
impl RegexProtocol for DefaultRegex {
    fn applicable(&self, a: &Value, pattern: &Value) -> bool {
        matches!(a, Value::Str(_)) && matches!(pattern, Value::Str(_))
    }
    fn is_match(&self, a: &Value, pattern: &Value) -> bool {
        match (a.as_str(), pattern.as_str()) {
            (Some(s), Some(p)) => Regex::new(p).map(|re| re.is_match(s)).unwrap_or(false),
            _ => false,
        }
    }
}

/// Helper used by `args`/`select` to coerce a member-producing value
/// into a `Dict`, per spec.md §4.5's `dict` converter: "if value is
/// a dict, use it; otherwise build a dict by iterating the value's
/// members via the associative protocol".
pub fn coerce_to_dict(dispatcher: &ProtocolDispatcher, v: &Value) -> Dict {
    if let Value::Dict(d) = v {
        return d.clone();
    }
    let mut d = Dict::new();
    for (key, value) in dispatcher.iterate(v) {
        if let Some(k) = key {
            d.insert(k, value);
        }
    }
    d
}
