//! Scalar and aggregate function registries (spec.md §3, §4.4).
//!
//! A `ScalarFunction` reduces to a `Value` given its arguments and
//! the calling scope. An `AggregateFunction` additionally receives
//! the aggregate-call-site id assigned at compile time (spec.md
//! §4.4) so it can thread its accumulator updates through the
//! current GROUP BY bin's `AggregatorCtx` via `AggregatorCtx::modify`.
//!
//! Grounded on the teacher's `src/functional/pure_function_registry.rs`
//! (name-keyed registry of boxed function objects, duplicate-name
//! rejection at registration).

mod aggregate;
mod scalar;

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::args::{parse_args, ArgSchema};
use crate::dict::Dict;
use crate::error::{log_runtime, EngineError, EngineResult, ErrorKind};
use crate::scope::Scope;
use crate::value::Value;

pub trait ScalarFunction: Send + Sync {
    fn name(&self) -> &'static str;
    fn schema(&self) -> Arc<ArgSchema>;
    fn call(&self, args: crate::args::ParsedArgs, scope: &Arc<Scope>) -> Value;
}

pub trait AggregateFunction: Send + Sync {
    fn name(&self) -> &'static str;
    fn schema(&self) -> Arc<ArgSchema>;
    fn call(&self, args: crate::args::ParsedArgs, scope: &Arc<Scope>, id: u64) -> Value;
}

pub struct FunctionRegistry {
    scalars: Mutex<HashMap<String, Arc<dyn ScalarFunction>>>,
    aggregates: Mutex<HashMap<String, Arc<dyn AggregateFunction>>>,
}

impl Default for FunctionRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}

impl FunctionRegistry {
    pub fn empty() -> Self {
        Self {
            scalars: Mutex::new(HashMap::new()),
            aggregates: Mutex::new(HashMap::new()),
        }
    }

    /// A registry pre-populated with the grounding set of builtins
    /// named in SPEC_FULL.md §4.7/§4.8: `len`, `get`, `dict` (scalar)
    /// and `count`, `sum`, `min`, `max`, `enumerate` (aggregate).
    pub fn with_builtins() -> Self {
        let reg = Self::empty();
        reg.register_scalar(Arc::new(scalar::Len)).expect("builtin registration");
        reg.register_scalar(Arc::new(scalar::Get)).expect("builtin registration");
        reg.register_scalar(Arc::new(scalar::DictFn)).expect("builtin registration");
        reg.register_aggregate(Arc::new(aggregate::Count)).expect("builtin registration");
        reg.register_aggregate(Arc::new(aggregate::Sum)).expect("builtin registration");
        reg.register_aggregate(Arc::new(aggregate::Min)).expect("builtin registration");
        reg.register_aggregate(Arc::new(aggregate::Max)).expect("builtin registration");
        reg.register_aggregate(Arc::new(aggregate::Enumerate)).expect("builtin registration");
        reg
    }

    pub fn register_scalar(&self, f: Arc<dyn ScalarFunction>) -> EngineResult<()> {
        let mut scalars = self.scalars.lock().expect("function registry mutex poisoned");
        if scalars.contains_key(f.name()) {
            return Err(EngineError::DuplicateFunction {
                name: f.name().to_string(),
            });
        }
        scalars.insert(f.name().to_string(), f);
        Ok(())
    }

    pub fn register_aggregate(&self, f: Arc<dyn AggregateFunction>) -> EngineResult<()> {
        let mut aggregates = self.aggregates.lock().expect("function registry mutex poisoned");
        if aggregates.contains_key(f.name()) {
            return Err(EngineError::DuplicateFunction {
                name: f.name().to_string(),
            });
        }
        aggregates.insert(f.name().to_string(), f);
        Ok(())
    }

    pub fn is_aggregate(&self, name: &str) -> bool {
        self.aggregates.lock().expect("function registry mutex poisoned").contains_key(name)
    }

    /// Calls a scalar function by name. An unknown name is a runtime
    /// resolution failure (spec.md §7): logged, and reduced to
    /// `Value::Null` rather than aborting the query.
    pub fn call_scalar(&self, name: &str, raw_args: &Dict, scope: &Arc<Scope>) -> Value {
        let f = {
            let scalars = self.scalars.lock().expect("function registry mutex poisoned");
            match scalars.get(name) {
                Some(f) => f.clone(),
                None => {
                    log_runtime(ErrorKind::Resolve, format!("unknown function `{}`", name));
                    return Value::Null;
                }
            }
        };
        match parse_args(&f.schema(), raw_args, scope) {
            Ok(parsed) => f.call(parsed, scope),
            Err(e) => {
                e.log();
                Value::Null
            }
        }
    }

    pub fn call_aggregate(&self, name: &str, raw_args: &Dict, scope: &Arc<Scope>, id: u64) -> Value {
        let f = {
            let aggregates = self.aggregates.lock().expect("function registry mutex poisoned");
            match aggregates.get(name) {
                Some(f) => f.clone(),
                None => {
                    log_runtime(ErrorKind::Resolve, format!("unknown aggregate function `{}`", name));
                    return Value::Null;
                }
            }
        };
        match parse_args(&f.schema(), raw_args, scope) {
            Ok(parsed) => f.call(parsed, scope, id),
            Err(e) => {
                e.log();
                Value::Null
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::dispatch::ProtocolDispatcher;

    fn test_scope() -> Arc<Scope> {
        Scope::root(Arc::new(ProtocolDispatcher::new()), Arc::new(EngineConfig::default()))
    }

    #[test]
    fn unknown_scalar_function_logs_and_returns_null() {
        let reg = FunctionRegistry::empty();
        let scope = test_scope();
        assert_eq!(reg.call_scalar("nope", &Dict::new(), &scope), Value::Null);
    }

    #[test]
    fn builtins_are_preregistered_without_duplicates() {
        let reg = FunctionRegistry::with_builtins();
        assert!(reg.is_aggregate("count"));
        assert!(!reg.is_aggregate("len"));
    }

    #[test]
    fn duplicate_registration_is_rejected() {
        let reg = FunctionRegistry::with_builtins();
        let err = reg.register_scalar(Arc::new(scalar::Len)).unwrap_err();
        assert_eq!(err, EngineError::DuplicateFunction { name: "len".to_string() });
    }
}
