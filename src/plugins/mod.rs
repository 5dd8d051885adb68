//! Row-producing plugins — the `FROM` clause's extension point
//! (spec.md §3, §4.6).
//!
//! A `Plugin` turns a set of arguments into a stream of rows. `call`
//! runs on its own OS thread and sends rows through a bounded
//! `std::sync::mpsc::sync_channel`, so a slow consumer applies
//! backpressure to the producer instead of the whole result set
//! buffering in memory (spec.md §5). The channel's capacity comes
//! from `EngineConfig::channel_capacity`.
//!
//! Grounded on the teacher's `src/functional/concurrent_processing.rs`
//! (`ConcurrentProcessor`, bounded channel + worker thread shape) and
//! `src/functional/iterator_engine.rs` (lazy, pull-driven row
//! sequencing).

pub mod chain;
pub mod dict_plugin;
pub mod flatten;
pub mod foreach;
pub mod if_plugin;
pub mod range;
pub mod scope_plugin;

use std::collections::HashMap;
use std::sync::mpsc::{sync_channel, Receiver, SyncSender};
use std::sync::{Arc, Mutex};

use crate::args::{parse_args, ArgSchema, ParsedArgs};
use crate::cancellation::CancellationToken;
use crate::dict::Dict;
use crate::error::{log_runtime, EngineError, EngineResult, ErrorKind};
use crate::scope::Scope;

pub trait Plugin: Send + Sync {
    fn name(&self) -> &'static str;
    fn schema(&self) -> Arc<ArgSchema>;
    /// Produces this plugin's rows against `scope`, honoring
    /// `cancel`. Runs on a dedicated thread; the returned `Receiver`
    /// is closed (by dropping its `SyncSender`) once the thread
    /// finishes or observes cancellation.
    fn call(&self, args: ParsedArgs, scope: Arc<Scope>, cancel: CancellationToken) -> Receiver<Dict>;
}

pub struct PluginRegistry {
    plugins: Mutex<HashMap<String, Arc<dyn Plugin>>>,
}

impl Default for PluginRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}

impl PluginRegistry {
    pub fn empty() -> Self {
        Self {
            plugins: Mutex::new(HashMap::new()),
        }
    }

    /// The grounding plugin set named in spec.md §4.6: `scope`,
    /// `range`, `chain`, `if`, `foreach`, `flatten`, plus the
    /// supplemented `dict` FROM-source (SPEC_FULL.md §4.8).
    pub fn with_builtins() -> Self {
        let reg = Self::empty();
        reg.register(Arc::new(scope_plugin::ScopePlugin)).expect("builtin registration");
        reg.register(Arc::new(range::RangePlugin)).expect("builtin registration");
        reg.register(Arc::new(chain::ChainPlugin)).expect("builtin registration");
        reg.register(Arc::new(if_plugin::IfPlugin)).expect("builtin registration");
        reg.register(Arc::new(foreach::ForeachPlugin)).expect("builtin registration");
        reg.register(Arc::new(flatten::FlattenPlugin)).expect("builtin registration");
        reg.register(Arc::new(dict_plugin::DictPlugin)).expect("builtin registration");
        reg
    }

    pub fn register(&self, plugin: Arc<dyn Plugin>) -> EngineResult<()> {
        let mut plugins = self.plugins.lock().expect("plugin registry mutex poisoned");
        if plugins.contains_key(plugin.name()) {
            return Err(EngineError::DuplicatePlugin {
                name: plugin.name().to_string(),
            });
        }
        plugins.insert(plugin.name().to_string(), plugin);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Plugin>> {
        self.plugins.lock().expect("plugin registry mutex poisoned").get(name).cloned()
    }

    /// Resolves `name` and parses `raw_args` against its schema. The
    /// caller is expected to treat an `Err` as a construction-time
    /// failure (e.g. a malformed `FROM` clause) rather than a
    /// mid-query runtime error.
    pub fn call(
        &self,
        name: &str,
        raw_args: &Dict,
        scope: Arc<Scope>,
        cancel: CancellationToken,
    ) -> EngineResult<Receiver<Dict>> {
        let plugin = self.get(name).ok_or_else(|| EngineError::UnknownPlugin {
            name: name.to_string(),
        })?;
        let parsed = parse_args(&plugin.schema(), raw_args, &scope)?;
        Ok(plugin.call(parsed, scope, cancel))
    }
}

/// Spawns a plugin's producer thread bound to a channel sized by
/// `capacity`. `producer` receives the sending half and the
/// cancellation token and should stop (dropping `tx`) as soon as
/// `cancel.is_cancelled()` or a `send` fails (the receiver was
/// dropped).
pub fn spawn_plugin_thread(
    capacity: usize,
    producer: impl FnOnce(SyncSender<Dict>, CancellationToken) + Send + 'static,
    cancel: CancellationToken,
) -> Receiver<Dict> {
    let (tx, rx) = sync_channel(capacity.max(1));
    let spawned = std::thread::Builder::new().name("vql-plugin".into()).spawn(move || {
        producer(tx, cancel);
    });
    if let Err(e) = spawned {
        log_runtime(ErrorKind::Resource, format!("failed to spawn plugin thread: {}", e));
    }
    rx
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::dispatch::ProtocolDispatcher;
    use crate::value::Value;

    fn test_scope() -> Arc<Scope> {
        Scope::root(Arc::new(ProtocolDispatcher::new()), Arc::new(EngineConfig::default()))
    }

    #[test]
    fn unknown_plugin_is_an_error() {
        let reg = PluginRegistry::empty();
        let err = reg.call("nope", &Dict::new(), test_scope(), CancellationToken::new()).unwrap_err();
        assert_eq!(err, EngineError::UnknownPlugin { name: "nope".to_string() });
    }

    #[test]
    fn duplicate_registration_is_rejected() {
        let reg = PluginRegistry::with_builtins();
        let err = reg.register(Arc::new(range::RangePlugin)).unwrap_err();
        assert_eq!(err, EngineError::DuplicatePlugin { name: "range".to_string() });
    }

    #[test]
    fn spawn_plugin_thread_delivers_rows_then_closes() {
        let rx = spawn_plugin_thread(
            4,
            |tx, _cancel| {
                let mut d = Dict::new();
                d.insert("a".into(), Value::Int(1));
                let _ = tx.send(d);
            },
            CancellationToken::new(),
        );
        let rows: Vec<_> = rx.into_iter().collect();
        assert_eq!(rows.len(), 1);
    }
}
