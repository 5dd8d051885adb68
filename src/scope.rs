//! The scope tree (spec.md §3, §4.2, §9).
//!
//! A `Scope` is a node in a parent-pointer tree: variable resolution
//! walks from a scope up through its ancestors until a binding is
//! found (or all ancestors are exhausted, in which case resolution
//! logs a diagnostic and yields `Value::Null` rather than erroring —
//! spec.md §7's "best effort" policy). Each scope owns a destructor
//! stack that runs in LIFO order exactly once when the scope closes,
//! and carries a shared handle to the `ProtocolDispatcher` and the
//! `AggregatorCtx` for whichever GROUP BY bin it belongs to.
//!
//! `Scope::copy` is how a per-row evaluation scope is created from a
//! query-level scope (or how a nested subquery captures its
//! enclosing scope); it is guarded against runaway nesting by
//! `EngineConfig::max_scope_depth` (spec.md §9's first Open
//! Question: the cap is fixed in the original at 1000 and is kept as
//! a config default here, not a hardcoded constant).
//!
//! Grounded on the teacher's `src/functional/immutable_state.rs`
//! (parent-linked, copy-on-write state frames) and
//! `src/functional/concurrent_processing.rs` for the
//! timeout-bounded-worker pattern reused below for destructor
//! execution.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};

use log::warn;

use crate::aggregate::AggregatorCtx;
use crate::config::EngineConfig;
use crate::dict::Dict;
use crate::dispatch::ProtocolDispatcher;
use crate::error::{log_runtime, ErrorKind};
use crate::value::Value;

type Destructor = Box<dyn FnOnce() + Send>;

pub struct Scope {
    parent: Option<Arc<Scope>>,
    vars: Mutex<Dict>,
    dispatcher: Arc<ProtocolDispatcher>,
    config: Arc<EngineConfig>,
    aggregator: Arc<AggregatorCtx>,
    destructors: Mutex<Vec<Destructor>>,
    /// Scopes produced from this one via `copy`/`copy_as_finalizer`/
    /// `copy_with_new_aggregator`, held weakly so a child doesn't keep
    /// its parent's children list alive past its own lifetime. Closed
    /// (recursively, children first) when this scope closes.
    children: Mutex<Vec<Weak<Scope>>>,
    closed: AtomicBool,
    depth: usize,
    /// Set only on scopes produced by `copy_as_finalizer`: aggregate
    /// function calls compiled against this scope read their running
    /// accumulator instead of advancing it (spec.md §4.4's
    /// accumulate/finalize split for `GROUP BY` output rows).
    finalizing: bool,
}

impl Scope {
    /// Builds the root scope of a query. Has no parent; resolution
    /// that reaches it and fails simply returns `Value::Null`.
    pub fn root(dispatcher: Arc<ProtocolDispatcher>, config: Arc<EngineConfig>) -> Arc<Scope> {
        Arc::new(Scope {
            parent: None,
            vars: Mutex::new(Dict::new()),
            dispatcher,
            config,
            aggregator: AggregatorCtx::new_shared(),
            destructors: Mutex::new(Vec::new()),
            children: Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
            depth: 0,
            finalizing: false,
        })
    }

    /// Records `child` as a child of `parent`, so `parent.close()`
    /// recurses into it before running its own destructors.
    fn register_child(parent: &Arc<Scope>, child: &Arc<Scope>) {
        parent
            .children
            .lock()
            .expect("scope children mutex poisoned")
            .push(Arc::downgrade(child));
    }

    pub fn is_finalizing(&self) -> bool {
        self.finalizing
    }

    /// Builds a leaf scope over this one for the final, read-only
    /// projection pass of a `GROUP BY` bin.
    pub fn copy_as_finalizer(self: &Arc<Scope>) -> Arc<Scope> {
        let child = Arc::new(Scope {
            parent: Some(self.clone()),
            vars: Mutex::new(Dict::new()),
            dispatcher: self.dispatcher.clone(),
            config: self.config.clone(),
            aggregator: self.aggregator.clone(),
            destructors: Mutex::new(Vec::new()),
            children: Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
            depth: self.depth + 1,
            finalizing: true,
        });
        Self::register_child(self, &child);
        child
    }

    pub fn dispatcher(&self) -> &Arc<ProtocolDispatcher> {
        &self.dispatcher
    }

    pub fn config(&self) -> &Arc<EngineConfig> {
        &self.config
    }

    pub fn aggregator(&self) -> &Arc<AggregatorCtx> {
        &self.aggregator
    }

    pub fn depth(&self) -> usize {
        self.depth
    }

    /// Creates a child scope that inherits this scope's dispatcher,
    /// config and aggregator context, for per-row/per-call evaluation
    /// (spec.md §4.2). Returns the same depth-exceeded scope (rather
    /// than erroring) when the configured maximum is hit; callers
    /// that resolve variables against a depth-exceeded scope get
    /// `Value::Null` and a logged diagnostic instead of a panic or a
    /// hard failure, consistent with the "best effort" policy.
    pub fn copy(self: &Arc<Scope>) -> Arc<Scope> {
        let depth = self.depth + 1;
        if depth > self.config.max_scope_depth {
            warn!(
                target: "vql",
                "[Resource] scope nesting depth {} exceeds configured max {}, returning a depth-exhausted scope",
                depth, self.config.max_scope_depth
            );
        }
        let child = Arc::new(Scope {
            parent: Some(self.clone()),
            vars: Mutex::new(Dict::new()),
            dispatcher: self.dispatcher.clone(),
            config: self.config.clone(),
            aggregator: self.aggregator.clone(),
            destructors: Mutex::new(Vec::new()),
            children: Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
            depth,
            finalizing: false,
        });
        Self::register_child(self, &child);
        child
    }

    /// Creates a child scope bound to a fresh `AggregatorCtx`, used
    /// when entering a new GROUP BY bin (spec.md §4.4).
    pub fn copy_with_new_aggregator(self: &Arc<Scope>) -> Arc<Scope> {
        let depth = self.depth + 1;
        if depth > self.config.max_scope_depth {
            warn!(
                target: "vql",
                "[Resource] scope nesting depth {} exceeds configured max {}, returning a depth-exhausted scope",
                depth, self.config.max_scope_depth
            );
        }
        let child = Arc::new(Scope {
            parent: Some(self.clone()),
            vars: Mutex::new(Dict::new()),
            dispatcher: self.dispatcher.clone(),
            config: self.config.clone(),
            aggregator: AggregatorCtx::new_shared(),
            destructors: Mutex::new(Vec::new()),
            children: Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
            depth,
            finalizing: false,
        });
        Self::register_child(self, &child);
        child
    }

    /// Binds a `LET`-style local variable in this scope (spec.md
    /// §4.3). Shadows same-named bindings in ancestor scopes for
    /// lookups that start here.
    pub fn set_var(&self, name: impl Into<String>, value: Value) {
        self.vars
            .lock()
            .expect("scope vars mutex poisoned")
            .insert(name.into(), value);
    }

    /// Resolves a variable by walking this scope and its ancestors.
    /// An unresolved name is not an error: it logs a `Resolve`
    /// diagnostic and yields `Value::Null` (spec.md §7).
    pub fn resolve(&self, name: &str) -> Value {
        if self.depth > self.config.max_scope_depth {
            log_runtime(
                ErrorKind::Resource,
                format!("variable `{}` resolved against a depth-exhausted scope", name),
            );
            return Value::Null;
        }
        let mut cur = self;
        loop {
            if let Some(v) = cur.vars.lock().expect("scope vars mutex poisoned").get(name) {
                return v.clone();
            }
            match &cur.parent {
                Some(p) => cur = p,
                None => {
                    log_runtime(ErrorKind::Resolve, format!("unknown variable `{}`", name));
                    return Value::Null;
                }
            }
        }
    }

    /// A snapshot of this scope's own `LET` bindings, not including
    /// ancestors. Backs the `scope()` plugin's introspection row
    /// (spec.md §4.6).
    pub fn local_vars_snapshot(&self) -> Dict {
        self.vars.lock().expect("scope vars mutex poisoned").clone()
    }

    pub fn contains_var(&self, name: &str) -> bool {
        let mut cur = self;
        loop {
            if cur.vars.lock().expect("scope vars mutex poisoned").contains_key(name) {
                return true;
            }
            match &cur.parent {
                Some(p) => cur = p,
                None => return false,
            }
        }
    }

    /// Registers a destructor to run (LIFO, exactly once) when this
    /// scope closes.
    pub fn push_destructor(&self, f: impl FnOnce() + Send + 'static) {
        self.destructors
            .lock()
            .expect("scope destructors mutex poisoned")
            .push(Box::new(f));
    }

    /// Closes this scope: its children close first (recursively, also
    /// children-first), then its own destructors run in LIFO order,
    /// then it removes itself from its parent's child list (spec.md §3
    /// invariant). Idempotent: a second call is a no-op. Each
    /// destructor is given up to `EngineConfig::destructor_timeout`;
    /// one that blocks past that is abandoned (logged, not retried or
    /// joined) so a single misbehaving host destructor cannot hang the
    /// whole scope-close chain.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        let children = std::mem::take(&mut *self.children.lock().expect("scope children mutex poisoned"));
        for child in children.iter().filter_map(Weak::upgrade) {
            child.close();
        }
        let pending = std::mem::take(&mut *self.destructors.lock().expect("scope destructors mutex poisoned"));
        for d in pending.into_iter().rev() {
            self.run_destructor_with_timeout(d);
        }
        self.remove_from_parent();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Drops this scope's entry from its parent's children list, if
    /// it has a parent. No-op for the root scope.
    fn remove_from_parent(&self) {
        let Some(parent) = &self.parent else {
            return;
        };
        let mut siblings = parent.children.lock().expect("scope children mutex poisoned");
        siblings.retain(|w| match w.upgrade() {
            Some(arc) => !std::ptr::eq(Arc::as_ptr(&arc), self as *const Scope),
            None => false,
        });
    }

    fn run_destructor_with_timeout(&self, d: Destructor) {
        let (tx, rx) = std::sync::mpsc::channel();
        let spawned = std::thread::Builder::new()
            .name("vql-destructor".into())
            .spawn(move || {
                d();
                let _ = tx.send(());
            });
        match spawned {
            Ok(_handle) => {
                if rx.recv_timeout(self.config.destructor_timeout).is_err() {
                    log_runtime(
                        ErrorKind::Resource,
                        format!(
                            "destructor exceeded {:?} timeout, abandoning",
                            self.config.destructor_timeout
                        ),
                    );
                }
            }
            Err(e) => {
                log_runtime(ErrorKind::Resource, format!("failed to spawn destructor thread: {}", e));
            }
        }
    }
}

impl Drop for Scope {
    fn drop(&mut self) {
        self.close();
    }
}
