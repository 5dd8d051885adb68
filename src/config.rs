//! Engine-wide tunables.
//!
//! Grounded on the teacher's `LazyConfig`
//! (`src/functional/lazy_pipeline.rs`) and `LazyEvaluationConfig`
//! (`src/functional/query_composition.rs`): a plain `Default`-able
//! struct of tunables threaded through construction rather than
//! global statics, so multiple engines can run in one process with
//! different bounds.

use std::time::Duration;

/// Tunables the specification leaves to the host (SPEC_FULL.md §1
/// ambient addition).
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Bound on each row channel between pipeline stages (spec.md
    /// §5: "bounded synchronous channel").
    pub channel_capacity: usize,
    /// Per-destructor timeout before the engine abandons it and
    /// continues (spec.md §4.2, fixed at 60s in the source; exposed
    /// here per §9's Open Question).
    pub destructor_timeout: Duration,
    /// Maximum nested `Scope::copy` depth before `Resolve` returns
    /// Null and logs a stack-overflow diagnostic (spec.md §4.2).
    pub max_scope_depth: usize,
    /// Default worker count for `foreach` when `async` is unset.
    pub foreach_default_workers: usize,
    /// Worker count `foreach` uses when `async=true` and no explicit
    /// `workers` argument is given (spec.md §4.6).
    pub foreach_async_default_workers: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            channel_capacity: 64,
            destructor_timeout: Duration::from_secs(60),
            max_scope_depth: 1000,
            foreach_default_workers: 1,
            foreach_async_default_workers: 100,
        }
    }
}

impl EngineConfig {
    pub fn with_channel_capacity(mut self, capacity: usize) -> Self {
        self.channel_capacity = capacity;
        self
    }

    pub fn with_destructor_timeout(mut self, timeout: Duration) -> Self {
        self.destructor_timeout = timeout;
        self
    }

    pub fn with_max_scope_depth(mut self, depth: usize) -> Self {
        self.max_scope_depth = depth;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec_constants() {
        let cfg = EngineConfig::default();
        assert_eq!(cfg.max_scope_depth, 1000);
        assert_eq!(cfg.destructor_timeout, Duration::from_secs(60));
        assert_eq!(cfg.foreach_async_default_workers, 100);
    }

    #[test]
    fn builder_overrides_apply() {
        let cfg = EngineConfig::default()
            .with_channel_capacity(8)
            .with_max_scope_depth(10);
        assert_eq!(cfg.channel_capacity, 8);
        assert_eq!(cfg.max_scope_depth, 10);
    }
}
