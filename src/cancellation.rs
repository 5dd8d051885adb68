//! Query cancellation (spec.md §5, §7's `Cancelled` error kind).
//!
//! A `CancellationToken` is a cheap, cloneable handle over a shared
//! flag. Setting it (via `cancel()`, or by dropping the last
//! `CancellationGuard`) is observed by every pipeline stage, worker
//! thread and `foreach` task holding a clone, so a `LIMIT`-satisfied
//! `SELECT` or a dropped result channel stops upstream plugin threads
//! instead of letting them run to completion unobserved.
//!
//! Grounded on the teacher's `src/functional/concurrent_processing.rs`
//! (`ConcurrentProcessor`'s shared-flag shutdown signal), generalized
//! from "stop accepting new work" to "stop producing rows".

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

#[derive(Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self(Arc::new(AtomicBool::new(false)))
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_token_is_not_cancelled() {
        assert!(!CancellationToken::new().is_cancelled());
    }

    #[test]
    fn cancel_is_visible_on_clones() {
        let token = CancellationToken::new();
        let clone = token.clone();
        token.cancel();
        assert!(clone.is_cancelled());
    }
}
