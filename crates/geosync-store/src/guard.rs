//! Origin-token re-entrancy suppression.
//!
//! When the synchronizer replays a mutation onto the opposite side, that
//! side's own listeners fire synchronously and would replay it right back.
//! Instead of per-operation booleans (`_adding`, `_removing`, ...), one
//! [`OriginGuard`] per synchronizer marks "a change of ours is in flight"
//! with a generation-tagged token: handlers check [`suppressed`] and return,
//! and the token is released by an RAII scope so a panicking handler cannot
//! leave the guard stuck.
//!
//! Nested [`enter`] calls are permitted; only the outermost scope owns the
//! token (inner scopes are markers and release nothing). Generations
//! increase monotonically and exist for traceability only.
//!
//! [`suppressed`]: OriginGuard::suppressed
//! [`enter`]: OriginGuard::enter

use std::cell::Cell;

use tracing::trace;

/// Per-synchronizer suppression flag with generation tagging.
#[derive(Debug, Default)]
pub struct OriginGuard {
    active: Cell<bool>,
    generation: Cell<u64>,
}

impl OriginGuard {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether a self-originated mutation is currently in flight.
    ///
    /// Handlers call this first and treat `true` as "this event is our own
    /// echo — discard it".
    #[must_use]
    pub fn suppressed(&self) -> bool {
        self.active.get()
    }

    /// Generation of the most recent scope (0 before any).
    #[must_use]
    pub fn generation(&self) -> u64 {
        self.generation.get()
    }

    /// Open a scope marking subsequent events as self-originated.
    ///
    /// The token is released when the returned scope drops — including
    /// during unwinding.
    #[must_use]
    pub fn enter(&self) -> OriginScope<'_> {
        let owns_token = !self.active.get();
        if owns_token {
            self.active.set(true);
            let generation = self.generation.get().wrapping_add(1);
            self.generation.set(generation);
            trace!(generation, "origin scope opened");
        }
        OriginScope {
            guard: self,
            owns_token,
        }
    }
}

/// RAII token for one self-originated mutation. See [`OriginGuard::enter`].
#[derive(Debug)]
pub struct OriginScope<'a> {
    guard: &'a OriginGuard,
    owns_token: bool,
}

impl Drop for OriginScope<'_> {
    fn drop(&mut self) {
        if self.owns_token {
            self.guard.active.set(false);
            trace!(generation = self.guard.generation.get(), "origin scope closed");
        }
    }
}
