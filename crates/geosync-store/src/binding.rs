//! Direction mask and the shared bind/unbind protocol state.
//!
//! Both synchronizers carry a [`BindingCore`]: the bound flag, the direction
//! mask fixed at bind time, the listener subscriptions to tear down, the
//! [`OriginGuard`], and a bind generation used to invalidate deferred work
//! (a one-shot map-ready callback from a binding that has since been undone
//! must not run).
//!
//! The protocol is mediator-shaped: while bound, structural store mutations
//! go through the owning synchronizer, which applies each change exactly
//! once per side. The only event listeners live on the collection side, so
//! the guard has exactly one echo path to suppress.

use std::cell::{Cell, RefCell};

use bitflags::bitflags;
use geosync_core::Subscription;
use tracing::debug;

use crate::guard::OriginGuard;

bitflags! {
    /// Which directions a binding propagates. Fixed when `bind` runs.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct SyncDirection: u8 {
        /// Engine-side changes are replayed into the store.
        const COLLECTION_TO_STORE = 0b01;
        /// Store-side changes are replayed into the collection.
        const STORE_TO_COLLECTION = 0b10;
    }
}

impl Default for SyncDirection {
    fn default() -> Self {
        Self::all()
    }
}

/// Options accepted by `bind`.
#[derive(Debug, Clone, Copy, Default)]
pub struct BindOptions {
    pub direction: SyncDirection,
}

impl BindOptions {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_direction(mut self, direction: SyncDirection) -> Self {
        self.direction = direction;
        self
    }
}

/// Shared binding state embedded in each synchronizer.
#[derive(Debug)]
pub(crate) struct BindingCore {
    bound: Cell<bool>,
    direction: Cell<SyncDirection>,
    generation: Cell<u64>,
    subscriptions: RefCell<Vec<Subscription>>,
    pub(crate) guard: OriginGuard,
}

impl Default for BindingCore {
    fn default() -> Self {
        Self::new()
    }
}

impl BindingCore {
    pub(crate) fn new() -> Self {
        Self {
            bound: Cell::new(false),
            direction: Cell::new(SyncDirection::all()),
            generation: Cell::new(0),
            subscriptions: RefCell::new(Vec::new()),
            guard: OriginGuard::new(),
        }
    }

    pub(crate) fn is_bound(&self) -> bool {
        self.bound.get()
    }

    pub(crate) fn direction(&self) -> SyncDirection {
        self.direction.get()
    }

    /// Whether the active binding propagates in `direction`.
    pub(crate) fn propagates(&self, direction: SyncDirection) -> bool {
        self.bound.get() && self.direction.get().contains(direction)
    }

    /// Transition to bound. Returns `false` (and changes nothing) when
    /// already bound — `bind` must be idempotent, never double-registering.
    pub(crate) fn begin_bind(&self, direction: SyncDirection) -> bool {
        if self.bound.get() {
            debug!("bind ignored: already bound");
            return false;
        }
        self.bound.set(true);
        self.direction.set(direction);
        self.generation.set(self.generation.get().wrapping_add(1));
        true
    }

    /// Identifies the current bind; deferred callbacks capture it and bail
    /// out when it no longer matches.
    pub(crate) fn bind_generation(&self) -> u64 {
        self.generation.get()
    }

    pub(crate) fn is_current(&self, generation: u64) -> bool {
        self.bound.get() && self.generation.get() == generation
    }

    /// Keep a listener subscription alive until unbind.
    pub(crate) fn hold(&self, subscription: Subscription) {
        self.subscriptions.borrow_mut().push(subscription);
    }

    /// Transition to unbound, dropping every listener. Returns `false` when
    /// already unbound.
    pub(crate) fn end_bind(&self) -> bool {
        if !self.bound.get() {
            return false;
        }
        self.bound.set(false);
        self.subscriptions.borrow_mut().clear();
        true
    }
}
