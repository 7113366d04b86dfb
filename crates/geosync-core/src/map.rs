//! The map: a layer collection plus a viewport that may not exist yet.
//!
//! A freshly constructed [`Map`] has no extent. Work that needs a positioned
//! map (the layer store's initial reconciliation) registers an [`on_ready`]
//! callback; the first `set_extent` call fires all pending callbacks exactly
//! once. Callbacks registered after that run immediately.
//!
//! [`on_ready`]: Map::on_ready

use std::cell::RefCell;
use std::rc::Rc;

use tracing::debug;

use crate::layer::LayerCollection;

/// A rectangular viewport extent in map units.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Extent {
    pub min_x: f64,
    pub min_y: f64,
    pub max_x: f64,
    pub max_y: f64,
}

impl Extent {
    #[must_use]
    pub fn new(min_x: f64, min_y: f64, max_x: f64, max_y: f64) -> Self {
        Self {
            min_x,
            min_y,
            max_x,
            max_y,
        }
    }
}

struct MapInner {
    layers: LayerCollection,
    extent: RefCell<Option<Extent>>,
    ready_callbacks: RefCell<Vec<Box<dyn FnOnce()>>>,
}

/// Handle to a map. Clones share the same map.
#[derive(Clone)]
pub struct Map {
    inner: Rc<MapInner>,
}

impl Default for Map {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Map {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Map")
            .field("layers", &self.inner.layers.len())
            .field("positioned", &self.is_positioned())
            .finish()
    }
}

impl Map {
    /// Create an unpositioned map with an empty layer collection.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Rc::new(MapInner {
                layers: LayerCollection::new(),
                extent: RefCell::new(None),
                ready_callbacks: RefCell::new(Vec::new()),
            }),
        }
    }

    /// Reference-equality identity.
    #[must_use]
    pub fn same(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    /// The map's live layer collection.
    #[must_use]
    pub fn layers(&self) -> &LayerCollection {
        &self.inner.layers
    }

    /// Current viewport extent, if positioned.
    #[must_use]
    pub fn extent(&self) -> Option<Extent> {
        *self.inner.extent.borrow()
    }

    /// Whether the map has a defined viewport.
    #[must_use]
    pub fn is_positioned(&self) -> bool {
        self.inner.extent.borrow().is_some()
    }

    /// Set the viewport extent. The first call fires pending ready
    /// callbacks, exactly once and in registration order.
    pub fn set_extent(&self, extent: Extent) {
        let first = {
            let mut slot = self.inner.extent.borrow_mut();
            let first = slot.is_none();
            *slot = Some(extent);
            first
        };
        if !first {
            return;
        }
        debug!(?extent, "map positioned");
        let pending: Vec<Box<dyn FnOnce()>> =
            std::mem::take(&mut *self.inner.ready_callbacks.borrow_mut());
        for callback in pending {
            callback();
        }
    }

    /// Run `callback` once the map is positioned — immediately if it already
    /// is, otherwise when the first extent arrives.
    pub fn on_ready(&self, callback: impl FnOnce() + 'static) {
        if self.is_positioned() {
            callback();
        } else {
            self.inner.ready_callbacks.borrow_mut().push(Box::new(callback));
        }
    }
}
