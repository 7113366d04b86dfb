//! Layers and the ordered, observable layer collection.
//!
//! A [`Layer`] is a cheap `Rc` handle with reference-equality identity.
//! Property setters emit a single generic [`LayerEvent::Changed`] carrying
//! the property name; a [`LayerCollection`] re-emits those as
//! [`CollectionEvent::Changed`] for members, so one subscription on the
//! collection observes structure and sub-property changes alike.
//!
//! # Invariants
//!
//! 1. A layer's `Changed` events are re-emitted by a collection only while
//!    the layer is a member.
//! 2. `push`/`insert` of an already-contained layer is a no-op (no event).
//! 3. Events fire after the mutation, outside any interior borrow.

use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};

use tracing::trace;

use crate::dispatch::{Dispatcher, Subscription};
use crate::feature::FeatureCollection;

/// What kind of content a layer renders.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LayerKind {
    /// Tiled or image raster.
    Raster,
    /// Vector features (owns a [`FeatureCollection`]).
    Vector,
    /// Grouping node with no content of its own.
    Group,
}

/// The property named by a generic layer change event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LayerProperty {
    /// Position within the owning collection changed.
    Order,
    Name,
    Opacity,
    Visibility,
}

/// Per-layer event: one generic change notification per mutated property.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LayerEvent {
    Changed { property: LayerProperty },
}

struct LayerInner {
    name: RefCell<String>,
    opacity: Cell<f64>,
    visible: Cell<bool>,
    kind: LayerKind,
    features: Option<FeatureCollection>,
    events: Dispatcher<LayerEvent>,
}

/// Handle to an engine-owned layer. Clones share the same layer.
#[derive(Clone)]
pub struct Layer {
    inner: Rc<LayerInner>,
}

impl std::fmt::Debug for Layer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Layer")
            .field("name", &self.name())
            .field("kind", &self.kind())
            .field("visible", &self.visible())
            .field("opacity", &self.opacity())
            .finish()
    }
}

impl Layer {
    fn with_kind(name: impl Into<String>, kind: LayerKind, features: Option<FeatureCollection>) -> Self {
        Self {
            inner: Rc::new(LayerInner {
                name: RefCell::new(name.into()),
                opacity: Cell::new(1.0),
                visible: Cell::new(true),
                kind,
                features,
                events: Dispatcher::new(),
            }),
        }
    }

    /// Create a raster layer.
    #[must_use]
    pub fn raster(name: impl Into<String>) -> Self {
        Self::with_kind(name, LayerKind::Raster, None)
    }

    /// Create a vector layer with an empty feature collection.
    #[must_use]
    pub fn vector(name: impl Into<String>) -> Self {
        Self::with_kind(name, LayerKind::Vector, Some(FeatureCollection::new()))
    }

    /// Create a group layer.
    #[must_use]
    pub fn group(name: impl Into<String>) -> Self {
        Self::with_kind(name, LayerKind::Group, None)
    }

    /// Reference-equality identity.
    #[must_use]
    pub fn same(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    #[must_use]
    pub fn kind(&self) -> LayerKind {
        self.inner.kind
    }

    /// The vector layer's feature collection, if this is a vector layer.
    #[must_use]
    pub fn features(&self) -> Option<&FeatureCollection> {
        self.inner.features.as_ref()
    }

    #[must_use]
    pub fn name(&self) -> String {
        self.inner.name.borrow().clone()
    }

    pub fn set_name(&self, name: impl Into<String>) {
        let name = name.into();
        if *self.inner.name.borrow() == name {
            return;
        }
        *self.inner.name.borrow_mut() = name;
        self.changed(LayerProperty::Name);
    }

    #[must_use]
    pub fn opacity(&self) -> f64 {
        self.inner.opacity.get()
    }

    pub fn set_opacity(&self, opacity: f64) {
        let opacity = opacity.clamp(0.0, 1.0);
        if self.inner.opacity.get() == opacity {
            return;
        }
        self.inner.opacity.set(opacity);
        self.changed(LayerProperty::Opacity);
    }

    #[must_use]
    pub fn visible(&self) -> bool {
        self.inner.visible.get()
    }

    pub fn set_visible(&self, visible: bool) {
        if self.inner.visible.get() == visible {
            return;
        }
        self.inner.visible.set(visible);
        self.changed(LayerProperty::Visibility);
    }

    /// Subscribe to this layer's property-change events.
    #[must_use]
    pub fn on_event(&self, callback: impl Fn(&LayerEvent) + 'static) -> Subscription {
        self.inner.events.subscribe(callback)
    }

    fn changed(&self, property: LayerProperty) {
        trace!(layer = %self.name(), ?property, "layer property changed");
        self.inner.events.notify(&LayerEvent::Changed { property });
    }
}

/// Event emitted by a [`LayerCollection`].
#[derive(Debug, Clone)]
pub enum CollectionEvent {
    Added { layer: Layer, index: usize },
    Removed { layer: Layer, index: usize },
    /// A member's property changed; `Order` means the member was repositioned.
    Changed { layer: Layer, property: LayerProperty },
}

struct CollectionInner {
    layers: RefCell<Vec<Layer>>,
    // One subscription per member, dropped when the member leaves.
    member_subs: RefCell<Vec<(Layer, Subscription)>>,
    events: Dispatcher<CollectionEvent>,
}

/// The live, ordered layer stack of a map. Clones share the same collection.
#[derive(Clone)]
pub struct LayerCollection {
    inner: Rc<CollectionInner>,
}

impl Default for LayerCollection {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for LayerCollection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LayerCollection")
            .field("len", &self.len())
            .finish()
    }
}

impl LayerCollection {
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Rc::new(CollectionInner {
                layers: RefCell::new(Vec::new()),
                member_subs: RefCell::new(Vec::new()),
                events: Dispatcher::new(),
            }),
        }
    }

    /// Reference-equality identity.
    #[must_use]
    pub fn same(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.layers.borrow().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.layers.borrow().is_empty()
    }

    #[must_use]
    pub fn get(&self, index: usize) -> Option<Layer> {
        self.inner.layers.borrow().get(index).cloned()
    }

    #[must_use]
    pub fn index_of(&self, layer: &Layer) -> Option<usize> {
        self.inner.layers.borrow().iter().position(|l| l.same(layer))
    }

    #[must_use]
    pub fn contains(&self, layer: &Layer) -> bool {
        self.index_of(layer).is_some()
    }

    /// Snapshot of the current members, in order.
    #[must_use]
    pub fn to_vec(&self) -> Vec<Layer> {
        self.inner.layers.borrow().clone()
    }

    /// Append `layer`. No-op (returning `false`) if already contained.
    pub fn push(&self, layer: &Layer) -> bool {
        let len = self.len();
        self.insert(len, layer)
    }

    /// Insert `layer` at `index` (clamped to the current length).
    /// No-op (returning `false`) if already contained.
    pub fn insert(&self, index: usize, layer: &Layer) -> bool {
        if self.contains(layer) {
            return false;
        }
        let index = {
            let mut layers = self.inner.layers.borrow_mut();
            let index = index.min(layers.len());
            layers.insert(index, layer.clone());
            index
        };
        self.watch_member(layer);
        trace!(layer = %layer.name(), index, "layer added to collection");
        self.inner.events.notify(&CollectionEvent::Added {
            layer: layer.clone(),
            index,
        });
        true
    }

    /// Remove `layer`, returning its former index.
    pub fn remove(&self, layer: &Layer) -> Option<usize> {
        let index = {
            let mut layers = self.inner.layers.borrow_mut();
            let index = layers.iter().position(|l| l.same(layer))?;
            layers.remove(index);
            index
        };
        self.inner
            .member_subs
            .borrow_mut()
            .retain(|(member, _)| !member.same(layer));
        trace!(layer = %layer.name(), index, "layer removed from collection");
        self.inner.events.notify(&CollectionEvent::Removed {
            layer: layer.clone(),
            index,
        });
        Some(index)
    }

    /// Move a member to `index` (clamped), emitting one `Changed { Order }`.
    ///
    /// Returns `false` if `layer` is not a member or the position is
    /// unchanged.
    pub fn move_to(&self, layer: &Layer, index: usize) -> bool {
        let moved = {
            let mut layers = self.inner.layers.borrow_mut();
            let Some(from) = layers.iter().position(|l| l.same(layer)) else {
                return false;
            };
            let to = index.min(layers.len() - 1);
            if from == to {
                return false;
            }
            let member = layers.remove(from);
            layers.insert(to, member);
            (from, to)
        };
        trace!(layer = %layer.name(), from = moved.0, to = moved.1, "layer reordered");
        self.inner.events.notify(&CollectionEvent::Changed {
            layer: layer.clone(),
            property: LayerProperty::Order,
        });
        true
    }

    /// Subscribe to structure and member-property events.
    #[must_use]
    pub fn on_event(&self, callback: impl Fn(&CollectionEvent) + 'static) -> Subscription {
        self.inner.events.subscribe(callback)
    }

    fn watch_member(&self, layer: &Layer) {
        let weak: Weak<CollectionInner> = Rc::downgrade(&self.inner);
        let member = layer.clone();
        let sub = layer.on_event(move |event| {
            let Some(inner) = weak.upgrade() else {
                return;
            };
            let LayerEvent::Changed { property } = *event;
            inner.events.notify(&CollectionEvent::Changed {
                layer: member.clone(),
                property,
            });
        });
        self.inner.member_subs.borrow_mut().push((layer.clone(), sub));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::cell::RefCell;

    fn record_events(collection: &LayerCollection) -> (Rc<RefCell<Vec<String>>>, Subscription) {
        let log = Rc::new(RefCell::new(Vec::new()));
        let l = Rc::clone(&log);
        let sub = collection.on_event(move |event| {
            let entry = match event {
                CollectionEvent::Added { layer, index } => {
                    format!("added {} @{index}", layer.name())
                }
                CollectionEvent::Removed { layer, index } => {
                    format!("removed {} @{index}", layer.name())
                }
                CollectionEvent::Changed { layer, property } => {
                    format!("changed {} {property:?}", layer.name())
                }
            };
            l.borrow_mut().push(entry);
        });
        (log, sub)
    }

    #[test]
    fn push_and_order() {
        let collection = LayerCollection::new();
        let a = Layer::raster("a");
        let b = Layer::vector("b");
        assert!(collection.push(&a));
        assert!(collection.push(&b));
        assert_eq!(collection.index_of(&a), Some(0));
        assert_eq!(collection.index_of(&b), Some(1));
    }

    #[test]
    fn push_duplicate_is_noop() {
        let collection = LayerCollection::new();
        let a = Layer::raster("a");
        let (log, _sub) = record_events(&collection);
        assert!(collection.push(&a));
        assert!(!collection.push(&a));
        assert_eq!(collection.len(), 1);
        assert_eq!(log.borrow().len(), 1);
    }

    #[test]
    fn insert_clamps_index() {
        let collection = LayerCollection::new();
        let a = Layer::raster("a");
        assert!(collection.insert(99, &a));
        assert_eq!(collection.index_of(&a), Some(0));
    }

    #[test]
    fn member_change_reemitted() {
        let collection = LayerCollection::new();
        let a = Layer::raster("a");
        collection.push(&a);
        let (log, _sub) = record_events(&collection);

        a.set_opacity(0.5);
        a.set_visible(false);
        assert_eq!(
            &*log.borrow(),
            &["changed a Opacity", "changed a Visibility"]
        );
    }

    #[test]
    fn removed_member_no_longer_reemitted() {
        let collection = LayerCollection::new();
        let a = Layer::raster("a");
        collection.push(&a);
        collection.remove(&a);
        let (log, _sub) = record_events(&collection);

        a.set_opacity(0.2);
        assert!(log.borrow().is_empty());
    }

    #[test]
    fn move_to_emits_single_order_change() {
        let collection = LayerCollection::new();
        let a = Layer::raster("a");
        let b = Layer::raster("b");
        let c = Layer::raster("c");
        for layer in [&a, &b, &c] {
            collection.push(layer);
        }
        let (log, _sub) = record_events(&collection);

        assert!(collection.move_to(&b, 0));
        assert_eq!(collection.index_of(&b), Some(0));
        assert_eq!(collection.index_of(&a), Some(1));
        assert_eq!(&*log.borrow(), &["changed b Order"]);
    }

    #[test]
    fn move_to_same_position_is_noop() {
        let collection = LayerCollection::new();
        let a = Layer::raster("a");
        collection.push(&a);
        let (log, _sub) = record_events(&collection);
        assert!(!collection.move_to(&a, 0));
        assert!(log.borrow().is_empty());
    }

    #[test]
    fn setter_noop_when_unchanged() {
        let a = Layer::raster("a");
        let hits = Rc::new(RefCell::new(0));
        let h = Rc::clone(&hits);
        let _sub = a.on_event(move |_| *h.borrow_mut() += 1);

        a.set_visible(true); // already true
        a.set_opacity(1.0); // already 1.0
        a.set_name("a"); // already "a"
        assert_eq!(*hits.borrow(), 0);
    }

    #[test]
    fn vector_layer_has_features() {
        assert!(Layer::vector("v").features().is_some());
        assert!(Layer::raster("r").features().is_none());
        assert!(Layer::group("g").features().is_none());
    }

    proptest! {
        // Collection order against a plain Vec model under random
        // push/insert/remove/move sequences.
        #[test]
        fn order_matches_vec_model(
            ops in prop::collection::vec((0u8..4, 0usize..8, 0usize..9), 1..48),
        ) {
            let pool: Vec<Layer> = (0..8).map(|i| Layer::raster(format!("l{i}"))).collect();
            let collection = LayerCollection::new();
            let mut model: Vec<usize> = Vec::new();

            for (op, who, at) in ops {
                match op {
                    0 => {
                        if collection.push(&pool[who]) {
                            model.push(who);
                        }
                    }
                    1 => {
                        if collection.insert(at, &pool[who]) {
                            model.insert(at.min(model.len()), who);
                        }
                    }
                    2 => {
                        if collection.remove(&pool[who]).is_some() {
                            model.retain(|&i| i != who);
                        }
                    }
                    _ => {
                        if collection.move_to(&pool[who], at) {
                            let from = model.iter().position(|&i| i == who).unwrap();
                            let to = at.min(model.len() - 1);
                            let moved = model.remove(from);
                            model.insert(to, moved);
                        }
                    }
                }
                let names: Vec<String> = collection.to_vec().iter().map(Layer::name).collect();
                let expected: Vec<String> = model.iter().map(|&i| pool[i].name()).collect();
                prop_assert_eq!(names, expected);
            }
        }
    }
}
