//! Legend rows for the layers a predicate accepts.
//!
//! The legend is a filtered, ordered view of a layer collection. Row
//! positions are derived from collection indexes with the subset mapper, so
//! the panel never rescans the whole collection on a single add or move.
//!
//! How a layer is rendered is a closed property of its kind: every
//! [`LayerKind`] resolves to exactly one [`LegendKind`], checked at compile
//! time, rather than being looked up in an extensible registry by name.

use std::cell::RefCell;
use std::rc::{Rc, Weak};

use geosync_core::{CollectionEvent, Layer, LayerCollection, LayerKind, LayerProperty, Subscription};
use geosync_store::subset;
use tracing::trace;

/// How a legend row is rendered. One variant per layer kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LegendKind {
    /// Scaled image swatch, for raster imagery.
    Image,
    /// Symbolizer graphic, for vector data.
    Symbol,
    /// Plain heading, for group layers.
    Heading,
}

impl LegendKind {
    #[must_use]
    pub fn for_layer(layer: &Layer) -> Self {
        match layer.kind() {
            LayerKind::Raster => LegendKind::Image,
            LayerKind::Vector => LegendKind::Symbol,
            LayerKind::Group => LegendKind::Heading,
        }
    }
}

/// One rendered legend entry.
#[derive(Debug, Clone)]
pub struct LegendRow {
    pub layer: Layer,
    pub kind: LegendKind,
    pub title: String,
}

impl LegendRow {
    fn for_layer(layer: &Layer) -> Self {
        Self {
            layer: layer.clone(),
            kind: LegendKind::for_layer(layer),
            title: layer.name(),
        }
    }
}

struct LegendPanelInner {
    rows: RefCell<Vec<LegendRow>>,
    filter: Box<dyn Fn(&Layer) -> bool>,
    subscription: RefCell<Option<Subscription>>,
}

impl LegendPanelInner {
    fn accepts(&self, layer: &Layer) -> bool {
        (self.filter)(layer)
    }

    fn row_index(&self, layer: &Layer) -> Option<usize> {
        self.rows.borrow().iter().position(|r| r.layer.same(layer))
    }
}

/// Ordered legend rows for the accepted members of one layer collection.
///
/// The panel observes; it never mutates the collection it watches.
pub struct LegendPanel {
    inner: Rc<LegendPanelInner>,
}

impl LegendPanel {
    /// A panel showing every layer the predicate accepts. The common choice
    /// is [`LegendPanel::visible_only`].
    #[must_use]
    pub fn new(filter: impl Fn(&Layer) -> bool + 'static) -> Self {
        Self {
            inner: Rc::new(LegendPanelInner {
                rows: RefCell::new(Vec::new()),
                filter: Box::new(filter),
                subscription: RefCell::new(None),
            }),
        }
    }

    /// A panel showing only currently visible layers.
    #[must_use]
    pub fn visible_only() -> Self {
        Self::new(Layer::visible)
    }

    /// Build rows from the collection's current members and start following
    /// its events. Re-attaching replaces the previous attachment.
    pub fn attach(&self, collection: &LayerCollection) {
        {
            let mut rows = self.inner.rows.borrow_mut();
            rows.clear();
            for layer in collection.to_vec() {
                if self.inner.accepts(&layer) {
                    rows.push(LegendRow::for_layer(&layer));
                }
            }
        }
        let weak = Rc::downgrade(&self.inner);
        let watched = collection.clone();
        let sub = collection.on_event(move |event| {
            Self::on_collection_event(&weak, &watched, event);
        });
        *self.inner.subscription.borrow_mut() = Some(sub);
        trace!(rows = self.len(), "legend attached");
    }

    /// Stop following the collection and drop all rows.
    pub fn detach(&self) {
        *self.inner.subscription.borrow_mut() = None;
        self.inner.rows.borrow_mut().clear();
    }

    fn on_collection_event(
        weak: &Weak<LegendPanelInner>,
        collection: &LayerCollection,
        event: &CollectionEvent,
    ) {
        let Some(inner) = weak.upgrade() else {
            return;
        };
        match event {
            CollectionEvent::Added { layer, index } => {
                if !inner.accepts(layer) {
                    return;
                }
                Self::insert_row(&inner, collection, layer, *index);
            }
            CollectionEvent::Removed { layer, .. } => {
                if let Some(at) = inner.row_index(layer) {
                    inner.rows.borrow_mut().remove(at);
                }
            }
            CollectionEvent::Changed { layer, property } => {
                Self::refresh_member(&inner, collection, layer, *property);
            }
        }
    }

    /// Place a row for an accepted collection member at the panel position
    /// matching its collection index.
    fn insert_row(
        inner: &Rc<LegendPanelInner>,
        collection: &LayerCollection,
        layer: &Layer,
        index: usize,
    ) {
        let items = collection.to_vec();
        let position = subset::position_in_subset(&items, index, |l| inner.accepts(l))
            .unwrap_or_else(|| inner.rows.borrow().len());
        let mut rows = inner.rows.borrow_mut();
        let position = position.min(rows.len());
        rows.insert(position, LegendRow::for_layer(layer));
    }

    /// A member changed: acceptance may have flipped (visibility), its
    /// position may have moved (order), or only its title is stale.
    fn refresh_member(
        inner: &Rc<LegendPanelInner>,
        collection: &LayerCollection,
        layer: &Layer,
        property: LayerProperty,
    ) {
        let present = inner.row_index(layer);
        let accepted = inner.accepts(layer) && collection.contains(layer);
        match (present, accepted) {
            (Some(at), false) => {
                inner.rows.borrow_mut().remove(at);
            }
            (None, true) => {
                if let Some(index) = collection.index_of(layer) {
                    Self::insert_row(inner, collection, layer, index);
                }
            }
            (Some(at), true) => match property {
                LayerProperty::Order => {
                    inner.rows.borrow_mut().remove(at);
                    if let Some(index) = collection.index_of(layer) {
                        Self::insert_row(inner, collection, layer, index);
                    }
                }
                LayerProperty::Name => {
                    inner.rows.borrow_mut()[at].title = layer.name();
                }
                LayerProperty::Opacity | LayerProperty::Visibility => {}
            },
            (None, false) => {}
        }
    }

    /// Current rows, top to bottom.
    #[must_use]
    pub fn rows(&self) -> Vec<LegendRow> {
        self.inner.rows.borrow().clone()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.rows.borrow().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.rows.borrow().is_empty()
    }
}
