//! Ordered layer-tree nodes sourced from a live collection.
//!
//! A [`TreeLoader`] keeps a flat, ordered node list for the layers a
//! predicate accepts. Insertion positions for live additions come from the
//! subset mapper's insertion form, which clamps: an event carrying an index
//! that is already stale (members removed since it was queued) still lands
//! at a valid node position instead of panicking.

use std::cell::RefCell;
use std::rc::{Rc, Weak};

use geosync_core::{CollectionEvent, Layer, LayerCollection, LayerProperty, Subscription};
use geosync_store::subset;
use tracing::trace;

/// One node in the flattened layer tree.
#[derive(Debug, Clone)]
pub struct TreeNode {
    pub layer: Layer,
    pub title: String,
}

impl TreeNode {
    fn for_layer(layer: &Layer) -> Self {
        Self {
            layer: layer.clone(),
            title: layer.name(),
        }
    }
}

struct TreeLoaderInner {
    nodes: RefCell<Vec<TreeNode>>,
    filter: Box<dyn Fn(&Layer) -> bool>,
    subscription: RefCell<Option<Subscription>>,
}

impl TreeLoaderInner {
    fn accepts(&self, layer: &Layer) -> bool {
        (self.filter)(layer)
    }

    fn has_node(&self, layer: &Layer) -> bool {
        self.nodes.borrow().iter().any(|n| n.layer.same(layer))
    }

    fn node_index(&self, layer: &Layer) -> Option<usize> {
        self.nodes.borrow().iter().position(|n| n.layer.same(layer))
    }
}

/// Flat node list mirroring the accepted members of one layer collection.
///
/// The loader observes; it never mutates the collection it watches.
pub struct TreeLoader {
    inner: Rc<TreeLoaderInner>,
}

impl TreeLoader {
    /// A loader accepting the layers the predicate accepts.
    #[must_use]
    pub fn new(filter: impl Fn(&Layer) -> bool + 'static) -> Self {
        Self {
            inner: Rc::new(TreeLoaderInner {
                nodes: RefCell::new(Vec::new()),
                filter: Box::new(filter),
                subscription: RefCell::new(None),
            }),
        }
    }

    /// A loader accepting every layer.
    #[must_use]
    pub fn all_layers() -> Self {
        Self::new(|_| true)
    }

    /// Build nodes from the collection's current members and start
    /// following its events. Re-loading replaces the previous attachment.
    pub fn load(&self, collection: &LayerCollection) {
        {
            let mut nodes = self.inner.nodes.borrow_mut();
            nodes.clear();
            for layer in collection.to_vec() {
                if self.inner.accepts(&layer) {
                    nodes.push(TreeNode::for_layer(&layer));
                }
            }
        }
        let weak = Rc::downgrade(&self.inner);
        let watched = collection.clone();
        let sub = collection.on_event(move |event| {
            Self::on_collection_event(&weak, &watched, event);
        });
        *self.inner.subscription.borrow_mut() = Some(sub);
        trace!(nodes = self.len(), "tree loaded");
    }

    /// Stop following the collection and drop all nodes.
    pub fn unload(&self) {
        *self.inner.subscription.borrow_mut() = None;
        self.inner.nodes.borrow_mut().clear();
    }

    /// Node position where a member added at collection `index` belongs.
    /// Clamped to the node count when the index outruns the tracked subset.
    #[must_use]
    pub fn insertion_index(&self, items: &[Layer], index: usize) -> usize {
        subset::subset_index(items, index, self.inner.nodes.borrow().len(), |l| {
            self.inner.has_node(l)
        })
    }

    fn on_collection_event(
        weak: &Weak<TreeLoaderInner>,
        collection: &LayerCollection,
        event: &CollectionEvent,
    ) {
        let Some(inner) = weak.upgrade() else {
            return;
        };
        let loader = TreeLoader { inner };
        match event {
            CollectionEvent::Added { layer, index } => {
                if !loader.inner.accepts(layer) || loader.inner.has_node(layer) {
                    return;
                }
                let items = collection.to_vec();
                let position = loader.insertion_index(&items, *index);
                loader
                    .inner
                    .nodes
                    .borrow_mut()
                    .insert(position, TreeNode::for_layer(layer));
            }
            CollectionEvent::Removed { layer, .. } => {
                if let Some(at) = loader.inner.node_index(layer) {
                    loader.inner.nodes.borrow_mut().remove(at);
                }
            }
            CollectionEvent::Changed { layer, property } => match property {
                LayerProperty::Order => Self::reposition(&loader.inner, collection, layer),
                LayerProperty::Name => {
                    if let Some(at) = loader.inner.node_index(layer) {
                        loader.inner.nodes.borrow_mut()[at].title = layer.name();
                    }
                }
                LayerProperty::Opacity | LayerProperty::Visibility => {}
            },
        }
    }

    /// Remove-then-reinsert: the target position is computed against the
    /// node list without the moving layer.
    fn reposition(inner: &Rc<TreeLoaderInner>, collection: &LayerCollection, layer: &Layer) {
        let Some(from) = inner.node_index(layer) else {
            return;
        };
        let Some(index) = collection.index_of(layer) else {
            return;
        };
        let items = collection.to_vec();
        let remaining = inner.nodes.borrow().len() - 1;
        let to = subset::subset_index(&items, index, remaining, |l| {
            !l.same(layer) && inner.has_node(l)
        });
        let mut nodes = inner.nodes.borrow_mut();
        let node = nodes.remove(from);
        nodes.insert(to, node);
    }

    /// Current nodes, top to bottom.
    #[must_use]
    pub fn nodes(&self) -> Vec<TreeNode> {
        self.inner.nodes.borrow().clone()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.nodes.borrow().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.nodes.borrow().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use geosync_core::LayerKind;

    fn titles(loader: &TreeLoader) -> Vec<String> {
        loader.nodes().into_iter().map(|n| n.title).collect()
    }

    #[test]
    fn load_builds_nodes_in_collection_order() {
        let collection = LayerCollection::new();
        for name in ["a", "b", "c"] {
            collection.push(&Layer::raster(name));
        }
        let loader = TreeLoader::all_layers();
        loader.load(&collection);
        assert_eq!(titles(&loader), vec!["a", "b", "c"]);
    }

    #[test]
    fn filtered_loader_skips_rejected_kinds() {
        let collection = LayerCollection::new();
        collection.push(&Layer::raster("base"));
        collection.push(&Layer::group("overlays"));
        let loader = TreeLoader::new(|l| l.kind() != LayerKind::Group);
        loader.load(&collection);
        assert_eq!(titles(&loader), vec!["base"]);

        collection.push(&Layer::group("more"));
        collection.push(&Layer::vector("roads"));
        assert_eq!(titles(&loader), vec!["base", "roads"]);
    }

    #[test]
    fn insertion_index_clamps_stale_events() {
        let collection = LayerCollection::new();
        collection.push(&Layer::raster("a"));
        let loader = TreeLoader::all_layers();
        loader.load(&collection);

        // An index far beyond the tracked subset still lands in bounds.
        let items = collection.to_vec();
        assert_eq!(loader.insertion_index(&items, 99), 1);
    }

    #[test]
    fn reorder_repositions_node() {
        let collection = LayerCollection::new();
        let c = Layer::raster("c");
        collection.push(&Layer::raster("a"));
        collection.push(&Layer::raster("b"));
        collection.push(&c);
        let loader = TreeLoader::all_layers();
        loader.load(&collection);

        collection.move_to(&c, 0);
        assert_eq!(titles(&loader), vec!["c", "a", "b"]);
    }

    #[test]
    fn removal_drops_node() {
        let collection = LayerCollection::new();
        let a = Layer::raster("a");
        collection.push(&a);
        collection.push(&Layer::raster("b"));
        let loader = TreeLoader::all_layers();
        loader.load(&collection);

        collection.remove(&a);
        assert_eq!(titles(&loader), vec!["b"]);
    }

    #[test]
    fn rename_updates_node_title() {
        let collection = LayerCollection::new();
        let layer = Layer::raster("old");
        collection.push(&layer);
        let loader = TreeLoader::all_layers();
        loader.load(&collection);

        layer.set_name("new");
        assert_eq!(titles(&loader), vec!["new"]);
    }

    #[test]
    fn unload_stops_following() {
        let collection = LayerCollection::new();
        let loader = TreeLoader::all_layers();
        loader.load(&collection);
        loader.unload();

        collection.push(&Layer::raster("a"));
        assert!(loader.is_empty());
    }
}
