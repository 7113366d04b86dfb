//! Layer synchronizer: one record per map layer, order mirrored both ways.
//!
//! [`LayerStore`] mediates between its ordered [`RecordStore`] and a
//! [`Map`]'s live layer collection. Structural changes made through the
//! store's methods are applied to the store and mirrored into the collection
//! under the origin guard; engine-side changes arrive through one collection
//! listener and are replayed store-ward the same way. Each external mutation
//! produces exactly one mutation on the opposite side.
//!
//! Sub-property changes come in as a single generic `Changed { property }`
//! per layer: an `Order` change runs the reorder path (remove before
//! reinsert, one `Moved` update on the store); name/opacity/visibility
//! changes refresh the record's projected fields and emit one
//! `Updated { Fields }` so observers never need a full reload.
//!
//! Binding an unpositioned map defers the initial reconciliation to the
//! map's one-shot ready signal; it then runs exactly once, unless the store
//! was unbound (or rebound) in the meantime.

use std::cell::RefCell;
use std::rc::Rc;

use geosync_core::{CollectionEvent, Layer, LayerCollection, LayerProperty, Map, Subscription, Value};
use tracing::{debug, trace};

use crate::binding::{BindOptions, BindingCore, SyncDirection};
use crate::record::{FieldWriteError, Record, RecordSchema};
use crate::store::{RecordStore, StoreEvent, StoreSnapshot};
use crate::subset;

struct LayerStoreInner {
    store: RecordStore<Layer>,
    schema: RecordSchema<Layer>,
    binding: BindingCore,
    map: RefCell<Option<Map>>,
}

/// Record store synchronized with a map's layer collection.
///
/// Clones share the same store.
#[derive(Clone)]
pub struct LayerStore {
    inner: Rc<LayerStoreInner>,
}

impl Default for LayerStore {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for LayerStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LayerStore")
            .field("len", &self.len())
            .field("bound", &self.is_bound())
            .finish()
    }
}

impl LayerStore {
    /// Create an unbound store with the default field projection
    /// (`title`, `visible`, `opacity`, all read/write).
    #[must_use]
    pub fn new() -> Self {
        Self::with_schema(Self::default_schema())
    }

    /// Create an unbound store with a custom field projection.
    #[must_use]
    pub fn with_schema(schema: RecordSchema<Layer>) -> Self {
        Self {
            inner: Rc::new(LayerStoreInner {
                store: RecordStore::new(),
                schema,
                binding: BindingCore::new(),
                map: RefCell::new(None),
            }),
        }
    }

    fn default_schema() -> RecordSchema<Layer> {
        RecordSchema::new()
            .field_rw(
                "title",
                |l: &Layer| Value::from(l.name()),
                |l, v| {
                    if let Some(s) = v.as_str() {
                        l.set_name(s);
                    }
                },
            )
            .field_rw(
                "visible",
                |l| Value::from(l.visible()),
                |l, v| {
                    if let Some(b) = v.as_bool() {
                        l.set_visible(b);
                    }
                },
            )
            .field_rw(
                "opacity",
                |l| Value::from(l.opacity()),
                |l, v| {
                    if let Some(o) = v.as_float() {
                        l.set_opacity(o);
                    }
                },
            )
    }

    // ── Binding ─────────────────────────────────────────────────────

    /// Bind to `map`'s layer collection. No-op when already bound.
    ///
    /// If the map is positioned, the initial reconciliation runs now;
    /// otherwise it waits for the map's one-shot ready signal. Either way it
    /// runs exactly once per bind, and a `Bound` event fires on completion.
    pub fn bind(&self, map: &Map, options: BindOptions) {
        if !self.inner.binding.begin_bind(options.direction) {
            return;
        }
        *self.inner.map.borrow_mut() = Some(map.clone());
        let deferred = !map.is_positioned();
        debug!(direction = ?options.direction, deferred, "layer store binding");
        if !deferred {
            Self::reconcile(&self.inner, map);
            return;
        }
        let weak = Rc::downgrade(&self.inner);
        let generation = self.inner.binding.bind_generation();
        map.on_ready(move || {
            let Some(inner) = weak.upgrade() else {
                return;
            };
            if !inner.binding.is_current(generation) {
                trace!("deferred reconciliation dropped: binding superseded");
                return;
            }
            let map = inner.map.borrow().clone();
            let Some(map) = map else {
                return;
            };
            Self::reconcile(&inner, &map);
        });
    }

    /// Drop all listeners and the map reference. No-op when unbound.
    /// The store keeps its records.
    pub fn unbind(&self) {
        if !self.inner.binding.end_bind() {
            return;
        }
        *self.inner.map.borrow_mut() = None;
        debug!("layer store unbound");
    }

    #[must_use]
    pub fn is_bound(&self) -> bool {
        self.inner.binding.is_bound()
    }

    /// One-time initial reconciliation, then listener registration.
    fn reconcile(inner: &Rc<LayerStoreInner>, map: &Map) {
        let collection = map.layers();
        // Snapshot before any listener exists, so the replay below cannot
        // re-trigger itself.
        let snapshot = collection.to_vec();
        let direction = inner.binding.direction();

        if direction.contains(SyncDirection::STORE_TO_COLLECTION) {
            let _scope = inner.binding.guard.enter();
            // Earlier records first: positions already placed stay stable.
            for (position, record) in inner.store.records().iter().enumerate() {
                if !collection.contains(record.entity()) {
                    collection.insert(position, record.entity());
                }
            }
        }

        if direction.contains(SyncDirection::COLLECTION_TO_STORE) {
            let _scope = inner.binding.guard.enter();
            let mut loaded = 0usize;
            for layer in &snapshot {
                if inner.store.contains_entity(layer) {
                    continue;
                }
                let record = Rc::new(Record::read_from(&inner.schema, layer.clone()));
                inner.store.push(record);
                loaded += 1;
            }
            inner.store.notify_loaded(loaded);
            Self::install_listener(inner, collection);
        }

        debug!(records = inner.store.len(), "layer store bound");
        inner.store.notify_bound();
    }

    fn install_listener(inner: &Rc<LayerStoreInner>, collection: &LayerCollection) {
        let weak = Rc::downgrade(inner);
        let watched = collection.clone();
        let sub = collection.on_event(move |event| {
            // The store may be gone while the engine still dispatches.
            let Some(inner) = weak.upgrade() else {
                return;
            };
            match event {
                CollectionEvent::Added { layer, index } => {
                    Self::on_layer_added(&inner, &watched, layer, *index);
                }
                CollectionEvent::Removed { layer, .. } => {
                    Self::on_layer_removed(&inner, layer);
                }
                CollectionEvent::Changed { layer, property } => {
                    Self::on_layer_changed(&inner, &watched, layer, *property);
                }
            }
        });
        inner.binding.hold(sub);
    }

    // ── Collection-to-store handlers ────────────────────────────────

    fn on_layer_added(
        inner: &Rc<LayerStoreInner>,
        collection: &LayerCollection,
        layer: &Layer,
        index: usize,
    ) {
        if inner.binding.guard.suppressed() {
            trace!(layer = %layer.name(), "echo discarded: added");
            return;
        }
        let _scope = inner.binding.guard.enter();
        if inner.store.contains_entity(layer) {
            return;
        }
        let items = collection.to_vec();
        let position = subset::subset_index(&items, index, inner.store.len(), |l| {
            inner.store.contains_entity(l)
        });
        let record = Rc::new(Record::read_from(&inner.schema, layer.clone()));
        inner.store.insert(position, record);
    }

    fn on_layer_removed(inner: &Rc<LayerStoreInner>, layer: &Layer) {
        if inner.binding.guard.suppressed() {
            trace!(layer = %layer.name(), "echo discarded: removed");
            return;
        }
        let _scope = inner.binding.guard.enter();
        if let Some(record) = inner.store.get_by_entity(layer) {
            inner.store.remove(&record);
        }
    }

    fn on_layer_changed(
        inner: &Rc<LayerStoreInner>,
        collection: &LayerCollection,
        layer: &Layer,
        property: LayerProperty,
    ) {
        if inner.binding.guard.suppressed() {
            trace!(layer = %layer.name(), ?property, "echo discarded: changed");
            return;
        }
        let _scope = inner.binding.guard.enter();
        let Some(record) = inner.store.get_by_entity(layer) else {
            return;
        };
        match property {
            LayerProperty::Order => {
                let Some(from) = inner.store.index_of(&record) else {
                    return;
                };
                let Some(engine_index) = collection.index_of(layer) else {
                    return;
                };
                let items = collection.to_vec();
                // Remove before reinsert: the target is computed against the
                // store without the moving record.
                let to = subset::subset_index(&items, engine_index, inner.store.len() - 1, |l| {
                    !l.same(layer) && inner.store.contains_entity(l)
                });
                inner.store.move_record(from, to);
            }
            LayerProperty::Name | LayerProperty::Opacity | LayerProperty::Visibility => {
                let changed = record.refresh(&inner.schema);
                if !changed.is_empty() {
                    inner.store.notify_fields_changed(&record, changed);
                }
            }
        }
    }

    // ── Store-side operations (mediated) ────────────────────────────

    /// Append records, mirroring each into the collection when the binding
    /// propagates store-to-collection.
    pub fn add(&self, records: impl IntoIterator<Item = Rc<Record<Layer>>>) {
        for record in records {
            let index = self.inner.store.len();
            self.insert(index, record);
        }
    }

    /// Wrap `layer` in a record and append it. Returns the existing record
    /// when one already wraps this layer.
    pub fn add_layer(&self, layer: &Layer) -> Rc<Record<Layer>> {
        if let Some(existing) = self.get_by_layer(layer) {
            return existing;
        }
        let record = Rc::new(Record::read_from(&self.inner.schema, layer.clone()));
        self.add([Rc::clone(&record)]);
        record
    }

    /// Insert a record at `index`. No-op if a record for the same layer
    /// already exists (one record per entity).
    pub fn insert(&self, index: usize, record: Rc<Record<Layer>>) {
        if self.inner.store.contains_entity(record.entity()) {
            return;
        }
        let index = self.inner.store.insert(index, Rc::clone(&record));
        if !self.inner.binding.propagates(SyncDirection::STORE_TO_COLLECTION) {
            return;
        }
        let Some(collection) = self.collection() else {
            return;
        };
        let _scope = self.inner.binding.guard.enter();
        if !collection.contains(record.entity()) {
            let items = collection.to_vec();
            // The collection position of the managed member now following
            // the new record; append when there is none.
            let target = subset::full_index(&items, index, |l| self.inner.store.contains_entity(l))
                .unwrap_or(items.len());
            collection.insert(target, record.entity());
        }
    }

    /// Remove `record`, mirroring the removal into the collection. Returns
    /// `false` when the record is not in this store.
    pub fn remove(&self, record: &Rc<Record<Layer>>) -> bool {
        if self.inner.store.remove(record).is_none() {
            return false;
        }
        if self.inner.binding.propagates(SyncDirection::STORE_TO_COLLECTION) {
            if let Some(collection) = self.collection() {
                let _scope = self.inner.binding.guard.enter();
                collection.remove(record.entity());
            }
        }
        true
    }

    /// Replace the record at `index`. The displaced record's layer leaves
    /// the collection exactly once; the new record's layer takes its place.
    pub fn replace(&self, index: usize, record: Rc<Record<Layer>>) -> Option<Rc<Record<Layer>>> {
        let old = self.inner.store.replace(index, Rc::clone(&record))?;
        if self.inner.binding.propagates(SyncDirection::STORE_TO_COLLECTION) {
            if let Some(collection) = self.collection() {
                let _scope = self.inner.binding.guard.enter();
                let vacated = collection.remove(old.entity());
                if !collection.contains(record.entity()) {
                    let target = vacated.unwrap_or(collection.len());
                    collection.insert(target, record.entity());
                }
            }
        }
        Some(old)
    }

    /// Remove every record, mirroring the removals into the collection.
    pub fn clear(&self) {
        let records = self.inner.store.records();
        self.inner.store.clear();
        if records.is_empty() {
            return;
        }
        if self.inner.binding.propagates(SyncDirection::STORE_TO_COLLECTION) {
            if let Some(collection) = self.collection() {
                let _scope = self.inner.binding.guard.enter();
                for record in &records {
                    collection.remove(record.entity());
                }
            }
        }
    }

    /// Write one projected field. The value is written through to the live
    /// layer (when the binding propagates store-to-collection) and the
    /// record updated, emitting one `Updated { Fields }`.
    pub fn set_field(
        &self,
        record: &Rc<Record<Layer>>,
        field: &str,
        value: Value,
    ) -> Result<(), FieldWriteError> {
        let binding = self
            .inner
            .schema
            .binding(field)
            .ok_or_else(|| FieldWriteError::UnknownField(field.to_owned()))?;
        let write = binding
            .write
            .ok_or_else(|| FieldWriteError::ReadOnly(field.to_owned()))?;
        if self.inner.binding.propagates(SyncDirection::STORE_TO_COLLECTION) {
            let _scope = self.inner.binding.guard.enter();
            write(record.entity(), &value);
        }
        self.inner.store.set_field(record, field, value);
        Ok(())
    }

    // ── Read access ─────────────────────────────────────────────────

    /// The record wrapping `layer`, or `None`.
    #[must_use]
    pub fn get_by_layer(&self, layer: &Layer) -> Option<Rc<Record<Layer>>> {
        self.inner.store.get_by_entity(layer)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.store.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.store.is_empty()
    }

    #[must_use]
    pub fn get(&self, index: usize) -> Option<Rc<Record<Layer>>> {
        self.inner.store.get(index)
    }

    #[must_use]
    pub fn index_of(&self, record: &Rc<Record<Layer>>) -> Option<usize> {
        self.inner.store.index_of(record)
    }

    /// Snapshot of the records, in order.
    #[must_use]
    pub fn records(&self) -> Vec<Rc<Record<Layer>>> {
        self.inner.store.records()
    }

    /// Subscribe to the store's event stream.
    #[must_use]
    pub fn on_event(&self, callback: impl Fn(&StoreEvent<Layer>) + 'static) -> Subscription {
        self.inner.store.on_event(callback)
    }

    /// Read-only snapshot of all schema fields, for the print/export
    /// boundary.
    #[must_use]
    pub fn snapshot(&self) -> StoreSnapshot {
        self.inner.store.snapshot(&self.inner.schema.names())
    }

    fn collection(&self) -> Option<LayerCollection> {
        self.inner.map.borrow().as_ref().map(|m| m.layers().clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use geosync_core::Extent;

    fn positioned_map() -> Map {
        let map = Map::new();
        map.set_extent(Extent::new(0.0, 0.0, 100.0, 100.0));
        map
    }

    #[test]
    fn bind_loads_existing_layers_in_order() {
        let map = positioned_map();
        for name in ["a", "b", "c"] {
            map.layers().push(&Layer::raster(name));
        }
        let store = LayerStore::new();
        store.bind(&map, BindOptions::default());

        let titles: Vec<_> = store
            .records()
            .iter()
            .map(|r| r.get("title").unwrap())
            .collect();
        assert_eq!(
            titles,
            vec![Value::from("a"), Value::from("b"), Value::from("c")]
        );
    }

    #[test]
    fn bind_defers_until_map_ready() {
        let map = Map::new();
        map.layers().push(&Layer::raster("a"));
        let store = LayerStore::new();
        store.bind(&map, BindOptions::default());
        assert!(store.is_bound());
        assert!(store.is_empty(), "reconciliation must wait for readiness");

        map.set_extent(Extent::new(0.0, 0.0, 1.0, 1.0));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn deferred_reconciliation_dropped_after_unbind() {
        let map = Map::new();
        map.layers().push(&Layer::raster("a"));
        let store = LayerStore::new();
        store.bind(&map, BindOptions::default());
        store.unbind();

        map.set_extent(Extent::new(0.0, 0.0, 1.0, 1.0));
        assert!(store.is_empty());
    }

    #[test]
    fn bind_replays_records_into_collection() {
        let map = positioned_map();
        map.layers().push(&Layer::raster("existing"));
        let store = LayerStore::new();
        let mine = Layer::raster("mine");
        let record = Rc::new(Record::read_from(
            &LayerStore::default_schema(),
            mine.clone(),
        ));
        store.add([record]);

        store.bind(&map, BindOptions::default());
        assert_eq!(map.layers().index_of(&mine), Some(0));
        assert_eq!(store.len(), 2, "existing layer loaded after replay");
        assert_eq!(
            store.get(1).unwrap().get("title"),
            Some(Value::from("existing"))
        );
    }

    #[test]
    fn set_field_writes_through_to_layer() {
        let map = positioned_map();
        let layer = Layer::raster("a");
        map.layers().push(&layer);
        let store = LayerStore::new();
        store.bind(&map, BindOptions::default());

        let record = store.get_by_layer(&layer).unwrap();
        store
            .set_field(&record, "opacity", Value::from(0.4))
            .unwrap();
        assert_eq!(layer.opacity(), 0.4);
        assert_eq!(record.get("opacity"), Some(Value::from(0.4)));
    }

    #[test]
    fn set_field_rejects_unknown_field() {
        let store = LayerStore::new();
        let record = store.add_layer(&Layer::raster("a"));
        assert_eq!(
            store.set_field(&record, "nope", Value::from(1i64)),
            Err(FieldWriteError::UnknownField("nope".into()))
        );
    }

    #[test]
    fn set_field_does_not_touch_layer_without_store_to_collection() {
        let map = positioned_map();
        let layer = Layer::raster("a");
        map.layers().push(&layer);
        let store = LayerStore::new();
        store.bind(
            &map,
            BindOptions::new().with_direction(SyncDirection::COLLECTION_TO_STORE),
        );

        let record = store.get_by_layer(&layer).unwrap();
        store
            .set_field(&record, "visible", Value::from(false))
            .unwrap();
        assert!(layer.visible(), "write must stay store-local");
        assert_eq!(record.get("visible"), Some(Value::from(false)));
    }

    #[test]
    fn engine_property_change_refreshes_record() {
        let map = positioned_map();
        let layer = Layer::raster("a");
        map.layers().push(&layer);
        let store = LayerStore::new();
        store.bind(&map, BindOptions::default());

        layer.set_visible(false);
        let record = store.get_by_layer(&layer).unwrap();
        assert_eq!(record.get("visible"), Some(Value::from(false)));
    }

    #[test]
    fn replace_removes_displaced_layer_once() {
        let map = positioned_map();
        let old_layer = Layer::raster("old");
        map.layers().push(&old_layer);
        let store = LayerStore::new();
        store.bind(&map, BindOptions::default());

        let new_layer = Layer::raster("new");
        let replacement = Rc::new(Record::read_from(
            &LayerStore::default_schema(),
            new_layer.clone(),
        ));
        let displaced = store.replace(0, replacement).unwrap();
        assert!(displaced.entity().same(&old_layer));
        assert!(!map.layers().contains(&old_layer));
        assert_eq!(map.layers().index_of(&new_layer), Some(0));
    }

    #[test]
    fn clear_empties_both_sides() {
        let map = positioned_map();
        for name in ["a", "b"] {
            map.layers().push(&Layer::raster(name));
        }
        let store = LayerStore::new();
        store.bind(&map, BindOptions::default());

        store.clear();
        assert!(store.is_empty());
        assert!(map.layers().is_empty());
    }

    #[test]
    fn snapshot_reflects_schema_order() {
        let store = LayerStore::new();
        store.add_layer(&Layer::raster("a"));
        let snapshot = store.snapshot();
        assert_eq!(snapshot.fields, vec!["title", "visible", "opacity"]);
        assert_eq!(snapshot.rows.len(), 1);
    }

    #[test]
    fn unbound_store_mutates_locally_only() {
        let store = LayerStore::new();
        let record = store.add_layer(&Layer::raster("a"));
        assert_eq!(store.len(), 1);
        assert!(store.remove(&record));
        assert!(store.is_empty());
    }
}
