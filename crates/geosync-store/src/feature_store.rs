//! Feature synchronizer: records mirror a vector layer's feature set.
//!
//! [`FeatureStore`] binds to the feature collection of a vector [`Layer`].
//! Unlike layers, features carry arbitrary attributes, so records are built
//! from a snapshot of the feature's attribute map rather than a schema, and
//! the feature's edit state (`Inserted` / `Updated`) maps onto record
//! dirtiness.
//!
//! An optional admission filter decides which engine-side features get
//! records. It is evaluated once, when the feature enters the collection (or
//! at bind time for pre-existing members); later attribute changes never
//! evict an admitted record. Attribute updates from the engine merge into the
//! record's fields and emit one `Updated { Fields }`, never a membership or
//! position change.

use std::cell::RefCell;
use std::rc::Rc;

use geosync_core::{Feature, FeatureCollection, FeatureCollectionEvent, Layer, Subscription, Value};
use tracing::{debug, trace};

use crate::binding::{BindingCore, SyncDirection};
use crate::record::{Record, RecordState};
use crate::store::{RecordStore, StoreEvent, StoreSnapshot};
use crate::subset;

type Filter = Rc<dyn Fn(&Feature) -> bool>;

/// Options accepted by [`FeatureStore::bind`].
#[derive(Clone, Default)]
pub struct FeatureBindOptions {
    pub direction: SyncDirection,
    /// Admission predicate for engine-side features. `None` admits all.
    pub filter: Option<Filter>,
}

impl FeatureBindOptions {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_direction(mut self, direction: SyncDirection) -> Self {
        self.direction = direction;
        self
    }

    #[must_use]
    pub fn with_filter(mut self, filter: impl Fn(&Feature) -> bool + 'static) -> Self {
        self.filter = Some(Rc::new(filter));
        self
    }
}

impl std::fmt::Debug for FeatureBindOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FeatureBindOptions")
            .field("direction", &self.direction)
            .field("filtered", &self.filter.is_some())
            .finish()
    }
}

struct FeatureStoreInner {
    store: RecordStore<Feature>,
    binding: BindingCore,
    collection: RefCell<Option<FeatureCollection>>,
    filter: RefCell<Option<Filter>>,
}

impl FeatureStoreInner {
    fn admits(&self, feature: &Feature) -> bool {
        self.filter.borrow().as_ref().is_none_or(|f| f(feature))
    }
}

/// Record store synchronized with a vector layer's feature collection.
///
/// Clones share the same store.
#[derive(Clone)]
pub struct FeatureStore {
    inner: Rc<FeatureStoreInner>,
}

impl Default for FeatureStore {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for FeatureStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FeatureStore")
            .field("len", &self.len())
            .field("bound", &self.is_bound())
            .finish()
    }
}

impl FeatureStore {
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Rc::new(FeatureStoreInner {
                store: RecordStore::new(),
                binding: BindingCore::new(),
                collection: RefCell::new(None),
                filter: RefCell::new(None),
            }),
        }
    }

    // ── Binding ─────────────────────────────────────────────────────

    /// Bind to `layer`'s feature collection. Returns `false` when the layer
    /// has no feature collection or the store is already bound.
    pub fn bind(&self, layer: &Layer, options: FeatureBindOptions) -> bool {
        let Some(collection) = layer.features() else {
            debug!(layer = %layer.name(), "feature store bind refused: no feature collection");
            return false;
        };
        if !self.inner.binding.begin_bind(options.direction) {
            return false;
        }
        *self.inner.collection.borrow_mut() = Some(collection.clone());
        *self.inner.filter.borrow_mut() = options.filter;
        debug!(layer = %layer.name(), direction = ?options.direction, "feature store binding");
        Self::reconcile(&self.inner, collection);
        true
    }

    /// Drop all listeners and the collection reference. No-op when unbound.
    /// The store keeps its records.
    pub fn unbind(&self) {
        if !self.inner.binding.end_bind() {
            return;
        }
        *self.inner.collection.borrow_mut() = None;
        *self.inner.filter.borrow_mut() = None;
        debug!("feature store unbound");
    }

    #[must_use]
    pub fn is_bound(&self) -> bool {
        self.inner.binding.is_bound()
    }

    fn reconcile(inner: &Rc<FeatureStoreInner>, collection: &FeatureCollection) {
        // Snapshot before any listener exists, so the replay below cannot
        // re-trigger itself.
        let snapshot = collection.to_vec();
        let direction = inner.binding.direction();

        if direction.contains(SyncDirection::STORE_TO_COLLECTION) {
            let _scope = inner.binding.guard.enter();
            for record in inner.store.records() {
                collection.push(record.entity());
            }
        }

        if direction.contains(SyncDirection::COLLECTION_TO_STORE) {
            let _scope = inner.binding.guard.enter();
            let mut loaded = 0usize;
            for feature in &snapshot {
                if inner.store.contains_entity(feature) || !inner.admits(feature) {
                    continue;
                }
                inner.store.push(Self::make_record(feature));
                loaded += 1;
            }
            inner.store.notify_loaded(loaded);
            Self::install_listener(inner, collection);
        }

        debug!(records = inner.store.len(), "feature store bound");
        inner.store.notify_bound();
    }

    fn install_listener(inner: &Rc<FeatureStoreInner>, collection: &FeatureCollection) {
        let weak = Rc::downgrade(inner);
        let watched = collection.clone();
        let sub = collection.on_event(move |event| {
            let Some(inner) = weak.upgrade() else {
                return;
            };
            match event {
                FeatureCollectionEvent::Added { feature, index } => {
                    Self::on_feature_added(&inner, &watched, feature, *index);
                }
                FeatureCollectionEvent::Removed { feature, .. } => {
                    Self::on_feature_removed(&inner, feature);
                }
                FeatureCollectionEvent::Updated { feature, fields } => {
                    Self::on_feature_updated(&inner, feature, fields);
                }
            }
        });
        inner.binding.hold(sub);
    }

    fn make_record(feature: &Feature) -> Rc<Record<Feature>> {
        Rc::new(Record::with_attributes(
            feature.clone(),
            feature.attributes(),
            RecordState::from(feature.state()),
        ))
    }

    // ── Collection-to-store handlers ────────────────────────────────

    fn on_feature_added(
        inner: &Rc<FeatureStoreInner>,
        collection: &FeatureCollection,
        feature: &Feature,
        index: usize,
    ) {
        if inner.binding.guard.suppressed() {
            trace!(fid = ?feature.fid(), "echo discarded: added");
            return;
        }
        // Admission is decided here, once. A record created now stays until
        // the feature itself is removed.
        if !inner.admits(feature) {
            trace!(fid = ?feature.fid(), "feature not admitted");
            return;
        }
        let _scope = inner.binding.guard.enter();
        if inner.store.contains_entity(feature) {
            return;
        }
        let items = collection.to_vec();
        let position = subset::subset_index(&items, index, inner.store.len(), |f| {
            inner.store.contains_entity(f)
        });
        inner.store.insert(position, Self::make_record(feature));
    }

    fn on_feature_removed(inner: &Rc<FeatureStoreInner>, feature: &Feature) {
        if inner.binding.guard.suppressed() {
            trace!(fid = ?feature.fid(), "echo discarded: removed");
            return;
        }
        let _scope = inner.binding.guard.enter();
        if let Some(record) = inner.store.get_by_entity(feature) {
            inner.store.remove(&record);
        }
    }

    fn on_feature_updated(inner: &Rc<FeatureStoreInner>, feature: &Feature, fields: &[String]) {
        if inner.binding.guard.suppressed() {
            trace!(fid = ?feature.fid(), "echo discarded: updated");
            return;
        }
        let _scope = inner.binding.guard.enter();
        let Some(record) = inner.store.get_by_entity(feature) else {
            return;
        };
        let pairs: Vec<(String, Value)> = fields
            .iter()
            .filter_map(|name| feature.get(name).map(|value| (name.clone(), value)))
            .collect();
        inner.store.set_record_state(&record, RecordState::from(feature.state()));
        inner.store.merge_fields(&record, pairs);
    }

    // ── Store-side operations (mediated) ────────────────────────────

    /// Record the given features and mirror them into the collection when
    /// the binding propagates store-to-collection. Features already recorded
    /// are skipped. Returns the new records.
    pub fn add_features(
        &self,
        features: impl IntoIterator<Item = Feature>,
    ) -> Vec<Rc<Record<Feature>>> {
        let mut added = Vec::new();
        for feature in features {
            if self.inner.store.contains_entity(&feature) {
                continue;
            }
            added.push(self.push_new(&feature));
        }
        added
    }

    /// Record a single feature. Returns the existing record when one
    /// already wraps this feature.
    pub fn add_feature(&self, feature: &Feature) -> Rc<Record<Feature>> {
        match self.get_by_feature(feature) {
            Some(existing) => existing,
            None => self.push_new(feature),
        }
    }

    fn push_new(&self, feature: &Feature) -> Rc<Record<Feature>> {
        let record = Self::make_record(feature);
        self.inner.store.push(Rc::clone(&record));
        if self.inner.binding.propagates(SyncDirection::STORE_TO_COLLECTION) {
            if let Some(collection) = self.collection() {
                let _scope = self.inner.binding.guard.enter();
                collection.push(feature);
            }
        }
        record
    }

    /// Remove the records for the given features, mirroring each removal
    /// into the collection. Unrecorded features are skipped.
    pub fn remove_features(&self, features: impl IntoIterator<Item = Feature>) {
        for feature in features {
            let Some(record) = self.inner.store.get_by_entity(&feature) else {
                continue;
            };
            self.inner.store.remove(&record);
            if self.inner.binding.propagates(SyncDirection::STORE_TO_COLLECTION) {
                if let Some(collection) = self.collection() {
                    let _scope = self.inner.binding.guard.enter();
                    collection.remove(&feature);
                }
            }
        }
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

    /// Write one attribute. The value is written through to the live
    /// feature (when the binding propagates store-to-collection) and the
    /// record updated with one `Updated { Fields }`, plus one
    /// `Updated { State }` when the edit promotes a clean record.
    pub fn set_field(&self, record: &Rc<Record<Feature>>, field: impl Into<String>, value: Value) {
        let field = field.into();
        let propagated = self.inner.binding.propagates(SyncDirection::STORE_TO_COLLECTION);
        if propagated {
            let _scope = self.inner.binding.guard.enter();
            record.entity().set(field.clone(), value.clone());
        }
        self.inner.store.set_field(record, field, value);
        let state = if propagated {
            RecordState::from(record.entity().state())
        } else if record.state() == RecordState::Unchanged {
            RecordState::Updated
        } else {
            record.state()
        };
        self.inner.store.set_record_state(record, state);
    }

    /// Mark a record (and its feature) persisted. Emits one
    /// `Updated { State }` when the state actually changes.
    pub fn mark_saved(&self, record: &Rc<Record<Feature>>) {
        record.entity().mark_saved();
        self.inner.store.set_record_state(record, RecordState::Unchanged);
    }

    /// Records whose features carry unpersisted edits, in store order.
    #[must_use]
    pub fn dirty_records(&self) -> Vec<Rc<Record<Feature>>> {
        self.inner
            .store
            .records()
            .into_iter()
            .filter(|r| r.is_dirty())
            .collect()
    }

    // ── Read access ─────────────────────────────────────────────────

    /// The record wrapping `feature`, or `None`.
    #[must_use]
    pub fn get_by_feature(&self, feature: &Feature) -> Option<Rc<Record<Feature>>> {
        self.inner.store.get_by_entity(feature)
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
    pub fn get(&self, index: usize) -> Option<Rc<Record<Feature>>> {
        self.inner.store.get(index)
    }

    /// Snapshot of the records, in order.
    #[must_use]
    pub fn records(&self) -> Vec<Rc<Record<Feature>>> {
        self.inner.store.records()
    }

    /// Subscribe to the store's event stream.
    #[must_use]
    pub fn on_event(&self, callback: impl Fn(&StoreEvent<Feature>) + 'static) -> Subscription {
        self.inner.store.on_event(callback)
    }

    /// Read-only snapshot of the named fields, for the print/export
    /// boundary.
    #[must_use]
    pub fn snapshot(&self, fields: &[&str]) -> StoreSnapshot {
        self.inner.store.snapshot(fields)
    }

    fn collection(&self) -> Option<FeatureCollection> {
        self.inner.collection.borrow().clone()
    }
}
