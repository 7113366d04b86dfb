//! The ordered record container and its event stream.
//!
//! [`RecordStore`] is the UI-facing side of a binding: an ordered sequence of
//! [`Record`]s with one event per structural mutation and a generic update
//! event for in-place changes. Reorders are an explicit index move emitting a
//! single `Updated { change: Moved }` — never a remove/add pair — so
//! observers doing incremental refresh see exactly one event per external
//! mutation.
//!
//! While a store is bound, structural mutation is the owning synchronizer's
//! job; widgets subscribe and read. Mutating both the store and the live
//! collection independently violates the binding's guard invariant.

use std::cell::RefCell;
use std::rc::Rc;

use geosync_core::{Dispatcher, Subscription, Value};
use tracing::trace;

use crate::record::{EntityHandle, Record};

/// What changed in an `Updated` event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordChange {
    /// The record moved from `from` to the event's `index`.
    Moved { from: usize },
    /// The named attribute values changed; position did not.
    Fields(Vec<String>),
    /// The persistence lifecycle state changed.
    State,
}

/// Store event stream: one event per mutation, fired synchronously after the
/// mutation is applied.
#[derive(Debug, Clone)]
pub enum StoreEvent<E: EntityHandle> {
    /// A binding to a live collection completed.
    Bound,
    /// Initial reconciliation loaded `count` records.
    Loaded { count: usize },
    Added {
        record: Rc<Record<E>>,
        index: usize,
    },
    Removed {
        record: Rc<Record<E>>,
        index: usize,
    },
    Updated {
        record: Rc<Record<E>>,
        index: usize,
        change: RecordChange,
    },
    Cleared,
}

/// Ordered sequence of records with synchronous event dispatch.
pub struct RecordStore<E: EntityHandle> {
    records: RefCell<Vec<Rc<Record<E>>>>,
    events: Dispatcher<StoreEvent<E>>,
}

impl<E: EntityHandle> Default for RecordStore<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E: EntityHandle> std::fmt::Debug for RecordStore<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecordStore")
            .field("len", &self.len())
            .finish()
    }
}

impl<E: EntityHandle> RecordStore<E> {
    #[must_use]
    pub fn new() -> Self {
        Self {
            records: RefCell::new(Vec::new()),
            events: Dispatcher::new(),
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.records.borrow().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.borrow().is_empty()
    }

    #[must_use]
    pub fn get(&self, index: usize) -> Option<Rc<Record<E>>> {
        self.records.borrow().get(index).cloned()
    }

    /// Position of `record` (pointer identity).
    #[must_use]
    pub fn index_of(&self, record: &Rc<Record<E>>) -> Option<usize> {
        self.records
            .borrow()
            .iter()
            .position(|r| Rc::ptr_eq(r, record))
    }

    /// The record wrapping `entity`, or `None`. Lookup misses are not
    /// errors.
    #[must_use]
    pub fn get_by_entity(&self, entity: &E) -> Option<Rc<Record<E>>> {
        self.records
            .borrow()
            .iter()
            .find(|r| r.entity().same(entity))
            .cloned()
    }

    /// Whether any record wraps `entity`.
    #[must_use]
    pub fn contains_entity(&self, entity: &E) -> bool {
        self.records
            .borrow()
            .iter()
            .any(|r| r.entity().same(entity))
    }

    /// Snapshot of the records, in order.
    #[must_use]
    pub fn records(&self) -> Vec<Rc<Record<E>>> {
        self.records.borrow().clone()
    }

    /// Append `record`, returning its index.
    pub fn push(&self, record: Rc<Record<E>>) -> usize {
        let index = self.len();
        self.insert(index, record)
    }

    /// Insert `record` at `index` (clamped), returning the actual index.
    pub fn insert(&self, index: usize, record: Rc<Record<E>>) -> usize {
        let index = {
            let mut records = self.records.borrow_mut();
            let index = index.min(records.len());
            records.insert(index, Rc::clone(&record));
            index
        };
        self.events.notify(&StoreEvent::Added { record, index });
        index
    }

    /// Remove `record` (pointer identity), returning its former index.
    pub fn remove(&self, record: &Rc<Record<E>>) -> Option<usize> {
        let index = {
            let mut records = self.records.borrow_mut();
            let index = records.iter().position(|r| Rc::ptr_eq(r, record))?;
            records.remove(index);
            index
        };
        self.events.notify(&StoreEvent::Removed {
            record: Rc::clone(record),
            index,
        });
        Some(index)
    }

    /// Remove the record at `index`.
    pub fn remove_at(&self, index: usize) -> Option<Rc<Record<E>>> {
        let record = {
            let mut records = self.records.borrow_mut();
            if index >= records.len() {
                return None;
            }
            records.remove(index)
        };
        self.events.notify(&StoreEvent::Removed {
            record: Rc::clone(&record),
            index,
        });
        Some(record)
    }

    /// Replace the record at `index`, returning the displaced one.
    ///
    /// Emits `Removed` for the old record then `Added` for the new one.
    pub fn replace(&self, index: usize, record: Rc<Record<E>>) -> Option<Rc<Record<E>>> {
        let old = {
            let mut records = self.records.borrow_mut();
            if index >= records.len() {
                return None;
            }
            std::mem::replace(&mut records[index], Rc::clone(&record))
        };
        self.events.notify(&StoreEvent::Removed {
            record: Rc::clone(&old),
            index,
        });
        self.events.notify(&StoreEvent::Added { record, index });
        Some(old)
    }

    /// Remove every record, emitting a single `Cleared`.
    pub fn clear(&self) {
        let had_records = {
            let mut records = self.records.borrow_mut();
            let had_records = !records.is_empty();
            records.clear();
            had_records
        };
        if had_records {
            self.events.notify(&StoreEvent::Cleared);
        }
    }

    /// Move the record at `from` to `to` (clamped), emitting exactly one
    /// `Updated { change: Moved }`. No add/remove events fire.
    pub fn move_record(&self, from: usize, to: usize) -> bool {
        let (record, to) = {
            let mut records = self.records.borrow_mut();
            if from >= records.len() {
                return false;
            }
            let to = to.min(records.len() - 1);
            if from == to {
                return false;
            }
            let record = records.remove(from);
            records.insert(to, Rc::clone(&record));
            (record, to)
        };
        trace!(from, to, "record moved");
        self.events.notify(&StoreEvent::Updated {
            record,
            index: to,
            change: RecordChange::Moved { from },
        });
        true
    }

    /// Set one projected attribute on `record`, emitting `Updated` with the
    /// field name. Position is untouched; no event fires when the value is
    /// unchanged or the record is not in this store.
    pub fn set_field(&self, record: &Rc<Record<E>>, field: impl Into<String>, value: Value) {
        let changed = record.merge([(field.into(), value)]);
        if changed.is_empty() {
            return;
        }
        self.notify_fields_changed(record, changed);
    }

    /// Merge attribute values into `record`, emitting one `Updated` naming
    /// the fields that actually changed.
    pub fn merge_fields(
        &self,
        record: &Rc<Record<E>>,
        fields: impl IntoIterator<Item = (String, Value)>,
    ) {
        let changed = record.merge(fields);
        if changed.is_empty() {
            return;
        }
        self.notify_fields_changed(record, changed);
    }

    /// Update `record`'s lifecycle state, emitting `Updated { State }`.
    pub fn set_record_state(&self, record: &Rc<Record<E>>, state: crate::record::RecordState) {
        if record.state() == state {
            return;
        }
        record.set_state(state);
        if let Some(index) = self.index_of(record) {
            self.events.notify(&StoreEvent::Updated {
                record: Rc::clone(record),
                index,
                change: RecordChange::State,
            });
        }
    }

    /// Subscribe to the event stream.
    #[must_use]
    pub fn on_event(&self, callback: impl Fn(&StoreEvent<E>) + 'static) -> Subscription {
        self.events.subscribe(callback)
    }

    pub(crate) fn notify_bound(&self) {
        self.events.notify(&StoreEvent::Bound);
    }

    pub(crate) fn notify_loaded(&self, count: usize) {
        self.events.notify(&StoreEvent::Loaded { count });
    }

    pub(crate) fn notify_fields_changed(&self, record: &Rc<Record<E>>, changed: Vec<String>) {
        let Some(index) = self.index_of(record) else {
            return;
        };
        self.events.notify(&StoreEvent::Updated {
            record: Rc::clone(record),
            index,
            change: RecordChange::Fields(changed),
        });
    }

    /// Read-only snapshot of the listed fields for every record, in store
    /// order. The print/export boundary consumes this; it never mutates the
    /// store or the collection.
    #[must_use]
    pub fn snapshot(&self, fields: &[&str]) -> StoreSnapshot {
        let rows = self
            .records
            .borrow()
            .iter()
            .map(|record| {
                fields
                    .iter()
                    .map(|&f| (f.to_owned(), record.get(f).unwrap_or(Value::Null)))
                    .collect()
            })
            .collect();
        StoreSnapshot {
            fields: fields.iter().map(|&f| f.to_owned()).collect(),
            rows,
        }
    }
}

/// Point-in-time, read-only projection of a store.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct StoreSnapshot {
    /// Field names, in projection order.
    pub fields: Vec<String>,
    /// One row per record, in store order; values follow `fields`.
    pub rows: Vec<Vec<(String, Value)>>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{RecordSchema, RecordState};
    use geosync_core::Layer;
    use std::cell::RefCell;

    fn schema() -> RecordSchema<Layer> {
        RecordSchema::new()
            .field("title", |l: &Layer| Value::from(l.name()))
            .field("visible", |l| Value::from(l.visible()))
    }

    fn record(name: &str) -> Rc<Record<Layer>> {
        Rc::new(Record::read_from(&schema(), Layer::raster(name)))
    }

    fn log_events(store: &RecordStore<Layer>) -> (Rc<RefCell<Vec<String>>>, Subscription) {
        let log = Rc::new(RefCell::new(Vec::new()));
        let l = Rc::clone(&log);
        let sub = store.on_event(move |event| {
            let entry = match event {
                StoreEvent::Bound => "bound".to_string(),
                StoreEvent::Loaded { count } => format!("loaded {count}"),
                StoreEvent::Added { index, .. } => format!("added @{index}"),
                StoreEvent::Removed { index, .. } => format!("removed @{index}"),
                StoreEvent::Updated { index, change, .. } => format!("updated @{index} {change:?}"),
                StoreEvent::Cleared => "cleared".to_string(),
            };
            l.borrow_mut().push(entry);
        });
        (log, sub)
    }

    #[test]
    fn push_insert_remove() {
        let store = RecordStore::new();
        let a = record("a");
        let b = record("b");
        assert_eq!(store.push(Rc::clone(&a)), 0);
        assert_eq!(store.insert(0, Rc::clone(&b)), 0);
        assert_eq!(store.index_of(&a), Some(1));
        assert_eq!(store.remove(&b), Some(0));
        assert_eq!(store.remove(&b), None);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn insert_clamps() {
        let store = RecordStore::new();
        assert_eq!(store.insert(42, record("a")), 0);
    }

    #[test]
    fn get_by_entity_hits_and_misses() {
        let store = RecordStore::new();
        let layer = Layer::raster("a");
        let rec = Rc::new(Record::read_from(&schema(), layer.clone()));
        store.push(Rc::clone(&rec));

        let found = store.get_by_entity(&layer);
        assert!(found.is_some_and(|r| Rc::ptr_eq(&r, &rec)));
        assert!(store.get_by_entity(&Layer::raster("other")).is_none());
    }

    #[test]
    fn move_record_emits_single_update() {
        let store = RecordStore::new();
        for name in ["a", "b", "c"] {
            store.push(record(name));
        }
        let (log, _sub) = log_events(&store);

        assert!(store.move_record(1, 0));
        assert_eq!(
            &*log.borrow(),
            &["updated @0 Moved { from: 1 }".to_string()]
        );
        assert_eq!(store.get(0).unwrap().get("title"), Some(Value::from("b")));
    }

    #[test]
    fn move_record_noop_cases() {
        let store = RecordStore::new();
        store.push(record("a"));
        assert!(!store.move_record(0, 0));
        assert!(!store.move_record(5, 0));
    }

    #[test]
    fn replace_emits_removed_then_added() {
        let store = RecordStore::new();
        let old = record("old");
        store.push(Rc::clone(&old));
        let (log, _sub) = log_events(&store);

        let displaced = store.replace(0, record("new"));
        assert!(displaced.is_some_and(|r| Rc::ptr_eq(&r, &old)));
        assert_eq!(&*log.borrow(), &["removed @0", "added @0"]);
    }

    #[test]
    fn clear_emits_once_and_only_when_nonempty() {
        let store = RecordStore::new();
        store.push(record("a"));
        let (log, _sub) = log_events(&store);
        store.clear();
        store.clear();
        assert_eq!(&*log.borrow(), &["cleared"]);
    }

    #[test]
    fn set_field_updates_and_skips_noop() {
        let store = RecordStore::new();
        let rec = record("a");
        store.push(Rc::clone(&rec));
        let (log, _sub) = log_events(&store);

        store.set_field(&rec, "title", Value::from("b"));
        store.set_field(&rec, "title", Value::from("b")); // unchanged
        assert_eq!(log.borrow().len(), 1);
        assert_eq!(rec.get("title"), Some(Value::from("b")));
    }

    #[test]
    fn set_record_state_emits_state_update() {
        let store = RecordStore::new();
        let rec = record("a");
        store.push(Rc::clone(&rec));
        let (log, _sub) = log_events(&store);

        store.set_record_state(&rec, RecordState::Updated);
        store.set_record_state(&rec, RecordState::Updated); // unchanged
        assert_eq!(&*log.borrow(), &["updated @0 State".to_string()]);
        assert!(rec.is_dirty());
    }

    #[test]
    fn snapshot_projects_in_order() {
        let store = RecordStore::new();
        store.push(record("a"));
        store.push(record("b"));

        let snapshot = store.snapshot(&["title", "visible", "missing"]);
        assert_eq!(snapshot.fields, vec!["title", "visible", "missing"]);
        assert_eq!(snapshot.rows.len(), 2);
        assert_eq!(snapshot.rows[0][0], ("title".to_string(), Value::from("a")));
        assert_eq!(
            snapshot.rows[1][2],
            ("missing".to_string(), Value::Null)
        );
    }

    #[cfg(feature = "serde")]
    #[test]
    fn snapshot_serializes() {
        let store = RecordStore::new();
        store.push(record("a"));
        let snapshot = store.snapshot(&["title"]);
        let json = serde_json::to_string(&snapshot).unwrap();
        assert!(json.contains("\"title\""));
    }
}
