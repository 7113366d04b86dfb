//! Vector features and a vector layer's live feature collection.
//!
//! A [`Feature`] carries a free-form attribute map and a tri-state
//! persistence flag ([`FeatureState`]): features created in the client start
//! `Inserted`; features loaded from a backing service start `Unchanged` and
//! become `Updated` on their first attribute write. The flag is what the
//! store side mirrors into record dirtiness.

use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};

use ahash::AHashMap;
use tracing::trace;

use crate::dispatch::{Dispatcher, Subscription};
use crate::value::Value;

/// Persistence lifecycle of a feature.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FeatureState {
    /// Matches the persisted version.
    #[default]
    Unchanged,
    /// Created locally, never persisted.
    Inserted,
    /// Persisted version exists but local attributes differ.
    Updated,
}

/// Per-feature event: attributes changed, membership did not.
#[derive(Debug, Clone)]
pub enum FeatureEvent {
    Updated { fields: Vec<String> },
}

struct FeatureInner {
    fid: Option<String>,
    attributes: RefCell<AHashMap<String, Value>>,
    state: Cell<FeatureState>,
    events: Dispatcher<FeatureEvent>,
}

/// Handle to an engine-owned feature. Clones share the same feature.
#[derive(Clone)]
pub struct Feature {
    inner: Rc<FeatureInner>,
}

impl std::fmt::Debug for Feature {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Feature")
            .field("fid", &self.inner.fid)
            .field("state", &self.state())
            .field("attributes", &self.inner.attributes.borrow().len())
            .finish()
    }
}

impl Feature {
    /// A locally created feature (state `Inserted`, no stable id yet).
    #[must_use]
    pub fn new() -> Self {
        Self::build(None, AHashMap::new(), FeatureState::Inserted)
    }

    /// A feature materialized from a backing service (state `Unchanged`).
    #[must_use]
    pub fn persisted(
        fid: impl Into<String>,
        attributes: impl IntoIterator<Item = (String, Value)>,
    ) -> Self {
        Self::build(
            Some(fid.into()),
            attributes.into_iter().collect(),
            FeatureState::Unchanged,
        )
    }

    fn build(fid: Option<String>, attributes: AHashMap<String, Value>, state: FeatureState) -> Self {
        Self {
            inner: Rc::new(FeatureInner {
                fid,
                attributes: RefCell::new(attributes),
                state: Cell::new(state),
                events: Dispatcher::new(),
            }),
        }
    }

    /// Reference-equality identity.
    #[must_use]
    pub fn same(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    /// Stable external id, absent for features not yet persisted.
    #[must_use]
    pub fn fid(&self) -> Option<String> {
        self.inner.fid.clone()
    }

    #[must_use]
    pub fn state(&self) -> FeatureState {
        self.inner.state.get()
    }

    #[must_use]
    pub fn get(&self, field: &str) -> Option<Value> {
        self.inner.attributes.borrow().get(field).cloned()
    }

    /// Snapshot of all attributes.
    #[must_use]
    pub fn attributes(&self) -> AHashMap<String, Value> {
        self.inner.attributes.borrow().clone()
    }

    /// Write one attribute; promotes `Unchanged` to `Updated` and emits one
    /// `Updated` event naming the field. Writing an equal value is a no-op.
    pub fn set(&self, field: impl Into<String>, value: impl Into<Value>) {
        self.set_many([(field.into(), value.into())]);
    }

    /// Write several attributes under one `Updated` event.
    pub fn set_many(&self, fields: impl IntoIterator<Item = (String, Value)>) {
        let changed: Vec<String> = {
            let mut attributes = self.inner.attributes.borrow_mut();
            let mut changed = Vec::new();
            for (field, value) in fields {
                if attributes.get(&field) == Some(&value) {
                    continue;
                }
                attributes.insert(field.clone(), value);
                changed.push(field);
            }
            changed
        };
        if changed.is_empty() {
            return;
        }
        if self.inner.state.get() == FeatureState::Unchanged {
            self.inner.state.set(FeatureState::Updated);
        }
        trace!(fid = ?self.inner.fid, fields = ?changed, "feature attributes updated");
        self.inner
            .events
            .notify(&FeatureEvent::Updated { fields: changed });
    }

    /// Mark the feature as persisted (state back to `Unchanged`).
    pub fn mark_saved(&self) {
        self.inner.state.set(FeatureState::Unchanged);
    }

    /// Subscribe to this feature's attribute events.
    #[must_use]
    pub fn on_event(&self, callback: impl Fn(&FeatureEvent) + 'static) -> Subscription {
        self.inner.events.subscribe(callback)
    }
}

impl Default for Feature {
    fn default() -> Self {
        Self::new()
    }
}

/// Event emitted by a [`FeatureCollection`].
#[derive(Debug, Clone)]
pub enum FeatureCollectionEvent {
    Added { feature: Feature, index: usize },
    Removed { feature: Feature, index: usize },
    /// A member's attributes changed; its membership and position did not.
    Updated { feature: Feature, fields: Vec<String> },
}

struct FeatureCollectionInner {
    features: RefCell<Vec<Feature>>,
    member_subs: RefCell<Vec<(Feature, Subscription)>>,
    events: Dispatcher<FeatureCollectionEvent>,
}

/// A vector layer's live feature set. Clones share the same collection.
#[derive(Clone)]
pub struct FeatureCollection {
    inner: Rc<FeatureCollectionInner>,
}

impl Default for FeatureCollection {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for FeatureCollection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FeatureCollection")
            .field("len", &self.len())
            .finish()
    }
}

impl FeatureCollection {
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Rc::new(FeatureCollectionInner {
                features: RefCell::new(Vec::new()),
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
        self.inner.features.borrow().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.features.borrow().is_empty()
    }

    #[must_use]
    pub fn get(&self, index: usize) -> Option<Feature> {
        self.inner.features.borrow().get(index).cloned()
    }

    #[must_use]
    pub fn index_of(&self, feature: &Feature) -> Option<usize> {
        self.inner
            .features
            .borrow()
            .iter()
            .position(|f| f.same(feature))
    }

    #[must_use]
    pub fn contains(&self, feature: &Feature) -> bool {
        self.index_of(feature).is_some()
    }

    /// Snapshot of the current members, in order.
    #[must_use]
    pub fn to_vec(&self) -> Vec<Feature> {
        self.inner.features.borrow().clone()
    }

    /// Append `feature`. No-op (returning `false`) if already contained.
    pub fn push(&self, feature: &Feature) -> bool {
        if self.contains(feature) {
            return false;
        }
        let index = {
            let mut features = self.inner.features.borrow_mut();
            features.push(feature.clone());
            features.len() - 1
        };
        self.watch_member(feature);
        self.inner.events.notify(&FeatureCollectionEvent::Added {
            feature: feature.clone(),
            index,
        });
        true
    }

    /// Remove `feature`, returning its former index.
    pub fn remove(&self, feature: &Feature) -> Option<usize> {
        let index = {
            let mut features = self.inner.features.borrow_mut();
            let index = features.iter().position(|f| f.same(feature))?;
            features.remove(index);
            index
        };
        self.inner
            .member_subs
            .borrow_mut()
            .retain(|(member, _)| !member.same(feature));
        self.inner.events.notify(&FeatureCollectionEvent::Removed {
            feature: feature.clone(),
            index,
        });
        Some(index)
    }

    /// Subscribe to structure and member-attribute events.
    #[must_use]
    pub fn on_event(
        &self,
        callback: impl Fn(&FeatureCollectionEvent) + 'static,
    ) -> Subscription {
        self.inner.events.subscribe(callback)
    }

    fn watch_member(&self, feature: &Feature) {
        let weak: Weak<FeatureCollectionInner> = Rc::downgrade(&self.inner);
        let member = feature.clone();
        let sub = feature.on_event(move |event| {
            let Some(inner) = weak.upgrade() else {
                return;
            };
            let FeatureEvent::Updated { fields } = event;
            inner.events.notify(&FeatureCollectionEvent::Updated {
                feature: member.clone(),
                fields: fields.clone(),
            });
        });
        self.inner
            .member_subs
            .borrow_mut()
            .push((feature.clone(), sub));
    }
}
