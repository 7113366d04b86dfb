//! Records: one store element per entity, with a declarative field projection.
//!
//! A [`Record`] wraps exactly one entity handle plus a read/write projection
//! of selected entity fields into named attributes. The projection is
//! declarative: a [`RecordSchema`] lists [`FieldBinding`]s (field name, read
//! accessor, optional write accessor), and [`Record::read_from`] materializes
//! the attribute map through it.
//!
//! # Invariants
//!
//! 1. At most one record per entity while bound (enforced by the
//!    synchronizers, checked via [`EntityHandle::same`]).
//! 2. A record never owns its entity; dropping the record releases only the
//!    handle.
//! 3. `dirty` is true exactly while [`RecordState`] is `Inserted` or
//!    `Updated`, or after an explicit local edit pending save.

use std::cell::{Cell, RefCell};

use ahash::AHashMap;
use geosync_core::{Feature, FeatureState, Layer, Value};

/// Identity seam for synchronized entities: cheap handles compared by
/// reference equality.
pub trait EntityHandle: Clone + 'static {
    fn same(&self, other: &Self) -> bool;
}

impl EntityHandle for Layer {
    fn same(&self, other: &Self) -> bool {
        Layer::same(self, other)
    }
}

impl EntityHandle for Feature {
    fn same(&self, other: &Self) -> bool {
        Feature::same(self, other)
    }
}

/// Persistence lifecycle mirrored from the underlying entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RecordState {
    #[default]
    Unchanged,
    Inserted,
    Updated,
}

impl RecordState {
    /// Whether this state means "pending save".
    #[must_use]
    pub fn is_dirty(self) -> bool {
        matches!(self, Self::Inserted | Self::Updated)
    }
}

impl From<FeatureState> for RecordState {
    fn from(state: FeatureState) -> Self {
        match state {
            FeatureState::Unchanged => Self::Unchanged,
            FeatureState::Inserted => Self::Inserted,
            FeatureState::Updated => Self::Updated,
        }
    }
}

/// One projected field: name, entity read accessor, optional write-back.
pub struct FieldBinding<E> {
    pub name: &'static str,
    pub read: fn(&E) -> Value,
    pub write: Option<fn(&E, &Value)>,
}

impl<E> std::fmt::Debug for FieldBinding<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FieldBinding")
            .field("name", &self.name)
            .field("writable", &self.write.is_some())
            .finish()
    }
}

/// Ordered, declarative field projection for one entity type.
#[derive(Debug, Default)]
pub struct RecordSchema<E> {
    fields: Vec<FieldBinding<E>>,
}

impl<E> RecordSchema<E> {
    #[must_use]
    pub fn new() -> Self {
        Self { fields: Vec::new() }
    }

    /// Add a read-only field.
    #[must_use]
    pub fn field(mut self, name: &'static str, read: fn(&E) -> Value) -> Self {
        self.fields.push(FieldBinding {
            name,
            read,
            write: None,
        });
        self
    }

    /// Add a read/write field.
    #[must_use]
    pub fn field_rw(
        mut self,
        name: &'static str,
        read: fn(&E) -> Value,
        write: fn(&E, &Value),
    ) -> Self {
        self.fields.push(FieldBinding {
            name,
            read,
            write: Some(write),
        });
        self
    }

    /// The binding for `name`, if declared.
    #[must_use]
    pub fn binding(&self, name: &str) -> Option<&FieldBinding<E>> {
        self.fields.iter().find(|b| b.name == name)
    }

    /// Declared field names, in declaration order.
    #[must_use]
    pub fn names(&self) -> Vec<&'static str> {
        self.fields.iter().map(|b| b.name).collect()
    }

    pub(crate) fn bindings(&self) -> &[FieldBinding<E>] {
        &self.fields
    }
}

/// Error writing a record field back to its entity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldWriteError {
    /// The field is not declared in the schema.
    UnknownField(String),
    /// The field is declared without a write accessor.
    ReadOnly(String),
}

impl std::fmt::Display for FieldWriteError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::UnknownField(name) => write!(f, "unknown field: {name}"),
            Self::ReadOnly(name) => write!(f, "field is read-only: {name}"),
        }
    }
}

impl std::error::Error for FieldWriteError {}

/// A store element wrapping one entity plus its projected attributes.
pub struct Record<E> {
    entity: E,
    attributes: RefCell<AHashMap<String, Value>>,
    state: Cell<RecordState>,
    dirty: Cell<bool>,
}

impl<E: EntityHandle> std::fmt::Debug for Record<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Record")
            .field("attributes", &self.attributes.borrow().len())
            .field("state", &self.state.get())
            .field("dirty", &self.dirty.get())
            .finish()
    }
}

impl<E: EntityHandle> Record<E> {
    /// Materialize a record for `entity` through `schema`.
    #[must_use]
    pub fn read_from(schema: &RecordSchema<E>, entity: E) -> Self {
        let attributes = schema
            .bindings()
            .iter()
            .map(|b| (b.name.to_owned(), (b.read)(&entity)))
            .collect();
        Self {
            entity,
            attributes: RefCell::new(attributes),
            state: Cell::new(RecordState::Unchanged),
            dirty: Cell::new(false),
        }
    }

    /// Wrap `entity` with a pre-built attribute map and lifecycle state.
    #[must_use]
    pub fn with_attributes(
        entity: E,
        attributes: impl IntoIterator<Item = (String, Value)>,
        state: RecordState,
    ) -> Self {
        Self {
            entity,
            attributes: RefCell::new(attributes.into_iter().collect()),
            state: Cell::new(state),
            dirty: Cell::new(state.is_dirty()),
        }
    }

    /// The wrapped entity, by reference.
    #[must_use]
    pub fn entity(&self) -> &E {
        &self.entity
    }

    /// Projected attribute value for `field`.
    #[must_use]
    pub fn get(&self, field: &str) -> Option<Value> {
        self.attributes.borrow().get(field).cloned()
    }

    /// Snapshot of all projected attributes.
    #[must_use]
    pub fn attributes(&self) -> AHashMap<String, Value> {
        self.attributes.borrow().clone()
    }

    #[must_use]
    pub fn state(&self) -> RecordState {
        self.state.get()
    }

    /// Whether the record has unsaved changes.
    #[must_use]
    pub fn is_dirty(&self) -> bool {
        self.dirty.get()
    }

    /// Update the lifecycle state; dirtiness follows the state.
    pub fn set_state(&self, state: RecordState) {
        self.state.set(state);
        self.dirty.set(state.is_dirty());
    }

    /// Clear dirtiness after a successful save.
    pub fn mark_clean(&self) {
        self.state.set(RecordState::Unchanged);
        self.dirty.set(false);
    }

    /// Merge attribute values, returning the names whose values changed.
    pub(crate) fn merge(&self, fields: impl IntoIterator<Item = (String, Value)>) -> Vec<String> {
        let mut attributes = self.attributes.borrow_mut();
        let mut changed = Vec::new();
        for (field, value) in fields {
            if attributes.get(&field) == Some(&value) {
                continue;
            }
            attributes.insert(field.clone(), value);
            changed.push(field);
        }
        changed
    }

    /// Re-read every schema field from the entity, returning changed names.
    pub(crate) fn refresh(&self, schema: &RecordSchema<E>) -> Vec<String> {
        let pairs: Vec<(String, Value)> = schema
            .bindings()
            .iter()
            .map(|b| (b.name.to_owned(), (b.read)(&self.entity)))
            .collect();
        self.merge(pairs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use geosync_core::Layer;

    fn title_schema() -> RecordSchema<Layer> {
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
            .field("visible", |l| Value::from(l.visible()))
    }

    #[test]
    fn read_from_projects_schema_fields() {
        let layer = Layer::raster("roads");
        let record = Record::read_from(&title_schema(), layer.clone());
        assert_eq!(record.get("title"), Some(Value::from("roads")));
        assert_eq!(record.get("visible"), Some(Value::from(true)));
        assert_eq!(record.get("missing"), None);
        assert!(record.entity().same(&layer));
        assert!(!record.is_dirty());
    }

    #[test]
    fn schema_lookup_and_names() {
        let schema = title_schema();
        assert_eq!(schema.names(), vec!["title", "visible"]);
        assert!(schema.binding("title").is_some());
        assert!(schema.binding("title").and_then(|b| b.write).is_some());
        assert!(schema.binding("visible").and_then(|b| b.write).is_none());
        assert!(schema.binding("nope").is_none());
    }

    #[test]
    fn merge_reports_changed_fields_only() {
        let record = Record::read_from(&title_schema(), Layer::raster("a"));
        let changed = record.merge([
            ("title".to_string(), Value::from("a")), // unchanged
            ("visible".to_string(), Value::from(false)),
        ]);
        assert_eq!(changed, vec!["visible".to_string()]);
    }

    #[test]
    fn refresh_picks_up_entity_changes() {
        let layer = Layer::raster("a");
        let record = Record::read_from(&title_schema(), layer.clone());
        layer.set_name("b");
        layer.set_visible(false);
        let mut changed = record.refresh(&title_schema());
        changed.sort();
        assert_eq!(changed, vec!["title".to_string(), "visible".to_string()]);
        assert_eq!(record.get("title"), Some(Value::from("b")));
    }

    #[test]
    fn state_drives_dirtiness() {
        let record = Record::read_from(&title_schema(), Layer::raster("a"));
        record.set_state(RecordState::Inserted);
        assert!(record.is_dirty());
        record.set_state(RecordState::Updated);
        assert!(record.is_dirty());
        record.mark_clean();
        assert_eq!(record.state(), RecordState::Unchanged);
        assert!(!record.is_dirty());
    }

    #[test]
    fn field_write_error_display() {
        assert_eq!(
            FieldWriteError::UnknownField("x".into()).to_string(),
            "unknown field: x"
        );
        assert_eq!(
            FieldWriteError::ReadOnly("visible".into()).to_string(),
            "field is read-only: visible"
        );
    }
}
