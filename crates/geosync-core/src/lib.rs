#![forbid(unsafe_code)]

//! Map engine boundary for GeoSync.
//!
//! This crate models the "live" side of the synchronization pair: entities
//! (layers and features) owned by a rendering engine, the ordered collections
//! they live in, and the event dispatch primitive everything is built on.
//!
//! - [`dispatch::Dispatcher`]: subscriber callbacks with RAII unsubscription.
//! - [`layer::Layer`] / [`layer::LayerCollection`]: an ordered, observable
//!   layer stack (a map's layers).
//! - [`feature::Feature`] / [`feature::FeatureCollection`]: a vector layer's
//!   feature set with persistence-state tracking.
//! - [`map::Map`]: a layer collection plus a viewport that may not be
//!   positioned yet (one-shot readiness signal).
//!
//! # Architecture
//!
//! Everything here is single-threaded and uses `Rc`/`RefCell`/`Cell` shared
//! ownership. Entity types are cheap `Rc` handles with reference-equality
//! identity (`same()`); cloning a handle never clones the entity.
//!
//! # Invariants
//!
//! 1. Mutation happens first, the interior borrow is released, then the
//!    corresponding event fires. Observers always see a consistent state and
//!    may re-enter the mutated object from inside a callback.
//! 2. A collection re-emits a member's property-change events only while the
//!    member belongs to it.
//! 3. Adding an already-contained entity to a collection is a no-op.

pub mod dispatch;
pub mod feature;
pub mod layer;
pub mod map;
pub mod value;

pub use dispatch::{Dispatcher, Subscription};
pub use feature::{Feature, FeatureCollection, FeatureCollectionEvent, FeatureState};
pub use layer::{CollectionEvent, Layer, LayerCollection, LayerKind, LayerProperty};
pub use map::{Extent, Map};
pub use value::Value;
