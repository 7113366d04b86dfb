#![forbid(unsafe_code)]

//! Bidirectional synchronization between ordered record stores and live map
//! engine collections.
//!
//! A [`LayerStore`] keeps an ordered set of records consistent with a
//! [`Map`](geosync_core::Map)'s layer collection; a [`FeatureStore`] does
//! the same for a vector layer's features, with an admission filter. Both are
//! mediators: while bound, structural changes flow *through* the store type —
//! it applies each change exactly once on each side, and recognizes the echo
//! the engine side produces via an origin token so nothing is reprocessed.
//!
//! - [`guard::OriginGuard`]: generation-tagged re-entrancy suppression.
//! - [`subset`]: index translation between a full collection and a filtered
//!   subset view (also used by presentation code, see `geosync-panels`).
//! - [`record::Record`] / [`record::RecordSchema`]: one record per entity,
//!   with a declarative field projection.
//! - [`store::RecordStore`]: the ordered record container and its events.
//! - [`binding`]: direction mask and the shared bind/unbind protocol state.
//!
//! # Invariants
//!
//! 1. While bound and quiescent, record order equals the filtered, ordered
//!    view of the live collection.
//! 2. One external structural mutation produces exactly one corresponding
//!    mutation on the opposite side; the echo is suppressed, never chained.
//! 3. `bind` on an already-bound store is a no-op — no duplicate listeners,
//!    no second initial reconciliation.
//! 4. The origin token is released even if a propagation handler panics; a
//!    failed propagation cannot wedge the synchronizer into treating every
//!    future change as an echo.
//!
//! # Failure Modes
//!
//! | Failure | Behavior |
//! |---------|----------|
//! | Lookup miss (`get_by_layer` etc.) | `None`, never an error |
//! | `bind` while bound | silent no-op |
//! | `unbind` while unbound | silent no-op |
//! | Event against a dropped store | listener upgrades a `Weak`, no-ops |
//! | Write to a read-only field | `Err(FieldWriteError)` |

pub mod binding;
pub mod feature_store;
pub mod guard;
pub mod layer_store;
pub mod record;
pub mod store;
pub mod subset;

pub use binding::{BindOptions, SyncDirection};
pub use feature_store::{FeatureBindOptions, FeatureStore};
pub use guard::{OriginGuard, OriginScope};
pub use layer_store::LayerStore;
pub use record::{EntityHandle, FieldBinding, FieldWriteError, Record, RecordSchema, RecordState};
pub use store::{RecordChange, RecordStore, StoreEvent, StoreSnapshot};
