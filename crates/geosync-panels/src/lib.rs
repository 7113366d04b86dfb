#![forbid(unsafe_code)]

//! Presentation-side consumers of the synchronized collections.
//!
//! A [`LegendPanel`] maintains legend rows for the layers a predicate
//! accepts; a [`TreeLoader`] maintains an ordered node list for a layer
//! tree. Both are pure observers: they subscribe to collection events and
//! translate full-collection indexes to panel positions with the
//! [`geosync_store::subset`] mapper, and never mutate the collection they
//! watch.

pub mod legend;
pub mod tree;

pub use legend::{LegendKind, LegendPanel, LegendRow};
pub use tree::{TreeLoader, TreeNode};
