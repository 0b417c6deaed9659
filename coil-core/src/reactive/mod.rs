//! Reactive Cells
//!
//! This module implements the two kinds of reactive cell, atoms and
//! selectors, on top of the [notification bus](crate::bus).
//!
//! # Concepts
//!
//! ## Atoms
//!
//! An Atom holds a value that callers set directly. Setting a value that
//! differs from the current one publishes it on the atom's channel.
//!
//! ## Selectors
//!
//! A Selector derives its value from other cells. The derivation reads its
//! inputs through a [`Tracker`], which subscribes the selector to each input
//! the first time it is read. Whenever an input publishes, the selector
//! recomputes and, if the result changed, publishes in turn.
//!
//! # Implementation Notes
//!
//! Propagation is push-based and synchronous: by the time `Atom::set`
//! returns, every selector downstream has recomputed and every subscriber
//! has run. There is no batching, so a selector reachable along two paths
//! recomputes once per path.
//!
//! Subscribers may set atoms from inside a notification, including atoms
//! upstream of the cell that notified them. The dependency graph itself is
//! kept acyclic: a selector never subscribes to a cell that depends on it.

mod atom;
mod cell;
mod context;
mod selector;

pub use atom::{atom, Atom, AtomConfig};
pub use cell::{ReactiveCell, Subscription};
pub use context::{Tracker, Upstream};
pub use selector::{selector, Selector, SelectorConfig, SelectorState, MAX_PASSES};
