//! Coil Core
//!
//! A small reactive-state container. It implements:
//!
//! - Atoms: independent mutable cells
//! - Selectors: derived, memoized cells that discover their own dependencies
//! - A keyed notification bus connecting them
//!
//! Anything that wants to follow a cell (a UI binding, a logger, another
//! selector) needs only two operations: [`ReactiveCell::snapshot`] and
//! [`ReactiveCell::subscribe`].
//!
//! # Architecture
//!
//! The crate is organized into several modules:
//!
//! - `bus`: Channel keys and the publish/subscribe bus
//! - `reactive`: Atoms, selectors and dependency tracking
//! - `error`: The crate error type
//!
//! # Example
//!
//! ```rust
//! use coil_core::{Atom, NotificationBus, ReactiveCell, Selector};
//!
//! let bus = NotificationBus::new();
//!
//! // Create an atom
//! let count = Atom::new(&bus, "count", 0);
//!
//! // Create a derived value
//! let count_dep = count.clone();
//! let doubled = Selector::new(&bus, "doubled", move |ctx| ctx.get(&count_dep) * 2);
//!
//! // Observe it
//! let subscription = doubled.subscribe(|value| println!("Doubled: {value}"));
//!
//! // Update the atom
//! count.set(5).unwrap();
//! // Prints: "Doubled: 10"
//! assert_eq!(doubled.snapshot(), 10);
//!
//! subscription.disconnect();
//! ```

pub mod bus;
pub mod error;
pub mod reactive;

pub use bus::{ChannelKey, NotificationBus};
pub use error::{BoxError, Error, Result};
pub use reactive::{
    atom, selector, Atom, AtomConfig, ReactiveCell, Selector, SelectorConfig, SelectorState,
    Subscription, Tracker, Upstream, MAX_PASSES,
};
