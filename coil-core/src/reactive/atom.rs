//! Atom Implementation
//!
//! An Atom is a reactive cell whose value is set directly by callers. It is
//! the source of every change in the graph: selectors read atoms (and other
//! selectors), and re-derive whenever one of them publishes.
//!
//! # How Atoms Work
//!
//! 1. `set` compares the new value with the current one using `PartialEq`.
//!
//! 2. If they are equal nothing happens. Otherwise the value is replaced and
//!    published on the atom's channel.
//!
//! 3. Every subscriber (user callbacks and dependent selectors) runs
//!    synchronously before `set` returns.

use std::fmt::{self, Debug};
use std::sync::Arc;

use serde::Deserialize;

use super::cell::{CellCore, ReactiveCell};
use crate::bus::{ChannelKey, NotificationBus};
use crate::error::Result;

/// Options record for creating an atom.
///
/// Deserializable so atoms can be declared in configuration; fields other
/// than `key` and `default` are ignored.
#[derive(Debug, Clone, Deserialize)]
pub struct AtomConfig<T> {
    /// Human-readable label. Not required to be unique.
    pub key: String,
    /// Initial value.
    pub default: T,
}

/// Create an atom on the process-wide bus.
pub fn atom<T>(config: AtomConfig<T>) -> Atom<T>
where
    T: Clone + PartialEq + Send + Sync + 'static,
{
    Atom::from_config(NotificationBus::global(), config)
}

/// A directly settable reactive cell.
///
/// # Example
///
/// ```rust
/// use coil_core::{Atom, NotificationBus, ReactiveCell};
///
/// let bus = NotificationBus::new();
/// let count = Atom::new(&bus, "count", 0);
///
/// count.set(5).unwrap();
/// assert_eq!(count.snapshot(), 5);
/// ```
pub struct Atom<T>
where
    T: Clone + PartialEq + Send + Sync + 'static,
{
    core: Arc<CellCore<T>>,
}

impl<T> Atom<T>
where
    T: Clone + PartialEq + Send + Sync + 'static,
{
    /// Create a new atom on `bus` with the given label and initial value.
    pub fn new(bus: &NotificationBus, label: impl Into<Arc<str>>, default: T) -> Self {
        let key = ChannelKey::new(label);
        tracing::debug!(channel = %key, "atom created");

        Self {
            core: Arc::new(CellCore::new(bus, key, default)),
        }
    }

    /// Create a new atom on `bus` from an options record.
    pub fn from_config(bus: &NotificationBus, config: AtomConfig<T>) -> Self {
        Self::new(bus, config.key, config.default)
    }

    /// Set a new value and notify subscribers if it differs from the current one.
    ///
    /// Errors from subscribers (including selectors that failed to
    /// recompute) are returned after every subscriber has run. The new
    /// value is stored either way.
    pub fn set(&self, value: T) -> Result<()> {
        self.core.update(value).map(|_| ())
    }

    /// Update the value using a function of the current one.
    pub fn update<F>(&self, f: F) -> Result<()>
    where
        F: FnOnce(&T) -> T,
    {
        let new_value = self.core.with(f);
        self.set(new_value)
    }

    /// Borrow the current value without cloning it.
    ///
    /// `f` must not set this atom.
    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        self.core.with(f)
    }

    /// Get the number of subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.core.bus().subscriber_count(self.core.key())
    }
}

impl<T> ReactiveCell<T> for Atom<T>
where
    T: Clone + PartialEq + Send + Sync + 'static,
{
    fn channel_key(&self) -> &ChannelKey {
        self.core.key()
    }

    fn bus(&self) -> &NotificationBus {
        self.core.bus()
    }

    fn snapshot(&self) -> T {
        self.core.snapshot()
    }
}

impl<T> Clone for Atom<T>
where
    T: Clone + PartialEq + Send + Sync + 'static,
{
    fn clone(&self) -> Self {
        Self {
            core: Arc::clone(&self.core),
        }
    }
}

impl<T> Debug for Atom<T>
where
    T: Clone + PartialEq + Send + Sync + Debug + 'static,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Atom")
            .field("key", self.core.key())
            .field("value", &self.snapshot())
            .field("subscriber_count", &self.subscriber_count())
            .finish()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicI32, Ordering};

    fn counter<T>(atom: &Atom<T>) -> Arc<AtomicI32>
    where
        T: Clone + PartialEq + Send + Sync + 'static,
    {
        let count = Arc::new(AtomicI32::new(0));
        let count_clone = count.clone();
        atom.subscribe(move |_| {
            count_clone.fetch_add(1, Ordering::SeqCst);
        });
        count
    }

    #[test]
    fn atom_set_and_snapshot() {
        let bus = NotificationBus::new();
        let atom = Atom::new(&bus, "value", 0);
        assert_eq!(atom.snapshot(), 0);

        atom.set(42).unwrap();
        assert_eq!(atom.snapshot(), 42);
    }

    #[test]
    fn atom_update() {
        let bus = NotificationBus::new();
        let atom = Atom::new(&bus, "value", 10);
        atom.update(|v| v + 5).unwrap();
        assert_eq!(atom.snapshot(), 15);
    }

    #[test]
    fn atom_notifies_with_new_value() {
        let bus = NotificationBus::new();
        let atom = Atom::new(&bus, "value", 0);
        let last = Arc::new(AtomicI32::new(-1));
        let last_clone = last.clone();

        atom.subscribe(move |value| last_clone.store(*value, Ordering::SeqCst));

        atom.set(7).unwrap();
        assert_eq!(last.load(Ordering::SeqCst), 7);
    }

    #[test]
    fn atom_dedups_equal_values() {
        let bus = NotificationBus::new();
        let atom = Atom::new(&bus, "value", 0);
        let count = counter(&atom);

        atom.set(0).unwrap();
        assert_eq!(count.load(Ordering::SeqCst), 0);

        atom.set(1).unwrap();
        assert_eq!(count.load(Ordering::SeqCst), 1);

        atom.set(1).unwrap();
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn atom_disconnect() {
        let bus = NotificationBus::new();
        let atom = Atom::new(&bus, "value", 0);
        let count = Arc::new(AtomicI32::new(0));
        let count_clone = count.clone();

        let subscription = atom.subscribe(move |_| {
            count_clone.fetch_add(1, Ordering::SeqCst);
        });

        atom.set(1).unwrap();
        assert_eq!(count.load(Ordering::SeqCst), 1);

        subscription.disconnect();
        atom.set(2).unwrap();
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(atom.subscriber_count(), 0);
    }

    #[test]
    fn atom_clone_shares_state() {
        let bus = NotificationBus::new();
        let atom1 = Atom::new(&bus, "shared", 0);
        let atom2 = atom1.clone();

        atom1.set(42).unwrap();
        assert_eq!(atom2.snapshot(), 42);
        assert_eq!(atom1.channel_key(), atom2.channel_key());
    }

    #[test]
    fn atoms_with_same_label_are_independent() {
        let bus = NotificationBus::new();
        let a = Atom::new(&bus, "model", 0);
        let b = Atom::new(&bus, "model", 0);
        let count_b = counter(&b);

        a.set(1).unwrap();
        assert_eq!(count_b.load(Ordering::SeqCst), 0);
        assert_eq!(b.snapshot(), 0);
        assert_ne!(a.channel_key(), b.channel_key());
    }

    #[test]
    fn fallible_subscriber_error_reaches_setter() {
        let bus = NotificationBus::new();
        let atom = Atom::new(&bus, "strict", 0);
        atom.try_subscribe(|value: &i32| {
            if *value < 0 {
                Err("negative values are not allowed")
            } else {
                Ok(())
            }
        });

        assert!(atom.set(3).is_ok());
        assert!(matches!(atom.set(-1), Err(crate::Error::Subscriber { .. })));
        assert_eq!(atom.snapshot(), -1);
    }

    #[test]
    fn atom_from_json_config_ignores_unknown_fields() {
        let bus = NotificationBus::new();
        let config: AtomConfig<Vec<String>> = serde_json::from_str(
            r#"{ "key": "tags", "default": ["a", "b"], "persist": true }"#,
        )
        .unwrap();

        let atom = Atom::from_config(&bus, config);
        assert_eq!(atom.label(), "tags");
        assert_eq!(atom.snapshot(), vec!["a".to_owned(), "b".to_owned()]);
    }

    #[test]
    fn global_atom_uses_global_bus() {
        let cell = atom(AtomConfig {
            key: "global".to_owned(),
            default: 1_u8,
        });

        cell.subscribe(|_| {});
        assert!(NotificationBus::global().has_subscribers(cell.channel_key()));
    }
}
