//! Dependency Tracking Context
//!
//! Every time a selector runs its derivation it passes in a fresh
//! [`Tracker`]. Reading a cell through the tracker returns the cell's
//! current value and, the first time that cell is seen by the selector,
//! subscribes the selector to it.
//!
//! # Implementation
//!
//! The tracker is short-lived, but the [`Dependencies`] it writes into belong
//! to the selector and survive across evaluations. That is what makes
//! subscription registration exactly-once per dependency: a dependency read
//! again in a later evaluation is already in the set and is not subscribed a
//! second time.
//!
//! Entries are never removed while the selector is alive, even if a later
//! evaluation stops reading them. Recomputing against an unchanged input
//! yields an equal value, which the selector's own update drops.
//!
//! # Cycles
//!
//! A new dependency is refused if it already reaches the selector through
//! its own dependencies. The graph therefore stays acyclic; the refused read
//! still returns the cell's value, and the selector reports the cycle once
//! the derivation returns.

use std::fmt;
use std::sync::Weak;

use indexmap::IndexMap;
use parking_lot::Mutex;

use super::cell::{ReactiveCell, Subscription};
use crate::bus::{Callback, ChannelKey, NotificationBus};

/// Upstream view of a derived cell.
///
/// Selectors hand one out through [`ReactiveCell::upstream`] so that other
/// selectors can check for cycles before depending on them.
pub trait Upstream: Send + Sync {
    /// Check whether `key` is among the cell's direct or transitive dependencies.
    fn reaches(&self, key: &ChannelKey) -> bool;
}

struct Dependency {
    subscription: Subscription,
    upstream: Option<Weak<dyn Upstream>>,
}

/// The set of cells a selector has read, with one subscription per cell.
#[derive(Default)]
pub(crate) struct Dependencies {
    entries: Mutex<IndexMap<ChannelKey, Dependency>>,
}

impl Dependencies {
    /// Subscribe `on_change` to the channel unless it is already a dependency.
    ///
    /// Returns whether a new dependency was registered.
    fn register(
        &self,
        bus: &NotificationBus,
        key: &ChannelKey,
        upstream: Option<Weak<dyn Upstream>>,
        on_change: &Callback,
    ) -> bool {
        let mut entries = self.entries.lock();
        if entries.contains_key(key) {
            return false;
        }

        let id = bus.subscribe(key, on_change.clone());
        let subscription = Subscription::new(bus.clone(), key.clone(), id);
        entries.insert(key.clone(), Dependency { subscription, upstream });
        true
    }

    /// Check whether `key` is a direct or transitive dependency.
    ///
    /// The lock is released before walking further upstream.
    pub(crate) fn reaches(&self, key: &ChannelKey) -> bool {
        let entries: Vec<(ChannelKey, Option<Weak<dyn Upstream>>)> = self
            .entries
            .lock()
            .iter()
            .map(|(dep, entry)| (dep.clone(), entry.upstream.clone()))
            .collect();

        entries.iter().any(|(dep, upstream)| dep == key || reaches(upstream, key))
    }

    /// Get the dependency keys in the order they were first read.
    pub(crate) fn keys(&self) -> Vec<ChannelKey> {
        self.entries.lock().keys().cloned().collect()
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub(crate) fn contains(&self, key: &ChannelKey) -> bool {
        self.entries.lock().contains_key(key)
    }
}

fn reaches(upstream: &Option<Weak<dyn Upstream>>, key: &ChannelKey) -> bool {
    upstream
        .as_ref()
        .and_then(Weak::upgrade)
        .is_some_and(|upstream| upstream.reaches(key))
}

impl Drop for Dependencies {
    fn drop(&mut self) {
        for entry in self.entries.get_mut().values() {
            entry.subscription.disconnect();
        }
    }
}

impl fmt::Debug for Dependencies {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.keys()).finish()
    }
}

/// Dependency tracking context handed to a selector's derivation.
pub struct Tracker<'a> {
    selector: &'a ChannelKey,
    dependencies: &'a Dependencies,
    on_change: &'a Callback,

    /// First dependency refused because it would close a cycle.
    refused: Mutex<Option<ChannelKey>>,
}

impl<'a> Tracker<'a> {
    pub(crate) fn new(
        selector: &'a ChannelKey,
        dependencies: &'a Dependencies,
        on_change: &'a Callback,
    ) -> Self {
        Self {
            selector,
            dependencies,
            on_change,
            refused: Mutex::new(None),
        }
    }

    /// Read a cell and record it as a dependency of the selector.
    pub fn get<V, C>(&self, cell: &C) -> V
    where
        V: Clone + PartialEq + Send + Sync + 'static,
        C: ReactiveCell<V>,
    {
        self.track(cell);
        cell.snapshot()
    }

    /// Record a dependency on a cell without reading it.
    ///
    /// A cell that already depends on this selector is not subscribed to.
    pub fn track<V, C>(&self, cell: &C)
    where
        V: Clone + PartialEq + Send + Sync + 'static,
        C: ReactiveCell<V>,
    {
        let key = cell.channel_key();
        if self.dependencies.contains(key) {
            return;
        }

        let upstream = cell.upstream();
        if key == self.selector || reaches(&upstream, self.selector) {
            tracing::error!(selector = %self.selector, dependency = %key, "dependency would create a cycle");
            self.refused.lock().get_or_insert_with(|| key.clone());
            return;
        }

        if self.dependencies.register(cell.bus(), key, upstream, self.on_change) {
            tracing::debug!(selector = %self.selector, dependency = %key, "dependency discovered");
        }
    }

    /// Get the first dependency that was refused because of a cycle.
    pub(crate) fn refused(&self) -> Option<ChannelKey> {
        self.refused.lock().clone()
    }

    /// Check whether the selector already depends on the cell.
    pub fn is_tracking<V, C>(&self, cell: &C) -> bool
    where
        V: Clone + PartialEq + Send + Sync + 'static,
        C: ReactiveCell<V>,
    {
        self.dependencies.contains(cell.channel_key())
    }
}

impl fmt::Debug for Tracker<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tracker")
            .field("selector", self.selector)
            .field("dependencies", self.dependencies)
            .finish()
    }
}
