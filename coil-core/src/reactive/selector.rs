//! Selector Implementation
//!
//! A Selector is a derived reactive cell. Its value is computed from other
//! cells (atoms or selectors) by a derivation function, and recomputed
//! whenever one of those cells publishes a change.
//!
//! # How Selectors Work
//!
//! 1. On construction, the derivation runs once with a fresh [`Tracker`].
//!    Every cell read through the tracker becomes a dependency and gets one
//!    subscription whose callback recomputes the selector.
//!
//! 2. When a dependency publishes, the selector re-runs the whole derivation
//!    with a new tracker that writes into the same dependency set. Cells read
//!    for the first time are subscribed; known ones are not subscribed again.
//!
//! 3. The result goes through the equality-gated update, so downstream
//!    subscribers only hear about values that actually changed.
//!
//! Dependencies are never pruned. A selector that switches from reading `a`
//! to reading `b` stays subscribed to `a`; recomputing on a change of `a`
//! is harmless because it produces an equal value.
//!
//! # Failures
//!
//! If the derivation fails during a recompute, the selector keeps its last
//! value and the error travels back to whoever changed the upstream cell.
//!
//! Reading a cell that already depends on the selector would close a cycle.
//! The read is not subscribed to, the result is discarded and the recompute
//! fails with [`Error::CycleDetected`].
//!
//! # Reentrancy
//!
//! A subscriber may change an upstream cell while the selector is still
//! publishing. The nested recompute request is not run on the spot; it marks
//! the selector stale, and the outer recompute derives again once its publish
//! returns. A selector that is still stale after [`MAX_PASSES`] derivations
//! fails with [`Error::Unstable`].
//!
//! # Thread Safety
//!
//! Recomputes of one selector are serialized by a reentrant lock, so
//! concurrent changes to different dependencies are applied one at a time.

use std::any::Any;
use std::convert::Infallible;
use std::fmt::{self, Debug};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock, Weak};

use parking_lot::{Mutex, ReentrantMutex};

use super::cell::{CellCore, ReactiveCell};
use super::context::{Dependencies, Tracker, Upstream};
use crate::bus::{Callback, ChannelKey, NotificationBus};
use crate::error::{BoxError, Error, Result};

/// Upper bound on back-to-back derivations within one recompute.
pub const MAX_PASSES: usize = 100;

/// Type-erased derivation function.
type DeriveFn<T> = Box<dyn Fn(&Tracker<'_>) -> Result<T, BoxError> + Send + Sync>;

/// Back-reference from dependency subscriptions to the selector.
///
/// Filled in once construction succeeds. Holding it weakly means the bus
/// never keeps a selector alive.
type SelectorRef<T> = Arc<OnceLock<Weak<SelectorInner<T>>>>;

/// Where a selector is in its compute cycle.
///
/// A selector handle only exists once the initial derivation has finished,
/// so a fresh handle is always `Settled`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectorState {
    /// The derivation is running.
    Computing,

    /// A new value was stored and is being published downstream.
    Publishing,

    /// The value is up-to-date and nothing is in flight.
    Settled,
}

/// Options record for creating a selector.
pub struct SelectorConfig<F> {
    /// Human-readable label. Not required to be unique.
    pub key: String,
    /// Derivation function.
    pub get: F,
}

/// Create a selector on the process-wide bus.
pub fn selector<T, F>(config: SelectorConfig<F>) -> Selector<T>
where
    T: Clone + PartialEq + Send + Sync + 'static,
    F: Fn(&Tracker<'_>) -> T + Send + Sync + 'static,
{
    Selector::new(NotificationBus::global(), config.key, config.get)
}

/// Shared state behind every clone of a selector handle.
struct SelectorInner<T>
where
    T: Clone + PartialEq + Send + Sync + 'static,
{
    core: CellCore<T>,
    derive: DeriveFn<T>,
    dependencies: Dependencies,

    /// Callback registered on every dependency.
    on_change: Callback,

    state: Mutex<SelectorState>,

    /// Set when a recompute is requested while one is already in flight.
    stale: AtomicBool,

    /// Held for the whole compute-and-publish sequence.
    propagation: ReentrantMutex<()>,
}

impl<T> SelectorInner<T>
where
    T: Clone + PartialEq + Send + Sync + 'static,
{
    /// Re-run the derivation and publish the result if it changed.
    ///
    /// Keeps deriving until no nested request marked the selector stale.
    fn recompute(&self) -> Result<bool> {
        let _propagation = self.propagation.lock();
        if *self.state.lock() != SelectorState::Settled {
            self.stale.store(true, Ordering::SeqCst);
            tracing::trace!(selector = %self.core.key(), "recompute deferred");
            return Ok(false);
        }

        let mut changed = false;
        for _ in 0..MAX_PASSES {
            self.stale.store(false, Ordering::SeqCst);
            changed |= self.derive_and_publish()?;
            if !self.stale.load(Ordering::SeqCst) {
                return Ok(changed);
            }
        }

        tracing::error!(selector = %self.core.key(), passes = MAX_PASSES, "selector did not settle");
        Err(Error::Unstable {
            label: self.core.key().shared_label(),
            passes: MAX_PASSES,
        })
    }

    fn derive_and_publish(&self) -> Result<bool> {
        let state = StateGuard::enter(&self.state);

        let tracker = Tracker::new(self.core.key(), &self.dependencies, &self.on_change);
        let derived = (self.derive)(&tracker);
        if let Some(dependency) = tracker.refused() {
            return Err(Error::CycleDetected {
                label: self.core.key().shared_label(),
                dependency,
            });
        }

        let value = derived.map_err(|source| {
            tracing::warn!(
                selector = %self.core.key(),
                error = %source,
                "derivation failed, keeping previous value"
            );
            Error::derivation(self.core.key().shared_label(), source)
        })?;

        state.set(SelectorState::Publishing);
        self.core.update(value)
    }
}

impl<T> Upstream for SelectorInner<T>
where
    T: Clone + PartialEq + Send + Sync + 'static,
{
    fn reaches(&self, key: &ChannelKey) -> bool {
        self.dependencies.reaches(key)
    }
}

/// Returns the selector to `Settled` when the compute cycle ends, however it ends.
struct StateGuard<'a> {
    state: &'a Mutex<SelectorState>,
}

impl<'a> StateGuard<'a> {
    fn enter(state: &'a Mutex<SelectorState>) -> Self {
        *state.lock() = SelectorState::Computing;
        Self { state }
    }

    fn set(&self, state: SelectorState) {
        *self.state.lock() = state;
    }
}

impl Drop for StateGuard<'_> {
    fn drop(&mut self) {
        self.set(SelectorState::Settled);
    }
}

fn recompute_callback<T>(this: SelectorRef<T>) -> Callback
where
    T: Clone + PartialEq + Send + Sync + 'static,
{
    Arc::new(move |_: &dyn Any| match this.get().and_then(Weak::upgrade) {
        Some(inner) => inner.recompute().map(|_| ()),
        // Still under construction, or already dropped.
        None => Ok(()),
    })
}

/// A derived, memoized reactive cell.
///
/// # Example
///
/// ```rust
/// use coil_core::{Atom, NotificationBus, ReactiveCell, Selector};
///
/// let bus = NotificationBus::new();
/// let count = Atom::new(&bus, "count", 1);
///
/// let count_dep = count.clone();
/// let doubled = Selector::new(&bus, "doubled", move |ctx| ctx.get(&count_dep) * 2);
/// assert_eq!(doubled.snapshot(), 2);
///
/// count.set(5).unwrap();
/// assert_eq!(doubled.snapshot(), 10);
/// ```
pub struct Selector<T>
where
    T: Clone + PartialEq + Send + Sync + 'static,
{
    inner: Arc<SelectorInner<T>>,
}

impl<T> Selector<T>
where
    T: Clone + PartialEq + Send + Sync + 'static,
{
    /// Create a selector from an infallible derivation.
    ///
    /// The derivation runs immediately.
    pub fn new<F>(bus: &NotificationBus, label: impl Into<Arc<str>>, derive: F) -> Self
    where
        F: Fn(&Tracker<'_>) -> T + Send + Sync + 'static,
    {
        match Self::build(bus, label.into(), move |tracker| Ok::<T, Infallible>(derive(tracker))) {
            Ok(selector) => selector,
            Err(never) => match never {},
        }
    }

    /// Create a selector from a fallible derivation.
    ///
    /// The derivation runs immediately; if it fails, every dependency it
    /// subscribed to is disconnected again and the error is returned.
    pub fn try_new<F, E>(
        bus: &NotificationBus,
        label: impl Into<Arc<str>>,
        derive: F,
    ) -> Result<Self>
    where
        F: Fn(&Tracker<'_>) -> Result<T, E> + Send + Sync + 'static,
        E: Into<BoxError> + 'static,
    {
        let label = label.into();
        Self::build(bus, Arc::clone(&label), derive).map_err(|source| {
            let source: BoxError = source.into();
            tracing::warn!(selector = %label, error = %source, "initial derivation failed");
            Error::derivation(label, source)
        })
    }

    /// Create a selector on `bus` from an options record.
    pub fn from_config<F>(bus: &NotificationBus, config: SelectorConfig<F>) -> Self
    where
        F: Fn(&Tracker<'_>) -> T + Send + Sync + 'static,
    {
        Self::new(bus, config.key, config.get)
    }

    fn build<F, E>(bus: &NotificationBus, label: Arc<str>, derive: F) -> Result<Self, E>
    where
        F: Fn(&Tracker<'_>) -> Result<T, E> + Send + Sync + 'static,
        E: Into<BoxError> + 'static,
    {
        let key = ChannelKey::new(label);
        let this: SelectorRef<T> = Arc::new(OnceLock::new());
        let on_change = recompute_callback(Arc::clone(&this));
        let dependencies = Dependencies::default();

        let tracker = Tracker::new(&key, &dependencies, &on_change);
        let value = derive(&tracker)?;
        // Nothing can depend on a key created above.
        debug_assert!(tracker.refused().is_none());
        drop(tracker);
        tracing::debug!(selector = %key, dependencies = dependencies.len(), "selector created");

        let boxed: DeriveFn<T> = Box::new(move |tracker| derive(tracker).map_err(Into::into));
        let inner = Arc::new(SelectorInner {
            core: CellCore::new(bus, key, value),
            derive: boxed,
            dependencies,
            on_change,
            state: Mutex::new(SelectorState::Settled),
            stale: AtomicBool::new(false),
            propagation: ReentrantMutex::new(()),
        });

        // `this` was created empty above, so this is the only `set`.
        let _ = this.set(Arc::downgrade(&inner));

        Ok(Self { inner })
    }

    /// Re-run the derivation now, publishing if the result changed.
    ///
    /// Useful when the derivation also reads non-reactive state.
    pub fn recompute(&self) -> Result<bool> {
        self.inner.recompute()
    }

    /// Borrow the current value without cloning it.
    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        self.inner.core.with(f)
    }

    /// Get the current compute state.
    pub fn state(&self) -> SelectorState {
        *self.inner.state.lock()
    }

    /// Get the keys of every cell this selector depends on, in first-read order.
    pub fn dependencies(&self) -> Vec<ChannelKey> {
        self.inner.dependencies.keys()
    }

    /// Get the number of dependencies.
    pub fn dependency_count(&self) -> usize {
        self.inner.dependencies.len()
    }

    /// Check whether the selector depends on the given cell.
    pub fn depends_on<V, C>(&self, cell: &C) -> bool
    where
        V: Clone + PartialEq + Send + Sync + 'static,
        C: ReactiveCell<V>,
    {
        self.inner.dependencies.contains(cell.channel_key())
    }

    /// Get the number of subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.inner.core.bus().subscriber_count(self.inner.core.key())
    }
}

impl<T> ReactiveCell<T> for Selector<T>
where
    T: Clone + PartialEq + Send + Sync + 'static,
{
    fn channel_key(&self) -> &ChannelKey {
        self.inner.core.key()
    }

    fn bus(&self) -> &NotificationBus {
        self.inner.core.bus()
    }

    fn snapshot(&self) -> T {
        self.inner.core.snapshot()
    }

    fn upstream(&self) -> Option<Weak<dyn Upstream>> {
        let upstream: Weak<dyn Upstream> = Arc::downgrade(&self.inner) as Weak<SelectorInner<T>>;
        Some(upstream)
    }
}

impl<T> Clone for Selector<T>
where
    T: Clone + PartialEq + Send + Sync + 'static,
{
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> Debug for Selector<T>
where
    T: Clone + PartialEq + Send + Sync + Debug + 'static,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Selector")
            .field("key", self.channel_key())
            .field("state", &self.state())
            .field("value", &self.snapshot())
            .field("dependencies", &self.inner.dependencies)
            .finish()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
