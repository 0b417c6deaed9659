//! Reactive Cell
//!
//! The behaviour shared by atoms and selectors:
//!
//! - a current value that only changes through the cell's own update path,
//! - an equality-gated update that publishes at most once per call,
//! - one notification channel on a [`NotificationBus`].
//!
//! [`CellCore`] implements the storage and the update-and-publish sequence;
//! [`ReactiveCell`] is the public read/observe surface both cell types expose.

use std::any::Any;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::{ReentrantMutex, RwLock};

use super::context::Upstream;
use crate::bus::{Callback, ChannelKey, NotificationBus, SubscriberId};
use crate::error::{BoxError, Error, Result};

/// Read and observe access to a reactive cell.
///
/// Implemented by [`Atom`](super::Atom) and [`Selector`](super::Selector).
/// Selectors accept any `ReactiveCell` as a dependency.
pub trait ReactiveCell<T>: Send + Sync
where
    T: Clone + PartialEq + Send + Sync + 'static,
{
    /// Get the key of the cell's notification channel.
    fn channel_key(&self) -> &ChannelKey;

    /// Get the bus the cell publishes on.
    fn bus(&self) -> &NotificationBus;

    /// Get a copy of the current value.
    fn snapshot(&self) -> T;

    /// Get the label the cell was created with.
    fn label(&self) -> &str {
        self.channel_key().label()
    }

    /// Check whether anything is subscribed to the cell.
    fn has_subscribers(&self) -> bool {
        self.bus().has_subscribers(self.channel_key())
    }

    /// Get the cell's own dependencies, if it has any.
    ///
    /// Source cells return `None`.
    fn upstream(&self) -> Option<Weak<dyn Upstream>> {
        None
    }

    /// Call `callback` with every new value of the cell.
    fn subscribe<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&T) + Send + Sync + 'static,
        Self: Sized,
    {
        self.try_subscribe(move |value: &T| {
            callback(value);
            Ok::<(), BoxError>(())
        })
    }

    /// Like [`subscribe`](Self::subscribe), but the callback may fail.
    ///
    /// A returned error is reported to whoever changed the cell, after all
    /// other subscribers have run.
    fn try_subscribe<F, E>(&self, callback: F) -> Subscription
    where
        F: Fn(&T) -> Result<(), E> + Send + Sync + 'static,
        E: Into<BoxError> + 'static,
        Self: Sized,
    {
        let key = self.channel_key().clone();
        let callback_key = key.clone();
        let erased: Callback = Arc::new(move |payload: &dyn Any| match payload.downcast_ref::<T>() {
            Some(value) => {
                callback(value).map_err(|err| Error::subscriber(callback_key.clone(), err))
            }
            None => {
                tracing::warn!(channel = %callback_key, "payload type mismatch, skipping subscriber");
                Ok(())
            }
        });

        let id = self.bus().subscribe(&key, erased);
        Subscription::new(self.bus().clone(), key, id)
    }
}

/// Disconnect handle returned by [`ReactiveCell::subscribe`].
///
/// Dropping the handle leaves the subscription in place; call
/// [`disconnect`](Self::disconnect) to cancel it.
pub struct Subscription {
    bus: NotificationBus,
    key: ChannelKey,
    id: SubscriberId,
    connected: AtomicBool,
}

impl Subscription {
    pub(crate) fn new(bus: NotificationBus, key: ChannelKey, id: SubscriberId) -> Self {
        Self {
            bus,
            key,
            id,
            connected: AtomicBool::new(true),
        }
    }

    /// Cancel the subscription.
    ///
    /// Only the first call has an effect. A publish already in progress
    /// still reaches the callback.
    pub fn disconnect(&self) {
        if self.connected.swap(false, Ordering::SeqCst) {
            self.bus.unsubscribe(&self.key, self.id);
        }
    }

    /// Check whether [`disconnect`](Self::disconnect) has not been called yet.
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Get the key of the channel this subscription listens on.
    pub fn key(&self) -> &ChannelKey {
        &self.key
    }

    /// Get the subscription's id on the bus.
    pub fn id(&self) -> SubscriberId {
        self.id
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("key", &self.key)
            .field("id", &self.id)
            .field("connected", &self.is_connected())
            .finish()
    }
}

/// Value storage plus the equality-gated update-and-publish sequence.
pub(crate) struct CellCore<T> {
    key: ChannelKey,
    bus: NotificationBus,
    value: RwLock<T>,

    /// Held from the equality check until the publish returns.
    publishing: ReentrantMutex<()>,
}

impl<T> CellCore<T>
where
    T: Clone + PartialEq + Send + Sync + 'static,
{
    pub(crate) fn new(bus: &NotificationBus, key: ChannelKey, value: T) -> Self {
        Self {
            key,
            bus: bus.clone(),
            value: RwLock::new(value),
            publishing: ReentrantMutex::new(()),
        }
    }

    pub(crate) fn key(&self) -> &ChannelKey {
        &self.key
    }

    pub(crate) fn bus(&self) -> &NotificationBus {
        &self.bus
    }

    pub(crate) fn snapshot(&self) -> T {
        self.value.read().clone()
    }

    /// Borrow the current value.
    ///
    /// The read lock is held while `f` runs, so `f` must not change this cell.
    pub(crate) fn with<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        f(&*self.value.read())
    }

    /// Store `new_value` and publish it, unless it equals the current value.
    ///
    /// Returns whether the value changed. Updates from different threads are
    /// serialized through to the end of their publish, so subscribers see
    /// values in the order they were stored. The same thread may update the
    /// cell again from inside a subscriber. The value lock is released before
    /// publishing, so subscribers can read the cell. A publish error does not
    /// undo the change.
    pub(crate) fn update(&self, new_value: T) -> Result<bool> {
        let _publishing = self.publishing.lock();
        {
            let mut value = self.value.write();
            if *value == new_value {
                return Ok(false);
            }
            *value = new_value.clone();
        }

        tracing::trace!(channel = %self.key, "value changed");
        self.bus.publish(&self.key, &new_value)?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicI32;

    fn core(bus: &NotificationBus, value: i32) -> CellCore<i32> {
        CellCore::new(bus, ChannelKey::new("core"), value)
    }

    fn counting(bus: &NotificationBus, key: &ChannelKey) -> Arc<AtomicI32> {
        let count = Arc::new(AtomicI32::new(0));
        let count_clone = count.clone();
        bus.subscribe(
            key,
            Arc::new(move |_: &dyn Any| {
                count_clone.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }),
        );
        count
    }

    #[test]
    fn update_skips_equal_values() {
        let bus = NotificationBus::new();
        let cell = core(&bus, 0);
        let count = counting(&bus, cell.key());

        assert!(!cell.update(0).unwrap());
        assert_eq!(count.load(Ordering::SeqCst), 0);

        assert!(cell.update(1).unwrap());
        assert_eq!(count.load(Ordering::SeqCst), 1);

        assert!(!cell.update(1).unwrap());
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(cell.snapshot(), 1);
    }

    #[test]
    fn subscribers_can_read_during_publish() {
        let bus = NotificationBus::new();
        let cell = Arc::new(core(&bus, 0));
        let seen = Arc::new(AtomicI32::new(-1));

        let cell_clone = cell.clone();
        let seen_clone = seen.clone();
        bus.subscribe(
            cell.key(),
            Arc::new(move |_: &dyn Any| {
                seen_clone.store(cell_clone.snapshot(), Ordering::SeqCst);
                Ok(())
            }),
        );

        cell.update(9).unwrap();
        assert_eq!(seen.load(Ordering::SeqCst), 9);
    }

    #[test]
    fn subscriber_can_update_the_same_cell() {
        let bus = NotificationBus::new();
        let cell = Arc::new(core(&bus, 0));

        let cell_clone = cell.clone();
        bus.subscribe(
            cell.key(),
            Arc::new(move |payload: &dyn Any| match payload.downcast_ref::<i32>() {
                Some(&value) if value > 10 => cell_clone.update(10).map(|_| ()),
                _ => Ok(()),
            }),
        );

        assert!(cell.update(15).unwrap());
        assert_eq!(cell.snapshot(), 10);
    }

    #[test]
    fn concurrent_updates_publish_in_store_order() {
        let bus = NotificationBus::new();
        let cell = core(&bus, 0);
        let last = Arc::new(parking_lot::Mutex::new(0));

        let last_clone = last.clone();
        bus.subscribe(
            cell.key(),
            Arc::new(move |payload: &dyn Any| {
                if let Some(&value) = payload.downcast_ref::<i32>() {
                    std::thread::yield_now();
                    *last_clone.lock() = value;
                }
                Ok(())
            }),
        );

        std::thread::scope(|scope| {
            for thread in 0..8 {
                let cell = &cell;
                scope.spawn(move || {
                    for step in 1..=200 {
                        cell.update(thread * 1000 + step).unwrap();
                    }
                });
            }
        });

        assert_eq!(*last.lock(), cell.snapshot());
    }

    #[test]
    fn failed_publish_keeps_new_value() {
        let bus = NotificationBus::new();
        let cell = core(&bus, 0);
        bus.subscribe(cell.key(), Arc::new(|_: &dyn Any| -> Result<()> { panic!("listener bug") }));

        assert!(cell.update(3).is_err());
        assert_eq!(cell.snapshot(), 3);
    }

    #[test]
    fn with_borrows_value() {
        let bus = NotificationBus::new();
        let cell = CellCore::new(&bus, ChannelKey::new("names"), vec!["a".to_owned()]);

        assert_eq!(cell.with(|names| names.len()), 1);
    }

    #[test]
    fn subscription_disconnect_is_idempotent() {
        let bus = NotificationBus::new();
        let key = ChannelKey::new("sub");
        let id = bus.subscribe(&key, Arc::new(|_: &dyn Any| Ok(())));
        let subscription = Subscription::new(bus.clone(), key.clone(), id);

        assert!(subscription.is_connected());
        subscription.disconnect();
        subscription.disconnect();

        assert!(!subscription.is_connected());
        assert!(!bus.has_subscribers(&key));
    }
}
