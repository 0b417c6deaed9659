//! Notification Bus
//!
//! A keyed publish/subscribe channel. Each reactive cell owns one channel,
//! identified by its [`ChannelKey`], and publishes its new value there after
//! every change.
//!
//! # Delivery
//!
//! - Subscribers run synchronously, in the order they subscribed.
//! - `publish` copies the channel's subscriber list before running it, so a
//!   callback may subscribe, unsubscribe or publish (on any channel) without
//!   deadlocking. Callbacks added during a publish are not called by it, and
//!   callbacks removed during a publish still are.
//! - A failing or panicking subscriber never stops the rest of the list. All
//!   failures are handed back to the publisher once the list has run.
//!
//! # Thread Safety
//!
//! Channels live in a `DashMap`, so subscribe/unsubscribe/publish take a lock
//! on a single shard and never across callbacks.

mod key;
mod subscriber;

use std::any::Any;
use std::fmt;
use std::sync::{Arc, OnceLock};

use dashmap::DashMap;
use smallvec::SmallVec;

use crate::error::{Error, Result};

pub use key::ChannelKey;
pub use subscriber::{Callback, SubscriberId};

use subscriber::Subscriber;

/// The process-wide default bus.
static GLOBAL_BUS: OnceLock<NotificationBus> = OnceLock::new();

/// Keyed publish/subscribe channel shared by a group of cells.
///
/// Cloning the bus is cheap and yields a handle to the same channels.
#[derive(Clone, Default)]
pub struct NotificationBus {
    channels: Arc<DashMap<ChannelKey, Vec<Arc<Subscriber>>>>,
}

impl NotificationBus {
    /// Create a new, empty bus.
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the process-wide bus used by [`atom`](crate::atom) and
    /// [`selector`](crate::selector).
    pub fn global() -> &'static NotificationBus {
        GLOBAL_BUS.get_or_init(NotificationBus::new)
    }

    /// Append a callback to the channel's subscriber list.
    ///
    /// The list is created on first use. Returns the id to pass to
    /// [`unsubscribe`](Self::unsubscribe).
    pub fn subscribe(&self, key: &ChannelKey, callback: Callback) -> SubscriberId {
        let subscriber = Arc::new(Subscriber::new(callback));
        let id = subscriber.id();

        self.channels
            .entry(key.clone())
            .or_default()
            .push(subscriber);

        tracing::trace!(channel = %key, subscriber = ?id, "subscribed");
        id
    }

    /// Remove a subscription from the channel.
    ///
    /// Unknown channels and ids are ignored. Returns whether anything was
    /// removed.
    pub fn unsubscribe(&self, key: &ChannelKey, id: SubscriberId) -> bool {
        let Some(mut subscribers) = self.channels.get_mut(key) else {
            tracing::trace!(channel = %key, subscriber = ?id, "unsubscribe from unknown channel");
            return false;
        };

        match subscribers.iter().position(|subscriber| subscriber.id() == id) {
            Some(index) => {
                subscribers.remove(index);
                tracing::trace!(channel = %key, subscriber = ?id, "unsubscribed");
                true
            }
            None => {
                tracing::trace!(channel = %key, subscriber = ?id, "unsubscribe of unknown subscriber");
                false
            }
        }
    }

    /// Check whether the channel has at least one subscriber.
    pub fn has_subscribers(&self, key: &ChannelKey) -> bool {
        self.subscriber_count(key) > 0
    }

    /// Get the number of subscribers on the channel.
    pub fn subscriber_count(&self, key: &ChannelKey) -> usize {
        self.channels
            .get(key)
            .map(|subscribers| subscribers.len())
            .unwrap_or(0)
    }

    /// Get the number of channels that were ever subscribed to.
    ///
    /// Emptied channels are kept, so this only grows.
    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    /// Deliver a payload to every current subscriber of the channel.
    ///
    /// If exactly one subscriber failed its error is returned unchanged;
    /// several failures are wrapped in [`Error::Publish`].
    pub fn publish(&self, key: &ChannelKey, payload: &dyn Any) -> Result<()> {
        let subscribers: SmallVec<[Arc<Subscriber>; 4]> = match self.channels.get(key) {
            Some(subscribers) => subscribers.iter().cloned().collect(),
            None => return Ok(()),
        };

        tracing::trace!(channel = %key, subscribers = subscribers.len(), "publishing");

        let mut failures = Vec::new();
        for subscriber in subscribers {
            if let Err(err) = subscriber.notify(key, payload) {
                tracing::warn!(channel = %key, subscriber = ?subscriber.id(), error = %err, "subscriber failed");
                failures.push(err);
            }
        }

        if failures.len() <= 1 {
            return failures.pop().map_or(Ok(()), Err);
        }

        Err(Error::Publish {
            key: key.clone(),
            failures,
        })
    }
}

impl fmt::Debug for NotificationBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NotificationBus")
            .field("channel_count", &self.channel_count())
            .finish()
    }
}
