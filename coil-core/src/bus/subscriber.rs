//! Subscriber types for the notification bus.
//!
//! A Subscriber is one callback registered on one channel. The bus hands the
//! published payload to it as `&dyn Any`; typed cells downcast it back to
//! their value type before calling user code.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use super::ChannelKey;
use crate::error::{Error, Result};

/// Type-erased subscriber callback.
pub type Callback = Arc<dyn Fn(&dyn Any) -> Result<()> + Send + Sync>;

/// Handle for one entry in a channel's subscriber list.
///
/// Closures cannot be compared, so [`NotificationBus::subscribe`] hands back
/// an id and [`NotificationBus::unsubscribe`] removes the entry carrying it.
/// Subscribing the same callback twice yields two ids. Ids come from one
/// process-wide sequence and are never reused, so a stale id can only miss.
///
/// [`NotificationBus::subscribe`]: super::NotificationBus::subscribe
/// [`NotificationBus::unsubscribe`]: super::NotificationBus::unsubscribe
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriberId(u64);

impl SubscriberId {
    fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(0);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

/// A callback registered on a channel.
pub(crate) struct Subscriber {
    id: SubscriberId,
    callback: Callback,
}

impl Subscriber {
    pub(crate) fn new(callback: Callback) -> Self {
        Self {
            id: SubscriberId::next(),
            callback,
        }
    }

    pub(crate) fn id(&self) -> SubscriberId {
        self.id
    }

    /// Deliver a payload to the subscriber.
    ///
    /// A panic inside the callback is caught and reported as
    /// [`Error::SubscriberPanicked`] so the remaining subscribers still run.
    pub(crate) fn notify(&self, key: &ChannelKey, payload: &dyn Any) -> Result<()> {
        match panic::catch_unwind(AssertUnwindSafe(|| (self.callback)(payload))) {
            Ok(result) => result,
            Err(panic) => Err(Error::SubscriberPanicked {
                key: key.clone(),
                message: panic_message(panic.as_ref()),
            }),
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_owned()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_owned()
    }
}
