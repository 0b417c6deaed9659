//! Channel keys.
//!
//! Every reactive cell owns exactly one channel on the notification bus.
//! The channel is identified by a [`ChannelKey`]: a process-unique id paired
//! with the human-readable label the cell was created with.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Counter for generating unique channel ids.
static CHANNEL_ID_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Identity token for one cell's notification channel.
///
/// Equality and hashing only look at the numeric id. Two keys created with
/// the same label are still different channels, and an id is never handed
/// out twice within a process.
#[derive(Clone)]
pub struct ChannelKey {
    id: u64,
    label: Arc<str>,
}

impl ChannelKey {
    /// Create a fresh key carrying the given label.
    pub fn new(label: impl Into<Arc<str>>) -> Self {
        Self {
            id: CHANNEL_ID_COUNTER.fetch_add(1, Ordering::Relaxed),
            label: label.into(),
        }
    }

    /// Get the raw id.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Get the label the key was created with.
    pub fn label(&self) -> &str {
        &self.label
    }

    pub(crate) fn shared_label(&self) -> Arc<str> {
        Arc::clone(&self.label)
    }
}

impl PartialEq for ChannelKey {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for ChannelKey {}

impl Hash for ChannelKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl fmt::Debug for ChannelKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChannelKey")
            .field("id", &self.id)
            .field("label", &self.label)
            .finish()
    }
}

impl fmt::Display for ChannelKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.label, self.id)
    }
}
