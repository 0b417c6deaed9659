//! Error types.

use std::sync::Arc;

use crate::bus::ChannelKey;

/// Boxed error produced by user code (derivations and fallible subscribers).
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Result alias used throughout the crate.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Errors raised while computing or propagating reactive values.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A selector's derivation function failed. The selector kept its
    /// previous value.
    #[error("derivation of selector `{label}` failed: {source}")]
    Derivation {
        label: Arc<str>,
        #[source]
        source: BoxError,
    },

    /// A selector read a cell that already depends on it. The read was not
    /// subscribed to and the selector kept its previous value.
    #[error("cyclic dependency: selector `{label}` read {dependency}, which depends on it")]
    CycleDetected {
        label: Arc<str>,
        dependency: ChannelKey,
    },

    /// A selector kept being invalidated by its own downstream subscribers
    /// and gave up after `passes` re-derivations.
    #[error("selector `{label}` did not settle after {passes} passes")]
    Unstable { label: Arc<str>, passes: usize },

    /// A fallible subscriber returned an error.
    #[error("subscriber on channel {key} failed: {source}")]
    Subscriber {
        key: ChannelKey,
        #[source]
        source: BoxError,
    },

    /// A subscriber panicked while being notified.
    #[error("subscriber on channel {key} panicked: {message}")]
    SubscriberPanicked { key: ChannelKey, message: String },

    /// More than one subscriber failed during a single publish.
    #[error("{count} subscribers failed while publishing on channel {key}", count = .failures.len())]
    Publish { key: ChannelKey, failures: Vec<Error> },
}

impl Error {
    pub(crate) fn derivation(label: Arc<str>, source: impl Into<BoxError>) -> Self {
        Self::Derivation {
            label,
            source: source.into(),
        }
    }

    pub(crate) fn subscriber(key: ChannelKey, source: impl Into<BoxError>) -> Self {
        Self::Subscriber {
            key,
            source: source.into(),
        }
    }

    /// Check whether this error, or any failure it collects, is a cycle.
    pub fn is_cycle(&self) -> bool {
        match self {
            Self::CycleDetected { .. } => true,
            Self::Publish { failures, .. } => failures.iter().any(Error::is_cycle),
            _ => false,
        }
    }
}
