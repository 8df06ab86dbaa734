//! Change notification.

use kron_core::Resource;
use thiserror::Error;
use tokio::sync::broadcast;

/// A change to a stored object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchEvent<K> {
    Added(K),
    Modified(K),
    /// Carries the last stored state of the object.
    Deleted(K),
}

impl<K: Resource> WatchEvent<K> {
    /// The object the event is about.
    pub const fn object(&self) -> &K {
        match self {
            Self::Added(obj) | Self::Modified(obj) | Self::Deleted(obj) => obj,
        }
    }

    /// Short name of the event type, for logs.
    pub const fn event_type(&self) -> &'static str {
        match self {
            Self::Added(_) => "added",
            Self::Modified(_) => "modified",
            Self::Deleted(_) => "deleted",
        }
    }
}

/// Why a watch stopped delivering events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum WatchError {
    /// The receiver fell behind; `n` events were dropped. The watcher should re-list.
    #[error("watch lagged, {0} events dropped")]
    Lagged(u64),

    #[error("watch closed")]
    Closed,
}

/// Handle for receiving change events from a store.
pub struct WatchStream<K> {
    receiver: broadcast::Receiver<WatchEvent<K>>,
}

impl<K: Clone> WatchStream<K> {
    /// Wrap a broadcast receiver.
    pub const fn new(receiver: broadcast::Receiver<WatchEvent<K>>) -> Self {
        Self { receiver }
    }

    /// Receive the next event.
    pub async fn recv(&mut self) -> Result<WatchEvent<K>, WatchError> {
        self.receiver.recv().await.map_err(|e| match e {
            broadcast::error::RecvError::Lagged(n) => WatchError::Lagged(n),
            broadcast::error::RecvError::Closed => WatchError::Closed,
        })
    }
}
