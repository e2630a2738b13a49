//! Typed dedup event channel.
//!
//! Block notifications and download re-enablement are delivered to
//! subscribers (UI, message pipeline, download pipeline) over a broadcast
//! channel with a single well-defined payload type. Emission is
//! fire-and-forget: a slow or absent subscriber never blocks a writer.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// Default subscriber buffer capacity.
const DEFAULT_CAPACITY: usize = 256;

/// An event emitted by the dedup engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DedupEvent {
    /// An outgoing attachment was rejected as a duplicate.
    /// `original_sender` is set when the first sender is known locally.
    DuplicateDetected {
        attachment_id: String,
        fingerprint: String,
        original_sender: Option<String>,
    },
    /// An incoming attachment's download was deferred because the remote
    /// table reports its fingerprint as already seen.
    DownloadBlocked {
        attachment_id: String,
        fingerprint: String,
    },
    /// A previously-blocked attachment may now be downloaded.
    DownloadReady { attachment_id: String },
}

/// Broadcast bus for [`DedupEvent`]s.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<DedupEvent>,
}

impl EventBus {
    /// Create a new event bus with the given per-subscriber buffer capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Emit an event to all subscribers.
    pub fn emit(&self, event: DedupEvent) {
        // Ignore send errors (no subscribers)
        let _ = self.sender.send(event);
    }

    /// Subscribe to events. Returns a receiver.
    pub fn subscribe(&self) -> broadcast::Receiver<DedupEvent> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}
