//! The event bus: a typed, fire-and-forget channel the UI subscribes to.
//!
//! Built on `tokio::sync::broadcast` so multiple subscribers (a real UI
//! plus, e.g., this crate's own integration tests) can each see every
//! event without blocking the producer. Ordering is preserved per event
//! type only — the spec explicitly does not promise cross-type ordering,
//! which a single broadcast channel doesn't give us anyway once multiple
//! producer tasks are involved, so we don't pretend otherwise.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::crypto::hash::FileHash;
use crate::crypto::identity::PeerId;
use crate::store::types::ChatMessage;

const CHANNEL_CAPACITY: usize = 1024;

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Event {
    AuthStatus {
        is_setup: bool,
        is_unlocked: bool,
        is_online: bool,
    },
    LocalPeerDiscovered {
        peer_id: PeerId,
    },
    LocalPeerExpired {
        peer_id: PeerId,
    },
    PeerConnected {
        peer_id: PeerId,
    },
    PeerDisconnected {
        peer_id: PeerId,
    },
    MessageReceived {
        message: ChatMessage,
    },
    MessageStatusUpdated {
        msg_id: String,
        status: crate::store::types::MessageStatus,
    },
    FileTransferProgress {
        file_hash: FileHash,
        bytes_done: u64,
        total: u64,
    },
    FileTransferComplete {
        file_hash: FileHash,
    },
    FileTransferFailed {
        file_hash: FileHash,
        reason: String,
    },
}

/// Shared handle producers clone freely; cloning a `broadcast::Sender` is
/// cheap (it's an `Arc` under the hood).
#[derive(Clone, Debug)]
pub struct EventBus {
    tx: broadcast::Sender<Event>,
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _rx) = broadcast::channel(CHANNEL_CAPACITY);
        Self { tx }
    }

    /// Fire-and-forget: if there are no subscribers, the event is simply
    /// dropped rather than the caller erroring out.
    pub fn emit(&self, event: Event) {
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.tx.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscriber_receives_emitted_event() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe();
        bus.emit(Event::AuthStatus {
            is_setup: true,
            is_unlocked: true,
            is_online: false,
        });
        let event = rx.recv().await.unwrap();
        assert!(matches!(event, Event::AuthStatus { is_setup: true, .. }));
    }

    #[test]
    fn emit_without_subscribers_does_not_panic() {
        let bus = EventBus::new();
        bus.emit(Event::PeerConnected {
            peer_id: PeerId([1; 32]),
        });
    }
}
