//! Messaging Protocol (component I): frame format for `/rchat/msg/1`,
//! delivery/read state machine, and outbox retry.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{instrument, warn};
use ulid::Ulid;

use crate::crypto::hash::FileHash;
use crate::crypto::identity::PeerId;
use crate::error::{CoreError, CoreResult};
use crate::event::{Event, EventBus};
use crate::session::SessionManager;
use crate::store::types::{ChatMessage, ContentType, Direction, MessageStatus};
use crate::store::Store;

/// Wire frame kinds on `/rchat/msg/1`.
#[derive(Clone, Serialize, Deserialize)]
pub enum FrameKind {
    Text { utf8_text: String },
    FileAnnounce {
        file_hash: FileHash,
        size: u64,
        mime_hint: String,
        file_name: String,
    },
    Receipt { refers_to_msg_id: String, status: ReceiptStatus },
    Typing,
    ProfileHint { alias: Option<String> },
}

#[derive(Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReceiptStatus {
    Delivered,
    Read,
}

#[derive(Clone, Serialize, Deserialize)]
pub struct Frame {
    pub msg_id: String,
    pub kind: FrameKind,
}

impl Frame {
    pub fn encode(&self) -> CoreResult<Vec<u8>> {
        Ok(postcard::to_stdvec(self)?)
    }

    pub fn decode(bytes: &[u8]) -> CoreResult<Self> {
        if bytes.len() > 1024 * 1024 {
            return Err(CoreError::MalformedFrame("frame exceeds 1 MiB".into()));
        }
        Ok(postcard::from_bytes(bytes)?)
    }
}

/// Exponential backoff schedule for outbox pumping, per spec §4.6:
/// 1s, 2s, 5s, 15s, 60s, then steady at 60s.
pub const BACKOFF_SCHEDULE: [u64; 5] = [1, 2, 5, 15, 60];

pub fn backoff_delay(attempt: usize) -> Duration {
    let secs = BACKOFF_SCHEDULE
        .get(attempt)
        .copied()
        .unwrap_or(*BACKOFF_SCHEDULE.last().unwrap());
    Duration::from_secs(secs)
}

/// Ties the session layer to persistence and the event bus. One instance
/// per node; all peer traffic funnels through it.
pub struct Messaging {
    store: Arc<Store>,
    events: EventBus,
    sessions: Arc<SessionManager>,
    my_peer_id: PeerId,
}

impl Messaging {
    pub fn new(store: Arc<Store>, events: EventBus, sessions: Arc<SessionManager>, my_peer_id: PeerId) -> Self {
        Self {
            store,
            events,
            sessions,
            my_peer_id,
        }
    }

    /// `send_message(peer_id, text)`: assigns a `msg_id`, inserts a
    /// `pending` row, emits the state-change, and enqueues to the
    /// session's outbox. Returns the `msg_id` immediately — the response
    /// precedes the events it implies, per spec §5.
    #[instrument(skip(self, text))]
    pub async fn send_message(&self, peer_id: PeerId, text: &str) -> CoreResult<String> {
        if !self.store.is_trusted(&peer_id)? {
            return Err(CoreError::NotTrusted);
        }
        let msg_id = Ulid::new().to_string();
        let msg = ChatMessage {
            msg_id: msg_id.clone(),
            chat_id: peer_id.to_hex(),
            direction: Direction::Out,
            sender_peer_id: self.my_peer_id,
            content_type: ContentType::Text,
            text: Some(text.to_string()),
            file_hash: None,
            file_name: None,
            created_at: now(),
            status: MessageStatus::Pending,
        };
        self.store.insert_message(&msg)?;
        self.events.emit(Event::MessageStatusUpdated {
            msg_id: msg_id.clone(),
            status: MessageStatus::Pending,
        });
        self.try_flush_to_session(&peer_id, &msg_id, FrameKind::Text {
            utf8_text: text.to_string(),
        })
        .await?;
        Ok(msg_id)
    }

    /// Announces a locally-held file to `peer_id` (image/document/video
    /// send): inserts the outgoing message row content-addressed by
    /// `file_hash`, then enqueues a `FileAnnounce` frame so the peer knows
    /// to pull it over `/rchat/file/1`.
    #[instrument(skip(self, file_name))]
    pub async fn send_file(
        &self,
        peer_id: PeerId,
        content_type: ContentType,
        file_hash: FileHash,
        size: u64,
        mime_hint: &str,
        file_name: &str,
    ) -> CoreResult<String> {
        if !self.store.is_trusted(&peer_id)? {
            return Err(CoreError::NotTrusted);
        }
        let msg_id = Ulid::new().to_string();
        let msg = ChatMessage {
            msg_id: msg_id.clone(),
            chat_id: peer_id.to_hex(),
            direction: Direction::Out,
            sender_peer_id: self.my_peer_id,
            content_type,
            text: None,
            file_hash: Some(file_hash),
            file_name: Some(file_name.to_string()),
            created_at: now(),
            status: MessageStatus::Pending,
        };
        self.store.insert_message(&msg)?;
        self.events.emit(Event::MessageStatusUpdated {
            msg_id: msg_id.clone(),
            status: MessageStatus::Pending,
        });
        self.try_flush_to_session(
            &peer_id,
            &msg_id,
            FrameKind::FileAnnounce {
                file_hash,
                size,
                mime_hint: mime_hint.to_string(),
                file_name: file_name.to_string(),
            },
        )
        .await?;
        Ok(msg_id)
    }

    /// `send_message_to_self`: never leaves the node, always `read`.
    pub fn send_message_to_self(&self, text: &str) -> CoreResult<String> {
        let msg_id = Ulid::new().to_string();
        let msg = ChatMessage {
            msg_id: msg_id.clone(),
            chat_id: "self".to_string(),
            direction: Direction::Out,
            sender_peer_id: self.my_peer_id,
            content_type: ContentType::Text,
            text: Some(text.to_string()),
            file_hash: None,
            file_name: None,
            created_at: now(),
            status: MessageStatus::Read,
        };
        self.store.insert_message(&msg)?;
        Ok(msg_id)
    }

    async fn try_flush_to_session(&self, peer_id: &PeerId, msg_id: &str, kind: FrameKind) -> CoreResult<()> {
        let Some(session) = self.sessions.get(peer_id) else {
            // No session yet — the message stays `pending` in the store
            // and a later `peer-connected` should trigger a flush of any
            // pending rows (see `flush_pending_for_peer`).
            return Ok(());
        };
        let frame = Frame {
            msg_id: msg_id.to_string(),
            kind,
        };
        match session.enqueue(frame.encode()?).await {
            Ok(()) => {
                self.store.advance_message_status(msg_id, MessageStatus::Sent)?;
                self.events.emit(Event::MessageStatusUpdated {
                    msg_id: msg_id.to_string(),
                    status: MessageStatus::Sent,
                });
                Ok(())
            }
            Err(CoreError::BackpressureExceeded) => Err(CoreError::BackpressureExceeded),
            Err(e) => {
                warn!(peer = %peer_id, error = %e, "send failed, message stays pending");
                Ok(())
            }
        }
    }

    /// Called once a session with `peer_id` becomes established: pumps
    /// every still-`pending` message for that chat through the session.
    pub async fn flush_pending_for_peer(&self, peer_id: &PeerId) -> CoreResult<()> {
        let history = self.store.get_chat_history(&peer_id.to_hex())?;
        for msg in history
            .into_iter()
            .filter(|m| m.direction == Direction::Out && m.status == MessageStatus::Pending)
        {
            if let Some(text) = msg.text.clone() {
                self.try_flush_to_session(peer_id, &msg.msg_id, FrameKind::Text { utf8_text: text })
                    .await?;
            }
        }
        Ok(())
    }

    /// Receive path: verifies session sequencing happens one layer below
    /// (in `SessionManager::receive`); this handles frame semantics once
    /// a frame has been authenticated and deduplicated by `rx_seq`.
    #[instrument(skip(self, frame_bytes))]
    pub async fn on_frame_received(&self, peer_id: PeerId, frame_bytes: &[u8]) -> CoreResult<()> {
        if !self.store.is_trusted(&peer_id)? {
            // Spec invariant 7: dropped after handshake, no persisted trace.
            return Ok(());
        }
        let frame = Frame::decode(frame_bytes)?;
        match frame.kind {
            FrameKind::Text { utf8_text } => {
                let msg = ChatMessage {
                    msg_id: frame.msg_id.clone(),
                    chat_id: peer_id.to_hex(),
                    direction: Direction::In,
                    sender_peer_id: peer_id,
                    content_type: ContentType::Text,
                    text: Some(utf8_text),
                    file_hash: None,
                    file_name: None,
                    created_at: now(),
                    status: MessageStatus::Delivered,
                };
                self.store.insert_message(&msg)?;
                self.events.emit(Event::MessageReceived { message: msg });
                self.send_receipt(&peer_id, &frame.msg_id, ReceiptStatus::Delivered).await?;
            }
            FrameKind::FileAnnounce {
                file_hash,
                size: _,
                mime_hint: _,
                file_name,
            } => {
                let msg = ChatMessage {
                    msg_id: frame.msg_id.clone(),
                    chat_id: peer_id.to_hex(),
                    direction: Direction::In,
                    sender_peer_id: peer_id,
                    content_type: ContentType::Document,
                    text: None,
                    file_hash: Some(file_hash),
                    file_name: Some(file_name),
                    created_at: now(),
                    status: MessageStatus::Delivered,
                };
                self.store.insert_message(&msg)?;
                self.events.emit(Event::MessageReceived { message: msg });
                self.send_receipt(&peer_id, &frame.msg_id, ReceiptStatus::Delivered).await?;
                // File bytes are pulled separately via the file-transfer
                // protocol (component J); the dispatcher kicks that off.
            }
            FrameKind::Receipt { refers_to_msg_id, status } => {
                let next = match status {
                    ReceiptStatus::Delivered => MessageStatus::Delivered,
                    ReceiptStatus::Read => MessageStatus::Read,
                };
                if self.store.advance_message_status(&refers_to_msg_id, next)? {
                    self.events.emit(Event::MessageStatusUpdated {
                        msg_id: refers_to_msg_id,
                        status: next,
                    });
                }
            }
            FrameKind::Typing | FrameKind::ProfileHint { .. } => {
                // Informational, not persisted.
            }
        }
        Ok(())
    }

    async fn send_receipt(&self, peer_id: &PeerId, refers_to_msg_id: &str, status: ReceiptStatus) -> CoreResult<()> {
        let Some(session) = self.sessions.get(peer_id) else {
            return Ok(());
        };
        let frame = Frame {
            msg_id: Ulid::new().to_string(),
            kind: FrameKind::Receipt {
                refers_to_msg_id: refers_to_msg_id.to_string(),
                status,
            },
        };
        session.enqueue(frame.encode()?).await
    }

    /// `mark_messages_read(chat_id)`: sends `receipt(read)` for every
    /// received message in that chat not yet acked.
    pub async fn mark_messages_read(&self, chat_id: &str) -> CoreResult<()> {
        if chat_id == "self" {
            return Ok(());
        }
        let Some(peer_id) = PeerId::from_hex(chat_id) else {
            return Err(CoreError::UnknownPeer);
        };
        let unread = self.store.unread_received_msg_ids(chat_id)?;
        for msg_id in unread {
            self.store.advance_message_status(&msg_id, MessageStatus::Read)?;
            self.send_receipt(&peer_id, &msg_id, ReceiptStatus::Read).await?;
        }
        Ok(())
    }
}

fn now() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_schedule_caps_at_60s() {
        assert_eq!(backoff_delay(0), Duration::from_secs(1));
        assert_eq!(backoff_delay(4), Duration::from_secs(60));
        assert_eq!(backoff_delay(100), Duration::from_secs(60));
    }

    #[test]
    fn frame_roundtrip() {
        let frame = Frame {
            msg_id: "01J0000000000000000000XYZ".into(),
            kind: FrameKind::Text {
                utf8_text: "ping".into(),
            },
        };
        let bytes = frame.encode().unwrap();
        let decoded = Frame::decode(&bytes).unwrap();
        assert_eq!(decoded.msg_id, frame.msg_id);
        assert!(matches!(decoded.kind, FrameKind::Text { .. }));
    }

    #[tokio::test]
    async fn self_chat_message_materializes_as_read() {
        let store = Arc::new(Store::open_in_memory().unwrap());
        let events = EventBus::new();
        let identity = Arc::new(crate::crypto::identity::IdentityKey::generate());
        let sessions = Arc::new(SessionManager::new(identity.clone()));
        let messaging = Messaging::new(store.clone(), events, sessions, identity.peer_id());
        messaging.send_message_to_self("hi me").unwrap();
        let history = store.get_chat_history("self").unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].text.as_deref(), Some("hi me"));
        assert_eq!(history[0].status, MessageStatus::Read);
    }

    #[tokio::test]
    async fn send_to_untrusted_peer_is_rejected() {
        let store = Arc::new(Store::open_in_memory().unwrap());
        let events = EventBus::new();
        let identity = Arc::new(crate::crypto::identity::IdentityKey::generate());
        let sessions = Arc::new(SessionManager::new(identity.clone()));
        let messaging = Messaging::new(store, events, sessions, identity.peer_id());
        let result = messaging.send_message(PeerId([9; 32]), "hello").await;
        assert!(matches!(result, Err(CoreError::NotTrusted)));
    }

    #[tokio::test]
    async fn received_frame_from_untrusted_peer_leaves_no_trace() {
        let store = Arc::new(Store::open_in_memory().unwrap());
        let events = EventBus::new();
        let identity = Arc::new(crate::crypto::identity::IdentityKey::generate());
        let sessions = Arc::new(SessionManager::new(identity.clone()));
        let messaging = Messaging::new(store.clone(), events, sessions, identity.peer_id());
        let stranger = PeerId([42; 32]);
        let frame = Frame {
            msg_id: "01J0000000000000000000AAA".into(),
            kind: FrameKind::Text {
                utf8_text: "ping".into(),
            },
        };
        messaging
            .on_frame_received(stranger, &frame.encode().unwrap())
            .await
            .unwrap();
        assert!(store.get_chat_history(&stranger.to_hex()).unwrap().is_empty());
    }
}
