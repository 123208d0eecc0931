//! Row types shared by the store's repositories and the event bus.

use serde::{Deserialize, Serialize};

use crate::crypto::hash::FileHash;
use crate::crypto::identity::PeerId;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TrustedPeer {
    pub peer_id: PeerId,
    pub display_handle: String,
    pub added_at: i64,
    pub pinned: bool,
    pub order_index: i64,
    pub envelope_id: Option<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Envelope {
    pub id: String,
    pub name: String,
    pub icon: String,
    pub created_at: i64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
    Out,
    In,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ContentType {
    Text,
    Image,
    Document,
    Video,
    Sticker,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum MessageStatus {
    Pending,
    Sent,
    Delivered,
    Read,
    Failed,
}

impl MessageStatus {
    /// Spec invariant 1: status transitions respect the partial order
    /// `{pending ≺ sent ≺ delivered ≺ read}`; `failed` only succeeds
    /// `pending`. Returns whether `self -> next` is a legal forward move.
    pub fn can_advance_to(self, next: MessageStatus) -> bool {
        use MessageStatus::*;
        matches!(
            (self, next),
            (Pending, Sent) | (Pending, Failed) | (Sent, Delivered) | (Delivered, Read)
        )
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ChatMessage {
    pub msg_id: String,
    pub chat_id: String,
    pub direction: Direction,
    pub sender_peer_id: PeerId,
    pub content_type: ContentType,
    pub text: Option<String>,
    pub file_hash: Option<FileHash>,
    pub file_name: Option<String>,
    pub created_at: i64,
    pub status: MessageStatus,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum FileOrigin {
    SelfOrigin,
    Peer(PeerId),
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FileObject {
    pub hash: FileHash,
    pub size_bytes: u64,
    pub mime_hint: String,
    pub local_path: String,
    pub first_seen: i64,
    pub origin: FileOrigin,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Sticker {
    pub file_hash: FileHash,
    pub name: String,
    pub created_at: i64,
    pub size_bytes: u64,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct UserProfile {
    pub alias: Option<String>,
    pub avatar_ref: Option<String>,
}
