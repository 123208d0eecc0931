//! `Messages` repository: the append-only chat log and its status machine.

use rusqlite::{params, OptionalExtension};
use std::collections::HashMap;

use crate::crypto::hash::FileHash;
use crate::crypto::identity::PeerId;
use crate::error::CoreResult;

use super::types::{ChatMessage, ContentType, Direction, MessageStatus};
use super::Store;

impl Store {
    /// Idempotent on `msg_id`: a second insert with an identical id is a
    /// no-op, not an error (spec invariant 3).
    pub fn insert_message(&self, msg: &ChatMessage) -> CoreResult<()> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        let inserted = tx.execute(
            "INSERT OR IGNORE INTO messages
             (msg_id, chat_id, direction, sender_peer_id, content_type, text, file_hash, file_name, created_at, status)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                msg.msg_id,
                msg.chat_id,
                direction_str(msg.direction),
                msg.sender_peer_id.to_hex(),
                content_type_str(msg.content_type),
                msg.text,
                msg.file_hash.map(|h| h.to_hex()),
                msg.file_name,
                msg.created_at,
                status_str(msg.status),
            ],
        )?;
        if inserted > 0 {
            tx.execute(
                "INSERT INTO chat_latest_times (chat_id, last_message_unix) VALUES (?1, ?2)
                 ON CONFLICT(chat_id) DO UPDATE SET last_message_unix = MAX(last_message_unix, excluded.last_message_unix)",
                params![msg.chat_id, msg.created_at],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    /// Advances `msg_id`'s status iff `status < next` in the partial order
    /// `{pending ≺ sent ≺ delivered ≺ read}` (`failed` only from `pending`).
    /// Out-of-order events that would move backward are silently discarded.
    pub fn advance_message_status(&self, msg_id: &str, next: MessageStatus) -> CoreResult<bool> {
        let conn = self.conn.lock();
        let current: Option<String> = conn
            .query_row(
                "SELECT status FROM messages WHERE msg_id = ?1",
                params![msg_id],
                |r| r.get(0),
            )
            .optional()?;
        let Some(current) = current else {
            return Ok(false);
        };
        let current = parse_status(&current);
        if !current.can_advance_to(next) {
            return Ok(false);
        }
        conn.execute(
            "UPDATE messages SET status = ?1 WHERE msg_id = ?2",
            params![status_str(next), msg_id],
        )?;
        Ok(true)
    }

    /// Returns messages sorted by `msg_id` ascending (ULIDs are
    /// lexicographically time-sortable).
    pub fn get_chat_history(&self, chat_id: &str) -> CoreResult<Vec<ChatMessage>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT msg_id, chat_id, direction, sender_peer_id, content_type, text, file_hash,
                    file_name, created_at, status
             FROM messages WHERE chat_id = ?1 ORDER BY msg_id ASC",
        )?;
        let rows = stmt.query_map(params![chat_id], row_to_message)?;
        rows.collect::<Result<_, _>>().map_err(Into::into)
    }

    pub fn get_chat_latest_times(&self) -> CoreResult<HashMap<String, i64>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare("SELECT chat_id, last_message_unix FROM chat_latest_times")?;
        let rows = stmt.query_map([], |r| Ok((r.get::<_, String>(0)?, r.get::<_, i64>(1)?)))?;
        rows.collect::<Result<_, _>>().map_err(Into::into)
    }

    /// All received messages in `chat_id` not yet acked with `read`, for
    /// `mark_messages_read`.
    pub fn unread_received_msg_ids(&self, chat_id: &str) -> CoreResult<Vec<String>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT msg_id FROM messages
             WHERE chat_id = ?1 AND direction = 'in' AND status != 'read'",
        )?;
        let rows = stmt.query_map(params![chat_id], |r| r.get::<_, String>(0))?;
        rows.collect::<Result<_, _>>().map_err(Into::into)
    }
}

fn direction_str(d: Direction) -> &'static str {
    match d {
        Direction::Out => "out",
        Direction::In => "in",
    }
}

fn content_type_str(c: ContentType) -> &'static str {
    match c {
        ContentType::Text => "text",
        ContentType::Image => "image",
        ContentType::Document => "document",
        ContentType::Video => "video",
        ContentType::Sticker => "sticker",
    }
}

fn status_str(s: MessageStatus) -> &'static str {
    match s {
        MessageStatus::Pending => "pending",
        MessageStatus::Sent => "sent",
        MessageStatus::Delivered => "delivered",
        MessageStatus::Read => "read",
        MessageStatus::Failed => "failed",
    }
}

fn parse_status(s: &str) -> MessageStatus {
    match s {
        "sent" => MessageStatus::Sent,
        "delivered" => MessageStatus::Delivered,
        "read" => MessageStatus::Read,
        "failed" => MessageStatus::Failed,
        _ => MessageStatus::Pending,
    }
}

fn row_to_message(row: &rusqlite::Row<'_>) -> rusqlite::Result<ChatMessage> {
    let direction = match row.get::<_, String>(2)?.as_str() {
        "in" => Direction::In,
        _ => Direction::Out,
    };
    let content_type = match row.get::<_, String>(4)?.as_str() {
        "image" => ContentType::Image,
        "document" => ContentType::Document,
        "video" => ContentType::Video,
        "sticker" => ContentType::Sticker,
        _ => ContentType::Text,
    };
    let sender_hex: String = row.get(3)?;
    let file_hash: Option<String> = row.get(6)?;
    Ok(ChatMessage {
        msg_id: row.get(0)?,
        chat_id: row.get(1)?,
        direction,
        sender_peer_id: PeerId::from_hex(&sender_hex).unwrap_or(PeerId([0; 32])),
        content_type,
        text: row.get(5)?,
        file_hash: file_hash.and_then(|h| FileHash::from_hex(&h)),
        file_name: row.get(7)?,
        created_at: row.get(8)?,
        status: parse_status(&row.get::<_, String>(9)?),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(msg_id: &str) -> ChatMessage {
        ChatMessage {
            msg_id: msg_id.to_string(),
            chat_id: "self".into(),
            direction: Direction::Out,
            sender_peer_id: PeerId([0; 32]),
            content_type: ContentType::Text,
            text: Some("hi me".into()),
            file_hash: None,
            file_name: None,
            created_at: 1000,
            status: MessageStatus::Read,
        }
    }

    #[test]
    fn double_insert_is_idempotent() {
        let store = Store::open_in_memory().unwrap();
        let msg = sample("01J000000000000000000000AA");
        store.insert_message(&msg).unwrap();
        store.insert_message(&msg).unwrap();
        assert_eq!(store.get_chat_history("self").unwrap().len(), 1);
    }

    #[test]
    fn status_only_advances_forward() {
        let store = Store::open_in_memory().unwrap();
        let mut msg = sample("01J000000000000000000000BB");
        msg.status = MessageStatus::Pending;
        store.insert_message(&msg).unwrap();
        assert!(store
            .advance_message_status(&msg.msg_id, MessageStatus::Sent)
            .unwrap());
        // Backward move is rejected.
        assert!(!store
            .advance_message_status(&msg.msg_id, MessageStatus::Pending)
            .unwrap());
        assert!(store
            .advance_message_status(&msg.msg_id, MessageStatus::Delivered)
            .unwrap());
        assert!(store
            .advance_message_status(&msg.msg_id, MessageStatus::Read)
            .unwrap());
    }

    #[test]
    fn history_sorted_by_msg_id() {
        let store = Store::open_in_memory().unwrap();
        store.insert_message(&sample("01J0000000000000000000ZZZ")).unwrap();
        store.insert_message(&sample("01J0000000000000000000AAA")).unwrap();
        let history = store.get_chat_history("self").unwrap();
        assert!(history[0].msg_id < history[1].msg_id);
    }
}
