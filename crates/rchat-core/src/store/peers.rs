//! `Peers` repository: trust list, pinning, envelope assignment.

use rusqlite::params;

use crate::crypto::identity::PeerId;
use crate::error::{CoreError, CoreResult};

use super::types::TrustedPeer;
use super::Store;

impl Store {
    pub fn insert_trusted_peer(
        &self,
        peer_id: PeerId,
        display_handle: &str,
        added_at: i64,
    ) -> CoreResult<()> {
        let conn = self.conn.lock();
        let next_order: i64 = conn.query_row(
            "SELECT COALESCE(MAX(order_index), -1) + 1 FROM peers",
            [],
            |r| r.get(0),
        )?;
        conn.execute(
            "INSERT OR IGNORE INTO peers (peer_id, display_handle, added_at, pinned, order_index, envelope_id)
             VALUES (?1, ?2, ?3, 0, ?4, NULL)",
            params![peer_id.to_hex(), display_handle, added_at, next_order],
        )?;
        Ok(())
    }

    pub fn get_trusted_peers(&self) -> CoreResult<Vec<TrustedPeer>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT peer_id, display_handle, added_at, pinned, order_index, envelope_id
             FROM peers ORDER BY order_index ASC",
        )?;
        let rows = stmt.query_map([], row_to_peer)?;
        rows.collect::<Result<_, _>>().map_err(Into::into)
    }

    pub fn is_trusted(&self, peer_id: &PeerId) -> CoreResult<bool> {
        let conn = self.conn.lock();
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM peers WHERE peer_id = ?1",
            params![peer_id.to_hex()],
            |r| r.get(0),
        )?;
        Ok(count > 0)
    }

    /// Deletes a peer and everything derived from the relationship — run in
    /// a single transaction so partial application is never observable.
    pub fn delete_peer(&self, peer_id: &PeerId) -> CoreResult<()> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        let hex = peer_id.to_hex();
        let affected = tx.execute("DELETE FROM peers WHERE peer_id = ?1", params![hex])?;
        if affected == 0 {
            return Err(CoreError::UnknownPeer);
        }
        tx.execute("DELETE FROM messages WHERE chat_id = ?1", params![hex])?;
        tx.execute(
            "DELETE FROM chat_latest_times WHERE chat_id = ?1",
            params![hex],
        )?;
        tx.execute("DELETE FROM outbox_frames WHERE peer_id = ?1", params![hex])?;
        tx.commit()?;
        Ok(())
    }

    pub fn set_peer_pinned(&self, peer_id: &PeerId, pinned: bool) -> CoreResult<()> {
        let conn = self.conn.lock();
        let affected = conn.execute(
            "UPDATE peers SET pinned = ?1 WHERE peer_id = ?2",
            params![pinned, peer_id.to_hex()],
        )?;
        if affected == 0 {
            return Err(CoreError::UnknownPeer);
        }
        Ok(())
    }

    pub fn get_pinned_peers(&self) -> CoreResult<Vec<PeerId>> {
        let conn = self.conn.lock();
        let mut stmt =
            conn.prepare("SELECT peer_id FROM peers WHERE pinned = 1 ORDER BY order_index ASC")?;
        let rows = stmt.query_map([], |r| r.get::<_, String>(0))?;
        let mut out = Vec::new();
        for r in rows {
            if let Some(id) = PeerId::from_hex(&r?) {
                out.push(id);
            }
        }
        Ok(out)
    }

    pub fn move_chat_to_envelope(
        &self,
        peer_id: &PeerId,
        envelope_id: Option<&str>,
    ) -> CoreResult<()> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        if let Some(id) = envelope_id {
            let exists: i64 =
                tx.query_row("SELECT COUNT(*) FROM envelopes WHERE id = ?1", params![id], |r| {
                    r.get(0)
                })?;
            if exists == 0 {
                return Err(CoreError::NotFound);
            }
        }
        let affected = tx.execute(
            "UPDATE peers SET envelope_id = ?1 WHERE peer_id = ?2",
            params![envelope_id, peer_id.to_hex()],
        )?;
        if affected == 0 {
            return Err(CoreError::UnknownPeer);
        }
        tx.commit()?;
        Ok(())
    }

    pub fn get_chat_assignments(&self) -> CoreResult<Vec<(PeerId, Option<String>)>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare("SELECT peer_id, envelope_id FROM peers")?;
        let rows = stmt.query_map([], |r| {
            Ok((r.get::<_, String>(0)?, r.get::<_, Option<String>>(1)?))
        })?;
        let mut out = Vec::new();
        for r in rows {
            let (hex, env) = r?;
            if let Some(id) = PeerId::from_hex(&hex) {
                out.push((id, env));
            }
        }
        Ok(out)
    }
}

fn row_to_peer(row: &rusqlite::Row<'_>) -> rusqlite::Result<TrustedPeer> {
    let hex: String = row.get(0)?;
    let peer_id = PeerId::from_hex(&hex).unwrap_or(PeerId([0; 32]));
    Ok(TrustedPeer {
        peer_id,
        display_handle: row.get(1)?,
        added_at: row.get(2)?,
        pinned: row.get(3)?,
        order_index: row.get(4)?,
        envelope_id: row.get(5)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_and_delete_peer_is_transactional() {
        let store = Store::open_in_memory().unwrap();
        let peer = PeerId([1; 32]);
        store.insert_trusted_peer(peer, "bob", 100).unwrap();
        assert!(store.is_trusted(&peer).unwrap());
        store.delete_peer(&peer).unwrap();
        assert!(!store.is_trusted(&peer).unwrap());
    }

    #[test]
    fn delete_unknown_peer_errors() {
        let store = Store::open_in_memory().unwrap();
        assert!(matches!(
            store.delete_peer(&PeerId([9; 32])),
            Err(CoreError::UnknownPeer)
        ));
    }

    #[test]
    fn pin_roundtrip() {
        let store = Store::open_in_memory().unwrap();
        let peer = PeerId([2; 32]);
        store.insert_trusted_peer(peer, "alice", 0).unwrap();
        store.set_peer_pinned(&peer, true).unwrap();
        assert_eq!(store.get_pinned_peers().unwrap(), vec![peer]);
    }
}
