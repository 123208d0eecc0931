//! `Envelopes` repository: UI folders grouping chats.

use rusqlite::params;

use crate::error::{CoreError, CoreResult};


use super::types::Envelope;
use super::Store;

impl Store {
    pub fn create_envelope(&self, id: &str, name: &str, icon: &str, created_at: i64) -> CoreResult<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO envelopes (id, name, icon, created_at) VALUES (?1, ?2, ?3, ?4)",
            params![id, name, icon, created_at],
        )
        .map_err(|e| match e {
            rusqlite::Error::SqliteFailure(err, _) if err.code == rusqlite::ErrorCode::ConstraintViolation => {
                CoreError::Conflict(format!("envelope {id} already exists"))
            }
            other => other.into(),
        })?;
        Ok(())
    }

    pub fn update_envelope(&self, id: &str, name: &str, icon: &str) -> CoreResult<()> {
        let conn = self.conn.lock();
        let affected = conn.execute(
            "UPDATE envelopes SET name = ?1, icon = ?2 WHERE id = ?3",
            params![name, icon, id],
        )?;
        if affected == 0 {
            return Err(CoreError::NotFound);
        }
        Ok(())
    }

    /// Deletes an envelope and reassigns member chats to the root bucket,
    /// atomically.
    pub fn delete_envelope(&self, id: &str) -> CoreResult<()> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        let affected = tx.execute("DELETE FROM envelopes WHERE id = ?1", params![id])?;
        if affected == 0 {
            return Err(CoreError::NotFound);
        }
        tx.execute(
            "UPDATE peers SET envelope_id = NULL WHERE envelope_id = ?1",
            params![id],
        )?;
        tx.commit()?;
        Ok(())
    }

    pub fn get_envelopes(&self) -> CoreResult<Vec<Envelope>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare("SELECT id, name, icon, created_at FROM envelopes ORDER BY created_at ASC")?;
        let rows = stmt.query_map([], |r| {
            Ok(Envelope {
                id: r.get(0)?,
                name: r.get(1)?,
                icon: r.get(2)?,
                created_at: r.get(3)?,
            })
        })?;
        rows.collect::<Result<_, _>>().map_err(Into::into)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delete_envelope_reassigns_members() {
        let store = Store::open_in_memory().unwrap();
        store.create_envelope("work", "Work", "briefcase", 0).unwrap();
        let peer = crate::crypto::identity::PeerId([3; 32]);
        store.insert_trusted_peer(peer, "bob", 0).unwrap();
        store.move_chat_to_envelope(&peer, Some("work")).unwrap();
        store.delete_envelope("work").unwrap();
        let (_, env) = store
            .get_chat_assignments()
            .unwrap()
            .into_iter()
            .find(|(p, _)| *p == peer)
            .unwrap();
        assert_eq!(env, None);
    }

    #[test]
    fn duplicate_envelope_id_conflicts() {
        let store = Store::open_in_memory().unwrap();
        store.create_envelope("x", "X", "icon", 0).unwrap();
        assert!(matches!(
            store.create_envelope("x", "X2", "icon", 0),
            Err(CoreError::Conflict(_))
        ));
    }
}
