//! `Files` repository: content-addressed blob metadata.

use rusqlite::{params, OptionalExtension};

use crate::crypto::hash::FileHash;
use crate::crypto::identity::PeerId;
use crate::error::CoreResult;

use super::types::{FileObject, FileOrigin};
use super::Store;

impl Store {
    pub fn upsert_file(&self, file: &FileObject) -> CoreResult<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO files (hash, size_bytes, mime_hint, local_path, first_seen, origin)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT(hash) DO UPDATE SET local_path = excluded.local_path",
            params![
                file.hash.to_hex(),
                file.size_bytes,
                file.mime_hint,
                file.local_path,
                file.first_seen,
                origin_str(&file.origin),
            ],
        )?;
        Ok(())
    }

    pub fn get_file(&self, hash: &FileHash) -> CoreResult<Option<FileObject>> {
        let conn = self.conn.lock();
        conn.query_row(
            "SELECT hash, size_bytes, mime_hint, local_path, first_seen, origin
             FROM files WHERE hash = ?1",
            params![hash.to_hex()],
            row_to_file,
        )
        .optional()
        .map_err(Into::into)
    }

    pub fn remove_file(&self, hash: &FileHash) -> CoreResult<()> {
        let conn = self.conn.lock();
        conn.execute("DELETE FROM files WHERE hash = ?1", params![hash.to_hex()])?;
        Ok(())
    }
}

fn origin_str(o: &FileOrigin) -> String {
    match o {
        FileOrigin::SelfOrigin => "self".to_string(),
        FileOrigin::Peer(p) => p.to_hex(),
    }
}

fn row_to_file(row: &rusqlite::Row<'_>) -> rusqlite::Result<FileObject> {
    let hash_hex: String = row.get(0)?;
    let origin_raw: String = row.get(5)?;
    let origin = if origin_raw == "self" {
        FileOrigin::SelfOrigin
    } else {
        FileOrigin::Peer(PeerId::from_hex(&origin_raw).unwrap_or(PeerId([0; 32])))
    };
    Ok(FileObject {
        hash: FileHash::from_hex(&hash_hex).unwrap_or(FileHash([0; 32])),
        size_bytes: row.get(1)?,
        mime_hint: row.get(2)?,
        local_path: row.get(3)?,
        first_seen: row.get(4)?,
        origin,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn upsert_and_get_roundtrip() {
        let store = Store::open_in_memory().unwrap();
        let hash = FileHash::of(b"bytes");
        let file = FileObject {
            hash,
            size_bytes: 5,
            mime_hint: "image/png".into(),
            local_path: "files/ab/abcd".into(),
            first_seen: 0,
            origin: FileOrigin::SelfOrigin,
        };
        store.upsert_file(&file).unwrap();
        let got = store.get_file(&hash).unwrap().unwrap();
        assert_eq!(got.local_path, "files/ab/abcd");
    }
}
