//! `Stickers` repository: FileObjects constrained to WebP, <= 1 MiB.

use rusqlite::params;

use crate::crypto::hash::FileHash;
use crate::error::CoreResult;

use super::types::Sticker;
use super::Store;

pub const MAX_STICKER_BYTES: u64 = 1024 * 1024;

/// A WebP file is a RIFF container: bytes 0..4 are `RIFF`, 8..12 are
/// `WEBP` (4..8 is the RIFF chunk size, which we don't need to check).
pub fn is_webp(bytes: &[u8]) -> bool {
    bytes.len() >= 12 && &bytes[0..4] == b"RIFF" && &bytes[8..12] == b"WEBP"
}

impl Store {
    pub fn add_sticker(&self, hash: FileHash, name: &str, created_at: i64, size_bytes: u64) -> CoreResult<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT OR REPLACE INTO stickers (file_hash, name, created_at, size_bytes)
             VALUES (?1, ?2, ?3, ?4)",
            params![hash.to_hex(), name, created_at, size_bytes],
        )?;
        Ok(())
    }

    pub fn delete_sticker(&self, hash: &FileHash) -> CoreResult<()> {
        let conn = self.conn.lock();
        conn.execute(
            "DELETE FROM stickers WHERE file_hash = ?1",
            params![hash.to_hex()],
        )?;
        Ok(())
    }

    pub fn get_stickers(&self) -> CoreResult<Vec<Sticker>> {
        let conn = self.conn.lock();
        let mut stmt =
            conn.prepare("SELECT file_hash, name, created_at, size_bytes FROM stickers ORDER BY created_at ASC")?;
        let rows = stmt.query_map([], |r| {
            let hex: String = r.get(0)?;
            Ok(Sticker {
                file_hash: FileHash::from_hex(&hex).unwrap_or(FileHash([0; 32])),
                name: r.get(1)?,
                created_at: r.get(2)?,
                size_bytes: r.get(3)?,
            })
        })?;
        rows.collect::<Result<_, _>>().map_err(Into::into)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_and_list_stickers() {
        let store = Store::open_in_memory().unwrap();
        let hash = FileHash::of(b"sticker bytes");
        store.add_sticker(hash, "wave", 0, 2048).unwrap();
        let stickers = store.get_stickers().unwrap();
        assert_eq!(stickers.len(), 1);
        assert_eq!(stickers[0].name, "wave");
    }

    #[test]
    fn recognizes_webp_header() {
        let mut webp = b"RIFF".to_vec();
        webp.extend_from_slice(&[0, 0, 0, 0]);
        webp.extend_from_slice(b"WEBP");
        assert!(is_webp(&webp));
    }

    #[test]
    fn rejects_non_webp() {
        assert!(!is_webp(b"not a webp file at all"));
        assert!(!is_webp(b"short"));
    }
}
