//! Content hashing for the content-addressed file store.
//!
//! BLAKE3 is the one hash function used throughout — fixed at build time
//! per the data model's `H = SHA-256 or BLAKE3` note.

use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FileHash(pub [u8; 32]);

impl FileHash {
    pub fn of(bytes: &[u8]) -> Self {
        Self(*blake3::hash(bytes).as_bytes())
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn from_hex(s: &str) -> Option<Self> {
        let bytes = hex::decode(s).ok()?;
        let arr: [u8; 32] = bytes.try_into().ok()?;
        Some(Self(arr))
    }

    /// The first two hex chars, used as the on-disk shard prefix:
    /// `files/<prefix>/<hash>`.
    pub fn prefix(&self) -> String {
        self.to_hex()[..2].to_string()
    }
}

impl fmt::Display for FileHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl fmt::Debug for FileHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FileHash({}…)", &self.to_hex()[..10])
    }
}

/// Incremental hasher for streaming chunk verification during file transfer.
pub struct RunningHash(blake3::Hasher);

impl RunningHash {
    pub fn new() -> Self {
        Self(blake3::Hasher::new())
    }

    pub fn update(&mut self, chunk: &[u8]) {
        self.0.update(chunk);
    }

    pub fn finalize(&self) -> FileHash {
        FileHash(*self.0.finalize().as_bytes())
    }
}

impl Default for RunningHash {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_is_deterministic() {
        assert_eq!(FileHash::of(b"hello"), FileHash::of(b"hello"));
        assert_ne!(FileHash::of(b"hello"), FileHash::of(b"world"));
    }

    #[test]
    fn running_hash_matches_oneshot() {
        let mut running = RunningHash::new();
        running.update(b"hel");
        running.update(b"lo");
        assert_eq!(running.finalize(), FileHash::of(b"hello"));
    }

    #[test]
    fn hex_roundtrip() {
        let h = FileHash::of(b"roundtrip");
        assert_eq!(FileHash::from_hex(&h.to_hex()).unwrap(), h);
    }
}
