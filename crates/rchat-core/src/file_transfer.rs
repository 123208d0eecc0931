//! File Transfer (component J): content-addressed, chunked request/response
//! over `/rchat/file/1`. Resumable, coalesced per `(peer, file_hash)`, with
//! throttled progress events and quarantine on hash mismatch.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::crypto::hash::{FileHash, RunningHash};
use crate::crypto::identity::PeerId;
use crate::error::{CoreError, CoreResult};
use crate::event::{Event, EventBus};

pub const DEFAULT_CHUNK_SIZE: usize = 64 * 1024;
pub const MAX_CHUNKS_IN_FLIGHT: usize = 16;
const PROGRESS_INTERVAL: Duration = Duration::from_millis(100); // 10 Hz cap

/// Frames on `/rchat/file/1`.
#[derive(Clone, Serialize, Deserialize)]
pub enum FileFrame {
    Request { file_hash: FileHash, offset: u64 },
    ResponseHeader { size: u64, chunk_size: u32 },
    Chunk { index: u64, bytes: Vec<u8> },
    End,
}

impl FileFrame {
    pub fn encode(&self) -> CoreResult<Vec<u8>> {
        Ok(postcard::to_stdvec(self)?)
    }

    pub fn decode(bytes: &[u8]) -> CoreResult<Self> {
        Ok(postcard::from_bytes(bytes)?)
    }
}

#[derive(Debug, PartialEq, Eq)]
pub enum TransferState {
    Pending,
    Downloading { bytes_received: u64, total_bytes: u64 },
    Complete(PathBuf),
    Failed(String),
    Sharing,
}

struct InFlight {
    state: TransferState,
    hasher: RunningHash,
    last_progress_emit: Option<Instant>,
}

/// One instance per node. Coalesces concurrent requests for the same
/// `(peer, file_hash)` by keying in-flight state on that pair.
pub struct TransferManager {
    events: EventBus,
    in_flight: Mutex<HashMap<(PeerId, FileHash), InFlight>>,
}

impl TransferManager {
    pub fn new(events: EventBus) -> Self {
        Self {
            events,
            in_flight: Mutex::new(HashMap::new()),
        }
    }

    /// Returns `true` if this is the request that should actually hit the
    /// wire (i.e. not a duplicate concurrent request for the same file
    /// from the same peer, which is coalesced into the existing one).
    ///
    /// `resumed_prefix` is the content of a partially-downloaded file
    /// already on disk (empty for a fresh download); it seeds the running
    /// hash so verification in `finish` covers the whole file, not just
    /// the bytes received this call.
    pub fn begin_request(&self, peer: PeerId, hash: FileHash, total: u64, resumed_prefix: &[u8]) -> bool {
        let mut map = self.in_flight.lock();
        if map.contains_key(&(peer, hash)) {
            return false;
        }
        let mut hasher = RunningHash::new();
        hasher.update(resumed_prefix);
        map.insert(
            (peer, hash),
            InFlight {
                state: TransferState::Downloading {
                    bytes_received: resumed_prefix.len() as u64,
                    total_bytes: total,
                },
                hasher,
                last_progress_emit: None,
            },
        );
        true
    }

    /// Feed a received chunk into the running hash and, time-budget
    /// permitting (no faster than 10 Hz), emit a progress event.
    pub fn on_chunk(&self, peer: PeerId, hash: FileHash, bytes: &[u8]) {
        let mut map = self.in_flight.lock();
        let Some(entry) = map.get_mut(&(peer, hash)) else {
            return;
        };
        entry.hasher.update(bytes);
        if let TransferState::Downloading { bytes_received, total_bytes } = &mut entry.state {
            *bytes_received += bytes.len() as u64;
            let should_emit = entry
                .last_progress_emit
                .map(|t| t.elapsed() >= PROGRESS_INTERVAL)
                .unwrap_or(true);
            if should_emit {
                self.events.emit(Event::FileTransferProgress {
                    file_hash: hash,
                    bytes_done: *bytes_received,
                    total: *total_bytes,
                });
                entry.last_progress_emit = Some(Instant::now());
            }
        }
    }

    /// Verify the running hash against the expected `file_hash` after
    /// `End`. On success, moves `downloaded_path` to `final_path`. On
    /// mismatch, moves it into `quarantine_dir` instead (§SPEC_FULL.md C.1)
    /// and emits `file-transfer-failed`. Either way the `(peer, hash)` entry
    /// is removed from `in_flight` so a later retry starts a fresh hasher
    /// rather than accumulating bytes on top of a failed attempt.
    pub fn finish(
        &self,
        peer: PeerId,
        hash: FileHash,
        downloaded_path: &std::path::Path,
        final_path: &std::path::Path,
        quarantine_dir: &std::path::Path,
    ) -> CoreResult<()> {
        let mut map = self.in_flight.lock();
        let Some(entry) = map.remove(&(peer, hash)) else {
            return Err(CoreError::NotFound);
        };
        let computed = entry.hasher.finalize();
        drop(map);
        if computed != hash {
            std::fs::create_dir_all(quarantine_dir)?;
            std::fs::rename(downloaded_path, quarantine_path(quarantine_dir, &hash))?;
            self.events.emit(Event::FileTransferFailed {
                file_hash: hash,
                reason: "hash mismatch — quarantined".into(),
            });
            return Err(CoreError::Conflict("file hash mismatch".into()));
        }
        if let Some(parent) = final_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::rename(downloaded_path, final_path)?;
        self.events.emit(Event::FileTransferComplete { file_hash: hash });
        Ok(())
    }

    pub fn mark_sharing(&self, peer: PeerId, hash: FileHash) {
        self.in_flight.lock().insert(
            (peer, hash),
            InFlight {
                state: TransferState::Sharing,
                hasher: RunningHash::new(),
                last_progress_emit: None,
            },
        );
    }

    pub fn state_of(&self, peer: PeerId, hash: FileHash) -> Option<String> {
        self.in_flight
            .lock()
            .get(&(peer, hash))
            .map(|e| format!("{:?}", e.state))
    }
}

/// The quarantine path for a file that fails hash verification after a
/// tampered re-request (spec invariant 8 / S5).
pub fn quarantine_path(quarantine_dir: &std::path::Path, hash: &FileHash) -> PathBuf {
    quarantine_dir.join(hash.to_hex())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn concurrent_requests_for_same_file_are_coalesced() {
        let events = EventBus::new();
        let mgr = TransferManager::new(events);
        let peer = PeerId([1; 32]);
        let hash = FileHash::of(b"contents");
        assert!(mgr.begin_request(peer, hash, 8, b""));
        assert!(!mgr.begin_request(peer, hash, 8, b""));
    }

    #[test]
    fn hash_mismatch_fails_and_quarantines() {
        let dir = tempdir().unwrap();
        let downloaded = dir.path().join("downloaded");
        std::fs::write(&downloaded, b"different").unwrap();
        let quarantine_dir = dir.path().join("quarantine");

        let events = EventBus::new();
        let mgr = TransferManager::new(events);
        let peer = PeerId([2; 32]);
        let hash = FileHash::of(b"expected");
        mgr.begin_request(peer, hash, 9, b"");
        mgr.on_chunk(peer, hash, b"different");
        let result = mgr.finish(peer, hash, &downloaded, &dir.path().join("final"), &quarantine_dir);
        assert!(result.is_err());
        assert!(!downloaded.exists());
        assert!(quarantine_path(&quarantine_dir, &hash).exists());
    }

    #[test]
    fn mismatch_then_retry_starts_a_fresh_hasher() {
        let dir = tempdir().unwrap();
        let downloaded = dir.path().join("downloaded");
        let quarantine_dir = dir.path().join("quarantine");
        let final_path = dir.path().join("final");

        let events = EventBus::new();
        let mgr = TransferManager::new(events);
        let peer = PeerId([4; 32]);
        let hash = FileHash::of(b"hello world");

        std::fs::write(&downloaded, b"corrupted").unwrap();
        assert!(mgr.begin_request(peer, hash, 11, b""));
        mgr.on_chunk(peer, hash, b"corrupted");
        assert!(mgr.finish(peer, hash, &downloaded, &final_path, &quarantine_dir).is_err());

        std::fs::write(&downloaded, b"hello world").unwrap();
        assert!(mgr.begin_request(peer, hash, 11, b""));
        mgr.on_chunk(peer, hash, b"hello world");
        assert!(mgr.finish(peer, hash, &downloaded, &final_path, &quarantine_dir).is_ok());
        assert!(final_path.exists());
    }

    #[test]
    fn matching_hash_completes() {
        let dir = tempdir().unwrap();
        let downloaded = dir.path().join("downloaded");
        std::fs::write(&downloaded, b"hello world").unwrap();
        let final_path = dir.path().join("final");
        let quarantine_dir = dir.path().join("quarantine");

        let events = EventBus::new();
        let mgr = TransferManager::new(events);
        let peer = PeerId([3; 32]);
        let hash = FileHash::of(b"hello world");
        mgr.begin_request(peer, hash, 11, b"");
        mgr.on_chunk(peer, hash, b"hello world");
        assert!(mgr.finish(peer, hash, &downloaded, &final_path, &quarantine_dir).is_ok());
        assert!(final_path.exists());
    }

    #[test]
    fn file_frame_roundtrip() {
        let frame = FileFrame::Request {
            file_hash: FileHash::of(b"x"),
            offset: 1024,
        };
        let bytes = frame.encode().unwrap();
        let decoded = FileFrame::decode(&bytes).unwrap();
        match decoded {
            FileFrame::Request { offset, .. } => assert_eq!(offset, 1024),
            _ => panic!("expected Request"),
        }
    }
}
