//! Internet rendezvous (component F.2): signed presence records published
//! to and polled from an untrusted HTTPS blob store, for peers outside the
//! local mDNS broadcast domain.
//!
//! The directory itself is never trusted — every record fetched back is
//! verified against the claimed `PeerId`'s public key before use, and
//! records older than [`FRESHNESS_WINDOW`] are discarded regardless of
//! signature validity.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::crypto::identity::{self, IdentityKey, PeerId};
use crate::error::{CoreError, CoreResult};

/// Spec §"Discovery — rendezvous": records older than this are ignored.
pub const FRESHNESS_WINDOW: Duration = Duration::from_secs(15 * 60);

/// Spec §"Discovery — rendezvous": minimum publish interval.
pub const MIN_PUBLISH_INTERVAL: Duration = Duration::from_secs(60);

/// The signed payload, as published to and read from the directory. The
/// signature covers the postcard encoding of every other field.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PresenceRecord {
    pub peer_id: PeerId,
    pub addrs: Vec<String>,
    pub issued_at: u64,
    pub signature: Vec<u8>,
}

#[derive(Serialize, Deserialize)]
struct SignedBody {
    peer_id: PeerId,
    addrs: Vec<String>,
    issued_at: u64,
}

impl PresenceRecord {
    fn signed_bytes(peer_id: PeerId, addrs: &[String], issued_at: u64) -> CoreResult<Vec<u8>> {
        let body = SignedBody {
            peer_id,
            addrs: addrs.to_vec(),
            issued_at,
        };
        Ok(postcard::to_allocvec(&body)?)
    }

    pub fn sign(identity: &IdentityKey, addrs: Vec<String>) -> CoreResult<Self> {
        let peer_id = identity.peer_id();
        let issued_at = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs();
        let bytes = Self::signed_bytes(peer_id, &addrs, issued_at)?;
        let signature = identity.sign(&bytes).to_bytes().to_vec();
        Ok(Self {
            peer_id,
            addrs,
            issued_at,
            signature,
        })
    }

    /// Verifies the signature and freshness window. Does not check that
    /// `peer_id` is one we trust — that's the caller's job, since a valid
    /// but untrusted record is not an error, just not actionable yet.
    pub fn verify(&self) -> CoreResult<()> {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs();
        if now.saturating_sub(self.issued_at) > FRESHNESS_WINDOW.as_secs() {
            return Err(CoreError::InviteExpired);
        }
        let bytes = Self::signed_bytes(self.peer_id, &self.addrs, self.issued_at)?;
        let sig_bytes: [u8; 64] = self
            .signature
            .as_slice()
            .try_into()
            .map_err(|_| CoreError::InvalidPassword)?;
        let sig = ed25519_dalek::Signature::from_bytes(&sig_bytes);
        if !identity::verify(&self.peer_id, &bytes, &sig) {
            return Err(CoreError::IdentityMismatch);
        }
        Ok(())
    }
}

/// Thin HTTP client over the directory. Each peer owns one object, keyed
/// by its hex `PeerId`, under `{base_url}/{peer_id}`.
#[derive(Clone)]
pub struct RendezvousClient {
    http: reqwest::Client,
    base_url: String,
}

impl RendezvousClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into(),
        }
    }

    fn object_url(&self, peer: &PeerId) -> String {
        format!("{}/{}", self.base_url.trim_end_matches('/'), peer.to_hex())
    }

    pub async fn publish(&self, record: &PresenceRecord) -> CoreResult<()> {
        self.http
            .put(self.object_url(&record.peer_id))
            .json(record)
            .send()
            .await
            .map_err(|e| CoreError::DialFailed(e.to_string()))?
            .error_for_status()
            .map_err(|e| CoreError::DialFailed(e.to_string()))?;
        Ok(())
    }

    /// Fetches and verifies a peer's published record. `Ok(None)` means the
    /// directory has nothing for this peer yet, which is not an error.
    pub async fn poll(&self, peer: &PeerId) -> CoreResult<Option<PresenceRecord>> {
        let resp = self
            .http
            .get(self.object_url(peer))
            .send()
            .await
            .map_err(|e| CoreError::DialFailed(e.to_string()))?;
        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let record: PresenceRecord = resp
            .error_for_status()
            .map_err(|e| CoreError::DialFailed(e.to_string()))?
            .json()
            .await
            .map_err(|e| CoreError::Serde(e.to_string()))?;
        if record.peer_id != *peer {
            return Err(CoreError::IdentityMismatch);
        }
        record.verify()?;
        Ok(Some(record))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_record_verifies() {
        let identity = IdentityKey::generate();
        let record = PresenceRecord::sign(&identity, vec!["203.0.113.1:4000".into()]).unwrap();
        record.verify().unwrap();
    }

    #[test]
    fn tampered_addrs_fail_verification() {
        let identity = IdentityKey::generate();
        let mut record = PresenceRecord::sign(&identity, vec!["203.0.113.1:4000".into()]).unwrap();
        record.addrs.push("198.51.100.9:4000".into());
        assert!(matches!(record.verify(), Err(CoreError::IdentityMismatch)));
    }

    #[test]
    fn stale_record_is_rejected() {
        let identity = IdentityKey::generate();
        let mut record = PresenceRecord::sign(&identity, vec![]).unwrap();
        record.issued_at -= FRESHNESS_WINDOW.as_secs() + 1;
        assert!(matches!(record.verify(), Err(CoreError::InviteExpired)));
    }
}
