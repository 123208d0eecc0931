//! Invitation Engine (component K): pairwise out-of-band invite issuance
//! and redemption over a per-invite encrypted channel.

use std::collections::HashMap;
use std::time::{Duration, SystemTime};

use parking_lot::Mutex;
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::crypto::{aead, kdf};
use crate::crypto::identity::PeerId;
use crate::error::{CoreError, CoreResult};

/// Invite polling TTL (spec §5: "until TTL (15 min) or explicit cancel").
pub const INVITE_TTL: Duration = Duration::from_secs(15 * 60);

const PASSWORD_ALPHABET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";
const PASSWORD_LEN: usize = 14;

/// Generates a 14-character high-entropy invite password (>= 70 bits: a
/// 32-symbol alphabet at 14 characters is `log2(32) * 14 = 70` bits).
pub fn generate_invite_password() -> String {
    let mut rng = rand::rngs::OsRng;
    (0..PASSWORD_LEN)
        .map(|_| PASSWORD_ALPHABET[rng.gen_range(0..PASSWORD_ALPHABET.len())] as char)
        .collect()
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum InvitationState {
    Pending,
    Redeemed,
    Expired,
}

struct PendingInvitation {
    nonce: [u8; 16],
    password_hash: [u8; 32],
    created_at: SystemTime,
    state: InvitationState,
}

/// The sealed offer published on `invite/<lex_sorted(peer_a,peer_b)>`.
#[derive(Serialize, Deserialize)]
pub struct InviteOffer {
    pub inviter_peer_id: PeerId,
    pub addrs: Vec<String>,
    pub nonce: [u8; 16],
}

/// The signed `invite-accept` stream payload sent back by the invitee.
#[derive(Serialize, Deserialize)]
pub struct InviteAccept {
    pub invitee_peer_id: PeerId,
    pub fresh_nonce: [u8; 16],
}

pub struct InviteEngine {
    pending: Mutex<HashMap<String, PendingInvitation>>,
}

impl InviteEngine {
    pub fn new() -> Self {
        Self {
            pending: Mutex::new(HashMap::new()),
        }
    }

    /// `generate_invite_password()`: records `{nonce, password_hash}`
    /// pending state keyed by invitee handle and returns the password to
    /// display (and/or QR-encode) to the user.
    pub fn begin(&self, invitee_handle: &str) -> String {
        let password = generate_invite_password();
        let nonce: [u8; 16] = rand::random();
        let password_hash = *blake3::hash(password.as_bytes()).as_bytes();
        self.pending.lock().insert(
            invitee_handle.to_string(),
            PendingInvitation {
                nonce,
                password_hash,
                created_at: SystemTime::now(),
                state: InvitationState::Pending,
            },
        );
        password
    }

    /// `create_invite(invitee, password)`: builds the AEAD-sealed offer to
    /// publish on the invite topic. Re-published on each reconnect until
    /// redeemed or TTL expires (the caller re-invokes this each time).
    pub fn create_offer(
        &self,
        invitee_handle: &str,
        password: &str,
        inviter_peer_id: PeerId,
        addrs: Vec<String>,
    ) -> CoreResult<Vec<u8>> {
        let guard = self.pending.lock();
        let pending = guard.get(invitee_handle).ok_or(CoreError::NotFound)?;
        if *blake3::hash(password.as_bytes()).as_bytes() != pending.password_hash {
            return Err(CoreError::InviteMismatch);
        }
        if self.is_expired_locked(pending) {
            return Err(CoreError::InviteExpired);
        }
        let offer = InviteOffer {
            inviter_peer_id,
            addrs,
            nonce: pending.nonce,
        };
        let key = kdf::invite_channel_key(password);
        let plaintext = postcard::to_stdvec(&offer)?;
        let (nonce, ciphertext) = aead::seal(&key, &plaintext);
        let mut sealed = nonce;
        sealed.extend_from_slice(&ciphertext);
        Ok(sealed)
    }

    /// `redeem_and_connect(inviter_handle, password)`'s decrypt step: opens
    /// a sealed offer received on the invite topic. The caller still has
    /// to dial, Noise-handshake, and verify the inviter's identity against
    /// the handle's rendezvous-published PeerID before trusting it.
    pub fn open_offer(password: &str, sealed: &[u8]) -> CoreResult<InviteOffer> {
        if sealed.len() < aead::NONCE_LEN {
            return Err(CoreError::MalformedFrame("invite offer too short".into()));
        }
        let key = kdf::invite_channel_key(password);
        let (nonce, ciphertext) = sealed.split_at(aead::NONCE_LEN);
        let plaintext = aead::open(&key, nonce, ciphertext).map_err(|_| CoreError::InviteMismatch)?;
        Ok(postcard::from_bytes(&plaintext)?)
    }

    /// Seals the invitee's `invite-accept` reply under the same invite key.
    pub fn seal_accept(password: &str, accept: &InviteAccept) -> CoreResult<Vec<u8>> {
        let key = kdf::invite_channel_key(password);
        let plaintext = postcard::to_stdvec(accept)?;
        let (nonce, ciphertext) = aead::seal(&key, &plaintext);
        let mut sealed = nonce;
        sealed.extend_from_slice(&ciphertext);
        Ok(sealed)
    }

    pub fn open_accept(password: &str, sealed: &[u8]) -> CoreResult<InviteAccept> {
        if sealed.len() < aead::NONCE_LEN {
            return Err(CoreError::MalformedFrame("invite accept too short".into()));
        }
        let key = kdf::invite_channel_key(password);
        let (nonce, ciphertext) = sealed.split_at(aead::NONCE_LEN);
        let plaintext = aead::open(&key, nonce, ciphertext).map_err(|_| CoreError::InviteMismatch)?;
        Ok(postcard::from_bytes(&plaintext)?)
    }

    /// Marks a pending invitation redeemed once the accept handshake
    /// verifies; the caller then inserts the peer into the trust list.
    pub fn mark_redeemed(&self, invitee_handle: &str) -> CoreResult<()> {
        let mut guard = self.pending.lock();
        let pending = guard.get_mut(invitee_handle).ok_or(CoreError::NotFound)?;
        pending.state = InvitationState::Redeemed;
        Ok(())
    }

    fn is_expired_locked(&self, pending: &PendingInvitation) -> bool {
        pending
            .created_at
            .elapsed()
            .map(|e| e >= INVITE_TTL)
            .unwrap_or(false)
    }

    pub fn state_of(&self, invitee_handle: &str) -> Option<InvitationState> {
        self.pending.lock().get(invitee_handle).map(|p| {
            if p.state == InvitationState::Pending && self.is_expired_locked(p) {
                InvitationState::Expired
            } else {
                p.state
            }
        })
    }
}

impl Default for InviteEngine {
    fn default() -> Self {
        Self::new()
    }
}

/// Topic for the offer/accept exchange itself: derived from the shared
/// password alone, since that's the only thing both sides know before
/// redemption completes.
pub fn invite_offer_topic(password: &str) -> String {
    format!("invite-offer/{}", hex::encode(blake3::hash(password.as_bytes()).as_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn password_has_expected_length() {
        let p = generate_invite_password();
        assert_eq!(p.len(), PASSWORD_LEN);
    }

    #[test]
    fn offer_roundtrips_with_correct_password() {
        let engine = InviteEngine::new();
        let password = engine.begin("bob");
        let peer = PeerId([5; 32]);
        let sealed = engine
            .create_offer("bob", &password, peer, vec!["127.0.0.1:4000".into()])
            .unwrap();
        let offer = InviteEngine::open_offer(&password, &sealed).unwrap();
        assert_eq!(offer.inviter_peer_id, peer);
    }

    #[test]
    fn wrong_password_is_invite_mismatch() {
        let engine = InviteEngine::new();
        engine.begin("bob");
        let result = engine.create_offer("bob", "WRONGWRONGWR", PeerId([1; 32]), vec![]);
        assert!(matches!(result, Err(CoreError::InviteMismatch)));
    }
}
