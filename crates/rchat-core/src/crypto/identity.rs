//! Ed25519 identity keypair and the canonical `PeerId` derived from it.
//!
//! The `PeerId` is the public half of the node's long-lived signing key,
//! encoded as lowercase hex. It never changes while the vault exists.

use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Canonical public-key-derived identifier of a node.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PeerId(pub [u8; 32]);

impl PeerId {
    pub fn from_verifying_key(vk: &VerifyingKey) -> Self {
        Self(vk.to_bytes())
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn from_hex(s: &str) -> Option<Self> {
        let bytes = hex::decode(s).ok()?;
        let arr: [u8; 32] = bytes.try_into().ok()?;
        Some(Self(arr))
    }

    pub fn to_endpoint_id(&self) -> Option<iroh::EndpointId> {
        iroh::EndpointId::from_bytes(&self.0).ok()
    }

    pub fn verifying_key(&self) -> Option<VerifyingKey> {
        VerifyingKey::from_bytes(&self.0).ok()
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl fmt::Debug for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PeerId({})", &self.to_hex()[..12])
    }
}

/// The node's long-lived signing identity. Held in memory for the process
/// lifetime once the vault is unlocked; never persisted outside the vault's
/// encrypted secret bundle.
///
/// `SigningKey` is built with `ed25519-dalek`'s `zeroize` feature enabled,
/// so its internal secret scalar is wiped on drop without any help here.
pub struct IdentityKey {
    signing_key: SigningKey,
}

impl IdentityKey {
    pub fn generate() -> Self {
        let signing_key = SigningKey::generate(&mut rand::rngs::OsRng);
        Self { signing_key }
    }

    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self {
            signing_key: SigningKey::from_bytes(&bytes),
        }
    }

    /// Raw secret key bytes, for sealing into the vault's encrypted bundle.
    /// The caller is responsible for zeroizing any buffer these end up in.
    pub fn to_bytes(&self) -> [u8; 32] {
        self.signing_key.to_bytes()
    }

    pub fn peer_id(&self) -> PeerId {
        PeerId::from_verifying_key(&self.signing_key.verifying_key())
    }

    pub fn sign(&self, msg: &[u8]) -> Signature {
        self.signing_key.sign(msg)
    }

    pub fn verifying_key(&self) -> VerifyingKey {
        self.signing_key.verifying_key()
    }
}

pub fn verify(peer: &PeerId, msg: &[u8], sig: &Signature) -> bool {
    match peer.verifying_key() {
        Some(vk) => vk.verify(msg, sig).is_ok(),
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn peer_id_hex_roundtrip() {
        let id = IdentityKey::generate();
        let peer = id.peer_id();
        let hex = peer.to_hex();
        let decoded = PeerId::from_hex(&hex).unwrap();
        assert_eq!(peer, decoded);
    }

    #[test]
    fn sign_and_verify() {
        let id = IdentityKey::generate();
        let sig = id.sign(b"hello");
        assert!(verify(&id.peer_id(), b"hello", &sig));
        assert!(!verify(&id.peer_id(), b"goodbye", &sig));
    }
}
