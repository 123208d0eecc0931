//! Authenticated encryption: XChaCha20-Poly1305 over arbitrary plaintext.
//!
//! Used for the vault's secret bundle, invite-channel offers, and the
//! per-session transport key. One key, one algorithm, everywhere — no
//! per-component AEAD bikeshedding.

use chacha20poly1305::aead::{Aead, KeyInit};
use chacha20poly1305::{Key, XChaCha20Poly1305, XNonce};
use rand::RngCore;

use crate::error::{CoreError, CoreResult};

pub const KEY_LEN: usize = 32;
pub const NONCE_LEN: usize = 24;

pub fn random_nonce() -> [u8; NONCE_LEN] {
    let mut nonce = [0u8; NONCE_LEN];
    rand::rngs::OsRng.fill_bytes(&mut nonce);
    nonce
}

/// Seal `plaintext` under `key`, returning `(nonce, ciphertext)`.
pub fn seal(key: &[u8; KEY_LEN], plaintext: &[u8]) -> (Vec<u8>, Vec<u8>) {
    let nonce = random_nonce();
    let cipher = XChaCha20Poly1305::new(Key::from_slice(key));
    let ciphertext = cipher
        .encrypt(XNonce::from_slice(&nonce), plaintext)
        .expect("encryption with a fresh nonce cannot fail");
    (nonce.to_vec(), ciphertext)
}

/// Open a `(nonce, ciphertext)` pair sealed by [`seal`]. Returns
/// `InvalidPassword` on MAC failure — callers that aren't password-checking
/// should map this to a more specific error.
pub fn open(key: &[u8; KEY_LEN], nonce: &[u8], ciphertext: &[u8]) -> CoreResult<Vec<u8>> {
    if nonce.len() != NONCE_LEN {
        return Err(CoreError::MalformedFrame("bad nonce length".into()));
    }
    let cipher = XChaCha20Poly1305::new(Key::from_slice(key));
    cipher
        .decrypt(XNonce::from_slice(nonce), ciphertext)
        .map_err(|_| CoreError::InvalidPassword)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seal_open_roundtrip() {
        let key = [7u8; KEY_LEN];
        let (nonce, ct) = seal(&key, b"secret bundle");
        let pt = open(&key, &nonce, &ct).unwrap();
        assert_eq!(pt, b"secret bundle");
    }

    #[test]
    fn wrong_key_fails_closed() {
        let key = [7u8; KEY_LEN];
        let other = [9u8; KEY_LEN];
        let (nonce, ct) = seal(&key, b"secret bundle");
        assert!(open(&other, &nonce, &ct).is_err());
    }
}
