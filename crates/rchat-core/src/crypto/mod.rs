//! Crypto primitives: Ed25519 signing, X25519 ECDH (via the session module's
//! handshake), AEAD, HKDF, Argon2id, and content hashing.

pub mod aead;
pub mod hash;
pub mod identity;
pub mod kdf;
