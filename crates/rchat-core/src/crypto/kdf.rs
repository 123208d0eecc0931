//! Key derivation: Argon2id for password-based vault keys, HKDF for
//! context-separated subkeys (invite channels, session transcripts).

use argon2::{Algorithm, Argon2, Params, Version};
use hkdf::Hkdf;
use rand::RngCore;
use sha2::Sha256;

use crate::crypto::aead::KEY_LEN;
use crate::error::{CoreError, CoreResult};

pub const SALT_LEN: usize = 16;

/// Argon2id parameters. Spec floor: >=64 MiB memory, t=3, p=1.
#[derive(Clone, Copy, Debug, serde::Serialize, serde::Deserialize)]
pub struct KdfParams {
    pub mem_kib: u32,
    pub time_cost: u32,
    pub parallelism: u32,
}

impl Default for KdfParams {
    fn default() -> Self {
        Self {
            mem_kib: 64 * 1024,
            time_cost: 3,
            parallelism: 1,
        }
    }
}

pub fn random_salt() -> [u8; SALT_LEN] {
    let mut salt = [0u8; SALT_LEN];
    rand::rngs::OsRng.fill_bytes(&mut salt);
    salt
}

/// Derive a 32-byte key-encrypting-key from a password and salt. Runs on
/// whatever executor calls it — callers on an async reactor should offload
/// this to a blocking-tasks pool (it's intentionally expensive).
pub fn derive_kek(password: &str, salt: &[u8; SALT_LEN], params: &KdfParams) -> CoreResult<[u8; KEY_LEN]> {
    let argon_params = Params::new(params.mem_kib, params.time_cost, params.parallelism, Some(KEY_LEN))
        .map_err(|e| CoreError::Conflict(format!("bad kdf params: {e}")))?;
    let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, argon_params);
    let mut out = [0u8; KEY_LEN];
    argon2
        .hash_password_into(password.as_bytes(), salt, &mut out)
        .map_err(|e| CoreError::Conflict(format!("kdf failure: {e}")))?;
    Ok(out)
}

/// HKDF-SHA256 subkey derivation with a domain-separation context string.
pub fn hkdf_derive(ikm: &[u8], context: &str) -> [u8; KEY_LEN] {
    let hk = Hkdf::<Sha256>::new(None, ikm);
    let mut out = [0u8; KEY_LEN];
    hk.expand(context.as_bytes(), &mut out)
        .expect("32 bytes is within HKDF-SHA256's output range");
    out
}

/// Derive the invite-channel key from the shared invite password, per
/// spec's `HKDF(password, "rchat-invite-v1")`.
pub fn invite_channel_key(password: &str) -> [u8; KEY_LEN] {
    hkdf_derive(password.as_bytes(), "rchat-invite-v1")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_password_and_salt_derive_same_kek() {
        let salt = random_salt();
        let params = KdfParams::default();
        let k1 = derive_kek("correcthorse", &salt, &params).unwrap();
        let k2 = derive_kek("correcthorse", &salt, &params).unwrap();
        assert_eq!(k1, k2);
    }

    #[test]
    fn different_password_derives_different_kek() {
        let salt = random_salt();
        let params = KdfParams::default();
        let k1 = derive_kek("correcthorse", &salt, &params).unwrap();
        let k2 = derive_kek("wrongpass", &salt, &params).unwrap();
        assert_ne!(k1, k2);
    }

    #[test]
    fn invite_key_is_deterministic_per_password() {
        assert_eq!(
            invite_channel_key("ABCD1234EFGH56"),
            invite_channel_key("ABCD1234EFGH56")
        );
    }
}
