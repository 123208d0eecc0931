//! The vault: a password-derived key-encrypting-key protecting the node's
//! identity keypair and secrets at rest.
//!
//! Three operations — `setup`, `unlock`, `reset` — plus `status()`. The
//! vault is the only component that ever sees a plaintext password.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::instrument;

use crate::crypto::aead;
use crate::crypto::identity::IdentityKey;
use crate::crypto::kdf::{self, KdfParams, SALT_LEN};
use crate::error::{CoreError, CoreResult};

/// On-disk vault record: `{salt, kdf_params, nonce, ciphertext}`.
#[derive(Serialize, Deserialize)]
struct VaultRecord {
    salt: [u8; SALT_LEN],
    params: KdfParams,
    nonce: Vec<u8>,
    ciphertext: Vec<u8>,
}

/// The plaintext secret bundle sealed inside the vault record.
#[derive(Serialize, Deserialize)]
struct SecretBundle {
    identity_priv: [u8; 32],
    api_token: Option<String>,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct VaultStatus {
    pub is_setup: bool,
    pub is_unlocked: bool,
}

struct Unlocked {
    identity: Arc<IdentityKey>,
    api_token: Option<String>,
    /// Cached so `set_api_token` can re-seal the bundle without asking the
    /// caller to retype the password.
    kek: [u8; 32],
}

/// The vault handle. `path` is `<app-data>/vault.bin`.
pub struct Vault {
    path: PathBuf,
    unlocked: RwLock<Option<Unlocked>>,
}

impl Vault {
    pub fn open(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            unlocked: RwLock::new(None),
        }
    }

    pub fn status(&self) -> VaultStatus {
        VaultStatus {
            is_setup: self.path.exists(),
            is_unlocked: self.unlocked.read().is_some(),
        }
    }

    /// Returns the node's identity key. Panics if called while locked — the
    /// dispatcher is responsible for checking `status()` first.
    pub fn identity(&self) -> CoreResult<Arc<IdentityKey>> {
        self.unlocked
            .read()
            .as_ref()
            .map(|u| u.identity.clone())
            .ok_or(CoreError::VaultLocked)
    }

    pub fn api_token(&self) -> CoreResult<Option<String>> {
        self.unlocked
            .read()
            .as_ref()
            .map(|u| u.api_token.clone())
            .ok_or(CoreError::VaultLocked)
    }

    pub fn set_api_token(&self, token: String) -> CoreResult<()> {
        let mut guard = self.unlocked.write();
        let unlocked = guard.as_mut().ok_or(CoreError::VaultLocked)?;
        unlocked.api_token = Some(token);
        self.persist_locked(unlocked)
    }

    #[instrument(skip(self, password))]
    pub fn setup(&self, password: &str) -> CoreResult<()> {
        if self.path.exists() {
            return Err(CoreError::VaultAlreadySetUp);
        }
        let identity = IdentityKey::generate();
        let bundle = SecretBundle {
            identity_priv: identity.to_bytes(),
            api_token: None,
        };
        let salt = kdf::random_salt();
        let params = KdfParams::default();
        let kek = kdf::derive_kek(password, &salt, &params)?;
        let plaintext = postcard::to_stdvec(&bundle)?;
        let (nonce, ciphertext) = aead::seal(&kek, &plaintext);
        let record = VaultRecord {
            salt,
            params,
            nonce,
            ciphertext,
        };
        write_record(&self.path, &record)?;
        *self.unlocked.write() = Some(Unlocked {
            identity: Arc::new(identity),
            api_token: None,
            kek,
        });
        Ok(())
    }

    #[instrument(skip(self, password))]
    pub fn unlock(&self, password: &str) -> CoreResult<()> {
        if !self.path.exists() {
            return Err(CoreError::VaultNotSetUp);
        }
        let record = read_record(&self.path)?;
        let kek = kdf::derive_kek(password, &record.salt, &record.params)?;
        // `open` fails closed with `InvalidPassword` on MAC mismatch; it
        // never distinguishes a wrong password from tampered ciphertext.
        let plaintext = aead::open(&kek, &record.nonce, &record.ciphertext)?;
        let bundle: SecretBundle = postcard::from_bytes(&plaintext)?;
        let identity = IdentityKey::from_bytes(bundle.identity_priv);
        *self.unlocked.write() = Some(Unlocked {
            identity: Arc::new(identity),
            api_token: bundle.api_token,
            kek,
        });
        Ok(())
    }

    /// Destructive: erases the vault record and locks the identity out of
    /// memory. Caller is responsible for wiping identity-dependent state
    /// (trust list, sessions, message log, files) elsewhere.
    #[instrument(skip(self))]
    pub fn reset(&self) -> CoreResult<()> {
        if self.path.exists() {
            std::fs::remove_file(&self.path)?;
        }
        *self.unlocked.write() = None;
        Ok(())
    }

    fn persist_locked(&self, unlocked: &Unlocked) -> CoreResult<()> {
        let record = read_record(&self.path)?;
        let bundle = SecretBundle {
            identity_priv: unlocked.identity.to_bytes(),
            api_token: unlocked.api_token.clone(),
        };
        let plaintext = postcard::to_stdvec(&bundle)?;
        let (nonce, ciphertext) = aead::seal(&unlocked.kek, &plaintext);
        let new_record = VaultRecord {
            salt: record.salt,
            params: record.params,
            nonce,
            ciphertext,
        };
        write_record(&self.path, &new_record)
    }
}

fn write_record(path: &Path, record: &VaultRecord) -> CoreResult<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let bytes = postcard::to_stdvec(record)?;
    std::fs::write(path, bytes)?;
    Ok(())
}

fn read_record(path: &Path) -> CoreResult<VaultRecord> {
    let bytes = std::fs::read(path)?;
    Ok(postcard::from_bytes(&bytes)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn setup_then_unlock_with_correct_password() {
        let dir = tempdir().unwrap();
        let vault = Vault::open(dir.path().join("vault.bin"));
        vault.setup("correcthorse").unwrap();
        assert_eq!(
            vault.status(),
            VaultStatus {
                is_setup: true,
                is_unlocked: true
            }
        );
    }

    #[test]
    fn setup_twice_fails() {
        let dir = tempdir().unwrap();
        let vault = Vault::open(dir.path().join("vault.bin"));
        vault.setup("correcthorse").unwrap();
        assert!(matches!(
            vault.setup("other"),
            Err(CoreError::VaultAlreadySetUp)
        ));
    }

    #[test]
    fn unlock_survives_process_restart_and_rejects_wrong_password() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("vault.bin");
        {
            let vault = Vault::open(&path);
            vault.setup("correcthorse").unwrap();
        }
        // Fresh handle simulates a process restart.
        let vault = Vault::open(&path);
        assert_eq!(
            vault.status(),
            VaultStatus {
                is_setup: true,
                is_unlocked: false
            }
        );
        assert!(matches!(
            vault.unlock("wrongpass"),
            Err(CoreError::InvalidPassword)
        ));
        assert!(!vault.status().is_unlocked);
        vault.unlock("correcthorse").unwrap();
        assert!(vault.status().is_unlocked);
    }

    #[test]
    fn reset_erases_vault() {
        let dir = tempdir().unwrap();
        let vault = Vault::open(dir.path().join("vault.bin"));
        vault.setup("correcthorse").unwrap();
        vault.reset().unwrap();
        assert_eq!(
            vault.status(),
            VaultStatus {
                is_setup: false,
                is_unlocked: false
            }
        );
    }
}
