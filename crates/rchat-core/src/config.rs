//! Non-secret, user-visible settings (`config.toml`), per spec §6.3.
//!
//! Deserialized with `serde` + `toml`; defaults are merged in code so a
//! missing or partial file is never an error. `dirs` locates the per-OS
//! app data directory, the same way the teacher locates its blob store.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::CoreResult;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub theme_selection: Option<String>,
    #[serde(default = "default_online")]
    pub online_by_default: bool,
    /// Base URL of the rendezvous directory (an HTTPS-reachable blob
    /// store). `None` disables internet rendezvous; local mDNS discovery
    /// still works.
    #[serde(default)]
    pub rendezvous_url: Option<String>,
    /// Applied the next time networking comes up (§`set_fast_discovery`).
    #[serde(default)]
    pub fast_discovery: bool,
}

fn default_online() -> bool {
    true
}

impl Default for Config {
    fn default() -> Self {
        Self {
            theme_selection: None,
            online_by_default: true,
            rendezvous_url: None,
            fast_discovery: false,
        }
    }
}

impl Config {
    pub fn load(path: impl AsRef<Path>) -> CoreResult<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Ok(Self::default());
        }
        let raw = std::fs::read_to_string(path)?;
        toml::from_str(&raw).map_err(|e| crate::error::CoreError::Conflict(format!("bad config.toml: {e}")))
    }

    pub fn save(&self, path: impl AsRef<Path>) -> CoreResult<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let raw = toml::to_string_pretty(self)
            .map_err(|e| crate::error::CoreError::Conflict(format!("bad config serialization: {e}")))?;
        std::fs::write(path, raw)?;
        Ok(())
    }
}

/// The per-OS app data directory housing `vault.bin`, `store.db`, `files/`,
/// `stickers/`, `quarantine/`, and `config.toml`.
#[derive(Clone)]
pub struct AppPaths {
    pub root: PathBuf,
}

impl AppPaths {
    pub fn discover() -> Self {
        let root = dirs::data_dir()
            .unwrap_or_else(std::env::temp_dir)
            .join("rchat");
        Self { root }
    }

    pub fn at(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn vault_path(&self) -> PathBuf {
        self.root.join("vault.bin")
    }

    pub fn store_path(&self) -> PathBuf {
        self.root.join("store.db")
    }

    pub fn files_dir(&self) -> PathBuf {
        self.root.join("files")
    }

    pub fn stickers_dir(&self) -> PathBuf {
        self.root.join("stickers")
    }

    /// SPEC_FULL.md §C.1: files that fail hash verification land here
    /// instead of being silently discarded.
    pub fn quarantine_dir(&self) -> PathBuf {
        self.root.join("quarantine")
    }

    pub fn config_path(&self) -> PathBuf {
        self.root.join("config.toml")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn missing_config_file_yields_defaults() {
        let dir = tempdir().unwrap();
        let cfg = Config::load(dir.path().join("config.toml")).unwrap();
        assert!(cfg.online_by_default);
    }

    #[test]
    fn save_then_load_roundtrip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.toml");
        let cfg = Config {
            theme_selection: Some("light".into()),
            online_by_default: false,
            ..Config::default()
        };
        cfg.save(&path).unwrap();
        let loaded = Config::load(&path).unwrap();
        assert_eq!(loaded.theme_selection.as_deref(), Some("light"));
        assert!(!loaded.online_by_default);
    }
}
