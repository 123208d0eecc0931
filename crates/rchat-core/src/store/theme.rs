//! `Theme` repository: the UI's color palette, persisted so it survives
//! restarts. A non-UI core can't hold `ratatui::style::Color` — colors are
//! represented as `"#rrggbb"` hex strings instead, mirroring the teacher's
//! `Theme` struct's named semantic slots one level removed from the
//! rendering crate.

use rusqlite::{params, OptionalExtension};
use serde::{Deserialize, Serialize};

use crate::error::{CoreError, CoreResult};

use super::Store;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ThemeConfig {
    pub bg: String,
    pub border: String,
    pub border_focused: String,
    pub text: String,
    pub accent: String,
    pub nickname: String,
    pub conn_direct: String,
    pub conn_relay: String,
    pub error: String,
}

impl ThemeConfig {
    pub fn dark() -> Self {
        Self {
            bg: "#191423".into(),
            border: "#64508c".into(),
            border_focused: "#b482ff".into(),
            text: "#dcdcdc".into(),
            accent: "#b482ff".into(),
            nickname: "#c8a0ff".into(),
            conn_direct: "#64dc64".into(),
            conn_relay: "#dcb464".into(),
            error: "#ff6464".into(),
        }
    }

    pub fn light() -> Self {
        Self {
            bg: "#f0ecf5".into(),
            border: "#b4a0c8".into(),
            border_focused: "#783cc8".into(),
            text: "#32323c".into(),
            accent: "#783cc8".into(),
            nickname: "#6428b4".into(),
            conn_direct: "#1e8c1e".into(),
            conn_relay: "#a06414".into(),
            error: "#c82828".into(),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ThemePresetInfo {
    pub key: String,
    pub name: String,
    pub description: String,
}

pub fn theme_presets() -> Vec<ThemePresetInfo> {
    vec![
        ThemePresetInfo {
            key: "dark".into(),
            name: "Dark".into(),
            description: "Dark grey background, purple accent.".into(),
        },
        ThemePresetInfo {
            key: "light".into(),
            name: "Light".into(),
            description: "Off-white background, deep purple accent.".into(),
        },
    ]
}

fn preset_by_key(key: &str) -> CoreResult<ThemeConfig> {
    match key {
        "dark" => Ok(ThemeConfig::dark()),
        "light" => Ok(ThemeConfig::light()),
        _ => Err(CoreError::NotFound),
    }
}

impl Store {
    pub fn get_theme(&self) -> CoreResult<ThemeConfig> {
        let conn = self.conn.lock();
        let json: Option<String> = conn
            .query_row("SELECT config_json FROM theme WHERE id = 0", [], |r| r.get(0))
            .optional()?;
        match json {
            Some(j) => Ok(serde_json::from_str(&j).map_err(|e| CoreError::Serde(e.to_string()))?),
            None => Ok(ThemeConfig::dark()),
        }
    }

    pub fn update_theme(&self, theme: &ThemeConfig) -> CoreResult<()> {
        let json = serde_json::to_string(theme).map_err(|e| CoreError::Serde(e.to_string()))?;
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO theme (id, config_json, selected_preset) VALUES (0, ?1, NULL)
             ON CONFLICT(id) DO UPDATE SET config_json = ?1, selected_preset = NULL",
            params![json],
        )?;
        Ok(())
    }

    pub fn apply_preset(&self, name: &str) -> CoreResult<ThemeConfig> {
        let theme = preset_by_key(name)?;
        let json = serde_json::to_string(&theme).map_err(|e| CoreError::Serde(e.to_string()))?;
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO theme (id, config_json, selected_preset) VALUES (0, ?1, ?2)
             ON CONFLICT(id) DO UPDATE SET config_json = ?1, selected_preset = ?2",
            params![json, name],
        )?;
        Ok(theme)
    }

    pub fn get_selected_preset(&self) -> CoreResult<Option<String>> {
        let conn = self.conn.lock();
        conn.query_row("SELECT selected_preset FROM theme WHERE id = 0", [], |r| r.get(0))
            .optional()
            .map(|o| o.flatten())
            .map_err(Into::into)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_to_dark_theme() {
        let store = Store::open_in_memory().unwrap();
        assert_eq!(store.get_theme().unwrap().bg, ThemeConfig::dark().bg);
    }

    #[test]
    fn apply_preset_then_get_selected() {
        let store = Store::open_in_memory().unwrap();
        store.apply_preset("light").unwrap();
        assert_eq!(store.get_selected_preset().unwrap().as_deref(), Some("light"));
        assert_eq!(store.get_theme().unwrap().bg, ThemeConfig::light().bg);
    }

    #[test]
    fn unknown_preset_errors() {
        let store = Store::open_in_memory().unwrap();
        assert!(matches!(store.apply_preset("neon"), Err(CoreError::NotFound)));
    }
}
