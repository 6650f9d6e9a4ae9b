//! User settings, persisted as JSON.
//!
//! Stored keys merge over [`Settings::default`], so a file written by an
//! older version (or edited by hand) only needs the keys it wants to change.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::adapters::{self, SiteAdapter, adapter_by_id};
use crate::error::Result;

pub const SETTINGS_FILE: &str = "settings.json";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Theme {
    Light,
    Dark,
    #[default]
    System,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Settings {
    pub enabled_site_ids: Vec<String>,
    pub site_order: Vec<String>,
    pub judge_site_id: Option<String>,
    pub auto_maximize_judge: bool,
    pub judge_uses_full_conversation: bool,
    pub theme: Theme,
}

impl Default for Settings {
    fn default() -> Self {
        let ids: Vec<String> = adapters::ids().into_iter().map(str::to_string).collect();
        Self {
            enabled_site_ids: ids.clone(),
            site_order: ids,
            judge_site_id: None,
            auto_maximize_judge: false,
            judge_uses_full_conversation: false,
            theme: Theme::System,
        }
    }
}

impl Settings {
    /// Enabled, registered sites: in `site_order` first, then any others in registry order.
    pub fn enabled_sites(&self) -> Vec<&'static SiteAdapter> {
        let mut sites: Vec<&'static SiteAdapter> = Vec::new();
        let ordered = self.site_order.iter().filter(|id| self.enabled_site_ids.contains(id));
        let rest = self.enabled_site_ids.iter().filter(|id| !self.site_order.contains(id));
        for id in ordered.chain(rest) {
            match adapter_by_id(id) {
                Some(adapter) if !sites.iter().any(|s| s.id == adapter.id) => sites.push(adapter),
                Some(_) => {}
                None => debug!(site = %id, "ignoring unknown site id"),
            }
        }
        sites
    }

    pub fn enabled_ids(&self) -> Vec<String> {
        self.enabled_sites().iter().map(|a| a.id.to_string()).collect()
    }

    pub fn judge(&self) -> Option<&'static SiteAdapter> {
        self.judge_site_id.as_deref().and_then(adapter_by_id)
    }
}

/// Settings file on disk.
#[derive(Debug, Clone)]
pub struct SettingsStore {
    path: PathBuf,
}

impl SettingsStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// `<config dir>/promptcaster/settings.json`, or the working directory if
    /// the platform has no config dir.
    pub fn default_location() -> Self {
        let dir = dirs::config_dir()
            .map(|dir| dir.join("promptcaster"))
            .unwrap_or_else(|| PathBuf::from("."));
        Self::new(dir.join(SETTINGS_FILE))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Stored settings over defaults. Any failure yields the defaults.
    pub fn load(&self) -> Settings {
        match self.try_load() {
            Ok(settings) => settings,
            Err(e) => {
                warn!(path = %self.path.display(), "failed to load settings, using defaults: {e}");
                Settings::default()
            }
        }
    }

    fn try_load(&self) -> Result<Settings> {
        if !self.path.exists() {
            debug!(path = %self.path.display(), "no settings file yet");
            return Ok(Settings::default());
        }
        let raw = fs::read_to_string(&self.path)?;
        Ok(serde_json::from_str(&raw)?)
    }

    pub fn save(&self, settings: &Settings) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&self.path, serde_json::to_string_pretty(settings)?)?;
        debug!(path = %self.path.display(), "settings saved");
        Ok(())
    }

    /// Merge the top-level keys of `patch` over the current settings and save.
    pub fn update(&self, patch: Value) -> Result<Settings> {
        let mut merged = serde_json::to_value(self.load())?;
        if let (Value::Object(current), Value::Object(changes)) = (&mut merged, patch) {
            current.extend(changes);
        }
        let settings: Settings = serde_json::from_value(merged)?;
        self.save(&settings)?;
        Ok(settings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    fn store(dir: &TempDir) -> SettingsStore {
        SettingsStore::new(dir.path().join("nested").join(SETTINGS_FILE))
    }

    #[test]
    fn missing_file_gives_defaults() {
        let dir = TempDir::new().unwrap();
        let settings = store(&dir).load();
        assert_eq!(settings, Settings::default());
        assert_eq!(settings.enabled_ids(), vec!["chatgpt", "claude", "gemini", "perplexity", "grok"]);
        assert!(settings.judge().is_none());
    }

    #[test]
    fn stored_keys_merge_over_defaults() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        fs::create_dir_all(store.path().parent().unwrap()).unwrap();
        fs::write(store.path(), r#"{ "judgeSiteId": "claude", "theme": "dark" }"#).unwrap();

        let settings = store.load();
        assert_eq!(settings.judge().map(|a| a.id), Some("claude"));
        assert_eq!(settings.theme, Theme::Dark);
        assert_eq!(settings.enabled_site_ids.len(), 5);
    }

    #[test]
    fn corrupt_file_falls_back_to_defaults() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        fs::create_dir_all(store.path().parent().unwrap()).unwrap();
        fs::write(store.path(), "{ not json").unwrap();
        assert_eq!(store.load(), Settings::default());
    }

    #[test]
    fn update_merges_a_partial_patch() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        store.update(json!({ "judgeSiteId": "gemini" })).unwrap();
        let settings = store.update(json!({ "judgeUsesFullConversation": true })).unwrap();

        assert_eq!(settings.judge_site_id.as_deref(), Some("gemini"));
        assert!(settings.judge_uses_full_conversation);
        assert_eq!(store.load(), settings);
    }

    #[test]
    fn enabled_sites_follow_order_and_skip_unknown_ids() {
        let settings = Settings {
            enabled_site_ids: vec!["grok".into(), "bard".into(), "claude".into(), "perplexity".into()],
            site_order: vec!["claude".into(), "chatgpt".into(), "grok".into()],
            ..Settings::default()
        };
        assert_eq!(settings.enabled_ids(), vec!["claude", "grok", "perplexity"]);
    }

    #[test]
    fn serializes_with_camel_case_keys() {
        let value = serde_json::to_value(Settings::default()).unwrap();
        assert_eq!(value["judgeSiteId"], Value::Null);
        assert_eq!(value["theme"], json!("system"));
        assert!(value.get("enabledSiteIds").is_some());
        assert!(value.get("autoMaximizeJudge").is_some());
    }
}
