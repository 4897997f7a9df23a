//! Persistent host settings (JSON file in the user's data directory).

use std::fs;
use std::path::{Path, PathBuf};

use sayword_core::{EngineConfig, ModelAssets};
use serde::{Deserialize, Serialize};

pub const DEFAULT_LANGUAGE: &str = "en-US";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[serde(default)]
pub struct AppSettings {
    pub language: String,
    pub preferred_input_device: Option<String>,
    pub start_cue: Option<PathBuf>,
    pub stop_cue: Option<PathBuf>,
    /// Program plus arguments; the cue file path is appended.
    pub player_command: Vec<String>,
    /// Program plus arguments. `{text}` and `{language}` are substituted; the
    /// text is appended when no argument mentions it.
    pub tts_command: Vec<String>,
    pub engine: EngineConfig,
    pub models: ModelAssets,
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            language: DEFAULT_LANGUAGE.into(),
            preferred_input_device: None,
            start_cue: None,
            stop_cue: None,
            player_command: default_player_command(),
            tts_command: vec!["espeak-ng".into(), "-v".into(), "{language}".into()],
            engine: EngineConfig::default(),
            models: ModelAssets {
                cache_dir: default_data_dir().join("models"),
                ..ModelAssets::default()
            },
        }
    }
}

impl AppSettings {
    pub fn normalize(&mut self) {
        self.language = normalize_language(&self.language);
        self.preferred_input_device = self
            .preferred_input_device
            .as_ref()
            .map(|d| d.trim().to_string())
            .filter(|d| !d.is_empty());
        self.start_cue = self.start_cue.take().filter(|p| !p.as_os_str().is_empty());
        self.stop_cue = self.stop_cue.take().filter(|p| !p.as_os_str().is_empty());
        self.player_command = normalize_command(&self.player_command);
        if self.player_command.is_empty() {
            self.player_command = default_player_command();
        }
        self.tts_command = normalize_command(&self.tts_command);
        self.engine.normalize();
    }
}

/// BCP-47-ish: trimmed, `_` becomes `-`, region upper-cased.
pub fn normalize_language(raw: &str) -> String {
    let raw = raw.trim().replace('_', "-");
    let mut parts = raw.split('-').filter(|p| !p.is_empty());
    let Some(primary) = parts.next() else {
        return DEFAULT_LANGUAGE.into();
    };
    let mut out = primary.to_ascii_lowercase();
    for part in parts {
        out.push('-');
        if part.len() == 2 {
            out.push_str(&part.to_ascii_uppercase());
        } else {
            out.push_str(part);
        }
    }
    out
}

fn normalize_command(raw: &[String]) -> Vec<String> {
    raw.iter()
        .map(|part| part.trim().to_string())
        .filter(|part| !part.is_empty())
        .collect()
}

fn default_player_command() -> Vec<String> {
    if cfg!(target_os = "macos") {
        vec!["afplay".into()]
    } else {
        vec!["aplay".into(), "-q".into()]
    }
}

pub fn default_data_dir() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        std::env::var_os("APPDATA")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("."))
            .join("Lattice Labs")
            .join("Sayword")
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var_os("XDG_DATA_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|| {
                std::env::var_os("HOME")
                    .map(PathBuf::from)
                    .unwrap_or_else(|| PathBuf::from("/tmp"))
                    .join(".local")
                    .join("share")
            })
            .join("sayword")
    }
}

pub fn default_settings_path() -> PathBuf {
    default_data_dir().join("settings.json")
}

/// Missing or unreadable files yield defaults.
pub fn load_settings(path: &Path) -> AppSettings {
    let mut settings = fs::read_to_string(path)
        .ok()
        .and_then(|raw| serde_json::from_str::<AppSettings>(&raw).ok())
        .unwrap_or_default();
    settings.normalize();
    settings
}

pub fn save_settings(path: &Path, settings: &AppSettings) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let json = serde_json::to_string_pretty(settings).map_err(std::io::Error::other)?;
    fs::write(path, json)
}
