//! Settings loaded from `~/.macro-maker/config.json`
//!
//! Every field has a default, so a partial (or absent) file is fine.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

const APP_DIR: &str = ".macro-maker";
const CONFIG_FILE: &str = "config.json";

/// Root directory for macros, logs and the config file
pub fn data_dir() -> PathBuf {
    let home = std::env::var_os("HOME")
        .or_else(|| std::env::var_os("USERPROFILE"))
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("."));
    home.join(APP_DIR)
}

pub fn default_config_path() -> PathBuf {
    data_dir().join(CONFIG_FILE)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub macros_dir: PathBuf,
    pub log_file: PathBuf,
    pub engine: EngineSettings,
    pub recorder: RecorderSettings,
}

impl Default for Settings {
    fn default() -> Self {
        let dir = data_dir();
        Self {
            macros_dir: dir.join("macros"),
            log_file: dir.join("macro_operations.log"),
            engine: EngineSettings::default(),
            recorder: RecorderSettings::default(),
        }
    }
}

impl Settings {
    /// Load from `path` (or the default location); a missing file means defaults
    ///
    /// An explicit path that does not exist yet is not an error, so
    /// `config --init` can create it.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let p = path.map_or_else(default_config_path, Path::to_path_buf);
        if p.exists() {
            Self::from_file(&p)
        } else {
            debug!("No config at {}, using defaults", p.display());
            Ok(Self::default())
        }
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)?;
        let settings = serde_json::from_str(&text).map_err(|e| {
            Error::initialization(format!("Invalid config {}: {}", path.display(), e))
        })?;
        debug!("Loaded config from {}", path.display());
        Ok(settings)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }
}

/// Where to find the playback engine and how to call it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineSettings {
    /// Absolute paths tried first, then bare names looked up on PATH
    pub candidates: Vec<String>,
    /// Player script passed before the macro path
    pub script: Option<PathBuf>,
    pub timeout_secs: u64,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            candidates: default_candidates(),
            script: None,
            timeout_secs: 300,
        }
    }
}

#[cfg(target_os = "windows")]
fn default_candidates() -> Vec<String> {
    vec![
        r"C:\Program Files\AutoHotkey\AutoHotkey.exe".into(),
        r"C:\Program Files (x86)\AutoHotkey\AutoHotkey.exe".into(),
        r"C:\AutoHotkey\AutoHotkey.exe".into(),
        "autohotkey.exe".into(),
        "ahk.exe".into(),
    ]
}

#[cfg(not(target_os = "windows"))]
fn default_candidates() -> Vec<String> {
    vec!["autohotkey".into(), "AutoHotkey".into()]
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecorderSettings {
    /// Key that ends a recording instead of being recorded
    pub cancel_key: String,
    pub record_pointer: bool,
    pub record_keyboard: bool,
    pub channel_capacity: usize,
}

impl Default for RecorderSettings {
    fn default() -> Self {
        Self {
            cancel_key: "esc".into(),
            record_pointer: true,
            record_keyboard: true,
            channel_capacity: 10_000,
        }
    }
}
