//! Macro storage - one pretty-printed JSON document per macro

use crate::codec;
use crate::events::Macro;
use chrono::{DateTime, Utc};
use macro_core::{Error, Result, Settings};
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

const BACKUP_DIR: &str = "backups";

/// Listing summary, read from the file without keeping the actions
#[derive(Debug, Clone, Serialize)]
pub struct MacroInfo {
    pub name: String,
    pub created: DateTime<Utc>,
    pub actions_count: usize,
    /// Sum of waits in milliseconds
    pub total_duration: u64,
    pub file_size: u64,
    pub path: PathBuf,
}

pub struct MacroStorage {
    dir: PathBuf,
}

impl MacroStorage {
    pub fn new(settings: &Settings) -> Result<Self> {
        Self::with_dir(&settings.macros_dir)
    }

    pub fn with_dir(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    pub fn path(&self) -> &Path {
        &self.dir
    }

    /// Where a macro with this name lives (it may not exist yet)
    pub fn path_for(&self, name: &str) -> PathBuf {
        self.dir.join(codec::file_name(name))
    }

    pub fn exists(&self, name: &str) -> bool {
        self.path_for(name).is_file()
    }

    pub fn save(&self, m: &Macro, force: bool) -> Result<PathBuf> {
        let path = self.path_for(m.name());
        if path.exists() && !force {
            return Err(Error::already_exists(&format!("Macro '{}'", m.name())));
        }
        fs::write(&path, codec::to_string_pretty(m)?)?;
        info!(
            "Saved macro '{}' ({} actions) to {}",
            m.name(),
            m.actions().len(),
            path.display()
        );
        Ok(path)
    }

    /// Load by stored name, or by any path to a macro file
    pub fn load(&self, name_or_path: &str) -> Result<Macro> {
        let path = self.resolve(name_or_path)?;
        debug!("Loading macro from {}", path.display());
        Self::validate_file(&path)
    }

    /// Path of an existing macro, by file path first and then by name
    pub fn resolve(&self, name_or_path: &str) -> Result<PathBuf> {
        let direct = Path::new(name_or_path);
        if direct.is_file() {
            return Ok(direct.to_path_buf());
        }
        let stored = self.path_for(name_or_path);
        if stored.is_file() {
            return Ok(stored);
        }
        Err(Error::not_found(&format!("Macro '{}'", name_or_path))
            .with_suggestions(vec!["Run `mm list` to see saved macros".into()]))
    }

    /// Parse a file as a macro document
    pub fn validate_file(path: &Path) -> Result<Macro> {
        let text = fs::read_to_string(path)?;
        codec::parse_str(&text)
    }

    /// All readable macros, sorted by name
    pub fn list(&self) -> Result<Vec<MacroInfo>> {
        let mut out = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let path = entry?.path();
            if !path.is_file() || path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            match Self::info(&path) {
                Ok(info) => out.push(info),
                Err(e) => warn!("Skipping {}: {}", path.display(), e),
            }
        }
        out.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(out)
    }

    fn info(path: &Path) -> Result<MacroInfo> {
        let file_size = fs::metadata(path)?.len();
        let m = Self::validate_file(path)?;
        Ok(MacroInfo {
            name: m.name().to_string(),
            created: m.created(),
            actions_count: m.actions().len(),
            total_duration: m.total_duration_ms(),
            file_size,
            path: path.to_path_buf(),
        })
    }

    pub fn delete(&self, name: &str) -> Result<()> {
        let path = self.resolve_stored(name)?;
        fs::remove_file(&path)?;
        info!("Deleted macro '{}'", name);
        Ok(())
    }

    /// Copy to `backups/<stem>_backup_<timestamp>.json`
    pub fn backup(&self, name: &str) -> Result<PathBuf> {
        let path = self.resolve_stored(name)?;
        let stem = path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or(codec::DEFAULT_NAME);
        let dir = self.dir.join(BACKUP_DIR);
        fs::create_dir_all(&dir)?;
        let ts = Utc::now().format("%Y%m%d_%H%M%S");
        let dest = dir.join(format!("{}_backup_{}.json", stem, ts));
        fs::copy(&path, &dest)?;
        info!("Backed up '{}' to {}", name, dest.display());
        Ok(dest)
    }

    fn resolve_stored(&self, name: &str) -> Result<PathBuf> {
        let path = self.path_for(name);
        if path.is_file() {
            Ok(path)
        } else {
            Err(Error::not_found(&format!("Macro '{}'", name)))
        }
    }
}
