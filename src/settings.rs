#![forbid(unsafe_code)]

//! Operator-editable downloader settings, persisted as a TOML file under
//! the archive root. Reads fall back to defaults when the file is missing
//! or malformed; writes go through a temp file and an atomic rename.

use anyhow::{Context, Result};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::{
    fs,
    path::{Path, PathBuf},
};

pub const SETTINGS_FILE: &str = "download_settings.toml";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct DownloadSettings {
    /// Sleep between chained downloads to stay polite with the origin.
    pub slow_mode: bool,
    /// Base sleep in seconds; the worker applies +-10% jitter.
    pub sleep_time: u64,
    /// Optional cookies.txt passed to the downloader when non-empty.
    pub cookie_path: String,
    /// Where downloaded media lands; empty disables downloads.
    pub download_root: String,
    /// Root scanned for already-archived local files; empty disables scans.
    pub scan_root: String,
}

impl Default for DownloadSettings {
    fn default() -> Self {
        Self {
            slow_mode: true,
            sleep_time: 60,
            cookie_path: String::new(),
            download_root: String::new(),
            scan_root: String::new(),
        }
    }
}

/// Shared handle over the settings file. All readers see the last
/// successfully persisted value without re-reading the disk.
#[derive(Debug)]
pub struct SettingsStore {
    path: PathBuf,
    current: RwLock<DownloadSettings>,
}

impl SettingsStore {
    pub fn load(archive_root: &Path) -> Result<Self> {
        let path = archive_root.join(SETTINGS_FILE);
        let current = match fs::read_to_string(&path) {
            Ok(raw) => toml::from_str(&raw).unwrap_or_else(|err| {
                log::warn!("ignoring malformed {}: {err}", path.display());
                DownloadSettings::default()
            }),
            Err(_) => DownloadSettings::default(),
        };
        Ok(Self {
            path,
            current: RwLock::new(current),
        })
    }

    pub fn get(&self) -> DownloadSettings {
        self.current.read().clone()
    }

    pub fn update(&self, settings: DownloadSettings) -> Result<()> {
        let serialized = toml::to_string_pretty(&settings)
            .context("Serializing download settings")?;
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Creating {}", parent.display()))?;
        }
        let tmp_path = self.path.with_extension("toml.tmp");
        fs::write(&tmp_path, serialized)
            .with_context(|| format!("Writing {}", tmp_path.display()))?;
        fs::rename(&tmp_path, &self.path)
            .with_context(|| format!("Renaming into {}", self.path.display()))?;
        *self.current.write() = settings;
        Ok(())
    }
}
