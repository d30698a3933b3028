//! Settings management
//!
//! Stores user preferences in `<config_dir>/games-store/settings.json` and
//! resolves them into the concrete paths a job needs.

use crate::archive::RarBackend;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::warn;

/// Application directory name under the platform config/data dirs
pub const APP_DIR_NAME: &str = "games-store";

/// Registry directory and file name, directly under the platform data dir
/// (`%APPDATA%\GamesStore\game_registry.json` on Windows)
const REGISTRY_DIR_NAME: &str = "GamesStore";
const REGISTRY_FILE_NAME: &str = "game_registry.json";

/// Default number of jobs allowed to run at once
pub const DEFAULT_MAX_CONCURRENT_JOBS: usize = 4;

fn default_max_concurrent_jobs() -> usize {
    DEFAULT_MAX_CONCURRENT_JOBS
}

fn default_true() -> bool {
    true
}

/// User settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Steam installation root (the directory containing `config/`)
    #[serde(default)]
    pub steam_path: String,

    /// Package download endpoint (`?appid=..&auth_code=..` is appended)
    #[serde(default)]
    pub api_url: String,

    /// Store catalog API base URL
    #[serde(default)]
    pub api_url_site: String,

    /// Auth code sent to the download endpoint
    #[serde(default)]
    pub auth_code: String,

    /// Maximum number of jobs running at once
    #[serde(default = "default_max_concurrent_jobs")]
    pub max_concurrent_jobs: usize,

    /// How RAR archives are unpacked
    #[serde(default)]
    pub rar_backend: RarBackend,

    /// Explicit path to WinRAR.exe / unrar
    #[serde(default)]
    pub rar_tool_path: String,

    /// Download and silently install WinRAR when no RAR tool is found
    #[serde(default = "default_true")]
    pub auto_install_rar_tool: bool,

    /// Override for the installed-games registry location
    #[serde(default)]
    pub registry_path: String,

    /// Override for where packages are downloaded
    #[serde(default)]
    pub download_dir: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            steam_path: String::new(),
            api_url: String::new(),
            api_url_site: String::new(),
            auth_code: String::new(),
            max_concurrent_jobs: DEFAULT_MAX_CONCURRENT_JOBS,
            rar_backend: RarBackend::default(),
            rar_tool_path: String::new(),
            auto_install_rar_tool: true,
            registry_path: String::new(),
            download_dir: String::new(),
        }
    }
}

impl Settings {
    /// Get the config directory path (`~/.config/games-store`)
    fn config_dir() -> Result<PathBuf> {
        Ok(dirs::config_dir()
            .context("Could not determine config directory")?
            .join(APP_DIR_NAME))
    }

    /// Get the settings file path
    pub fn settings_path() -> Result<PathBuf> {
        Ok(Self::config_dir()?.join("settings.json"))
    }

    /// Load settings from disk, or return defaults if not found
    pub fn load() -> Self {
        match Self::settings_path().and_then(|p| Self::load_from(&p)) {
            Ok(settings) => settings,
            Err(e) => {
                warn!("Could not load settings: {:#}. Using defaults.", e);
                Self::default()
            }
        }
    }

    /// Load settings from a specific file; a missing file yields defaults
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content =
            std::fs::read_to_string(path).with_context(|| format!("Failed to read {:?}", path))?;

        serde_json::from_str(&content).with_context(|| format!("Failed to parse {:?}", path))
    }

    /// Save settings to disk
    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::settings_path()?)
    }

    /// Save settings to a specific file
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {:?}", parent))?;
        }
        let content = serde_json::to_string_pretty(self).context("Failed to serialize settings")?;
        std::fs::write(path, content).with_context(|| format!("Failed to write {:?}", path))?;
        Ok(())
    }

    /// Whether the download endpoint is usable
    pub fn has_download_endpoint(&self) -> bool {
        !self.api_url.is_empty() && !self.auth_code.is_empty()
    }
}

/// Fully resolved paths and options used by the pipeline
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    /// Steam root; the `config/` subdirectories are created under it
    pub steam_path: Option<PathBuf>,
    pub registry_path: PathBuf,
    /// Parent of per-job scratch extraction directories
    pub scratch_root: PathBuf,
    pub download_dir: PathBuf,
    pub log_dir: PathBuf,
    pub max_concurrent_jobs: usize,
    pub rar_backend: RarBackend,
    pub rar_tool_path: Option<PathBuf>,
    pub auto_install_rar_tool: bool,
    pub api_url: Option<String>,
    pub auth_code: Option<String>,
}

impl RuntimeConfig {
    /// Resolve settings against the platform directories
    pub fn resolve(settings: &Settings) -> Result<Self, ConfigError> {
        let data_dir = data_dir()?;
        let temp = std::env::temp_dir();

        let registry_path = match non_empty(&settings.registry_path) {
            Some(path) => PathBuf::from(path),
            None => default_registry_path()?,
        };

        let download_dir = match non_empty(&settings.download_dir) {
            Some(dir) => PathBuf::from(dir),
            None => crate::paths::writable_dir(
                &temp.join("GameStore_Temp"),
                &data_dir.join("temp_downloads"),
            )
            .map_err(|e| ConfigError::DirectoryUnavailable(data_dir.join("temp_downloads"), e))?,
        };

        if settings.max_concurrent_jobs == 0 {
            return Err(ConfigError::InvalidConcurrency);
        }

        Ok(Self {
            steam_path: non_empty(&settings.steam_path).map(PathBuf::from),
            registry_path,
            scratch_root: temp.join("GameStore_Extract"),
            download_dir,
            log_dir: data_dir.join("logs"),
            max_concurrent_jobs: settings.max_concurrent_jobs,
            rar_backend: settings.rar_backend,
            rar_tool_path: non_empty(&settings.rar_tool_path).map(PathBuf::from),
            auto_install_rar_tool: settings.auto_install_rar_tool,
            api_url: non_empty(&settings.api_url).map(str::to_string),
            auth_code: non_empty(&settings.auth_code).map(str::to_string),
        })
    }

    /// Steam root, required by any job that installs files
    pub fn require_steam_path(&self) -> Result<&Path, ConfigError> {
        let path = self.steam_path.as_deref().ok_or(ConfigError::SteamNotConfigured)?;
        if !path.is_dir() {
            return Err(ConfigError::SteamNotFound(path.to_path_buf()));
        }
        Ok(path)
    }
}

/// Per-user application data directory (`%APPDATA%` on Windows)
pub fn data_dir() -> Result<PathBuf, ConfigError> {
    dirs::data_dir()
        .map(|d| d.join(APP_DIR_NAME))
        .ok_or(ConfigError::NoDataDir)
}

/// Default registry location, shared with earlier releases of the launcher
pub fn default_registry_path() -> Result<PathBuf, ConfigError> {
    dirs::data_dir()
        .map(|d| d.join(REGISTRY_DIR_NAME).join(REGISTRY_FILE_NAME))
        .ok_or(ConfigError::NoDataDir)
}

fn non_empty(value: &str) -> Option<&str> {
    let trimmed = value.trim();
    (!trimmed.is_empty()).then_some(trimmed)
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Steam path is not configured (use --steam-path or settings.json)")]
    SteamNotConfigured,

    #[error("Steam directory not found: {0}")]
    SteamNotFound(PathBuf),

    #[error("Could not determine the application data directory")]
    NoDataDir,

    #[error("Directory {0} is not usable: {1}")]
    DirectoryUnavailable(PathBuf, std::io::Error),

    #[error("max_concurrent_jobs must be at least 1")]
    InvalidConcurrency,
}

impl From<ConfigError> for crate::error::PipelineError {
    fn from(err: ConfigError) -> Self {
        Self::Config(err.to_string())
    }
}
