//! File classification, game identification and copying into Steam

use crate::error::{IoResultExt, PipelineError, Result};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use walkdir::WalkDir;

/// Top-level folder named `Game Name (12345)`
static NAMED_FOLDER: Lazy<Regex> = Lazy::new(|| Regex::new(r"^(.*?)\s*\((\d+)\)$").unwrap());

/// App id embedded in a script file name
static EMBEDDED_ID: Lazy<Regex> = Lazy::new(|| Regex::new(r"(\d{5,7})").unwrap());

/// Category of an installable file, decided by extension
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Bucket {
    /// `.lua` plugin scripts
    Lua,
    /// `.st` auxiliary plugin files
    St,
    /// `.bin` stats files
    Bin,
    /// `.manifest` depot manifests
    Manifests,
}

impl Bucket {
    pub const ALL: [Bucket; 4] = [Bucket::Lua, Bucket::St, Bucket::Bin, Bucket::Manifests];

    /// Bucket for a file, matching the extension case-insensitively
    pub fn for_path(path: &Path) -> Option<Self> {
        match crate::paths::extension_lower(path)?.as_str() {
            "lua" => Some(Bucket::Lua),
            "st" => Some(Bucket::St),
            "bin" => Some(Bucket::Bin),
            "manifest" => Some(Bucket::Manifests),
            _ => None,
        }
    }

    /// Key used in the registry document
    pub fn key(&self) -> &'static str {
        match self {
            Bucket::Lua => "lua",
            Bucket::St => "st",
            Bucket::Bin => "bin",
            Bucket::Manifests => "manifests",
        }
    }

    /// Subdirectory of the Steam `config/` directory this bucket goes to
    pub fn config_subdir(&self) -> &'static str {
        match self {
            Bucket::Lua | Bucket::St => "stplug-in",
            Bucket::Bin => "StatsExport",
            Bucket::Manifests => "depotcache",
        }
    }

    pub fn target_dir(&self, steam_root: &Path) -> PathBuf {
        steam_root.join("config").join(self.config_subdir())
    }
}

/// Installed file names per bucket
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BucketFiles {
    #[serde(default)]
    pub lua: Vec<String>,
    #[serde(default)]
    pub st: Vec<String>,
    #[serde(default)]
    pub bin: Vec<String>,
    #[serde(default)]
    pub manifests: Vec<String>,
}

impl BucketFiles {
    pub fn get(&self, bucket: Bucket) -> &[String] {
        match bucket {
            Bucket::Lua => &self.lua,
            Bucket::St => &self.st,
            Bucket::Bin => &self.bin,
            Bucket::Manifests => &self.manifests,
        }
    }

    fn get_mut(&mut self, bucket: Bucket) -> &mut Vec<String> {
        match bucket {
            Bucket::Lua => &mut self.lua,
            Bucket::St => &mut self.st,
            Bucket::Bin => &mut self.bin,
            Bucket::Manifests => &mut self.manifests,
        }
    }

    /// Record a file name once per bucket
    pub fn push(&mut self, bucket: Bucket, name: String) {
        let list = self.get_mut(bucket);
        if !list.contains(&name) {
            list.push(name);
        }
    }

    pub fn total(&self) -> usize {
        Bucket::ALL.iter().map(|b| self.get(*b).len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.total() == 0
    }

    /// Every (bucket, file name) pair
    pub fn iter(&self) -> impl Iterator<Item = (Bucket, &str)> {
        Bucket::ALL
            .into_iter()
            .flat_map(move |b| self.get(b).iter().map(move |f| (b, f.as_str())))
    }
}

/// Display name and Steam app id of a game
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GameIdentity {
    pub name: String,
    pub id: String,
}

/// Work out which game an extracted package belongs to.
///
/// A top-level folder named `Name (id)` wins. Otherwise the first `.lua` or
/// `.st` file whose name contains a 5-7 digit number supplies the id, and
/// `fallback_name` is used as the name.
pub fn identify_game(scratch: &Path, fallback_name: &str) -> Option<GameIdentity> {
    let mut top_level: Vec<_> = fs::read_dir(scratch)
        .ok()?
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().map(|t| t.is_dir()).unwrap_or(false))
        .map(|e| e.file_name().to_string_lossy().to_string())
        .collect();
    top_level.sort();

    for folder in &top_level {
        if let Some(caps) = NAMED_FOLDER.captures(folder) {
            let name = caps[1].trim();
            let identity = GameIdentity {
                name: if name.is_empty() {
                    fallback_name.to_string()
                } else {
                    name.to_string()
                },
                id: caps[2].to_string(),
            };
            debug!("Identified {:?} from folder '{}'", identity, folder);
            return Some(identity);
        }
    }

    for entry in WalkDir::new(scratch)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
    {
        if !matches!(Bucket::for_path(entry.path()), Some(Bucket::Lua | Bucket::St)) {
            continue;
        }
        let file_name = entry.file_name().to_string_lossy();
        if let Some(caps) = EMBEDDED_ID.captures(&file_name) {
            let identity = GameIdentity {
                name: fallback_name.to_string(),
                id: caps[1].to_string(),
            };
            debug!("Identified {:?} from file '{}'", identity, file_name);
            return Some(identity);
        }
    }

    None
}

/// Copy every recognised file under `scratch` into its bucket directory
/// below `steam_root`.
///
/// Files are copied, never moved. Subdirectories in the package are
/// flattened; a file name seen twice in one bucket is copied twice (last
/// one wins) but recorded once. Fails with [`PipelineError::NoValidFiles`]
/// before touching `steam_root` when nothing is recognised.
pub fn install_files(scratch: &Path, steam_root: &Path) -> Result<BucketFiles> {
    let plan: Vec<(Bucket, PathBuf)> = WalkDir::new(scratch)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .filter_map(|e| Bucket::for_path(e.path()).map(|b| (b, e.into_path())))
        .collect();

    if plan.is_empty() {
        return Err(PipelineError::NoValidFiles);
    }

    for bucket in Bucket::ALL {
        let dir = bucket.target_dir(steam_root);
        fs::create_dir_all(&dir).io_context(|| format!("Failed to create {}", dir.display()))?;
    }

    let mut installed = BucketFiles::default();
    for (bucket, source) in plan {
        let Some(file_name) = source.file_name() else {
            continue;
        };
        let target = bucket.target_dir(steam_root).join(file_name);
        fs::copy(&source, &target).io_context(|| {
            format!("Failed to copy {} to {}", source.display(), target.display())
        })?;
        debug!("Installed {} -> {}", source.display(), target.display());
        installed.push(bucket, file_name.to_string_lossy().to_string());
    }

    info!(
        "Installed {} files (lua: {}, st: {}, bin: {}, manifests: {})",
        installed.total(),
        installed.lua.len(),
        installed.st.len(),
        installed.bin.len(),
        installed.manifests.len()
    );
    Ok(installed)
}
