//! Removing an installed game

use super::registry::{InstalledGame, RegistryStore};
use crate::error::{PipelineError, Result};
use std::path::Path;
use tracing::{info, warn};

/// Outcome of an uninstall
#[derive(Debug, Clone)]
pub struct UninstallReport {
    pub name: String,
    pub game: InstalledGame,
    pub files_removed: usize,
    pub files_missing: usize,
}

/// Delete the files recorded for `name` from the Steam config directories,
/// then drop its registry entry.
///
/// Missing files are ignored; files that cannot be deleted are logged and
/// the entry is removed anyway.
pub async fn uninstall(store: &RegistryStore, name: &str, steam_root: &Path) -> Result<UninstallReport> {
    let doc = store.snapshot().await?;
    let game = doc
        .get(name)
        .cloned()
        .ok_or_else(|| PipelineError::Registry(format!("game '{}' is not installed", name)))?;

    let steam_root = steam_root.to_path_buf();
    let files = game.clone();
    let (files_removed, files_missing) =
        tokio::task::spawn_blocking(move || remove_installed_files(&files, &steam_root))
            .await
            .map_err(|e| PipelineError::Internal(format!("uninstall task failed: {}", e)))?;

    store.remove(name).await?;
    info!(
        "Uninstalled '{}' ({} files removed, {} already gone)",
        name, files_removed, files_missing
    );

    Ok(UninstallReport {
        name: name.to_string(),
        game,
        files_removed,
        files_missing,
    })
}

/// Returns (removed, missing)
fn remove_installed_files(game: &InstalledGame, steam_root: &Path) -> (usize, usize) {
    let mut removed = 0;
    let mut missing = 0;

    for (bucket, file_name) in game.paths.iter() {
        // Entries are bare file names; anything else is not ours to delete
        if Path::new(file_name).file_name().map(|f| f.to_str()) != Some(Some(file_name)) {
            warn!("Skipping suspicious registry path '{}'", file_name);
            continue;
        }

        let path = bucket.target_dir(steam_root).join(file_name);
        match std::fs::remove_file(&path) {
            Ok(()) => removed += 1,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => missing += 1,
            Err(e) => warn!("Failed to delete {}: {}", path.display(), e),
        }
    }

    (removed, missing)
}
