//! Filesystem helpers shared by the pipeline
//!
//! - Sanitising game names into Windows-safe file names
//! - Picking a download destination that never collides with a locked file
//! - Best-effort removal of scratch directories and archives (read-only aware)

use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Characters Windows refuses in file names
const FORBIDDEN_CHARS: &[char] = &['<', '>', ':', '"', '/', '\\', '|', '?', '*'];

/// Replace characters that are invalid in Windows file names with `_`
pub fn sanitize_file_name(name: &str) -> String {
    name.chars()
        .map(|c| if FORBIDDEN_CHARS.contains(&c) { '_' } else { c })
        .collect()
}

/// Lowercased extension of a path, without the dot
pub fn extension_lower(path: &Path) -> Option<String> {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
}

/// `"<Name> (<id>).<ext>"`, the naming convention of game packages
pub fn package_file_name(game_name: &str, game_id: &str, extension: &str) -> String {
    format!("{} ({}).{}", sanitize_file_name(game_name), game_id, extension)
}

/// Choose where to write a download named `file_name` inside `dir`.
///
/// An existing file is removed with `remove`. If removal is refused with a
/// permission error (file locked or read-only), a `_<unix-timestamp>` suffix is
/// appended to the stem instead of failing. Other removal errors propagate.
pub fn resolve_destination<F>(dir: &Path, file_name: &str, remove: F) -> io::Result<PathBuf>
where
    F: FnOnce(&Path) -> io::Result<()>,
{
    let candidate = dir.join(file_name);
    if !candidate.exists() {
        return Ok(candidate);
    }

    match remove(&candidate) {
        Ok(()) => Ok(candidate),
        Err(e) if e.kind() == io::ErrorKind::PermissionDenied => {
            let timestamp = chrono::Utc::now().timestamp();
            let suffixed = timestamped_name(file_name, timestamp);
            warn!(
                "Cannot replace {} ({}), writing to {} instead",
                candidate.display(),
                e,
                suffixed
            );
            Ok(dir.join(suffixed))
        }
        Err(e) => Err(e),
    }
}

/// `"Game (1).zip"` + 1700000000 -> `"Game (1)_1700000000.zip"`
fn timestamped_name(file_name: &str, timestamp: i64) -> String {
    match file_name.rfind('.') {
        Some(idx) if idx > 0 => format!(
            "{}_{}{}",
            &file_name[..idx],
            timestamp,
            &file_name[idx..]
        ),
        _ => format!("{}_{}", file_name, timestamp),
    }
}

/// Return `primary` if a file can be created in it, else `fallback`.
///
/// Both are created if missing.
pub fn writable_dir(primary: &Path, fallback: &Path) -> io::Result<PathBuf> {
    if probe_writable(primary).is_ok() {
        return Ok(primary.to_path_buf());
    }
    debug!(
        "{} is not writable, using {}",
        primary.display(),
        fallback.display()
    );
    std::fs::create_dir_all(fallback)?;
    Ok(fallback.to_path_buf())
}

fn probe_writable(dir: &Path) -> io::Result<()> {
    std::fs::create_dir_all(dir)?;
    let probe = dir.join(".write_test");
    std::fs::File::create(&probe)?;
    std::fs::remove_file(&probe)
}

/// Clear the read-only attribute on a path
fn clear_readonly(path: &Path) -> io::Result<()> {
    let mut perms = std::fs::metadata(path)?.permissions();
    if perms.readonly() {
        #[allow(clippy::permissions_set_readonly_false)]
        perms.set_readonly(false);
        std::fs::set_permissions(path, perms)?;
    }
    Ok(())
}

/// Remove a directory tree, retrying once with read-only flags cleared.
///
/// Failures are logged and reported as `false`, never raised.
pub fn remove_dir_best_effort(dir: &Path) -> bool {
    if !dir.exists() {
        return true;
    }

    match std::fs::remove_dir_all(dir) {
        Ok(()) => {
            debug!("Removed scratch directory {}", dir.display());
            return true;
        }
        Err(e) if e.kind() == io::ErrorKind::PermissionDenied => {
            debug!("Permission denied removing {}, clearing read-only flags", dir.display());
        }
        Err(e) => {
            warn!("Could not remove {}: {}", dir.display(), e);
            return false;
        }
    }

    for entry in walkdir::WalkDir::new(dir).into_iter().filter_map(|e| e.ok()) {
        if let Err(e) = clear_readonly(entry.path()) {
            debug!("Could not clear read-only on {}: {}", entry.path().display(), e);
        }
    }

    match std::fs::remove_dir_all(dir) {
        Ok(()) => {
            debug!("Removed scratch directory {} (read-only cleared)", dir.display());
            true
        }
        Err(e) => {
            warn!(
                "Could not remove {}, it will be left behind: {}",
                dir.display(),
                e
            );
            false
        }
    }
}

/// Remove a single file after clearing its read-only flag. Failures are logged.
pub fn remove_file_best_effort(path: &Path) -> bool {
    if !path.exists() {
        return true;
    }
    let _ = clear_readonly(path);
    match std::fs::remove_file(path) {
        Ok(()) => {
            debug!("Removed {}", path.display());
            true
        }
        Err(e) => {
            warn!("Could not remove {}: {}", path.display(), e);
            false
        }
    }
}
