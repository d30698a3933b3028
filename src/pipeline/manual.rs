//! Manual installs from a package the user already has on disk

use super::{Job, JobMode, JobSource};
use crate::error::{PipelineError, Result};
use crate::installer::GameIdentity;
use once_cell::sync::Lazy;
use regex::Regex;
use std::path::Path;

/// `Game Name (12345).zip` / `.rar`, extension case-insensitive
static MANUAL_FILE_NAME: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^(.+?)\s*\((\d+)\)\.(zip|rar)$").unwrap());

/// Parse the game identity out of a manual package file name
pub fn parse_manual_filename(file_name: &str) -> Result<GameIdentity> {
    let caps = MANUAL_FILE_NAME
        .captures(file_name)
        .ok_or_else(|| PipelineError::InvalidManualFilename(file_name.to_string()))?;

    let name = caps[1].trim();
    if name.is_empty() {
        return Err(PipelineError::InvalidManualFilename(file_name.to_string()));
    }

    Ok(GameIdentity {
        name: name.to_string(),
        id: caps[2].to_string(),
    })
}

/// Validate `archive` and build the install job for it.
///
/// Rejected before any extraction when the name does not follow the
/// `Name (id).zip|rar` convention or the file is missing.
pub fn manual_job(archive: &Path) -> Result<Job> {
    let file_name = archive
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    let identity = parse_manual_filename(&file_name)?;

    if !archive.is_file() {
        return Err(PipelineError::io(
            format!("Package not found: {}", archive.display()),
            std::io::Error::from(std::io::ErrorKind::NotFound),
        ));
    }

    Ok(Job {
        display_name: Some(identity.name.clone()),
        source: JobSource::Manual {
            identity,
            archive: archive.to_path_buf(),
        },
        mode: JobMode::Install,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_valid_names() {
        let id = parse_manual_filename("MyGame (12345).zip").unwrap();
        assert_eq!(id.name, "MyGame");
        assert_eq!(id.id, "12345");

        let id = parse_manual_filename("Baldur's Gate 3 (1086940).RAR").unwrap();
        assert_eq!(id.name, "Baldur's Gate 3");
        assert_eq!(id.id, "1086940");

        let id = parse_manual_filename("Spaced(42).Zip").unwrap();
        assert_eq!(id.name, "Spaced");
    }

    #[test]
    fn test_parse_rejects_bad_names() {
        for name in [
            "MyGame.zip",
            "MyGame (12345).7z",
            "MyGame (abc).zip",
            "(12345).zip",
            "MyGame (12345).zip.part",
            "MyGame (12345)",
            "",
        ] {
            assert!(
                matches!(
                    parse_manual_filename(name),
                    Err(PipelineError::InvalidManualFilename(_))
                ),
                "accepted {:?}",
                name
            );
        }
    }

    #[test]
    fn test_manual_job_requires_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("Game (77777).zip");
        assert!(matches!(manual_job(&path), Err(PipelineError::Io { .. })));

        std::fs::write(&path, b"PK").unwrap();
        let job = manual_job(&path).unwrap();
        assert_eq!(job.display_name.as_deref(), Some("Game"));
        assert!(matches!(job.source, JobSource::Manual { .. }));
    }

    #[test]
    fn test_manual_job_rejects_name_before_touching_disk() {
        let err = manual_job(Path::new("/nowhere/whatever.zip")).unwrap_err();
        assert!(matches!(err, PipelineError::InvalidManualFilename(_)));
    }
}
