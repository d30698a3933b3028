//! Archive handling.
//!
//! Game packages are ZIP or RAR containers. ZIP is unpacked with the `zip`
//! crate; RAR with the `unrar` crate or, when that is not wanted or fails,
//! with an external WinRAR/unrar binary (see [`tool`]).
//!
//! # Format detection
//!
//! 1. Magic bytes (`PK` -> ZIP, `Rar!` -> RAR)
//! 2. File extension
//!
//! Downloads additionally guess a format from the response headers before the
//! body arrives, so the file can be named (see [`ArchiveFormat::guess_from_response`]).
//! That guess falls back to a size heuristic which is known to be unreliable;
//! the magic-byte check after the download overrides it.

pub mod rar;
pub mod tool;
mod zipfile;

pub use rar::RarBackend;

use crate::downloaders::{HttpClient, ResponseHead};
use crate::error::{IoResultExt, PipelineError, Result};
use crate::pipeline::events::EventSink;
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Responses larger than this with no other hint are assumed to be RAR
pub const RAR_SIZE_HEURISTIC: u64 = 100 * 1024 * 1024;

/// Supported package container formats
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveFormat {
    Zip,
    Rar,
}

impl ArchiveFormat {
    /// File extension without the dot
    pub fn extension(&self) -> &'static str {
        match self {
            ArchiveFormat::Zip => "zip",
            ArchiveFormat::Rar => "rar",
        }
    }

    /// Case-insensitive match on a bare extension
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_ascii_lowercase().as_str() {
            "zip" => Some(ArchiveFormat::Zip),
            "rar" => Some(ArchiveFormat::Rar),
            _ => None,
        }
    }

    /// Identify a container from its first bytes
    pub fn from_magic(magic: &[u8]) -> Option<Self> {
        if magic.len() >= 2 && magic[0..2] == [0x50, 0x4B] {
            return Some(ArchiveFormat::Zip);
        }
        // RAR4: Rar!\x1A\x07\x00, RAR5: Rar!\x1A\x07\x01\x00
        if magic.len() >= 4 && magic[0..4] == [0x52, 0x61, 0x72, 0x21] {
            return Some(ArchiveFormat::Rar);
        }
        None
    }

    /// Guess from download response headers.
    ///
    /// `content-type` / `content-disposition` mentioning zip or rar wins;
    /// otherwise anything over [`RAR_SIZE_HEURISTIC`] is assumed to be RAR.
    pub fn guess_from_response(head: &ResponseHead) -> Self {
        let hints = [&head.content_type, &head.content_disposition];
        if hints.iter().any(|h| h.contains("zip")) {
            return ArchiveFormat::Zip;
        }
        if hints.iter().any(|h| h.contains("rar")) {
            return ArchiveFormat::Rar;
        }

        match head.content_length {
            Some(len) if len > RAR_SIZE_HEURISTIC => {
                debug!("No format hint in headers, {} bytes -> assuming RAR", len);
                ArchiveFormat::Rar
            }
            _ => ArchiveFormat::Zip,
        }
    }
}

/// Detect the format of an archive on disk: magic bytes first, then extension.
pub fn detect_format(path: &Path) -> Result<ArchiveFormat> {
    let mut file =
        File::open(path).io_context(|| format!("Failed to open archive {}", path.display()))?;
    let mut magic = [0u8; 8];
    let read = file.read(&mut magic).unwrap_or(0);

    if let Some(format) = ArchiveFormat::from_magic(&magic[..read]) {
        return Ok(format);
    }

    crate::paths::extension_lower(path)
        .as_deref()
        .and_then(ArchiveFormat::from_extension)
        .ok_or_else(|| {
            PipelineError::Archive(format!(
                "unsupported archive format: {}",
                path.display()
            ))
        })
}

/// How RAR archives are handled
#[derive(Debug, Clone)]
pub struct ExtractOptions {
    pub rar_backend: RarBackend,
    pub tool: tool::RarToolConfig,
    /// Needed to fetch the WinRAR installer when auto-install kicks in
    pub http: Option<HttpClient>,
}

impl Default for ExtractOptions {
    fn default() -> Self {
        Self {
            rar_backend: RarBackend::Auto,
            tool: tool::RarToolConfig::default(),
            http: None,
        }
    }
}

/// Unpack every entry of `archive` into `dest`.
///
/// Progress is reported as entries processed / total entries. Returns the
/// number of entries processed.
pub async fn extract(
    archive: &Path,
    dest: &Path,
    format: ArchiveFormat,
    options: &ExtractOptions,
    sink: &EventSink,
) -> Result<usize> {
    tokio::fs::create_dir_all(dest)
        .await
        .io_context(|| format!("Failed to create {}", dest.display()))?;

    info!(
        "Extracting {} ({:?}) into {}",
        archive.display(),
        format,
        dest.display()
    );

    let entries = match format {
        ArchiveFormat::Zip => {
            let (archive, dest, sink) = owned(archive, dest, sink);
            tokio::task::spawn_blocking(move || zipfile::extract_all(&archive, &dest, &sink))
                .await
                .map_err(|e| PipelineError::Internal(format!("ZIP extraction task failed: {}", e)))??
        }
        ArchiveFormat::Rar => rar::extract(archive, dest, options, sink).await?,
    };

    sink.progress(100);
    info!("Extraction complete: {} entries", entries);
    Ok(entries)
}

fn owned(archive: &Path, dest: &Path, sink: &EventSink) -> (PathBuf, PathBuf, EventSink) {
    (archive.to_path_buf(), dest.to_path_buf(), sink.clone())
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::events::{channel, JobEvent};

    fn head(content_type: &str, disposition: &str, len: Option<u64>) -> ResponseHead {
        ResponseHead {
            content_type: content_type.into(),
            content_disposition: disposition.into(),
            content_length: len,
        }
    }

    #[test]
    fn test_from_extension() {
        assert_eq!(ArchiveFormat::from_extension("ZIP"), Some(ArchiveFormat::Zip));
        assert_eq!(ArchiveFormat::from_extension("Rar"), Some(ArchiveFormat::Rar));
        assert_eq!(ArchiveFormat::from_extension("7z"), None);
    }

    #[test]
    fn test_from_magic() {
        assert_eq!(ArchiveFormat::from_magic(b"PK\x03\x04"), Some(ArchiveFormat::Zip));
        assert_eq!(ArchiveFormat::from_magic(b"Rar!\x1a\x07\x01\x00"), Some(ArchiveFormat::Rar));
        assert_eq!(ArchiveFormat::from_magic(b"MZ"), None);
        assert_eq!(ArchiveFormat::from_magic(b""), None);
    }

    #[test]
    fn test_guess_from_headers() {
        assert_eq!(
            ArchiveFormat::guess_from_response(&head("application/zip", "", None)),
            ArchiveFormat::Zip
        );
        assert_eq!(
            ArchiveFormat::guess_from_response(&head(
                "application/octet-stream",
                "attachment; filename=\"game.rar\"",
                Some(10)
            )),
            ArchiveFormat::Rar
        );
    }

    #[test]
    fn test_guess_size_heuristic() {
        let big = Some(RAR_SIZE_HEURISTIC + 1);
        assert_eq!(
            ArchiveFormat::guess_from_response(&head("application/octet-stream", "", big)),
            ArchiveFormat::Rar
        );
        assert_eq!(
            ArchiveFormat::guess_from_response(&head("application/octet-stream", "", Some(1024))),
            ArchiveFormat::Zip
        );
        assert_eq!(
            ArchiveFormat::guess_from_response(&head("", "", None)),
            ArchiveFormat::Zip
        );
    }

    #[test]
    fn test_detect_format_prefers_magic_over_extension() {
        let dir = tempfile::tempdir().unwrap();
        // Named .rar by a wrong header guess, but really a ZIP
        let path = dir.path().join("Game (1).rar");
        test_support::write_zip(&path, &[("a.lua", b"x")]);
        assert_eq!(detect_format(&path).unwrap(), ArchiveFormat::Zip);
    }

    #[test]
    fn test_detect_format_falls_back_to_extension() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("odd.RAR");
        std::fs::write(&path, b"????????").unwrap();
        assert_eq!(detect_format(&path).unwrap(), ArchiveFormat::Rar);

        let unknown = dir.path().join("odd.bin");
        std::fs::write(&unknown, b"????????").unwrap();
        assert!(matches!(detect_format(&unknown), Err(PipelineError::Archive(_))));
    }

    #[tokio::test]
    async fn test_extract_zip_reports_progress() {
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("pkg.zip");
        test_support::write_zip(
            &archive,
            &[
                ("Game (10)/", b""),
                ("Game (10)/a.lua", b"lua"),
                ("Game (10)/b.manifest", b"manifest"),
                ("Game (10)/sub/c.bin", b"bin"),
            ],
        );
        let dest = dir.path().join("out");
        let (sink, mut rx) = channel();

        let entries = extract(&archive, &dest, ArchiveFormat::Zip, &ExtractOptions::default(), &sink)
            .await
            .unwrap();

        assert_eq!(entries, 4);
        assert_eq!(
            std::fs::read(dest.join("Game (10)").join("sub").join("c.bin")).unwrap(),
            b"bin"
        );

        let mut percents = Vec::new();
        while let Ok(event) = rx.try_recv() {
            if let JobEvent::Progress(p) = event {
                percents.push(p);
            }
        }
        assert_eq!(percents.first(), Some(&0));
        assert_eq!(percents.last(), Some(&100));
    }

    #[tokio::test]
    async fn test_extract_corrupt_zip_fails() {
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("broken.zip");
        std::fs::write(&archive, b"PK\x03\x04 definitely not a zip").unwrap();
        let result = extract(
            &archive,
            &dir.path().join("out"),
            ArchiveFormat::Zip,
            &ExtractOptions::default(),
            &EventSink::detached(),
        )
        .await;
        assert!(matches!(result, Err(PipelineError::Archive(_))));
    }
}
