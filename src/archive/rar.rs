//! RAR extraction: native `unrar` crate with an external-tool fallback

use super::tool::{self, RarTool};
use super::ExtractOptions;
use crate::error::{PipelineError, Result};
use crate::pipeline::events::{percent_of, EventSink};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{info, warn};

/// Which RAR implementation to use
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RarBackend {
    /// Native first, external tool if that fails
    #[default]
    Auto,
    /// `unrar` crate only
    Native,
    /// WinRAR / unrar binary only
    External,
}

impl std::str::FromStr for RarBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "auto" => Ok(RarBackend::Auto),
            "native" => Ok(RarBackend::Native),
            "external" => Ok(RarBackend::External),
            other => Err(format!(
                "unknown RAR backend '{}' (expected auto, native or external)",
                other
            )),
        }
    }
}

pub(super) async fn extract(
    archive: &Path,
    dest: &Path,
    options: &ExtractOptions,
    sink: &EventSink,
) -> Result<usize> {
    match options.rar_backend {
        RarBackend::Native => extract_native_blocking(archive, dest, sink).await,
        RarBackend::External => extract_external(archive, dest, options, sink).await,
        RarBackend::Auto => match extract_native_blocking(archive, dest, sink).await {
            Ok(entries) => Ok(entries),
            Err(e) => {
                warn!("Native RAR extraction failed ({}), trying external tool", e);
                sink.status("Retrying extraction with WinRAR...");
                extract_external(archive, dest, options, sink).await
            }
        },
    }
}

async fn extract_native_blocking(archive: &Path, dest: &Path, sink: &EventSink) -> Result<usize> {
    let (archive, dest, sink) = super::owned(archive, dest, sink);
    tokio::task::spawn_blocking(move || extract_native(&archive, &dest, &sink))
        .await
        .map_err(|e| PipelineError::Internal(format!("RAR extraction task failed: {}", e)))?
}

/// Extract with the `unrar` crate, one header at a time
fn extract_native(archive_path: &Path, dest: &Path, sink: &EventSink) -> Result<usize> {
    let total = unrar::Archive::new(archive_path)
        .open_for_listing()?
        .filter(|entry| entry.is_ok())
        .count();

    let archive = unrar::Archive::new(archive_path).open_for_processing()?;
    let mut cursor = Some(archive);
    let mut processed = 0usize;

    while let Some(archive) = cursor.take() {
        sink.progress(percent_of(processed as u64, total as u64));
        match archive.read_header()? {
            Some(entry) => {
                let next = if entry.entry().is_file() {
                    entry.extract_with_base(dest)?
                } else {
                    entry.skip()?
                };
                processed += 1;
                cursor = Some(next);
            }
            None => break,
        }
    }

    Ok(processed)
}

/// Extract by running WinRAR/unrar, installing WinRAR first if allowed.
///
/// External tools give no per-entry progress, so this reports only the
/// start and (from the caller) the end.
async fn extract_external(
    archive: &Path,
    dest: &Path,
    options: &ExtractOptions,
    sink: &EventSink,
) -> Result<usize> {
    let tool = match tool::find_rar_tool(options.tool.explicit_path.as_deref()) {
        Some(tool) => tool,
        None => {
            sink.status("WinRAR not found, installing...");
            tool::ensure_rar_tool(&options.tool, options.http.as_ref(), sink).await?
        }
    };

    info!("Extracting {} with {}", archive.display(), tool.path.display());
    sink.status("Extracting with WinRAR...");
    sink.progress(0);
    tool::extract_with(&tool, archive, dest).await?;

    Ok(count_entries(dest))
}

/// Files and directories now present under `dest`
fn count_entries(dest: &Path) -> usize {
    walkdir::WalkDir::new(dest)
        .min_depth(1)
        .into_iter()
        .filter_map(|e| e.ok())
        .count()
}

impl RarTool {
    /// Extraction arguments for this tool; WinRAR runs with its GUI suppressed
    pub(super) fn extract_args(&self, archive: &Path, dest: &Path) -> Vec<std::ffi::OsString> {
        let mut dest_arg = dest.as_os_str().to_os_string();
        dest_arg.push(std::path::MAIN_SEPARATOR_STR);

        let switches: &[&str] = if self.is_winrar() {
            &["x", "-ibck", "-inul", "-o+"]
        } else {
            &["x", "-inul", "-o+"]
        };

        let mut args: Vec<std::ffi::OsString> = switches.iter().map(Into::into).collect();
        args.push(archive.as_os_str().to_os_string());
        args.push(dest_arg);
        args
    }
}
