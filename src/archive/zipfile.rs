//! ZIP extraction

use crate::error::{IoResultExt, Result};
use crate::pipeline::events::{percent_of, EventSink};
use std::fs::{self, File};
use std::io::BufReader;
use std::path::Path;
use tracing::warn;

/// Extract all entries of a ZIP into `dest`.
///
/// Progress is entry index / entry count, so it is not linear in bytes.
/// Entries whose names would escape `dest` are skipped.
pub(super) fn extract_all(archive_path: &Path, dest: &Path, sink: &EventSink) -> Result<usize> {
    let file = File::open(archive_path)
        .io_context(|| format!("Failed to open ZIP: {}", archive_path.display()))?;
    let mut archive = zip::ZipArchive::new(BufReader::new(file))?;
    let total = archive.len();

    for i in 0..total {
        sink.progress(percent_of(i as u64, total as u64));

        let mut entry = archive.by_index(i)?;
        let Some(relative) = entry.enclosed_name() else {
            warn!("Skipping ZIP entry with unsafe path: {}", entry.name());
            continue;
        };
        let out_path = dest.join(relative);

        if entry.is_dir() {
            fs::create_dir_all(&out_path)
                .io_context(|| format!("Failed to create {}", out_path.display()))?;
            continue;
        }

        if let Some(parent) = out_path.parent() {
            fs::create_dir_all(parent)
                .io_context(|| format!("Failed to create {}", parent.display()))?;
        }
        let mut out = File::create(&out_path)
            .io_context(|| format!("Failed to create {}", out_path.display()))?;
        std::io::copy(&mut entry, &mut out)
            .io_context(|| format!("Failed to extract {}", out_path.display()))?;
    }

    Ok(total)
}
