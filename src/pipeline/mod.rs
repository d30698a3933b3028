//! Download → extract → install pipeline
//!
//! One [`Job`] runs these phases strictly in order:
//! 1. Fetch: stream the package to the download directory (download jobs)
//! 2. Extract: unpack into a fresh scratch directory
//! 3. Install: identify the game and copy its files into Steam
//! 4. Register: record the installed files in the registry
//! 5. Cleanup: always; scratch directory and downloaded package
//!
//! Every job ends with exactly one terminal [`JobEvent`]. Jobs run
//! concurrently through a [`JobPool`]; registry writes are serialised by the
//! [`RegistryStore`].

pub mod events;
pub mod manual;
pub mod pool;

pub use events::{channel, EventSink, JobEvent};
pub use manual::{manual_job, parse_manual_filename};
pub use pool::{JobHandle, JobPool};

use crate::archive::{self, tool::RarToolConfig, ExtractOptions};
use crate::config::RuntimeConfig;
use crate::downloaders::{self, FetchStats, HttpClient};
use crate::error::{IoResultExt, PipelineError, Result};
use crate::installer::{self, Bucket, GameIdentity, InstallType, InstalledGame, RegistryStore};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Where a job's package comes from
#[derive(Debug, Clone)]
pub enum JobSource {
    /// Fetch from the store; `url` overrides the configured endpoint
    Download { app_id: String, url: Option<String> },
    /// A local `Name (id).zip|rar` the user picked
    Manual {
        identity: GameIdentity,
        archive: PathBuf,
    },
}

/// What a job should do with its package
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobMode {
    /// Extract and install into Steam
    Install,
    /// Stop after the download and keep the package (download jobs only)
    DownloadOnly,
}

/// One unit of work for the pipeline
#[derive(Debug, Clone)]
pub struct Job {
    /// Name for status text and the download file name; looked up on Steam
    /// when absent
    pub display_name: Option<String>,
    pub source: JobSource,
    pub mode: JobMode,
}

impl Job {
    pub fn download(app_id: impl Into<String>) -> Self {
        Self {
            display_name: None,
            source: JobSource::Download {
                app_id: app_id.into(),
                url: None,
            },
            mode: JobMode::Install,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.display_name = Some(name.into());
        self
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        if let JobSource::Download { url: slot, .. } = &mut self.source {
            *slot = Some(url.into());
        }
        self
    }

    pub fn with_mode(mut self, mode: JobMode) -> Self {
        self.mode = mode;
        self
    }

    fn installs(&self) -> bool {
        self.mode == JobMode::Install || matches!(self.source, JobSource::Manual { .. })
    }
}

/// Result of a successful job
#[derive(Debug, Clone, PartialEq)]
pub struct JobOutcome {
    pub message: String,
    pub path: Option<PathBuf>,
    pub game_id: String,
}

/// Everything a job needs, shared by all jobs
#[derive(Debug, Clone)]
pub struct PipelineContext {
    pub config: Arc<RuntimeConfig>,
    pub http: HttpClient,
    pub registry: RegistryStore,
    pub extract: ExtractOptions,
}

impl PipelineContext {
    /// Build the shared context and start the registry writer. Must be called
    /// inside a tokio runtime.
    pub fn new(config: RuntimeConfig) -> Result<Self> {
        let http = HttpClient::new()?;
        let registry = RegistryStore::spawn(config.registry_path.clone());
        let extract = ExtractOptions {
            rar_backend: config.rar_backend,
            tool: RarToolConfig {
                explicit_path: config.rar_tool_path.clone(),
                auto_install: config.auto_install_rar_tool,
                download_dir: config.download_dir.clone(),
            },
            http: Some(http.clone()),
        };

        Ok(Self {
            config: Arc::new(config),
            http,
            registry,
            extract,
        })
    }
}

/// Files a job created that cleanup must deal with
#[derive(Debug, Default)]
struct Artifacts {
    scratch: Option<PathBuf>,
    downloaded: Option<PathBuf>,
}

/// Run `job` to completion, emitting events to `sink`.
///
/// Cleanup runs whatever the outcome, and the terminal event is emitted
/// after it.
pub async fn run_job(ctx: &PipelineContext, job: Job, sink: &EventSink) -> Result<JobOutcome> {
    let mut artifacts = Artifacts::default();
    let result = execute(ctx, &job, sink, &mut artifacts).await;

    let keep_download = job.mode == JobMode::DownloadOnly && result.is_ok();
    cleanup(artifacts, keep_download).await;

    match &result {
        Ok(outcome) => {
            info!("Job finished: {}", outcome.message);
            sink.emit(JobEvent::Succeeded {
                message: outcome.message.clone(),
                path: outcome.path.clone(),
                game_id: outcome.game_id.clone(),
            });
        }
        Err(e) => {
            error!("Job failed: {}", e);
            debug!("Job failure detail: {:?}", e);
            sink.emit(JobEvent::Failed {
                message: e.user_message(),
            });
        }
    }
    result
}

async fn execute(
    ctx: &PipelineContext,
    job: &Job,
    sink: &EventSink,
    artifacts: &mut Artifacts,
) -> Result<JobOutcome> {
    // Fail before downloading gigabytes into nowhere
    let steam_root = if job.installs() {
        Some(ctx.config.require_steam_path()?.to_path_buf())
    } else {
        None
    };

    let (archive, display_name, known_identity, fetch) = match &job.source {
        JobSource::Download { app_id, url } => {
            sink.status("Preparing download...");
            let url = match url {
                Some(url) => url.clone(),
                None => downloaders::package_url(
                    ctx.config.api_url.as_deref().unwrap_or_default(),
                    app_id,
                    ctx.config.auth_code.as_deref().unwrap_or_default(),
                )?,
            };
            let name = match &job.display_name {
                Some(name) => name.clone(),
                None => crate::catalog::resolve_game_name(&ctx.http, app_id).await,
            };

            let stats = fetch_package(ctx, &url, &name, app_id, sink, artifacts).await?;

            if job.mode == JobMode::DownloadOnly {
                return Ok(JobOutcome {
                    message: format!(
                        "{} downloaded. Average speed: {:.2} MB/s",
                        name,
                        stats.average_mb_per_sec()
                    ),
                    path: Some(stats.path.clone()),
                    game_id: app_id.clone(),
                });
            }
            (stats.path.clone(), name, None, Some(stats))
        }
        JobSource::Manual { identity, archive } => {
            if !archive.is_file() {
                return Err(PipelineError::io(
                    format!("Package not found: {}", archive.display()),
                    std::io::Error::from(std::io::ErrorKind::NotFound),
                ));
            }
            (
                archive.clone(),
                identity.name.clone(),
                Some(identity.clone()),
                None,
            )
        }
    };

    let steam_root = steam_root.ok_or_else(|| {
        PipelineError::Internal("install phase reached without a Steam path".into())
    })?;

    // Extract
    let format = archive::detect_format(&archive)?;
    let scratch = create_scratch_dir(&ctx.config.scratch_root)?;
    artifacts.scratch = Some(scratch.clone());
    sink.status(format!("Extracting {}...", display_name));
    sink.progress(0);
    archive::extract(&archive, &scratch, format, &ctx.extract, sink).await?;

    // Install
    sink.status("Installing game files...");
    let identity = match known_identity {
        Some(identity) => identity,
        None => installer::identify_game(&scratch, &display_name)
            .ok_or(PipelineError::UnidentifiedGame)?,
    };
    info!("Installing {} ({})", identity.name, identity.id);

    let files = {
        let scratch = scratch.clone();
        let steam_root = steam_root.clone();
        tokio::task::spawn_blocking(move || installer::install_files(&scratch, &steam_root))
            .await
            .map_err(|e| PipelineError::Internal(format!("install task failed: {}", e)))??
    };
    let file_count = files.total();

    // Register
    sink.status("Updating registry...");
    let install_type = match job.source {
        JobSource::Manual { .. } => Some(InstallType::Manual),
        JobSource::Download { .. } => None,
    };
    ctx.registry
        .record(
            &identity.name,
            InstalledGame::new(identity.id.clone(), files, install_type),
        )
        .await?;
    sink.progress(100);

    let mut message = format!(
        "{} installed successfully ({} files)",
        identity.name, file_count
    );
    if let Some(stats) = &fetch {
        message.push_str(&format!(
            ". Average speed: {:.2} MB/s",
            stats.average_mb_per_sec()
        ));
    }

    Ok(JobOutcome {
        message,
        path: Some(Bucket::Lua.target_dir(&steam_root)),
        game_id: identity.id,
    })
}

async fn fetch_package(
    ctx: &PipelineContext,
    url: &str,
    name: &str,
    app_id: &str,
    sink: &EventSink,
    artifacts: &mut Artifacts,
) -> Result<FetchStats> {
    sink.status(format!("Downloading {}...", name));
    sink.progress(0);

    let result = downloaders::download_to_dir(
        &ctx.http,
        url,
        &ctx.config.download_dir,
        |head| {
            let format = archive::ArchiveFormat::guess_from_response(head);
            crate::paths::package_file_name(name, app_id, format.extension())
        },
        sink,
    )
    .await;

    // A failed download has already removed its partial file
    let stats = result?;
    artifacts.downloaded = Some(stats.path.clone());
    Ok(stats)
}

/// A new, uniquely named directory under `root`
fn create_scratch_dir(root: &Path) -> Result<PathBuf> {
    std::fs::create_dir_all(root).io_context(|| format!("Failed to create {}", root.display()))?;
    let dir = tempfile::Builder::new()
        .prefix("extract_")
        .tempdir_in(root)
        .io_context(|| format!("Failed to create scratch directory in {}", root.display()))?;
    Ok(dir.keep())
}

async fn cleanup(artifacts: Artifacts, keep_download: bool) {
    let result = tokio::task::spawn_blocking(move || {
        if let Some(scratch) = &artifacts.scratch {
            crate::paths::remove_dir_best_effort(scratch);
        }
        if let Some(archive) = &artifacts.downloaded {
            if !keep_download {
                crate::paths::remove_file_best_effort(archive);
            }
        }
    })
    .await;

    if let Err(e) = result {
        warn!("Cleanup task failed: {}", e);
    }
}
