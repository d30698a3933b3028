//! Games Store - game package installer for Steam

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use futures::future::join_all;
use games_store::archive::RarBackend;
use games_store::catalog::CatalogClient;
use games_store::config::{self, RuntimeConfig, Settings};
use games_store::downloaders::HttpClient;
use games_store::installer::{self, RegistryDocument, RegistryStore};
use games_store::pipeline::{self, Job, JobEvent, JobHandle, JobMode, JobPool, PipelineContext};
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "games-store")]
#[command(version)]
#[command(about = "Download game packages and install them into Steam")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging (use RUST_LOG=debug for more detail)
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Settings file (default: <config dir>/games-store/settings.json)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Steam installation directory
    #[arg(long, global = true, env = "GAMES_STORE_STEAM_PATH")]
    steam_path: Option<PathBuf>,

    /// Auth code for the download endpoint
    #[arg(long, global = true, env = "GAMES_STORE_AUTH_CODE", hide_env_values = true)]
    auth_code: Option<String>,

    /// Package download endpoint
    #[arg(long, global = true, env = "API_URL")]
    api_url: Option<String>,

    /// Store catalog API base URL
    #[arg(long, global = true, env = "API_URL_SITE")]
    api_url_site: Option<String>,

    /// Maximum number of jobs running at once
    #[arg(short, long, global = true)]
    jobs: Option<usize>,

    /// RAR backend: auto, native or external
    #[arg(long, global = true)]
    rar_backend: Option<RarBackend>,
}

#[derive(Subcommand)]
enum Commands {
    /// Download a game package from the store and install it
    Download {
        /// Steam app id
        app_id: String,

        /// Display name (looked up on Steam when omitted)
        #[arg(long)]
        name: Option<String>,

        /// Download from this URL instead of the configured endpoint
        #[arg(long)]
        url: Option<String>,

        /// Only download; keep the package and skip installation
        #[arg(long)]
        download_only: bool,
    },

    /// Install local packages named "Game Name (ID).zip" or "Game Name (ID).rar"
    Install {
        /// Package files
        #[arg(required = true)]
        archives: Vec<PathBuf>,
    },

    /// List installed games
    List,

    /// Remove an installed game's files and registry entry
    Uninstall {
        /// Display name as shown by `list`
        name: String,
    },

    /// Search the store catalog; without a query, list the store front page
    Search {
        /// At least 3 characters
        query: Option<String>,
    },

    /// Show Steam details and store availability for a game
    Details {
        /// Steam app id
        app_id: String,
    },

    /// Show the effective settings and paths
    Settings {
        /// Write the effective settings (including command-line overrides) to the settings file
        #[arg(long)]
        save: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_dir = config::data_dir()?.join("logs");
    games_store::logging::init(&log_dir, cli.verbose)?;

    let settings_path = match &cli.config {
        Some(path) => path.clone(),
        None => Settings::settings_path()?,
    };
    let mut settings = Settings::load_from(&settings_path).unwrap_or_else(|e| {
        warn!("Could not load settings: {:#}. Using defaults.", e);
        Settings::default()
    });
    apply_overrides(&mut settings, &cli);
    let runtime = RuntimeConfig::resolve(&settings)?;

    match cli.command {
        Commands::Download {
            app_id,
            name,
            url,
            download_only,
        } => {
            let mut job = Job::download(app_id);
            if let Some(name) = name {
                job = job.with_name(name);
            }
            if let Some(url) = url {
                job = job.with_url(url);
            }
            if download_only {
                job = job.with_mode(JobMode::DownloadOnly);
            }

            let pool = JobPool::new(PipelineContext::new(runtime)?);
            let label = job_label(&job);
            let multi = MultiProgress::new();
            let outcome = render_job(pool.submit(job), job_bar(&multi, &label)?).await;
            match outcome {
                Ok(outcome) => {
                    if let Some(path) = outcome.path {
                        println!("{}", path.display());
                    }
                }
                Err(e) => bail!(e.user_message()),
            }
        }

        Commands::Install { archives } => {
            let pool = JobPool::new(PipelineContext::new(runtime)?);
            let multi = MultiProgress::new();
            let mut rejected = 0usize;
            let mut running = Vec::new();

            for archive in &archives {
                match pipeline::manual_job(archive) {
                    Ok(job) => {
                        let bar = job_bar(&multi, &job_label(&job))?;
                        running.push(render_job(pool.submit(job), bar));
                    }
                    Err(e) => {
                        eprintln!("{}: {}", archive.display(), e.user_message());
                        rejected += 1;
                    }
                }
            }

            let results = join_all(running).await;
            let failed = results.iter().filter(|r| r.is_err()).count() + rejected;
            println!(
                "\n{} installed, {} failed",
                archives.len() - failed,
                failed
            );
            if failed > 0 {
                bail!("{} package(s) could not be installed", failed);
            }
        }

        Commands::List => {
            let doc = RegistryDocument::load_lenient(&runtime.registry_path);
            if doc.is_empty() {
                println!("No games installed.");
                return Ok(());
            }

            println!("{:<40} {:>10}  {:<16}  {:>5}  Type", "Name", "App ID", "Installed", "Files");
            for (name, game) in doc.iter() {
                let kind = match game.install_type {
                    Some(installer::InstallType::Manual) => "manual",
                    None => "download",
                };
                println!(
                    "{:<40} {:>10}  {:<16}  {:>5}  {}",
                    name,
                    game.id,
                    game.install_date,
                    game.paths.total(),
                    kind
                );
            }
            println!("\n{} games", doc.len());
        }

        Commands::Uninstall { name } => {
            let steam_root = runtime.require_steam_path()?.to_path_buf();
            let store = RegistryStore::spawn(runtime.registry_path.clone());
            let report = installer::uninstall(&store, &name, &steam_root)
                .await
                .map_err(|e| anyhow::anyhow!(e.user_message()))?;
            println!(
                "Uninstalled {} ({}): {} files removed, {} already missing",
                report.name, report.game.id, report.files_removed, report.files_missing
            );
        }

        Commands::Search { query } => {
            let client = catalog_client(&settings)?;
            let games = match query {
                Some(query) => client.search(&query).await?,
                None => client.public_games().await?,
            };
            if games.is_empty() {
                println!("No games found.");
            }
            for game in &games {
                println!("{:>10}  {}", game.appid, game.name);
            }
        }

        Commands::Details { app_id } => {
            let client = catalog_client(&settings)?;
            let details = client
                .details(&app_id)
                .await
                .with_context(|| format!("Could not load details for {}", app_id))?;

            println!("=== {} ({}) ===", details.name, details.app_id);
            if let Some(date) = &details.release_date {
                println!("Released:   {}", date);
            }
            if !details.developers.is_empty() {
                println!("Developers: {}", details.developers.join(", "));
            }
            if !details.publishers.is_empty() {
                println!("Publishers: {}", details.publishers.join(", "));
            }
            match details.keys_available {
                Some(0) => println!("Available:  no keys left"),
                Some(keys) => println!("Available:  {} keys", keys),
                None => println!("Available:  unknown"),
            }
            if !details.short_description.is_empty() {
                println!("\n{}", details.short_description);
            }
        }

        Commands::Settings { save } => {
            if save {
                settings.save_to(&settings_path)?;
                info!("Settings saved to {}", settings_path.display());
            }

            let mut shown = settings.clone();
            if !shown.auth_code.is_empty() {
                shown.auth_code = "********".into();
            }
            println!("Settings file: {}", settings_path.display());
            println!("{}", serde_json::to_string_pretty(&shown)?);
            println!();
            println!("Registry:      {}", runtime.registry_path.display());
            println!("Downloads:     {}", runtime.download_dir.display());
            println!("Scratch:       {}", runtime.scratch_root.display());
            println!("Logs:          {}", runtime.log_dir.display());
        }
    }

    Ok(())
}

/// Command-line flags and environment variables win over the settings file
fn apply_overrides(settings: &mut Settings, cli: &Cli) {
    if let Some(path) = &cli.steam_path {
        settings.steam_path = path.to_string_lossy().to_string();
    }
    if let Some(code) = &cli.auth_code {
        settings.auth_code = code.clone();
    }
    if let Some(url) = &cli.api_url {
        settings.api_url = url.clone();
    }
    if let Some(url) = &cli.api_url_site {
        settings.api_url_site = url.clone();
    }
    if let Some(jobs) = cli.jobs {
        settings.max_concurrent_jobs = jobs;
    }
    if let Some(backend) = cli.rar_backend {
        settings.rar_backend = backend;
    }
}

fn catalog_client(settings: &Settings) -> Result<CatalogClient> {
    let base = Some(settings.api_url_site.trim())
        .filter(|s| !s.is_empty())
        .map(str::to_string);
    Ok(CatalogClient::new(HttpClient::new()?, base))
}

fn job_label(job: &Job) -> String {
    match (&job.display_name, &job.source) {
        (Some(name), _) => name.clone(),
        (None, pipeline::JobSource::Download { app_id, .. }) => format!("app {}", app_id),
        (None, pipeline::JobSource::Manual { archive, .. }) => archive.display().to_string(),
    }
}

fn job_bar(multi: &MultiProgress, label: &str) -> Result<ProgressBar> {
    let bar = multi.add(ProgressBar::new(100));
    bar.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} {prefix:.bold} [{bar:40.cyan/blue}] {pos:>3}% {msg}")?
            .progress_chars("=>-"),
    );
    bar.set_prefix(truncate_name(label, 30));
    bar.enable_steady_tick(Duration::from_millis(100));
    Ok(bar)
}

/// Follow a job's events on its progress bar until it finishes
async fn render_job(
    mut handle: JobHandle,
    bar: ProgressBar,
) -> games_store::Result<pipeline::JobOutcome> {
    let mut status = String::new();
    let mut transfer = String::new();
    let mut speed = None;

    while let Some(event) = handle.next_event().await {
        match event {
            JobEvent::Status(text) => {
                status = text;
                transfer.clear();
                speed = None;
            }
            JobEvent::Progress(percent) => bar.set_position(u64::from(percent)),
            JobEvent::Speed(mb_per_sec) => speed = Some(mb_per_sec),
            JobEvent::Downloaded {
                downloaded_mb,
                total_mb,
            } => {
                transfer = match total_mb {
                    Some(total) => format!("{}/{} MB", downloaded_mb, total),
                    None => format!("{} MB", downloaded_mb),
                };
            }
            JobEvent::Succeeded { message, .. } => {
                bar.set_position(100);
                bar.finish_with_message(message);
                continue;
            }
            JobEvent::Failed { message } => {
                bar.abandon_with_message(message);
                continue;
            }
        }

        let mut msg = status.clone();
        if !transfer.is_empty() {
            msg.push_str(&format!(" {}", transfer));
        }
        if let Some(speed) = speed {
            msg.push_str(&format!(" @ {:.2} MB/s", speed));
        }
        bar.set_message(msg);
    }

    handle.wait().await
}

fn truncate_name(name: &str, max: usize) -> String {
    if name.chars().count() <= max {
        return name.to_string();
    }
    let kept: String = name.chars().take(max.saturating_sub(3)).collect();
    format!("{}...", kept)
}
