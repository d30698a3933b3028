//! External RAR tool (WinRAR / unrar) discovery, invocation and installation.
//!
//! Spawning a console-less GUI program from a background process is
//! unreliable on some Windows setups, so every invocation goes through an
//! ordered list of strategies (see [`Invocation`]) and the first one that
//! exits cleanly wins.

use crate::downloaders::{stream_to_file, HttpClient, ResponseHead, PROGRESS_INTERVAL};
use crate::error::{PipelineError, Result};
use crate::pipeline::events::EventSink;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Time allowed for one extraction attempt
pub const EXTRACT_TIMEOUT: Duration = Duration::from_secs(300);

/// Time allowed for one installer attempt
pub const INSTALL_TIMEOUT: Duration = Duration::from_secs(180);

/// Default WinRAR install locations
pub const WINRAR_PATHS: &[&str] = &[
    r"C:\Program Files\WinRAR\WinRAR.exe",
    r"C:\Program Files (x86)\WinRAR\WinRAR.exe",
];

/// Command-line tools searched on PATH after the fixed locations
const PATH_TOOLS: &[&str] = &["unrar", "rar", "WinRAR"];

const INSTALLER_URLS_X64: &[&str] = &[
    "https://www.win-rar.com/fileadmin/winrar-versions/winrar-x64-611br.exe",
    "https://www.rarlab.com/rar/winrar-x64-611br.exe",
    "https://www.win-rar.com/fileadmin/winrar-versions/winrar-x64-700br.exe",
];

const INSTALLER_URLS_X86: &[&str] = &[
    "https://www.win-rar.com/fileadmin/winrar-versions/wrar611br.exe",
    "https://www.rarlab.com/rar/wrar611br.exe",
];

const INSTALLER_FILE_NAME: &str = "winrar_installer.exe";
const INSTALLER_ATTEMPTS: u32 = 2;
const INSTALLER_RETRY_DELAY: Duration = Duration::from_secs(2);
const MIN_INSTALLER_SIZE: u64 = 2 * 1024 * 1024;
const POST_INSTALL_SETTLE: Duration = Duration::from_secs(2);

/// How the external tool is located and whether it may be installed
#[derive(Debug, Clone)]
pub struct RarToolConfig {
    /// Checked before the default locations
    pub explicit_path: Option<PathBuf>,
    /// Download and silently install WinRAR when nothing is found (Windows only)
    pub auto_install: bool,
    /// Where the installer is downloaded
    pub download_dir: PathBuf,
}

impl Default for RarToolConfig {
    fn default() -> Self {
        Self {
            explicit_path: None,
            auto_install: false,
            download_dir: std::env::temp_dir(),
        }
    }
}

/// A located RAR tool
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RarTool {
    pub path: PathBuf,
}

impl RarTool {
    /// WinRAR (the GUI program) takes different switches than unrar/rar
    pub fn is_winrar(&self) -> bool {
        self.path
            .file_stem()
            .map(|s| s.to_string_lossy().eq_ignore_ascii_case("winrar"))
            .unwrap_or(false)
    }

    fn name(&self) -> &'static str {
        if self.is_winrar() {
            "WinRAR"
        } else {
            "unrar"
        }
    }
}

/// Find a RAR tool: explicit path, then default WinRAR locations, then PATH.
pub fn find_rar_tool(explicit: Option<&Path>) -> Option<RarTool> {
    if let Some(path) = explicit {
        if path.is_file() {
            return Some(RarTool {
                path: path.to_path_buf(),
            });
        }
        warn!("Configured RAR tool not found: {}", path.display());
    }

    for candidate in WINRAR_PATHS {
        let path = Path::new(candidate);
        if path.is_file() {
            return Some(RarTool {
                path: path.to_path_buf(),
            });
        }
    }

    PATH_TOOLS
        .iter()
        .find_map(|name| which::which(name).ok())
        .map(|path| {
            debug!("Found RAR tool on PATH: {}", path.display());
            RarTool { path }
        })
}

/// One way of launching a program
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Invocation {
    /// Spawn directly with no console window and no inherited stdio
    Direct,
    /// Launch through the platform shell
    Shell,
    /// Spawn directly with default window behavior, capturing output
    Plain,
}

/// Order in which invocations are attempted
pub const INVOCATION_ORDER: [Invocation; 3] =
    [Invocation::Direct, Invocation::Shell, Invocation::Plain];

impl Invocation {
    fn command(self, program: &Path, args: &[OsString]) -> tokio::process::Command {
        let mut cmd = match self {
            Invocation::Direct => {
                let mut cmd = tokio::process::Command::new(program);
                cmd.args(args)
                    .stdin(Stdio::null())
                    .stdout(Stdio::null())
                    .stderr(Stdio::null());
                #[cfg(windows)]
                {
                    const CREATE_NO_WINDOW: u32 = 0x0800_0000;
                    cmd.creation_flags(CREATE_NO_WINDOW);
                }
                cmd
            }
            Invocation::Shell => shell_command(program, args),
            Invocation::Plain => {
                let mut cmd = tokio::process::Command::new(program);
                cmd.args(args)
                    .stdin(Stdio::null())
                    .stdout(Stdio::piped())
                    .stderr(Stdio::piped());
                cmd
            }
        };
        cmd.kill_on_drop(true);
        cmd
    }
}

#[cfg(windows)]
fn shell_command(program: &Path, args: &[OsString]) -> tokio::process::Command {
    let mut cmd = tokio::process::Command::new("cmd");
    cmd.arg("/C").arg(program).args(args);
    cmd.stdin(Stdio::null()).stdout(Stdio::null()).stderr(Stdio::piped());
    cmd
}

#[cfg(not(windows))]
fn shell_command(program: &Path, args: &[OsString]) -> tokio::process::Command {
    // Positional parameters avoid any quoting of paths
    let mut cmd = tokio::process::Command::new("sh");
    cmd.arg("-c")
        .arg("exec \"$0\" \"$@\"")
        .arg(program)
        .args(args);
    cmd.stdin(Stdio::null()).stdout(Stdio::null()).stderr(Stdio::piped());
    cmd
}

/// Run `program` with each invocation strategy in turn until one exits with
/// status 0. Each attempt gets `timeout`; a timed-out child is killed.
pub async fn run_with_strategies(
    tool: &str,
    program: &Path,
    args: &[OsString],
    timeout: Duration,
) -> Result<()> {
    let mut last_error = None;

    for strategy in INVOCATION_ORDER {
        debug!("Running {} ({:?}): {}", tool, strategy, program.display());
        match run_once(strategy, tool, program, args, timeout).await {
            Ok(()) => return Ok(()),
            Err(e) => {
                warn!("{} via {:?} failed: {}", tool, strategy, e);
                last_error = Some(e);
            }
        }
    }

    Err(last_error.unwrap_or_else(|| PipelineError::ToolFailed {
        tool: tool.to_string(),
        reason: "no invocation strategy available".into(),
    }))
}

async fn run_once(
    strategy: Invocation,
    tool: &str,
    program: &Path,
    args: &[OsString],
    timeout: Duration,
) -> Result<()> {
    let child = strategy
        .command(program, args)
        .spawn()
        .map_err(|e| PipelineError::ToolFailed {
            tool: tool.to_string(),
            reason: format!("could not start: {}", e),
        })?;

    let output = match tokio::time::timeout(timeout, child.wait_with_output()).await {
        Ok(result) => result.map_err(|e| PipelineError::ToolFailed {
            tool: tool.to_string(),
            reason: e.to_string(),
        })?,
        Err(_) => {
            return Err(PipelineError::ToolTimeout {
                tool: tool.to_string(),
                timeout,
            })
        }
    };

    if output.status.success() {
        return Ok(());
    }

    let stderr = String::from_utf8_lossy(&output.stderr);
    let stderr = stderr.trim();
    Err(PipelineError::ToolFailed {
        tool: tool.to_string(),
        reason: if stderr.is_empty() {
            format!("exited with {}", output.status)
        } else {
            format!("exited with {}: {}", output.status, stderr)
        },
    })
}

/// Extract `archive` into `dest` with an external tool
pub async fn extract_with(tool: &RarTool, archive: &Path, dest: &Path) -> Result<()> {
    let args = tool.extract_args(archive, dest);
    run_with_strategies(tool.name(), &tool.path, &args, EXTRACT_TIMEOUT).await
}

/// Return a usable RAR tool, downloading and installing WinRAR if allowed.
pub async fn ensure_rar_tool(
    config: &RarToolConfig,
    http: Option<&HttpClient>,
    sink: &EventSink,
) -> Result<RarTool> {
    if let Some(tool) = find_rar_tool(config.explicit_path.as_deref()) {
        return Ok(tool);
    }
    if !config.auto_install {
        return Err(PipelineError::ToolNotFound);
    }
    if !cfg!(windows) {
        warn!("No RAR tool found; automatic installation is only supported on Windows");
        return Err(PipelineError::ToolNotFound);
    }

    let owned_client;
    let http = match http {
        Some(client) => client,
        None => {
            owned_client = HttpClient::new()?;
            &owned_client
        }
    };

    sink.status("Downloading WinRAR...");
    let installer = download_installer(http, installer_urls(), &config.download_dir, sink).await?;

    sink.status("Installing WinRAR...");
    info!("Running WinRAR installer silently: {}", installer.display());
    let result = run_with_strategies(
        "WinRAR installer",
        &installer,
        &[OsString::from("/S")],
        INSTALL_TIMEOUT,
    )
    .await;
    crate::paths::remove_file_best_effort(&installer);
    result?;

    tokio::time::sleep(POST_INSTALL_SETTLE).await;
    let tool = find_rar_tool(config.explicit_path.as_deref()).ok_or(PipelineError::ToolNotFound)?;
    info!("WinRAR installed at {}", tool.path.display());
    Ok(tool)
}

/// Installer URLs for this architecture, in preference order
pub fn installer_urls() -> &'static [&'static str] {
    if cfg!(target_pointer_width = "64") {
        INSTALLER_URLS_X64
    } else {
        INSTALLER_URLS_X86
    }
}

/// Why an installer download attempt was abandoned
#[derive(Debug)]
enum FetchFailure {
    /// The URL will not yield an installer; move to the next one
    SkipUrl(PipelineError),
    /// Transient; the same URL may be retried
    Retry(PipelineError),
}

impl From<PipelineError> for FetchFailure {
    fn from(err: PipelineError) -> Self {
        FetchFailure::Retry(err)
    }
}

async fn download_installer(
    http: &HttpClient,
    urls: &[&str],
    dir: &Path,
    sink: &EventSink,
) -> Result<PathBuf> {
    tokio::fs::create_dir_all(dir)
        .await
        .map_err(|e| PipelineError::io(format!("Failed to create {}", dir.display()), e))?;
    let path = dir.join(INSTALLER_FILE_NAME);
    let mut last_error = PipelineError::ToolNotFound;

    for url in urls {
        for attempt in 1..=INSTALLER_ATTEMPTS {
            info!("Downloading WinRAR installer from {} (attempt {})", url, attempt);
            match fetch_installer(http, url, &path, sink).await {
                Ok(()) => return Ok(path),
                Err(FetchFailure::SkipUrl(e)) => {
                    warn!("Skipping {}: {}", url, e);
                    crate::paths::remove_file_best_effort(&path);
                    last_error = e;
                    break;
                }
                Err(FetchFailure::Retry(e)) => {
                    warn!("Installer download from {} failed: {}", url, e);
                    crate::paths::remove_file_best_effort(&path);
                    last_error = e;
                    if attempt < INSTALLER_ATTEMPTS {
                        tokio::time::sleep(INSTALLER_RETRY_DELAY).await;
                    }
                }
            }
        }
    }

    Err(last_error)
}

async fn fetch_installer(
    http: &HttpClient,
    url: &str,
    path: &Path,
    sink: &EventSink,
) -> std::result::Result<(), FetchFailure> {
    let response = http.get(url).await?;
    let head = ResponseHead::from_response(&response);
    if head.content_type.contains("html") || head.content_type.contains("text") {
        return Err(FetchFailure::SkipUrl(PipelineError::ToolFailed {
            tool: "WinRAR download".into(),
            reason: format!("server returned {} instead of an installer", head.content_type),
        }));
    }

    stream_to_file(
        response.bytes_stream(),
        path,
        head.content_length,
        sink,
        PROGRESS_INTERVAL,
    )
    .await?;

    validate_installer(path)
}

/// Reject files that are too small or are not Windows executables
fn validate_installer(path: &Path) -> std::result::Result<(), FetchFailure> {
    let invalid = |reason: String| PipelineError::ToolFailed {
        tool: "WinRAR download".into(),
        reason,
    };

    let size = std::fs::metadata(path)
        .map_err(|e| PipelineError::io(format!("Failed to stat {}", path.display()), e))?
        .len();
    if size < MIN_INSTALLER_SIZE {
        return Err(FetchFailure::SkipUrl(invalid(format!(
            "installer is only {} bytes",
            size
        ))));
    }

    let mut magic = [0u8; 2];
    let mut file = std::fs::File::open(path)
        .map_err(|e| PipelineError::io(format!("Failed to open {}", path.display()), e))?;
    std::io::Read::read_exact(&mut file, &mut magic)
        .map_err(|e| PipelineError::io(format!("Failed to read {}", path.display()), e))?;
    if &magic != b"MZ" {
        return Err(FetchFailure::Retry(invalid(
            "downloaded file is not a Windows executable".into(),
        )));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_sized(path: &Path, prefix: &[u8], size: usize) {
        let mut data = vec![0u8; size];
        data[..prefix.len()].copy_from_slice(prefix);
        std::fs::write(path, data).unwrap();
    }

    #[test]
    fn test_explicit_tool_path_wins() {
        let dir = tempfile::tempdir().unwrap();
        let tool_path = dir.path().join("WinRAR.exe");
        std::fs::write(&tool_path, b"").unwrap();

        let tool = find_rar_tool(Some(&tool_path)).unwrap();
        assert_eq!(tool.path, tool_path);
        assert!(tool.is_winrar());
    }

    #[test]
    fn test_is_winrar_by_stem() {
        assert!(!RarTool {
            path: PathBuf::from("/usr/bin/unrar")
        }
        .is_winrar());
        assert!(RarTool {
            path: PathBuf::from("winrar.EXE")
        }
        .is_winrar());
    }

    #[test]
    fn test_installer_urls_nonempty() {
        assert!(!installer_urls().is_empty());
        assert!(installer_urls().iter().all(|u| u.starts_with("https://")));
    }

    #[test]
    fn test_validate_installer_size_and_magic() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("setup.exe");

        write_sized(&path, b"MZ", 1024);
        assert!(matches!(
            validate_installer(&path),
            Err(FetchFailure::SkipUrl(_))
        ));

        write_sized(&path, b"<html>", MIN_INSTALLER_SIZE as usize);
        assert!(matches!(
            validate_installer(&path),
            Err(FetchFailure::Retry(_))
        ));

        write_sized(&path, b"MZ", MIN_INSTALLER_SIZE as usize);
        assert!(validate_installer(&path).is_ok());
    }

    #[tokio::test]
    async fn test_ensure_without_auto_install() {
        let config = RarToolConfig {
            explicit_path: Some(PathBuf::from("/nonexistent/WinRAR.exe")),
            auto_install: false,
            download_dir: std::env::temp_dir(),
        };
        // A real unrar on the test machine is acceptable; otherwise ToolNotFound
        match ensure_rar_tool(&config, None, &EventSink::detached()).await {
            Ok(tool) => assert!(tool.path.exists()),
            Err(e) => assert!(matches!(e, PipelineError::ToolNotFound)),
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_first_successful_strategy_wins() {
        let args = [OsString::from("-c"), OsString::from("exit 0")];
        run_with_strategies("sh", Path::new("/bin/sh"), &args, Duration::from_secs(10))
            .await
            .unwrap();
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_all_strategies_fail() {
        let args = [OsString::from("-c"), OsString::from("echo boom >&2; exit 3")];
        let err = run_with_strategies("sh", Path::new("/bin/sh"), &args, Duration::from_secs(10))
            .await
            .unwrap_err();
        match err {
            PipelineError::ToolFailed { reason, .. } => assert!(reason.contains("boom")),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_strategy_timeout() {
        let args = [OsString::from("-c"), OsString::from("sleep 5")];
        let err = run_with_strategies("sh", Path::new("/bin/sh"), &args, Duration::from_millis(100))
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::ToolTimeout { .. }));
    }

    #[tokio::test]
    async fn test_missing_program() {
        let err = run_with_strategies(
            "missing",
            Path::new("/definitely/not/here"),
            &[],
            Duration::from_secs(1),
        )
        .await
        .unwrap_err();
        assert!(matches!(
            err,
            PipelineError::ToolFailed { .. } | PipelineError::ToolTimeout { .. }
        ));
    }
}
