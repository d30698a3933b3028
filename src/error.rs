//! Error taxonomy for the download/extract/install pipeline.
//!
//! Every variant renders to the message shown to the user when a job
//! ends in failure. Application glue (CLI, catalog) uses `anyhow` instead.

use std::path::PathBuf;
use std::time::Duration;

/// Result alias for pipeline operations
pub type Result<T, E = PipelineError> = std::result::Result<T, E>;

/// Errors raised while running a job
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("HTTP {status} from {url}")]
    HttpStatus { status: u16, url: String },

    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("archive error: {0}")]
    Archive(String),

    #[error("RAR extraction tool not found and could not be installed")]
    ToolNotFound,

    #[error("{tool} timed out after {}s", .timeout.as_secs())]
    ToolTimeout { tool: String, timeout: Duration },

    #[error("{tool} failed: {reason}")]
    ToolFailed { tool: String, reason: String },

    #[error("could not identify the game in the package")]
    UnidentifiedGame,

    #[error("no valid files found in package")]
    NoValidFiles,

    #[error("invalid file name '{0}': expected \"Game Name (ID).zip\" or \"Game Name (ID).rar\"")]
    InvalidManualFilename(String),

    #[error("registry document {} is corrupt: {reason}", .path.display())]
    RegistryCorrupt { path: PathBuf, reason: String },

    #[error("registry error: {0}")]
    Registry(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl PipelineError {
    /// Wrap an I/O error with a short description of what was being done
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    /// Message carried by the terminal error notification
    pub fn user_message(&self) -> String {
        format!("Error: {}", self)
    }
}

impl From<zip::result::ZipError> for PipelineError {
    fn from(err: zip::result::ZipError) -> Self {
        Self::Archive(err.to_string())
    }
}

impl From<unrar::error::UnrarError> for PipelineError {
    fn from(err: unrar::error::UnrarError) -> Self {
        Self::Archive(err.to_string())
    }
}

/// Attach context to `std::io::Result` values
pub trait IoResultExt<T> {
    fn io_context<C: Into<String>>(self, context: impl FnOnce() -> C) -> Result<T>;
}

impl<T> IoResultExt<T> for std::io::Result<T> {
    fn io_context<C: Into<String>>(self, context: impl FnOnce() -> C) -> Result<T> {
        self.map_err(|source| PipelineError::io(context(), source))
    }
}
