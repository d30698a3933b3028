//! Progress and status notifications emitted by a running job.
//!
//! Events of one job arrive in pipeline order and end with exactly one
//! terminal event (`Succeeded` or `Failed`). Sending never blocks, so it is
//! safe from blocking extraction threads as well as async tasks.

use std::path::PathBuf;
use tokio::sync::mpsc;

/// One notification from a job
#[derive(Debug, Clone, PartialEq)]
pub enum JobEvent {
    /// Free-text description of the current phase
    Status(String),
    /// Percentage of the current phase, 0-100
    Progress(u8),
    /// Instantaneous throughput in MB/s
    Speed(f64),
    /// Cumulative download size in whole megabytes; `total_mb` is `None` when
    /// the server sent no content length
    Downloaded {
        downloaded_mb: u64,
        total_mb: Option<u64>,
    },
    /// Terminal success
    Succeeded {
        message: String,
        path: Option<PathBuf>,
        game_id: String,
    },
    /// Terminal failure
    Failed { message: String },
}

impl JobEvent {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobEvent::Succeeded { .. } | JobEvent::Failed { .. })
    }
}

/// Sending half of a job's notification channel
#[derive(Debug, Clone)]
pub struct EventSink {
    tx: Option<mpsc::UnboundedSender<JobEvent>>,
}

/// Create a connected sink/receiver pair
pub fn channel() -> (EventSink, mpsc::UnboundedReceiver<JobEvent>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (EventSink { tx: Some(tx) }, rx)
}

impl EventSink {
    /// A sink that drops everything
    pub fn detached() -> Self {
        Self { tx: None }
    }

    /// Send an event. A receiver that went away (UI closed) is not an error.
    pub fn emit(&self, event: JobEvent) {
        if let Some(tx) = &self.tx {
            let _ = tx.send(event);
        }
    }

    pub fn status(&self, text: impl Into<String>) {
        self.emit(JobEvent::Status(text.into()));
    }

    pub fn progress(&self, percent: u8) {
        self.emit(JobEvent::Progress(percent.min(100)));
    }

    pub fn speed(&self, mb_per_sec: f64) {
        self.emit(JobEvent::Speed(mb_per_sec));
    }

    pub fn downloaded(&self, downloaded_mb: u64, total_mb: Option<u64>) {
        self.emit(JobEvent::Downloaded {
            downloaded_mb,
            total_mb,
        });
    }
}

/// Percentage of `done` out of `total`, rounded down; 0 when `total` is 0
pub fn percent_of(done: u64, total: u64) -> u8 {
    if total == 0 {
        return 0;
    }
    ((done.min(total) as u128 * 100) / total as u128) as u8
}
