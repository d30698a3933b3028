//! Bounded concurrent job execution

use super::events::{self, EventSink, JobEvent};
use super::{run_job, Job, JobOutcome, PipelineContext};
use crate::error::{PipelineError, Result};
use std::sync::Arc;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinHandle;
use tracing::error;

/// Runs jobs with at most `max_concurrent_jobs` in flight
#[derive(Debug, Clone)]
pub struct JobPool {
    ctx: Arc<PipelineContext>,
    permits: Arc<Semaphore>,
}

/// A submitted job: its event stream and its result
#[derive(Debug)]
pub struct JobHandle {
    /// Ends after the terminal event once the job is done
    pub events: mpsc::UnboundedReceiver<JobEvent>,
    task: JoinHandle<Result<JobOutcome>>,
}

impl JobHandle {
    /// Wait for the job, discarding any events not yet read
    pub async fn wait(self) -> Result<JobOutcome> {
        self.task
            .await
            .map_err(|e| PipelineError::Internal(format!("job task failed: {}", e)))?
    }

    /// Next event, or `None` once the job has finished and all events were read
    pub async fn next_event(&mut self) -> Option<JobEvent> {
        self.events.recv().await
    }
}

impl JobPool {
    pub fn new(ctx: PipelineContext) -> Self {
        let permits = ctx.config.max_concurrent_jobs.max(1);
        Self {
            ctx: Arc::new(ctx),
            permits: Arc::new(Semaphore::new(permits)),
        }
    }

    pub fn context(&self) -> &PipelineContext {
        &self.ctx
    }

    /// Queue `job`; it starts as soon as a slot is free.
    ///
    /// A panic inside the job is reported as a `Failed` event like any other
    /// error.
    pub fn submit(&self, job: Job) -> JobHandle {
        let (sink, events) = events::channel();
        let ctx = Arc::clone(&self.ctx);
        let permits = Arc::clone(&self.permits);
        let job_sink = sink.clone();

        let inner = tokio::spawn(async move {
            if permits.available_permits() == 0 {
                job_sink.status("Waiting for other downloads to finish...");
            }
            let _permit = permits.acquire_owned().await.map_err(|_| {
                let err = PipelineError::Internal("job pool is shut down".into());
                job_sink.emit(JobEvent::Failed {
                    message: err.user_message(),
                });
                err
            })?;
            run_job(&ctx, job, &job_sink).await
        });

        let task = tokio::spawn(supervise(inner, sink));
        JobHandle { events, task }
    }
}

/// Turn a panicked or cancelled job into an ordinary failure
async fn supervise(
    inner: JoinHandle<Result<JobOutcome>>,
    sink: EventSink,
) -> Result<JobOutcome> {
    match inner.await {
        Ok(result) => result,
        Err(e) => {
            error!("Job task aborted: {}", e);
            let err = PipelineError::Internal(if e.is_panic() {
                "unexpected failure while running the job".into()
            } else {
                "job was cancelled".into()
            });
            sink.emit(JobEvent::Failed {
                message: err.user_message(),
            });
            Err(err)
        }
    }
}
