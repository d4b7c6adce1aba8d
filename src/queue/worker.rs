//! Background worker that drains one named queue.

use std::error::Error;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::{InMemoryJobQueue, Job, JobState};

/// Error a handler may return; the job is then retried or failed.
pub type HandlerError = Box<dyn Error + Send + Sync>;

/// Consumer-side processing for one job.
#[async_trait]
pub trait JobHandler: Send + Sync + 'static {
    async fn handle(&self, job: &Job) -> Result<(), HandlerError>;
}

/// Statistics from the job worker.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct WorkerStats {
    pub jobs_completed: usize,
    pub jobs_retried: usize,
    pub jobs_failed: usize,
    pub polls: usize,
}

/// A tokio task that takes jobs from an [`InMemoryJobQueue`] and runs them
/// through a [`JobHandler`].
///
/// ## Example
///
/// ```ignore
/// let worker = JobWorker::spawn(queue.clone(), "payments", MyHandler, Duration::from_millis(10));
/// // ... publish work ...
/// let stats = worker.stop().await;
/// println!("completed {} jobs", stats.jobs_completed);
/// ```
pub struct JobWorker {
    stop_tx: Option<oneshot::Sender<()>>,
    handle: Option<JoinHandle<WorkerStats>>,
}

impl JobWorker {
    /// Spawn a worker polling `name` every `poll_interval`.
    ///
    /// Must be called from within a tokio runtime.
    pub fn spawn<H: JobHandler>(
        queue: InMemoryJobQueue,
        name: impl Into<String>,
        handler: H,
        poll_interval: Duration,
    ) -> Self {
        let (stop_tx, mut stop_rx) = oneshot::channel();
        let name = name.into();

        let handle = tokio::spawn(async move {
            let mut stats = WorkerStats::default();
            let mut ticker = tokio::time::interval(poll_interval);

            loop {
                tokio::select! {
                    _ = &mut stop_rx => break,
                    _ = ticker.tick() => {}
                }

                stats.polls += 1;

                loop {
                    let job = match queue.take(&name) {
                        Ok(Some(job)) => job,
                        Ok(None) => break,
                        Err(err) => {
                            warn!(queue = %name, error = %err, "failed to take job");
                            break;
                        }
                    };

                    match handler.handle(&job).await {
                        Ok(()) => {
                            if queue.complete(&job.id).is_ok() {
                                stats.jobs_completed += 1;
                                debug!(queue = %name, job_id = %job.id, "job completed");
                            }
                        }
                        Err(err) => match queue.fail(&job.id, err.to_string()) {
                            Ok(JobState::Failed) => {
                                stats.jobs_failed += 1;
                                warn!(queue = %name, job_id = %job.id, error = %err, "job failed permanently");
                            }
                            Ok(_) => {
                                stats.jobs_retried += 1;
                                debug!(queue = %name, job_id = %job.id, error = %err, "job will be retried");
                            }
                            Err(fail_err) => {
                                warn!(queue = %name, job_id = %job.id, error = %fail_err, "failed to record job failure");
                            }
                        },
                    }
                }
            }

            stats
        });

        Self {
            stop_tx: Some(stop_tx),
            handle: Some(handle),
        }
    }

    /// Signal the worker to stop and wait for it to finish.
    /// Returns the worker statistics.
    pub async fn stop(mut self) -> WorkerStats {
        if let Some(tx) = self.stop_tx.take() {
            let _ = tx.send(());
        }
        match self.handle.take() {
            Some(handle) => handle.await.unwrap_or_default(),
            None => WorkerStats::default(),
        }
    }
}

impl Drop for JobWorker {
    fn drop(&mut self) {
        if let Some(tx) = self.stop_tx.take() {
            let _ = tx.send(());
        }
    }
}
