//! Job worker: claims queued jobs and drives the generator.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{broadcast, mpsc};
use tokio::time::sleep;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use derivo_core::defaults::{
    JOB_POLL_INTERVAL_MS, STALE_LOCK_MINUTES, STALE_SWEEP_INTERVAL_SECS,
};
use derivo_core::{Error, Job, JobPayload, JobRepository, JobType, Result};
use derivo_db::Database;

use crate::enqueue::Enqueuer;
use crate::generator::Generator;

/// Capacity of the worker event channel.
const EVENT_BUS_CAPACITY: usize = 256;

/// Configuration for the job worker.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Unique worker identity recorded in job locks.
    pub worker_id: String,
    /// Polling interval in milliseconds when the queue is empty.
    pub poll_interval_ms: u64,
    /// How often to sweep for stale locks (Forever mode only).
    pub stale_sweep_interval_secs: u64,
    /// Lock age after which a running job counts as abandoned.
    pub stale_lock_minutes: i64,
    /// Whether to enable job processing.
    pub enabled: bool,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            worker_id: default_worker_id(),
            poll_interval_ms: JOB_POLL_INTERVAL_MS,
            stale_sweep_interval_secs: STALE_SWEEP_INTERVAL_SECS,
            stale_lock_minutes: STALE_LOCK_MINUTES,
            enabled: true,
        }
    }
}

fn default_worker_id() -> String {
    let host = std::env::var("HOSTNAME").unwrap_or_else(|_| "worker".to_string());
    format!("{}-{}", host, std::process::id())
}

impl WorkerConfig {
    /// Create config from environment variables (with defaults).
    ///
    /// | Variable | Default | Description |
    /// |----------|---------|-------------|
    /// | `WORKER_ID` | `<hostname>-<pid>` | Worker identity in job locks |
    /// | `WORKER_ENABLED` | `true` | Enable/disable job processing |
    /// | `JOB_POLL_INTERVAL_MS` | `500` | Polling interval when queue is empty |
    /// | `STALE_LOCK_MINUTES` | `10` | Lock age treated as abandoned |
    pub fn from_env() -> Self {
        let worker_id = std::env::var("WORKER_ID").unwrap_or_else(|_| default_worker_id());

        let enabled = std::env::var("WORKER_ENABLED")
            .map(|v| v != "false" && v != "0")
            .unwrap_or(true);

        let poll_interval_ms = std::env::var("JOB_POLL_INTERVAL_MS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(JOB_POLL_INTERVAL_MS);

        let stale_lock_minutes = std::env::var("STALE_LOCK_MINUTES")
            .ok()
            .and_then(|v| v.parse::<i64>().ok())
            .unwrap_or(STALE_LOCK_MINUTES)
            .max(1);

        Self {
            worker_id,
            poll_interval_ms,
            stale_sweep_interval_secs: STALE_SWEEP_INTERVAL_SECS,
            stale_lock_minutes,
            enabled,
        }
    }

    /// Set the worker identity.
    pub fn with_worker_id(mut self, id: impl Into<String>) -> Self {
        self.worker_id = id.into();
        self
    }

    /// Set the poll interval.
    pub fn with_poll_interval(mut self, ms: u64) -> Self {
        self.poll_interval_ms = ms;
        self
    }

    /// Enable or disable job processing.
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }
}

/// How long the worker loop runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    /// Poll until shut down.
    Forever,
    /// Process until the queue has no eligible jobs, then stop.
    Drain,
    /// Process at most `n` jobs, then stop.
    Max(u64),
}

/// Event emitted by the job worker.
#[derive(Debug, Clone)]
pub enum WorkerEvent {
    JobStarted {
        job_id: Uuid,
        job_type: JobType,
    },
    JobCompleted {
        job_id: Uuid,
        job_type: JobType,
    },
    JobFailed {
        job_id: Uuid,
        job_type: JobType,
        error: String,
        will_retry: bool,
    },
    WorkerStarted,
    WorkerStopped,
}

/// Handle for controlling a worker started in the background.
pub struct WorkerHandle {
    shutdown_tx: mpsc::Sender<()>,
    event_rx: broadcast::Receiver<WorkerEvent>,
}

impl WorkerHandle {
    /// Signal the worker to shut down after the current job.
    pub async fn shutdown(&self) -> Result<()> {
        self.shutdown_tx
            .send(())
            .await
            .map_err(|_| Error::Internal("Failed to send shutdown signal".into()))?;
        Ok(())
    }

    /// Get a receiver for worker events.
    pub fn events(&self) -> broadcast::Receiver<WorkerEvent> {
        self.event_rx.resubscribe()
    }
}

/// Job worker processing one job at a time.
pub struct Worker {
    db: Database,
    config: WorkerConfig,
    generator: Arc<Generator>,
    enqueuer: Enqueuer,
    event_tx: broadcast::Sender<WorkerEvent>,
}

impl Worker {
    pub fn new(db: Database, generator: Generator, config: WorkerConfig) -> Self {
        let (event_tx, _) = broadcast::channel(EVENT_BUS_CAPACITY);
        let enqueuer = Enqueuer::new(db.clone(), generator.config().clone());
        Self {
            db,
            config,
            generator: Arc::new(generator),
            enqueuer,
            event_tx,
        }
    }

    /// Get a receiver for worker events.
    pub fn events(&self) -> broadcast::Receiver<WorkerEvent> {
        self.event_tx.subscribe()
    }

    /// Run to completion in the given mode. Returns the number of jobs
    /// processed (completed or failed).
    pub async fn run(&self, mode: RunMode) -> Result<u64> {
        let (_tx, mut rx) = mpsc::channel(1);
        Ok(self.run_loop(mode, &mut rx).await)
    }

    /// Start in the background and return a control handle.
    pub fn start(self, mode: RunMode) -> WorkerHandle {
        let (shutdown_tx, mut shutdown_rx) = mpsc::channel(1);
        let event_rx = self.event_tx.subscribe();

        tokio::spawn(async move {
            self.run_loop(mode, &mut shutdown_rx).await;
        });

        WorkerHandle {
            shutdown_tx,
            event_rx,
        }
    }

    #[instrument(skip_all, fields(worker_id = %self.config.worker_id))]
    async fn run_loop(&self, mode: RunMode, shutdown_rx: &mut mpsc::Receiver<()>) -> u64 {
        if !self.config.enabled {
            info!("Worker is disabled, not starting");
            return 0;
        }

        info!(
            ?mode,
            poll_interval_ms = self.config.poll_interval_ms,
            "Worker started"
        );
        let _ = self.event_tx.send(WorkerEvent::WorkerStarted);

        let poll_interval = Duration::from_millis(self.config.poll_interval_ms);
        let sweep_interval = Duration::from_secs(self.config.stale_sweep_interval_secs);
        let mut last_sweep = Instant::now();
        let mut processed = 0u64;

        loop {
            if shutdown_rx.try_recv().is_ok() {
                info!("Worker received shutdown signal");
                break;
            }

            if mode == RunMode::Forever && last_sweep.elapsed() >= sweep_interval {
                match self
                    .db
                    .jobs
                    .recover_stale_locks(self.config.stale_lock_minutes)
                    .await
                {
                    Ok(recovered) if recovered > 0 => {
                        info!(recovered, "Recovered stale job locks")
                    }
                    Ok(_) => {}
                    Err(e) => warn!(error = %e, "Stale lock sweep failed"),
                }
                last_sweep = Instant::now();
            }

            let claimed = match self.db.jobs.claim_next(&self.config.worker_id).await {
                Ok(job) => job,
                Err(e) => {
                    error!(error = %e, "Failed to claim job");
                    sleep(poll_interval).await;
                    continue;
                }
            };

            match claimed {
                Some(job) => {
                    self.process_job(job).await;
                    processed += 1;
                    if let RunMode::Max(n) = mode {
                        if processed >= n {
                            break;
                        }
                    }
                }
                None => match mode {
                    RunMode::Drain => break,
                    _ => {
                        tokio::select! {
                            _ = shutdown_rx.recv() => {
                                info!("Worker received shutdown signal");
                                break;
                            }
                            _ = sleep(poll_interval) => {}
                        }
                    }
                },
            }
        }

        let _ = self.event_tx.send(WorkerEvent::WorkerStopped);
        info!(processed, "Worker stopped");
        processed
    }

    /// Handle one claimed job end to end. Never propagates: every outcome is
    /// recorded against the job row.
    async fn process_job(&self, job: Job) {
        let start = Instant::now();
        let job_id = job.id;
        let job_type = job.job_type;
        let attempts = job.attempts;

        info!(
            job_id = %job_id,
            job_type = %job_type,
            attempts,
            "Processing job"
        );
        let _ = self
            .event_tx
            .send(WorkerEvent::JobStarted { job_id, job_type });

        let payload = match JobPayload::decode(job_type, &job.payload) {
            Ok(p) => p,
            Err(e) => {
                // Malformed payloads can never succeed; fail terminally.
                self.fail_permanent(job_id, job_type, &e).await;
                return;
            }
        };
        let asset_id = payload.asset_id();

        // Builders run in their own task so a panic is contained and
        // recorded like any other failure.
        let generator = self.generator.clone();
        let result = match tokio::spawn(async move { generator.run_job(job_type, asset_id).await })
            .await
        {
            Ok(result) => result,
            Err(join_err) => Err(Error::Internal(format!("builder panicked: {}", join_err))),
        };

        match result {
            Ok(()) => {
                if let Err(e) = self.db.jobs.mark_done(job_id).await {
                    error!(error = %e, job_id = %job_id, "Failed to mark job done");
                    return;
                }
                info!(
                    job_id = %job_id,
                    job_type = %job_type,
                    duration_ms = start.elapsed().as_millis() as u64,
                    "Job completed"
                );
                let _ = self
                    .event_tx
                    .send(WorkerEvent::JobCompleted { job_id, job_type });
            }
            Err(Error::MissingDependency { job_type: dep }) => {
                // Queue the prerequisite, then retry this job with backoff.
                if let Err(e) = self.enqueuer.enqueue(dep, asset_id).await {
                    warn!(
                        error = %e,
                        job_id = %job_id,
                        dependency = %dep,
                        "Failed to enqueue dependency"
                    );
                }
                let message = format!("waiting on {}", dep);
                self.fail_retryable(job_id, job_type, attempts, &message, start)
                    .await;
            }
            Err(e @ (Error::Validation(_) | Error::NotFound(_))) => {
                self.fail_permanent(job_id, job_type, &e).await;
            }
            Err(e) => {
                self.fail_retryable(job_id, job_type, attempts, &e.to_string(), start)
                    .await;
            }
        }
    }

    async fn fail_retryable(
        &self,
        job_id: Uuid,
        job_type: JobType,
        attempts: i32,
        message: &str,
        start: Instant,
    ) {
        if let Err(e) = self.db.jobs.mark_error(job_id, message, attempts).await {
            error!(error = %e, job_id = %job_id, "Failed to record job error");
            return;
        }
        warn!(
            job_id = %job_id,
            job_type = %job_type,
            attempts,
            error = message,
            duration_ms = start.elapsed().as_millis() as u64,
            "Job failed"
        );
        let _ = self.event_tx.send(WorkerEvent::JobFailed {
            job_id,
            job_type,
            error: message.to_string(),
            will_retry: attempts < derivo_core::defaults::JOB_MAX_ATTEMPTS,
        });
    }

    async fn fail_permanent(&self, job_id: Uuid, job_type: JobType, error: &Error) {
        let message = error.to_string();
        if let Err(e) = self.db.jobs.mark_error_permanent(job_id, &message).await {
            error!(error = %e, job_id = %job_id, "Failed to record permanent job error");
            return;
        }
        warn!(
            job_id = %job_id,
            job_type = %job_type,
            error = %message,
            "Job failed permanently"
        );
        let _ = self.event_tx.send(WorkerEvent::JobFailed {
            job_id,
            job_type,
            error: message,
            will_retry: false,
        });
    }

    /// Get the pending job count.
    pub async fn pending_count(&self) -> Result<i64> {
        self.db.jobs.pending_count().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_worker_config_default() {
        let config = WorkerConfig::default();
        assert_eq!(config.poll_interval_ms, JOB_POLL_INTERVAL_MS);
        assert_eq!(config.stale_lock_minutes, STALE_LOCK_MINUTES);
        assert!(config.enabled);
        assert!(!config.worker_id.is_empty());
    }

    #[test]
    fn test_worker_config_builder() {
        let config = WorkerConfig::default()
            .with_worker_id("w-test")
            .with_poll_interval(1000)
            .with_enabled(false);

        assert_eq!(config.worker_id, "w-test");
        assert_eq!(config.poll_interval_ms, 1000);
        assert!(!config.enabled);
    }

    #[test]
    fn test_default_worker_id_includes_pid() {
        let id = default_worker_id();
        assert!(id.ends_with(&std::process::id().to_string()));
    }

    #[test]
    fn test_run_mode_equality() {
        assert_eq!(RunMode::Max(5), RunMode::Max(5));
        assert_ne!(RunMode::Max(5), RunMode::Max(6));
        assert_ne!(RunMode::Forever, RunMode::Drain);
    }

    #[test]
    fn test_worker_event_clone_and_debug() {
        let job_id = Uuid::now_v7();
        let event = WorkerEvent::JobFailed {
            job_id,
            job_type: JobType::VideoThumb,
            error: "ffmpeg timed out".to_string(),
            will_retry: true,
        };
        let cloned = event.clone();
        let debug_str = format!("{:?}", cloned);
        assert!(debug_str.contains("JobFailed"));
        assert!(debug_str.contains("VideoThumb"));
    }
}
