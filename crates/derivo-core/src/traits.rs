//! Repository trait definitions.
//!
//! Any durable store implementing these operations with the documented
//! atomicity is a valid substitute for the PostgreSQL implementations in
//! `derivo-db`.

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::Result;
use crate::models::{Asset, Derivative, DerivativeKind, Job, JobPayload, QueueStats};

/// Durable job queue with states {queued, running, done, error}.
#[async_trait]
pub trait JobRepository: Send + Sync {
    /// Queue a job, deduplicated on `(job_type, asset_id)`: if an equivalent
    /// job is already queued or running, this is a no-op returning `None`.
    /// Otherwise inserts a queued row with `run_after = now` and returns its id.
    async fn enqueue(&self, payload: &JobPayload) -> Result<Option<Uuid>>;

    /// Atomically claim the single oldest eligible queued job
    /// (`run_after <= now`): transitions it to running, records the lock
    /// owner and time, and increments attempts, as one indivisible operation.
    /// Two concurrent callers can never receive the same job.
    async fn claim_next(&self, worker_id: &str) -> Result<Option<Job>>;

    /// running → done; clears lock fields and error.
    async fn mark_done(&self, job_id: Uuid) -> Result<()>;

    /// Record a failed attempt. Below the dead-letter threshold the job goes
    /// back to queued with `run_after = now + retry_backoff(attempts)`; at or
    /// above it the job becomes terminal error. The message is length-bounded
    /// before storage.
    async fn mark_error(&self, job_id: Uuid, message: &str, attempts: i32) -> Result<()>;

    /// Permanently fail a job (malformed payload, path escape). Never retried.
    async fn mark_error_permanent(&self, job_id: Uuid, message: &str) -> Result<()>;

    /// Reset running jobs whose lock age exceeds `stale_minutes` back to
    /// queued; recovers work abandoned by a crashed worker. Returns the
    /// number of recovered jobs.
    async fn recover_stale_locks(&self, stale_minutes: i64) -> Result<u64>;

    /// Get job by ID.
    async fn get(&self, job_id: Uuid) -> Result<Option<Job>>;

    /// Count of queued jobs (eligible or backing off).
    async fn pending_count(&self) -> Result<i64>;

    /// Queue statistics summary.
    async fn queue_stats(&self) -> Result<QueueStats>;

    /// Trim finished jobs, keeping the most recent `keep_count` rows plus
    /// everything still queued or running. Returns the number deleted.
    async fn cleanup(&self, keep_count: i64) -> Result<i64>;
}

/// Read-only lookup into the source asset inventory, populated by an
/// external scanner.
#[async_trait]
pub trait AssetRepository: Send + Sync {
    /// Get asset by ID.
    async fn get(&self, asset_id: i64) -> Result<Option<Asset>>;
}

/// Per-(asset, kind) derivative status records.
#[async_trait]
pub trait DerivativeRepository: Send + Sync {
    /// Create or reset the record to pending with the expected path.
    async fn upsert_pending(
        &self,
        asset_id: i64,
        kind: DerivativeKind,
        path: &str,
    ) -> Result<()>;

    /// Mark ready after a validated atomic publish.
    async fn mark_ready(&self, asset_id: i64, kind: DerivativeKind, path: &str) -> Result<()>;

    /// Record a generation failure. Length-bounds `error_text` before storage.
    async fn mark_error(
        &self,
        asset_id: i64,
        kind: DerivativeKind,
        error_text: &str,
    ) -> Result<()>;

    /// Get the record for `(asset_id, kind)`.
    async fn get(&self, asset_id: i64, kind: DerivativeKind) -> Result<Option<Derivative>>;
}
