//! Job repository implementation.

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use serde_json::Value as JsonValue;
use sqlx::{Pool, Postgres, Row};
use tracing::{debug, info};
use uuid::Uuid;

use derivo_core::defaults::{retry_backoff, ERROR_TEXT_MAX_CHARS, JOB_MAX_ATTEMPTS};
use derivo_core::{
    Error, Job, JobPayload, JobRepository, JobStatus, JobType, QueueStats, Result,
};

/// PostgreSQL implementation of JobRepository.
#[derive(Clone)]
pub struct PgJobRepository {
    pool: Pool<Postgres>,
}

/// Bound an error message to the stored length limit, counting chars so a
/// multi-byte boundary can never split.
pub(crate) fn bound_error_text(message: &str) -> String {
    message.chars().take(ERROR_TEXT_MAX_CHARS).collect()
}

impl PgJobRepository {
    /// Create a new PgJobRepository with the given connection pool.
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }

    /// Convert JobStatus to string for database.
    #[allow(dead_code)]
    fn job_status_to_str(status: JobStatus) -> &'static str {
        match status {
            JobStatus::Queued => "queued",
            JobStatus::Running => "running",
            JobStatus::Done => "done",
            JobStatus::Error => "error",
        }
    }

    /// Convert string from database to JobStatus.
    fn str_to_job_status(s: &str) -> JobStatus {
        match s {
            "running" => JobStatus::Running,
            "done" => JobStatus::Done,
            "error" => JobStatus::Error,
            _ => JobStatus::Queued,
        }
    }

    /// Parse a job row into a Job struct.
    fn parse_job_row(row: sqlx::postgres::PgRow) -> Result<Job> {
        let job_type: String = row.get("job_type");
        let status: String = row.get("status");
        Ok(Job {
            id: row.get("id"),
            job_type: JobType::parse(&job_type)?,
            payload: row.get::<JsonValue, _>("payload"),
            status: Self::str_to_job_status(&status),
            attempts: row.get("attempts"),
            locked_by: row.get("locked_by"),
            locked_at: row.get("locked_at"),
            run_after: row.get("run_after"),
            last_error: row.get("last_error"),
            created_at: row.get("created_at"),
            updated_at: row.get("updated_at"),
        })
    }
}

const JOB_COLUMNS: &str = "id, job_type, payload, status, attempts, locked_by, locked_at, \
                           run_after, last_error, created_at, updated_at";

#[async_trait]
impl JobRepository for PgJobRepository {
    async fn enqueue(&self, payload: &JobPayload) -> Result<Option<Uuid>> {
        payload.validate()?;
        let job_id = Uuid::now_v7();
        let now = Utc::now();
        let job_type = payload.job_type();
        let raw = serde_json::to_value(payload)?;

        // Dedup is enforced by the partial unique index on
        // (job_type, asset_id) over live jobs. ON CONFLICT makes racing
        // inserts (repeated cache misses, rescans) collapse to one row even
        // under concurrent transactions; a WHERE NOT EXISTS guard would let
        // both snapshots miss each other's uncommitted insert.
        let result = sqlx::query_scalar::<_, Uuid>(
            "INSERT INTO derivative_job (id, job_type, payload, status, attempts, run_after, created_at, updated_at)
             VALUES ($1, $2, $3, 'queued', 0, $4, $4, $4)
             ON CONFLICT (job_type, ((payload->>'asset_id')::bigint))
                 WHERE status IN ('queued', 'running')
                 DO NOTHING
             RETURNING id",
        )
        .bind(job_id)
        .bind(job_type.as_str())
        .bind(&raw)
        .bind(now)
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::Database)?;

        if result.is_some() {
            debug!(
                subsystem = "db",
                op = "enqueue",
                job_id = %job_id,
                job_type = %job_type,
                asset_id = payload.asset_id(),
                "Job queued"
            );
        }
        Ok(result)
    }

    async fn claim_next(&self, worker_id: &str) -> Result<Option<Job>> {
        let now = Utc::now();

        // FOR UPDATE SKIP LOCKED makes the select-and-transition a single
        // indivisible step: two workers racing on one queued row see it
        // locked and skip, so a job is never claimed twice.
        let row = sqlx::query(&format!(
            "UPDATE derivative_job
             SET status = 'running', locked_by = $1, locked_at = $2,
                 attempts = attempts + 1, updated_at = $2
             WHERE id = (
                 SELECT id FROM derivative_job
                 WHERE status = 'queued' AND run_after <= $2
                 ORDER BY run_after ASC, created_at ASC
                 LIMIT 1
                 FOR UPDATE SKIP LOCKED
             )
             RETURNING {JOB_COLUMNS}"
        ))
        .bind(worker_id)
        .bind(now)
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::Database)?;

        row.map(Self::parse_job_row).transpose()
    }

    async fn mark_done(&self, job_id: Uuid) -> Result<()> {
        let now = Utc::now();
        sqlx::query(
            "UPDATE derivative_job
             SET status = 'done', locked_by = NULL, locked_at = NULL,
                 last_error = NULL, updated_at = $1
             WHERE id = $2",
        )
        .bind(now)
        .bind(job_id)
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;
        Ok(())
    }

    async fn mark_error(&self, job_id: Uuid, message: &str, attempts: i32) -> Result<()> {
        let now = Utc::now();
        let message = bound_error_text(message);

        if attempts >= JOB_MAX_ATTEMPTS {
            // Dead-letter: terminal error, never reclaimed.
            sqlx::query(
                "UPDATE derivative_job
                 SET status = 'error', locked_by = NULL, locked_at = NULL,
                     last_error = $1, updated_at = $2
                 WHERE id = $3",
            )
            .bind(&message)
            .bind(now)
            .bind(job_id)
            .execute(&self.pool)
            .await
            .map_err(Error::Database)?;

            info!(
                subsystem = "db",
                op = "mark_error",
                job_id = %job_id,
                attempts,
                "Job dead-lettered"
            );
        } else {
            let backoff = retry_backoff(attempts);
            let run_after = now + ChronoDuration::from_std(backoff).unwrap_or_default();
            sqlx::query(
                "UPDATE derivative_job
                 SET status = 'queued', locked_by = NULL, locked_at = NULL,
                     last_error = $1, run_after = $2, updated_at = $3
                 WHERE id = $4",
            )
            .bind(&message)
            .bind(run_after)
            .bind(now)
            .bind(job_id)
            .execute(&self.pool)
            .await
            .map_err(Error::Database)?;

            debug!(
                subsystem = "db",
                op = "mark_error",
                job_id = %job_id,
                attempts,
                backoff_secs = backoff.as_secs(),
                "Job requeued with backoff"
            );
        }
        Ok(())
    }

    async fn mark_error_permanent(&self, job_id: Uuid, message: &str) -> Result<()> {
        let now = Utc::now();
        sqlx::query(
            "UPDATE derivative_job
             SET status = 'error', locked_by = NULL, locked_at = NULL,
                 last_error = $1, updated_at = $2
             WHERE id = $3",
        )
        .bind(bound_error_text(message))
        .bind(now)
        .bind(job_id)
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;
        Ok(())
    }

    async fn recover_stale_locks(&self, stale_minutes: i64) -> Result<u64> {
        let now = Utc::now();
        let cutoff = now - ChronoDuration::minutes(stale_minutes);

        let result = sqlx::query(
            "UPDATE derivative_job
             SET status = 'queued', locked_by = NULL, locked_at = NULL, updated_at = $1
             WHERE status = 'running' AND locked_at < $2",
        )
        .bind(now)
        .bind(cutoff)
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;

        let recovered = result.rows_affected();
        if recovered > 0 {
            info!(
                subsystem = "db",
                op = "recover_stale_locks",
                recovered,
                stale_minutes,
                "Recovered jobs abandoned by crashed workers"
            );
        }
        Ok(recovered)
    }

    async fn get(&self, job_id: Uuid) -> Result<Option<Job>> {
        let row = sqlx::query(&format!(
            "SELECT {JOB_COLUMNS} FROM derivative_job WHERE id = $1"
        ))
        .bind(job_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::Database)?;

        row.map(Self::parse_job_row).transpose()
    }

    async fn pending_count(&self) -> Result<i64> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM derivative_job WHERE status = 'queued'")
                .fetch_one(&self.pool)
                .await
                .map_err(Error::Database)?;
        Ok(count)
    }

    async fn queue_stats(&self) -> Result<QueueStats> {
        let row = sqlx::query(
            "SELECT
                COUNT(*) FILTER (WHERE status = 'queued') as queued,
                COUNT(*) FILTER (WHERE status = 'running') as running,
                COUNT(*) FILTER (WHERE status = 'done' AND updated_at > NOW() - INTERVAL '1 hour') as done_last_hour,
                COUNT(*) FILTER (WHERE status = 'error' AND updated_at > NOW() - INTERVAL '1 hour') as error_last_hour,
                COUNT(*) as total
             FROM derivative_job",
        )
        .fetch_one(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(QueueStats {
            queued: row.get::<i64, _>("queued"),
            running: row.get::<i64, _>("running"),
            done_last_hour: row.get::<i64, _>("done_last_hour"),
            error_last_hour: row.get::<i64, _>("error_last_hour"),
            total: row.get::<i64, _>("total"),
        })
    }

    async fn cleanup(&self, keep_count: i64) -> Result<i64> {
        let result = sqlx::query(
            "DELETE FROM derivative_job
             WHERE id NOT IN (
                 SELECT id FROM derivative_job
                 ORDER BY
                     CASE WHEN status IN ('queued', 'running') THEN 0 ELSE 1 END,
                     updated_at DESC
                 LIMIT $1
             )",
        )
        .bind(keep_count)
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(result.rows_affected() as i64)
    }
}
