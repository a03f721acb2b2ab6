//! Tests for the job queue lifecycle.
//!
//! Covers: deduplicated enqueue, atomic claiming with attempt counting,
//! retry backoff scheduling, dead-lettering, and stale lock recovery.

use chrono::{Duration as ChronoDuration, Utc};

use crate::pool::{create_pool_with_config, PoolConfig};
use crate::test_fixtures::{TestDatabase, DEFAULT_TEST_DATABASE_URL};
use crate::PgJobRepository;
use derivo_core::defaults::JOB_MAX_ATTEMPTS;
use derivo_core::{JobPayload, JobRepository, JobStatus, JobType};

/// A second repository over its own connection into the test schema, so two
/// callers hit the database from genuinely separate sessions.
async fn second_session(test_db: &TestDatabase) -> PgJobRepository {
    let url = std::env::var("DATABASE_URL")
        .unwrap_or_else(|_| DEFAULT_TEST_DATABASE_URL.to_string());
    let pool = create_pool_with_config(
        &url,
        PoolConfig::new().max_connections(1).min_connections(1),
    )
    .await
    .expect("second test pool");
    sqlx::query(&format!(
        "SET search_path TO {}, public",
        test_db.schema_name()
    ))
    .execute(&pool)
    .await
    .expect("set search path");
    PgJobRepository::new(pool)
}

// =============================================================================
// Enqueue / Dedup
// =============================================================================

#[tokio::test]
#[ignore] // Requires DATABASE_URL with a running test database
async fn test_enqueue_returns_id_then_dedups() {
    let test_db = TestDatabase::new().await;
    let jobs = &test_db.db.jobs;

    let payload = JobPayload::ImageThumb { asset_id: 1 };
    let first = jobs.enqueue(&payload).await.expect("first enqueue");
    assert!(first.is_some(), "fresh enqueue should return a job id");

    let second = jobs.enqueue(&payload).await.expect("second enqueue");
    assert!(second.is_none(), "duplicate enqueue should be a no-op");

    assert_eq!(jobs.pending_count().await.unwrap(), 1);
    test_db.cleanup().await;
}

#[tokio::test]
#[ignore] // Requires DATABASE_URL with a running test database
async fn test_dedup_is_scoped_to_job_type_and_asset() {
    let test_db = TestDatabase::new().await;
    let jobs = &test_db.db.jobs;

    // Same asset, different job types: both queue.
    assert!(jobs
        .enqueue(&JobPayload::DocPdfPreview { asset_id: 1 })
        .await
        .unwrap()
        .is_some());
    assert!(jobs
        .enqueue(&JobPayload::DocThumb { asset_id: 1 })
        .await
        .unwrap()
        .is_some());

    // Same job type, different asset: queues.
    assert!(jobs
        .enqueue(&JobPayload::DocThumb { asset_id: 2 })
        .await
        .unwrap()
        .is_some());

    assert_eq!(jobs.pending_count().await.unwrap(), 3);
    test_db.cleanup().await;
}

#[tokio::test]
#[ignore] // Requires DATABASE_URL with a running test database
async fn test_dedup_blocks_while_running_but_not_after_done() {
    let test_db = TestDatabase::new().await;
    let jobs = &test_db.db.jobs;

    let payload = JobPayload::VideoThumb { asset_id: 7 };
    jobs.enqueue(&payload).await.unwrap();

    let claimed = jobs.claim_next("worker-1").await.unwrap().expect("claim");
    // Running job still blocks a re-enqueue.
    assert!(jobs.enqueue(&payload).await.unwrap().is_none());

    jobs.mark_done(claimed.id).await.unwrap();
    // Finished jobs never block.
    assert!(jobs.enqueue(&payload).await.unwrap().is_some());

    test_db.cleanup().await;
}

#[tokio::test]
#[ignore] // Requires DATABASE_URL with a running test database
async fn test_concurrent_enqueues_collapse_to_one_job() {
    let test_db = TestDatabase::new().await;
    let other = second_session(&test_db).await;

    // Two sessions race the same payload, as when two viewers miss the same
    // derivative at once. The unique dedup index must let exactly one land.
    let payload = JobPayload::DocThumb { asset_id: 9 };
    let (a, b) = tokio::join!(test_db.db.jobs.enqueue(&payload), other.enqueue(&payload));
    let queued = [a.unwrap(), b.unwrap()];

    assert_eq!(
        queued.iter().filter(|id| id.is_some()).count(),
        1,
        "exactly one enqueue should win the race"
    );
    assert_eq!(test_db.db.jobs.pending_count().await.unwrap(), 1);

    test_db.cleanup().await;
}

#[tokio::test]
#[ignore] // Requires DATABASE_URL with a running test database
async fn test_enqueue_rejects_nonpositive_asset_id() {
    let test_db = TestDatabase::new().await;
    let jobs = &test_db.db.jobs;

    let result = jobs.enqueue(&JobPayload::ImageThumb { asset_id: 0 }).await;
    assert!(result.is_err());

    test_db.cleanup().await;
}

// =============================================================================
// Claiming
// =============================================================================

#[tokio::test]
#[ignore] // Requires DATABASE_URL with a running test database
async fn test_claim_transitions_and_increments_attempts() {
    let test_db = TestDatabase::new().await;
    let jobs = &test_db.db.jobs;

    jobs.enqueue(&JobPayload::ImageThumb { asset_id: 1 })
        .await
        .unwrap();

    let job = jobs.claim_next("worker-1").await.unwrap().expect("claim");
    assert_eq!(job.status, JobStatus::Running);
    assert_eq!(job.attempts, 1);
    assert_eq!(job.locked_by.as_deref(), Some("worker-1"));
    assert!(job.locked_at.is_some());
    assert_eq!(job.job_type, JobType::ImageThumb);

    // Queue is now empty for claimers.
    assert!(jobs.claim_next("worker-2").await.unwrap().is_none());
    test_db.cleanup().await;
}

#[tokio::test]
#[ignore] // Requires DATABASE_URL with a running test database
async fn test_concurrent_claims_yield_exactly_one_winner() {
    let test_db = TestDatabase::new().await;
    let other = second_session(&test_db).await;

    test_db
        .db
        .jobs
        .enqueue(&JobPayload::VideoThumb { asset_id: 5 })
        .await
        .unwrap();

    // One queued job, two workers claiming at the same instant.
    let (a, b) = tokio::join!(
        test_db.db.jobs.claim_next("worker-a"),
        other.claim_next("worker-b")
    );
    let claims = [a.unwrap(), b.unwrap()];

    assert_eq!(
        claims.iter().filter(|c| c.is_some()).count(),
        1,
        "the same job must never be claimed twice"
    );

    test_db.cleanup().await;
}

#[tokio::test]
#[ignore] // Requires DATABASE_URL with a running test database
async fn test_claim_order_is_oldest_eligible_first() {
    let test_db = TestDatabase::new().await;
    let jobs = &test_db.db.jobs;

    let first = jobs
        .enqueue(&JobPayload::ImageThumb { asset_id: 1 })
        .await
        .unwrap()
        .unwrap();
    let second = jobs
        .enqueue(&JobPayload::ImageThumb { asset_id: 2 })
        .await
        .unwrap()
        .unwrap();

    let a = jobs.claim_next("w").await.unwrap().unwrap();
    let b = jobs.claim_next("w").await.unwrap().unwrap();
    assert_eq!(a.id, first);
    assert_eq!(b.id, second);

    test_db.cleanup().await;
}

#[tokio::test]
#[ignore] // Requires DATABASE_URL with a running test database
async fn test_claim_skips_jobs_backing_off() {
    let test_db = TestDatabase::new().await;
    let jobs = &test_db.db.jobs;

    let job_id = jobs
        .enqueue(&JobPayload::DocThumb { asset_id: 1 })
        .await
        .unwrap()
        .unwrap();
    let job = jobs.claim_next("w").await.unwrap().unwrap();
    jobs.mark_error(job.id, "ffmpeg timed out", job.attempts)
        .await
        .unwrap();

    // Requeued with run_after in the future: not claimable yet.
    assert!(jobs.claim_next("w").await.unwrap().is_none());

    let stored = jobs.get(job_id).await.unwrap().unwrap();
    assert_eq!(stored.status, JobStatus::Queued);
    assert!(stored.run_after > Utc::now());
    assert_eq!(stored.last_error.as_deref(), Some("ffmpeg timed out"));

    test_db.cleanup().await;
}

// =============================================================================
// Error handling / Dead-letter
// =============================================================================

#[tokio::test]
#[ignore] // Requires DATABASE_URL with a running test database
async fn test_mark_done_clears_lock_and_error() {
    let test_db = TestDatabase::new().await;
    let jobs = &test_db.db.jobs;

    let job_id = jobs
        .enqueue(&JobPayload::ImageThumb { asset_id: 1 })
        .await
        .unwrap()
        .unwrap();
    let job = jobs.claim_next("w").await.unwrap().unwrap();
    jobs.mark_done(job.id).await.unwrap();

    let stored = jobs.get(job_id).await.unwrap().unwrap();
    assert_eq!(stored.status, JobStatus::Done);
    assert!(stored.locked_by.is_none());
    assert!(stored.locked_at.is_none());
    assert!(stored.last_error.is_none());

    test_db.cleanup().await;
}

#[tokio::test]
#[ignore] // Requires DATABASE_URL with a running test database
async fn test_dead_letter_at_max_attempts() {
    let test_db = TestDatabase::new().await;
    let jobs = &test_db.db.jobs;

    let job_id = jobs
        .enqueue(&JobPayload::VideoThumb { asset_id: 1 })
        .await
        .unwrap()
        .unwrap();
    let job = jobs.claim_next("w").await.unwrap().unwrap();

    jobs.mark_error(job.id, "still failing", JOB_MAX_ATTEMPTS)
        .await
        .unwrap();

    let stored = jobs.get(job_id).await.unwrap().unwrap();
    assert_eq!(stored.status, JobStatus::Error);
    assert!(stored.locked_by.is_none());

    // Terminal errors are never claimed again.
    assert!(jobs.claim_next("w").await.unwrap().is_none());

    // And no longer block a fresh enqueue for the same asset.
    assert!(jobs
        .enqueue(&JobPayload::VideoThumb { asset_id: 1 })
        .await
        .unwrap()
        .is_some());

    test_db.cleanup().await;
}

#[tokio::test]
#[ignore] // Requires DATABASE_URL with a running test database
async fn test_mark_error_permanent_skips_retry_budget() {
    let test_db = TestDatabase::new().await;
    let jobs = &test_db.db.jobs;

    let job_id = jobs
        .enqueue(&JobPayload::DocPdfPreview { asset_id: 1 })
        .await
        .unwrap()
        .unwrap();
    let job = jobs.claim_next("w").await.unwrap().unwrap();
    assert_eq!(job.attempts, 1);

    jobs.mark_error_permanent(job.id, "asset path escapes root")
        .await
        .unwrap();

    let stored = jobs.get(job_id).await.unwrap().unwrap();
    assert_eq!(stored.status, JobStatus::Error);
    assert_eq!(
        stored.last_error.as_deref(),
        Some("asset path escapes root")
    );

    test_db.cleanup().await;
}

// =============================================================================
// Stale lock recovery
// =============================================================================

#[tokio::test]
#[ignore] // Requires DATABASE_URL with a running test database
async fn test_recover_stale_locks_requeues_old_running_jobs() {
    let test_db = TestDatabase::new().await;
    let jobs = &test_db.db.jobs;

    let job_id = jobs
        .enqueue(&JobPayload::ImageThumb { asset_id: 1 })
        .await
        .unwrap()
        .unwrap();
    jobs.claim_next("crashed-worker").await.unwrap().unwrap();

    // Backdate the lock past the staleness cutoff.
    let old = Utc::now() - ChronoDuration::minutes(30);
    sqlx::query("UPDATE derivative_job SET locked_at = $1 WHERE id = $2")
        .bind(old)
        .bind(job_id)
        .execute(&test_db.pool)
        .await
        .unwrap();

    let recovered = jobs.recover_stale_locks(10).await.unwrap();
    assert_eq!(recovered, 1);

    let stored = jobs.get(job_id).await.unwrap().unwrap();
    assert_eq!(stored.status, JobStatus::Queued);
    assert!(stored.locked_by.is_none());
    // Attempts are preserved so crash-looping jobs still dead-letter.
    assert_eq!(stored.attempts, 1);

    test_db.cleanup().await;
}

#[tokio::test]
#[ignore] // Requires DATABASE_URL with a running test database
async fn test_recover_stale_locks_leaves_fresh_claims_alone() {
    let test_db = TestDatabase::new().await;
    let jobs = &test_db.db.jobs;

    jobs.enqueue(&JobPayload::ImageThumb { asset_id: 1 })
        .await
        .unwrap();
    jobs.claim_next("live-worker").await.unwrap().unwrap();

    let recovered = jobs.recover_stale_locks(10).await.unwrap();
    assert_eq!(recovered, 0);

    test_db.cleanup().await;
}

// =============================================================================
// Stats / Cleanup
// =============================================================================

#[tokio::test]
#[ignore] // Requires DATABASE_URL with a running test database
async fn test_queue_stats_counts_by_status() {
    let test_db = TestDatabase::new().await;
    let jobs = &test_db.db.jobs;

    jobs.enqueue(&JobPayload::ImageThumb { asset_id: 1 })
        .await
        .unwrap();
    jobs.enqueue(&JobPayload::ImageThumb { asset_id: 2 })
        .await
        .unwrap();
    jobs.enqueue(&JobPayload::ImageThumb { asset_id: 3 })
        .await
        .unwrap();

    let running = jobs.claim_next("w").await.unwrap().unwrap();
    let done = jobs.claim_next("w").await.unwrap().unwrap();
    jobs.mark_done(done.id).await.unwrap();

    let stats = jobs.queue_stats().await.unwrap();
    assert_eq!(stats.queued, 1);
    assert_eq!(stats.running, 1);
    assert_eq!(stats.done_last_hour, 1);
    assert_eq!(stats.total, 3);

    jobs.mark_done(running.id).await.unwrap();
    test_db.cleanup().await;
}

#[tokio::test]
#[ignore] // Requires DATABASE_URL with a running test database
async fn test_cleanup_keeps_live_jobs() {
    let test_db = TestDatabase::new().await;
    let jobs = &test_db.db.jobs;

    for asset_id in 1..=5i64 {
        jobs.enqueue(&JobPayload::ImageThumb { asset_id })
            .await
            .unwrap();
    }
    // Finish three of them.
    for _ in 0..3 {
        let job = jobs.claim_next("w").await.unwrap().unwrap();
        jobs.mark_done(job.id).await.unwrap();
    }

    let deleted = jobs.cleanup(2).await.unwrap();
    assert_eq!(deleted, 3);

    // Both queued jobs survived the trim.
    assert_eq!(jobs.pending_count().await.unwrap(), 2);
    test_db.cleanup().await;
}
