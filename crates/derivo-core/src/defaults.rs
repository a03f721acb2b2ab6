//! Centralized default constants for the derivo pipeline.
//!
//! **This module is the single source of truth** for shared default values.
//! Crates reference these constants instead of defining their own magic
//! numbers.

use std::time::Duration;

// =============================================================================
// JOB PROCESSING
// =============================================================================

/// Attempts at which a job becomes terminal error (dead-letter).
pub const JOB_MAX_ATTEMPTS: i32 = 8;

/// Base unit for exponential retry backoff.
pub const RETRY_BASE_SECS: u64 = 15;

/// Backoff floor.
pub const RETRY_MIN_SECS: u64 = 30;

/// Backoff ceiling.
pub const RETRY_MAX_SECS: u64 = 3600;

/// Exponent cap; keeps `2^attempts` from overflowing for large attempt counts.
pub const RETRY_EXP_CAP: u32 = 10;

/// Maximum stored length of a job error message, in characters.
pub const ERROR_TEXT_MAX_CHARS: usize = 2000;

/// Default worker poll interval when the queue is empty.
pub const JOB_POLL_INTERVAL_MS: u64 = 500;

/// Default age after which a Running job's lock is considered abandoned.
pub const STALE_LOCK_MINUTES: i64 = 10;

/// How often the long-running worker sweeps for stale locks.
pub const STALE_SWEEP_INTERVAL_SECS: u64 = 300;

// =============================================================================
// EXTERNAL TOOLS
// =============================================================================

/// Wall-clock timeout for image and document tools (soffice, pdftoppm).
pub const TOOL_TIMEOUT_DOC_SECS: u64 = 60;

/// Wall-clock timeout for video tools (ffmpeg); seeks through large files.
pub const TOOL_TIMEOUT_VIDEO_SECS: u64 = 180;

/// TTL for cached tool-availability probes.
pub const TOOL_PROBE_TTL_SECS: u64 = 300;

/// Maximum stderr excerpt carried into job error detail.
pub const STDERR_EXCERPT_CHARS: usize = 500;

// =============================================================================
// ARTIFACT GEOMETRY & QUALITY
// =============================================================================

/// Bounding box for document and image thumbnails (longest side).
pub const THUMB_MAX_DIM: u32 = 400;

/// Square canvas edge for video thumbnails.
pub const VIDEO_THUMB_DIM: u32 = 400;

/// JPEG re-encode quality for thumbnails.
pub const JPEG_QUALITY: u8 = 82;

/// Rasterization resolution for PDF page 1, in DPI.
pub const RASTER_DPI: u32 = 150;

/// Seek offsets tried in order for video frame extraction, in seconds.
pub const VIDEO_SEEK_OFFSETS_SECS: &[u32] = &[3, 1, 0];

/// Scene-change threshold for the last-resort frame selection pass.
pub const VIDEO_SCENE_THRESHOLD: f32 = 0.3;

// =============================================================================
// VALIDATION
// =============================================================================

/// Minimum plausible size for a generated image artifact.
pub const MIN_IMAGE_BYTES: u64 = 256;

/// Minimum plausible size for a generated PDF artifact.
pub const MIN_PDF_BYTES: u64 = 1024;

/// Historically shipped placeholder canvas sizes; the fingerprint set is
/// built by re-rendering the placeholder across this matrix.
pub const PLACEHOLDER_DIMS: &[u32] = &[320, 400, 480];

/// Historically shipped placeholder encode qualities.
pub const PLACEHOLDER_QUALITIES: &[u8] = &[75, 82, 90];

// =============================================================================
// LOCKING
// =============================================================================

/// Poll interval while blocking on a per-path generation lock.
pub const LOCK_POLL_INTERVAL_MS: u64 = 50;

/// Default deadline for a blocking lock acquisition.
pub const LOCK_WAIT_SECS: u64 = 60;

/// Age after which an on-disk lock file is treated as left by a dead process.
pub const LOCK_STALE_SECS: u64 = 600;

/// Retry backoff for a job that has failed `attempts` times.
///
/// `clamp(2^min(attempts, 10) * 15s, 30s, 3600s)` — doubles per attempt,
/// floored at 30s so rapid-fire failures don't hammer the tools, capped at
/// one hour.
pub fn retry_backoff(attempts: i32) -> Duration {
    let exp = (attempts.max(0) as u32).min(RETRY_EXP_CAP);
    let secs = 2u64
        .saturating_pow(exp)
        .saturating_mul(RETRY_BASE_SECS)
        .clamp(RETRY_MIN_SECS, RETRY_MAX_SECS);
    Duration::from_secs(secs)
}
