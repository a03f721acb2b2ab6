//! Structured logging field name constants for derivo.
//!
//! All crates use these constants for consistent structured logging fields,
//! so aggregation tools can query by standardized names across subsystems.
//!
//! ## Log Level Contract
//!
//! | Level | Usage |
//! |-------|-------|
//! | ERROR | Degraded service, requires operator attention |
//! | WARN  | Recoverable issue, automatic fallback applied |
//! | INFO  | Lifecycle events, job completions |
//! | DEBUG | Decision points, intermediate values |
//! | TRACE | Per-item iteration, high-volume data |

/// Subsystem originating the log event.
/// Values: "db", "worker", "builders", "ondemand"
pub const SUBSYSTEM: &str = "subsystem";

/// Logical operation name.
/// Examples: "claim_next", "mark_error", "publish", "recover_stale_locks"
pub const OPERATION: &str = "op";

/// Worker identity string.
pub const WORKER_ID: &str = "worker_id";

/// Job UUID being processed.
pub const JOB_ID: &str = "job_id";

/// Job type enum variant.
pub const JOB_TYPE: &str = "job_type";

/// Attempt count of the current job.
pub const ATTEMPTS: &str = "attempts";

/// Source asset id.
pub const ASSET_ID: &str = "asset_id";

/// Derivative kind being generated.
pub const DERIVATIVE_KIND: &str = "derivative_kind";

/// External tool binary name (soffice, pdftoppm, ffmpeg).
pub const TOOL: &str = "tool";

/// Wall-clock duration in milliseconds.
pub const DURATION_MS: &str = "duration_ms";
