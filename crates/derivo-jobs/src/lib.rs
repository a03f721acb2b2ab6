//! # derivo-jobs
//!
//! Derivative generation pipeline for derivo.
//!
//! This crate provides:
//! - Builders for PDF previews and document/video/image thumbnails
//! - A polling job worker with retry and dead-letter handling
//! - Lock-then-publish concurrency control over the derivatives tree
//! - Placeholder-aware artifact validation
//! - On-demand generation for request-time callers
//!
//! ## Example
//!
//! ```ignore
//! use derivo_jobs::{Enqueuer, Generator, GeneratorConfig, RunMode, Worker, WorkerConfig};
//! use derivo_db::Database;
//! use derivo_core::JobType;
//!
//! let db = Database::connect("postgres://...").await?;
//! let config = GeneratorConfig::new("/srv/files", "/srv/derivatives");
//!
//! // Queue work
//! let enqueuer = Enqueuer::new(db.clone(), config.clone());
//! enqueuer.enqueue(JobType::ImageThumb, 42).await?;
//!
//! // Process it
//! let generator = Generator::new(db.clone(), config)?;
//! let worker = Worker::new(db, generator, WorkerConfig::from_env());
//! let handle = worker.start(RunMode::Forever);
//!
//! // Graceful shutdown
//! handle.shutdown().await?;
//! ```

pub mod builders;
pub mod config;
pub mod enqueue;
pub mod generator;
pub mod ondemand;
pub mod publish;
pub mod tools;
pub mod validate;
pub mod worker;

// Re-export core types
pub use derivo_core::*;

pub use config::GeneratorConfig;
pub use enqueue::{job_type_for, Enqueuer};
pub use generator::Generator;
pub use ondemand::{DerivativeOutcome, OnDemandGenerator};
pub use publish::{is_fresh, PathLock, TempTarget};
pub use tools::ToolContext;
pub use validate::{validate_artifact, PlaceholderIndex};
pub use worker::{RunMode, Worker, WorkerConfig, WorkerEvent, WorkerHandle};

/// Default maximum attempts for failed jobs.
pub const DEFAULT_MAX_ATTEMPTS: i32 = derivo_core::defaults::JOB_MAX_ATTEMPTS;

/// Default polling interval for job processing (milliseconds).
pub const DEFAULT_POLL_INTERVAL_MS: u64 = derivo_core::defaults::JOB_POLL_INTERVAL_MS;
