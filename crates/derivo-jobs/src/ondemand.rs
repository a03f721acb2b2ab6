//! On-demand derivative generation for request-time callers.
//!
//! Serving code asks for a derivative and gets either a path it can stream
//! immediately or `Pending` after a background job has been queued. A bounded
//! inline build is attempted first so small assets render on first view
//! without waiting for a worker pass.

use std::path::PathBuf;
use std::sync::Arc;

use tracing::{debug, warn};

use derivo_core::{
    derivative_relative_path, Asset, AssetRepository, DerivativeKind, DerivativeRepository,
    DerivativeStatus, Error, JobType, Result,
};
use derivo_db::Database;

use crate::enqueue::{job_type_for, Enqueuer};
use crate::generator::Generator;
use crate::publish::{is_fresh, PathLock};

/// Result of an on-demand derivative request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DerivativeOutcome {
    /// Artifact exists and is current; serve this absolute path.
    Ready(PathBuf),
    /// Generation is queued or in flight; the caller should fall back to a
    /// generic placeholder and retry later.
    Pending,
}

/// Request-time generator: serve fresh artifacts, build inline when the path
/// is uncontended, queue background work otherwise.
pub struct OnDemandGenerator {
    db: Database,
    generator: Arc<Generator>,
    enqueuer: Enqueuer,
}

impl OnDemandGenerator {
    pub fn new(db: Database, generator: Arc<Generator>) -> Self {
        let enqueuer = Enqueuer::new(db.clone(), generator.config().clone());
        Self {
            db,
            generator,
            enqueuer,
        }
    }

    /// Get the derivative for an asset, generating it inline if possible.
    ///
    /// A missing asset is `NotFound`; an asset class with no such derivative
    /// (e.g. a thumbnail for an archive) is `Validation`. Both are permanent
    /// and nothing is queued for them.
    pub async fn get_or_generate(
        &self,
        asset_id: i64,
        kind: DerivativeKind,
    ) -> Result<DerivativeOutcome> {
        let asset = self
            .db
            .assets
            .get(asset_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("asset {}", asset_id)))?;
        let job_type = job_type_for(asset.kind, kind)?;

        let source = self.generator.config().source_path(&asset)?;
        if !source.exists() {
            return Err(Error::Validation(format!(
                "source file missing: {}",
                asset.relative_path
            )));
        }
        let dest = self.generator.config().derivative_path(&asset, kind)?;
        let relative = derivative_relative_path(&asset, kind);

        if is_fresh(&dest, &source) {
            self.heal_status_row(&asset, kind, &relative).await;
            return Ok(DerivativeOutcome::Ready(dest));
        }

        // Stale or absent artifact. Try an uncontended inline build; if the
        // path lock is held, someone else is already generating.
        match PathLock::try_acquire(&dest)? {
            Some(lock) => {
                // The holder we raced against may have just published.
                if is_fresh(&dest, &source) {
                    drop(lock);
                    self.heal_status_row(&asset, kind, &relative).await;
                    return Ok(DerivativeOutcome::Ready(dest));
                }

                self.db
                    .derivatives
                    .upsert_pending(asset.id, kind, &relative)
                    .await?;

                let built = self
                    .generator
                    .build_validated(job_type, &asset, &source, &dest)
                    .await;
                drop(lock);

                match built {
                    Ok(()) => {
                        self.db
                            .derivatives
                            .mark_ready(asset.id, kind, &relative)
                            .await?;
                        Ok(DerivativeOutcome::Ready(dest))
                    }
                    Err(e) => {
                        warn!(
                            subsystem = "ondemand",
                            asset_id = asset.id,
                            derivative_kind = %kind,
                            error = %e,
                            "Inline build failed, queuing background job"
                        );
                        if !matches!(
                            e,
                            Error::ConcurrencyBusy(_) | Error::MissingDependency { .. }
                        ) {
                            let _ = self
                                .db
                                .derivatives
                                .mark_error(asset.id, kind, &e.to_string())
                                .await;
                        }
                        self.queue_background(job_type, &e, asset.id).await;
                        Ok(DerivativeOutcome::Pending)
                    }
                }
            }
            None => {
                debug!(
                    subsystem = "ondemand",
                    asset_id = asset.id,
                    derivative_kind = %kind,
                    "Generation already in flight, deferring to queue"
                );
                let _ = self.enqueuer.enqueue(job_type, asset.id).await;
                Ok(DerivativeOutcome::Pending)
            }
        }
    }

    /// A fresh file on disk with a non-Ready row means an earlier process
    /// died between publish and bookkeeping. Bring the row up to date.
    async fn heal_status_row(&self, asset: &Asset, kind: DerivativeKind, relative: &str) {
        let current = self.db.derivatives.get(asset.id, kind).await;
        let needs_heal = match current {
            Ok(Some(d)) => d.status != DerivativeStatus::Ready,
            Ok(None) => true,
            Err(_) => false,
        };
        if needs_heal {
            if let Err(e) = self.db.derivatives.mark_ready(asset.id, kind, relative).await {
                warn!(
                    subsystem = "ondemand",
                    asset_id = asset.id,
                    derivative_kind = %kind,
                    error = %e,
                    "Failed to heal derivative status"
                );
            }
        }
    }

    /// Queue a background retry. A missing prerequisite queues the
    /// prerequisite first so the retry can succeed.
    async fn queue_background(&self, job_type: JobType, error: &Error, asset_id: i64) {
        if let Error::MissingDependency { job_type: dep } = error {
            if let Err(e) = self.enqueuer.enqueue(*dep, asset_id).await {
                warn!(
                    subsystem = "ondemand",
                    asset_id,
                    dependency = %dep,
                    error = %e,
                    "Failed to enqueue dependency"
                );
            }
        }
        if let Err(e) = self.enqueuer.enqueue(job_type, asset_id).await {
            warn!(
                subsystem = "ondemand",
                asset_id,
                job_type = %job_type,
                error = %e,
                "Failed to enqueue background job"
            );
        }
    }
}
