//! Orchestration of derivative generation.
//!
//! `Generator` owns the full build pipeline for one derivative: freshness
//! check, path lock, per-kind builder, validation, atomic publish, and the
//! status row updates around it. Worker jobs and the on-demand path both
//! drive generation exclusively through it.

use std::path::Path;
use std::time::Duration;

use tracing::{debug, info, warn};

use derivo_core::defaults::LOCK_WAIT_SECS;
use derivo_core::{
    derivative_relative_path, Asset, AssetRepository, DerivativeRepository, Error, JobType, Result,
};
use derivo_db::Database;

use crate::builders;
use crate::config::GeneratorConfig;
use crate::publish::{is_fresh, PathLock, TempTarget};
use crate::tools::ToolContext;
use crate::validate::{validate_artifact, PlaceholderIndex};

pub struct Generator {
    pub(crate) db: Database,
    pub(crate) config: GeneratorConfig,
    pub(crate) tools: ToolContext,
    placeholders: PlaceholderIndex,
}

impl Generator {
    pub fn new(db: Database, config: GeneratorConfig) -> Result<Self> {
        Ok(Self {
            db,
            config,
            tools: ToolContext::new(),
            placeholders: PlaceholderIndex::new()?,
        })
    }

    pub fn config(&self) -> &GeneratorConfig {
        &self.config
    }

    /// Execute one queued job: resolve the asset and generate its derivative.
    ///
    /// On failure the derivative row records the error, except when the
    /// failure is contention or a missing prerequisite; those resolve on a
    /// later attempt and should not overwrite a meaningful status.
    pub async fn run_job(&self, job_type: JobType, asset_id: i64) -> Result<()> {
        let asset = self
            .db
            .assets
            .get(asset_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("asset {}", asset_id)))?;

        let result = self.generate(job_type, &asset).await;
        if let Err(e) = &result {
            if !matches!(
                e,
                Error::ConcurrencyBusy(_) | Error::MissingDependency { .. }
            ) {
                let _ = self
                    .db
                    .derivatives
                    .mark_error(asset.id, job_type.derivative_kind(), &e.to_string())
                    .await;
            }
        }
        result
    }

    async fn generate(&self, job_type: JobType, asset: &Asset) -> Result<()> {
        let source = self.config.source_path(asset)?;
        if !source.exists() {
            return Err(Error::Validation(format!(
                "source file missing: {}",
                asset.relative_path
            )));
        }

        let kind = job_type.derivative_kind();
        let dest = self.config.derivative_path(asset, kind)?;
        let relative = derivative_relative_path(asset, kind);

        // Fresh artifact: nothing to do beyond confirming the status row.
        if is_fresh(&dest, &source) {
            debug!(
                subsystem = "generator",
                asset_id = asset.id,
                derivative_kind = %kind,
                "Artifact already fresh, skipping generation"
            );
            self.db
                .derivatives
                .mark_ready(asset.id, kind, &relative)
                .await?;
            return Ok(());
        }

        let lock = PathLock::acquire(&dest, Duration::from_secs(LOCK_WAIT_SECS)).await?;

        // Another generator may have published while we waited on the lock.
        if is_fresh(&dest, &source) {
            drop(lock);
            self.db
                .derivatives
                .mark_ready(asset.id, kind, &relative)
                .await?;
            return Ok(());
        }

        self.db
            .derivatives
            .upsert_pending(asset.id, kind, &relative)
            .await?;

        let result = self.build_validated(job_type, asset, &source, &dest).await;
        drop(lock);
        result?;

        self.db
            .derivatives
            .mark_ready(asset.id, kind, &relative)
            .await?;

        info!(
            subsystem = "generator",
            asset_id = asset.id,
            job_type = %job_type,
            derivative_kind = %kind,
            "Derivative generated"
        );
        Ok(())
    }

    /// Build into a temp file, validate, and atomically publish.
    ///
    /// Caller must hold the path lock for `dest`.
    pub(crate) async fn build_validated(
        &self,
        job_type: JobType,
        asset: &Asset,
        source: &Path,
        dest: &Path,
    ) -> Result<()> {
        let tmp = TempTarget::new(dest)?;

        let build = match job_type {
            JobType::DocPdfPreview => {
                builders::pdf_preview::build(self, asset, source, tmp.path()).await
            }
            JobType::DocThumb => builders::doc_thumb::build(self, asset, source, tmp.path()).await,
            JobType::VideoThumb => {
                builders::video_thumb::build(self, asset, source, tmp.path()).await
            }
            JobType::ImageThumb => {
                builders::image_thumb::build(self, asset, source, tmp.path()).await
            }
        };
        if let Err(e) = build {
            warn!(
                subsystem = "generator",
                asset_id = asset.id,
                job_type = %job_type,
                error = %e,
                "Builder failed"
            );
            return Err(e);
        }

        validate_artifact(tmp.path(), job_type.derivative_kind(), &self.placeholders)?;
        tmp.commit()
    }
}
