//! Job enqueueing with derivative bookkeeping.
//!
//! Queuing a job and creating the matching Pending derivative row are one
//! logical operation; everything that schedules work goes through here.

use tracing::debug;
use uuid::Uuid;

use derivo_core::{
    derivative_relative_path, AssetKind, AssetRepository, DerivativeKind, DerivativeRepository,
    Error, JobPayload, JobRepository, JobType, Result,
};
use derivo_db::Database;

use crate::config::GeneratorConfig;

/// Which job type produces the given derivative kind for an asset class.
pub fn job_type_for(asset_kind: AssetKind, kind: DerivativeKind) -> Result<JobType> {
    match (asset_kind, kind) {
        (AssetKind::Document, DerivativeKind::PdfPreview) => Ok(JobType::DocPdfPreview),
        (AssetKind::Document, DerivativeKind::Thumbnail) => Ok(JobType::DocThumb),
        (AssetKind::Video, DerivativeKind::Thumbnail) => Ok(JobType::VideoThumb),
        (AssetKind::Image, DerivativeKind::Thumbnail) => Ok(JobType::ImageThumb),
        (asset_kind, kind) => Err(Error::Validation(format!(
            "no {} derivative for {} assets",
            kind,
            asset_kind.as_str()
        ))),
    }
}

/// Schedules derivative jobs and keeps the derivative status table in step.
#[derive(Clone)]
pub struct Enqueuer {
    db: Database,
    config: GeneratorConfig,
}

impl Enqueuer {
    pub fn new(db: Database, config: GeneratorConfig) -> Self {
        Self { db, config }
    }

    /// Queue a job for an asset, deduplicated on `(job_type, asset_id)`.
    ///
    /// When the job is freshly queued the matching derivative row is upserted
    /// to Pending with its expected path; a dedup no-op leaves the row alone.
    /// Fails with `Validation` before queuing anything if the asset's path
    /// would escape the derivatives root.
    pub async fn enqueue(&self, job_type: JobType, asset_id: i64) -> Result<Option<Uuid>> {
        let asset = self
            .db
            .assets
            .get(asset_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("asset {}", asset_id)))?;

        let kind = job_type.derivative_kind();
        // Path safety gate: a hostile relative_path never reaches a builder.
        self.config.derivative_path(&asset, kind)?;
        let relative = derivative_relative_path(&asset, kind);

        let payload = JobPayload::for_job(job_type, asset_id);
        let queued = self.db.jobs.enqueue(&payload).await?;

        if queued.is_some() {
            self.db
                .derivatives
                .upsert_pending(asset_id, kind, &relative)
                .await?;
        } else {
            debug!(
                subsystem = "jobs",
                op = "enqueue",
                job_type = %job_type,
                asset_id,
                "Equivalent job already live, enqueue deduplicated"
            );
        }
        Ok(queued)
    }
}
