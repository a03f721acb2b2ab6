//! Data model for assets, derivatives, and the job queue.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use uuid::Uuid;

use crate::error::{Error, Result};

// =============================================================================
// JOB TYPES
// =============================================================================

/// Status of a job in the queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Queued,
    Running,
    Done,
    Error,
}

/// Type of derivative-generation job. Closed set; unknown strings are a
/// decode error, never a silent fallback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobType {
    /// Convert an office document to a PDF preview
    DocPdfPreview,
    /// Rasterize page 1 of a (converted) PDF into a thumbnail
    DocThumb,
    /// Extract a representative frame from a video, badge it
    VideoThumb,
    /// Resize and re-encode an image
    ImageThumb,
}

impl JobType {
    /// Stable string form used in the database and in payload tags.
    pub fn as_str(&self) -> &'static str {
        match self {
            JobType::DocPdfPreview => "doc_pdf_preview",
            JobType::DocThumb => "doc_thumb",
            JobType::VideoThumb => "video_thumb",
            JobType::ImageThumb => "image_thumb",
        }
    }

    /// Parse the stable string form.
    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "doc_pdf_preview" => Ok(JobType::DocPdfPreview),
            "doc_thumb" => Ok(JobType::DocThumb),
            "video_thumb" => Ok(JobType::VideoThumb),
            "image_thumb" => Ok(JobType::ImageThumb),
            other => Err(Error::Validation(format!("unknown job type: {}", other))),
        }
    }

    /// The derivative kind this job produces.
    pub fn derivative_kind(&self) -> DerivativeKind {
        match self {
            JobType::DocPdfPreview => DerivativeKind::PdfPreview,
            JobType::DocThumb | JobType::VideoThumb | JobType::ImageThumb => {
                DerivativeKind::Thumbnail
            }
        }
    }
}

impl std::fmt::Display for JobType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Strongly-typed job payload, one variant per job type.
///
/// Decoded and validated at claim time; a payload whose tag disagrees with
/// the job row's `job_type` column is a validation error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "job", rename_all = "snake_case")]
pub enum JobPayload {
    DocPdfPreview { asset_id: i64 },
    DocThumb { asset_id: i64 },
    VideoThumb { asset_id: i64 },
    ImageThumb { asset_id: i64 },
}

impl JobPayload {
    /// The asset this payload targets.
    pub fn asset_id(&self) -> i64 {
        match self {
            JobPayload::DocPdfPreview { asset_id }
            | JobPayload::DocThumb { asset_id }
            | JobPayload::VideoThumb { asset_id }
            | JobPayload::ImageThumb { asset_id } => *asset_id,
        }
    }

    /// The job type this payload belongs to.
    pub fn job_type(&self) -> JobType {
        match self {
            JobPayload::DocPdfPreview { .. } => JobType::DocPdfPreview,
            JobPayload::DocThumb { .. } => JobType::DocThumb,
            JobPayload::VideoThumb { .. } => JobType::VideoThumb,
            JobPayload::ImageThumb { .. } => JobType::ImageThumb,
        }
    }

    /// Build the payload variant for a job type.
    pub fn for_job(job_type: JobType, asset_id: i64) -> Self {
        match job_type {
            JobType::DocPdfPreview => JobPayload::DocPdfPreview { asset_id },
            JobType::DocThumb => JobPayload::DocThumb { asset_id },
            JobType::VideoThumb => JobPayload::VideoThumb { asset_id },
            JobType::ImageThumb => JobPayload::ImageThumb { asset_id },
        }
    }

    /// Decode a stored payload and check it against the row's job type.
    pub fn decode(job_type: JobType, raw: &JsonValue) -> Result<Self> {
        let payload: JobPayload = serde_json::from_value(raw.clone())
            .map_err(|e| Error::Validation(format!("malformed job payload: {}", e)))?;
        if payload.job_type() != job_type {
            return Err(Error::Validation(format!(
                "payload tag {} does not match job type {}",
                payload.job_type(),
                job_type
            )));
        }
        payload.validate()?;
        Ok(payload)
    }

    /// Structural validation beyond what serde enforces.
    pub fn validate(&self) -> Result<()> {
        if self.asset_id() <= 0 {
            return Err(Error::Validation(format!(
                "asset_id must be positive, got {}",
                self.asset_id()
            )));
        }
        Ok(())
    }
}

/// A job in the derivative queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: Uuid,
    pub job_type: JobType,
    pub payload: JsonValue,
    pub status: JobStatus,
    pub attempts: i32,
    /// Worker identity holding the claim, if any.
    pub locked_by: Option<String>,
    pub locked_at: Option<DateTime<Utc>>,
    /// Earliest instant the job is eligible for claiming.
    pub run_after: DateTime<Utc>,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Queue statistics summary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueStats {
    pub queued: i64,
    pub running: i64,
    pub done_last_hour: i64,
    pub error_last_hour: i64,
    pub total: i64,
}

// =============================================================================
// ASSET TYPES
// =============================================================================

/// Coarse content class of a source asset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AssetKind {
    Document,
    Image,
    Video,
    Other,
}

impl AssetKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AssetKind::Document => "document",
            AssetKind::Image => "image",
            AssetKind::Video => "video",
            AssetKind::Other => "other",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "document" => AssetKind::Document,
            "image" => AssetKind::Image,
            "video" => AssetKind::Video,
            _ => AssetKind::Other,
        }
    }

    /// Classify by file extension (lowercased, without dot).
    pub fn from_extension(ext: &str) -> Self {
        match ext.to_lowercase().as_str() {
            "pdf" | "doc" | "docx" | "odt" | "rtf" | "txt" | "xls" | "xlsx" | "ods" | "ppt"
            | "pptx" | "odp" => AssetKind::Document,
            "jpg" | "jpeg" | "png" | "gif" | "bmp" | "tif" | "tiff" | "webp" => AssetKind::Image,
            "mp4" | "mov" | "avi" | "mkv" | "webm" | "m4v" | "mpg" | "mpeg" | "wmv" => {
                AssetKind::Video
            }
            _ => AssetKind::Other,
        }
    }
}

/// A tracked source file eligible for derivative generation.
///
/// Read-only from the pipeline's perspective; rows are populated by an
/// external scanner. `relative_path` is the immutable identity key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Asset {
    pub id: i64,
    pub relative_path: String,
    pub extension: String,
    pub kind: AssetKind,
    pub size_bytes: i64,
    pub modified_at: DateTime<Utc>,
}

// =============================================================================
// DERIVATIVE TYPES
// =============================================================================

/// Kind of generated artifact, unique per asset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DerivativeKind {
    PdfPreview,
    Thumbnail,
}

impl DerivativeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            DerivativeKind::PdfPreview => "pdf_preview",
            DerivativeKind::Thumbnail => "thumbnail",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "pdf_preview" => Ok(DerivativeKind::PdfPreview),
            "thumbnail" => Ok(DerivativeKind::Thumbnail),
            other => Err(Error::Validation(format!(
                "unknown derivative kind: {}",
                other
            ))),
        }
    }

    /// Filename suffix replacing the source extension.
    pub fn suffix(&self) -> &'static str {
        match self {
            DerivativeKind::PdfPreview => ".preview.pdf",
            DerivativeKind::Thumbnail => ".thumb.jpg",
        }
    }
}

impl std::fmt::Display for DerivativeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Status of a derivative record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DerivativeStatus {
    Pending,
    Ready,
    Error,
}

impl DerivativeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DerivativeStatus::Pending => "pending",
            DerivativeStatus::Ready => "ready",
            DerivativeStatus::Error => "error",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "ready" => DerivativeStatus::Ready,
            "error" => DerivativeStatus::Error,
            _ => DerivativeStatus::Pending,
        }
    }
}

/// Per-(asset, kind) status record driving serve/regenerate decisions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Derivative {
    pub asset_id: i64,
    pub kind: DerivativeKind,
    pub path: String,
    pub status: DerivativeStatus,
    pub error_text: Option<String>,
    pub updated_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_job_type_round_trip() {
        for job_type in [
            JobType::DocPdfPreview,
            JobType::DocThumb,
            JobType::VideoThumb,
            JobType::ImageThumb,
        ] {
            assert_eq!(JobType::parse(job_type.as_str()).unwrap(), job_type);
        }
    }

    #[test]
    fn test_job_type_unknown_is_error() {
        assert!(JobType::parse("audio_waveform").is_err());
        assert!(JobType::parse("").is_err());
    }

    #[test]
    fn test_job_type_strings_are_unique() {
        let mut strings = vec![
            JobType::DocPdfPreview.as_str(),
            JobType::DocThumb.as_str(),
            JobType::VideoThumb.as_str(),
            JobType::ImageThumb.as_str(),
        ];
        strings.sort();
        strings.dedup();
        assert_eq!(strings.len(), 4);
    }

    #[test]
    fn test_payload_decode_valid() {
        let raw = json!({"job": "doc_thumb", "asset_id": 42});
        let payload = JobPayload::decode(JobType::DocThumb, &raw).unwrap();
        assert_eq!(payload.asset_id(), 42);
        assert_eq!(payload.job_type(), JobType::DocThumb);
    }

    #[test]
    fn test_payload_decode_tag_mismatch() {
        let raw = json!({"job": "doc_thumb", "asset_id": 42});
        let err = JobPayload::decode(JobType::VideoThumb, &raw).unwrap_err();
        assert!(matches!(err, crate::Error::Validation(_)));
    }

    #[test]
    fn test_payload_decode_rejects_nonpositive_asset_id() {
        for bad in [0, -7] {
            let raw = json!({"job": "image_thumb", "asset_id": bad});
            let err = JobPayload::decode(JobType::ImageThumb, &raw).unwrap_err();
            assert!(matches!(err, crate::Error::Validation(_)));
        }
    }

    #[test]
    fn test_payload_decode_malformed() {
        let raw = json!({"asset_id": 42});
        assert!(JobPayload::decode(JobType::DocThumb, &raw).is_err());
        let raw = json!({"job": "doc_thumb"});
        assert!(JobPayload::decode(JobType::DocThumb, &raw).is_err());
    }

    #[test]
    fn test_payload_for_job_round_trip() {
        for job_type in [
            JobType::DocPdfPreview,
            JobType::DocThumb,
            JobType::VideoThumb,
            JobType::ImageThumb,
        ] {
            let payload = JobPayload::for_job(job_type, 7);
            assert_eq!(payload.job_type(), job_type);
            assert_eq!(payload.asset_id(), 7);
            let raw = serde_json::to_value(&payload).unwrap();
            assert_eq!(JobPayload::decode(job_type, &raw).unwrap(), payload);
        }
    }

    #[test]
    fn test_derivative_kind_suffix() {
        assert_eq!(DerivativeKind::PdfPreview.suffix(), ".preview.pdf");
        assert_eq!(DerivativeKind::Thumbnail.suffix(), ".thumb.jpg");
    }

    #[test]
    fn test_job_type_derivative_kind() {
        assert_eq!(
            JobType::DocPdfPreview.derivative_kind(),
            DerivativeKind::PdfPreview
        );
        assert_eq!(JobType::DocThumb.derivative_kind(), DerivativeKind::Thumbnail);
        assert_eq!(
            JobType::VideoThumb.derivative_kind(),
            DerivativeKind::Thumbnail
        );
        assert_eq!(
            JobType::ImageThumb.derivative_kind(),
            DerivativeKind::Thumbnail
        );
    }

    #[test]
    fn test_asset_kind_from_extension() {
        assert_eq!(AssetKind::from_extension("DOCX"), AssetKind::Document);
        assert_eq!(AssetKind::from_extension("pdf"), AssetKind::Document);
        assert_eq!(AssetKind::from_extension("jpeg"), AssetKind::Image);
        assert_eq!(AssetKind::from_extension("mkv"), AssetKind::Video);
        assert_eq!(AssetKind::from_extension("zip"), AssetKind::Other);
        assert_eq!(AssetKind::from_extension(""), AssetKind::Other);
    }

    #[test]
    fn test_asset_kind_str_round_trip() {
        for kind in [
            AssetKind::Document,
            AssetKind::Image,
            AssetKind::Video,
            AssetKind::Other,
        ] {
            assert_eq!(AssetKind::parse(kind.as_str()), kind);
        }
    }

    #[test]
    fn test_derivative_status_parse_fallback() {
        assert_eq!(DerivativeStatus::parse("ready"), DerivativeStatus::Ready);
        assert_eq!(DerivativeStatus::parse("error"), DerivativeStatus::Error);
        assert_eq!(DerivativeStatus::parse("bogus"), DerivativeStatus::Pending);
    }
}
