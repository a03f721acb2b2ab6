//! Builder configuration: filesystem roots and output geometry.

use std::path::{Path, PathBuf};

use derivo_core::defaults::{JPEG_QUALITY, RASTER_DPI, THUMB_MAX_DIM, VIDEO_THUMB_DIM};
use derivo_core::{derivative_path, source_path, Asset, DerivativeKind, Error, Result};

/// Filesystem layout and output geometry for the builders.
#[derive(Debug, Clone)]
pub struct GeneratorConfig {
    /// Root of the source asset tree.
    pub source_root: PathBuf,
    /// Root under which derivative files are published.
    pub derivatives_root: PathBuf,
    /// Bounding box for document and image thumbnails.
    pub thumb_max_dim: u32,
    /// Square canvas size for video thumbnails.
    pub video_thumb_dim: u32,
    /// JPEG quality for re-encoded thumbnails.
    pub jpeg_quality: u8,
    /// Rasterization resolution for PDF page renders.
    pub raster_dpi: u32,
}

impl GeneratorConfig {
    /// Create a config with default geometry.
    pub fn new(source_root: impl Into<PathBuf>, derivatives_root: impl Into<PathBuf>) -> Self {
        Self {
            source_root: source_root.into(),
            derivatives_root: derivatives_root.into(),
            thumb_max_dim: THUMB_MAX_DIM,
            video_thumb_dim: VIDEO_THUMB_DIM,
            jpeg_quality: JPEG_QUALITY,
            raster_dpi: RASTER_DPI,
        }
    }

    /// Create config from environment variables.
    ///
    /// | Variable | Required | Description |
    /// |----------|----------|-------------|
    /// | `SOURCE_ROOT` | yes | Root of the source asset tree |
    /// | `DERIVATIVES_ROOT` | yes | Root for published derivatives |
    pub fn from_env() -> Result<Self> {
        let source_root = std::env::var("SOURCE_ROOT")
            .map_err(|_| Error::Config("SOURCE_ROOT is not set".into()))?;
        let derivatives_root = std::env::var("DERIVATIVES_ROOT")
            .map_err(|_| Error::Config("DERIVATIVES_ROOT is not set".into()))?;
        Ok(Self::new(source_root, derivatives_root))
    }

    /// Absolute path of an asset's source file.
    pub fn source_path(&self, asset: &Asset) -> Result<PathBuf> {
        source_path(&self.source_root, asset)
    }

    /// Absolute path of an asset's derivative file for the given kind.
    pub fn derivative_path(&self, asset: &Asset, kind: DerivativeKind) -> Result<PathBuf> {
        derivative_path(&self.derivatives_root, asset, kind)
    }

    /// The derivatives root as a path.
    pub fn derivatives_root(&self) -> &Path {
        &self.derivatives_root
    }
}
