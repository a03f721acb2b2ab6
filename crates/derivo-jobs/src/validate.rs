//! Artifact validation and placeholder detection.
//!
//! A derivative is only published after passing these checks, so a Ready
//! status row always points at a plausible artifact. Historically the
//! generation tools could emit a synthetic gray placeholder instead of a
//! real frame; those are caught by fingerprinting every placeholder the
//! generator could have produced and rejecting matching bytes.

use std::collections::HashSet;
use std::path::Path;

use image::codecs::jpeg::JpegEncoder;
use image::{DynamicImage, ImageBuffer, Rgb};
use sha2::{Digest, Sha256};
use tracing::debug;

use derivo_core::defaults::{
    MIN_IMAGE_BYTES, MIN_PDF_BYTES, PLACEHOLDER_DIMS, PLACEHOLDER_QUALITIES,
};
use derivo_core::{DerivativeKind, Error, RejectReason, Result};

/// Render the synthetic placeholder at the given size and JPEG quality.
///
/// Must stay byte-for-byte reproducible: the fingerprint set is rebuilt from
/// this function, not stored.
pub fn render_placeholder(dim: u32, quality: u8) -> Result<Vec<u8>> {
    let gray = ImageBuffer::from_pixel(dim, dim, Rgb([0xd8u8, 0xd8, 0xd8]));
    let img = DynamicImage::ImageRgb8(gray);

    let mut bytes = Vec::new();
    let encoder = JpegEncoder::new_with_quality(&mut bytes, quality);
    img.write_with_encoder(encoder)
        .map_err(|e| Error::Internal(format!("placeholder render failed: {}", e)))?;
    Ok(bytes)
}

fn sha256(bytes: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hasher.finalize().into()
}

/// SHA-256 fingerprints of every placeholder render the generator has ever
/// produced (historical size × quality matrix).
pub struct PlaceholderIndex {
    fingerprints: HashSet<[u8; 32]>,
}

impl PlaceholderIndex {
    pub fn new() -> Result<Self> {
        let mut fingerprints = HashSet::new();
        for &dim in PLACEHOLDER_DIMS {
            for &quality in PLACEHOLDER_QUALITIES {
                fingerprints.insert(sha256(&render_placeholder(dim, quality)?));
            }
        }
        debug!(
            subsystem = "validate",
            count = fingerprints.len(),
            "Placeholder fingerprint index built"
        );
        Ok(Self { fingerprints })
    }

    pub fn contains(&self, bytes: &[u8]) -> bool {
        self.fingerprints.contains(&sha256(bytes))
    }
}

/// Validate a generated artifact before publish.
///
/// Checks run in order: exists and non-empty, type-specific minimum size,
/// header sanity, placeholder fingerprint (thumbnails only). The first
/// failure wins.
pub fn validate_artifact(
    path: &Path,
    kind: DerivativeKind,
    placeholders: &PlaceholderIndex,
) -> Result<()> {
    let bytes = match std::fs::read(path) {
        Ok(b) => b,
        Err(_) => return Err(Error::PlaceholderRejected(RejectReason::Empty)),
    };
    if bytes.is_empty() {
        return Err(Error::PlaceholderRejected(RejectReason::Empty));
    }

    let min = match kind {
        DerivativeKind::PdfPreview => MIN_PDF_BYTES,
        DerivativeKind::Thumbnail => MIN_IMAGE_BYTES,
    };
    if (bytes.len() as u64) < min {
        return Err(Error::PlaceholderRejected(RejectReason::TooSmall {
            size: bytes.len() as u64,
            min,
        }));
    }

    match kind {
        DerivativeKind::PdfPreview => {
            if !bytes.starts_with(b"%PDF-") {
                return Err(Error::PlaceholderRejected(RejectReason::BadHeader(
                    "missing %PDF- magic".into(),
                )));
            }
        }
        DerivativeKind::Thumbnail => {
            let decoded = image::load_from_memory(&bytes).map_err(|e| {
                Error::PlaceholderRejected(RejectReason::BadHeader(e.to_string()))
            })?;
            if decoded.width() == 0 || decoded.height() == 0 {
                return Err(Error::PlaceholderRejected(RejectReason::BadHeader(
                    "zero-dimension image".into(),
                )));
            }
            if placeholders.contains(&bytes) {
                return Err(Error::PlaceholderRejected(
                    RejectReason::PlaceholderSignature,
                ));
            }
        }
    }

    Ok(())
}
