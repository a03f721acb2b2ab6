//! Image thumbnail builder: decode, orient, shrink, re-encode.
//!
//! Re-encoding to JPEG strips embedded metadata (EXIF, GPS) from the
//! published thumbnail as a side effect, which is intended.

use std::io::Cursor;
use std::path::Path;

use image::DynamicImage;
use tracing::debug;

use derivo_core::{Asset, Error, Result};

use super::{encode_jpeg, flatten_onto_white, shrink_to_fit};
use crate::generator::Generator;

pub(crate) async fn build(
    gen: &Generator,
    asset: &Asset,
    source: &Path,
    out: &Path,
) -> Result<()> {
    let bytes = std::fs::read(source)?;
    let decoded = image::load_from_memory(&bytes)
        .map_err(|e| Error::Validation(format!("cannot decode image {}: {}", asset.relative_path, e)))?;

    let oriented = apply_exif_orientation(decoded, &bytes);
    let flat = DynamicImage::ImageRgb8(flatten_onto_white(&oriented));
    let thumb = shrink_to_fit(flat, gen.config.thumb_max_dim);

    debug!(
        subsystem = "builders",
        op = "image_thumb",
        asset_id = asset.id,
        width = thumb.width(),
        height = thumb.height(),
        "Image thumbnail rendered"
    );
    encode_jpeg(&thumb, out, gen.config.jpeg_quality)
}

/// Rotate/flip per the EXIF Orientation tag (values 2–8).
///
/// Absent or unreadable EXIF means orientation 1, i.e. leave as-is.
fn apply_exif_orientation(img: DynamicImage, raw: &[u8]) -> DynamicImage {
    match read_orientation(raw) {
        Some(2) => img.fliph(),
        Some(3) => img.rotate180(),
        Some(4) => img.flipv(),
        Some(5) => img.rotate90().fliph(),
        Some(6) => img.rotate90(),
        Some(7) => img.rotate270().fliph(),
        Some(8) => img.rotate270(),
        _ => img,
    }
}

fn read_orientation(raw: &[u8]) -> Option<u32> {
    let exif = exif::Reader::new()
        .read_from_container(&mut Cursor::new(raw))
        .ok()?;
    exif.get_field(exif::Tag::Orientation, exif::In::PRIMARY)?
        .value
        .get_uint(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_exif_leaves_image_untouched() {
        let img = DynamicImage::new_rgb8(40, 20);
        let oriented = apply_exif_orientation(img, b"not an image container");
        assert_eq!((oriented.width(), oriented.height()), (40, 20));
    }

    #[test]
    fn test_rotation_swaps_dimensions() {
        // Orientations 5-8 go through rotate90/rotate270 and swap the axes.
        let img = DynamicImage::new_rgb8(40, 20);
        let rotated = img.rotate90();
        assert_eq!((rotated.width(), rotated.height()), (20, 40));
    }
}
