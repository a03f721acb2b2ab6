//! Per-kind derivative builders.
//!
//! Each builder is an async fn from (generator, asset, source path, output
//! path) to a finished artifact at the output path. Builders never touch the
//! canonical destination; the generator validates and publishes their output.

pub(crate) mod doc_thumb;
pub(crate) mod image_thumb;
pub(crate) mod pdf_preview;
pub(crate) mod video_thumb;

use std::fs::File;
use std::io::BufWriter;
use std::path::Path;

use image::codecs::jpeg::JpegEncoder;
use image::{DynamicImage, Rgb, RgbImage};

use derivo_core::{Error, Result};

/// Composite an image onto an opaque white background, discarding alpha.
///
/// Rasterized PDF pages and decoded PNGs may carry transparency that would
/// turn black in a JPEG.
pub(crate) fn flatten_onto_white(img: &DynamicImage) -> RgbImage {
    let rgba = img.to_rgba8();
    let mut out = RgbImage::from_pixel(rgba.width(), rgba.height(), Rgb([255, 255, 255]));
    for (x, y, pixel) in rgba.enumerate_pixels() {
        let alpha = pixel[3] as u32;
        if alpha == 0 {
            continue;
        }
        let blend = |fg: u8| ((fg as u32 * alpha + 255 * (255 - alpha)) / 255) as u8;
        out.put_pixel(x, y, Rgb([blend(pixel[0]), blend(pixel[1]), blend(pixel[2])]));
    }
    out
}

/// Encode an image as JPEG at the given quality, writing to `out`.
pub(crate) fn encode_jpeg(img: &DynamicImage, out: &Path, quality: u8) -> Result<()> {
    let file = File::create(out)?;
    let mut writer = BufWriter::new(file);
    let encoder = JpegEncoder::new_with_quality(&mut writer, quality);
    img.write_with_encoder(encoder)
        .map_err(|e| Error::Internal(format!("jpeg encode failed: {}", e)))?;
    Ok(())
}

/// Aspect-preserving shrink into a `max_dim` bounding box. Images already
/// inside the box pass through untouched.
pub(crate) fn shrink_to_fit(img: DynamicImage, max_dim: u32) -> DynamicImage {
    if img.width() <= max_dim && img.height() <= max_dim {
        img
    } else {
        img.resize(max_dim, max_dim, image::imageops::FilterType::Lanczos3)
    }
}
