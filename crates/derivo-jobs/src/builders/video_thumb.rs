//! Video thumbnail builder: representative frame extraction with a play
//! badge overlay.
//!
//! Frame selection tries fixed seek offsets first (skipping fade-in black at
//! 0s), then scene detection. Short clips make early offsets fail, which is
//! why the list ends at 0s.

use std::ffi::OsStr;
use std::path::Path;
use std::time::Duration;

use image::{DynamicImage, Rgba, RgbaImage};
use tracing::debug;

use derivo_core::defaults::{TOOL_TIMEOUT_VIDEO_SECS, VIDEO_SCENE_THRESHOLD, VIDEO_SEEK_OFFSETS_SECS};
use derivo_core::{Asset, Error, Result};

use super::encode_jpeg;
use crate::generator::Generator;
use crate::tools::{run_tool, stderr_excerpt};

pub(crate) async fn build(
    gen: &Generator,
    asset: &Asset,
    source: &Path,
    out: &Path,
) -> Result<()> {
    if !gen.tools.is_available("ffmpeg").await {
        return Err(Error::TransientTool("ffmpeg is not available".into()));
    }

    let dim = gen.config.video_thumb_dim;
    let frame = extract_frame(source, dim).await.map_err(|e| {
        // Total failure: attach a destination diagnostic so ops can tell a
        // broken video apart from a broken derivatives mount.
        let writable = out
            .parent()
            .map(|p| p.exists() && !std::fs::metadata(p).map(|m| m.permissions().readonly()).unwrap_or(true))
            .unwrap_or(false);
        Error::TransientTool(format!("{} (destination writable: {})", e, writable))
    })?;

    let mut canvas = frame.to_rgba8();
    draw_play_badge(&mut canvas);
    debug!(
        subsystem = "builders",
        op = "video_thumb",
        asset_id = asset.id,
        "Frame extracted and badged"
    );
    let rgb: DynamicImage = DynamicImage::ImageRgba8(canvas).to_rgb8().into();
    encode_jpeg(&rgb, out, gen.config.jpeg_quality)
}

/// Scale into the square canvas and center with dark padding.
fn scale_pad_filter(dim: u32) -> String {
    format!(
        "scale={d}:{d}:force_original_aspect_ratio=decrease,pad={d}:{d}:(ow-iw)/2:(oh-ih)/2:color=0x1c1c1c",
        d = dim
    )
}

async fn extract_frame(source: &Path, dim: u32) -> Result<DynamicImage> {
    let timeout = Duration::from_secs(TOOL_TIMEOUT_VIDEO_SECS);
    let tmpdir = tempfile::tempdir()?;
    let frame_path = tmpdir.path().join("frame.png");
    let filter = scale_pad_filter(dim);
    let mut last_error = String::new();

    for &offset in VIDEO_SEEK_OFFSETS_SECS {
        let ss = offset.to_string();
        let args: [&OsStr; 10] = [
            OsStr::new("-y"),
            OsStr::new("-ss"),
            OsStr::new(&ss),
            OsStr::new("-i"),
            source.as_os_str(),
            OsStr::new("-frames:v"),
            OsStr::new("1"),
            OsStr::new("-vf"),
            OsStr::new(&filter),
            frame_path.as_os_str(),
        ];
        match run_tool("ffmpeg", &args, timeout).await {
            Ok(_) if non_empty(&frame_path) => return load_frame(&frame_path),
            Ok(output) => last_error = stderr_excerpt(&output.stderr),
            Err(e) => last_error = e.to_string(),
        }
    }

    // Scene-detect fallback: first visually distinct frame.
    let scene_filter = format!(
        "select=gt(scene\\,{}),{}",
        VIDEO_SCENE_THRESHOLD, filter
    );
    let args: [&OsStr; 8] = [
        OsStr::new("-y"),
        OsStr::new("-i"),
        source.as_os_str(),
        OsStr::new("-frames:v"),
        OsStr::new("1"),
        OsStr::new("-vf"),
        OsStr::new(&scene_filter),
        frame_path.as_os_str(),
    ];
    match run_tool("ffmpeg", &args, timeout).await {
        Ok(_) if non_empty(&frame_path) => return load_frame(&frame_path),
        Ok(output) => last_error = stderr_excerpt(&output.stderr),
        Err(e) => last_error = e.to_string(),
    }

    Err(Error::TransientTool(format!(
        "no frame extracted: {}",
        last_error
    )))
}

fn non_empty(path: &Path) -> bool {
    std::fs::metadata(path).map(|m| m.len() > 0).unwrap_or(false)
}

fn load_frame(path: &Path) -> Result<DynamicImage> {
    let bytes = std::fs::read(path)?;
    image::load_from_memory(&bytes)
        .map_err(|e| Error::TransientTool(format!("extracted frame unreadable: {}", e)))
}

/// Overlay a translucent circular play badge with an inset triangle,
/// centered on the frame.
fn draw_play_badge(canvas: &mut RgbaImage) {
    let (w, h) = canvas.dimensions();
    let cx = w as f32 / 2.0;
    let cy = h as f32 / 2.0;
    let radius = w.min(h) as f32 / 6.0;

    // Right-pointing triangle inset inside the circle, nudged right so it
    // looks optically centered.
    let tri_r = radius * 0.55;
    let left = cx - tri_r * 0.6;
    let tip = cx + tri_r;

    for y in 0..h {
        for x in 0..w {
            let dx = x as f32 + 0.5 - cx;
            let dy = y as f32 + 0.5 - cy;
            if dx * dx + dy * dy > radius * radius {
                continue;
            }
            let px = x as f32 + 0.5;
            let py = y as f32 + 0.5;
            let in_triangle = px >= left && px <= tip && {
                // Half-height of the triangle at this x, tapering to the tip.
                let t = (px - left) / (tip - left);
                let half = (1.0 - t) * tri_r;
                py >= cy - half && py <= cy + half
            };
            let (badge, alpha) = if in_triangle {
                ([245u8, 245, 245], 0.9)
            } else {
                ([20u8, 20, 20], 0.55)
            };
            let pixel = canvas.get_pixel_mut(x, y);
            for c in 0..3 {
                pixel[c] =
                    (badge[c] as f32 * alpha + pixel[c] as f32 * (1.0 - alpha)).round() as u8;
            }
            pixel[3] = 255;
        }
    }
}
