//! Document thumbnail builder: rasterize page 1 of a PDF.
//!
//! Non-PDF documents depend on their published PDF preview; a missing
//! preview fails fast so the worker can queue the prerequisite.

use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use image::DynamicImage;
use tracing::debug;

use derivo_core::defaults::TOOL_TIMEOUT_DOC_SECS;
use derivo_core::{
    Asset, DerivativeKind, DerivativeRepository, DerivativeStatus, Error, JobType, Result,
};

use super::{encode_jpeg, flatten_onto_white, shrink_to_fit};
use crate::generator::Generator;
use crate::tools::run_tool;

pub(crate) async fn build(
    gen: &Generator,
    asset: &Asset,
    source: &Path,
    out: &Path,
) -> Result<()> {
    let pdf = resolve_pdf(gen, asset, source).await?;
    let page = rasterize_first_page(gen, &pdf).await?;

    let flat = DynamicImage::ImageRgb8(flatten_onto_white(&page));
    let thumb = shrink_to_fit(flat, gen.config.thumb_max_dim);
    encode_jpeg(&thumb, out, gen.config.jpeg_quality)
}

/// The PDF to rasterize: the source itself, or the published preview.
async fn resolve_pdf(gen: &Generator, asset: &Asset, source: &Path) -> Result<PathBuf> {
    if asset.extension.eq_ignore_ascii_case("pdf") {
        return Ok(source.to_path_buf());
    }

    let preview_path = gen.config.derivative_path(asset, DerivativeKind::PdfPreview)?;
    let record = gen
        .db
        .derivatives
        .get(asset.id, DerivativeKind::PdfPreview)
        .await?;

    match record {
        Some(d) if d.status == DerivativeStatus::Ready && preview_path.exists() => {
            Ok(preview_path)
        }
        _ => Err(Error::MissingDependency {
            job_type: JobType::DocPdfPreview,
        }),
    }
}

/// Render page 1 to an image: pdftoppm first, ffmpeg as fallback.
async fn rasterize_first_page(gen: &Generator, pdf: &Path) -> Result<DynamicImage> {
    let timeout = Duration::from_secs(TOOL_TIMEOUT_DOC_SECS);
    let tmpdir = tempfile::tempdir()?;

    if gen.tools.is_available("pdftoppm").await {
        let prefix = tmpdir.path().join("page");
        let dpi = gen.config.raster_dpi.to_string();
        let args: [&OsStr; 8] = [
            OsStr::new("-f"),
            OsStr::new("1"),
            OsStr::new("-l"),
            OsStr::new("1"),
            OsStr::new("-r"),
            OsStr::new(&dpi),
            OsStr::new("-png"),
            pdf.as_os_str(),
        ];
        let mut full_args: Vec<&OsStr> = args.to_vec();
        full_args.push(prefix.as_os_str());

        match run_tool("pdftoppm", &full_args, timeout).await {
            Ok(_) => {
                if let Some(png) = first_png_in(tmpdir.path())? {
                    let bytes = std::fs::read(&png)?;
                    return image::load_from_memory(&bytes).map_err(|e| {
                        Error::TransientTool(format!("pdftoppm output unreadable: {}", e))
                    });
                }
                debug!(
                    subsystem = "builders",
                    op = "doc_thumb",
                    "pdftoppm produced no page, falling back to ffmpeg"
                );
            }
            Err(e) => {
                debug!(
                    subsystem = "builders",
                    op = "doc_thumb",
                    error = %e,
                    "pdftoppm failed, falling back to ffmpeg"
                );
            }
        }
    }

    // Fallback rasterizer path.
    let frame = tmpdir.path().join("page.png");
    let args: [&OsStr; 6] = [
        OsStr::new("-y"),
        OsStr::new("-i"),
        pdf.as_os_str(),
        OsStr::new("-frames:v"),
        OsStr::new("1"),
        frame.as_os_str(),
    ];
    run_tool("ffmpeg", &args, timeout).await?;

    let bytes = std::fs::read(&frame)
        .map_err(|_| Error::TransientTool("no rasterizer produced a page image".into()))?;
    image::load_from_memory(&bytes)
        .map_err(|e| Error::TransientTool(format!("rasterized page unreadable: {}", e)))
}

fn first_png_in(dir: &Path) -> Result<Option<PathBuf>> {
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if path.extension().is_some_and(|e| e.eq_ignore_ascii_case("png")) {
            return Ok(Some(path));
        }
    }
    Ok(None)
}
