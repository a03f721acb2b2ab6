//! PDF preview builder: office document → PDF via LibreOffice headless.

use std::ffi::OsStr;
use std::path::Path;
use std::time::Duration;

use tracing::debug;

use derivo_core::defaults::TOOL_TIMEOUT_DOC_SECS;
use derivo_core::{Asset, Error, Result};

use crate::generator::Generator;
use crate::tools::{run_tool, stderr_excerpt};

pub(crate) async fn build(
    gen: &Generator,
    asset: &Asset,
    source: &Path,
    out: &Path,
) -> Result<()> {
    // A PDF is its own preview.
    if asset.extension.eq_ignore_ascii_case("pdf") {
        std::fs::copy(source, out)?;
        return Ok(());
    }

    if !gen.tools.is_available("soffice").await {
        return Err(Error::TransientTool("soffice is not available".into()));
    }

    // Isolated output directory: soffice names its output after the input
    // stem, and concurrent conversions must not collide.
    let tmpdir = tempfile::tempdir()?;
    let args: [&OsStr; 6] = [
        OsStr::new("--headless"),
        OsStr::new("--convert-to"),
        OsStr::new("pdf"),
        OsStr::new("--outdir"),
        tmpdir.path().as_os_str(),
        source.as_os_str(),
    ];
    let output = run_tool(
        "soffice",
        &args,
        Duration::from_secs(TOOL_TIMEOUT_DOC_SECS),
    )
    .await?;

    let produced = first_pdf_in(tmpdir.path())?.ok_or_else(|| {
        Error::TransientTool(format!(
            "soffice produced no pdf for {}: {}",
            asset.relative_path,
            stderr_excerpt(&output.stderr)
        ))
    })?;

    debug!(
        subsystem = "builders",
        op = "pdf_preview",
        asset_id = asset.id,
        "Converted office document"
    );

    // The tempdir may be on another filesystem, so copy rather than rename.
    std::fs::copy(&produced, out)?;
    Ok(())
}

fn first_pdf_in(dir: &Path) -> Result<Option<std::path::PathBuf>> {
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if path.extension().is_some_and(|e| e.eq_ignore_ascii_case("pdf")) {
            return Ok(Some(path));
        }
    }
    Ok(None)
}
