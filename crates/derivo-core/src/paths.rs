//! Safe path mapping between source assets and their derivative files.
//!
//! Every join of untrusted relative paths onto a configured root goes
//! through [`safe_join`]: `..` segments, absolute-looking paths, and drive
//! markers are rejected, so a resolved path can never escape its root.

use std::path::{Component, Path, PathBuf};

use crate::error::{Error, Result};
use crate::models::{Asset, DerivativeKind};

/// Join `relative` onto `root`, rejecting any component that could escape.
pub fn safe_join(root: &Path, relative: &str) -> Result<PathBuf> {
    if relative.is_empty() {
        return Err(Error::Validation("empty relative path".into()));
    }
    // Windows drive markers and UNC prefixes are never legitimate here,
    // regardless of host platform.
    if relative.contains(':') || relative.starts_with("\\\\") {
        return Err(Error::Validation(format!(
            "path contains a drive marker: {}",
            relative
        )));
    }
    let rel = Path::new(relative);
    if rel.is_absolute() || relative.starts_with(['/', '\\']) {
        return Err(Error::Validation(format!(
            "absolute path not allowed: {}",
            relative
        )));
    }

    let mut joined = root.to_path_buf();
    for component in rel.components() {
        match component {
            Component::Normal(part) => joined.push(part),
            Component::CurDir => {}
            Component::ParentDir => {
                return Err(Error::Validation(format!(
                    "path traversal not allowed: {}",
                    relative
                )))
            }
            Component::RootDir | Component::Prefix(_) => {
                return Err(Error::Validation(format!(
                    "absolute path not allowed: {}",
                    relative
                )))
            }
        }
    }
    Ok(joined)
}

/// Relative derivative path for an asset: source extension replaced by the
/// kind's suffix (`docs/report.docx` → `docs/report.preview.pdf`).
pub fn derivative_relative_path(asset: &Asset, kind: DerivativeKind) -> String {
    let rel = &asset.relative_path;
    let name_start = rel.rfind('/').map_or(0, |slash| slash + 1);
    // Only strip an extension from the final component, and never its
    // leading dot: `.env` is a dotfile name, not an empty stem.
    let stem_len = match rel[name_start..].rfind('.') {
        Some(dot) if dot > 0 => name_start + dot,
        _ => rel.len(),
    };
    format!("{}{}", &rel[..stem_len], kind.suffix())
}

/// Absolute path of an asset's source file under `source_root`.
pub fn source_path(source_root: &Path, asset: &Asset) -> Result<PathBuf> {
    safe_join(source_root, &asset.relative_path)
}

/// Absolute path of an asset's derivative file under `derivatives_root`.
pub fn derivative_path(
    derivatives_root: &Path,
    asset: &Asset,
    kind: DerivativeKind,
) -> Result<PathBuf> {
    safe_join(derivatives_root, &derivative_relative_path(asset, kind))
}
