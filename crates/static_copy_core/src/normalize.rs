use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

pub const INDEX_DOCUMENT: &str = "index.html";
const STAGING_SUFFIX: &str = ".tmp";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    /// No extension at all: a route that needs an `index.html` directory.
    ExtensionlessPage,
    HtmlPage,
    Asset,
}

impl EntryKind {
    pub fn is_page(self) -> bool {
        matches!(self, Self::ExtensionlessPage | Self::HtmlPage)
    }
}

/// Classifies a file name. Multi-dot names are judged by their final segment
/// only, so `data.json` is an asset and `page.v2` is an asset too.
pub fn classify_entry(file_name: &str) -> EntryKind {
    let mut parts = file_name.split('.');
    let first = parts.next();
    match parts.last() {
        None if first.is_some() => EntryKind::ExtensionlessPage,
        Some("html") => EntryKind::HtmlPage,
        _ => EntryKind::Asset,
    }
}

pub fn classify_path(path: &Path) -> EntryKind {
    path.file_name()
        .map(|name| classify_entry(&name.to_string_lossy()))
        .unwrap_or(EntryKind::Asset)
}

/// Returns the path of the HTML document that holds the page's content,
/// converting an extensionless file into `<entry>/index.html` on the way.
pub fn normalize_page(path: &Path) -> Result<PathBuf> {
    if path.to_string_lossy().ends_with(".html") {
        return Ok(path.to_path_buf());
    }

    let mut staging = path.as_os_str().to_os_string();
    staging.push(STAGING_SUFFIX);
    let staging = PathBuf::from(staging);

    fs::create_dir(&staging)
        .with_context(|| format!("failed to create staging dir {}", staging.display()))?;
    let staged_index = staging.join(INDEX_DOCUMENT);
    fs::rename(path, &staged_index).with_context(|| {
        format!(
            "failed to move {} to {}",
            path.display(),
            staged_index.display()
        )
    })?;
    fs::rename(&staging, path).with_context(|| {
        format!(
            "failed to move {} to {}",
            staging.display(),
            path.display()
        )
    })?;

    Ok(path.join(INDEX_DOCUMENT))
}
