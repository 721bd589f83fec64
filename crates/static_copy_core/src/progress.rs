use std::path::Path;

use serde::Serialize;
use walkdir::WalkDir;

use crate::normalize::classify_path;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ProgressSnapshot {
    pub pages: usize,
    pub assets: usize,
}

/// Read-only count of what has landed under `dir` so far. Safe to call while
/// a fetch is writing into it: entries that vanish or can't be read are skipped.
pub fn snapshot_progress(dir: &Path) -> ProgressSnapshot {
    let mut snapshot = ProgressSnapshot::default();
    for entry in WalkDir::new(dir).into_iter().filter_map(Result::ok) {
        if !entry.file_type().is_file() {
            continue;
        }
        if classify_path(entry.path()).is_page() {
            snapshot.pages += 1;
        } else {
            snapshot.assets += 1;
        }
    }
    snapshot
}
