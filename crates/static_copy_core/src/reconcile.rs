//! Post-download reconciliation of a mirrored site.
//!
//! A run moves through [`ReconcileStage`] in order: the root URL is mirrored
//! into a scratch directory, every page is normalized and rewritten under the
//! public mount path, file-like references that the mirror missed are fetched
//! one by one, and the finished tree is moved to its destination. Fetch
//! failures never stop a run; they are collected in the [`ErrorLedger`] and
//! reported at the end.

use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use serde::Serialize;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::config::FetchSection;
use crate::error::EnvironmentError;
use crate::fetch::{BulkFetcher, FetchArgs, FetchInvocation, FetchOutcome};
use crate::ledger::ErrorLedger;
use crate::normalize::{EntryKind, classify_path, normalize_page};
use crate::progress::{ProgressSnapshot, snapshot_progress};
use crate::references::{ReferenceSet, discover_references, rewrite_references};
use crate::request::CopyRequest;
use crate::runtime::normalize_for_display;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReconcileStage {
    FetchingRoot,
    Scanning,
    ResolvingGap,
    Finalizing,
    Done,
    Failed,
}

impl ReconcileStage {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::FetchingRoot => "fetching_root",
            Self::Scanning => "scanning",
            Self::ResolvingGap => "resolving_gap",
            Self::Finalizing => "finalizing",
            Self::Done => "done",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for ReconcileStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone)]
pub struct ReconcileOptions {
    /// Mount path the copy is served under, e.g. `/public/my-copy`.
    pub public_url: String,
    pub scratch_dir: PathBuf,
    pub destination: PathBuf,
    pub fetch_policy: FetchSection,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RootFetchStatus {
    Complete,
    Partial,
    Failed,
}

impl RootFetchStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Complete => "complete",
            Self::Partial => "partial",
            Self::Failed => "failed",
        }
    }
}

impl From<FetchOutcome> for RootFetchStatus {
    fn from(outcome: FetchOutcome) -> Self {
        match outcome {
            FetchOutcome::Complete => Self::Complete,
            FetchOutcome::Partial => Self::Partial,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PageFailure {
    pub path: String,
    pub error: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ScanSummary {
    pub pages_processed: usize,
    pub pages_normalized: usize,
    pub references: ReferenceSet,
    pub failures: Vec<PageFailure>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct GapSummary {
    pub missing: Vec<String>,
    pub fetched: Vec<String>,
    pub failed: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CopyReport {
    pub name: String,
    pub url: String,
    pub public_url: String,
    pub destination: String,
    pub root_fetch: RootFetchStatus,
    pub scan: ScanSummary,
    pub gap: GapSummary,
    pub ledger: ErrorLedger,
}

/// Runs the whole pipeline for one request. `on_progress` is called while the
/// root fetch is in flight with a snapshot of the scratch directory.
pub fn run_static_copy(
    fetcher: &mut dyn BulkFetcher,
    request: &CopyRequest,
    options: &ReconcileOptions,
    on_progress: &mut dyn FnMut(ProgressSnapshot, &ErrorLedger),
) -> Result<CopyReport> {
    if options.destination.exists() {
        bail!(
            "destination already exists: {} (choose another name or remove it first)",
            normalize_for_display(&options.destination)
        );
    }

    let mut stage = ReconcileStage::FetchingRoot;
    run_stages(fetcher, request, options, on_progress, &mut stage).map_err(|error| {
        let failed_in = stage;
        enter(&mut stage, ReconcileStage::Failed);
        error.context(format!("{failed_in} stage failed"))
    })
}

/// Runs the stages in order, keeping `stage` on the one currently executing
/// so a failure can be attributed to it.
fn run_stages(
    fetcher: &mut dyn BulkFetcher,
    request: &CopyRequest,
    options: &ReconcileOptions,
    on_progress: &mut dyn FnMut(ProgressSnapshot, &ErrorLedger),
    stage: &mut ReconcileStage,
) -> Result<CopyReport> {
    let mut ledger = ErrorLedger::default();

    enter(stage, ReconcileStage::FetchingRoot);
    fs::create_dir_all(&options.scratch_dir).with_context(|| {
        format!(
            "failed to create scratch dir {}",
            options.scratch_dir.display()
        )
    })?;
    let root_fetch = fetch_root(fetcher, request, options, &mut ledger, on_progress);

    enter(stage, ReconcileStage::Scanning);
    let mirror_root = locate_mirror_root(&options.scratch_dir)?;
    let scan = scan_mirror(&mirror_root, &options.public_url)?;
    info!(
        pages = scan.pages_processed,
        normalized = scan.pages_normalized,
        references = scan.references.len(),
        failures = scan.failures.len(),
        "scan complete"
    );

    enter(stage, ReconcileStage::ResolvingGap);
    let missing = compute_fetch_gap(&scan.references, &mirror_root);
    let gap = resolve_gap(fetcher, request, &options.scratch_dir, missing, &mut ledger);

    enter(stage, ReconcileStage::Finalizing);
    relocate_tree(&mirror_root, &options.destination)?;
    if let Err(error) = fs::remove_dir_all(&options.scratch_dir) {
        debug!(
            "could not remove scratch dir {}: {error}",
            options.scratch_dir.display()
        );
    }

    enter(stage, ReconcileStage::Done);
    Ok(CopyReport {
        name: request.name.clone(),
        url: request.url.clone(),
        public_url: options.public_url.clone(),
        destination: normalize_for_display(&options.destination),
        root_fetch,
        scan,
        gap,
        ledger,
    })
}

fn enter(current: &mut ReconcileStage, next: ReconcileStage) {
    *current = next;
    info!(stage = next.as_str(), "entering stage");
}

fn fetch_root(
    fetcher: &mut dyn BulkFetcher,
    request: &CopyRequest,
    options: &ReconcileOptions,
    ledger: &mut ErrorLedger,
    on_progress: &mut dyn FnMut(ProgressSnapshot, &ErrorLedger),
) -> RootFetchStatus {
    let args = FetchArgs::recursive(&options.fetch_policy, &request.credentials, &request.url);
    info!("running command: {args}");
    let invocation = FetchInvocation::new(args, &options.scratch_dir);
    let scratch_dir = options.scratch_dir.clone();
    let mut poll = |ledger: &ErrorLedger| on_progress(snapshot_progress(&scratch_dir), ledger);

    match fetcher.fetch(&invocation, ledger, &mut poll) {
        Ok(outcome @ FetchOutcome::Complete) => outcome.into(),
        Ok(outcome @ FetchOutcome::Partial) => {
            warn!("root fetch finished with some files not downloaded");
            outcome.into()
        }
        Err(error) => {
            warn!("{error}");
            warn!("continuing anyway");
            RootFetchStatus::Failed
        }
    }
}

/// The fetcher creates one directory per host inside the scratch dir; that
/// directory is the mirror.
pub fn locate_mirror_root(scratch_dir: &Path) -> Result<PathBuf> {
    let entries = fs::read_dir(scratch_dir).map_err(|source| EnvironmentError::ScratchUnreadable {
        path: scratch_dir.to_path_buf(),
        source,
    })?;
    let mut directories = entries
        .filter_map(Result::ok)
        .filter(|entry| entry.file_type().is_ok_and(|kind| kind.is_dir()))
        .map(|entry| entry.path())
        .collect::<Vec<_>>();
    directories.sort();
    match directories.into_iter().next() {
        Some(root) => Ok(root),
        None => bail!(
            "nothing was downloaded into {}",
            normalize_for_display(scratch_dir)
        ),
    }
}

/// Every page-like file under `root`, in walk order.
pub fn collect_pages(root: &Path) -> Result<Vec<PathBuf>> {
    let mut pages = Vec::new();
    for entry in WalkDir::new(root) {
        let entry = entry.map_err(|error| {
            let path = error
                .path()
                .map(Path::to_path_buf)
                .unwrap_or_else(|| root.to_path_buf());
            let source = error
                .into_io_error()
                .unwrap_or_else(|| io::Error::other("filesystem loop detected"));
            EnvironmentError::ScratchUnreadable { path, source }
        })?;
        if entry.file_type().is_file() && classify_path(entry.path()).is_page() {
            pages.push(entry.into_path());
        }
    }
    Ok(pages)
}

/// Normalizes, rewrites, and scans every page under `root`. Pages are popped
/// off the end of the collected list, so processing order follows the walk in
/// reverse and is not something callers should rely on.
pub fn scan_mirror(root: &Path, public_url: &str) -> Result<ScanSummary> {
    let mut pages = collect_pages(root)?;
    let mut summary = ScanSummary::default();

    while let Some(path) = pages.pop() {
        match reconcile_page(&path, public_url) {
            Ok(page) => {
                summary.pages_processed += 1;
                if page.normalized {
                    summary.pages_normalized += 1;
                }
                summary.references.extend(page.discovered);
            }
            Err(error) => {
                warn!("skipping page {}: {error:#}", path.display());
                summary.failures.push(PageFailure {
                    path: normalize_for_display(&path),
                    error: format!("{error:#}"),
                });
            }
        }
    }
    Ok(summary)
}

#[derive(Debug)]
struct ReconciledPage {
    normalized: bool,
    discovered: Vec<String>,
}

fn reconcile_page(path: &Path, public_url: &str) -> Result<ReconciledPage> {
    let normalized = classify_path(path) == EntryKind::ExtensionlessPage;
    let document = normalize_page(path)?;
    let original = fs::read(&document)
        .with_context(|| format!("failed to read {}", document.display()))?;
    let rewritten = rewrite_references(&original, public_url);
    fs::write(&document, &rewritten)
        .with_context(|| format!("failed to write {}", document.display()))?;
    Ok(ReconciledPage {
        normalized,
        discovered: discover_references(&original),
    })
}

/// References with nothing at the matching path under `mirror_root`.
pub fn compute_fetch_gap(references: &ReferenceSet, mirror_root: &Path) -> Vec<String> {
    references
        .iter()
        .filter(|reference| !mirror_root.join(reference.trim_start_matches('/')).exists())
        .map(str::to_string)
        .collect()
}

/// Concatenates base and path, collapses repeated slashes, then restores the
/// `://` after the scheme.
pub fn gap_url(base_url: &str, path: &str) -> String {
    let joined = format!("{base_url}{path}");
    let mut collapsed = String::with_capacity(joined.len());
    let mut previous_slash = false;
    for ch in joined.chars() {
        if ch == '/' {
            if previous_slash {
                continue;
            }
            previous_slash = true;
        } else {
            previous_slash = false;
        }
        collapsed.push(ch);
    }
    collapsed.replacen(":/", "://", 1)
}

/// Fetches each missing reference in turn. One failure never stops the rest.
fn resolve_gap(
    fetcher: &mut dyn BulkFetcher,
    request: &CopyRequest,
    scratch_dir: &Path,
    missing: Vec<String>,
    ledger: &mut ErrorLedger,
) -> GapSummary {
    let mut summary = GapSummary::default();
    for path in &missing {
        let url = gap_url(&request.url, path);
        let invocation =
            FetchInvocation::new(FetchArgs::single(&request.credentials, &url), scratch_dir);
        match fetcher.fetch(&invocation, ledger, &mut |_| {}) {
            Ok(_) => summary.fetched.push(url),
            Err(error) => {
                warn!("could not fetch {url}: {error}");
                ledger.record_url(&url);
                summary.failed.push(url);
            }
        }
    }
    summary.missing = missing;
    summary
}

/// Moves the finished tree into place, copying when the scratch dir lives on
/// another filesystem.
pub fn relocate_tree(source: &Path, destination: &Path) -> Result<()> {
    if let Some(parent) = destination.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    match fs::rename(source, destination) {
        Ok(()) => Ok(()),
        Err(error) if error.kind() == io::ErrorKind::CrossesDevices => {
            debug!("rename crossed filesystems, copying instead");
            copy_tree(source, destination)?;
            fs::remove_dir_all(source)
                .with_context(|| format!("failed to remove {}", source.display()))
        }
        Err(error) => Err(error).with_context(|| {
            format!(
                "failed to move {} to {}",
                source.display(),
                destination.display()
            )
        }),
    }
}

fn copy_tree(source: &Path, destination: &Path) -> Result<()> {
    for entry in WalkDir::new(source) {
        let entry = entry.with_context(|| format!("failed to walk {}", source.display()))?;
        let relative = entry
            .path()
            .strip_prefix(source)
            .with_context(|| format!("{} escaped {}", entry.path().display(), source.display()))?;
        let target = destination.join(relative);
        if entry.file_type().is_dir() {
            fs::create_dir_all(&target)
                .with_context(|| format!("failed to create {}", target.display()))?;
        } else {
            fs::copy(entry.path(), &target).with_context(|| {
                format!(
                    "failed to copy {} to {}",
                    entry.path().display(),
                    target.display()
                )
            })?;
        }
    }
    Ok(())
}
