//! Checksum verification of built package containers.
//!
//! A container is checked against the component manifests it carries: the
//! package manifest (`update.mum`) names the component manifests, and every
//! file a component manifest declares with a digest becomes one verification
//! unit. Units run on a scoped worker pool and are collected in completion
//! order, then sorted, so the verdict never depends on scheduling.

use crate::concurrency::{run_units, CancelToken, Deadline, DeadlineReader, Progress, ProgressFn};
use crate::CoreError;
use cbsgen_schema::parse_component_bytes;
use cbsgen_store::{ContainerCodec, ContentDigest};
use serde::Serialize;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

const PACKAGE_MANIFEST: &str = "update.mum";
const MANIFEST_EXTENSION: &str = ".manifest";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    Match,
    Mismatch,
    NotFound,
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Match => "match",
            Self::Mismatch => "mismatch",
            Self::NotFound => "not found",
        })
    }
}

/// A container entry and the digest its component manifest declares for it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExpectedChecksum {
    pub entry: String,
    /// Base64, as written in the manifest.
    pub declared: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VerificationResult {
    pub placement_path: String,
    /// Upper-case hex when the declared value decodes, the raw text otherwise.
    pub declared_digest: String,
    pub actual_digest: Option<String>,
    pub verdict: Verdict,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PackageReport {
    pub container: PathBuf,
    pub results: Vec<VerificationResult>,
}

impl PackageReport {
    pub fn is_valid(&self) -> bool {
        self.results.iter().all(|r| r.verdict == Verdict::Match)
    }

    pub fn failures(&self) -> impl Iterator<Item = &VerificationResult> {
        self.results.iter().filter(|r| r.verdict != Verdict::Match)
    }
}

/// A container that could not be checked at all.
#[derive(Debug, Clone, Serialize)]
pub struct PackageFailure {
    pub container: PathBuf,
    pub error: String,
    pub platform_unavailable: bool,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct BatchReport {
    pub packages: Vec<PackageReport>,
    pub errors: Vec<PackageFailure>,
    /// Containers without a package manifest.
    pub skipped: Vec<PathBuf>,
}

impl BatchReport {
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty() && self.packages.iter().all(PackageReport::is_valid)
    }

    pub fn failed_packages(&self) -> usize {
        self.errors.len() + self.packages.iter().filter(|p| !p.is_valid()).count()
    }
}

#[derive(Debug, Clone, Copy)]
pub struct VerifyOptions {
    pub jobs: usize,
    pub unit_timeout: Option<Duration>,
}

impl Default for VerifyOptions {
    fn default() -> Self {
        Self {
            jobs: std::thread::available_parallelism().map_or(1, usize::from),
            unit_timeout: None,
        }
    }
}

pub struct Verifier<'c> {
    codec: &'c dyn ContainerCodec,
    options: VerifyOptions,
    cancel: CancelToken,
    progress: Option<Arc<ProgressFn>>,
}

impl<'c> Verifier<'c> {
    pub fn new(codec: &'c dyn ContainerCodec, options: VerifyOptions) -> Self {
        Self {
            codec,
            options,
            cancel: CancelToken::new(),
            progress: None,
        }
    }

    #[must_use]
    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Called with (completed, total) units after each file of a package.
    #[must_use]
    pub fn with_progress(mut self, progress: Arc<ProgressFn>) -> Self {
        self.progress = Some(progress);
        self
    }

    /// Digests declared by every component manifest embedded in `container`.
    pub fn collect_checksums(&self, container: &Path) -> Result<Vec<ExpectedChecksum>, CoreError> {
        let package = parse_component_bytes(&self.codec.extract_entry(container, PACKAGE_MANIFEST)?)?;
        let mut checks = Vec::new();
        for manifest in package.manifest_entries() {
            let data = self
                .codec
                .extract_entry(container, manifest.placement_path.as_str())?;
            let component = parse_component_bytes(&data)?;
            let name = &manifest.source_path;
            let stem = &name[..name.len() - MANIFEST_EXTENSION.len()];
            for file in &component.files {
                let Some(declared) = &file.declared_digest else {
                    continue;
                };
                let relative = file.source_path.trim_start_matches(['\\', '/']);
                checks.push(ExpectedChecksum {
                    entry: format!("{stem}\\{relative}"),
                    declared: declared.clone(),
                });
            }
        }
        debug!("{}: {} files to check", container.display(), checks.len());
        Ok(checks)
    }

    pub fn verify_package(&self, container: &Path) -> Result<PackageReport, CoreError> {
        let checks = self.collect_checksums(container)?;
        let progress = Progress::new(checks.len(), self.progress.clone());
        let outcomes = run_units(
            &checks,
            self.options.jobs,
            &self.cancel,
            &progress,
            |_, check| self.verify_unit(container, check),
        );
        if self.cancel.is_cancelled() {
            return Err(CoreError::Cancelled);
        }
        let mut results: Vec<VerificationResult> = outcomes.into_iter().map(|(_, r)| r).collect();
        results.sort_by(|a, b| a.placement_path.cmp(&b.placement_path));
        Ok(PackageReport {
            container: container.to_path_buf(),
            results,
        })
    }

    fn verify_unit(&self, container: &Path, check: &ExpectedChecksum) -> VerificationResult {
        let deadline = Deadline::after(self.options.unit_timeout);
        let expected = ContentDigest::from_base64(&check.declared);
        let declared_digest = expected
            .as_ref()
            .map_or_else(|_| check.declared.clone(), ContentDigest::to_hex_upper);
        let not_found = |reason: String| VerificationResult {
            placement_path: check.entry.clone(),
            declared_digest: declared_digest.clone(),
            actual_digest: None,
            verdict: Verdict::NotFound,
            reason: Some(reason),
        };

        let actual = match self.hash_entry(container, &check.entry, deadline) {
            Ok(digest) => digest,
            Err(e) => return not_found(e.to_string()),
        };

        let (verdict, reason) = match &expected {
            Ok(expected) if expected == &actual => (Verdict::Match, None),
            Ok(_) => (Verdict::Mismatch, None),
            Err(e) => (Verdict::Mismatch, Some(e.to_string())),
        };
        VerificationResult {
            placement_path: check.entry.clone(),
            declared_digest,
            actual_digest: Some(actual.to_hex_upper()),
            verdict,
            reason,
        }
    }

    /// Stream one entry through the hasher. The deadline and the cancel
    /// token are checked before the entry is opened and before every read.
    fn hash_entry(&self, container: &Path, entry: &str, deadline: Deadline) -> Result<ContentDigest, CoreError> {
        deadline.check(&self.cancel)?;
        // each unit reads through its own container handle
        let stream = self.codec.open_entry(container, entry)?;
        Ok(ContentDigest::sha256_of(DeadlineReader::new(
            stream,
            deadline,
            self.cancel.clone(),
        ))?)
    }

    pub fn is_service_container(&self, container: &Path) -> Result<bool, CoreError> {
        Ok(self.codec.contains_entry(container, PACKAGE_MANIFEST)?)
    }

    /// Containers under `dir`, recursively, smallest first.
    pub fn scan_directory(&self, dir: &Path) -> Result<Vec<PathBuf>, CoreError> {
        let mut found = Vec::new();
        collect_containers(dir, self.codec.extension(), &mut found)?;
        found.sort_by(|(a_len, a), (b_len, b)| a_len.cmp(b_len).then_with(|| a.cmp(b)));
        Ok(found.into_iter().map(|(_, p)| p).collect())
    }

    /// Verify every service container under `dir`. Per-package errors are
    /// recorded and the scan goes on; `on_package` sees each container
    /// before it is checked.
    pub fn verify_directory(
        &self,
        dir: &Path,
        mut on_package: impl FnMut(&Path),
    ) -> Result<BatchReport, CoreError> {
        let mut report = BatchReport::default();
        for container in self.scan_directory(dir)? {
            if self.cancel.is_cancelled() {
                return Err(CoreError::Cancelled);
            }
            match self.is_service_container(&container) {
                Ok(true) => {}
                Ok(false) => {
                    info!("not a service package, skipping: {}", container.display());
                    report.skipped.push(container);
                    continue;
                }
                Err(e) => {
                    report.errors.push(failure(container, &e));
                    continue;
                }
            }
            on_package(&container);
            self.record(&mut report, container);
        }
        Ok(report)
    }

    /// Verify a single container, or every container under a directory.
    pub fn verify_path(
        &self,
        path: &Path,
        mut on_package: impl FnMut(&Path),
    ) -> Result<BatchReport, CoreError> {
        if path.is_dir() {
            return self.verify_directory(path, on_package);
        }
        let mut report = BatchReport::default();
        on_package(path);
        self.record(&mut report, path.to_path_buf());
        Ok(report)
    }

    fn record(&self, report: &mut BatchReport, container: PathBuf) {
        match self.verify_package(&container) {
            Ok(package) => {
                if !package.is_valid() {
                    warn!("{}: checksum verification failed", container.display());
                }
                report.packages.push(package);
            }
            Err(e) => report.errors.push(failure(container, &e)),
        }
    }
}

fn failure(container: PathBuf, error: &CoreError) -> PackageFailure {
    warn!("{}: {error}", container.display());
    PackageFailure {
        container,
        error: error.to_string(),
        platform_unavailable: error.is_platform_unavailable(),
    }
}

fn collect_containers(dir: &Path, extension: &str, out: &mut Vec<(u64, PathBuf)>) -> Result<(), CoreError> {
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        let file_type = entry.file_type()?;
        if file_type.is_dir() {
            collect_containers(&path, extension, out)?;
        } else if file_type.is_file()
            && path
                .extension()
                .is_some_and(|e| e.to_string_lossy().eq_ignore_ascii_case(extension))
        {
            out.push((entry.metadata()?.len(), path));
        }
    }
    Ok(())
}
