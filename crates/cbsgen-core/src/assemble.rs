use crate::locate::{FileSource, LocateRequest, Locator, ResolutionFailure, ResolvedFile, StrategyKind};
use crate::resolve::MacroResolver;
use crate::CoreError;
use cbsgen_image::{partition_label, Disk, FileAttributes, Partition};
use cbsgen_schema::{Component, FileEntry, PlacementPath};
use cbsgen_store::{ContainerCodec, ContainerEntry};
use serde::Serialize;
use std::path::Path;
use tracing::{debug, info, warn};

/// Builds the wrapper image for packages that apply to a directory tree
/// rather than to individual files.
pub trait WrapperBuilder: Send + Sync {
    fn build_wrapper(
        &self,
        container: &Path,
        entries: &[ContainerEntry<'_>],
        partition: &dyn Partition,
        apply_to: &str,
    ) -> Result<(), CoreError>;
}

pub fn is_wrapper_package(component: &Component) -> bool {
    component
        .apply_to
        .as_deref()
        .is_some_and(|a| !a.trim().is_empty())
}

/// Outcome of resolving one declared file.
#[derive(Debug)]
pub struct FileResolution<'a> {
    pub entry: &'a FileEntry,
    pub result: Result<ResolvedFile<'a>, ResolutionFailure>,
}

/// Resolve every declared file of `component`, in declared order.
///
/// Missing files and per-file read failures are kept as values;
/// `PlatformUnavailable` aborts the whole call.
pub fn resolve_component<'a>(
    resolver: &MacroResolver,
    locator: &Locator,
    component: &'a Component,
    partition: &'a dyn Partition,
    disks: &'a [Box<dyn Disk>],
) -> Result<Vec<FileResolution<'a>>, CoreError> {
    let mut resolutions = Vec::with_capacity(component.files.len());
    for entry in &component.files {
        let resolved = resolver.resolve(&entry.source_path, &component.identity);
        let request = LocateRequest::new(resolved, entry, component, partition, disks);
        let result = locator.locate(&request);
        match &result {
            Err(ResolutionFailure::PlatformUnavailable(reason)) => {
                return Err(CoreError::PlatformUnavailable(reason.clone()));
            }
            Err(e) => warn!("{}: {e}", component.identity.name),
            Ok(_) => {}
        }
        resolutions.push(FileResolution { entry, result });
    }
    Ok(resolutions)
}

/// Container entries for the files that resolved, in declared order.
pub fn assemble<'r>(resolved: &'r [FileResolution<'_>]) -> Vec<ContainerEntry<'r>> {
    resolved
        .iter()
        .filter_map(|r| r.result.as_ref().ok())
        .map(|file| ContainerEntry {
            name: &file.placement_path,
            source: file,
            attributes: file.attributes,
            modified: file.modified,
        })
        .collect()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum AssembleOutcome {
    /// The destination already existed; nothing was resolved or read.
    Skipped,
    /// No declared file resolved; no container was written.
    Empty { missing: Vec<String> },
    Built {
        entries: usize,
        missing: Vec<String>,
        wrapped: bool,
    },
}

pub struct PackageAssembler<'c> {
    resolver: MacroResolver,
    locator: Locator,
    codec: &'c dyn ContainerCodec,
    wrapper: Option<&'c dyn WrapperBuilder>,
    skip_existing: bool,
}

impl<'c> PackageAssembler<'c> {
    pub fn new(resolver: MacroResolver, codec: &'c dyn ContainerCodec) -> Self {
        Self {
            resolver,
            locator: Locator::default(),
            codec,
            wrapper: None,
            skip_existing: true,
        }
    }

    #[must_use]
    pub fn with_wrapper(mut self, wrapper: &'c dyn WrapperBuilder) -> Self {
        self.wrapper = Some(wrapper);
        self
    }

    #[must_use]
    pub fn with_locator(mut self, locator: Locator) -> Self {
        self.locator = locator;
        self
    }

    #[must_use]
    pub fn skip_existing(mut self, skip: bool) -> Self {
        self.skip_existing = skip;
        self
    }

    pub fn build_package(
        &self,
        component: &Component,
        partition: &dyn Partition,
        disks: &[Box<dyn Disk>],
        dest: &Path,
    ) -> Result<AssembleOutcome, CoreError> {
        if self.skip_existing && dest.exists() {
            warn!("container already exists, skipping: {}", dest.display());
            return Ok(AssembleOutcome::Skipped);
        }

        let resolutions =
            resolve_component(&self.resolver, &self.locator, component, partition, disks)?;
        let missing: Vec<String> = resolutions
            .iter()
            .filter(|r| r.result.is_err())
            .map(|r| r.entry.source_path.clone())
            .collect();
        let entries = assemble(&resolutions);

        if entries.is_empty() {
            warn!(
                "no files resolved for {}, not writing {}",
                component.identity.name,
                dest.display()
            );
            return Ok(AssembleOutcome::Empty { missing });
        }

        self.codec.pack_entries(dest, &entries)?;
        debug!("wrote {} ({} entries)", dest.display(), entries.len());

        let mut wrapped = false;
        if let Some(apply_to) = component.apply_to.as_deref().filter(|_| is_wrapper_package(component)) {
            match self.wrapper {
                Some(builder) => {
                    builder.build_wrapper(dest, &entries, partition, apply_to)?;
                    wrapped = true;
                }
                None => info!(
                    "{} applies to {apply_to}; no wrapper builder configured, built the plain container only",
                    component.identity.name
                ),
            }
        }

        Ok(AssembleOutcome::Built {
            entries: entries.len(),
            missing,
            wrapped,
        })
    }

    /// Package every file below the driver folder `folder` of `partition`
    /// into `dest`. Entry names are relative to `folder`.
    pub fn build_driver(
        &self,
        partition: &dyn Partition,
        folder: &str,
        dest: &Path,
    ) -> Result<AssembleOutcome, CoreError> {
        if self.skip_existing && dest.exists() {
            warn!("container already exists, skipping: {}", dest.display());
            return Ok(AssembleOutcome::Skipped);
        }
        let fs = partition
            .filesystem()
            .ok_or_else(|| CoreError::Config(format!("{} has no filesystem", partition.name())))?;
        let prefix_len = folder.trim_end_matches('\\').len() + 1;

        let mut files = Vec::new();
        let mut missing = Vec::new();
        for path in fs.list_files(folder, "*", true)? {
            let Some(relative) = path.get(prefix_len..).filter(|r| !r.is_empty()) else {
                continue;
            };
            let metadata = fs
                .attributes(&path)
                .and_then(|a| fs.last_write_time(&path).map(|m| (a, m)));
            match metadata {
                Ok((attributes, modified)) => files.push(ResolvedFile {
                    placement_path: PlacementPath::new(relative),
                    partition: partition_label(partition.name()).to_owned(),
                    source: FileSource::FileSystem { fs, path },
                    attributes: attributes.without(FileAttributes::REPARSE_POINT),
                    modified,
                    strategy: StrategyKind::Direct,
                }),
                Err(e) => {
                    warn!("{path}: {e}");
                    missing.push(path);
                }
            }
        }

        let entries: Vec<ContainerEntry<'_>> = files
            .iter()
            .map(|file| ContainerEntry {
                name: &file.placement_path,
                source: file,
                attributes: file.attributes,
                modified: file.modified,
            })
            .collect();
        if entries.is_empty() {
            warn!("driver folder {folder} is empty, not writing {}", dest.display());
            return Ok(AssembleOutcome::Empty { missing });
        }

        self.codec.pack_entries(dest, &entries)?;
        debug!("wrote {} ({} entries)", dest.display(), entries.len());
        Ok(AssembleOutcome::Built {
            entries: entries.len(),
            missing,
            wrapped: false,
        })
    }
}
