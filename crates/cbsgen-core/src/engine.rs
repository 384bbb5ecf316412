use crate::assemble::{AssembleOutcome, PackageAssembler, WrapperBuilder};
use crate::concurrency::{run_units, CancelToken, OutputLock, Progress, ProgressFn};
use crate::config::Config;
use crate::metadata::{export_build_metadata, MetadataReport};
use crate::naming::{destination_for, driver_destination_for, find_update_history};
use crate::resolve::{MacroResolver, SERVICING_PACKAGES_DIR};
use crate::CoreError;
use cbsgen_image::{partition_label, Disk, Partition};
use cbsgen_schema::{parse_component_bytes, Component, UpdateHistory};
use cbsgen_store::{ContainerCodec, OutputLayout, StoreError};
use serde::Serialize;
use std::collections::HashSet;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Partition whose driver store is rebuilt into driver packages.
pub const DRIVER_PARTITION: &str = "BSP";
pub const DRIVER_REPOSITORY_DIR: &str = r"Windows\System32\DriverStore\FileRepository";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    /// `manifest` is a top-level servicing package manifest.
    Package,
    /// `manifest` is a driver `.inf`; every file in its folder is packaged.
    Driver,
}

/// One package to rebuild.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PackageJob {
    /// Index into [`Builder::partitions`].
    pub partition: usize,
    pub manifest: String,
    pub kind: JobKind,
}

#[derive(Debug, Clone, Serialize)]
pub struct PackageBuild {
    pub partition: String,
    pub manifest: String,
    pub kind: JobKind,
    pub destination: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outcome: Option<AssembleOutcome>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl PackageBuild {
    fn fail(&mut self, error: &CoreError) {
        warn!("{}: {error}", self.manifest);
        self.error = Some(error.to_string());
    }
}

/// What a job builds once its manifest has been read.
enum Plan {
    Package(Component),
    Driver { folder: String },
}

struct PreparedJob {
    index: usize,
    plan: Plan,
    destination: PathBuf,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct BuildReport {
    pub packages: Vec<PackageBuild>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<MetadataReport>,
}

impl BuildReport {
    pub fn built(&self) -> usize {
        self.count(|o| matches!(o, AssembleOutcome::Built { .. }))
    }

    pub fn skipped(&self) -> usize {
        self.count(|o| matches!(o, AssembleOutcome::Skipped))
    }

    pub fn empty(&self) -> usize {
        self.count(|o| matches!(o, AssembleOutcome::Empty { .. }))
    }

    pub fn failed(&self) -> usize {
        self.packages.iter().filter(|p| p.error.is_some()).count()
    }

    /// Declared files that could not be located, across all packages.
    pub fn missing_files(&self) -> usize {
        self.packages
            .iter()
            .filter_map(|p| match &p.outcome {
                Some(AssembleOutcome::Built { missing, .. } | AssembleOutcome::Empty { missing }) => {
                    Some(missing.len())
                }
                _ => None,
            })
            .sum()
    }

    pub fn is_success(&self) -> bool {
        self.failed() == 0
    }

    fn count(&self, pred: impl Fn(&AssembleOutcome) -> bool) -> usize {
        self.packages
            .iter()
            .filter(|p| p.outcome.as_ref().is_some_and(&pred))
            .count()
    }
}

/// Rebuilds every servicing package found on a set of disks.
pub struct Builder<'a> {
    disks: &'a [Box<dyn Disk>],
    config: Config,
    codec: &'a dyn ContainerCodec,
    wrapper: Option<&'a dyn WrapperBuilder>,
    cancel: CancelToken,
}

impl<'a> Builder<'a> {
    pub fn new(disks: &'a [Box<dyn Disk>], config: Config, codec: &'a dyn ContainerCodec) -> Self {
        Self {
            disks,
            config,
            codec,
            wrapper: None,
            cancel: CancelToken::new(),
        }
    }

    #[must_use]
    pub fn with_wrapper(mut self, wrapper: &'a dyn WrapperBuilder) -> Self {
        self.wrapper = Some(wrapper);
        self
    }

    #[must_use]
    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// All partitions of all disks, in disk order.
    pub fn partitions(&self) -> Vec<&'a dyn Partition> {
        self.disks
            .iter()
            .flat_map(|d| d.partitions())
            .map(|p| &**p)
            .collect()
    }

    /// Indices of partitions that carry a servicing package store.
    pub fn servicing_partitions(&self) -> Vec<usize> {
        self.partitions()
            .iter()
            .enumerate()
            .filter(|(_, p)| {
                p.filesystem()
                    .is_some_and(|fs| fs.directory_exists(SERVICING_PACKAGES_DIR))
            })
            .map(|(i, _)| i)
            .collect()
    }

    /// Indices of the driver partitions that carry a driver store.
    pub fn driver_partitions(&self) -> Vec<usize> {
        self.partitions()
            .iter()
            .enumerate()
            .filter(|(_, p)| partition_label(p.name()).eq_ignore_ascii_case(DRIVER_PARTITION))
            .filter(|(_, p)| {
                p.filesystem()
                    .is_some_and(|fs| fs.directory_exists(DRIVER_REPOSITORY_DIR))
            })
            .map(|(i, _)| i)
            .collect()
    }

    /// Top-level `*.mum` manifests of every servicing partition, followed by
    /// every `*.inf` in the driver stores.
    pub fn discover(&self) -> Result<Vec<PackageJob>, CoreError> {
        let partitions = self.partitions();
        let mut jobs = Vec::new();
        for index in self.servicing_partitions() {
            let Some(fs) = partitions[index].filesystem() else {
                continue;
            };
            for manifest in fs.list_files(SERVICING_PACKAGES_DIR, "*.mum", false)? {
                jobs.push(PackageJob {
                    partition: index,
                    manifest,
                    kind: JobKind::Package,
                });
            }
        }
        let packages = jobs.len();
        for index in self.driver_partitions() {
            let Some(fs) = partitions[index].filesystem() else {
                continue;
            };
            for manifest in fs.list_files(DRIVER_REPOSITORY_DIR, "*.inf", true)? {
                jobs.push(PackageJob {
                    partition: index,
                    manifest,
                    kind: JobKind::Driver,
                });
            }
        }
        debug!(
            "discovered {packages} package manifests and {} driver packages",
            jobs.len() - packages
        );
        Ok(jobs)
    }

    pub fn package_count(&self) -> Result<usize, CoreError> {
        Ok(self.discover()?.len())
    }

    /// Rebuild every discovered package under `output_root`.
    ///
    /// The output directory is locked for the duration of the build. A
    /// failing package is recorded in the report and does not stop the
    /// others. The image's `OEMInput.xml` and the feature manifests it names
    /// are exported once the packages are done. Destinations are settled before any container is written:
    /// when several jobs map to the same container, the first one in
    /// discovery order builds it and the rest are reported as skipped.
    pub fn build_all(
        &self,
        output_root: &Path,
        progress: Option<Arc<ProgressFn>>,
    ) -> Result<BuildReport, CoreError> {
        let layout = OutputLayout::new(output_root, self.config.container_extension.clone());
        layout.initialize()?;
        let _lock = OutputLock::try_acquire(&layout.lock_file())?.ok_or_else(|| {
            StoreError::LockFailed(format!(
                "{} is in use by another build",
                layout.root().display()
            ))
        })?;

        let history = find_update_history(self.disks);
        if history.is_none() {
            info!("no update history on the image, using fallback package names");
        }

        let jobs = self.discover()?;
        info!("building {} packages into {}", jobs.len(), output_root.display());

        let mut assembler =
            PackageAssembler::new(MacroResolver::new(self.config.resolver_options()), self.codec)
                .skip_existing(self.config.skip_existing);
        if let Some(wrapper) = self.wrapper {
            assembler = assembler.with_wrapper(wrapper);
        }

        let partitions = self.partitions();
        let mut packages: Vec<PackageBuild> = jobs
            .iter()
            .map(|job| PackageBuild {
                partition: partition_label(partitions[job.partition].name()).to_owned(),
                manifest: job.manifest.clone(),
                kind: job.kind,
                destination: None,
                outcome: None,
                error: None,
            })
            .collect();
        let progress = Progress::new(jobs.len(), progress);

        let mut prepared = run_units(
            &jobs,
            self.config.effective_jobs(),
            &self.cancel,
            &Progress::silent(jobs.len()),
            |index, job| self.prepare(index, job, partitions[job.partition], &layout, history.as_ref()),
        );
        if self.cancel.is_cancelled() {
            return Err(CoreError::Cancelled);
        }
        prepared.sort_by_key(|(index, _)| *index);

        let mut claimed = HashSet::new();
        let mut work = Vec::with_capacity(prepared.len());
        for (index, result) in prepared {
            let build = &mut packages[index];
            match result {
                Err(e) => {
                    build.fail(&e);
                    progress.tick();
                }
                Ok(job) => {
                    build.destination = Some(job.destination.clone());
                    if claimed.insert(job.destination.to_string_lossy().to_lowercase()) {
                        work.push(job);
                    } else {
                        info!(
                            "{} maps to {}, already claimed by an earlier package, skipping",
                            build.manifest,
                            job.destination.display()
                        );
                        build.outcome = Some(AssembleOutcome::Skipped);
                        progress.tick();
                    }
                }
            }
        }

        let results = run_units(
            &work,
            self.config.effective_jobs(),
            &self.cancel,
            &progress,
            |_, job| self.build_one(job, partitions[jobs[job.index].partition], &assembler),
        );
        if self.cancel.is_cancelled() {
            return Err(CoreError::Cancelled);
        }
        for (slot, result) in results {
            let build = &mut packages[work[slot].index];
            match result {
                Ok(outcome) => build.outcome = Some(outcome),
                Err(e) => build.fail(&e),
            }
        }

        let metadata = match export_build_metadata(self.disks, &layout) {
            Ok(metadata) => Some(metadata),
            Err(e) => {
                warn!("could not export build metadata: {e}");
                None
            }
        };

        Ok(BuildReport { packages, metadata })
    }

    /// Read a job's manifest and settle where its container goes.
    fn prepare(
        &self,
        index: usize,
        job: &PackageJob,
        partition: &dyn Partition,
        layout: &OutputLayout,
        history: Option<&UpdateHistory>,
    ) -> Result<PreparedJob, CoreError> {
        match job.kind {
            JobKind::Package => {
                let fs = partition.filesystem().ok_or_else(|| {
                    CoreError::Config(format!("{} has no filesystem", partition.name()))
                })?;
                let mut data = Vec::new();
                fs.open_read(&job.manifest)?.read_to_end(&mut data)?;
                let component = parse_component_bytes(&data)?;
                let destination =
                    layout.container_path(&destination_for(&component, partition.name(), history));
                Ok(PreparedJob {
                    index,
                    plan: Plan::Package(component),
                    destination,
                })
            }
            JobKind::Driver => {
                let folder = job
                    .manifest
                    .rsplit_once('\\')
                    .map_or("", |(dir, _)| dir)
                    .to_owned();
                let destination = layout.container_path(&driver_destination_for(
                    &job.manifest,
                    partition.name(),
                    history,
                ));
                Ok(PreparedJob {
                    index,
                    plan: Plan::Driver { folder },
                    destination,
                })
            }
        }
    }

    fn build_one(
        &self,
        job: &PreparedJob,
        partition: &dyn Partition,
        assembler: &PackageAssembler<'_>,
    ) -> Result<AssembleOutcome, CoreError> {
        match &job.plan {
            Plan::Package(component) => {
                assembler.build_package(component, partition, self.disks, &job.destination)
            }
            Plan::Driver { folder } => assembler.build_driver(partition, folder, &job.destination),
        }
    }
}
