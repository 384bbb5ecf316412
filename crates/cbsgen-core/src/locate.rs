//! Finding the bytes behind a resolved manifest path.
//!
//! A [`Locator`] holds an ordered list of strategies. Each strategy is a plain
//! function from a request to an optional [`ResolvedFile`]; the first one to
//! produce a file wins and nothing after it runs.

use crate::resolve::{is_manifest_path, ResolvedPath, SXS_MANIFESTS_DIR};
use cbsgen_image::path::{components, file_name};
use cbsgen_image::{find_partition, partition_label, Disk, FileAttributes, FileSystem, ImageError, Partition};
use cbsgen_schema::{ends_with_ignore_case, Component, FileEntry, PlacementPath, ARCH_ARM64_ON_ARM};
use cbsgen_store::EntrySource;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::io::{self, Read, Seek, SeekFrom};
use thiserror::Error;
use tracing::trace;

/// Top-level directories that are links to other partitions on the device.
pub const LINKED_PARTITIONS: [&str; 5] = ["data", "efiesp", "osdata", "dpp", "mmos"];

const NATIVE_SYSTEM_DIR: &str = r"windows\system32";
const ARM_SYSTEM_DIR: &str = r"windows\sysarm32";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResolutionFailure {
    #[error("file not found: {path} (searched: {})", .searched.join(", "))]
    NotFound { path: String, searched: Vec<String> },
    #[error("failed to read {path}: {reason}")]
    Collaborator { path: String, reason: String },
    #[error("unsupported on this platform: {0}")]
    PlatformUnavailable(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StrategyKind {
    ArchitectureRedirect,
    Direct,
    ManifestDirectory,
    CrossArchitecture,
    CrossPartition,
    RawPartition,
}

/// Where a resolved file's bytes come from.
pub enum FileSource<'a> {
    FileSystem { fs: &'a dyn FileSystem, path: String },
    /// The first `length` bytes of a partition's raw stream.
    RawPartition { partition: &'a dyn Partition, length: u64 },
}

impl fmt::Debug for FileSource<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::FileSystem { path, .. } => f.debug_struct("FileSystem").field("path", path).finish(),
            Self::RawPartition { partition, length } => f
                .debug_struct("RawPartition")
                .field("partition", &partition.name())
                .field("length", length)
                .finish(),
        }
    }
}

#[derive(Debug)]
pub struct ResolvedFile<'a> {
    pub placement_path: PlacementPath,
    /// Label of the partition the bytes were found on.
    pub partition: String,
    pub source: FileSource<'a>,
    pub attributes: FileAttributes,
    pub modified: DateTime<Utc>,
    pub strategy: StrategyKind,
}

impl ResolvedFile<'_> {
    pub fn source_path(&self) -> &str {
        match &self.source {
            FileSource::FileSystem { path, .. } => path,
            FileSource::RawPartition { .. } => "",
        }
    }
}

pub(crate) fn image_error_to_io(e: ImageError) -> io::Error {
    match e {
        ImageError::Io(e) => e,
        ImageError::NotFound(path) => io::Error::new(io::ErrorKind::NotFound, path),
        other => io::Error::other(other),
    }
}

impl EntrySource for ResolvedFile<'_> {
    fn open(&self) -> io::Result<Box<dyn Read + Send + '_>> {
        match &self.source {
            FileSource::FileSystem { fs, path } => fs.open_read(path).map_err(image_error_to_io),
            FileSource::RawPartition { partition, length } => {
                let mut raw = partition.open_raw().map_err(image_error_to_io)?;
                raw.seek(SeekFrom::Start(0))?;
                Ok(Box::new(ExactReader {
                    inner: raw,
                    remaining: *length,
                }))
            }
        }
    }
}

/// Yields exactly `remaining` bytes; a stream that ends sooner is an error.
struct ExactReader<R> {
    inner: R,
    remaining: u64,
}

impl<R: Read> Read for ExactReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.remaining == 0 {
            return Ok(0);
        }
        let max = buf.len().min(usize::try_from(self.remaining).unwrap_or(usize::MAX));
        let n = self.inner.read(&mut buf[..max])?;
        if n == 0 && max > 0 {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!("raw stream ended {} bytes short", self.remaining),
            ));
        }
        self.remaining -= n as u64;
        Ok(n)
    }
}

pub struct LocateRequest<'a> {
    pub relative: String,
    pub decode_manifest: bool,
    pub entry: &'a FileEntry,
    pub component: &'a Component,
    pub partition: &'a dyn Partition,
    pub disks: &'a [Box<dyn Disk>],
}

impl<'a> LocateRequest<'a> {
    pub fn new(
        resolved: ResolvedPath,
        entry: &'a FileEntry,
        component: &'a Component,
        partition: &'a dyn Partition,
        disks: &'a [Box<dyn Disk>],
    ) -> Self {
        Self {
            relative: resolved.relative,
            decode_manifest: resolved.decode_manifest,
            entry,
            component,
            partition,
            disks,
        }
    }

    fn update_architecture_is_arm(&self) -> bool {
        contains_ignore_case(self.component.update_architecture.as_deref(), ARCH_ARM64_ON_ARM)
    }
}

/// A single lookup rule. Every path it tries is appended to `searched`.
pub type Strategy = for<'a> fn(
    &LocateRequest<'a>,
    &mut Vec<String>,
) -> Result<Option<ResolvedFile<'a>>, ResolutionFailure>;

pub struct Locator {
    strategies: Vec<(StrategyKind, Strategy)>,
}

impl Default for Locator {
    fn default() -> Self {
        Self::with_strategies(vec![
            (StrategyKind::ArchitectureRedirect, architecture_redirect as Strategy),
            (StrategyKind::Direct, direct as Strategy),
            (StrategyKind::ManifestDirectory, manifest_directory as Strategy),
            (StrategyKind::CrossArchitecture, cross_architecture as Strategy),
            (StrategyKind::CrossPartition, cross_partition as Strategy),
            (StrategyKind::RawPartition, raw_partition as Strategy),
        ])
    }
}

impl Locator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_strategies(strategies: Vec<(StrategyKind, Strategy)>) -> Self {
        Self { strategies }
    }

    pub fn order(&self) -> Vec<StrategyKind> {
        self.strategies.iter().map(|(kind, _)| *kind).collect()
    }

    pub fn locate<'a>(&self, request: &LocateRequest<'a>) -> Result<ResolvedFile<'a>, ResolutionFailure> {
        let mut searched = Vec::new();
        for (kind, strategy) in &self.strategies {
            let Some(mut found) = strategy(request, &mut searched)? else {
                continue;
            };
            found.strategy = *kind;
            if request.decode_manifest && matches!(found.source, FileSource::FileSystem { .. }) {
                return Err(ResolutionFailure::PlatformUnavailable(format!(
                    "{} is a compressed side-by-side manifest and can only be expanded by the host servicing stack",
                    request.relative
                )));
            }
            trace!(
                "{} -> {}:{} via {kind:?}",
                request.entry.source_path,
                found.partition,
                found.source_path()
            );
            return Ok(found);
        }
        Err(ResolutionFailure::NotFound {
            path: request.relative.clone(),
            searched,
        })
    }
}

fn contains_ignore_case(haystack: Option<&str>, needle: &str) -> bool {
    haystack.is_some_and(|h| h.to_ascii_lowercase().contains(needle))
}

fn replace_prefix(path: &str, prefix: &str, with: &str) -> Option<String> {
    let head = path.get(..prefix.len())?;
    if !head.eq_ignore_ascii_case(prefix) {
        return None;
    }
    Some(format!("{with}{}", &path[prefix.len()..]))
}

fn from_filesystem<'a>(
    request: &LocateRequest<'a>,
    partition: &'a dyn Partition,
    path: &str,
    searched: &mut Vec<String>,
) -> Result<Option<ResolvedFile<'a>>, ResolutionFailure> {
    let Some(fs) = partition.filesystem() else {
        return Ok(None);
    };
    let label = partition_label(partition.name());
    searched.push(format!("{label}:{path}"));
    if !fs.file_exists(path) {
        return Ok(None);
    }

    let collaborator = |e: ImageError| ResolutionFailure::Collaborator {
        path: path.to_owned(),
        reason: e.to_string(),
    };
    let attributes = fs
        .attributes(path)
        .map_err(collaborator)?
        .without(FileAttributes::REPARSE_POINT);
    let modified = fs.last_write_time(path).map_err(collaborator)?;

    Ok(Some(ResolvedFile {
        placement_path: request.entry.placement_path.clone(),
        partition: label.to_owned(),
        source: FileSource::FileSystem {
            fs,
            path: path.to_owned(),
        },
        attributes,
        modified,
        strategy: StrategyKind::Direct,
    }))
}

/// `windows\system32\…` of a package whose update targets `arm64.arm` is
/// looked up under `windows\sysarm32` first.
pub fn architecture_redirect<'a>(
    request: &LocateRequest<'a>,
    searched: &mut Vec<String>,
) -> Result<Option<ResolvedFile<'a>>, ResolutionFailure> {
    if !request.update_architecture_is_arm() {
        return Ok(None);
    }
    match replace_prefix(&request.relative, NATIVE_SYSTEM_DIR, ARM_SYSTEM_DIR) {
        Some(redirected) => from_filesystem(request, request.partition, &redirected, searched),
        None => Ok(None),
    }
}

pub fn direct<'a>(
    request: &LocateRequest<'a>,
    searched: &mut Vec<String>,
) -> Result<Option<ResolvedFile<'a>>, ResolutionFailure> {
    from_filesystem(request, request.partition, &request.relative, searched)
}

pub fn manifest_directory<'a>(
    request: &LocateRequest<'a>,
    searched: &mut Vec<String>,
) -> Result<Option<ResolvedFile<'a>>, ResolutionFailure> {
    if !is_manifest_path(&request.relative) {
        return Ok(None);
    }
    let candidate = format!("{SXS_MANIFESTS_DIR}\\{}", file_name(&request.relative));
    if candidate.eq_ignore_ascii_case(&request.relative) {
        return Ok(None);
    }
    from_filesystem(request, request.partition, &candidate, searched)
}

pub fn cross_architecture<'a>(
    request: &LocateRequest<'a>,
    searched: &mut Vec<String>,
) -> Result<Option<ResolvedFile<'a>>, ResolutionFailure> {
    let arm = request.update_architecture_is_arm()
        || contains_ignore_case(
            Some(request.component.identity.processor_architecture.as_str()),
            ARCH_ARM64_ON_ARM,
        );
    if !arm {
        return Ok(None);
    }
    match replace_prefix(&request.relative, ARM_SYSTEM_DIR, NATIVE_SYSTEM_DIR) {
        Some(native) => from_filesystem(request, request.partition, &native, searched),
        None => Ok(None),
    }
}

/// `data\x\y` is looked up as `x\y` on the partition labelled `data`.
pub fn cross_partition<'a>(
    request: &LocateRequest<'a>,
    searched: &mut Vec<String>,
) -> Result<Option<ResolvedFile<'a>>, ResolutionFailure> {
    let mut parts = components(&request.relative);
    let Some(first) = parts.next() else {
        return Ok(None);
    };
    let Some(alias) = LINKED_PARTITIONS
        .iter()
        .find(|alias| alias.eq_ignore_ascii_case(first))
    else {
        return Ok(None);
    };
    let rest = parts.collect::<Vec<_>>().join("\\");
    if rest.is_empty() {
        return Ok(None);
    }
    match find_partition(request.disks, alias) {
        Some(sibling) => from_filesystem(request, sibling, &rest, searched),
        None => {
            searched.push(format!("{alias}:<no such partition>"));
            Ok(None)
        }
    }
}

/// `*.bin` entries of binary-partition packages are the leading bytes of
/// the target partition's raw stream.
pub fn raw_partition<'a>(
    request: &LocateRequest<'a>,
    searched: &mut Vec<String>,
) -> Result<Option<ResolvedFile<'a>>, ResolutionFailure> {
    let component = request.component;
    if !component.binary_partition || !ends_with_ignore_case(&request.relative, ".bin") {
        return Ok(None);
    }
    let Some(target) = component.target_partition.as_deref() else {
        return Ok(None);
    };
    searched.push(format!("{target}:<raw>"));
    let Some(partition) = find_partition(request.disks, target) else {
        return Ok(None);
    };
    let collaborator = |reason: String| ResolutionFailure::Collaborator {
        path: format!("{target}:<raw>"),
        reason,
    };
    let stream_len = match partition.open_raw() {
        Ok(mut raw) => raw
            .seek(SeekFrom::End(0))
            .map_err(|e| collaborator(e.to_string()))?,
        Err(ImageError::NoRawStream(_)) => return Ok(None),
        Err(e) => return Err(collaborator(e.to_string())),
    };
    let declared = request.entry.declared_size;
    if stream_len < declared {
        return Err(collaborator(format!(
            "raw stream has {stream_len} bytes, {declared} declared"
        )));
    }
    Ok(Some(ResolvedFile {
        placement_path: request.entry.placement_path.clone(),
        partition: partition_label(partition.name()).to_owned(),
        source: FileSource::RawPartition {
            partition,
            length: request.entry.declared_size,
        },
        attributes: FileAttributes::NORMAL,
        modified: Utc::now(),
        strategy: StrategyKind::RawPartition,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resolve::{MacroResolver, ResolverOptions};
    use cbsgen_image::{MemoryDisk, MemoryFileSystem, MemoryPartition};
    use cbsgen_schema::ComponentIdentity;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn component(arch: &str, update_arch: Option<&str>) -> Component {
        Component {
            identity: ComponentIdentity {
                name: "Microsoft-Foo".to_owned(),
                public_key_token: "31bf3856ad364e35".to_owned(),
                processor_architecture: arch.to_owned(),
                language: "neutral".to_owned(),
                version: "10.0.1.0".to_owned(),
            },
            update_architecture: update_arch.map(str::to_owned),
            ..Component::default()
        }
    }

    fn entry(name: &str, cabpath: &str, size: u64) -> FileEntry {
        FileEntry {
            source_path: name.to_owned(),
            placement_path: PlacementPath::new(cabpath),
            declared_size: size,
            declared_digest: None,
        }
    }

    fn disks(partitions: Vec<MemoryPartition>) -> Vec<Box<dyn Disk>> {
        vec![Box::new(MemoryDisk::new(partitions))]
    }

    fn locate<'a>(
        component: &'a Component,
        entry: &'a FileEntry,
        disks: &'a [Box<dyn Disk>],
        options: ResolverOptions,
    ) -> Result<ResolvedFile<'a>, ResolutionFailure> {
        let resolved = MacroResolver::new(options).resolve(&entry.source_path, &component.identity);
        let main = disks[0].partitions()[0].as_ref();
        Locator::default().locate(&LocateRequest::new(resolved, entry, component, main, disks))
    }

    fn read_all(file: &ResolvedFile<'_>) -> Vec<u8> {
        let mut buf = Vec::new();
        file.open().unwrap().read_to_end(&mut buf).unwrap();
        buf
    }

    #[test]
    fn default_order_is_fixed() {
        assert_eq!(
            Locator::default().order(),
            vec![
                StrategyKind::ArchitectureRedirect,
                StrategyKind::Direct,
                StrategyKind::ManifestDirectory,
                StrategyKind::CrossArchitecture,
                StrategyKind::CrossPartition,
                StrategyKind::RawPartition,
            ]
        );
    }

    #[test]
    fn architecture_redirect_wins_over_direct() {
        let fs = MemoryFileSystem::new()
            .with_file(r"windows\system32\foo.dll", b"native".to_vec())
            .with_file(r"windows\sysarm32\foo.dll", b"arm32".to_vec());
        let disks = disks(vec![MemoryPartition::with_filesystem("MainOS", fs)]);
        let c = component("arm64", Some("arm64.arm"));
        let e = entry(r"$(runtime.system32)\foo.dll", "foo.dll", 5);
        let found = locate(&c, &e, &disks, ResolverOptions::default()).unwrap();
        assert_eq!(found.strategy, StrategyKind::ArchitectureRedirect);
        assert_eq!(read_all(&found), b"arm32");
    }

    #[test]
    fn direct_lookup_without_redirect() {
        let fs = MemoryFileSystem::new()
            .with_file(r"windows\system32\foo.dll", b"native".to_vec())
            .with_file(r"windows\sysarm32\foo.dll", b"arm32".to_vec());
        let disks = disks(vec![MemoryPartition::with_filesystem("MainOS", fs)]);
        let c = component("arm64", None);
        let e = entry(r"$(runtime.system32)\foo.dll", "foo.dll", 6);
        let found = locate(&c, &e, &disks, ResolverOptions::default()).unwrap();
        assert_eq!(found.strategy, StrategyKind::Direct);
        assert_eq!(read_all(&found), b"native");
        assert_eq!(found.partition, "MainOS");
    }

    #[test]
    fn manifest_directory_fallback() {
        let fs = MemoryFileSystem::new()
            .with_file(r"Windows\WinSxS\Manifests\foo.manifest", b"<assembly/>".to_vec());
        let disks = disks(vec![MemoryPartition::with_filesystem("MainOS", fs)]);
        let c = component("arm64", None);
        let e = entry(r"$(runtime.system32)\foo.manifest", "foo.manifest", 0);
        let found = locate(&c, &e, &disks, ResolverOptions::default()).unwrap();
        assert_eq!(found.strategy, StrategyKind::ManifestDirectory);
    }

    #[test]
    fn cross_architecture_fallback() {
        let fs = MemoryFileSystem::new().with_file(r"windows\system32\foo.dll", b"native".to_vec());
        let disks = disks(vec![MemoryPartition::with_filesystem("MainOS", fs)]);
        let c = component("arm64.arm", None);
        let e = entry(r"$(runtime.system32)\foo.dll", "foo.dll", 6);
        let found = locate(&c, &e, &disks, ResolverOptions::default()).unwrap();
        assert_eq!(found.strategy, StrategyKind::CrossArchitecture);
        assert_eq!(found.source_path(), r"windows\system32\foo.dll");
    }

    #[test]
    fn cross_partition_fallback_uses_sibling() {
        let main = MemoryFileSystem::new().with_file(r"windows\a.txt", b"a".to_vec());
        let data = MemoryFileSystem::new().with_file(r"x\y.txt", b"from data".to_vec());
        let disks = disks(vec![
            MemoryPartition::with_filesystem("MainOS", main),
            MemoryPartition::with_filesystem("Data\0\0", data),
        ]);
        let c = component("arm64", None);
        let e = entry(r"data\x\y.txt", "y.txt", 9);
        let found = locate(&c, &e, &disks, ResolverOptions::default()).unwrap();
        assert_eq!(found.strategy, StrategyKind::CrossPartition);
        assert_eq!(found.partition, "Data");
        assert_eq!(read_all(&found), b"from data");
    }

    #[test]
    fn raw_partition_returns_declared_prefix() {
        let main = MemoryFileSystem::new().with_file(r"windows\a.txt", b"a".to_vec());
        let raw: Vec<u8> = (0..=255u8).cycle().take(8192).collect();
        let disks = disks(vec![
            MemoryPartition::with_filesystem("MainOS", main),
            MemoryPartition::raw("UEFI", raw.clone()),
        ]);
        let mut c = component("arm64", None);
        c.binary_partition = true;
        c.target_partition = Some("uefi".to_owned());
        let e = entry("uefi.bin", "uefi.bin", 4096);
        let found = locate(&c, &e, &disks, ResolverOptions::default()).unwrap();
        assert_eq!(found.strategy, StrategyKind::RawPartition);
        let bytes = read_all(&found);
        assert_eq!(bytes.len(), 4096);
        assert_eq!(bytes, &raw[..4096]);
        // a second open starts at offset 0 again
        assert_eq!(read_all(&found), bytes);
    }

    #[test]
    fn short_raw_partition_is_a_read_failure() {
        let main = MemoryFileSystem::new().with_file(r"windows\a.txt", b"a".to_vec());
        let disks = disks(vec![
            MemoryPartition::with_filesystem("MainOS", main),
            MemoryPartition::raw("UEFI", vec![7u8; 1000]),
        ]);
        let mut c = component("arm64", None);
        c.binary_partition = true;
        c.target_partition = Some("UEFI".to_owned());
        let e = entry("uefi.bin", "uefi.bin", 4096);
        let err = locate(&c, &e, &disks, ResolverOptions::default()).unwrap_err();
        match err {
            ResolutionFailure::Collaborator { path, reason } => {
                assert_eq!(path, "UEFI:<raw>");
                assert!(reason.contains("1000"), "{reason}");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn raw_stream_that_ends_early_fails_the_read() {
        let disks = disks(vec![MemoryPartition::raw("UEFI", vec![7u8; 10])]);
        let file = ResolvedFile {
            placement_path: PlacementPath::new("uefi.bin"),
            partition: "UEFI".to_owned(),
            source: FileSource::RawPartition {
                partition: disks[0].partitions()[0].as_ref(),
                length: 16,
            },
            attributes: FileAttributes::NORMAL,
            modified: Utc::now(),
            strategy: StrategyKind::RawPartition,
        };
        let mut buf = Vec::new();
        let err = file.open().unwrap().read_to_end(&mut buf).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
    }

    #[test]
    fn missing_everywhere_is_not_found() {
        let fs = MemoryFileSystem::new().with_file(r"windows\other.dll", b"x".to_vec());
        let disks = disks(vec![MemoryPartition::with_filesystem("MainOS", fs)]);
        let c = component("arm64", Some("arm64.arm"));
        let e = entry(r"$(runtime.system32)\foo.dll", "foo.dll", 1);
        match locate(&c, &e, &disks, ResolverOptions::default()) {
            Err(ResolutionFailure::NotFound { path, searched }) => {
                assert_eq!(path, r"windows\system32\foo.dll");
                assert!(searched.iter().any(|s| s.ends_with(r"windows\sysarm32\foo.dll")));
                assert!(searched.iter().any(|s| s.ends_with(r"windows\system32\foo.dll")));
            }
            other => panic!("expected NotFound, got {other:?}"),
        }
    }

    #[test]
    fn reparse_point_attribute_is_dropped() {
        let fs = MemoryFileSystem::new().with_file_attrs(
            r"windows\link.dll",
            b"x".to_vec(),
            FileAttributes::ARCHIVE.union(FileAttributes::REPARSE_POINT),
        );
        let disks = disks(vec![MemoryPartition::with_filesystem("MainOS", fs)]);
        let c = component("arm64", None);
        let e = entry(r"\windows\link.dll", "link.dll", 1);
        let found = locate(&c, &e, &disks, ResolverOptions::default()).unwrap();
        assert!(!found.attributes.contains(FileAttributes::REPARSE_POINT));
        assert!(found.attributes.contains(FileAttributes::ARCHIVE));
    }

    #[test]
    fn compressed_manifest_decoding_is_platform_unavailable() {
        let fs = MemoryFileSystem::new()
            .with_file(r"Windows\WinSxS\Manifests\foo.manifest", b"DCM\x01".to_vec());
        let disks = disks(vec![MemoryPartition::with_filesystem("MainOS", fs)]);
        let c = component("arm64", None);
        let e = entry("foo.manifest", "foo.manifest", 4);
        let options = ResolverOptions {
            use_uncompressed_manifests: true,
        };
        assert!(matches!(
            locate(&c, &e, &disks, options),
            Err(ResolutionFailure::PlatformUnavailable(_))
        ));
        assert!(locate(&c, &e, &disks, ResolverOptions::default()).is_ok());
    }

    static FIRST_CALLS: AtomicUsize = AtomicUsize::new(0);
    static SECOND_CALLS: AtomicUsize = AtomicUsize::new(0);

    fn counting_first<'a>(
        request: &LocateRequest<'a>,
        searched: &mut Vec<String>,
    ) -> Result<Option<ResolvedFile<'a>>, ResolutionFailure> {
        FIRST_CALLS.fetch_add(1, Ordering::SeqCst);
        direct(request, searched)
    }

    fn counting_second<'a>(
        request: &LocateRequest<'a>,
        searched: &mut Vec<String>,
    ) -> Result<Option<ResolvedFile<'a>>, ResolutionFailure> {
        SECOND_CALLS.fetch_add(1, Ordering::SeqCst);
        direct(request, searched)
    }

    #[test]
    fn later_strategies_never_run_after_success() {
        let fs = MemoryFileSystem::new().with_file(r"windows\a.txt", b"a".to_vec());
        let disks = disks(vec![MemoryPartition::with_filesystem("MainOS", fs)]);
        let c = component("arm64", None);
        let e = entry(r"windows\a.txt", "a.txt", 1);
        let resolved = MacroResolver::default().resolve(&e.source_path, &c.identity);
        let locator = Locator::with_strategies(vec![
            (StrategyKind::Direct, counting_first as Strategy),
            (StrategyKind::CrossPartition, counting_second as Strategy),
        ]);
        let request = LocateRequest::new(resolved, &e, &c, disks[0].partitions()[0].as_ref(), &disks);
        let found = locator.locate(&request).unwrap();
        assert_eq!(found.strategy, StrategyKind::Direct);
        assert_eq!(FIRST_CALLS.load(Ordering::SeqCst), 1);
        assert_eq!(SECOND_CALLS.load(Ordering::SeqCst), 0);
    }
}
