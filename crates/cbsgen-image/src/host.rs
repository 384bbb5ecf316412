//! Host-directory backend: an image extracted to disk, one subdirectory per
//! partition, with optional `<partition>.bin` raw dumps next to them.

use crate::path::{components, join, matches_pattern};
use crate::{Disk, FileAttributes, FileSystem, ImageError, Partition, ReadSeek};
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};
use tracing::debug;

const RAW_EXTENSION: &str = "bin";

pub struct DirectoryFileSystem {
    root: PathBuf,
}

impl DirectoryFileSystem {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Map an image path onto the host, matching each component
    /// case-insensitively against the directory listing.
    fn host_path(&self, path: &str) -> Option<PathBuf> {
        let mut current = self.root.clone();
        for component in components(path) {
            let exact = current.join(component);
            if fs::symlink_metadata(&exact).is_ok() {
                current = exact;
                continue;
            }
            let found = fs::read_dir(&current)
                .ok()?
                .filter_map(Result::ok)
                .find(|e| e.file_name().to_string_lossy().eq_ignore_ascii_case(component))?;
            current = found.path();
        }
        Some(current)
    }

    fn require(&self, path: &str) -> Result<PathBuf, ImageError> {
        self.host_path(path)
            .ok_or_else(|| ImageError::NotFound(path.to_owned()))
    }

    fn collect(
        dir: &Path,
        prefix: &str,
        pattern: &str,
        recursive: bool,
        out: &mut Vec<String>,
    ) -> Result<(), ImageError> {
        let mut entries: Vec<_> = fs::read_dir(dir)?.filter_map(Result::ok).collect();
        entries.sort_by_key(fs::DirEntry::file_name);
        for entry in entries {
            let name = entry.file_name().to_string_lossy().into_owned();
            let file_type = entry.file_type()?;
            let relative = join(prefix, &name);
            if file_type.is_dir() {
                if recursive {
                    Self::collect(&entry.path(), &relative, pattern, recursive, out)?;
                }
            } else if matches_pattern(&name, pattern) {
                out.push(relative);
            }
        }
        Ok(())
    }
}

impl FileSystem for DirectoryFileSystem {
    fn file_exists(&self, path: &str) -> bool {
        self.host_path(path).is_some_and(|p| p.is_file())
    }

    fn directory_exists(&self, path: &str) -> bool {
        self.host_path(path).is_some_and(|p| p.is_dir())
    }

    fn list_files(
        &self,
        dir: &str,
        pattern: &str,
        recursive: bool,
    ) -> Result<Vec<String>, ImageError> {
        let host = self.require(dir)?;
        if !host.is_dir() {
            return Err(ImageError::NotFound(dir.to_owned()));
        }
        let mut out = Vec::new();
        let prefix = components(dir).collect::<Vec<_>>().join("\\");
        Self::collect(&host, &prefix, pattern, recursive, &mut out)?;
        Ok(out)
    }

    fn open_read(&self, path: &str) -> Result<Box<dyn Read + Send>, ImageError> {
        let host = self.require(path)?;
        Ok(Box::new(fs::File::open(host)?))
    }

    fn attributes(&self, path: &str) -> Result<FileAttributes, ImageError> {
        let host = self.require(path)?;
        let meta = fs::symlink_metadata(&host)?;
        let mut attrs = if meta.is_dir() {
            FileAttributes::DIRECTORY
        } else {
            FileAttributes::ARCHIVE
        };
        if meta.permissions().readonly() {
            attrs = attrs.union(FileAttributes::READ_ONLY);
        }
        if meta.file_type().is_symlink() {
            attrs = attrs.union(FileAttributes::REPARSE_POINT);
        }
        Ok(attrs)
    }

    fn last_write_time(&self, path: &str) -> Result<DateTime<Utc>, ImageError> {
        let host = self.require(path)?;
        Ok(DateTime::<Utc>::from(fs::metadata(host)?.modified()?))
    }
}

pub struct DirectoryPartition {
    name: String,
    filesystem: Option<DirectoryFileSystem>,
    raw: Option<PathBuf>,
}

impl DirectoryPartition {
    pub fn new(name: impl Into<String>, root: Option<PathBuf>, raw: Option<PathBuf>) -> Self {
        Self {
            name: name.into(),
            filesystem: root.map(DirectoryFileSystem::new),
            raw,
        }
    }
}

impl Partition for DirectoryPartition {
    fn name(&self) -> &str {
        &self.name
    }

    fn filesystem(&self) -> Option<&dyn FileSystem> {
        self.filesystem.as_ref().map(|fs| fs as &dyn FileSystem)
    }

    fn open_raw(&self) -> Result<Box<dyn ReadSeek>, ImageError> {
        let path = self
            .raw
            .as_ref()
            .ok_or_else(|| ImageError::NoRawStream(self.name.clone()))?;
        Ok(Box::new(fs::File::open(path)?))
    }
}

pub struct DirectoryDisk {
    partitions: Vec<Box<dyn Partition>>,
}

impl DirectoryDisk {
    /// Open an extracted image. Subdirectories become partitions with a
    /// filesystem; `<name>.bin` files attach a raw stream to the partition of
    /// the same name (or form a raw-only partition).
    pub fn open(root: &Path) -> Result<Self, ImageError> {
        if !root.is_dir() {
            return Err(ImageError::InvalidImage(format!(
                "{} is not a directory",
                root.display()
            )));
        }

        let mut found: BTreeMap<String, (String, Option<PathBuf>, Option<PathBuf>)> =
            BTreeMap::new();
        for entry in fs::read_dir(root)? {
            let entry = entry?;
            let path = entry.path();
            let file_type = entry.file_type()?;
            if file_type.is_dir() {
                let name = entry.file_name().to_string_lossy().into_owned();
                let slot = found
                    .entry(name.to_ascii_lowercase())
                    .or_insert_with(|| (name.clone(), None, None));
                slot.0 = name;
                slot.1 = Some(path);
            } else if path
                .extension()
                .is_some_and(|e| e.eq_ignore_ascii_case(RAW_EXTENSION))
            {
                let Some(stem) = path.file_stem().map(|s| s.to_string_lossy().into_owned()) else {
                    continue;
                };
                let slot = found
                    .entry(stem.to_ascii_lowercase())
                    .or_insert_with(|| (stem.clone(), None, None));
                slot.2 = Some(path);
            }
        }

        let partitions: Vec<Box<dyn Partition>> = found
            .into_values()
            .map(|(name, dir, raw)| {
                debug!(
                    "partition {name}: filesystem={} raw={}",
                    dir.is_some(),
                    raw.is_some()
                );
                Box::new(DirectoryPartition::new(name, dir, raw)) as Box<dyn Partition>
            })
            .collect();

        Ok(Self { partitions })
    }
}

impl Disk for DirectoryDisk {
    fn partitions(&self) -> &[Box<dyn Partition>] {
        &self.partitions
    }
}
