//! Disk, partition, and filesystem abstraction for cbsgen.
//!
//! Device images are consumed through three read-only traits: a `Disk` owns
//! `Partition`s, and a partition may expose a `FileSystem` and a raw byte
//! stream. Two backends ship here: `DirectoryDisk` reads an image that was
//! extracted to a host directory (one subdirectory per partition, optional
//! `<name>.bin` raw dumps), and `MemoryDisk` keeps everything in memory for
//! tests and tooling.

pub mod host;
pub mod memory;
pub mod path;

pub use host::{DirectoryDisk, DirectoryFileSystem, DirectoryPartition};
pub use memory::{MemoryDisk, MemoryFileSystem, MemoryPartition};
pub use path::{partition_label, matches_pattern};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::io::{Read, Seek};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ImageError {
    #[error("image I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("file not found in image: {0}")]
    NotFound(String),
    #[error("partition '{0}' has no raw stream")]
    NoRawStream(String),
    #[error("invalid image: {0}")]
    InvalidImage(String),
}

/// NTFS-style attribute bits carried into package containers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FileAttributes(u32);

impl FileAttributes {
    pub const READ_ONLY: Self = Self(0x1);
    pub const HIDDEN: Self = Self(0x2);
    pub const SYSTEM: Self = Self(0x4);
    pub const DIRECTORY: Self = Self(0x10);
    pub const ARCHIVE: Self = Self(0x20);
    pub const NORMAL: Self = Self(0x80);
    pub const REPARSE_POINT: Self = Self(0x400);

    pub const fn from_bits(bits: u32) -> Self {
        Self(bits)
    }

    pub const fn bits(self) -> u32 {
        self.0
    }

    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    #[must_use]
    pub const fn union(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }

    #[must_use]
    pub const fn without(self, other: Self) -> Self {
        Self(self.0 & !other.0)
    }
}

/// Read-only view of one partition's filesystem.
///
/// Paths are `\`-separated, relative to the partition root, and
/// case-insensitive.
pub trait FileSystem: Send + Sync {
    fn file_exists(&self, path: &str) -> bool;

    fn directory_exists(&self, path: &str) -> bool;

    fn exists(&self, path: &str) -> bool {
        self.file_exists(path) || self.directory_exists(path)
    }

    /// Files under `dir` whose name matches `pattern`, as paths relative to
    /// the partition root.
    fn list_files(&self, dir: &str, pattern: &str, recursive: bool)
        -> Result<Vec<String>, ImageError>;

    fn open_read(&self, path: &str) -> Result<Box<dyn Read + Send>, ImageError>;

    fn attributes(&self, path: &str) -> Result<FileAttributes, ImageError>;

    fn last_write_time(&self, path: &str) -> Result<DateTime<Utc>, ImageError>;
}

pub trait ReadSeek: Read + Seek + Send {}

impl<T: Read + Seek + Send> ReadSeek for T {}

pub trait Partition: Send + Sync {
    fn name(&self) -> &str;

    fn filesystem(&self) -> Option<&dyn FileSystem>;

    /// A fresh handle on the partition's raw bytes, positioned at offset 0.
    fn open_raw(&self) -> Result<Box<dyn ReadSeek>, ImageError>;
}

pub trait Disk: Send + Sync {
    fn partitions(&self) -> &[Box<dyn Partition>];
}

/// Find a partition by label across every disk, ignoring case and NUL padding.
pub fn find_partition<'a>(disks: &'a [Box<dyn Disk>], label: &str) -> Option<&'a dyn Partition> {
    disks
        .iter()
        .flat_map(|d| d.partitions().iter())
        .find(|p| partition_label(p.name()).eq_ignore_ascii_case(label))
        .map(AsRef::as_ref)
}
