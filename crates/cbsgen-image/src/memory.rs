//! In-memory backend, used by tests and benchmarks.

use crate::path::{components, file_name, lookup_key, matches_pattern};
use crate::{Disk, FileAttributes, FileSystem, ImageError, Partition, ReadSeek};
use chrono::{DateTime, TimeZone, Utc};
use std::collections::BTreeMap;
use std::io::{Cursor, Read};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

#[derive(Debug, Clone)]
struct MemoryFile {
    path: String,
    data: Arc<Vec<u8>>,
    attributes: FileAttributes,
    modified: DateTime<Utc>,
}

/// Case-insensitive file tree held in memory.
///
/// `open_count` records how many times file content was opened, so callers
/// can assert that a code path performed no reads.
#[derive(Debug, Default)]
pub struct MemoryFileSystem {
    files: BTreeMap<String, MemoryFile>,
    opens: AtomicUsize,
}

fn epoch() -> DateTime<Utc> {
    Utc.timestamp_opt(0, 0).single().unwrap_or_default()
}

impl MemoryFileSystem {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_file(self, path: &str, data: impl Into<Vec<u8>>) -> Self {
        self.with_file_attrs(path, data, FileAttributes::ARCHIVE)
    }

    #[must_use]
    pub fn with_file_attrs(
        mut self,
        path: &str,
        data: impl Into<Vec<u8>>,
        attributes: FileAttributes,
    ) -> Self {
        self.insert(path, data, attributes);
        self
    }

    pub fn insert(&mut self, path: &str, data: impl Into<Vec<u8>>, attributes: FileAttributes) {
        let display = components(path).collect::<Vec<_>>().join("\\");
        self.files.insert(
            lookup_key(path),
            MemoryFile {
                path: display,
                data: Arc::new(data.into()),
                attributes,
                modified: epoch(),
            },
        );
    }

    pub fn open_count(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    fn get(&self, path: &str) -> Result<&MemoryFile, ImageError> {
        self.files
            .get(&lookup_key(path))
            .ok_or_else(|| ImageError::NotFound(path.to_owned()))
    }
}

impl FileSystem for MemoryFileSystem {
    fn file_exists(&self, path: &str) -> bool {
        self.files.contains_key(&lookup_key(path))
    }

    fn directory_exists(&self, path: &str) -> bool {
        let key = lookup_key(path);
        if key.is_empty() {
            return true;
        }
        let prefix = format!("{key}\\");
        self.files.keys().any(|k| k.starts_with(&prefix))
    }

    fn list_files(
        &self,
        dir: &str,
        pattern: &str,
        recursive: bool,
    ) -> Result<Vec<String>, ImageError> {
        if !self.directory_exists(dir) {
            return Err(ImageError::NotFound(dir.to_owned()));
        }
        let key = lookup_key(dir);
        let prefix = if key.is_empty() {
            String::new()
        } else {
            format!("{key}\\")
        };
        let dir_display = components(dir).collect::<Vec<_>>().join("\\");
        Ok(self
            .files
            .iter()
            .filter_map(|(k, f)| {
                let rest = k.strip_prefix(&prefix)?;
                if !recursive && rest.contains('\\') {
                    return None;
                }
                if !matches_pattern(file_name(&f.path), pattern) {
                    return None;
                }
                // keep the caller's spelling of `dir` and the stored spelling below it
                let below = &f.path[f.path.len() - rest.len()..];
                Some(if dir_display.is_empty() {
                    below.to_owned()
                } else {
                    format!("{dir_display}\\{below}")
                })
            })
            .collect())
    }

    fn open_read(&self, path: &str) -> Result<Box<dyn Read + Send>, ImageError> {
        let file = self.get(path)?;
        self.opens.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(Cursor::new(ArcBytes(Arc::clone(&file.data)))))
    }

    fn attributes(&self, path: &str) -> Result<FileAttributes, ImageError> {
        Ok(self.get(path)?.attributes)
    }

    fn last_write_time(&self, path: &str) -> Result<DateTime<Utc>, ImageError> {
        Ok(self.get(path)?.modified)
    }
}

/// Shared byte buffer usable as a `Cursor` backing store.
#[derive(Debug, Clone)]
struct ArcBytes(Arc<Vec<u8>>);

impl AsRef<[u8]> for ArcBytes {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

pub struct MemoryPartition {
    name: String,
    filesystem: Option<MemoryFileSystem>,
    raw: Option<Arc<Vec<u8>>>,
}

impl MemoryPartition {
    pub fn with_filesystem(name: &str, filesystem: MemoryFileSystem) -> Self {
        Self {
            name: name.to_owned(),
            filesystem: Some(filesystem),
            raw: None,
        }
    }

    pub fn raw(name: &str, data: impl Into<Vec<u8>>) -> Self {
        Self {
            name: name.to_owned(),
            filesystem: None,
            raw: Some(Arc::new(data.into())),
        }
    }

    #[must_use]
    pub fn with_raw(mut self, data: impl Into<Vec<u8>>) -> Self {
        self.raw = Some(Arc::new(data.into()));
        self
    }

    pub fn memory_filesystem(&self) -> Option<&MemoryFileSystem> {
        self.filesystem.as_ref()
    }
}

impl Partition for MemoryPartition {
    fn name(&self) -> &str {
        &self.name
    }

    fn filesystem(&self) -> Option<&dyn FileSystem> {
        self.filesystem.as_ref().map(|fs| fs as &dyn FileSystem)
    }

    fn open_raw(&self) -> Result<Box<dyn ReadSeek>, ImageError> {
        let raw = self
            .raw
            .as_ref()
            .ok_or_else(|| ImageError::NoRawStream(self.name.clone()))?;
        Ok(Box::new(Cursor::new(ArcBytes(Arc::clone(raw)))))
    }
}

pub struct MemoryDisk {
    partitions: Vec<Box<dyn Partition>>,
}

impl MemoryDisk {
    pub fn new(partitions: Vec<MemoryPartition>) -> Self {
        Self {
            partitions: partitions
                .into_iter()
                .map(|p| Box::new(p) as Box<dyn Partition>)
                .collect(),
        }
    }
}

impl Disk for MemoryDisk {
    fn partitions(&self) -> &[Box<dyn Partition>] {
        &self.partitions
    }
}
