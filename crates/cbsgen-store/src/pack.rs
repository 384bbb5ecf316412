//! Packing a plain host directory into a container.

use crate::codec::{ContainerCodec, ContainerEntry, EntrySource};
use crate::StoreError;
use cbsgen_image::FileAttributes;
use cbsgen_schema::PlacementPath;
use chrono::{DateTime, Utc};
use std::fs;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use tracing::warn;

#[derive(Debug, Clone)]
pub struct HostFileSource(pub PathBuf);

impl EntrySource for HostFileSource {
    fn open(&self) -> io::Result<Box<dyn Read + Send + '_>> {
        Ok(Box::new(fs::File::open(&self.0)?))
    }
}

/// A host file staged for packing under its relative name.
#[derive(Debug, Clone)]
pub struct HostEntry {
    pub name: PlacementPath,
    pub source: HostFileSource,
    pub attributes: FileAttributes,
    pub modified: DateTime<Utc>,
}

impl HostEntry {
    pub fn as_container_entry(&self) -> ContainerEntry<'_> {
        ContainerEntry {
            name: &self.name,
            source: &self.source,
            attributes: self.attributes,
            modified: self.modified,
        }
    }
}

/// Collect every regular file under `dir`, sorted by relative path.
/// Entry names are `\`-separated.
pub fn collect_directory(dir: &Path) -> Result<Vec<HostEntry>, StoreError> {
    let mut entries = Vec::new();
    walk(dir, dir, &mut entries)?;
    entries.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(entries)
}

fn walk(root: &Path, current: &Path, out: &mut Vec<HostEntry>) -> Result<(), StoreError> {
    for entry in fs::read_dir(current)? {
        let entry = entry?;
        let full = entry.path();
        let meta = fs::metadata(&full)?;
        if meta.is_dir() {
            walk(root, &full, out)?;
            continue;
        }
        if !meta.is_file() {
            warn!("skipping unsupported file type: {}", full.display());
            continue;
        }
        let rel = full
            .strip_prefix(root)
            .map_err(|e| StoreError::Io(io::Error::other(format!("path strip: {e}"))))?;
        let name = rel
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("\\");
        let attributes = if meta.permissions().readonly() {
            FileAttributes::ARCHIVE.union(FileAttributes::READ_ONLY)
        } else {
            FileAttributes::ARCHIVE
        };
        out.push(HostEntry {
            name: PlacementPath::new(name),
            source: HostFileSource(full),
            attributes,
            modified: DateTime::<Utc>::from(meta.modified()?),
        });
    }
    Ok(())
}

/// Pack the contents of `dir` into a container at `dest`. Returns the number
/// of files written.
pub fn pack_directory(
    codec: &dyn ContainerCodec,
    dest: &Path,
    dir: &Path,
) -> Result<usize, StoreError> {
    if !dir.is_dir() {
        return Err(StoreError::Io(io::Error::new(
            io::ErrorKind::NotFound,
            format!("{} is not a directory", dir.display()),
        )));
    }
    let staged = collect_directory(dir)?;
    let entries: Vec<ContainerEntry<'_>> = staged.iter().map(HostEntry::as_container_entry).collect();
    codec.pack_entries(dest, &entries)?;
    Ok(entries.len())
}
