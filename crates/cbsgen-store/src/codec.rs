use crate::StoreError;
use cbsgen_image::FileAttributes;
use cbsgen_schema::PlacementPath;
use chrono::{DateTime, Utc};
use std::io::{self, Read};
use std::path::Path;

/// Something that can hand out a fresh reader over one file's bytes.
pub trait EntrySource: Send + Sync {
    fn open(&self) -> io::Result<Box<dyn Read + Send + '_>>;
}

/// One file to be written into a container.
#[derive(Clone, Copy)]
pub struct ContainerEntry<'a> {
    pub name: &'a PlacementPath,
    pub source: &'a dyn EntrySource,
    pub attributes: FileAttributes,
    pub modified: DateTime<Utc>,
}

impl std::fmt::Debug for ContainerEntry<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContainerEntry")
            .field("name", &self.name)
            .field("attributes", &self.attributes)
            .field("modified", &self.modified)
            .finish_non_exhaustive()
    }
}

/// Reads and writes package containers. Entry names use `\` separators and
/// compare case-insensitively.
pub trait ContainerCodec: Send + Sync {
    /// Extension (without the dot) of containers this codec produces.
    fn extension(&self) -> &str;

    /// Write `entries`, in order, to a new container at `dest`.
    fn pack_entries(&self, dest: &Path, entries: &[ContainerEntry<'_>]) -> Result<(), StoreError>;

    fn extract_entry(&self, container: &Path, name: &str) -> Result<Vec<u8>, StoreError>;

    /// Stream one entry. Codecs that can seek to an entry's data should
    /// override this; the default buffers the whole entry first.
    fn open_entry<'a>(
        &'a self,
        container: &Path,
        name: &str,
    ) -> Result<Box<dyn Read + Send + 'a>, StoreError> {
        Ok(Box::new(io::Cursor::new(self.extract_entry(container, name)?)))
    }

    fn enumerate_entries(&self, container: &Path) -> Result<Vec<String>, StoreError>;

    fn contains_entry(&self, container: &Path, name: &str) -> Result<bool, StoreError> {
        Ok(self
            .enumerate_entries(container)?
            .iter()
            .any(|e| e.eq_ignore_ascii_case(name)))
    }
}
