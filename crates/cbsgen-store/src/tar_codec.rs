use crate::codec::{ContainerCodec, ContainerEntry};
use crate::{fsync_dir, StoreError};
use cbsgen_image::FileAttributes;
use std::fs;
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::Path;
use tempfile::NamedTempFile;
use tracing::debug;

const MODE_READ_WRITE: u32 = 0o644;
const MODE_READ_ONLY: u32 = 0o444;

/// Reference container codec writing GNU tar archives.
///
/// Entry names are stored with `/` separators and mapped back to `\` on
/// read. Entries keep their declared order; timestamps come from the entry,
/// ownership is always 0:0.
#[derive(Debug, Clone)]
pub struct TarCodec {
    extension: String,
}

impl Default for TarCodec {
    fn default() -> Self {
        Self::new(crate::DEFAULT_CONTAINER_EXTENSION)
    }
}

impl TarCodec {
    pub fn new(extension: impl Into<String>) -> Self {
        Self {
            extension: extension.into(),
        }
    }

    fn open_archive(container: &Path) -> Result<tar::Archive<fs::File>, StoreError> {
        if !container.is_file() {
            return Err(StoreError::InvalidContainer {
                container: container.display().to_string(),
                reason: "not a regular file".to_owned(),
            });
        }
        Ok(tar::Archive::new(fs::File::open(container)?))
    }

    fn entry_reader(container: &Path, offset: u64, size: u64) -> Result<io::Take<fs::File>, StoreError> {
        let mut file = fs::File::open(container)?;
        file.seek(SeekFrom::Start(offset))?;
        Ok(file.take(size))
    }

    /// Data offset and size of the entry called `name`.
    fn find_entry(container: &Path, name: &str) -> Result<(u64, u64), StoreError> {
        let wanted = archive_name(name);
        let mut ar = Self::open_archive(container)?;
        for entry in ar.entries().map_err(|e| invalid(container, &e))? {
            let entry = entry.map_err(|e| invalid(container, &e))?;
            let path = entry.path().map_err(|e| invalid(container, &e))?;
            if path.to_string_lossy().eq_ignore_ascii_case(&wanted) {
                return Ok((entry.raw_file_position(), entry.size()));
            }
        }
        Err(StoreError::EntryNotFound {
            container: container.display().to_string(),
            name: name.to_owned(),
        })
    }
}

fn archive_name(name: &str) -> String {
    name.split(['\\', '/'])
        .filter(|c| !c.is_empty())
        .collect::<Vec<_>>()
        .join("/")
}

fn entry_name(archive_path: &Path) -> String {
    archive_path.to_string_lossy().replace('/', "\\")
}

fn invalid(container: &Path, e: &std::io::Error) -> StoreError {
    StoreError::InvalidContainer {
        container: container.display().to_string(),
        reason: e.to_string(),
    }
}

fn append_entry<W: Write>(
    ar: &mut tar::Builder<W>,
    entry: &ContainerEntry<'_>,
) -> Result<(), StoreError> {
    let mut data = Vec::new();
    entry.source.open()?.read_to_end(&mut data)?;

    let mut header = tar::Header::new_gnu();
    header.set_entry_type(tar::EntryType::Regular);
    header.set_size(data.len() as u64);
    header.set_mtime(entry.modified.timestamp().max(0) as u64);
    header.set_uid(0);
    header.set_gid(0);
    header.set_mode(if entry.attributes.contains(FileAttributes::READ_ONLY) {
        MODE_READ_ONLY
    } else {
        MODE_READ_WRITE
    });
    header.set_cksum();
    ar.append_data(&mut header, archive_name(entry.name), data.as_slice())?;
    Ok(())
}

impl ContainerCodec for TarCodec {
    fn extension(&self) -> &str {
        &self.extension
    }

    fn pack_entries(&self, dest: &Path, entries: &[ContainerEntry<'_>]) -> Result<(), StoreError> {
        let dir = match dest.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => std::env::current_dir()?,
        };
        fs::create_dir_all(&dir)?;

        let mut tmp = NamedTempFile::new_in(&dir)?;
        {
            let mut ar = tar::Builder::new(tmp.as_file_mut());
            for entry in entries {
                append_entry(&mut ar, entry)?;
            }
            ar.finish()?;
        }
        tmp.as_file().sync_all()?;
        tmp.persist(dest).map_err(|e| StoreError::Io(e.error))?;
        fsync_dir(&dir)?;

        debug!("packed {} entries into {}", entries.len(), dest.display());
        Ok(())
    }

    fn extract_entry(&self, container: &Path, name: &str) -> Result<Vec<u8>, StoreError> {
        let (offset, size) = Self::find_entry(container, name)?;
        let mut data = Vec::with_capacity(size as usize);
        Self::entry_reader(container, offset, size)?.read_to_end(&mut data)?;
        if (data.len() as u64) < size {
            return Err(StoreError::InvalidContainer {
                container: container.display().to_string(),
                reason: format!("entry '{name}' is truncated"),
            });
        }
        Ok(data)
    }

    fn open_entry<'a>(
        &'a self,
        container: &Path,
        name: &str,
    ) -> Result<Box<dyn Read + Send + 'a>, StoreError> {
        let (offset, size) = Self::find_entry(container, name)?;
        Ok(Box::new(Self::entry_reader(container, offset, size)?))
    }

    fn enumerate_entries(&self, container: &Path) -> Result<Vec<String>, StoreError> {
        let mut ar = Self::open_archive(container)?;
        let mut names = Vec::new();
        for entry in ar.entries().map_err(|e| invalid(container, &e))? {
            let entry = entry.map_err(|e| invalid(container, &e))?;
            if entry.header().entry_type().is_file() {
                let path = entry.path().map_err(|e| invalid(container, &e))?;
                names.push(entry_name(&path));
            }
        }
        Ok(names)
    }
}
