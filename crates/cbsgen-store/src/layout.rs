use crate::{fsync_dir, StoreError};
use chrono::{DateTime, Utc};
use std::fs;
use std::io::{self, Read};
use std::path::{Component, Path, PathBuf};
use std::time::SystemTime;
use tempfile::NamedTempFile;

pub const DEFAULT_CONTAINER_EXTENSION: &str = "cab";
const LOCK_FILE: &str = ".cbsgen.lock";

/// Directory layout of a build output tree.
///
/// Package stems are `\`-separated paths relative to the output root
/// (`MainOS\Microsoft-Foo~…~`, `DriveC\Drop\Microsoft-Foo`).
#[derive(Debug, Clone)]
pub struct OutputLayout {
    root: PathBuf,
    extension: String,
}

impl OutputLayout {
    pub fn new(root: impl Into<PathBuf>, extension: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            extension: extension.into(),
        }
    }

    #[inline]
    pub fn root(&self) -> &Path {
        &self.root
    }

    #[inline]
    pub fn extension(&self) -> &str {
        &self.extension
    }

    #[inline]
    pub fn lock_file(&self) -> PathBuf {
        self.root.join(LOCK_FILE)
    }

    /// Host path of the container for `stem`. Parent-directory and root
    /// components are dropped so every container stays under the root.
    pub fn container_path(&self, stem: &str) -> PathBuf {
        let mut file = self.file_path(stem).into_os_string();
        file.push(".");
        file.push(&self.extension);
        PathBuf::from(file)
    }

    /// Host path of a loose output file, confined to the root like
    /// [`container_path`](Self::container_path).
    pub fn file_path(&self, relative: &str) -> PathBuf {
        let mut path = self.root.clone();
        for part in relative.split(['\\', '/']).filter(|c| !c.is_empty()) {
            if matches!(Path::new(part).components().next(), Some(Component::Normal(_))) {
                path.push(part);
            }
        }
        path
    }

    /// Copy `source` to `relative` under the root unless a file is already
    /// there. Returns the written path, or `None` when it was left alone.
    pub fn write_file(
        &self,
        relative: &str,
        source: &mut dyn Read,
        modified: DateTime<Utc>,
    ) -> Result<Option<PathBuf>, StoreError> {
        let dest = self.file_path(relative);
        if dest.exists() {
            return Ok(None);
        }
        let dir = dest.parent().unwrap_or(&self.root);
        fs::create_dir_all(dir)?;

        let mut tmp = NamedTempFile::new_in(dir)?;
        io::copy(source, tmp.as_file_mut())?;
        tmp.as_file().set_modified(SystemTime::from(modified))?;
        tmp.as_file().sync_all()?;
        tmp.persist(&dest).map_err(|e| StoreError::Io(e.error))?;
        fsync_dir(dir)?;
        Ok(Some(dest))
    }

    pub fn initialize(&self) -> Result<(), StoreError> {
        fs::create_dir_all(&self.root)?;
        Ok(())
    }
}
