//! Container codec seam, reference tar codec, output layout, and content
//! digests for cbsgen.
//!
//! The core never touches container bytes directly: it hands
//! [`ContainerEntry`] lists to a [`ContainerCodec`] and reads entries back
//! through the same trait. [`TarCodec`] is the shipped implementation;
//! [`OutputLayout`] maps package names onto the output tree and
//! [`ContentDigest`] carries SHA-256 values between manifests and reports.

pub mod codec;
pub mod digest;
pub mod layout;
pub mod pack;
pub mod tar_codec;

pub use codec::{ContainerCodec, ContainerEntry, EntrySource};
pub use digest::ContentDigest;
pub use layout::{OutputLayout, DEFAULT_CONTAINER_EXTENSION};
pub use pack::{collect_directory, pack_directory, HostEntry, HostFileSource};
pub use tar_codec::TarCodec;

use std::path::Path;
use thiserror::Error;

/// Fsync a directory so a preceding rename inside it is durable.
pub(crate) fn fsync_dir(dir: &Path) -> Result<(), std::io::Error> {
    let f = std::fs::File::open(dir)?;
    f.sync_all()
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("entry '{name}' not found in container {container}")]
    EntryNotFound { container: String, name: String },
    #[error("invalid container {container}: {reason}")]
    InvalidContainer { container: String, reason: String },
    #[error("invalid digest: {0}")]
    Digest(String),
    #[error("lock acquisition failed: {0}")]
    LockFailed(String),
}
