//! Servicing manifest model, identity naming, and update history for cbsgen.
//!
//! This crate defines the schema layer: the read-only `Component` model parsed
//! from package (`.mum`) and component (`.manifest`) XML, canonical identity
//! composition (`ComponentIdentity`), and `UpdateHistory` lookup used to name
//! rebuilt packages the way the device originally received them.

pub mod history;
pub mod identity;
pub mod manifest;
pub mod oem_input;
pub mod types;

pub use history::{
    parse_update_history_bytes, parse_update_history_str, reformat_destination_path,
    HistoryPackage, PackageNaming, UpdateEvent, UpdateHistory,
};
pub use identity::{replace_ignore_case, ComponentIdentity, ARCH_ARM64_ON_ARM, ARCH_ARM64_ON_X86};
pub use manifest::{
    decode_manifest_bytes, ends_with_ignore_case, parse_component_bytes, parse_component_str,
    Component, FileEntry,
};
pub use oem_input::parse_additional_feature_manifests;
pub use types::{CanonicalName, PlacementPath};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ManifestError {
    #[error("failed to read manifest: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse manifest XML: {0}")]
    Xml(#[from] roxmltree::Error),
    #[error("manifest text could not be decoded: {0}")]
    Encoding(String),
    #[error("manifest is missing <{0}>")]
    MissingElement(&'static str),
    #[error("<{element}> is missing attribute '{attribute}'")]
    MissingAttribute {
        element: &'static str,
        attribute: &'static str,
    },
    #[error("invalid size '{value}' for file '{file}'")]
    InvalidSize { file: String, value: String },
    #[error("unsupported on this platform: {0}")]
    PlatformUnavailable(String),
}
