//! Image build inputs exported next to the rebuilt packages.
//!
//! An image records the `OEMInput.xml` it was built from, and that file names
//! the additional feature manifests that went into it. Both are copied into
//! the output tree so the package set can be fed back into an image build.

use crate::CoreError;
use cbsgen_image::path::file_name;
use cbsgen_image::{Disk, FileSystem};
use cbsgen_schema::{parse_additional_feature_manifests, reformat_destination_path};
use cbsgen_store::OutputLayout;
use serde::Serialize;
use std::path::PathBuf;
use tracing::{debug, info, warn};

pub const OEM_INPUT_PATH: &str = r"Windows\ImageUpdate\OEMInput.xml";
/// Output-relative name of the exported `OEMInput.xml`.
pub const OEM_INPUT_FILE: &str = "OEMInput.xml";
const FEATURE_MANIFEST_DIRS: [&str; 2] = [
    r"Windows\ImageUpdate\FeatureManifest\Microsoft",
    r"Windows\ImageUpdate\FeatureManifest\OEM",
];

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MetadataReport {
    /// The `OEMInput.xml` in the output tree, if there is one.
    pub oem_input: Option<PathBuf>,
    /// Files this call wrote; files already present are left alone.
    pub written: Vec<PathBuf>,
    /// Additional feature manifests no partition carries.
    pub missing: Vec<String>,
}

fn find_file<'a>(disks: &'a [Box<dyn Disk>], path: &str) -> Option<&'a dyn FileSystem> {
    disks
        .iter()
        .flat_map(|d| d.partitions())
        .filter_map(|p| p.filesystem())
        .find(|fs| fs.file_exists(path))
}

fn copy_out(
    fs: &dyn FileSystem,
    path: &str,
    layout: &OutputLayout,
    relative: &str,
) -> Result<Option<PathBuf>, CoreError> {
    let modified = fs.last_write_time(path)?;
    let mut reader = fs.open_read(path)?;
    Ok(layout.write_file(relative, &mut reader, modified)?)
}

/// Copy the image's `OEMInput.xml` and the feature manifests it names into
/// the output tree.
///
/// An `OEMInput.xml` already in the output wins over the image's copy, and
/// its feature manifest list is the one followed.
pub fn export_build_metadata(
    disks: &[Box<dyn Disk>],
    layout: &OutputLayout,
) -> Result<MetadataReport, CoreError> {
    let mut report = MetadataReport::default();

    if let Some(fs) = find_file(disks, OEM_INPUT_PATH) {
        if let Some(written) = copy_out(fs, OEM_INPUT_PATH, layout, OEM_INPUT_FILE)? {
            info!("exported {}", written.display());
            report.written.push(written);
        }
    }
    let oem_input = layout.file_path(OEM_INPUT_FILE);
    if !oem_input.is_file() {
        debug!("no {OEM_INPUT_FILE} on the image");
        return Ok(report);
    }

    let feature_manifests = parse_additional_feature_manifests(&std::fs::read(&oem_input)?)?;
    report.oem_input = Some(oem_input);
    for fm in feature_manifests {
        let name = file_name(&fm);
        let found = FEATURE_MANIFEST_DIRS.iter().find_map(|dir| {
            let path = format!("{dir}\\{name}");
            find_file(disks, &path).map(|fs| (fs, path))
        });
        let Some((fs, path)) = found else {
            warn!("feature manifest {fm} is not on the image");
            report.missing.push(fm);
            continue;
        };
        if let Some(written) = copy_out(fs, &path, layout, &reformat_destination_path(&fm))? {
            debug!("exported {path} to {}", written.display());
            report.written.push(written);
        }
    }
    Ok(report)
}
