use cbsgen_image::path::file_name;
use cbsgen_image::Disk;
use cbsgen_schema::{parse_update_history_bytes, Component, UpdateHistory};
use std::io::Read;
use tracing::debug;

const HISTORY_FILE: &str = "UpdateHistory.xml";
const HISTORY_DIRS: [&str; 2] = [r"Windows\ImageUpdate", r"SharedData\DuShared"];

/// Load the first readable `UpdateHistory.xml` on the image.
///
/// Each partition with a filesystem is searched under `Windows\ImageUpdate`
/// and then `SharedData\DuShared`. Unreadable or malformed candidates are
/// skipped.
pub fn find_update_history(disks: &[Box<dyn Disk>]) -> Option<UpdateHistory> {
    for partition in disks.iter().flat_map(|d| d.partitions()) {
        let Some(fs) = partition.filesystem() else {
            continue;
        };
        for dir in HISTORY_DIRS {
            if !fs.directory_exists(dir) {
                continue;
            }
            let Ok(candidates) = fs.list_files(dir, HISTORY_FILE, true) else {
                continue;
            };
            for candidate in candidates {
                let mut data = Vec::new();
                let read = fs
                    .open_read(&candidate)
                    .map_err(|e| e.to_string())
                    .and_then(|mut r| r.read_to_end(&mut data).map_err(|e| e.to_string()));
                if let Err(e) = read {
                    debug!("skipping {candidate}: {e}");
                    continue;
                }
                match parse_update_history_bytes(&data) {
                    Ok(history) => {
                        debug!("using update history {}:{candidate}", partition.name());
                        return Some(history);
                    }
                    Err(e) => debug!("skipping {candidate}: {e}"),
                }
            }
        }
    }
    None
}

/// Output-relative container stem (no extension) for a package found on
/// `partition_name`.
///
/// Update history naming wins when it knows the package; otherwise the
/// package lands under its target partition (or the partition it was found
/// on) with a version-less identity stem.
pub fn destination_for(
    component: &Component,
    partition_name: &str,
    history: Option<&UpdateHistory>,
) -> String {
    let canonical = component.identity.canonical_name();
    if let Some(naming) = history.and_then(|h| h.package_naming(canonical.as_str())) {
        return naming.stem;
    }
    let dir = component
        .target_partition
        .clone()
        .unwrap_or_else(|| partition_name.replace('\0', "-"));
    format!("{dir}\\{}", component.identity.fallback_package_stem())
}

/// Output-relative container stem for the driver package built around `inf`.
///
/// Falls back to `<partition>\<inf stem>` when the history has no package
/// file with the same stem.
pub fn driver_destination_for(
    inf: &str,
    partition_name: &str,
    history: Option<&UpdateHistory>,
) -> String {
    let name = file_name(inf);
    let stem = name.rfind('.').filter(|&dot| dot > 0).map_or(name, |dot| &name[..dot]);
    if let Some(naming) = history.and_then(|h| h.driver_naming(stem)) {
        return naming.stem;
    }
    format!("{}\\{stem}", partition_name.replace('\0', "-"))
}
