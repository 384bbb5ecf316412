use crate::manifest::ends_with_ignore_case;
use crate::ManifestError;
use roxmltree::Document;
use serde::{Deserialize, Serialize};

/// Image update history (`UpdateHistory.xml`), in file order (oldest first).
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct UpdateHistory {
    pub events: Vec<UpdateEvent>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct UpdateEvent {
    pub packages: Vec<HistoryPackage>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct HistoryPackage {
    pub package_file: String,
    #[serde(default)]
    pub package_identity: Option<String>,
}

/// Output naming for a package: `stem` has no extension, `file` does.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PackageNaming {
    pub stem: String,
    pub file: String,
}

impl UpdateHistory {
    /// Find the most recent history entry whose package identity matches
    /// `canonical_name` and derive the output naming from its package file.
    ///
    /// `.mum` entries never name a container and are skipped.
    pub fn package_naming(&self, canonical_name: &str) -> Option<PackageNaming> {
        self.events
            .iter()
            .rev()
            .flat_map(|event| event.packages.iter())
            .filter(|p| !ends_with_ignore_case(&p.package_file, ".mum"))
            .find(|p| {
                p.package_identity
                    .as_deref()
                    .is_some_and(|id| id.eq_ignore_ascii_case(canonical_name))
            })
            .map(|p| naming_from_destination(&reformat_destination_path(&p.package_file)))
    }

    /// Naming for the driver package built from `inf_stem.inf`: the most
    /// recent non-`.mum` entry whose package file has the same stem. An
    /// `.inf` package file is renamed to `.cab`.
    pub fn driver_naming(&self, inf_stem: &str) -> Option<PackageNaming> {
        self.events
            .iter()
            .rev()
            .flat_map(|event| event.packages.iter())
            .filter(|p| !ends_with_ignore_case(&p.package_file, ".mum"))
            .find(|p| file_stem(&p.package_file) == inf_stem)
            .map(|p| {
                let mut destination = reformat_destination_path(&p.package_file);
                if destination.ends_with(".inf") {
                    destination.truncate(destination.len() - ".inf".len());
                    destination.push_str(".cab");
                }
                naming_from_destination(&destination)
            })
    }
}

fn file_stem(path: &str) -> &str {
    let name = path.rsplit(['\\', '/']).next().unwrap_or(path);
    match name.rfind('.') {
        Some(dot) if dot > 0 => &name[..dot],
        _ => name,
    }
}

fn naming_from_destination(destination: &str) -> PackageNaming {
    let file_start = destination.rfind('\\').map_or(0, |i| i + 1);
    match destination[file_start..].rfind('.') {
        Some(dot) if dot > 0 => PackageNaming {
            stem: destination[..file_start + dot].to_owned(),
            file: destination.to_owned(),
        },
        _ => PackageNaming {
            stem: destination.to_owned(),
            file: destination.to_owned(),
        },
    }
}

/// Turn an absolute device path into one relative to the output directory.
///
/// `C:\x` and `\\?\C:\x` become `DriveC\x`; other `\\?\` and `\\` paths land
/// under `UNC`.
pub fn reformat_destination_path(path: &str) -> String {
    if let Some((drive, rest)) = split_drive(path) {
        return format!("Drive{drive}\\{}", trim_separators(rest));
    }
    if let Some(rest) = path.strip_prefix(r"\\?\") {
        if let Some((drive, rest)) = split_drive(rest) {
            return format!("Drive{drive}\\{}", trim_separators(rest));
        }
        return format!("UNC\\{}", trim_separators(rest));
    }
    if let Some(rest) = path.strip_prefix(r"\\") {
        return format!("UNC\\{}", trim_separators(rest));
    }
    path.to_owned()
}

/// `X:` plus one separator character, then the rest of the path.
fn split_drive(path: &str) -> Option<(char, &str)> {
    let mut chars = path.char_indices();
    let (_, drive) = chars.next()?;
    let (_, colon) = chars.next()?;
    if colon != ':' || !drive.is_ascii_alphabetic() {
        return None;
    }
    chars.next()?;
    let rest = chars.next().map_or("", |(i, _)| &path[i..]);
    Some((drive.to_ascii_uppercase(), rest))
}

fn trim_separators(s: &str) -> &str {
    s.trim_start_matches('\\')
}

pub fn parse_update_history_str(input: &str) -> Result<UpdateHistory, ManifestError> {
    let doc = Document::parse(input)?;
    let mut history = UpdateHistory::default();

    for event in doc
        .descendants()
        .filter(|n| n.is_element() && n.tag_name().name() == "UpdateEvent")
    {
        let mut packages = Vec::new();
        for package in event
            .descendants()
            .filter(|n| n.is_element() && n.tag_name().name() == "Package")
        {
            let text_of = |name: &str| {
                package
                    .children()
                    .find(|n| n.is_element() && n.tag_name().name() == name)
                    .and_then(|n| n.text())
                    .map(|t| t.trim().to_owned())
                    .filter(|t| !t.is_empty())
            };
            let Some(package_file) = text_of("PackageFile") else {
                continue;
            };
            packages.push(HistoryPackage {
                package_file,
                package_identity: text_of("PackageIdentity"),
            });
        }
        history.events.push(UpdateEvent { packages });
    }

    Ok(history)
}

pub fn parse_update_history_bytes(data: &[u8]) -> Result<UpdateHistory, ManifestError> {
    parse_update_history_str(&crate::manifest::decode_manifest_bytes(data)?)
}
