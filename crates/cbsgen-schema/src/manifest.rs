use crate::identity::ComponentIdentity;
use crate::types::PlacementPath;
use crate::ManifestError;
use roxmltree::{Document, Node};
use serde::{Deserialize, Serialize};
use std::borrow::Cow;

/// Magic prefix of delta-compressed side-by-side manifests.
const DCM_MAGIC: &[u8] = b"DCM\x01";
const UTF8_BOM: &[u8] = b"\xEF\xBB\xBF";
const UTF16LE_BOM: &[u8] = b"\xFF\xFE";
const UTF16BE_BOM: &[u8] = b"\xFE\xFF";

/// One file a manifest declares.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FileEntry {
    /// Symbolic source path, may contain `$(runtime.*)` macros.
    pub source_path: String,
    /// Entry name inside the package container.
    pub placement_path: PlacementPath,
    #[serde(default)]
    pub declared_size: u64,
    /// Base64 digest from `hash/DigestValue`, present on component manifests.
    #[serde(default)]
    pub declared_digest: Option<String>,
}

/// A parsed package (`.mum`) or component (`.manifest`) descriptor.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Component {
    pub identity: ComponentIdentity,
    pub files: Vec<FileEntry>,
    #[serde(default)]
    pub target_partition: Option<String>,
    #[serde(default)]
    pub binary_partition: bool,
    /// Windows-relative directory a wrapper package applies to.
    #[serde(default)]
    pub apply_to: Option<String>,
    /// Architecture of the `update/component` sub-target.
    #[serde(default)]
    pub update_architecture: Option<String>,
}

impl Component {
    /// Entries naming an embedded component manifest.
    pub fn manifest_entries(&self) -> impl Iterator<Item = &FileEntry> {
        self.files
            .iter()
            .filter(|f| ends_with_ignore_case(&f.source_path, ".manifest"))
    }
}

pub fn ends_with_ignore_case(s: &str, suffix: &str) -> bool {
    s.len() >= suffix.len()
        && s.is_char_boundary(s.len() - suffix.len())
        && s[s.len() - suffix.len()..].eq_ignore_ascii_case(suffix)
}

/// Reject manifests this host cannot decode and turn the rest into text.
///
/// UTF-16 is accepted when it carries a byte order mark; anything else must
/// be UTF-8, with or without a BOM. Delta-compressed manifests need the
/// platform's proprietary decompressor.
pub fn decode_manifest_bytes(data: &[u8]) -> Result<Cow<'_, str>, ManifestError> {
    if data.starts_with(DCM_MAGIC) {
        return Err(ManifestError::PlatformUnavailable(
            "delta-compressed manifests can only be expanded by the host servicing stack".to_owned(),
        ));
    }
    if let Some(rest) = data.strip_prefix(UTF16LE_BOM) {
        return decode_utf16(rest, u16::from_le_bytes).map(Cow::Owned);
    }
    if let Some(rest) = data.strip_prefix(UTF16BE_BOM) {
        return decode_utf16(rest, u16::from_be_bytes).map(Cow::Owned);
    }
    let data = data.strip_prefix(UTF8_BOM).unwrap_or(data);
    std::str::from_utf8(data)
        .map(Cow::Borrowed)
        .map_err(|e| ManifestError::Encoding(e.to_string()))
}

fn decode_utf16(data: &[u8], unit: fn([u8; 2]) -> u16) -> Result<String, ManifestError> {
    if data.len() % 2 != 0 {
        return Err(ManifestError::Encoding("odd number of bytes in UTF-16 text".to_owned()));
    }
    let units: Vec<u16> = data.chunks_exact(2).map(|c| unit([c[0], c[1]])).collect();
    String::from_utf16(&units).map_err(|e| ManifestError::Encoding(e.to_string()))
}

pub fn parse_component_bytes(data: &[u8]) -> Result<Component, ManifestError> {
    parse_component_str(&decode_manifest_bytes(data)?)
}

/// Parse a package or component manifest.
///
/// Package manifests list their files under `package/customInformation/file`,
/// component manifests directly under `assembly/file`. Both shapes end up in
/// [`Component::files`].
pub fn parse_component_str(input: &str) -> Result<Component, ManifestError> {
    let doc = Document::parse(input)?;
    let root = doc.root_element();
    if !root.tag_name().name().eq_ignore_ascii_case("assembly") {
        return Err(ManifestError::MissingElement("assembly"));
    }

    let identity_node =
        child(root, "assemblyIdentity").ok_or(ManifestError::MissingElement("assemblyIdentity"))?;
    let identity = parse_identity(identity_node);

    let mut component = Component {
        identity,
        ..Component::default()
    };

    if let Some(package) = child(root, "package") {
        component.target_partition = attr(package, "targetPartition")
            .filter(|v| !v.is_empty())
            .map(str::to_owned);
        component.binary_partition =
            attr(package, "binaryPartition").is_some_and(|v| v.eq_ignore_ascii_case("true"));
        component.apply_to = attr(package, "applyTo")
            .filter(|v| !v.is_empty())
            .map(str::to_owned);

        component.update_architecture = child(package, "update")
            .and_then(|u| child(u, "component"))
            .and_then(|c| child(c, "assemblyIdentity"))
            .and_then(|id| attr(id, "processorArchitecture"))
            .map(str::to_owned);

        if let Some(custom) = child(package, "customInformation") {
            for file in children(custom, "file") {
                component.files.push(parse_package_file(file)?);
            }
        }
    }

    for file in children(root, "file") {
        component.files.push(parse_component_file(file)?);
    }

    Ok(component)
}

fn parse_identity(node: Node<'_, '_>) -> ComponentIdentity {
    let get = |name: &str| attr(node, name).unwrap_or_default().to_owned();
    ComponentIdentity {
        name: get("name"),
        public_key_token: get("publicKeyToken"),
        processor_architecture: get("processorArchitecture"),
        language: get("language"),
        version: get("version"),
    }
}

fn parse_package_file(node: Node<'_, '_>) -> Result<FileEntry, ManifestError> {
    let name = required_attr(node, "name")?;
    let cabpath = attr(node, "cabpath").unwrap_or(name);
    let declared_size = match attr(node, "size") {
        Some(raw) => raw
            .trim()
            .parse::<u64>()
            .map_err(|_| ManifestError::InvalidSize {
                file: name.to_owned(),
                value: raw.to_owned(),
            })?,
        None => 0,
    };
    Ok(FileEntry {
        source_path: name.to_owned(),
        placement_path: PlacementPath::new(cabpath),
        declared_size,
        declared_digest: None,
    })
}

fn parse_component_file(node: Node<'_, '_>) -> Result<FileEntry, ManifestError> {
    let name = required_attr(node, "name")?;
    let declared_digest = node
        .descendants()
        .find(|n| n.is_element() && n.tag_name().name() == "DigestValue")
        .and_then(|n| n.text())
        .map(|t| t.trim().to_owned())
        .filter(|t| !t.is_empty());
    let declared_size = attr(node, "size")
        .and_then(|s| s.trim().parse().ok())
        .unwrap_or(0);
    Ok(FileEntry {
        source_path: name.to_owned(),
        placement_path: PlacementPath::new(name),
        declared_size,
        declared_digest,
    })
}

fn child<'a, 'input>(node: Node<'a, 'input>, name: &str) -> Option<Node<'a, 'input>> {
    node.children()
        .find(|n| n.is_element() && n.tag_name().name().eq_ignore_ascii_case(name))
}

fn children<'a, 'input>(node: Node<'a, 'input>, name: &str) -> Vec<Node<'a, 'input>> {
    node.children()
        .filter(|n| n.is_element() && n.tag_name().name().eq_ignore_ascii_case(name))
        .collect()
}

/// Attribute lookup by local name, ignoring case. Manifests in the wild
/// disagree on `applyTo` vs `ApplyTo`.
fn attr<'a>(node: Node<'a, '_>, name: &str) -> Option<&'a str> {
    node.attributes()
        .find(|a| a.name().eq_ignore_ascii_case(name))
        .map(|a| a.value())
}

fn required_attr<'a>(node: Node<'a, '_>, name: &'static str) -> Result<&'a str, ManifestError> {
    attr(node, name).ok_or(ManifestError::MissingAttribute {
        element: "file",
        attribute: name,
    })
}
