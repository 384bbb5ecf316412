use crate::manifest::decode_manifest_bytes;
use crate::ManifestError;
use roxmltree::Document;

/// Additional feature manifests named by an `OEMInput.xml`, in file order.
///
/// Each value is the device path of the feature manifest as recorded at
/// image build time (`C:\...\FM\Feature.xml`).
pub fn parse_additional_feature_manifests(data: &[u8]) -> Result<Vec<String>, ManifestError> {
    let text = decode_manifest_bytes(data)?;
    let doc = Document::parse(&text)?;
    Ok(doc
        .descendants()
        .filter(|n| n.is_element() && n.tag_name().name() == "AdditionalFM")
        .filter_map(|n| n.text())
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(str::to_owned)
        .collect())
}
